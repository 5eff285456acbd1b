//! Typed nginx configuration tree and its text renderer
//!
//! The tree is a closed set of shapes:
//! - [`Entry::Directive`]: `name arg1 arg2;`
//! - [`Entry::Repeated`]: the same directive emitted once per value list
//! - [`Entry::Block`]: `name args { children }`
//!
//! Rendering is deterministic and follows insertion order, so a model that did
//! not change always produces byte-identical output.

use std::fmt::Write;

/// Indentation used for nested blocks
const INDENT: &str = "    ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// A single directive with zero or more arguments
    Directive { name: String, args: Vec<String> },
    /// A directive repeated once per argument list (e.g. `proxy_set_header`)
    Repeated { name: String, values: Vec<Vec<String>> },
    /// A block directive such as `http`, `server` or `location /auth`
    Block {
        name: String,
        args: Vec<String>,
        children: Vec<Entry>,
    },
}

impl Entry {
    pub fn directive<I, S>(name: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Entry::Directive {
            name: name.to_string(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// A directive without arguments, e.g. `internal;`
    pub fn flag(name: &str) -> Self {
        Entry::Directive {
            name: name.to_string(),
            args: Vec::new(),
        }
    }

    pub fn repeated<I, V, S>(name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Entry::Repeated {
            name: name.to_string(),
            values: values
                .into_iter()
                .map(|v| v.into_iter().map(Into::into).collect())
                .collect(),
        }
    }

    pub fn block<I, S>(name: &str, args: I, children: Vec<Entry>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Entry::Block {
            name: name.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            children,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Entry::Directive { name, .. } | Entry::Repeated { name, .. } | Entry::Block { name, .. } => {
                name.as_str()
            }
        }
    }

    pub fn args(&self) -> &[String] {
        match self {
            Entry::Directive { args, .. } | Entry::Block { args, .. } => args.as_slice(),
            Entry::Repeated { values, .. } => values.first().map(Vec::as_slice).unwrap_or(&[]),
        }
    }

    pub fn children(&self) -> &[Entry] {
        match self {
            Entry::Block { children, .. } => children.as_slice(),
            _ => &[],
        }
    }
}

/// Arguments of the first directive called `name` among `entries`
pub fn find_directive<'a>(entries: &'a [Entry], name: &str) -> Option<&'a [String]> {
    entries
        .iter()
        .find(|e| !matches!(e, Entry::Block { .. }) && e.name() == name)
        .map(Entry::args)
}

/// Every argument list of directives called `name`, expanding repeated entries
pub fn directive_values<'a>(entries: &'a [Entry], name: &str) -> Vec<&'a [String]> {
    let mut out = Vec::new();
    for entry in entries {
        match entry {
            Entry::Directive { name: n, args } if n == name => out.push(args.as_slice()),
            Entry::Repeated { name: n, values } if n == name => {
                out.extend(values.iter().map(Vec::as_slice))
            }
            _ => {}
        }
    }
    out
}

/// Blocks called `name` among `entries`, in order
pub fn blocks<'a>(entries: &'a [Entry], name: &'a str) -> impl Iterator<Item = &'a Entry> + 'a {
    entries
        .iter()
        .filter(move |e| matches!(e, Entry::Block { .. }) && e.name() == name)
}

/// Render a configuration tree to nginx-conf text
pub fn render(entries: &[Entry]) -> String {
    let mut out = String::new();
    render_into(&mut out, entries, 0);
    out
}

fn render_into(out: &mut String, entries: &[Entry], depth: usize) {
    for entry in entries {
        match entry {
            Entry::Directive { name, args } => write_line(out, depth, name, args, ";"),
            Entry::Repeated { name, values } => {
                for args in values {
                    write_line(out, depth, name, args, ";");
                }
            }
            Entry::Block {
                name,
                args,
                children,
            } => {
                write_line(out, depth, name, args, " {");
                render_into(out, children, depth + 1);
                out.push_str(&INDENT.repeat(depth));
                out.push_str("}\n");
            }
        }
    }
}

fn write_line(out: &mut String, depth: usize, name: &str, args: &[String], terminator: &str) {
    out.push_str(&INDENT.repeat(depth));
    out.push_str(name);
    for arg in args {
        // Writing to a String cannot fail
        let _ = write!(out, " {}", quote(arg));
    }
    out.push_str(terminator);
    out.push('\n');
}

/// Quote an argument when nginx would otherwise split or misread it
pub fn quote(arg: &str) -> String {
    let needs_quotes = arg.is_empty()
        || arg
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ';' | '{' | '}' | '"' | '\'' | '#' | '\\'));

    if !needs_quotes {
        return arg.to_string();
    }

    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_scalar_and_flag() {
        let text = render(&[
            Entry::directive("pid", ["nginx.pid"]),
            Entry::flag("internal"),
        ]);
        assert_eq!(text, "pid nginx.pid;\ninternal;\n");
    }

    #[test]
    fn test_render_nested_blocks() {
        let text = render(&[Entry::block(
            "http",
            Vec::<String>::new(),
            vec![Entry::block(
                "upstream",
                ["kageauth"],
                vec![Entry::directive("server", ["unix:/run/auth.sock"])],
            )],
        )]);

        assert_eq!(
            text,
            "http {\n    upstream kageauth {\n        server unix:/run/auth.sock;\n    }\n}\n"
        );
    }

    #[test]
    fn test_render_repeated_directive() {
        let text = render(&[Entry::repeated(
            "proxy_set_header",
            [["Host", "$host"], ["Upgrade", "$http_upgrade"]],
        )]);
        assert_eq!(
            text,
            "proxy_set_header Host $host;\nproxy_set_header Upgrade $http_upgrade;\n"
        );
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("plain"), "plain");
        assert_eq!(quote("$var"), "$var");
        assert_eq!(quote(""), "\"\"");
        assert_eq!(quote("two words"), "\"two words\"");
        assert_eq!(quote("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(quote("a;b"), "\"a;b\"");
    }

    #[test]
    fn test_lookup_helpers() {
        let entries = vec![
            Entry::directive("server_name", ["a.example"]),
            Entry::repeated("proxy_set_header", [["Host", "$host"]]),
            Entry::directive("proxy_set_header", ["X-Original-URI", "$request_uri"]),
            Entry::block("location", ["/"], vec![]),
            Entry::block("location", ["/auth"], vec![]),
        ];

        assert_eq!(
            find_directive(&entries, "server_name"),
            Some(&["a.example".to_string()][..])
        );
        assert_eq!(find_directive(&entries, "location"), None);
        assert_eq!(directive_values(&entries, "proxy_set_header").len(), 2);
        assert_eq!(blocks(&entries, "location").count(), 2);
    }
}
