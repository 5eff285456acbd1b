//! Parser for nginx-conf text
//!
//! Produces [`Entry::Directive`] and [`Entry::Block`] nodes only; a repeated
//! directive reads back as consecutive plain directives.

use crate::conf::Entry;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Semicolon,
    Open,
    Close,
}

/// Parse nginx-conf text into a configuration tree
pub fn parse(input: &str) -> Result<Vec<Entry>> {
    let tokens = tokenize(input)?;
    let mut pos = 0;
    let entries = parse_entries(&tokens, &mut pos, 0)?;
    Ok(entries)
}

fn parse_entries(tokens: &[(Token, usize)], pos: &mut usize, depth: usize) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();

    while let Some((token, line)) = tokens.get(*pos) {
        match token {
            Token::Close => {
                if depth == 0 {
                    return Err(parse_error(*line, "unexpected '}'"));
                }
                *pos += 1;
                return Ok(entries);
            }
            Token::Semicolon | Token::Open => {
                return Err(parse_error(*line, "expected a directive name"));
            }
            Token::Word(name) => {
                let name = name.clone();
                let start_line = *line;
                *pos += 1;

                let mut args = Vec::new();
                loop {
                    match tokens.get(*pos) {
                        Some((Token::Word(arg), _)) => {
                            args.push(arg.clone());
                            *pos += 1;
                        }
                        Some((Token::Semicolon, _)) => {
                            *pos += 1;
                            entries.push(Entry::Directive { name, args });
                            break;
                        }
                        Some((Token::Open, _)) => {
                            *pos += 1;
                            let children = parse_entries(tokens, pos, depth + 1)?;
                            entries.push(Entry::Block {
                                name,
                                args,
                                children,
                            });
                            break;
                        }
                        Some((Token::Close, l)) => {
                            return Err(parse_error(*l, format!("directive '{}' is not terminated by ';'", name)));
                        }
                        None => {
                            return Err(parse_error(
                                start_line,
                                format!("unexpected end of input in directive '{}'", name),
                            ));
                        }
                    }
                }
            }
        }
    }

    if depth > 0 {
        let line = tokens.last().map(|(_, l)| *l).unwrap_or(1);
        return Err(parse_error(line, "unexpected end of input, missing '}'"));
    }

    Ok(entries)
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    let mut line = 1;

    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                line += 1;
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '#' => {
                while let Some(&c) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            ';' => {
                tokens.push((Token::Semicolon, line));
                chars.next();
            }
            '{' => {
                tokens.push((Token::Open, line));
                chars.next();
            }
            '}' => {
                tokens.push((Token::Close, line));
                chars.next();
            }
            '"' | '\'' => {
                let quote = c;
                let start_line = line;
                chars.next();
                let mut word = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some('t') => word.push('\t'),
                            Some('n') => word.push('\n'),
                            Some('r') => word.push('\r'),
                            Some(escaped) => {
                                if escaped == '\n' {
                                    line += 1;
                                }
                                word.push(escaped);
                            }
                            None => return Err(parse_error(start_line, "unterminated string")),
                        },
                        Some(c) if c == quote => break,
                        Some(c) => {
                            if c == '\n' {
                                line += 1;
                            }
                            word.push(c);
                        }
                        None => return Err(parse_error(start_line, "unterminated string")),
                    }
                }
                tokens.push((Token::Word(word), start_line));
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, ';' | '{' | '}' | '"' | '\'' | '#') {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push((Token::Word(word), line));
            }
        }
    }

    Ok(tokens)
}

fn parse_error(line: usize, message: impl Into<String>) -> Error {
    Error::Parse {
        line,
        message: message.into(),
    }
}
