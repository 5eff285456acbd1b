//! Virtual hosts and the server block they generate
//!
//! Every virtual host follows the same auth-subrequest pattern: `location /`
//! asks the internal `/auth` location whether the request may pass, the auth
//! service answers with the upstream to forward to in `X-Kage-Forward`, and
//! nginx proxies there with WebSocket upgrades allowed.

use crate::conf::Entry;

/// Name of the upstream group serving session checks
pub const AUTH_UPSTREAM: &str = "kageauth";

/// Endpoint on [`AUTH_UPSTREAM`] that validates a session
pub const AUTH_ENDPOINT: &str = "/api/session";

/// Internal location used for auth subrequests
pub const AUTH_LOCATION: &str = "/auth";

/// Read timeout for proxied connections, long enough for idle WebSockets
pub const PROXY_READ_TIMEOUT: &str = "86400s";

/// Variable holding the upstream chosen by the auth service
const PROXY_TARGET_VAR: &str = "$kagemori_proxy_target";

/// A named server block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualHost {
    pub server_name: String,
    /// Filesystem socket nginx listens on
    pub listen: String,
    /// Selected when no other server_name on `listen` matches
    pub default_server: bool,
    pub resolver: String,
    /// Trusted certificate for verifying the upstream; `Some` iff TLS is enabled
    pub tls_certificate: Option<String>,
}

impl VirtualHost {
    pub fn tls_enabled(&self) -> bool {
        self.tls_certificate.is_some()
    }

    /// Scheme used when proxying to the upstream chosen by the auth service
    pub fn upstream_scheme(&self) -> &'static str {
        if self.tls_enabled() {
            "https"
        } else {
            "http"
        }
    }

    /// Generate the `server { ... }` block for this host
    pub fn to_entry(&self) -> Entry {
        let mut listen = vec![format!("unix:{}", self.listen)];
        if self.default_server {
            listen.push("default_server".to_string());
        }

        let mut children = vec![Entry::directive("listen", listen)];
        if !self.resolver.is_empty() {
            children.push(Entry::directive("resolver", [self.resolver.as_str()]));
        }
        children.push(Entry::directive("server_name", [self.server_name.as_str()]));
        children.push(Entry::block("location", ["/"], self.proxy_location()));
        children.push(Entry::block("location", [AUTH_LOCATION], auth_location()));

        Entry::block("server", Vec::<String>::new(), children)
    }

    fn proxy_location(&self) -> Vec<Entry> {
        let mut entries = vec![
            Entry::directive("auth_request", [AUTH_LOCATION]),
            Entry::repeated(
                "auth_request_set",
                [
                    [PROXY_TARGET_VAR, "$upstream_http_x_kage_forward"],
                    ["$kagemori_ssl_cert", "$upstream_http_x_kage_ssl"],
                ],
            ),
            Entry::directive(
                "proxy_pass",
                [format!("{}://{}", self.upstream_scheme(), PROXY_TARGET_VAR)],
            ),
            Entry::directive("proxy_http_version", ["1.1"]),
            Entry::repeated(
                "proxy_set_header",
                [
                    ["X-Forwarded-For", "$proxy_add_x_forwarded_for"],
                    ["Host", "$host"],
                    ["Upgrade", "$http_upgrade"],
                    ["Connection", "upgrade"],
                    ["Sec-WebSocket-Key", "$http_sec_websocket_key"],
                    ["Sec-WebSocket-Version", "$http_sec_websocket_version"],
                    ["Sec-WebSocket-Extensions", "$http_sec_websocket_extensions"],
                ],
            ),
            Entry::directive("proxy_read_timeout", [PROXY_READ_TIMEOUT]),
        ];

        if let Some(ref certificate) = self.tls_certificate {
            entries.push(Entry::directive("proxy_ssl_verify", ["on"]));
            entries.push(Entry::directive(
                "proxy_ssl_trusted_certificate",
                [certificate.as_str()],
            ));
            entries.push(Entry::directive("proxy_ssl_verify_depth", ["1"]));
        }

        entries
    }
}

fn auth_location() -> Vec<Entry> {
    vec![
        Entry::flag("internal"),
        Entry::directive(
            "proxy_pass",
            [format!("http://{}{}", AUTH_UPSTREAM, AUTH_ENDPOINT)],
        ),
        Entry::repeated(
            "proxy_set_header",
            [
                ["Host", "$host"],
                ["X-Original-URI", "$request_uri"],
                ["X-Forwarded-For", "$proxy_add_x_forwarded_for"],
                ["X-Forwarded-Proto", "$scheme"],
            ],
        ),
    ]
}
