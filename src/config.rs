use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::model::HostOptions;

/// Settings file for the supervisor
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// nginx instance settings
    #[serde(default)]
    pub nginx: NginxSettings,

    /// Virtual hosts to configure, in order
    #[serde(default)]
    pub hosts: Vec<HostConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NginxSettings {
    /// nginx binary, looked up in PATH when not absolute (default: nginx)
    #[serde(default = "default_binary")]
    pub binary: PathBuf,

    /// Prefix directory holding the config, PID file, logs and temp dirs (default: nginx-conf)
    #[serde(default = "default_prefix")]
    pub prefix: PathBuf,

    /// PID file name, relative to the prefix (default: nginx.pid)
    #[serde(default = "default_pid_file")]
    pub pid_file: String,

    /// Generated configuration file name, relative to the prefix (default: nginx.conf)
    #[serde(default = "default_config_file")]
    pub config_file: String,

    /// DNS resolver used for the dynamically chosen upstream (default: 1.1.1.1)
    #[serde(default = "default_resolver")]
    pub resolver: String,

    /// UNIX socket of the auth service backing the kageauth upstream
    #[serde(default = "default_upstream_socket")]
    pub upstream_socket: String,

    /// UNIX socket every virtual host listens on
    #[serde(default = "default_listen_socket")]
    pub listen_socket: String,

    /// Reload instead of doing nothing when start is requested while running (default: true)
    #[serde(default = "default_reload_when_running")]
    pub reload_when_running: bool,

    /// events.worker_connections (default: 768)
    #[serde(default = "default_worker_connections")]
    pub worker_connections: u32,
}

impl NginxSettings {
    /// Full path of the PID file
    pub fn pid_path(&self) -> PathBuf {
        self.prefix.join(&self.pid_file)
    }

    /// Full path of the generated configuration file
    pub fn config_path(&self) -> PathBuf {
        self.prefix.join(&self.config_file)
    }

    /// Settings rooted at `prefix`, everything else default
    pub fn with_prefix(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }
}

impl Default for NginxSettings {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            prefix: default_prefix(),
            pid_file: default_pid_file(),
            config_file: default_config_file(),
            resolver: default_resolver(),
            upstream_socket: default_upstream_socket(),
            listen_socket: default_listen_socket(),
            reload_when_running: default_reload_when_running(),
            worker_connections: default_worker_connections(),
        }
    }
}

/// A virtual host declared in the settings file
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct HostConfig {
    pub server_name: String,

    /// Mark this host as the default server for the listen socket
    #[serde(default)]
    pub default_server: bool,

    /// Proxy to the upstream over TLS with certificate verification
    #[serde(default)]
    pub tls: bool,

    /// Trusted certificate used to verify the upstream (required when tls is set)
    pub tls_certificate: Option<String>,
}

impl HostConfig {
    pub fn new(server_name: &str) -> Self {
        Self {
            server_name: server_name.to_string(),
            default_server: false,
            tls: false,
            tls_certificate: None,
        }
    }

    pub fn options(&self) -> HostOptions {
        HostOptions {
            default_server: self.default_server,
            enable_tls: self.tls,
            tls_certificate: self.tls_certificate.clone(),
        }
    }

    /// Validate this host
    pub fn validate(&self) -> Result<(), String> {
        if self.server_name.trim().is_empty() {
            return Err("host with empty server_name".to_string());
        }
        if self.tls && self.tls_certificate.is_none() {
            return Err(format!(
                "host '{}': tls is enabled but tls_certificate is not set",
                self.server_name
            ));
        }
        Ok(())
    }
}

fn default_binary() -> PathBuf {
    PathBuf::from("nginx")
}

fn default_prefix() -> PathBuf {
    PathBuf::from("nginx-conf")
}

fn default_pid_file() -> String {
    "nginx.pid".to_string()
}

fn default_config_file() -> String {
    "nginx.conf".to_string()
}

fn default_resolver() -> String {
    "1.1.1.1".to_string()
}

fn default_upstream_socket() -> String {
    "/tmp/kagemori-user/kagemori.sock".to_string()
}

fn default_listen_socket() -> String {
    "/tmp/kagemori-user/nginx.sock".to_string()
}

fn default_reload_when_running() -> bool {
    true
}

fn default_worker_connections() -> u32 {
    768
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if self.nginx.binary.as_os_str().is_empty() {
            errors.push("nginx.binary must not be empty".to_string());
        }
        if self.nginx.prefix.as_os_str().is_empty() {
            errors.push("nginx.prefix must not be empty".to_string());
        }
        if self.nginx.config_file.is_empty() {
            errors.push("nginx.config_file must not be empty".to_string());
        }

        let mut seen = HashSet::new();
        let mut default_servers = Vec::new();
        for host in &self.hosts {
            if let Err(e) = host.validate() {
                errors.push(e);
            }
            if !seen.insert(host.server_name.as_str()) {
                errors.push(format!("host '{}' is declared more than once", host.server_name));
            }
            if host.default_server {
                default_servers.push(host.server_name.as_str());
            }
        }

        // All hosts share the one listen socket
        if default_servers.len() > 1 {
            errors.push(format!(
                "only one host may be the default server, found: {}",
                default_servers.join(", ")
            ));
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }
}
