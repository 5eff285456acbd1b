//! In-memory nginx configuration with write-through persistence
//!
//! The model owns the fixed global sections and the ordered list of virtual
//! hosts. Every successful mutation rewrites the whole configuration file
//! before returning, so the file on disk always matches the model.

use std::path::Path;

use tracing::{debug, info};

use crate::config::NginxSettings;
use crate::conf::{self, Entry};
use crate::error::{Error, Result};
use crate::provision::{self, ERROR_LOG, TEMP_PATHS};
use crate::vhost::{VirtualHost, AUTH_UPSTREAM};
use crate::writer::ConfigWriter;

/// Options for [`ConfigModel::add_virtual_host`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostOptions {
    pub default_server: bool,
    pub enable_tls: bool,
    pub tls_certificate: Option<String>,
}

impl HostOptions {
    pub fn default_server(mut self) -> Self {
        self.default_server = true;
        self
    }

    /// Enable TLS towards the upstream, verified against `certificate`
    pub fn tls(mut self, certificate: impl Into<String>) -> Self {
        self.enable_tls = true;
        self.tls_certificate = Some(certificate.into());
        self
    }
}

pub struct ConfigModel {
    pid_file: String,
    worker_connections: u32,
    upstream_socket: String,
    listen_socket: String,
    resolver: String,
    hosts: Vec<VirtualHost>,
    writer: ConfigWriter,
}

impl ConfigModel {
    /// Create a model without hosts and write it out.
    ///
    /// The directories the configuration refers to must already exist; see
    /// [`provision::provision`].
    pub fn new(settings: &NginxSettings) -> Result<Self> {
        let model = Self {
            pid_file: settings.pid_file.clone(),
            worker_connections: settings.worker_connections,
            upstream_socket: settings.upstream_socket.clone(),
            listen_socket: settings.listen_socket.clone(),
            resolver: settings.resolver.clone(),
            hosts: Vec::new(),
            writer: ConfigWriter::new(settings.config_path()),
        };
        model.write_config()?;
        info!(path = %model.path().display(), "Base configuration written");
        Ok(model)
    }

    /// Path of the configuration file this model writes
    pub fn path(&self) -> &Path {
        self.writer.path()
    }

    /// Configured hosts, in insertion order
    pub fn hosts(&self) -> &[VirtualHost] {
        &self.hosts
    }

    /// Add a virtual host and persist.
    ///
    /// Fails without touching the model or the file when `server_name` is
    /// already present or TLS is requested without a certificate.
    pub fn add_virtual_host(
        &mut self,
        server_name: impl Into<String>,
        options: HostOptions,
    ) -> Result<&VirtualHost> {
        let server_name = server_name.into();

        if self.find_virtual_host(&server_name).is_some() {
            return Err(Error::DuplicateHost(server_name));
        }
        if options.enable_tls && options.tls_certificate.is_none() {
            return Err(Error::MissingCertificate(server_name));
        }
        if !options.enable_tls && options.tls_certificate.is_some() {
            debug!(%server_name, "TLS disabled, ignoring tls_certificate");
        }

        self.hosts.push(VirtualHost {
            server_name,
            listen: self.listen_socket.clone(),
            default_server: options.default_server,
            resolver: self.resolver.clone(),
            tls_certificate: options.tls_certificate.filter(|_| options.enable_tls),
        });

        if let Err(e) = self.write_config() {
            self.hosts.pop();
            return Err(e);
        }

        let host = &self.hosts[self.hosts.len() - 1];
        info!(
            server_name = %host.server_name,
            default_server = host.default_server,
            tls = host.tls_enabled(),
            "Virtual host added"
        );
        Ok(host)
    }

    /// Remove a virtual host and persist. Returns false, without writing, when absent.
    pub fn remove_virtual_host(&mut self, server_name: &str) -> Result<bool> {
        let Some(index) = self.hosts.iter().position(|h| h.server_name == server_name) else {
            debug!(server_name, "Virtual host not configured, nothing to remove");
            return Ok(false);
        };

        let removed = self.hosts.remove(index);
        if let Err(e) = self.write_config() {
            self.hosts.insert(index, removed);
            return Err(e);
        }

        info!(server_name, "Virtual host removed");
        Ok(true)
    }

    pub fn find_virtual_host(&self, server_name: &str) -> Option<&VirtualHost> {
        self.hosts.iter().find(|h| h.server_name == server_name)
    }

    /// Build the full configuration tree
    pub fn to_entries(&self) -> Vec<Entry> {
        let mut http = vec![
            Entry::directive("sendfile", ["on"]),
            Entry::directive("types_hash_max_size", ["2048"]),
        ];
        for (directive, dir) in TEMP_PATHS {
            http.push(Entry::directive(directive, [provision::temp_path(dir)]));
        }
        http.push(Entry::directive("default_type", ["application/octet-stream"]));
        http.push(Entry::directive("gzip", ["on"]));
        http.push(Entry::block(
            "upstream",
            [AUTH_UPSTREAM],
            vec![Entry::directive(
                "server",
                [format!("unix:{}", self.upstream_socket)],
            )],
        ));
        http.extend(self.hosts.iter().map(VirtualHost::to_entry));

        vec![
            Entry::directive("pid", [self.pid_file.as_str()]),
            Entry::directive("error_log", [ERROR_LOG]),
            Entry::block(
                "events",
                Vec::<String>::new(),
                vec![Entry::directive(
                    "worker_connections",
                    [self.worker_connections.to_string()],
                )],
            ),
            Entry::block("http", Vec::<String>::new(), http),
        ]
    }

    /// Render the configuration text without writing it
    pub fn render(&self) -> String {
        conf::render(&self.to_entries())
    }

    /// Overwrite the configuration file with the current model
    pub fn write_config(&self) -> Result<()> {
        self.writer.write(&self.to_entries())
    }
}
