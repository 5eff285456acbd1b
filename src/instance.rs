//! A managed nginx instance: its prefix directory, configuration and process

use tracing::info;

use crate::config::{Config, HostConfig, NginxSettings};
use crate::error::Result;
use crate::model::ConfigModel;
use crate::process::{CommandRunner, LivenessProbe, NginxController, NginxState, OsProbe, SystemRunner};
use crate::provision;

/// Owns the configuration model and the process controller for one prefix.
///
/// Creating an instance provisions the prefix directory tree and writes a
/// base configuration, so nginx can be started right away.
pub struct ProxyInstance<R = SystemRunner, P = OsProbe> {
    settings: NginxSettings,
    config: ConfigModel,
    controller: NginxController<R, P>,
}

impl ProxyInstance {
    pub fn new(settings: NginxSettings) -> Result<Self> {
        Self::with_parts(settings, SystemRunner, OsProbe)
    }
}

impl<R: CommandRunner, P: LivenessProbe> ProxyInstance<R, P> {
    pub fn with_parts(settings: NginxSettings, runner: R, probe: P) -> Result<Self> {
        provision::provision(&settings.prefix)?;
        let config = ConfigModel::new(&settings)?;
        let controller = NginxController::with_parts(&settings, runner, probe);

        Ok(Self {
            settings,
            config,
            controller,
        })
    }

    /// Create an instance from a settings file and add every declared host
    pub fn from_config(config: &Config, runner: R, probe: P) -> Result<Self> {
        let mut instance = Self::with_parts(config.nginx.clone(), runner, probe)?;
        instance.add_hosts(&config.hosts)?;
        Ok(instance)
    }

    /// Add hosts in order, stopping at the first failure
    pub fn add_hosts(&mut self, hosts: &[HostConfig]) -> Result<()> {
        for host in hosts {
            self.config.add_virtual_host(host.server_name.as_str(), host.options())?;
        }
        info!(count = hosts.len(), path = %self.config.path().display(), "Hosts configured");
        Ok(())
    }

    /// Report process control through `span`
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.controller = self.controller.with_span(span);
        self
    }

    pub fn settings(&self) -> &NginxSettings {
        &self.settings
    }

    pub fn config(&self) -> &ConfigModel {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ConfigModel {
        &mut self.config
    }

    pub fn controller(&self) -> &NginxController<R, P> {
        &self.controller
    }

    pub fn refresh_state(&mut self) -> Result<NginxState> {
        self.controller.refresh_state()
    }

    pub fn start(&mut self) -> Result<bool> {
        self.controller.start()
    }

    pub fn stop(&mut self) -> Result<bool> {
        self.controller.stop()
    }

    pub fn reload(&mut self) -> Result<bool> {
        self.controller.reload()
    }
}
