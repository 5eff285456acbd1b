use crate::config::NginxSettings;
use crate::error::{Error, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use tracing::{debug, info, info_span, warn, Span};

/// State of the managed nginx instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NginxState {
    /// The PID file names a live process
    Running,
    /// No PID file, or its PID is not alive
    Stopped,
}

/// Control action passed to nginx
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Reload,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Reload => "reload",
        }
    }

    /// Value of the `-s` flag, if the action is a signal to a running master
    fn signal(&self) -> Option<&'static str> {
        match self {
            Action::Start => None,
            Action::Stop => Some("stop"),
            Action::Reload => Some("reload"),
        }
    }
}

/// Runs the nginx binary to completion.
///
/// Implementations block until the child exits.
pub trait CommandRunner {
    fn run(&self, program: &Path, args: &[OsString]) -> std::io::Result<ExitStatus>;
}

/// Runs commands as real child processes, inheriting stdio
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &Path, args: &[OsString]) -> std::io::Result<ExitStatus> {
        Command::new(program).args(args).status()
    }
}

/// Answers whether a PID belongs to a live process
pub trait LivenessProbe {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Checks the OS process table.
///
/// A PID file left behind by a crashed nginx whose PID was since reused reads
/// as alive; this is not detected.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsProbe;

impl LivenessProbe for OsProbe {
    #[cfg(unix)]
    fn is_alive(&self, pid: u32) -> bool {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        // 0 and negatives address process groups, not a single process
        if pid <= 0 {
            return false;
        }

        let result = unsafe { libc::kill(pid, 0) };
        if result == 0 {
            return true;
        }
        // EPERM: the process exists but belongs to another user
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    fn is_alive(&self, pid: u32) -> bool {
        warn!(pid, "Process liveness checks are only supported on Unix");
        false
    }
}

/// Controls one nginx instance through its PID file and `-s` signals.
///
/// State is re-derived from the PID file and the process table at the start
/// of every operation and never trusted across calls.
pub struct NginxController<R = SystemRunner, P = OsProbe> {
    binary: PathBuf,
    prefix: PathBuf,
    config_file: String,
    pid_path: PathBuf,
    reload_when_running: bool,
    state: NginxState,
    pid: Option<u32>,
    runner: R,
    probe: P,
    span: Span,
}

impl NginxController {
    pub fn new(settings: &NginxSettings) -> Self {
        Self::with_parts(settings, SystemRunner, OsProbe)
    }
}

impl<R: CommandRunner, P: LivenessProbe> NginxController<R, P> {
    /// Create a controller with a custom command runner and liveness probe
    pub fn with_parts(settings: &NginxSettings, runner: R, probe: P) -> Self {
        let span = info_span!("nginx", prefix = %settings.prefix.display());
        Self {
            binary: settings.binary.clone(),
            prefix: settings.prefix.clone(),
            config_file: settings.config_file.clone(),
            pid_path: settings.pid_path(),
            reload_when_running: settings.reload_when_running,
            state: NginxState::Stopped,
            pid: None,
            runner,
            probe,
            span,
        }
    }

    /// Report through `span` instead of the default `nginx` span
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Span entered by every operation
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// State observed by the most recent refresh
    pub fn state(&self) -> NginxState {
        self.state
    }

    /// PID read by the most recent refresh
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn pid_path(&self) -> &Path {
        &self.pid_path
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Re-read the PID file and check whether that process is alive
    pub fn refresh_state(&mut self) -> Result<NginxState> {
        let _enter = self.span.clone().entered();
        self.refresh()
    }

    fn refresh(&mut self) -> Result<NginxState> {
        self.pid = self.read_pid()?;
        self.state = match self.pid {
            Some(pid) if self.probe.is_alive(pid) => NginxState::Running,
            _ => NginxState::Stopped,
        };
        debug!(pid = ?self.pid, state = ?self.state, "Refreshed nginx state");
        Ok(self.state)
    }

    fn read_pid(&self) -> Result<Option<u32>> {
        let content = match std::fs::read_to_string(&self.pid_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(Error::ReadPidFile {
                    path: self.pid_path.clone(),
                    source,
                })
            }
        };

        match content.trim().parse::<u32>() {
            Ok(pid) => Ok(Some(pid)),
            Err(_) => {
                warn!(
                    path = %self.pid_path.display(),
                    content = content.trim(),
                    "PID file does not contain a PID, treating nginx as stopped"
                );
                Ok(None)
            }
        }
    }

    /// Start nginx if stopped. When it is already running, reload instead if
    /// configured to, otherwise do nothing.
    ///
    /// Returns whether nginx was invoked.
    pub fn start(&mut self) -> Result<bool> {
        let _enter = self.span.clone().entered();

        if self.refresh()? == NginxState::Stopped {
            self.invoke(Action::Start)?;
            return Ok(true);
        }

        if self.reload_when_running {
            info!(pid = ?self.pid, "nginx already running, reloading");
            self.invoke(Action::Reload)?;
            return Ok(true);
        }

        warn!(pid = ?self.pid, "nginx seems to already be running, consider reload");
        Ok(false)
    }

    /// Stop nginx if running. Returns whether nginx was invoked.
    pub fn stop(&mut self) -> Result<bool> {
        let _enter = self.span.clone().entered();

        if self.refresh()? == NginxState::Running {
            self.invoke(Action::Stop)?;
            return Ok(true);
        }

        warn!("nginx is already stopped, no action taken");
        Ok(false)
    }

    /// Reload nginx if running. Returns whether nginx was invoked.
    pub fn reload(&mut self) -> Result<bool> {
        let _enter = self.span.clone().entered();

        if self.refresh()? == NginxState::Running {
            self.invoke(Action::Reload)?;
            return Ok(true);
        }

        warn!("nginx is not running, no action taken");
        Ok(false)
    }

    /// Arguments selecting this instance, plus `-s <signal>` for control actions
    pub fn command_args(&self, action: Action) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-p".into(),
            self.prefix.clone().into_os_string(),
            "-c".into(),
            self.config_file.clone().into(),
        ];
        if let Some(signal) = action.signal() {
            args.push("-s".into());
            args.push(signal.into());
        }
        args
    }

    fn invoke(&self, action: Action) -> Result<()> {
        let args = self.command_args(action);
        info!(
            action = action.as_str(),
            binary = %self.binary.display(),
            "Invoking nginx"
        );

        let status = self
            .runner
            .run(&self.binary, &args)
            .map_err(|source| Error::Spawn {
                binary: self.binary.clone(),
                action: action.as_str(),
                source,
            })?;

        if !status.success() {
            return Err(Error::CommandFailed {
                binary: self.binary.clone(),
                action: action.as_str(),
                status,
            });
        }

        debug!(action = action.as_str(), "nginx exited successfully");
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::cell::RefCell;
    use std::collections::HashSet;
    use std::os::unix::process::ExitStatusExt;
    use tempfile::TempDir;

    /// Records invocations and exits with a fixed wait status
    #[derive(Default)]
    struct RecordingRunner {
        calls: RefCell<Vec<Vec<String>>>,
        raw_status: i32,
    }

    impl RecordingRunner {
        fn failing() -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                // Exit code 1
                raw_status: 1 << 8,
            }
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.borrow().clone()
        }
    }

    impl CommandRunner for RecordingRunner {
        fn run(&self, program: &Path, args: &[OsString]) -> std::io::Result<ExitStatus> {
            let mut call = vec![program.to_string_lossy().into_owned()];
            call.extend(args.iter().map(|a| a.to_string_lossy().into_owned()));
            self.calls.borrow_mut().push(call);
            Ok(ExitStatus::from_raw(self.raw_status))
        }
    }

    struct BrokenRunner;

    impl CommandRunner for BrokenRunner {
        fn run(&self, _program: &Path, _args: &[OsString]) -> std::io::Result<ExitStatus> {
            Err(std::io::Error::from(std::io::ErrorKind::NotFound))
        }
    }

    /// Treats a fixed set of PIDs as alive
    struct FixedProbe(HashSet<u32>);

    impl FixedProbe {
        fn alive(pids: &[u32]) -> Self {
            Self(pids.iter().copied().collect())
        }
    }

    impl LivenessProbe for FixedProbe {
        fn is_alive(&self, pid: u32) -> bool {
            self.0.contains(&pid)
        }
    }

    fn settings(dir: &TempDir, reload_when_running: bool) -> NginxSettings {
        let mut settings = NginxSettings::with_prefix(dir.path());
        settings.binary = PathBuf::from("/usr/sbin/nginx");
        settings.reload_when_running = reload_when_running;
        settings
    }

    fn create_test_controller(
        dir: &TempDir,
        reload_when_running: bool,
        alive: &[u32],
    ) -> NginxController<RecordingRunner, FixedProbe> {
        NginxController::with_parts(
            &settings(dir, reload_when_running),
            RecordingRunner::default(),
            FixedProbe::alive(alive),
        )
    }

    fn write_pid(dir: &TempDir, content: &str) {
        std::fs::write(dir.path().join("nginx.pid"), content).unwrap();
    }

    fn expected_call(dir: &TempDir, signal: Option<&str>) -> Vec<String> {
        let mut call = vec![
            "/usr/sbin/nginx".to_string(),
            "-p".to_string(),
            dir.path().to_string_lossy().into_owned(),
            "-c".to_string(),
            "nginx.conf".to_string(),
        ];
        if let Some(signal) = signal {
            call.push("-s".to_string());
            call.push(signal.to_string());
        }
        call
    }

    #[test]
    fn test_initial_state_is_stopped() {
        let dir = TempDir::new().unwrap();
        let controller = create_test_controller(&dir, true, &[]);

        assert_eq!(controller.state(), NginxState::Stopped);
        assert_eq!(controller.pid(), None);
    }

    #[test]
    fn test_refresh_without_pid_file_is_stopped() {
        let dir = TempDir::new().unwrap();
        let mut controller = create_test_controller(&dir, true, &[]);

        assert_eq!(controller.refresh_state().unwrap(), NginxState::Stopped);
        assert_eq!(controller.pid(), None);
    }

    #[test]
    fn test_refresh_with_dead_pid_is_stopped() {
        let dir = TempDir::new().unwrap();
        write_pid(&dir, "4242\n");
        let mut controller = create_test_controller(&dir, true, &[1]);

        assert_eq!(controller.refresh_state().unwrap(), NginxState::Stopped);
        assert_eq!(controller.pid(), Some(4242));
    }

    #[test]
    fn test_refresh_with_live_pid_is_running() {
        let dir = TempDir::new().unwrap();
        write_pid(&dir, "4242\n");
        let mut controller = create_test_controller(&dir, true, &[4242]);

        assert_eq!(controller.refresh_state().unwrap(), NginxState::Running);
    }

    #[test]
    fn test_refresh_with_garbage_pid_is_stopped() {
        let dir = TempDir::new().unwrap();
        write_pid(&dir, "not-a-pid");
        let mut controller = create_test_controller(&dir, true, &[]);

        assert_eq!(controller.refresh_state().unwrap(), NginxState::Stopped);
        assert_eq!(controller.pid(), None);
    }

    #[test]
    fn test_refresh_is_never_cached() {
        let dir = TempDir::new().unwrap();
        let mut controller = create_test_controller(&dir, true, &[4242]);
        assert_eq!(controller.refresh_state().unwrap(), NginxState::Stopped);

        write_pid(&dir, "4242");
        assert_eq!(controller.refresh_state().unwrap(), NginxState::Running);

        std::fs::remove_file(dir.path().join("nginx.pid")).unwrap();
        assert_eq!(controller.refresh_state().unwrap(), NginxState::Stopped);
    }

    #[test]
    fn test_start_when_stopped_launches_nginx() {
        let dir = TempDir::new().unwrap();
        let mut controller = create_test_controller(&dir, true, &[]);

        assert!(controller.start().unwrap());
        assert_eq!(controller.runner().calls(), vec![expected_call(&dir, None)]);
    }

    #[test]
    fn test_start_when_running_reloads() {
        let dir = TempDir::new().unwrap();
        write_pid(&dir, "4242");
        let mut controller = create_test_controller(&dir, true, &[4242]);

        assert!(controller.start().unwrap());
        assert_eq!(
            controller.runner().calls(),
            vec![expected_call(&dir, Some("reload"))]
        );
    }

    #[test]
    fn test_start_when_running_without_reload_is_noop() {
        let dir = TempDir::new().unwrap();
        write_pid(&dir, "4242");
        let mut controller = create_test_controller(&dir, false, &[4242]);

        assert!(!controller.start().unwrap());
        assert!(controller.runner().calls().is_empty());
    }

    #[test]
    fn test_stop_when_running_signals_stop() {
        let dir = TempDir::new().unwrap();
        write_pid(&dir, "4242");
        let mut controller = create_test_controller(&dir, true, &[4242]);

        assert!(controller.stop().unwrap());
        assert_eq!(
            controller.runner().calls(),
            vec![expected_call(&dir, Some("stop"))]
        );
    }

    #[test]
    fn test_stop_when_stopped_is_noop() {
        let dir = TempDir::new().unwrap();
        write_pid(&dir, "4242");
        let mut controller = create_test_controller(&dir, true, &[]);

        assert!(!controller.stop().unwrap());
        assert!(controller.runner().calls().is_empty());
    }

    #[test]
    fn test_reload_when_running_signals_reload() {
        let dir = TempDir::new().unwrap();
        write_pid(&dir, "4242");
        let mut controller = create_test_controller(&dir, false, &[4242]);

        assert!(controller.reload().unwrap());
        assert_eq!(
            controller.runner().calls(),
            vec![expected_call(&dir, Some("reload"))]
        );
    }

    #[test]
    fn test_reload_when_stopped_is_noop() {
        let dir = TempDir::new().unwrap();
        let mut controller = create_test_controller(&dir, true, &[]);

        assert!(!controller.reload().unwrap());
        assert!(controller.runner().calls().is_empty());
    }

    #[test]
    fn test_failed_exit_status_is_process_control_error() {
        let dir = TempDir::new().unwrap();
        let mut controller = NginxController::with_parts(
            &settings(&dir, true),
            RecordingRunner::failing(),
            FixedProbe::alive(&[]),
        );

        let err = controller.start().unwrap_err();
        assert!(matches!(err, Error::CommandFailed { action: "start", .. }));
        assert_eq!(err.kind(), ErrorKind::ProcessControl);
        assert_eq!(controller.runner().calls().len(), 1);
    }

    #[test]
    fn test_spawn_failure_is_process_control_error() {
        let dir = TempDir::new().unwrap();
        let mut controller =
            NginxController::with_parts(&settings(&dir, true), BrokenRunner, FixedProbe::alive(&[]));

        let err = controller.start().unwrap_err();
        assert!(matches!(err, Error::Spawn { action: "start", .. }));
        assert_eq!(err.kind(), ErrorKind::ProcessControl);
    }

    #[test]
    fn test_command_args() {
        let dir = TempDir::new().unwrap();
        let controller = create_test_controller(&dir, true, &[]);

        let args = controller.command_args(Action::Stop);
        assert_eq!(args.len(), 6);
        assert_eq!(args[0], "-p");
        assert_eq!(args[2], "-c");
        assert_eq!(args[3], "nginx.conf");
        assert_eq!(args[4], "-s");
        assert_eq!(args[5], "stop");
        assert_eq!(controller.command_args(Action::Start).len(), 4);
    }

    #[test]
    fn test_with_span_replaces_default_span() {
        let dir = TempDir::new().unwrap();
        tracing::subscriber::with_default(tracing_subscriber::registry(), || {
            let controller = create_test_controller(&dir, true, &[])
                .with_span(tracing::info_span!("kagemori_edge", instance = "blue"));
            assert_eq!(
                controller.span().metadata().map(|m| m.name()),
                Some("kagemori_edge")
            );

            let default = create_test_controller(&dir, true, &[]);
            assert_eq!(default.span().metadata().map(|m| m.name()), Some("nginx"));
        });
    }

    #[test]
    fn test_os_probe_sees_own_process() {
        assert!(OsProbe.is_alive(std::process::id()));
        assert!(!OsProbe.is_alive(0));
        assert!(!OsProbe.is_alive(u32::MAX));
    }
}
