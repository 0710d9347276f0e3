//! Spawning and signalling the forwarding subprocess.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::{debug, info};

use super::{ForwardSpec, TunnelError};

/// How hard to ask a process to exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGTERM on Unix.
    Graceful,
    /// SIGKILL.
    Force,
}

/// Process-management seam of the supervisor.
pub trait Launcher: Send {
    type Process: Send;

    /// Start a forwarder for `spec`. Must return without waiting for readiness.
    fn spawn(&mut self, spec: &ForwardSpec) -> Result<Self::Process, TunnelError>;

    fn pid(&self, process: &Self::Process) -> Option<u32>;

    fn signal(&mut self, process: &mut Self::Process, signal: Signal) -> Result<(), TunnelError>;

    /// Non-blocking liveness check; an exited process is reaped.
    fn is_alive(&mut self, process: &mut Self::Process) -> bool;
}

/// Runs `kubectl port-forward`, appending its output to a log file.
#[derive(Debug, Clone)]
pub struct KubectlLauncher {
    program: String,
    log_path: PathBuf,
}

impl KubectlLauncher {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            program: "kubectl".to_string(),
            log_path: log_path.into(),
        }
    }

    /// Use a different binary (e.g. a wrapper script).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Full command line, for logs and the forward registry.
    pub fn command_line(&self, spec: &ForwardSpec) -> Vec<String> {
        let mut cmd = vec![self.program.clone()];
        cmd.extend(spec.args());
        cmd
    }

    fn open_log(&self) -> io::Result<File> {
        if let Some(parent) = self.log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&self.log_path)
    }

    /// Start a forwarder that outlives this process (used by `mqtop forward start`).
    ///
    /// Returns the child's pid; nothing waits on it.
    pub fn spawn_detached(&self, spec: &ForwardSpec) -> Result<u32, TunnelError> {
        let log = self.open_log().map_err(|e| TunnelError::Spawn(e.to_string()))?;
        let log_err = log.try_clone().map_err(|e| TunnelError::Spawn(e.to_string()))?;

        let mut command = std::process::Command::new(&self.program);
        command
            .args(spec.args())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // own process group, so Ctrl-C in this terminal does not reach it
            command.process_group(0);
        }

        let child = command
            .spawn()
            .map_err(|e| TunnelError::Spawn(format!("{}: {}", self.program, e)))?;
        info!(pid = child.id(), "started detached port-forward");
        Ok(child.id())
    }
}

impl Launcher for KubectlLauncher {
    type Process = Child;

    fn spawn(&mut self, spec: &ForwardSpec) -> Result<Child, TunnelError> {
        let log = self.open_log().map_err(|e| TunnelError::Spawn(e.to_string()))?;
        let log_err = log.try_clone().map_err(|e| TunnelError::Spawn(e.to_string()))?;

        let child = Command::new(&self.program)
            .args(spec.args())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TunnelError::Spawn(format!("{}: {}", self.program, e)))?;

        info!(
            pid = child.id(),
            command = %self.command_line(spec).join(" "),
            "spawned port-forward"
        );
        Ok(child)
    }

    fn pid(&self, process: &Child) -> Option<u32> {
        process.id()
    }

    fn signal(&mut self, process: &mut Child, signal: Signal) -> Result<(), TunnelError> {
        debug!(pid = process.id(), ?signal, "signalling port-forward");
        match signal {
            Signal::Graceful => match process.id() {
                Some(pid) => terminate_pid(pid).map_err(|e| TunnelError::Signal(e.to_string())),
                // already reaped
                None => Ok(()),
            },
            Signal::Force => process
                .start_kill()
                .map_err(|e| TunnelError::Signal(e.to_string())),
        }
    }

    fn is_alive(&mut self, process: &mut Child) -> bool {
        matches!(process.try_wait(), Ok(None))
    }
}

/// Ask a process to exit (SIGTERM).
#[cfg(unix)]
pub(crate) fn terminate_pid(pid: u32) -> io::Result<()> {
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
pub(crate) fn terminate_pid(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "graceful termination is only supported on Unix",
    ))
}

/// Whether a pid refers to a live process (signal 0 probe).
#[cfg(unix)]
pub(crate) fn pid_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
pub(crate) fn pid_alive(_pid: u32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ForwardSpec {
        ForwardSpec {
            context: None,
            namespace: "ns".to_string(),
            service: "svc/rabbitmq".to_string(),
            remote_amqp_port: 5672,
            local_amqp_port: 5673,
            local_ui_port: None,
            remote_ui_port: 15672,
        }
    }

    #[test]
    fn test_command_line() {
        let launcher = KubectlLauncher::new("/tmp/forward.log");
        assert_eq!(
            launcher.command_line(&spec()).join(" "),
            "kubectl port-forward svc/rabbitmq 5673:5672 -n ns"
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut launcher = KubectlLauncher::new(dir.path().join("forward.log"))
            .with_program("mqtop-test-no-such-binary");
        let err = launcher.spawn(&spec()).unwrap_err();
        assert!(matches!(err, TunnelError::Spawn(_)));
        // the log file is created before the spawn attempt
        assert!(launcher.log_path().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_signal_and_reap_real_process() {
        let dir = tempfile::tempdir().unwrap();
        // stand-in for kubectl that ignores its arguments
        let script = dir.path().join("fake-kubectl");
        std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let mut launcher = KubectlLauncher::new(dir.path().join("forward.log"))
            .with_program(script.to_string_lossy());
        let mut child = launcher.spawn(&spec()).unwrap();
        assert!(launcher.is_alive(&mut child));
        assert!(launcher.pid(&child).is_some());

        launcher.signal(&mut child, Signal::Graceful).unwrap();
        child.wait().await.unwrap();
        assert!(!launcher.is_alive(&mut child));
    }
}
