//! Daemon process control and output listening.
//!
//! Spawns the daemon with piped stdio, runs one reader task per stream and
//! one wait task for termination, and forwards normalized
//! [`ProcessEvent`]s into the supervisor's mediator channel. The listeners
//! never touch shared state; classification and transitions happen in the
//! supervisor's consumer loop.
//!
//! Termination is SIGTERM, a bounded wait, then SIGKILL.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use tether_core::{ExitInfo, Result, SupervisorConfig, SupervisorError};

/// Normalized output of the daemon process.
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    /// A line from the daemon's stdout (informational).
    Stdout(String),
    /// A line from the daemon's stderr (candidate for classification).
    Stderr(String),
    /// The process terminated.
    Exited(ExitInfo),
}

/// A spawned daemon process.
///
/// The wait task owns the `Child`; this handle keeps only the PID and
/// controls the process through signals, the same way regardless of which
/// task currently awaits it.
#[derive(Debug)]
pub struct DaemonProcess {
    pid: u32,
}

impl DaemonProcess {
    /// Spawns the daemon and wires its output into `events`.
    ///
    /// The command line is the configured binary and arguments, plus
    /// `--simulation` when simulation mode is on.
    ///
    /// # Errors
    /// Returns [`SupervisorError::Spawn`] if the executable cannot be
    /// launched.
    pub fn spawn(
        config: &SupervisorConfig,
        events: mpsc::Sender<ProcessEvent>,
    ) -> Result<Self> {
        let mut command = Command::new(&config.daemon_binary);
        command.args(&config.daemon_args);
        if config.simulation {
            command.arg("--simulation");
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| {
            SupervisorError::spawn(format!("{}: {e}", config.daemon_binary.display()))
        })?;

        let pid = child
            .id()
            .ok_or_else(|| SupervisorError::spawn("daemon exited before a PID was assigned"))?;

        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, events.clone(), ProcessEvent::Stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, events.clone(), ProcessEvent::Stderr);
        }

        // The wait task owns the child and reports termination; it also
        // reaps the process so the PID does not linger as a zombie.
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    let exit = ExitInfo::from(status);
                    tracing::info!(pid, %exit, "daemon process terminated");
                    let _ = events.send(ProcessEvent::Exited(exit)).await;
                }
                Err(e) => {
                    tracing::error!(pid, error = %e, "failed to await daemon process");
                    let _ = events
                        .send(ProcessEvent::Exited(ExitInfo {
                            code: None,
                            signal: None,
                        }))
                        .await;
                }
            }
        });

        tracing::info!(
            pid,
            binary = %config.daemon_binary.display(),
            simulation = config.simulation,
            "daemon process spawned"
        );

        Ok(Self { pid })
    }

    /// Process ID of the daemon.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Returns true while the process exists.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        #[cfg(unix)]
        {
            use nix::sys::signal;
            use nix::unistd::Pid;
            signal::kill(Pid::from_raw(self.pid as i32), None).is_ok()
        }
        #[cfg(not(unix))]
        {
            false
        }
    }

    /// Graceful termination: SIGTERM, bounded wait, then SIGKILL.
    ///
    /// A process that is already gone is not an error.
    pub async fn stop(&self, grace: Duration) -> Result<()> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(self.pid as i32);

            if signal::kill(pid, Signal::SIGTERM).is_err() {
                tracing::debug!(pid = self.pid, "daemon already gone at stop");
                return Ok(());
            }

            let start = std::time::Instant::now();
            while start.elapsed() < grace {
                if !self.is_alive() {
                    tracing::info!(pid = self.pid, "daemon exited within grace period");
                    return Ok(());
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }

            tracing::warn!(pid = self.pid, "grace period elapsed, killing daemon");
            let _ = signal::kill(pid, Signal::SIGKILL);
            Ok(())
        }
        #[cfg(not(unix))]
        {
            let _ = grace;
            Err(SupervisorError::state(
                "daemon termination is only supported on Unix",
            ))
        }
    }

    /// Immediate SIGKILL, best effort. Used when the daemon is already
    /// considered crashed and a graceful stop would just stall.
    pub fn kill(&self) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;
            let _ = signal::kill(Pid::from_raw(self.pid as i32), Signal::SIGKILL);
        }
    }
}

/// Spawns a reader task forwarding each line of `stream` as an event.
fn forward_lines<R>(
    stream: R,
    events: mpsc::Sender<ProcessEvent>,
    make: fn(String) -> ProcessEvent,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if events.send(make(line)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(error = %e, "daemon output stream closed");
                    break;
                }
            }
        }
    });
}

// =============================================================================
// Tests
// =============================================================================
