use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use thiserror::Error;

/// Exit code for failures of the wrapper itself (bad config, ssh not launchable).
/// ssh reserves 255 for its own errors, so this stays clear of it.
pub const LOCAL_FAILURE_EXIT: i32 = 254;

/// Signals that end the session when delivered to the wrapper.
pub const TERMINATION_SIGNALS: [i32; 4] = [SIGINT, SIGTERM, SIGHUP, SIGQUIT];

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("failed to launch {program}")]
    Launch {
        program: String,
        source: std::io::Error,
    },
}

/// How the child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Exited(i32),
    Signaled(i32),
}

impl ExitOutcome {
    /// Shell convention: the code itself, or 128 + signal number.
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitOutcome::Exited(code) => *code,
            ExitOutcome::Signaled(signo) => 128 + signo,
        }
    }
}

impl From<ExitStatus> for ExitOutcome {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => ExitOutcome::Exited(code),
            (None, Some(signo)) => ExitOutcome::Signaled(signo),
            (None, None) => ExitOutcome::Exited(LOCAL_FAILURE_EXIT),
        }
    }
}

/// Everything the orchestrator waits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    ChildExited(ExitOutcome),
    Signal(i32),
}

/// A running ssh client. Its exit is reported as `SessionEvent::ChildExited`.
#[derive(Debug)]
pub struct Supervisor {
    pid: Pid,
    reaped: Arc<AtomicBool>,
    waiter: Option<thread::JoinHandle<()>>,
}

impl Supervisor {
    /// Launch `program` with `args` on the inherited stdin/stdout/stderr.
    pub fn spawn(
        program: &Path,
        args: &[String],
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Self, SpawnError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| SpawnError::Launch {
                program: program.display().to_string(),
                source,
            })?;

        let pid = Pid::from_raw(child.id() as i32);
        tracing::info!(pid = child.id(), program = %program.display(), "spawned ssh");

        let reaped = Arc::new(AtomicBool::new(false));
        let waiter_reaped = Arc::clone(&reaped);
        let waiter = thread::spawn(move || {
            let outcome = match child.wait() {
                Ok(status) => ExitOutcome::from(status),
                Err(e) => {
                    tracing::error!("waiting for ssh failed: {}", e);
                    ExitOutcome::Exited(LOCAL_FAILURE_EXIT)
                }
            };
            waiter_reaped.store(true, Ordering::Release);
            tracing::info!(?outcome, "ssh exited");
            let _ = events.send(SessionEvent::ChildExited(outcome));
        });

        Ok(Self {
            pid,
            reaped,
            waiter: Some(waiter),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// Deliver `signo` to the child. Ignored once the child has been reaped,
    /// so a recycled pid is never hit.
    pub fn forward(&self, signo: i32) {
        if self.reaped.load(Ordering::Acquire) {
            return;
        }
        let signal = match Signal::try_from(signo) {
            Ok(signal) => signal,
            Err(e) => {
                tracing::warn!(signo, "cannot forward signal: {}", e);
                return;
            }
        };
        match kill(self.pid, signal) {
            Ok(()) => tracing::info!(%signal, pid = self.pid.as_raw(), "forwarded signal"),
            Err(e) => tracing::warn!(%signal, "failed to forward signal: {}", e),
        }
    }

    pub fn kill(&self) {
        self.forward(Signal::SIGKILL as i32);
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            if self.reaped.load(Ordering::Acquire) {
                let _ = waiter.join();
            }
        }
    }
}

/// Route termination signals aimed at the wrapper into the event channel.
///
/// While the returned handle is open the signals no longer terminate the
/// wrapper; the orchestrator decides what they mean.
pub fn listen_for_signals(events: mpsc::Sender<SessionEvent>) -> std::io::Result<Handle> {
    let mut signals = Signals::new(TERMINATION_SIGNALS)?;
    let handle = signals.handle();
    thread::spawn(move || {
        for signo in signals.forever() {
            tracing::info!(signo, "wrapper received signal");
            if events.send(SessionEvent::Signal(signo)).is_err() {
                break;
            }
        }
    });
    Ok(handle)
}
