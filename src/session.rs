//! One ssh invocation from colour to restore.
//!
//! ```text
//! Idle -> ColorSet -> Running -> Restoring -> Done
//!   \________________________________________ Failed (spawn error)
//! ```
//!
//! The child-exit waiter and the signal listener both feed one channel;
//! the orchestrator is the only code that touches the terminal, and the
//! controller guarantees the restore happens at most once.

use std::path::PathBuf;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use crate::color::Color;
use crate::supervisor::{self, ExitOutcome, SessionEvent, SpawnError, Supervisor};
use crate::terminal::TerminalController;

/// How long a signalled child gets to exit before it is killed.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    ColorSet,
    Running,
    Restoring,
    Done,
    Failed,
}

/// The ssh binary and the arguments handed to it verbatim.
#[derive(Debug, Clone)]
pub struct Launch {
    pub program: PathBuf,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    pub outcome: ExitOutcome,
    /// First termination signal the wrapper itself received, if any.
    pub interrupted_by: Option<i32>,
}

impl SessionReport {
    /// The wrapper's own exit code.
    ///
    /// Mirrors the child, except that an interrupted session whose child
    /// still exited normally reports the signal the wrapper received.
    pub fn exit_code(&self) -> i32 {
        match (self.outcome, self.interrupted_by) {
            (ExitOutcome::Exited(_), Some(signo)) => ExitOutcome::Signaled(signo).exit_code(),
            (outcome, _) => outcome.exit_code(),
        }
    }
}

#[derive(Debug)]
struct SessionState {
    phase: Phase,
    target: Option<Color>,
    outcome: Option<ExitOutcome>,
    interrupted_by: Option<i32>,
}

pub struct Session {
    controller: TerminalController,
    state: SessionState,
    grace: Duration,
    listen_signals: bool,
    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: mpsc::Receiver<SessionEvent>,
}

impl Session {
    /// `target` of `None` means the pane keeps its colour.
    pub fn new(controller: TerminalController, target: Option<Color>) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            controller,
            state: SessionState {
                phase: Phase::Idle,
                target,
                outcome: None,
                interrupted_by: None,
            },
            grace: DEFAULT_GRACE,
            listen_signals: true,
            events_tx,
            events_rx,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Leave process signals alone; events can still be injected through
    /// [`Session::events`].
    pub fn without_signal_listener(mut self) -> Self {
        self.listen_signals = false;
        self
    }

    /// Sender for injecting events (the signal listener uses a clone of it).
    pub fn events(&self) -> mpsc::Sender<SessionEvent> {
        self.events_tx.clone()
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    /// Run the session to completion. The pane is restored on every path
    /// that painted it, including a failed spawn.
    pub fn run(mut self, launch: &Launch) -> Result<SessionReport, SpawnError> {
        let signals = if self.listen_signals {
            match supervisor::listen_for_signals(self.events_tx.clone()) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::warn!(error = ?e, "cannot listen for signals");
                    None
                }
            }
        } else {
            None
        };

        self.apply_color();

        let result = self.supervise(launch);

        self.finish();
        if let Some(handle) = signals {
            handle.close();
        }
        result
    }

    /// Idle -> ColorSet. Best-effort: a failure here never blocks the session.
    fn apply_color(&mut self) {
        if let Some(color) = self.state.target {
            if let Err(e) = self.controller.capture_and_set(color) {
                tracing::warn!(error = ?e, "could not colour pane");
            }
        } else {
            tracing::debug!("no colour for this host");
        }
        self.state.phase = Phase::ColorSet;
    }

    /// ColorSet -> Running -> Restoring, or ColorSet -> Failed.
    fn supervise(&mut self, launch: &Launch) -> Result<SessionReport, SpawnError> {
        let child = match Supervisor::spawn(&launch.program, &launch.args, self.events_tx.clone())
        {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(error = ?e, "ssh could not be started");
                self.state.phase = Phase::Failed;
                return Err(e);
            }
        };
        self.state.phase = Phase::Running;

        let outcome = self.wait_for_exit(&child);
        self.state.outcome = Some(outcome);
        self.state.phase = Phase::Restoring;

        Ok(SessionReport {
            outcome,
            interrupted_by: self.state.interrupted_by,
        })
    }

    /// Block until the child is gone. Signals to the wrapper are forwarded;
    /// a child that outlives the grace period after a signal is killed.
    fn wait_for_exit(&mut self, child: &Supervisor) -> ExitOutcome {
        let mut deadline: Option<Instant> = None;
        loop {
            let event = match deadline {
                None => self.events_rx.recv().ok(),
                Some(at) => {
                    let timeout = at.saturating_duration_since(Instant::now());
                    match self.events_rx.recv_timeout(timeout) {
                        Ok(event) => Some(event),
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            tracing::warn!(pid = child.pid(), "ssh ignored the signal, killing it");
                            child.kill();
                            deadline = None;
                            continue;
                        }
                        Err(mpsc::RecvTimeoutError::Disconnected) => None,
                    }
                }
            };

            match event {
                Some(SessionEvent::ChildExited(outcome)) => return outcome,
                Some(SessionEvent::Signal(signo)) => {
                    self.state.interrupted_by.get_or_insert(signo);
                    child.forward(signo);
                    if deadline.is_none() {
                        deadline = Some(Instant::now() + self.grace);
                    }
                }
                // Unreachable while we hold a sender ourselves
                None => return ExitOutcome::Exited(supervisor::LOCAL_FAILURE_EXIT),
            }
        }
    }

    /// Restoring -> Done (or stays Failed).
    fn finish(&mut self) {
        if let Err(e) = self.controller.restore() {
            tracing::warn!(error = ?e, "could not restore pane");
        }
        if self.state.phase != Phase::Failed {
            self.state.phase = Phase::Done;
        }
        tracing::debug!(phase = ?self.state.phase, outcome = ?self.state.outcome, "session finished");
    }
}

impl Drop for Session {
    /// Panics unwinding through `run` still put the pane back.
    fn drop(&mut self) {
        if self.controller.is_tinted() {
            let _ = self.controller.restore();
        }
    }
}
