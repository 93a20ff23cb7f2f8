//! Command Sequencer
//!
//! Drains a session's queue of literal commands under one of two policies:
//!
//! - **Step**: the head is offered as the next command (`NextCommand` event
//!   and [`Sequencer::peek_next`]) and only leaves the queue when the caller
//!   confirms it with [`Sequencer::advance`].
//! - **Auto**: a drain task sends the head, pops it, waits `delay` on a
//!   tokio timer and repeats until the queue is empty.
//!
//! The policy is Auto when the mode is `Queued` with auto-advance on, and
//! Step otherwise. A new batch always replaces whatever is pending.
//!
//! Every queue replacement bumps a generation counter. A drain task only
//! touches the queue while its generation is current, so a superseded drain
//! can finish an in-flight write but never pops or sends anything after.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use super::{Session, SessionSettings};
use crate::error::{Error, ErrorKind, Result};
use crate::events::EngineEvent;
use crate::models::{BatchToken, CommandBatch};

/// How queued commands are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Operator types commands; any pending queue is discarded
    Manual,
    /// Commands come from the queue
    #[default]
    Queued,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Manual => f.write_str("manual"),
            ExecutionMode::Queued => f.write_str("queued"),
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(ExecutionMode::Manual),
            "queued" => Ok(ExecutionMode::Queued),
            other => Err(Error::ConfigValidationFailed {
                field: "mode".to_string(),
                reason: format!("'{}' is not 'manual' or 'queued'", other),
            }),
        }
    }
}

/// Effective drain behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainPolicy {
    Step,
    Auto,
}

/// Per-session queue and pacing state
pub(crate) struct ExecutionState {
    pub(crate) mode: ExecutionMode,
    pub(crate) auto_advance: bool,
    pub(crate) delay: Duration,
    pub(crate) queue: VecDeque<String>,
    active: Option<BatchToken>,
    generation: u64,
    drain: Option<Arc<Notify>>,
}

impl ExecutionState {
    pub(crate) fn new(settings: &SessionSettings) -> Self {
        Self {
            mode: settings.default_mode,
            auto_advance: settings.auto_advance,
            delay: settings.default_delay,
            queue: VecDeque::new(),
            active: None,
            generation: 0,
            drain: None,
        }
    }

    fn policy(&self) -> DrainPolicy {
        if self.mode == ExecutionMode::Queued && self.auto_advance {
            DrainPolicy::Auto
        } else {
            DrainPolicy::Step
        }
    }

    fn stop_drain(&mut self) {
        if let Some(stop) = self.drain.take() {
            stop.notify_one();
        }
    }

    /// Drop the queue and invalidate any drain; returns how many were pending
    fn reset(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        self.active = None;
        self.generation += 1;
        self.stop_drain();
        dropped
    }
}

/// Queue operations on one session
pub struct Sequencer<'a> {
    session: &'a Arc<Session>,
}

impl<'a> Sequencer<'a> {
    pub(super) fn new(session: &'a Arc<Session>) -> Self {
        Self { session }
    }

    fn device(&self) -> String {
        self.session.id().to_string()
    }

    /// Replace the pending queue with a batch
    ///
    /// An empty batch changes nothing and fires no events.
    pub fn enqueue(&self, batch: CommandBatch) -> Result<BatchToken> {
        let (token, commands) = batch.into_parts();
        let mut exec = self.session.lock_execution();
        self.session.ensure_open()?;

        if commands.is_empty() {
            debug!("Ignoring empty batch {} for {}", token, self.session.id());
            return Ok(token);
        }

        let replaced = exec.reset();
        if replaced > 0 {
            debug!(
                "Batch {} replaces {} pending commands on {}",
                token,
                replaced,
                self.session.id()
            );
        }
        exec.queue = commands.into();
        exec.active = Some(token);
        info!(
            "Queued {} commands on {} ({:?})",
            exec.queue.len(),
            self.session.id(),
            exec.policy()
        );

        match exec.policy() {
            DrainPolicy::Auto => self.start_drain(&mut exec),
            DrainPolicy::Step => self.offer_head(&exec),
        }
        Ok(token)
    }

    /// Confirm a command that was just sent by hand
    ///
    /// Pops the head only when `matched` equals it. Returns whether the
    /// queue moved. Auto drains ignore confirmations.
    pub fn advance(&self, matched: &str) -> bool {
        let mut exec = self.session.lock_execution();
        if exec.policy() == DrainPolicy::Auto {
            return false;
        }
        match exec.queue.front() {
            Some(head) if head.trim() == matched.trim() => {}
            _ => return false,
        }

        exec.queue.pop_front();
        if exec.queue.is_empty() {
            self.complete(&mut exec);
        } else {
            self.offer_head(&exec);
        }
        true
    }

    /// Clear the queue and stop any timer; returns how many were dropped
    pub fn cancel(&self) -> usize {
        let dropped = self.session.lock_execution().reset();
        if dropped > 0 {
            info!(
                "Cancelled {} pending commands on {}",
                dropped,
                self.session.id()
            );
        }
        dropped
    }

    pub fn peek_next(&self) -> Option<String> {
        self.session.lock_execution().queue.front().cloned()
    }

    /// Pending commands, head first
    pub fn pending(&self) -> Vec<String> {
        self.session.lock_execution().queue.iter().cloned().collect()
    }

    pub fn mode(&self) -> ExecutionMode {
        self.session.lock_execution().mode
    }

    pub fn auto_advance(&self) -> bool {
        self.session.lock_execution().auto_advance
    }

    pub fn delay(&self) -> Duration {
        self.session.lock_execution().delay
    }

    pub fn policy(&self) -> DrainPolicy {
        self.session.lock_execution().policy()
    }

    /// Switching to `Manual` discards the pending queue
    pub fn set_mode(&self, mode: ExecutionMode) {
        let mut exec = self.session.lock_execution();
        exec.mode = mode;
        if mode == ExecutionMode::Manual {
            let dropped = exec.reset();
            if dropped > 0 {
                info!(
                    "Manual mode on {}: discarded {} pending commands",
                    self.session.id(),
                    dropped
                );
            }
        }
    }

    /// Turning auto-advance on drains a pending queue; turning it off
    /// mid-drain keeps the rest of the queue for stepping
    pub fn set_auto_advance(&self, enabled: bool) {
        let mut exec = self.session.lock_execution();
        if exec.auto_advance == enabled {
            return;
        }
        exec.auto_advance = enabled;

        if enabled {
            if exec.policy() == DrainPolicy::Auto && !exec.queue.is_empty() {
                self.start_drain(&mut exec);
            }
        } else if let Some(stop) = exec.drain.as_ref() {
            // The drain task hands over to stepping once it wakes
            stop.notify_one();
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        self.session.lock_execution().delay = delay;
    }

    fn start_drain(&self, exec: &mut ExecutionState) {
        exec.stop_drain();
        exec.generation += 1;

        let stop = Arc::new(Notify::new());
        exec.drain = Some(Arc::clone(&stop));
        tokio::spawn(drain(Arc::clone(self.session), exec.generation, stop));
    }

    fn offer_head(&self, exec: &ExecutionState) {
        if let Some(head) = exec.queue.front() {
            self.session.bus().publish(EngineEvent::NextCommand {
                device: self.device(),
                command: head.clone(),
            });
        }
    }

    fn complete(&self, exec: &mut ExecutionState) {
        exec.drain = None;
        if let Some(token) = exec.active.take() {
            info!("Batch {} completed on {}", token, self.session.id());
            self.session.bus().publish(EngineEvent::BatchCompleted {
                device: self.device(),
                token,
            });
        }
    }
}

/// Discard the queue of a session that is going away
pub(super) fn abandon(session: &Session) {
    let mut exec = session.lock_execution();
    let dropped = exec.reset();
    if dropped > 0 {
        warn!(
            "Session {} closed with {} commands pending",
            session.id(),
            dropped
        );
        session.bus().publish(EngineEvent::Error {
            device: Some(session.id().to_string()),
            kind: ErrorKind::SessionClosedMidBatch,
            detail: format!(
                "session closed with {} queued command(s) not sent",
                dropped
            ),
        });
    }
}

/// Auto-advance loop for one generation of the queue
async fn drain(session: Arc<Session>, generation: u64, stop: Arc<Notify>) {
    let sequencer = Sequencer::new(&session);
    loop {
        let head = {
            let exec = session.lock_execution();
            if exec.generation != generation {
                return;
            }
            match exec.queue.front() {
                Some(head) => head.clone(),
                None => return,
            }
        };

        match session.send(&head).await {
            Ok(()) => {}
            Err(Error::SessionClosed { .. }) => return,
            Err(e) => {
                let mut exec = session.lock_execution();
                if exec.generation != generation {
                    return;
                }
                let dropped = exec.reset();
                warn!(
                    "Auto drain on {} stopped at '{}': {} ({} commands dropped)",
                    session.id(),
                    head,
                    e,
                    dropped
                );
                session
                    .bus()
                    .publish(EngineEvent::from_error(Some(session.id()), &e));
                return;
            }
        }

        let delay = {
            let mut exec = session.lock_execution();
            if exec.generation != generation {
                return;
            }
            exec.queue.pop_front();
            if exec.queue.is_empty() {
                sequencer.complete(&mut exec);
                return;
            }
            if exec.policy() != DrainPolicy::Auto {
                exec.drain = None;
                sequencer.offer_head(&exec);
                return;
            }
            exec.delay
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop.notified() => {
                let mut exec = session.lock_execution();
                if exec.generation == generation && exec.policy() == DrainPolicy::Step {
                    exec.drain = None;
                    sequencer.offer_head(&exec);
                }
                return;
            }
        }
    }
}
