//! Sequencing of card operations for a single card presence.
//!
//! Two plans are supported:
//!
//! - [`CommandPlan::Monitor`] polls the card (status query, then NDEF read) until it leaves
//!   the reader or an operation gives up, pausing between iterations.
//! - [`CommandPlan::Provision`] writes a message once and reads it back to verify.
//!
//! Every operation is wrapped individually in the [`retry`] orchestrator. Removal and
//! shutdown are observed at natural checkpoints: before each operation, before each
//! re-attempt, and during the pause. An attempt in flight is never interrupted.
//!
//! Card calls block, so each attempt runs on the blocking pool and sessions of other readers
//! keep going meanwhile.

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};

#[cfg(feature = "tracing")]
use tracing::{debug, warn};

use crate::card::{Card, CardInfo, OperationResult};
use crate::catalog::{self, ErrorRecord, ResultCode};
use crate::config::SessionConfig;
use crate::reader::CardPresenceEvent;
use crate::retry::{Attempts, Next, RetryOutcome, RetryPolicy};
use crate::session::SessionEvent;

/// What to do with each card presence.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CommandPlan {
    /// Poll status and NDEF continuously.
    Monitor,

    /// Write the payload as the NDEF message, then read it back.
    Provision { payload: Vec<u8> },
}

/// A single card operation, as named in reports.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Operation {
    Query,
    Read,
    Write,
    /// The read-back after a write.
    Verify,
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Query => "query",
            Self::Read => "read",
            Self::Write => "write",
            Self::Verify => "verify",
        })
    }
}

/// Result of one full poll iteration.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PollReport {
    pub iteration: u64,
    pub info: CardInfo,
    pub message: Vec<u8>,
}

/// A write/verify sequence that went through.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ProvisionReport {
    pub bytes: usize,
    pub write_attempts: u32,
    pub verify_attempts: u32,
}

/// An operation that gave up.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FaultReport {
    pub operation: Operation,
    pub record: ErrorRecord,
    pub attempts: u32,
}

impl Display for FaultReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} failed after {} attempt(s): {}",
            self.operation, self.attempts, self.record
        )
    }
}

/// The read-back after a successful write did not contain the written message.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MismatchReport {
    pub written: Vec<u8>,
    pub read_back: Vec<u8>,
}

/// Why the loop stopped issuing operations.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LoopExit {
    /// The card left the reader.
    Removed,
    /// A provisioning sequence finished without error.
    Completed(ProvisionReport),
    Faulted(FaultReport),
    Mismatch(MismatchReport),
    /// The reader reported a failure of its own.
    ReaderFailed(ErrorRecord),
    /// The session is being torn down, or the presence stream closed.
    Shutdown,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Interrupt {
    Removed,
    ReaderFailed(ResultCode),
    Shutdown,
}

impl From<Interrupt> for LoopExit {
    fn from(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Removed => Self::Removed,
            Interrupt::ReaderFailed(code) => Self::ReaderFailed(catalog::describe(code)),
            Interrupt::Shutdown => Self::Shutdown,
        }
    }
}

/// Presence events and the stop flag, observed by the loop at its checkpoints.
struct Signals<'a, C> {
    events: &'a mut mpsc::Receiver<CardPresenceEvent<C>>,
    shutdown: &'a mut watch::Receiver<bool>,
    pending: Option<Interrupt>,
}

impl<C> Signals<'_, C> {
    /// Checks for an interrupt without waiting. Once seen, an interrupt sticks.
    fn check(&mut self) -> Option<Interrupt> {
        if self.pending.is_none() {
            self.pending = self.poll();
        }

        self.pending
    }

    fn poll(&mut self) -> Option<Interrupt> {
        if is_stopped(&*self.shutdown) {
            return Some(Interrupt::Shutdown);
        }

        loop {
            match self.events.try_recv() {
                Ok(CardPresenceEvent::Removed) => return Some(Interrupt::Removed),
                Ok(CardPresenceEvent::Failed(code)) => return Some(Interrupt::ReaderFailed(code)),
                Ok(CardPresenceEvent::Inserted(_)) => {
                    debug!("Ignoring an insertion while a card is active");
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => return Some(Interrupt::Shutdown),
            }
        }
    }

    /// Waits for the duration unless an interrupt arrives first.
    async fn pause(&mut self, duration: Duration) -> Option<Interrupt> {
        if let Some(interrupt) = self.check() {
            return Some(interrupt);
        }

        let deadline = Instant::now() + duration;
        loop {
            let interrupt = tokio::select! {
                _ = sleep_until(deadline) => return None,
                _ = self.shutdown.changed() => Interrupt::Shutdown,
                event = self.events.recv() => match event {
                    Some(CardPresenceEvent::Removed) => Interrupt::Removed,
                    Some(CardPresenceEvent::Failed(code)) => Interrupt::ReaderFailed(code),
                    Some(CardPresenceEvent::Inserted(_)) => {
                        debug!("Ignoring an insertion while a card is active");
                        continue;
                    }
                    None => Interrupt::Shutdown,
                },
            };

            self.pending = Some(interrupt);
            return self.pending;
        }
    }
}

pub(crate) fn is_stopped(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

/// Runs a [`CommandPlan`] against one card until the plan ends or the card goes away.
pub struct CommandLoop<'a, C> {
    card: Option<C>,
    signals: Signals<'a, C>,
    config: &'a SessionConfig,
    reports: &'a mpsc::UnboundedSender<SessionEvent>,
}

impl<'a, C> CommandLoop<'a, C>
where
    C: Card + Send + 'static,
{
    /// Binds the loop to a card and to the presence stream of the reader holding it.
    ///
    /// Insertions arriving on `events` while the loop runs are dropped. The card is released
    /// when the loop ends.
    pub fn new(
        card: C,
        events: &'a mut mpsc::Receiver<CardPresenceEvent<C>>,
        shutdown: &'a mut watch::Receiver<bool>,
        config: &'a SessionConfig,
        reports: &'a mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            card: Some(card),
            signals: Signals {
                events,
                shutdown,
                pending: None,
            },
            config,
            reports,
        }
    }

    pub async fn run(mut self, plan: &CommandPlan) -> LoopExit {
        match plan {
            CommandPlan::Monitor => self.monitor().await,
            CommandPlan::Provision { payload } => self.provision(payload).await,
        }
    }

    async fn monitor(&mut self) -> LoopExit {
        let policy = self.config.poll_policy();
        let mut iteration = 0;

        loop {
            iteration += 1;

            let (info, _) = match self.step(Operation::Query, policy, |card: &mut C| card.query()).await {
                Ok(v) => v,
                Err(exit) => return exit,
            };
            let (message, _) = match self.step(Operation::Read, policy, |card: &mut C| card.read()).await {
                Ok(v) => v,
                Err(exit) => return exit,
            };

            self.report(SessionEvent::Polled(PollReport {
                iteration,
                info,
                message,
            }));

            if let Some(interrupt) = self.signals.pause(self.config.poll_interval).await {
                return interrupt.into();
            }
        }
    }

    async fn provision(&mut self, payload: &[u8]) -> LoopExit {
        let policy = self.config.provision_policy();
        let message: Arc<[u8]> = Arc::from(payload);

        let write = move |card: &mut C| card.write(&message);
        let ((), write_attempts) = match self.step(Operation::Write, policy, write).await {
            Ok(v) => v,
            Err(exit) => return exit,
        };
        let (read_back, verify_attempts) = match self.step(Operation::Verify, policy, |card: &mut C| card.read()).await {
            Ok(v) => v,
            Err(exit) => return exit,
        };

        if !read_back.starts_with(payload) {
            warn!("Read-back does not match the written message");
            return LoopExit::Mismatch(MismatchReport {
                written: payload.to_vec(),
                read_back,
            });
        }

        LoopExit::Completed(ProvisionReport {
            bytes: payload.len(),
            write_attempts,
            verify_attempts,
        })
    }

    /// Runs one operation under the orchestrator, returning its value and attempt count.
    async fn step<T, F>(&mut self, operation: Operation, policy: RetryPolicy, f: F) -> Result<(T, u32), LoopExit>
    where
        T: Send + 'static,
        F: FnOnce(&mut C) -> OperationResult<T> + Clone + Send + 'static,
    {
        if let Some(interrupt) = self.signals.check() {
            return Err(interrupt.into());
        }

        let mut run = Attempts::new(policy);
        let outcome = loop {
            let result = self.attempt(f.clone()).await?;

            match run.settle(result) {
                Next::Done(outcome) => break outcome,
                Next::Retry(record) if self.signals.check().is_some() => break run.abandon(record),
                Next::Retry(_) => {}
            }
        };

        match outcome {
            RetryOutcome::Success { value, attempts } => Ok((value, attempts)),
            RetryOutcome::Exhausted { record, attempts } => {
                warn!("Operation {} gave up: {}", operation, record);
                Err(LoopExit::Faulted(FaultReport {
                    operation,
                    record,
                    attempts,
                }))
            }
            RetryOutcome::Abandoned { .. } => Err(self
                .signals
                .check()
                .map_or(LoopExit::Shutdown, LoopExit::from)),
        }
    }

    /// Invokes the card once on the blocking pool.
    async fn attempt<T, F>(&mut self, f: F) -> Result<OperationResult<T>, LoopExit>
    where
        T: Send + 'static,
        F: FnOnce(&mut C) -> OperationResult<T> + Send + 'static,
    {
        let mut card = self.card.take().ok_or(LoopExit::Shutdown)?;

        let joined = tokio::task::spawn_blocking(move || {
            let result = f(&mut card);
            (card, result)
        })
        .await;

        match joined {
            Ok((card, result)) => {
                self.card = Some(card);
                Ok(result)
            }
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            // The runtime is shutting down.
            Err(_) => Err(LoopExit::Shutdown),
        }
    }

    fn report(&self, event: SessionEvent) {
        // Nobody listening is not a reason to stop polling.
        self.reports.send(event).ok();
    }
}
