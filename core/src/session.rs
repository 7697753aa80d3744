//! Binding of one reader's presence stream to the command loop.
//!
//! A session moves through three states:
//!
//! ```text
//!  Idle --start--> WaitingForCard --Inserted--> Active --Removed/completed--> WaitingForCard
//!                                                  |
//!                                                  +--fault--> Idle --Removed--> WaitingForCard
//! ```
//!
//! After a fault the session keeps its subscription but issues nothing until a new
//! `Inserted` arrives. A failure of the reader itself ends the session with an error. Presence handling and the command loop share one control flow, so
//! two command sequences never run against the same card.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

#[cfg(feature = "tracing")]
use tracing::{debug, info, warn};

use crate::command::{
    is_stopped, CommandLoop, CommandPlan, FaultReport, LoopExit, MismatchReport, PollReport,
    ProvisionReport,
};
use crate::catalog::{self, ErrorRecord};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::reader::{CardPresenceEvent, ReaderHandle};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SessionState {
    /// Not subscribed, or halted after a fault.
    Idle,
    WaitingForCard,
    /// A card is bound and operations are being issued.
    Active,
}

/// Everything a session reports to its owner.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(tag = "event", content = "data", rename_all = "snake_case"))]
pub enum SessionEvent {
    StateChanged(SessionState),
    CardInserted,
    CardRemoved,
    Polled(PollReport),
    Provisioned(ProvisionReport),
    Faulted(FaultReport),
    Mismatch(MismatchReport),
    /// The reader went away; the session ends after this.
    ReaderFailed(ErrorRecord),
}

pub struct CardSession<R>
where
    R: ReaderHandle,
{
    reader: R,
    plan: CommandPlan,
    config: SessionConfig,
    state: SessionState,
    reports: mpsc::UnboundedSender<SessionEvent>,
    shutdown: watch::Receiver<bool>,
}

impl<R> CardSession<R>
where
    R: ReaderHandle,
{
    pub fn new(
        reader: R,
        plan: CommandPlan,
        config: SessionConfig,
        reports: mpsc::UnboundedSender<SessionEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            reader,
            plan,
            config,
            state: SessionState::Idle,
            reports,
            shutdown,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Subscribes to the reader and serves card presences until stopped.
    ///
    /// Returns when the stop signal fires (or its sender is dropped), or when the reader
    /// closes the presence stream. A failure reported by the reader ends the session with
    /// [`Error::ReaderFailed`]. The subscription is released on return.
    pub async fn run(mut self) -> Result<()> {
        let (sink, mut events) = mpsc::channel(self.config.event_buffer.max(1));
        self.reader.subscribe(sink)?;
        self.transition(SessionState::WaitingForCard);

        let mut result = Ok(());
        while !is_stopped(&self.shutdown) {
            let event = tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                event = events.recv() => event,
            };

            match event {
                Some(CardPresenceEvent::Inserted(card)) => {
                    info!("Card inserted into {}", self.reader.name());
                    self.emit(SessionEvent::CardInserted);

                    match self.serve(card, &mut events).await {
                        Ok(true) => break,
                        Ok(false) => {}
                        Err(e) => {
                            result = Err(e);
                            break;
                        }
                    }
                }
                Some(CardPresenceEvent::Failed(code)) => {
                    result = Err(self.fail(catalog::describe(code)));
                    break;
                }
                Some(CardPresenceEvent::Removed) => {
                    info!("Card removed from {}", self.reader.name());
                    self.emit(SessionEvent::CardRemoved);

                    if self.state == SessionState::Idle {
                        self.transition(SessionState::WaitingForCard);
                    }
                }
                None => {
                    debug!("Presence stream of {} closed", self.reader.name());
                    break;
                }
            }
        }

        drop(events);
        self.transition(SessionState::Idle);

        result
    }

    /// Runs the plan for one card presence. Returns `true` when the session must end.
    async fn serve(
        &mut self,
        card: R::Card,
        events: &mut mpsc::Receiver<CardPresenceEvent<R::Card>>,
    ) -> Result<bool> {
        self.transition(SessionState::Active);

        // The loop releases the card when it ends.
        let exit = CommandLoop::new(card, events, &mut self.shutdown, &self.config, &self.reports)
            .run(&self.plan)
            .await;

        match exit {
            LoopExit::Removed => {
                info!("Card removed from {}", self.reader.name());
                self.emit(SessionEvent::CardRemoved);
                self.transition(SessionState::WaitingForCard);
            }
            LoopExit::Completed(report) => {
                self.emit(SessionEvent::Provisioned(report));
                self.transition(SessionState::WaitingForCard);
            }
            LoopExit::Faulted(report) => {
                warn!("Halting {}: {}", self.reader.name(), report);
                self.emit(SessionEvent::Faulted(report));
                self.transition(SessionState::Idle);
            }
            LoopExit::Mismatch(report) => {
                self.emit(SessionEvent::Mismatch(report));
                self.transition(SessionState::Idle);
            }
            LoopExit::ReaderFailed(record) => return Err(self.fail(record)),
            LoopExit::Shutdown => return Ok(true),
        }

        Ok(false)
    }

    fn fail(&mut self, record: ErrorRecord) -> Error {
        warn!("Reader {} failed: {}", self.reader.name(), record);
        self.emit(SessionEvent::ReaderFailed(record));

        Error::ReaderFailed {
            reader: self.reader.name().to_owned(),
            record,
        }
    }

    fn transition(&mut self, state: SessionState) {
        if self.state != state {
            debug!("{}: {:?} -> {:?}", self.reader.name(), self.state, state);
            self.state = state;
            self.emit(SessionEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: SessionEvent) {
        self.reports.send(event).ok();
    }
}

/// Owner's side of a spawned session.
///
/// Dropping the handle tears the session down as well.
pub struct SessionHandle {
    reader: String,
    stop: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl SessionHandle {
    pub fn reader(&self) -> &str {
        &self.reader
    }

    /// Asks the session to stop. An attempt in flight finishes; no further one is scheduled.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub async fn join(self) -> Result<()> {
        self.task.await?
    }

    /// Stops the session and waits for it.
    pub async fn shutdown(self) -> Result<()> {
        self.stop();
        self.join().await
    }
}

/// Spawns a session for the reader on the current runtime.
pub fn spawn<R>(
    reader: R,
    plan: CommandPlan,
    config: SessionConfig,
) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>)
where
    R: ReaderHandle,
{
    let (reports, received) = mpsc::unbounded_channel();
    let (stop, shutdown) = watch::channel(false);
    let name = reader.name().to_owned();

    let session = CardSession::new(reader, plan, config, reports, shutdown);
    let task = tokio::spawn(session.run());

    (
        SessionHandle {
            reader: name,
            stop,
            task,
        },
        received,
    )
}
