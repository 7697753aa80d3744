//! Scripted stand-ins for the driver, shared by the unit tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;

use crate::card::{Card, CardInfo, OperationResult};
use crate::error::{Error, Result};
use crate::reader::{CardPresenceEvent, PresenceSink, ReaderHandle, ReaderRegistry};

pub(crate) const UID: [u8; 7] = [0x04, 0x31, 0x5A, 0x82, 0x2C, 0x4B, 0x80];

struct Lane<T> {
    queue: VecDeque<OperationResult<T>>,
    fallback: Option<OperationResult<T>>,
    calls: u32,
}

impl<T> Default for Lane<T> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            fallback: None,
            calls: 0,
        }
    }
}

impl<T: Clone> Lane<T> {
    /// Next scripted result, or `None` when the default behaviour applies.
    fn next(&mut self) -> Option<OperationResult<T>> {
        self.calls += 1;
        self.queue.pop_front().or_else(|| self.fallback.clone())
    }
}

#[derive(Default)]
struct Script {
    query: Lane<CardInfo>,
    read: Lane<Vec<u8>>,
    write: Lane<()>,
    stored: Vec<u8>,
    written: Vec<Vec<u8>>,
    removal: Option<(u32, PresenceSink<ScriptedCard>)>,
    gate: Option<Arc<Gate>>,
}

/// Blocks the thread of every query until opened, like a card that stopped answering.
///
/// A blocked query gives up on its own after two seconds and marks the gate as expired.
#[derive(Default)]
pub(crate) struct Gate {
    state: Mutex<GateState>,
    opened: Condvar,
    entered: Notify,
}

#[derive(Default)]
struct GateState {
    open: bool,
    expired: bool,
}

impl Gate {
    const PATIENCE: Duration = Duration::from_secs(2);

    fn pass(&self) {
        self.entered.notify_one();

        let state = self.state.lock().unwrap();
        let (mut state, timeout) = self
            .opened
            .wait_timeout_while(state, Self::PATIENCE, |state| !state.open)
            .unwrap();
        if timeout.timed_out() {
            state.expired = true;
        }
    }

    /// Resolves once a query is blocked on the gate.
    pub(crate) async fn entered(&self) {
        self.entered.notified().await;
    }

    pub(crate) fn open(&self) {
        self.state.lock().unwrap().open = true;
        self.opened.notify_all();
    }

    pub(crate) fn expired(&self) -> bool {
        self.state.lock().unwrap().expired
    }
}

/// A card answering from per-operation scripts.
///
/// Unscripted calls succeed: queries return [`UID`], writes store the message and reads
/// return what is stored. Clones share the script and the counters.
#[derive(Clone, Default)]
pub(crate) struct ScriptedCard {
    script: Arc<Mutex<Script>>,
}

impl std::fmt::Debug for ScriptedCard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ScriptedCard")
    }
}

impl ScriptedCard {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    pub(crate) fn with_stored(self, message: Vec<u8>) -> Self {
        self.lock().stored = message;
        self
    }

    pub(crate) fn query_always(self, result: OperationResult<CardInfo>) -> Self {
        self.lock().query.fallback = Some(result);
        self
    }

    pub(crate) fn read_always(self, result: OperationResult<Vec<u8>>) -> Self {
        self.lock().read.fallback = Some(result);
        self
    }

    pub(crate) fn write_always(self, result: OperationResult<()>) -> Self {
        self.lock().write.fallback = Some(result);
        self
    }

    pub(crate) fn with_writes(self, results: Vec<OperationResult<()>>) -> Self {
        self.lock().write.queue.extend(results);
        self
    }

    pub(crate) fn with_reads(self, results: Vec<OperationResult<Vec<u8>>>) -> Self {
        self.lock().read.queue.extend(results);
        self
    }

    /// Emits `Removed` on the sink during the n-th query.
    pub(crate) fn remove_after_queries(self, n: u32, sink: PresenceSink<ScriptedCard>) -> Self {
        self.lock().removal = Some((n, sink));
        self
    }

    pub(crate) fn gated(self, gate: Arc<Gate>) -> Self {
        self.lock().gate = Some(gate);
        self
    }

    pub(crate) fn query_calls(&self) -> u32 {
        self.lock().query.calls
    }

    pub(crate) fn read_calls(&self) -> u32 {
        self.lock().read.calls
    }

    pub(crate) fn write_calls(&self) -> u32 {
        self.lock().write.calls
    }

    pub(crate) fn written(&self) -> Vec<Vec<u8>> {
        self.lock().written.clone()
    }
}

impl Card for ScriptedCard {
    fn query(&mut self) -> OperationResult<CardInfo> {
        let gate = self.lock().gate.clone();
        if let Some(gate) = gate {
            gate.pass();
        }

        let mut script = self.lock();
        let result = script.query.next();

        if let Some((n, sink)) = &script.removal {
            if *n == script.query.calls {
                sink.try_send(CardPresenceEvent::Removed).unwrap();
            }
        }

        result.unwrap_or_else(|| Ok(CardInfo { uid: UID.to_vec() }))
    }

    fn read(&mut self) -> OperationResult<Vec<u8>> {
        let mut script = self.lock();

        match script.read.next() {
            Some(result) => result,
            None => Ok(script.stored.clone()),
        }
    }

    fn write(&mut self, message: &[u8]) -> OperationResult<()> {
        let mut script = self.lock();

        match script.write.next() {
            Some(result) => result,
            None => {
                script.stored = message.to_vec();
                script.written.push(message.to_vec());
                Ok(())
            }
        }
    }
}

/// A reader whose presence events are pushed by the test.
#[derive(Clone, Debug)]
pub(crate) struct ScriptedReader {
    name: String,
    sink: Arc<Mutex<Option<PresenceSink<ScriptedCard>>>>,
}

impl ScriptedReader {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            sink: Arc::new(Mutex::new(None)),
        }
    }

    /// Delivers an event. Returns `false` once nobody is subscribed.
    pub(crate) fn push(&self, event: CardPresenceEvent<ScriptedCard>) -> bool {
        match self.sink.lock().unwrap().as_ref() {
            Some(sink) => sink.try_send(event).is_ok(),
            None => false,
        }
    }

    pub(crate) fn is_subscribed(&self) -> bool {
        self.sink
            .lock()
            .unwrap()
            .as_ref()
            .map_or(false, |sink| !sink.is_closed())
    }
}

impl ReaderHandle for ScriptedReader {
    type Card = ScriptedCard;

    fn name(&self) -> &str {
        &self.name
    }

    fn subscribe(&self, sink: PresenceSink<ScriptedCard>) -> Result<()> {
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }
}

/// A reader that refuses subscriptions.
pub(crate) struct BrokenReader;

impl ReaderHandle for BrokenReader {
    type Card = ScriptedCard;

    fn name(&self) -> &str {
        "broken"
    }

    fn subscribe(&self, _: PresenceSink<ScriptedCard>) -> Result<()> {
        Err(Error::Subscribe {
            reader: self.name().to_owned(),
            reason: "unplugged".to_owned(),
        })
    }
}

pub(crate) struct StaticRegistry {
    names: Vec<String>,
}

impl StaticRegistry {
    pub(crate) fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl ReaderRegistry for StaticRegistry {
    type Reader = ScriptedReader;

    fn enumerate(&self) -> Result<BTreeMap<String, ScriptedReader>> {
        Ok(self
            .names
            .iter()
            .map(|name| (name.clone(), ScriptedReader::new(name)))
            .collect())
    }
}
