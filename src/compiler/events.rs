//! Change tracking for the optimization pipeline.
//!
//! Every rewrite a pass performs is recorded as an [`Event`] in an
//! [`EventLog`]. The log is append-only and can be written through a shared
//! reference, so passes record into `ctx.events` without needing mutable
//! access to their context. The event is added when the builder returned by
//! [`EventLog::record`] is dropped:
//!
//! ```rust,ignore
//! ctx.events
//!     .record(EventKind::InstructionSunk)
//!     .at(target, inst)
//!     .message(format!("from {source}"));
//! ```

use std::fmt;

use rustc_hash::FxHashMap;
use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};

use crate::ir::{BlockId, InstId};

/// Kind of rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr, EnumIter, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum EventKind {
    /// The scheduler changed the order of a block.
    BlockScheduled,
    /// Two loads were fused into a pair.
    LoadPairCreated,
    /// Two stores were fused into a pair.
    StorePairCreated,
    /// An instruction moved to another block.
    InstructionSunk,
    /// A critical edge received a new block.
    EdgeSplit,
}

/// One recorded rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// Block the rewrite happened in.
    pub block: Option<BlockId>,
    /// Instruction created or moved.
    pub inst: Option<InstId>,
    /// Free-form detail.
    pub message: Option<String>,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(block) = self.block {
            write!(f, " {block}")?;
        }
        if let Some(inst) = self.inst {
            write!(f, " {inst}")?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

/// Builder for one event, created by [`EventLog::record`].
///
/// The event is added to the log when the builder is dropped.
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    kind: EventKind,
    block: Option<BlockId>,
    inst: Option<InstId>,
    message: Option<String>,
}

impl<'a> EventBuilder<'a> {
    fn new(log: &'a EventLog, kind: EventKind) -> Self {
        Self {
            log,
            kind,
            block: None,
            inst: None,
            message: None,
        }
    }

    /// Sets the block of the event.
    pub fn block(mut self, block: BlockId) -> Self {
        self.block = Some(block);
        self
    }

    /// Sets the block and instruction of the event.
    pub fn at(mut self, block: BlockId, inst: InstId) -> Self {
        self.block = Some(block);
        self.inst = Some(inst);
        self
    }

    /// Sets the message of the event.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        self.log.events.push(Event {
            kind: self.kind,
            block: self.block.take(),
            inst: self.inst.take(),
            message: self.message.take(),
        });
    }
}

/// Append-only log of [`Event`]s.
///
/// Events can be appended concurrently through shared references (`&self`).
#[derive(Debug)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self {
            events: boxcar::Vec::new(),
        }
    }
}

impl Clone for EventLog {
    fn clone(&self) -> Self {
        let log = Self::new();
        log.merge(self);
        log
    }
}

impl EventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts an event of `kind`; it is added when the builder is dropped.
    ///
    /// ```rust,ignore
    /// log.record(EventKind::EdgeSplit).block(middle).message("bb0 -> bb3");
    /// ```
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder::new(self, kind)
    }

    /// Appends a finished event.
    pub fn push(&self, event: Event) {
        self.events.push(event);
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }

    /// Returns an iterator over all events, in recording order.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, e)| e)
    }

    /// Number of events of one kind.
    #[must_use]
    pub fn count(&self, kind: EventKind) -> usize {
        self.iter().filter(|e| e.kind == kind).count()
    }

    /// Per-kind counts, including kinds that never occurred.
    #[must_use]
    pub fn counts(&self) -> FxHashMap<EventKind, usize> {
        let mut counts: FxHashMap<EventKind, usize> = EventKind::iter().map(|k| (k, 0)).collect();
        for event in self.iter() {
            *counts.entry(event.kind).or_default() += 1;
        }
        counts
    }

    /// Copy of the events recorded so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Event> {
        self.iter().cloned().collect()
    }

    /// Appends a copy of every event of `other`.
    pub fn merge(&self, other: &EventLog) {
        for event in other.iter() {
            self.events.push(event.clone());
        }
    }

    /// Consumes the log and returns its events.
    #[must_use]
    pub fn into_events(self) -> Vec<Event> {
        self.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::mpsc, thread, time::Duration};

    use super::*;

    #[test]
    fn test_record_and_count() {
        let log = EventLog::new();
        log.record(EventKind::InstructionSunk)
            .at(BlockId::new(2), InstId::new(7))
            .message("from bb0");
        log.record(EventKind::EdgeSplit).block(BlockId::new(3));
        log.record(EventKind::InstructionSunk);

        assert_eq!(log.len(), 3);
        assert_eq!(log.count(EventKind::InstructionSunk), 2);
        assert_eq!(log.counts()[&EventKind::LoadPairCreated], 0);
        assert_eq!(log.snapshot()[0].to_string(), "instruction-sunk bb2 v7: from bb0");
    }

    #[test]
    fn test_event_lands_when_builder_drops() {
        let log = EventLog::new();
        let builder = log.record(EventKind::BlockScheduled).block(BlockId::new(1));
        // The log stays readable and writable while a builder is alive.
        assert_eq!(log.len(), 0);
        log.record(EventKind::EdgeSplit);
        assert_eq!(log.count(EventKind::EdgeSplit), 1);

        drop(builder);
        assert_eq!(log.len(), 2);
        assert_eq!(log.snapshot()[1].block, Some(BlockId::new(1)));
    }

    #[test]
    fn test_concurrent_readers_do_not_block_on_open_builder() {
        let log = std::sync::Arc::new(EventLog::new());
        let (tx, rx) = mpsc::channel();
        let worker = {
            let log = std::sync::Arc::clone(&log);
            thread::spawn(move || {
                let builder = log.record(EventKind::InstructionSunk);
                tx.send(log.len()).unwrap();
                drop(builder);
            })
        };
        assert_eq!(rx.recv_timeout(Duration::from_secs(3)), Ok(0));
        worker.join().unwrap();
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_merge_and_clone() {
        let a = EventLog::new();
        let b = EventLog::new();
        a.record(EventKind::BlockScheduled);
        b.record(EventKind::LoadPairCreated);

        a.merge(&b);
        assert_eq!(b.len(), 1);
        assert_eq!(a.len(), 2);
        assert_eq!(a.clone().into_events()[1].kind, EventKind::LoadPairCreated);
    }
}
