//! Mock implementations for testing without trains or disks.
//!
//! # Available Mocks
//!
//! | Mock | Trait | Purpose |
//! |------|-------|---------|
//! | [`MockLink`] | [`TrainLink`] | Records commands sent to a train |
//! | [`FailingStore`] | [`Store`] | In-memory store whose writes can be made to fail |
//!
//! # Example
//!
//! ```rust
//! use rs_signalbox::hal::MockLink;
//! use rs_signalbox::link::TrainCommand;
//! use rs_signalbox::traits::TrainLink;
//!
//! let link = MockLink::new();
//! link.send(TrainCommand::Forward(120)).unwrap();
//! link.send(TrainCommand::FastStop).unwrap();
//!
//! assert_eq!(link.commands(), vec![TrainCommand::Forward(120), TrainCommand::FastStop]);
//! assert_eq!(link.last(), Some(TrainCommand::FastStop));
//! ```
//!
//! [`TrainLink`]: crate::traits::TrainLink
//! [`Store`]: crate::traits::Store

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

use crate::error::{LinkError, StoreError};
use crate::event_log::{EventKind, EventLogQuery, EventRecord};
use crate::link::TrainCommand;
use crate::store::MemoryStore;
use crate::topology::{SignalKey, SignalRecord, StretchId, StretchRecord};
use crate::traits::{Snapshot, Store, TrainLink};
use crate::train::{TrainId, TrainRecord};

// ============================================================================
// Link Mock
// ============================================================================

/// Mock train link.
///
/// Every command is appended to a log that tests inspect directly or wait
/// on with [`MockLink::wait_until`].
#[derive(Debug)]
pub struct MockLink {
    sent: watch::Sender<Vec<TrainCommand>>,
    closed: AtomicBool,
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLink {
    /// Open link with an empty log.
    pub fn new() -> Self {
        let (sent, _) = watch::channel(Vec::new());
        Self {
            sent,
            closed: AtomicBool::new(false),
        }
    }

    /// All commands sent so far, oldest first.
    pub fn commands(&self) -> Vec<TrainCommand> {
        self.sent.borrow().clone()
    }

    /// Most recent command.
    pub fn last(&self) -> Option<TrainCommand> {
        self.sent.borrow().last().copied()
    }

    /// Forget the log.
    pub fn clear(&self) {
        self.sent.send_modify(Vec::clear);
    }

    /// Make every further send fail with [`LinkError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Wait until the log satisfies `predicate`; returns the log.
    pub async fn wait_until(
        &self,
        mut predicate: impl FnMut(&[TrainCommand]) -> bool,
    ) -> Vec<TrainCommand> {
        let mut rx = self.sent.subscribe();
        let seen = rx
            .wait_for(|commands| predicate(commands))
            .await
            .map(|commands| commands.clone());
        seen.unwrap_or_else(|_| self.commands())
    }
}

impl TrainLink for MockLink {
    fn send(&self, command: TrainCommand) -> Result<(), LinkError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LinkError::Closed);
        }
        self.sent.send_modify(|commands| commands.push(command));
        Ok(())
    }
}

// ============================================================================
// Store Mock
// ============================================================================

/// In-memory store that can be switched into failing every write.
///
/// Reads keep working while writes fail, mirroring a database that went
/// read-only.
///
/// # Example
///
/// ```rust
/// use rs_signalbox::hal::FailingStore;
/// use rs_signalbox::traits::Store;
/// use rs_signalbox::train::TrainRecord;
///
/// let store = FailingStore::new();
/// store.set_failing(true);
/// assert!(store.save_train(&TrainRecord::default()).is_err());
/// assert!(store.load().is_ok());
/// ```
#[derive(Debug, Default)]
pub struct FailingStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl FailingStore {
    /// Empty store with writes succeeding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store preloaded with a snapshot.
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            inner: MemoryStore::with_snapshot(snapshot),
            failing: AtomicBool::new(false),
        }
    }

    /// Toggle write failures.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("simulated write failure".into()))
        } else {
            Ok(())
        }
    }
}

impl Store for FailingStore {
    fn load(&self) -> Result<Snapshot, StoreError> {
        self.inner.load()
    }

    fn save_train(&self, record: &TrainRecord) -> Result<(), StoreError> {
        self.check()?;
        self.inner.save_train(record)
    }

    fn delete_train(&self, id: TrainId) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete_train(id)
    }

    fn save_stretch(&self, record: &StretchRecord) -> Result<(), StoreError> {
        self.check()?;
        self.inner.save_stretch(record)
    }

    fn delete_stretch(&self, id: StretchId) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete_stretch(id)
    }

    fn save_signal(&self, record: &SignalRecord) -> Result<(), StoreError> {
        self.check()?;
        self.inner.save_signal(record)
    }

    fn delete_signal(&self, key: SignalKey) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete_signal(key)
    }

    fn append_event(
        &self,
        kind: EventKind,
        details: serde_json::Value,
    ) -> Result<EventRecord, StoreError> {
        self.check()?;
        self.inner.append_event(kind, details)
    }

    fn events(&self, query: &EventLogQuery) -> Result<Vec<EventRecord>, StoreError> {
        self.inner.events(query)
    }
}

// ============================================================================
// Tests
// ============================================================================
