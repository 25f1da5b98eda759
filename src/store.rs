//! Shared document store boundary
//!
//! This module defines the trait for the external real-time document store
//! that synchronizes all clients in a room. The store offers per-document
//! subscriptions (push notification on any write), atomic partial-field merge
//! writes, full replace writes, and a best-effort server-assigned time basis.
//! Delivery is at-least-once and eventually consistent; each subscription
//! observes a monotonically-increasing stream of snapshots.
//!
//! [`MemoryStore`] is an in-process implementation with a controllable server
//! clock, used by the test suite and suitable for single-machine sessions.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use serde_json::Value;
use thiserror::Error;

use crate::{
    clock::{self, UnixMillis},
    player::PlayerId,
    question::QuestionId,
    room::{RoomId, RunToken},
};

/// Address of a single document in the store
///
/// The layout mirrors the room hierarchy: the room state document at the
/// root, with questions, per-run answer ledgers, and per-participant registry
/// entries underneath it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub enum DocumentPath {
    /// The room state document
    #[display("rooms/{_0}")]
    Room(RoomId),
    /// A question content document
    #[display("rooms/{_0}/questions/{_1}")]
    Question(RoomId, QuestionId),
    /// The answer ledger for one question run
    #[display("rooms/{_0}/answers/{_1}")]
    AnswerLedger(RoomId, RunToken),
    /// A participant's registry entry
    #[display("rooms/{_0}/players/{_1}")]
    Player(RoomId, PlayerId),
}

/// Address of a document collection in the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub enum CollectionPath {
    /// The player registry of a room
    #[display("rooms/{_0}/players")]
    Players(RoomId),
}

/// Errors surfaced by the store boundary
#[derive(Debug, Error)]
pub enum Error {
    /// A read could not be completed
    #[error("store read failed: {0}")]
    ReadFailed(String),
    /// A write could not be completed
    #[error("store write failed: {0}")]
    WriteFailed(String),
    /// A document could not be serialized for writing
    #[error("document serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Handle for an active document subscription
///
/// A subscription keeps delivering snapshots until the handle is released.
/// Clients must release a pending subscription before establishing a new one
/// so that a superseded handler never receives further snapshots.
pub trait Subscription {
    /// Stops delivery to the associated callback
    fn unsubscribe(self);
}

/// The external document store, as seen by the coordination core
///
/// Implementations are expected to provide at-least-once delivery of
/// snapshots to subscribers and document-level atomicity for writes. The
/// exact wire format is irrelevant to correctness; documents are exchanged
/// as JSON values.
pub trait DocumentStore {
    /// Handle type returned by [`DocumentStore::subscribe`]
    type Handle: Subscription;

    /// Registers a push callback for a document
    ///
    /// The callback is invoked with the current snapshot immediately and with
    /// every subsequent write. `None` means the document does not exist.
    fn subscribe<F>(&self, path: DocumentPath, on_change: F) -> Self::Handle
    where
        F: FnMut(Option<Value>) + Send + 'static;

    /// Reads a document once, returning `None` if it is absent
    fn read_once(&self, path: &DocumentPath) -> Result<Option<Value>, Error>;

    /// Reads all documents of a collection as `(document id, value)` pairs
    fn read_collection(&self, path: &CollectionPath) -> Result<Vec<(String, Value)>, Error>;

    /// Atomically merges top-level fields into a document, creating it if
    /// absent
    fn merge_write(&self, path: &DocumentPath, fields: Value) -> Result<(), Error>;

    /// Atomically replaces a document, creating it if absent
    ///
    /// Phase transitions use this so the written state fully determines every
    /// phase-dependent field instead of relying on merge to leave old data.
    fn replace_write(&self, path: &DocumentPath, document: Value) -> Result<(), Error>;

    /// Best-effort server-assigned timestamp in Unix milliseconds
    ///
    /// This is the authoritative time basis for answer windows and scoring
    /// eligibility wherever it is available.
    fn server_now(&self) -> UnixMillis;
}

type ChangeCallback = Box<dyn FnMut(Option<Value>) + Send>;

struct MemorySubscriber {
    path: String,
    callback: ChangeCallback,
}

#[derive(Default)]
struct MemoryInner {
    documents: BTreeMap<String, Value>,
    subscribers: HashMap<u64, MemorySubscriber>,
    /// Ids whose handles were released; a retired subscriber is never
    /// re-registered even if it was temporarily removed for dispatch
    retired: HashSet<u64>,
    next_subscriber: u64,
    now_override: Option<UnixMillis>,
}

/// In-process document store
///
/// Snapshots are delivered synchronously from within the writing call.
/// Cloning yields another handle onto the same underlying store, which is how
/// tests hand one store to a host controller and several clients.
#[derive(Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    /// Creates an empty in-process store
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins the server clock to a fixed value
    ///
    /// Until this is called, [`DocumentStore::server_now`] falls back to the
    /// local wall clock. Tests use the pinned clock to make answer windows
    /// and elapsed times deterministic.
    pub fn set_server_now(&self, now: UnixMillis) {
        self.lock().now_override = Some(now);
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delivers the current snapshot of `path` to its live subscribers
    ///
    /// Subscribers are taken out of the registry for the duration of their
    /// callback so a callback may itself read or write the store without
    /// deadlocking.
    fn notify(&self, path: &str) {
        let (snapshot, dispatched) = {
            let mut inner = self.lock();
            let snapshot = inner.documents.get(path).cloned();
            let due = inner
                .subscribers
                .iter()
                .filter(|(_, subscriber)| subscriber.path == path)
                .map(|(id, _)| *id)
                .collect::<Vec<_>>();
            let dispatched = due
                .into_iter()
                .filter_map(|id| inner.subscribers.remove(&id).map(|s| (id, s)))
                .collect::<Vec<_>>();
            (snapshot, dispatched)
        };

        for (id, mut subscriber) in dispatched {
            (subscriber.callback)(snapshot.clone());

            let mut inner = self.lock();
            if !inner.retired.contains(&id) {
                inner.subscribers.insert(id, subscriber);
            }
        }
    }
}

/// Subscription handle for [`MemoryStore`]
///
/// Delivery stops when the handle is released or dropped.
pub struct MemoryHandle {
    inner: Arc<Mutex<MemoryInner>>,
    id: u64,
}

impl Subscription for MemoryHandle {
    fn unsubscribe(self) {
        // release happens in Drop
    }
}

impl Drop for MemoryHandle {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.subscribers.remove(&self.id);
        inner.retired.insert(self.id);
    }
}

impl DocumentStore for MemoryStore {
    type Handle = MemoryHandle;

    fn subscribe<F>(&self, path: DocumentPath, mut on_change: F) -> Self::Handle
    where
        F: FnMut(Option<Value>) + Send + 'static,
    {
        let key = path.to_string();

        // Initial snapshot, delivered outside the lock
        let current = self.lock().documents.get(&key).cloned();
        on_change(current);

        let mut inner = self.lock();
        let id = inner.next_subscriber;
        inner.next_subscriber += 1;
        inner.subscribers.insert(
            id,
            MemorySubscriber {
                path: key,
                callback: Box::new(on_change),
            },
        );

        MemoryHandle {
            inner: Arc::clone(&self.inner),
            id,
        }
    }

    fn read_once(&self, path: &DocumentPath) -> Result<Option<Value>, Error> {
        Ok(self.lock().documents.get(&path.to_string()).cloned())
    }

    fn read_collection(&self, path: &CollectionPath) -> Result<Vec<(String, Value)>, Error> {
        let prefix = format!("{path}/");
        Ok(self
            .lock()
            .documents
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| !key[prefix.len()..].contains('/'))
            .map(|(key, value)| (key[prefix.len()..].to_owned(), value.clone()))
            .collect())
    }

    fn merge_write(&self, path: &DocumentPath, fields: Value) -> Result<(), Error> {
        let key = path.to_string();
        {
            let mut inner = self.lock();
            let merged = match (inner.documents.get(&key), fields) {
                (Some(Value::Object(existing)), Value::Object(new_fields)) => {
                    let mut merged = existing.clone();
                    for (field, value) in new_fields {
                        merged.insert(field, value);
                    }
                    Value::Object(merged)
                }
                // Absent document or non-object payload: the write determines
                // the whole document
                (_, fields) => fields,
            };
            inner.documents.insert(key.clone(), merged);
        }
        self.notify(&key);
        Ok(())
    }

    fn replace_write(&self, path: &DocumentPath, document: Value) -> Result<(), Error> {
        let key = path.to_string();
        self.lock().documents.insert(key.clone(), document);
        self.notify(&key);
        Ok(())
    }

    fn server_now(&self) -> UnixMillis {
        self.lock().now_override.unwrap_or_else(clock::local_now)
    }
}
