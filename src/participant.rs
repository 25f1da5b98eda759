//! Participant-side client
//!
//! A participant joins a room under a persistent identity, follows the room
//! state document through a subscription, and submits answers into the
//! active run's ledger. All answer gating happens here against the locally
//! reconciled deadline; the host independently enforces its own deadline
//! when scoring, so a client that lets a borderline answer through can never
//! award it points.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use thiserror::Error;

use crate::{
    clock::{self, RunClock, UnixMillis},
    constants,
    ledger::AnswerRecord,
    player::{self, NameError, PlayerId},
    room::{RoomId, RoomState, RunToken},
    store::{CollectionPath, DocumentPath, DocumentStore, Subscription},
};

/// Errors surfaced when joining a room
#[derive(Debug, Error)]
pub enum JoinError {
    /// The proposed display name was rejected
    #[error(transparent)]
    Name(#[from] NameError),
    /// The room is at its participant capacity
    #[error("room is full")]
    RoomFull,
    /// The store rejected a read or write
    #[error(transparent)]
    Store(#[from] crate::store::Error),
}

/// Errors surfaced when submitting an answer
#[derive(Debug, Error, PartialEq)]
pub enum SubmitError {
    /// The client has not joined the room
    #[error("not joined")]
    NotJoined,
    /// No question run is active
    #[error("no active question")]
    NoActiveQuestion,
    /// The room is not in the answering phase
    #[error("answers are not being accepted")]
    NotAcceptingAnswers,
    /// This run has already been answered from this client
    #[error("already answered")]
    AlreadyAnswered,
    /// The reconciled local deadline has passed
    #[error("deadline passed")]
    DeadlinePassed,
    /// The chosen option index does not exist
    #[error("invalid option")]
    InvalidOption,
    /// The store rejected the write
    #[error("submission failed: {0}")]
    Store(String),
}

impl From<crate::store::Error> for SubmitError {
    fn from(error: crate::store::Error) -> Self {
        Self::Store(error.to_string())
    }
}

/// What the participant currently knows about the room
///
/// Updated by the subscription callback; read under the same lock by the
/// submission path so an answer is always gated against the snapshot the
/// participant actually saw.
#[derive(Default)]
struct Observed {
    room: RoomState,
    run: Option<RunClock>,
    answered_run: Option<RunToken>,
}

impl Observed {
    /// Folds one room snapshot into the observed state
    ///
    /// A new run token starts a fresh run clock at `local_now`; a vanished
    /// token drops it. The answered-run latch is keyed by token and is left
    /// alone here, so a resubscription delivering the same snapshot again
    /// cannot re-open answering for an already-answered run.
    fn apply(&mut self, snapshot: Option<Value>, local_now: UnixMillis, server_now: Option<UnixMillis>) {
        let state: RoomState = snapshot
            .and_then(|document| serde_json::from_value(document).ok())
            .unwrap_or_default();

        self.run = match state.run_token.clone() {
            Some(token) => {
                if self.run.as_ref().is_some_and(|run| *run.token() == token) {
                    self.run.take()
                } else {
                    Some(RunClock::begin(token, state.deadline_ms, local_now, server_now))
                }
            }
            None => None,
        };
        self.room = state;
    }
}

/// A participant's connection to one room
pub struct ParticipantClient<S: DocumentStore> {
    store: S,
    room: RoomId,
    identity: Option<PlayerId>,
    observed: Arc<Mutex<Observed>>,
    subscription: Option<S::Handle>,
}

impl<S: DocumentStore> ParticipantClient<S> {
    /// Creates a client for `room`, not yet joined or subscribed
    pub fn new(store: S, room: RoomId) -> Self {
        Self {
            store,
            room,
            identity: None,
            observed: Arc::new(Mutex::new(Observed::default())),
            subscription: None,
        }
    }

    /// This client's identity, once joined
    pub fn identity(&self) -> Option<PlayerId> {
        self.identity
    }

    /// The last observed room state
    pub fn room_state(&self) -> RoomState {
        self.lock_observed().room.clone()
    }

    /// Milliseconds left to answer the active run, if one is open
    pub fn remaining_ms(&self, local_now: UnixMillis) -> Option<i64> {
        self.lock_observed()
            .run
            .as_ref()
            .map(|run| run.remaining_ms(local_now))
    }

    /// The run this client has already answered, if any
    ///
    /// The marker lives in client memory only. An embedder that wants the
    /// one-answer-per-run lock to survive a reload can persist it next to the
    /// player id and hand it back through
    /// [`ParticipantClient::restore_answered_run`].
    pub fn answered_run(&self) -> Option<RunToken> {
        self.lock_observed().answered_run.clone()
    }

    /// Restores a persisted answered-run marker
    pub fn restore_answered_run(&mut self, token: RunToken) {
        self.lock_observed().answered_run = Some(token);
    }

    fn lock_observed(&self) -> MutexGuard<'_, Observed> {
        self.observed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Joins the room under `name`
    ///
    /// Passing the identity stored from a previous visit resumes it: the
    /// registry entry keeps its accumulated score and only the name is
    /// refreshed. A fresh join mints a new identity, which the caller should
    /// persist on the device for next time.
    pub fn join(&mut self, stored_id: Option<PlayerId>, name: &str) -> Result<PlayerId, JoinError> {
        let name = player::validate_name(name)?;
        let id = stored_id.unwrap_or_else(PlayerId::new);
        let path = DocumentPath::Player(self.room.clone(), id);

        if self.store.read_once(&path)?.is_some() {
            // Returning participant: never reset the score
            self.store
                .merge_write(&path, serde_json::json!({ "name": name }))?;
        } else {
            let registered = self
                .store
                .read_collection(&CollectionPath::Players(self.room.clone()))?
                .len();
            if registered >= constants::room::MAX_PLAYER_COUNT {
                return Err(JoinError::RoomFull);
            }
            self.store.replace_write(
                &path,
                serde_json::json!({
                    "name": name,
                    "score": 0,
                    "joinedAtMs": self.store.server_now(),
                }),
            )?;
        }

        tracing::info!(room = %self.room, player = %id, name, "joined room");
        self.identity = Some(id);
        Ok(id)
    }

    /// Submits an answer for the active run
    ///
    /// The answer is gated against the locally reconciled deadline and
    /// recorded with a server timestamp; the host applies its own deadline
    /// at scoring time. Each run can be answered once per client, and the
    /// latch only engages after the write succeeds, so a failed submission
    /// can be retried.
    pub fn submit_answer(&mut self, option: usize) -> Result<(), SubmitError> {
        self.submit_answer_at(option, clock::local_now())
    }

    fn submit_answer_at(&mut self, option: usize, local_now: UnixMillis) -> Result<(), SubmitError> {
        let id = self.identity.ok_or(SubmitError::NotJoined)?;

        let (token, path) = {
            let observed = self.lock_observed();
            let run = observed.run.as_ref().ok_or(SubmitError::NoActiveQuestion)?;
            if observed.room.phase != crate::room::Phase::Question {
                return Err(SubmitError::NotAcceptingAnswers);
            }
            let token = run.token().clone();
            if observed.answered_run.as_ref() == Some(&token) {
                return Err(SubmitError::AlreadyAnswered);
            }
            if run.is_expired(local_now) {
                return Err(SubmitError::DeadlinePassed);
            }
            let option_count = observed.room.votes.as_ref().map_or(0, Vec::len);
            if option >= option_count {
                return Err(SubmitError::InvalidOption);
            }
            (
                token.clone(),
                DocumentPath::AnswerLedger(self.room.clone(), token),
            )
        };

        let answer = AnswerRecord {
            selected_option: option,
            submitted_at_ms: self.store.server_now(),
        };
        let entry = serde_json::to_value(answer).map_err(crate::store::Error::from)?;
        self.store
            .merge_write(&path, serde_json::json!({ id.to_string(): entry }))?;

        self.lock_observed().answered_run = Some(token);
        tracing::debug!(room = %self.room, player = %id, option, "answer recorded");
        Ok(())
    }
}

impl<S> ParticipantClient<S>
where
    S: DocumentStore + Clone + Send + 'static,
{
    /// Starts (or restarts) following the room state document
    ///
    /// Any previous subscription is released first, so a superseded callback
    /// never fires again.
    pub fn subscribe(&mut self) {
        if let Some(handle) = self.subscription.take() {
            handle.unsubscribe();
        }

        let observed = Arc::clone(&self.observed);
        let store = self.store.clone();
        let handle = self
            .store
            .subscribe(DocumentPath::Room(self.room.clone()), move |snapshot| {
                let server_now = store.server_now();
                observed
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .apply(snapshot, clock::local_now(), Some(server_now));
            });
        self.subscription = Some(handle);
    }
}
