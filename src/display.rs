//! Shared-screen display client
//!
//! The display is a passive follower: it never writes, it only projects the
//! room state document into something renderable. The projection trusts the
//! phase field alone and reads each remaining field only in the phases that
//! define it, so stale data from an earlier phase can never show through.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::{
    TopList,
    clock::{self, RunClock, UnixMillis},
    constants,
    question::{Question, QuestionId},
    room::{FinalRankingEntry, Phase, RankingEntry, RoomId, RoomState},
    store::{DocumentPath, DocumentStore, Subscription},
};

/// What a shared screen should currently render
#[derive(Debug, Clone, PartialEq)]
pub enum ViewState {
    /// Idle room, waiting for the host
    Waiting,
    /// A question is announced, options hidden
    Intro {
        /// The question text
        text: String,
    },
    /// The answer window is open
    Question {
        /// The question text
        text: String,
        /// The answer options, in display order
        options: Vec<String>,
        /// Milliseconds left on the reconciled countdown
        remaining_ms: i64,
    },
    /// Vote counts are shown
    Votes {
        /// The answer options, in display order
        options: Vec<String>,
        /// Submission count per option
        votes: Vec<u64>,
    },
    /// The correct option is revealed
    Result {
        /// The answer options, in display order
        options: Vec<String>,
        /// 0-based index of the correct option
        correct_option: usize,
    },
    /// The per-question ranking is shown
    Ranking {
        /// Fastest correct responders, best first
        ranking: TopList<RankingEntry>,
    },
    /// The final standings are shown
    Final {
        /// All participants, highest score first
        standings: Vec<FinalRankingEntry>,
    },
    /// The room references a question this display cannot load
    MissingQuestion,
}

/// Staged bottom-up reveal of the per-question ranking
///
/// Rows appear one at a time starting from the worst revealed rank, one row
/// per [`constants::display::RANKING_REVEAL_TICK_MS`], building suspense
/// toward the winner.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingReveal {
    entries: Vec<RankingEntry>,
}

impl RankingReveal {
    /// Stages a reveal of `ranking`, whose entries are ordered best first
    pub fn new(ranking: &TopList<RankingEntry>) -> Self {
        Self {
            entries: ranking.entries().to_vec(),
        }
    }

    /// Number of reveal steps until every row is visible
    pub fn steps(&self) -> usize {
        self.entries.len()
    }

    /// Reveal steps elapsed between showing the ranking and `local_now`
    pub fn ticks_since(shown_at: UnixMillis, local_now: UnixMillis) -> usize {
        let elapsed = (local_now - shown_at).max(0);
        (elapsed / constants::display::RANKING_REVEAL_TICK_MS) as usize
    }

    /// The rows visible after `ticks` reveal steps, still ordered best first
    ///
    /// The suffix of the list grows as ticks pass: the worst rank appears
    /// first and the winner last.
    pub fn visible_after(&self, ticks: usize) -> &[RankingEntry] {
        let visible = ticks.min(self.entries.len());
        &self.entries[self.entries.len() - visible..]
    }
}

#[derive(Default)]
struct Observed {
    room: RoomState,
    question: Option<Question>,
    run: Option<RunClock>,
}

impl Observed {
    fn apply(
        &mut self,
        snapshot: Option<Value>,
        question: Option<Question>,
        local_now: UnixMillis,
        server_now: Option<UnixMillis>,
    ) {
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
        self.question = question;
        self.room = state;
    }

    /// Projects the observed state into a renderable view
    ///
    /// Every field is read only under the phase that defines it.
    fn view(&self, local_now: UnixMillis) -> ViewState {
        let question = self.question.as_ref();
        match self.room.phase {
            Phase::Waiting => ViewState::Waiting,
            Phase::Intro => match question {
                Some(question) => ViewState::Intro {
                    text: question.text.clone(),
                },
                None => ViewState::MissingQuestion,
            },
            Phase::Question => match question {
                Some(question) => ViewState::Question {
                    text: question.text.clone(),
                    options: question.options.clone(),
                    remaining_ms: self
                        .run
                        .as_ref()
                        .map_or(0, |run| run.remaining_ms(local_now)),
                },
                None => ViewState::MissingQuestion,
            },
            Phase::Votes => match (question, &self.room.votes) {
                (Some(question), Some(votes)) => ViewState::Votes {
                    options: question.options.clone(),
                    votes: votes.clone(),
                },
                _ => ViewState::MissingQuestion,
            },
            Phase::Result => match (question, self.room.correct_option) {
                (Some(question), Some(correct_option)) => ViewState::Result {
                    options: question.options.clone(),
                    correct_option,
                },
                _ => ViewState::MissingQuestion,
            },
            Phase::Ranking => ViewState::Ranking {
                ranking: self.room.ranking.clone().unwrap_or_default(),
            },
            Phase::Final => ViewState::Final {
                standings: self.room.final_ranking.clone().unwrap_or_default(),
            },
        }
    }
}

/// A shared screen's connection to one room
pub struct DisplayClient<S: DocumentStore> {
    store: S,
    room: RoomId,
    observed: Arc<Mutex<Observed>>,
    subscription: Option<S::Handle>,
}

impl<S: DocumentStore> DisplayClient<S> {
    /// Creates a display client for `room`, not yet subscribed
    pub fn new(store: S, room: RoomId) -> Self {
        Self {
            store,
            room,
            observed: Arc::new(Mutex::new(Observed::default())),
            subscription: None,
        }
    }

    fn lock_observed(&self) -> MutexGuard<'_, Observed> {
        self.observed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The last observed room state
    pub fn room_state(&self) -> RoomState {
        self.lock_observed().room.clone()
    }

    /// What the screen should render right now
    pub fn view(&self, local_now: UnixMillis) -> ViewState {
        self.lock_observed().view(local_now)
    }
}

impl<S> DisplayClient<S>
where
    S: DocumentStore + Clone + Send + 'static,
{
    /// Starts (or restarts) following the room state document
    ///
    /// The referenced question document is fetched alongside each snapshot;
    /// a question that cannot be loaded renders as a placeholder rather than
    /// breaking the screen.
    pub fn subscribe(&mut self) {
        if let Some(handle) = self.subscription.take() {
            handle.unsubscribe();
        }

        let observed = Arc::clone(&self.observed);
        let store = self.store.clone();
        let room = self.room.clone();
        let handle = self
            .store
            .subscribe(DocumentPath::Room(room.clone()), move |snapshot| {
                let question = snapshot
                    .as_ref()
                    .and_then(|document| document.get("currentQuestion"))
                    .and_then(|id| serde_json::from_value::<QuestionId>(id.clone()).ok())
                    .and_then(|id| fetch_question(&store, &room, &id));
                let server_now = store.server_now();
                observed
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .apply(snapshot, question, clock::local_now(), Some(server_now));
            });
        self.subscription = Some(handle);
    }
}

fn fetch_question<S: DocumentStore>(
    store: &S,
    room: &RoomId,
    question: &QuestionId,
) -> Option<Question> {
    let document = match store.read_once(&DocumentPath::Question(room.clone(), question.clone())) {
        Ok(document) => document?,
        Err(error) => {
            tracing::warn!(%room, %question, %error, "question read failed");
            return None;
        }
    };
    match serde_json::from_value(document) {
        Ok(question) => Some(question),
        Err(error) => {
            tracing::warn!(%room, %question, %error, "malformed question document");
            None
        }
    }
}
