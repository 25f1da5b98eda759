//! Room state document and phase transitions
//!
//! The room state is the single coordination document shared by every client
//! in a room. Its `phase` field is the sole source of truth for what all
//! screens render; every other field is only meaningful for particular
//! phases. Each transition builder therefore fully determines the new state,
//! explicitly nulling whatever the new phase does not use, so a client can
//! never observe a phase paired with another phase's leftover data.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::{TopList, clock::UnixMillis, question::QuestionId};

/// Identifier of a quiz room
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Wraps a room identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

/// Unique identifier of one instance of a question being asked
///
/// Every (re-)start of a question mints a new token, never reused, composed
/// of the question id, a monotonically increasing per-room sequence number,
/// and a random suffix so that two racing starts can never collide. The
/// token, not the question id, addresses the answer ledger: answers from a
/// previous run of the same question can never leak into a new run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display)]
#[serde(transparent)]
pub struct RunToken(String);

impl RunToken {
    /// Mints a token for run number `seq` of `question`
    pub fn issue(question: &QuestionId, seq: u64) -> Self {
        Self(format!(
            "{question}#{seq}-{:06x}",
            fastrand::u32(..0x0100_0000)
        ))
    }
}

/// The current stage of the quiz-room state machine
///
/// Phases advance linearly per question cycle; the host may additionally
/// jump to `Waiting` or `Final` at will.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Room is open, no question cycle is active
    #[default]
    Waiting,
    /// A question is announced without its answer options
    Intro,
    /// The answer window is open
    Question,
    /// Per-option vote counts are shown
    Votes,
    /// The correct option is revealed
    Result,
    /// The per-question ranking is shown
    Ranking,
    /// The whole-game final ranking is shown
    Final,
}

/// One row of the per-question ranking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingEntry {
    /// 1-based position, fastest correct responder first
    pub rank: usize,
    /// The responder's display name
    pub name: String,
    /// Milliseconds between the window opening and the submission
    pub elapsed_ms: i64,
}

/// One row of the final ranking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalRankingEntry {
    /// 1-based position, highest score first
    pub rank: usize,
    /// The participant's display name
    pub name: String,
    /// Cumulative score across all questions
    pub total_score: u64,
}

/// The shared room coordination document
///
/// An absent or unreadable document deserializes to the default, which is
/// the idle waiting state. `run_seq` and `scored_runs` are bookkeeping that
/// survives every transition: the former backs the never-reuse-a-token
/// invariant, the latter is the idempotency guard that makes scoring safe
/// under re-invocation.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomState {
    /// Current phase; the only field clients may trust unconditionally
    pub phase: Phase,
    /// The active question, if any
    pub current_question: Option<QuestionId>,
    /// Token of the active question run, if any
    pub run_token: Option<RunToken>,
    /// Number of runs started in this room so far
    pub run_seq: u64,
    /// When the answer window opened, server time basis
    pub start_at_ms: Option<UnixMillis>,
    /// When the answer window closes, server time basis
    pub deadline_ms: Option<UnixMillis>,
    /// Submitted count per option index; initialized to zeros when a run
    /// starts, recounted when votes are shown
    pub votes: Option<Vec<u64>>,
    /// The correct option index, revealed in the result phase
    pub correct_option: Option<usize>,
    /// Top correct-and-fastest responders for the current run
    pub ranking: Option<TopList<RankingEntry>>,
    /// Final standings, computed at game end
    pub final_ranking: Option<Vec<FinalRankingEntry>>,
    /// Runs whose scores have already been applied to the registry
    pub scored_runs: HashSet<RunToken>,
}

impl RoomState {
    /// Carries the cross-phase bookkeeping into an otherwise blank state
    fn bookkeeping(&self) -> Self {
        Self {
            run_seq: self.run_seq,
            scored_runs: self.scored_runs.clone(),
            ..Self::default()
        }
    }

    /// Returns the idle waiting state
    pub fn reset(&self) -> Self {
        self.bookkeeping()
    }

    /// Announces a question without opening its answer window
    pub fn intro(&self, question: QuestionId) -> Self {
        Self {
            phase: Phase::Intro,
            current_question: Some(question),
            ..self.bookkeeping()
        }
    }

    /// Opens the answer window for a fresh run of `question`
    ///
    /// Mints a new run token and zero-initializes the vote counts to the
    /// question's option count.
    pub fn start_run(
        &self,
        question: QuestionId,
        start_at_ms: UnixMillis,
        deadline_ms: UnixMillis,
        option_count: usize,
    ) -> Self {
        let seq = self.run_seq + 1;
        let token = RunToken::issue(&question, seq);
        Self {
            phase: Phase::Question,
            current_question: Some(question),
            run_token: Some(token),
            run_seq: seq,
            start_at_ms: Some(start_at_ms),
            deadline_ms: Some(deadline_ms),
            votes: Some(vec![0; option_count]),
            ..self.bookkeeping()
        }
    }

    /// Publishes the tallied vote counts
    pub fn show_votes(&self, votes: Vec<u64>) -> Self {
        Self {
            phase: Phase::Votes,
            current_question: self.current_question.clone(),
            run_token: self.run_token.clone(),
            start_at_ms: self.start_at_ms,
            deadline_ms: self.deadline_ms,
            votes: Some(votes),
            ..self.bookkeeping()
        }
    }

    /// Reveals the correct option without committing any points
    pub fn reveal(&self, correct_option: usize) -> Self {
        Self {
            phase: Phase::Result,
            current_question: self.current_question.clone(),
            run_token: self.run_token.clone(),
            start_at_ms: self.start_at_ms,
            deadline_ms: self.deadline_ms,
            correct_option: Some(correct_option),
            ..self.bookkeeping()
        }
    }

    /// Publishes the per-question ranking and marks the run as scored
    ///
    /// The correct option stays visible alongside the ranking; it belongs to
    /// the same run and re-invoking the scorer needs it.
    pub fn show_ranking(&self, ranking: TopList<RankingEntry>) -> Self {
        let mut scored_runs = self.scored_runs.clone();
        if let Some(token) = &self.run_token {
            scored_runs.insert(token.clone());
        }
        Self {
            phase: Phase::Ranking,
            current_question: self.current_question.clone(),
            run_token: self.run_token.clone(),
            start_at_ms: self.start_at_ms,
            deadline_ms: self.deadline_ms,
            correct_option: self.correct_option,
            ranking: Some(ranking),
            scored_runs,
            ..self.bookkeeping()
        }
    }

    /// Publishes the final standings
    pub fn show_final_ranking(&self, final_ranking: Vec<FinalRankingEntry>) -> Self {
        Self {
            phase: Phase::Final,
            final_ranking: Some(final_ranking),
            ..self.bookkeeping()
        }
    }
}
