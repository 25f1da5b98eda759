//! Host-side phase controller
//!
//! The controller is the only writer of the room state document. Every
//! operation reads the current state, computes the complete next state
//! through the transition builders in [`crate::room`], and publishes it with
//! a replace write, so the document never carries another phase's leftovers.
//!
//! Scoring is idempotent: the set of already-scored run tokens rides along
//! in the room state, and a ranking re-invocation for a scored run recomputes
//! the displayed ranking without touching the registry again.

use std::{cmp::Reverse, collections::HashMap};

use thiserror::Error;

use crate::{
    TopList, constants,
    ledger::AnswerLedger,
    player::PlayerRecord,
    question::{Question, QuestionId},
    room::{FinalRankingEntry, RankingEntry, RoomId, RoomState, RunToken},
    store::{CollectionPath, DocumentPath, DocumentStore},
};

/// Errors surfaced by host operations
#[derive(Debug, Error)]
pub enum Error {
    /// The store rejected a read or write
    #[error(transparent)]
    Store(#[from] crate::store::Error),
    /// The referenced question document does not exist
    #[error("unknown question {0}")]
    UnknownQuestion(QuestionId),
    /// The operation needs an active question run and there is none
    #[error("no active question run")]
    NoActiveRun,
    /// Ranking was requested before the correct option was revealed
    #[error("correct option has not been revealed")]
    NotRevealed,
}

/// Drives the phase state machine of one room
pub struct PhaseController<S: DocumentStore> {
    store: S,
    room: RoomId,
}

impl<S: DocumentStore> PhaseController<S> {
    /// Creates a controller for `room`
    pub fn new(store: S, room: RoomId) -> Self {
        Self { store, room }
    }

    /// The room this controller drives
    pub fn room(&self) -> &RoomId {
        &self.room
    }

    /// Reads the current room state
    ///
    /// An absent document is the idle waiting state. A document that does
    /// not parse is treated the same way rather than wedging the host.
    pub fn read_room(&self) -> Result<RoomState, Error> {
        let Some(document) = self.store.read_once(&DocumentPath::Room(self.room.clone()))? else {
            return Ok(RoomState::default());
        };
        match serde_json::from_value(document) {
            Ok(state) => Ok(state),
            Err(error) => {
                tracing::warn!(room = %self.room, %error, "malformed room state, treating as idle");
                Ok(RoomState::default())
            }
        }
    }

    fn write_room(&self, state: &RoomState) -> Result<(), Error> {
        self.store.replace_write(
            &DocumentPath::Room(self.room.clone()),
            serde_json::to_value(state).map_err(crate::store::Error::from)?,
        )?;
        Ok(())
    }

    fn read_question(&self, question: &QuestionId) -> Result<Question, Error> {
        let path = DocumentPath::Question(self.room.clone(), question.clone());
        let Some(document) = self.store.read_once(&path)? else {
            return Err(Error::UnknownQuestion(question.clone()));
        };
        serde_json::from_value(document).map_err(|error| {
            tracing::warn!(room = %self.room, %question, %error, "malformed question document");
            Error::UnknownQuestion(question.clone())
        })
    }

    fn read_ledger(&self, token: &RunToken) -> Result<AnswerLedger, Error> {
        let path = DocumentPath::AnswerLedger(self.room.clone(), token.clone());
        Ok(AnswerLedger::from_document(self.store.read_once(&path)?))
    }

    fn read_registry(&self) -> Result<HashMap<String, PlayerRecord>, Error> {
        Ok(self
            .store
            .read_collection(&CollectionPath::Players(self.room.clone()))?
            .into_iter()
            .filter_map(|(id, document)| {
                let record = serde_json::from_value(document).ok()?;
                Some((id, record))
            })
            .collect())
    }

    /// Returns the room to the idle waiting state
    pub fn reset(&self) -> Result<(), Error> {
        let state = self.read_room()?;
        tracing::info!(room = %self.room, "resetting room");
        self.write_room(&state.reset())
    }

    /// Announces `question` without opening its answer window
    ///
    /// Also empties the superseded run's ledger, if one is still around;
    /// its token will never be active again.
    pub fn show_intro(&self, question: QuestionId) -> Result<(), Error> {
        self.read_question(&question)?;
        let state = self.read_room()?;
        if let Some(token) = &state.run_token {
            self.store.replace_write(
                &DocumentPath::AnswerLedger(self.room.clone(), token.clone()),
                serde_json::json!({}),
            )?;
        }
        tracing::info!(room = %self.room, %question, "introducing question");
        self.write_room(&state.intro(question))
    }

    /// Opens the answer window for a fresh run of `question`
    ///
    /// Mints a new run token, clears that token's answer ledger, and stamps
    /// the window with the server clock. Starting the same question again
    /// always yields a new run with an empty ledger.
    pub fn start_question(&self, question: QuestionId) -> Result<(), Error> {
        let content = self.read_question(&question)?;
        let state = self.read_room()?;

        let start_at_ms = self.store.server_now();
        let deadline_ms = start_at_ms + constants::room::ANSWER_WINDOW_MS;
        let next = state.start_run(
            question.clone(),
            start_at_ms,
            deadline_ms,
            content.option_count(),
        );

        // The ledger must exist and be empty before any client can observe
        // the new token.
        if let Some(token) = &next.run_token {
            self.store.replace_write(
                &DocumentPath::AnswerLedger(self.room.clone(), token.clone()),
                serde_json::json!({}),
            )?;
        }

        tracing::info!(
            room = %self.room,
            %question,
            run = next.run_seq,
            deadline_ms,
            "opening answer window"
        );
        self.write_room(&next)
    }

    /// Tallies the active run's ledger and publishes the vote counts
    pub fn tally_votes(&self) -> Result<(), Error> {
        let state = self.read_room()?;
        let token = state.run_token.as_ref().ok_or(Error::NoActiveRun)?;

        let option_count = match (&state.votes, &state.current_question) {
            (Some(votes), _) => votes.len(),
            (None, Some(question)) => self.read_question(question)?.option_count(),
            (None, None) => return Err(Error::NoActiveRun),
        };
        let votes = self.read_ledger(token)?.tally(option_count);

        tracing::info!(room = %self.room, ?votes, "publishing vote counts");
        self.write_room(&state.show_votes(votes))
    }

    /// Reveals the correct option without committing any points
    pub fn reveal(&self, correct_option: usize) -> Result<(), Error> {
        let state = self.read_room()?;
        if state.run_token.is_none() {
            return Err(Error::NoActiveRun);
        }
        tracing::info!(room = %self.room, correct_option, "revealing correct option");
        self.write_room(&state.reveal(correct_option))
    }

    /// Scores the active run and publishes the per-question ranking
    ///
    /// The first invocation for a run awards points to the registry; any
    /// re-invocation for the same run token recomputes and republishes the
    /// ranking without awarding anything again. Eligibility is judged
    /// against the host's own deadline regardless of what any client's
    /// reconciled countdown showed.
    pub fn show_ranking(&self) -> Result<(), Error> {
        let state = self.read_room()?;
        let token = state.run_token.as_ref().ok_or(Error::NoActiveRun)?;
        let correct_option = state.correct_option.ok_or(Error::NotRevealed)?;
        let (start_at_ms, deadline_ms) = state
            .start_at_ms
            .zip(state.deadline_ms)
            .ok_or(Error::NoActiveRun)?;

        let responders =
            self.read_ledger(token)?
                .correct_responders(correct_option, start_at_ms, deadline_ms);
        let registry = self.read_registry()?;
        let already_scored = state.scored_runs.contains(token);

        let mut entries = Vec::with_capacity(responders.len());
        for (rank0, (player, elapsed_ms)) in responders.iter().enumerate() {
            let Some(record) = registry.get(&player.to_string()) else {
                tracing::warn!(room = %self.room, %player, "correct responder missing from registry");
                entries.push(RankingEntry {
                    rank: rank0 + 1,
                    name: "Unknown".to_owned(),
                    elapsed_ms: *elapsed_ms,
                });
                continue;
            };

            entries.push(RankingEntry {
                rank: rank0 + 1,
                name: record.name.clone(),
                elapsed_ms: *elapsed_ms,
            });

            if !already_scored {
                let bonus = constants::scoring::PODIUM_BONUS
                    .get(rank0)
                    .copied()
                    .unwrap_or(0);
                let award = constants::scoring::CORRECT_AWARD + bonus;
                self.store.merge_write(
                    &DocumentPath::Player(self.room.clone(), *player),
                    serde_json::json!({ "score": record.score + award }),
                )?;
            }
        }

        let total = entries.len();
        let ranking = TopList::new(entries, constants::scoring::RANKING_LIMIT, total);

        tracing::info!(
            room = %self.room,
            responders = total,
            rescored = already_scored,
            "publishing ranking"
        );
        self.write_room(&state.show_ranking(ranking))
    }

    /// Computes the final standings from the registry and publishes them
    ///
    /// Recomputed from the registry on every call, so repeating the call
    /// after a late score write converges on the same standings everywhere.
    pub fn show_final_ranking(&self) -> Result<(), Error> {
        let state = self.read_room()?;
        let mut records = self.read_registry()?.into_values().collect::<Vec<_>>();
        records.sort_by_key(|record| (Reverse(record.score), record.name.clone()));

        let final_ranking = records
            .into_iter()
            .enumerate()
            .map(|(rank0, record)| FinalRankingEntry {
                rank: rank0 + 1,
                name: record.name,
                total_score: record.score,
            })
            .collect();

        tracing::info!(room = %self.room, "publishing final ranking");
        self.write_room(&state.show_final_ranking(final_ranking))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        ledger::AnswerRecord,
        player::PlayerId,
        room::Phase,
        store::{MemoryStore, Subscription},
    };

    fn room() -> RoomId {
        RoomId::new("roomA")
    }

    fn setup() -> (MemoryStore, PhaseController<MemoryStore>) {
        let store = MemoryStore::new();
        store.set_server_now(100_000);
        let controller = PhaseController::new(store.clone(), room());
        (store, controller)
    }

    fn seed_question(store: &MemoryStore, id: &str, options: usize) {
        let options = (0..options).map(|i| format!("option {i}")).collect::<Vec<_>>();
        store
            .replace_write(
                &DocumentPath::Question(room(), QuestionId::new(id)),
                json!({ "text": "?", "options": options }),
            )
            .unwrap();
    }

    fn seed_player(store: &MemoryStore, name: &str, score: u64) -> PlayerId {
        let player = PlayerId::new();
        store
            .replace_write(
                &DocumentPath::Player(room(), player),
                json!({ "name": name, "score": score, "joinedAtMs": 0 }),
            )
            .unwrap();
        player
    }

    fn submit(store: &MemoryStore, token: &RunToken, player: PlayerId, option: usize, at: i64) {
        let answer = AnswerRecord {
            selected_option: option,
            submitted_at_ms: at,
        };
        store
            .merge_write(
                &DocumentPath::AnswerLedger(room(), token.clone()),
                json!({ player.to_string(): serde_json::to_value(answer).unwrap() }),
            )
            .unwrap();
    }

    fn player_score(store: &MemoryStore, player: PlayerId) -> u64 {
        let doc = store
            .read_once(&DocumentPath::Player(room(), player))
            .unwrap()
            .unwrap();
        doc["score"].as_u64().unwrap()
    }

    #[test]
    fn start_question_opens_a_fresh_run() {
        let (store, controller) = setup();
        seed_question(&store, "q1", 4);

        controller.start_question(QuestionId::new("q1")).unwrap();

        let state = controller.read_room().unwrap();
        assert_eq!(state.phase, Phase::Question);
        assert_eq!(state.current_question, Some(QuestionId::new("q1")));
        assert_eq!(state.start_at_ms, Some(100_000));
        assert_eq!(state.deadline_ms, Some(100_000 + constants::room::ANSWER_WINDOW_MS));
        assert_eq!(state.votes, Some(vec![0, 0, 0, 0]));

        // The new run's ledger exists and is empty
        let token = state.run_token.unwrap();
        let ledger = store
            .read_once(&DocumentPath::AnswerLedger(room(), token))
            .unwrap()
            .unwrap();
        assert_eq!(ledger, json!({}));
    }

    #[test]
    fn unknown_question_is_rejected() {
        let (_store, controller) = setup();
        let result = controller.start_question(QuestionId::new("missing"));
        assert!(matches!(result, Err(Error::UnknownQuestion(_))));
    }

    #[test]
    fn restarting_a_question_isolates_the_previous_ledger() {
        let (store, controller) = setup();
        seed_question(&store, "q1", 4);
        let player = seed_player(&store, "Alice", 0);

        controller.start_question(QuestionId::new("q1")).unwrap();
        let first_token = controller.read_room().unwrap().run_token.unwrap();
        submit(&store, &first_token, player, 1, 101_000);

        // Second start of the same question
        controller.start_question(QuestionId::new("q1")).unwrap();
        let state = controller.read_room().unwrap();
        let second_token = state.run_token.unwrap();
        assert_ne!(second_token, first_token);

        // The new run's ledger starts empty; the old one is untouched
        controller.tally_votes().unwrap();
        assert_eq!(controller.read_room().unwrap().votes, Some(vec![0, 0, 0, 0]));
    }

    #[test]
    fn intro_empties_the_superseded_ledger() {
        let (store, controller) = setup();
        seed_question(&store, "q1", 4);
        seed_question(&store, "q2", 4);
        let player = seed_player(&store, "Alice", 0);

        controller.start_question(QuestionId::new("q1")).unwrap();
        let token = controller.read_room().unwrap().run_token.unwrap();
        submit(&store, &token, player, 1, 101_000);

        controller.show_intro(QuestionId::new("q2")).unwrap();

        let ledger = store
            .read_once(&DocumentPath::AnswerLedger(room(), token))
            .unwrap()
            .unwrap();
        assert_eq!(ledger, json!({}));
    }

    #[test]
    fn tally_votes_counts_the_active_ledger() {
        let (store, controller) = setup();
        seed_question(&store, "q1", 4);
        let a = seed_player(&store, "Alice", 0);
        let b = seed_player(&store, "Bob", 0);
        let c = seed_player(&store, "Carol", 0);

        controller.start_question(QuestionId::new("q1")).unwrap();
        let token = controller.read_room().unwrap().run_token.unwrap();
        submit(&store, &token, a, 2, 101_000);
        submit(&store, &token, b, 2, 102_000);
        submit(&store, &token, c, 0, 103_000);

        controller.tally_votes().unwrap();
        let state = controller.read_room().unwrap();
        assert_eq!(state.phase, Phase::Votes);
        assert_eq!(state.votes, Some(vec![1, 0, 2, 0]));
    }

    #[test]
    fn votes_without_an_active_run_are_rejected() {
        let (_store, controller) = setup();
        assert!(matches!(controller.tally_votes(), Err(Error::NoActiveRun)));
    }

    #[test]
    fn scoring_awards_flat_plus_podium() {
        let (store, controller) = setup();
        seed_question(&store, "q1", 4);
        let players = ["Alice", "Bob", "Carol", "Dave"]
            .map(|name| seed_player(&store, name, 0));

        controller.start_question(QuestionId::new("q1")).unwrap();
        let token = controller.read_room().unwrap().run_token.unwrap();
        for (player, elapsed) in players.iter().zip([50_i64, 120, 300, 900]) {
            submit(&store, &token, *player, 1, 100_000 + elapsed);
        }

        controller.reveal(1).unwrap();
        controller.show_ranking().unwrap();

        assert_eq!(player_score(&store, players[0]), 15);
        assert_eq!(player_score(&store, players[1]), 13);
        assert_eq!(player_score(&store, players[2]), 11);
        assert_eq!(player_score(&store, players[3]), 10);

        let state = controller.read_room().unwrap();
        assert_eq!(state.phase, Phase::Ranking);
        let ranking = state.ranking.unwrap();
        assert_eq!(ranking.total(), 4);
        assert_eq!(ranking.entries()[0].name, "Alice");
        assert_eq!(ranking.entries()[0].elapsed_ms, 50);
        assert_eq!(ranking.entries()[3].rank, 4);
    }

    #[test]
    fn scoring_is_idempotent_per_run() {
        let (store, controller) = setup();
        seed_question(&store, "q1", 4);
        let player = seed_player(&store, "Alice", 0);

        controller.start_question(QuestionId::new("q1")).unwrap();
        let token = controller.read_room().unwrap().run_token.unwrap();
        submit(&store, &token, player, 1, 100_500);

        controller.reveal(1).unwrap();
        controller.show_ranking().unwrap();
        assert_eq!(player_score(&store, player), 15);

        // Re-invoking the scorer republishes the ranking without re-awarding
        controller.show_ranking().unwrap();
        assert_eq!(player_score(&store, player), 15);
        let ranking = controller.read_room().unwrap().ranking.unwrap();
        assert_eq!(ranking.total(), 1);
    }

    #[test]
    fn late_answers_earn_nothing() {
        let (store, controller) = setup();
        seed_question(&store, "q1", 4);
        let on_time = seed_player(&store, "Alice", 0);
        let late = seed_player(&store, "Bob", 0);

        controller.start_question(QuestionId::new("q1")).unwrap();
        let token = controller.read_room().unwrap().run_token.unwrap();
        let deadline = controller.read_room().unwrap().deadline_ms.unwrap();
        submit(&store, &token, on_time, 1, deadline);
        submit(&store, &token, late, 1, deadline + 1);

        controller.reveal(1).unwrap();
        controller.show_ranking().unwrap();

        assert_eq!(player_score(&store, on_time), 15);
        assert_eq!(player_score(&store, late), 0);
        assert_eq!(controller.read_room().unwrap().ranking.unwrap().total(), 1);
    }

    #[test]
    fn ranking_requires_a_revealed_option() {
        let (store, controller) = setup();
        seed_question(&store, "q1", 4);
        controller.start_question(QuestionId::new("q1")).unwrap();

        assert!(matches!(controller.show_ranking(), Err(Error::NotRevealed)));
    }

    #[test]
    fn full_cycle_reaches_every_phase() {
        let (store, controller) = setup();
        seed_question(&store, "q1", 4);
        seed_player(&store, "Alice", 0);

        controller.show_intro(QuestionId::new("q1")).unwrap();
        assert_eq!(controller.read_room().unwrap().phase, Phase::Intro);

        controller.start_question(QuestionId::new("q1")).unwrap();
        controller.tally_votes().unwrap();
        controller.reveal(0).unwrap();
        controller.show_ranking().unwrap();
        controller.show_final_ranking().unwrap();

        let state = controller.read_room().unwrap();
        assert_eq!(state.phase, Phase::Final);
        assert!(state.run_token.is_none());
        assert_eq!(state.final_ranking.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn final_ranking_orders_by_score_then_name() {
        let (store, controller) = setup();
        seed_player(&store, "Bob", 25);
        seed_player(&store, "Alice", 25);
        seed_player(&store, "Carol", 40);

        controller.show_final_ranking().unwrap();

        let state = controller.read_room().unwrap();
        let standings = state.final_ranking.unwrap();
        assert_eq!(standings.len(), 3);
        assert_eq!(
            (standings[0].rank, standings[0].name.as_str(), standings[0].total_score),
            (1, "Carol", 40)
        );
        assert_eq!(standings[1].name, "Alice");
        assert_eq!(standings[2].name, "Bob");
    }

    #[test]
    fn final_ranking_is_recomputed_from_the_registry() {
        let (store, controller) = setup();
        let player = seed_player(&store, "Alice", 10);

        controller.show_final_ranking().unwrap();
        assert_eq!(
            controller.read_room().unwrap().final_ranking.unwrap()[0].total_score,
            10
        );

        // A score write landing after the first computation is picked up
        store
            .merge_write(&DocumentPath::Player(room(), player), json!({ "score": 23 }))
            .unwrap();
        controller.show_final_ranking().unwrap();
        assert_eq!(
            controller.read_room().unwrap().final_ranking.unwrap()[0].total_score,
            23
        );
    }

    #[test]
    fn reset_returns_to_waiting_but_keeps_scored_runs() {
        let (store, controller) = setup();
        seed_question(&store, "q1", 4);
        seed_player(&store, "Alice", 0);

        controller.start_question(QuestionId::new("q1")).unwrap();
        let token = controller.read_room().unwrap().run_token.unwrap();
        controller.reveal(0).unwrap();
        controller.show_ranking().unwrap();
        controller.reset().unwrap();

        let state = controller.read_room().unwrap();
        assert_eq!(state.phase, Phase::Waiting);
        assert!(state.scored_runs.contains(&token));
    }

    #[test]
    fn malformed_room_document_reads_as_idle() {
        let (store, controller) = setup();
        store
            .replace_write(&DocumentPath::Room(room()), json!({ "phase": "no-such-phase" }))
            .unwrap();

        let state = controller.read_room().unwrap();
        assert_eq!(state, RoomState::default());
    }

    #[test]
    fn transitions_reach_subscribers() {
        let (store, controller) = setup();
        seed_question(&store, "q1", 4);

        let phases = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = std::sync::Arc::clone(&phases);
        let handle = store.subscribe(DocumentPath::Room(room()), move |snapshot| {
            if let Some(document) = snapshot {
                if let Ok(state) = serde_json::from_value::<RoomState>(document) {
                    sink.lock().unwrap().push(state.phase);
                }
            }
        });

        controller.show_intro(QuestionId::new("q1")).unwrap();
        controller.start_question(QuestionId::new("q1")).unwrap();
        handle.unsubscribe();

        assert_eq!(*phases.lock().unwrap(), vec![Phase::Intro, Phase::Question]);
    }
}
