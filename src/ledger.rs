//! Per-run answer ledger
//!
//! Every question run writes answers into a ledger document keyed by
//! participant id, one entry per participant, so concurrent submissions from
//! different participants never clobber each other under field-level merge
//! writes. The ledger is read back by the host to tally votes and to find
//! the fastest correct responders.

use std::collections::HashMap;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{clock::UnixMillis, player::PlayerId};

/// One participant's answer for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecord {
    /// 0-based index of the chosen option
    pub selected_option: usize,
    /// Submission timestamp, server basis
    pub submitted_at_ms: UnixMillis,
}

/// All answers recorded for a single run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnswerLedger(HashMap<PlayerId, AnswerRecord>);

impl AnswerLedger {
    /// Parses a ledger from a raw document snapshot
    ///
    /// A missing document is an empty ledger. Entries that do not parse as
    /// answer records are skipped rather than failing the whole read, since
    /// one malformed write must not block the host from tallying the rest.
    pub fn from_document(document: Option<Value>) -> Self {
        let Some(Value::Object(fields)) = document else {
            return Self::default();
        };
        Self(
            fields
                .into_iter()
                .filter_map(|(key, value)| {
                    let id = key.parse().ok()?;
                    let record = serde_json::from_value(value).ok()?;
                    Some((id, record))
                })
                .collect(),
        )
    }

    /// Records one participant's answer, replacing any previous entry
    pub fn record(&mut self, player: PlayerId, answer: AnswerRecord) {
        self.0.insert(player, answer);
    }

    /// The recorded answer of one participant, if any
    pub fn get(&self, player: &PlayerId) -> Option<&AnswerRecord> {
        self.0.get(player)
    }

    /// Number of answers recorded
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no answers have been recorded
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Counts answers per option as a dense 0-indexed vector
    ///
    /// Selections outside `0..option_count` are ignored.
    pub fn tally(&self, option_count: usize) -> Vec<u64> {
        let counts = self
            .0
            .values()
            .map(|answer| answer.selected_option)
            .filter(|option| *option < option_count)
            .counts();
        (0..option_count)
            .map(|option| counts.get(&option).copied().unwrap_or(0) as u64)
            .collect()
    }

    /// Finds participants who picked `correct_option` no later than the
    /// host's deadline, with their elapsed time from the run start
    ///
    /// Returned fastest first; ties on elapsed time break on participant id
    /// so the podium is deterministic.
    pub fn correct_responders(
        &self,
        correct_option: usize,
        start_at_ms: UnixMillis,
        deadline_ms: UnixMillis,
    ) -> Vec<(PlayerId, i64)> {
        self.0
            .iter()
            .filter(|(_, answer)| {
                answer.selected_option == correct_option && answer.submitted_at_ms <= deadline_ms
            })
            .map(|(player, answer)| (*player, (answer.submitted_at_ms - start_at_ms).max(0)))
            .sorted_by_key(|(player, elapsed)| (*elapsed, player.to_string()))
            .collect()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn answer(option: usize, at: UnixMillis) -> AnswerRecord {
        AnswerRecord {
            selected_option: option,
            submitted_at_ms: at,
        }
    }

    #[test]
    fn missing_document_is_empty() {
        assert!(AnswerLedger::from_document(None).is_empty());
        assert!(AnswerLedger::from_document(Some(json!({}))).is_empty());
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let good = PlayerId::new();
        let document = json!({
            good.to_string(): { "selectedOption": 1, "submittedAtMs": 5_000 },
            "not-a-uuid": { "selectedOption": 0, "submittedAtMs": 5_000 },
            Uuid::new_v4().to_string(): "garbage",
        });
        let ledger = AnswerLedger::from_document(Some(document));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get(&good), Some(&answer(1, 5_000)));
    }

    #[test]
    fn tally_is_dense_and_ignores_out_of_range() {
        let mut ledger = AnswerLedger::default();
        ledger.record(PlayerId::new(), answer(0, 1_000));
        ledger.record(PlayerId::new(), answer(2, 1_100));
        ledger.record(PlayerId::new(), answer(2, 1_200));
        ledger.record(PlayerId::new(), answer(9, 1_300));

        assert_eq!(ledger.tally(4), vec![1, 0, 2, 0]);
    }

    #[test]
    fn resubmission_replaces_the_previous_answer() {
        let player = PlayerId::new();
        let mut ledger = AnswerLedger::default();
        ledger.record(player, answer(0, 1_000));
        ledger.record(player, answer(3, 2_000));

        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get(&player), Some(&answer(3, 2_000)));
    }

    #[test]
    fn correct_responders_ordered_fastest_first() {
        let fast = PlayerId::new();
        let slow = PlayerId::new();
        let wrong = PlayerId::new();
        let mut ledger = AnswerLedger::default();
        ledger.record(fast, answer(1, 10_500));
        ledger.record(slow, answer(1, 12_000));
        ledger.record(wrong, answer(0, 10_100));

        let responders = ledger.correct_responders(1, 10_000, 20_000);
        assert_eq!(responders, vec![(fast, 500), (slow, 2_000)]);
    }

    #[test]
    fn late_answers_are_not_eligible() {
        let on_time = PlayerId::new();
        let late = PlayerId::new();
        let mut ledger = AnswerLedger::default();
        ledger.record(on_time, answer(0, 20_000));
        ledger.record(late, answer(0, 20_001));

        let responders = ledger.correct_responders(0, 10_000, 20_000);
        assert_eq!(responders, vec![(on_time, 10_000)]);
    }

    #[test]
    fn elapsed_is_clamped_to_zero() {
        let player = PlayerId::new();
        let mut ledger = AnswerLedger::default();
        // Submitted-at before the recorded start can happen under skewed
        // writes; elapsed never goes negative.
        ledger.record(player, answer(0, 9_000));

        let responders = ledger.correct_responders(0, 10_000, 20_000);
        assert_eq!(responders, vec![(player, 0)]);
    }
}
