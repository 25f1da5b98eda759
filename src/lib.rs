//! # Quizroom Coordination Library
//!
//! This library provides the coordination core for a live, multi-screen quiz
//! room synchronized through an external real-time document store. It covers
//! the phase-sequenced room state machine, answer collection and
//! first-correct-wins scoring, leaderboard computation, and the deadline
//! reconciliation that keeps independently-running clients (host, shared
//! display, participants) consistent under clock skew and delivery latency.
//!
//! Rendering, styling, and the transport behind the store are out of scope:
//! clients consume raw document snapshots and expose derived view state.

#![cfg_attr(all(coverage_nightly, test), feature(coverage_attribute))]
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]

use derive_where::derive_where;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

pub mod clock;
pub mod constants;
pub mod display;
pub mod host;
pub mod ledger;
pub mod participant;
pub mod player;
pub mod question;
pub mod room;
pub mod store;

/// The role a client plays in the room
///
/// The role is an explicit bootstrap parameter: each process declares what it
/// is when it connects instead of inferring it from its surroundings. Exactly
/// one host exists per room; it is the only writer of room state and of
/// registry scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Drives phase transitions and performs scoring
    Host,
    /// Shared screen; purely reactive to room state
    Display,
    /// Joins, answers, and self-enforces the answer deadline
    Participant,
}

/// An ordered list truncated to a display limit while keeping the exact count
///
/// Used for the per-question ranking: only the top entries are stored in the
/// room document, but the total number of qualifying participants is
/// preserved so the display can say "10 of 27 shown".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[derive_where(Default)]
pub struct TopList<T> {
    /// The exact number of qualifying entries before truncation
    total: usize,
    /// The retained entries, best first
    entries: Vec<T>,
}

impl<T> TopList<T> {
    /// Builds a top list from an ordered iterator
    ///
    /// # Arguments
    ///
    /// * `ordered` - Entries in rank order, best first
    /// * `limit` - Maximum number of entries to retain
    /// * `total` - The exact count before truncation (may exceed `limit`)
    pub fn new<I: IntoIterator<Item = T>>(ordered: I, limit: usize, total: usize) -> Self {
        let entries = ordered.into_iter().take(limit).collect_vec();
        Self { total, entries }
    }

    /// Returns the exact count of qualifying entries before truncation
    pub fn total(&self) -> usize {
        self.total
    }

    /// Returns the retained entries, best first
    pub fn entries(&self) -> &[T] {
        &self.entries
    }

    /// Maps a function over the retained entries
    pub fn map<F, U>(self, f: F) -> TopList<U>
    where
        F: Fn(T) -> U,
    {
        TopList {
            total: self.total,
            entries: self.entries.into_iter().map(f).collect_vec(),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn top_list_truncates_but_keeps_total() {
        let list = TopList::new(vec![1, 2, 3, 4, 5], 3, 5);

        assert_eq!(list.total(), 5);
        assert_eq!(list.entries(), &[1, 2, 3]);
    }

    #[test]
    fn top_list_limit_larger_than_entries() {
        let list = TopList::new(vec![1, 2, 3], 10, 3);

        assert_eq!(list.total(), 3);
        assert_eq!(list.entries(), &[1, 2, 3]);
    }

    #[test]
    fn top_list_empty() {
        let list: TopList<i32> = TopList::new(vec![], 10, 0);

        assert_eq!(list.total(), 0);
        assert!(list.entries().is_empty());
    }

    #[test]
    fn top_list_map_preserves_total() {
        let list = TopList::new(vec![1, 2, 3], 2, 3).map(|x| x * 10);

        assert_eq!(list.total(), 3);
        assert_eq!(list.entries(), &[10, 20]);
    }

    #[test]
    fn top_list_serde_round_trip() {
        let list = TopList::new(vec!["a".to_owned(), "b".to_owned()], 10, 2);
        let json = serde_json::to_string(&list).unwrap();
        let back: TopList<String> = serde_json::from_str(&json).unwrap();

        assert_eq!(back, list);
    }

    #[test]
    fn role_wire_names() {
        assert_eq!(serde_json::to_string(&Role::Host).unwrap(), "\"host\"");
        assert_eq!(
            serde_json::to_string(&Role::Participant).unwrap(),
            "\"participant\""
        );
    }
}
