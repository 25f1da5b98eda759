//! Configuration constants for the quiz room
//!
//! This module groups the tunables used across the coordination core:
//! the answer window, scoring awards, ranking limits, and the bounds
//! enforced on question content and participant names.

/// Room-level constants
pub mod room {
    /// Length of the answer window in milliseconds, measured from the start
    /// of a question run
    pub const ANSWER_WINDOW_MS: i64 = 10_000;
    /// Maximum number of participants allowed in a single room
    pub const MAX_PLAYER_COUNT: usize = 1000;
}

/// Scoring constants
pub mod scoring {
    /// Flat points awarded to every correct responder within the deadline
    pub const CORRECT_AWARD: u64 = 10;
    /// Extra points for the fastest correct responders, by rank
    pub const PODIUM_BONUS: [u64; 3] = [5, 3, 1];
    /// Number of entries retained in the per-question ranking
    pub const RANKING_LIMIT: usize = 10;
}

/// Question content constraints
pub mod question {
    /// Minimum number of answer options for a question
    pub const MIN_OPTION_COUNT: usize = 2;
    /// Maximum number of answer options for a question
    pub const MAX_OPTION_COUNT: usize = 8;
    /// Maximum length of the question text in characters
    pub const MAX_TEXT_LENGTH: usize = 200;
    /// Maximum length of a single answer option in characters
    pub const MAX_OPTION_LENGTH: usize = 100;
}

/// Participant name constraints
pub mod name {
    /// Maximum length of a display name in bytes
    pub const MAX_LENGTH: usize = 30;
}

/// Display client constants
pub mod display {
    /// Interval between ranking reveal steps in milliseconds
    ///
    /// Presentation pacing only; correctness never depends on this value.
    pub const RANKING_REVEAL_TICK_MS: i64 = 800;
}
