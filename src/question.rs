//! Question content documents
//!
//! Questions live in their own documents under the room and are referenced
//! from the room state by id. Clients that cannot find the referenced
//! document render a placeholder instead of failing; the content here is
//! validated on the authoring side before it is written.

use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::constants;

/// Identifier of a question within a room
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display)]
#[serde(transparent)]
pub struct QuestionId(String);

impl QuestionId {
    /// Wraps a question identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

/// Content of a single multiple-choice question
///
/// Options are addressed by 0-based index everywhere: in answer records, in
/// vote counts, and in the revealed correct option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Question {
    /// The question text shown on every screen
    #[garde(length(chars, max = constants::question::MAX_TEXT_LENGTH))]
    pub text: String,
    /// The answer options, in display order
    #[garde(
        length(min = constants::question::MIN_OPTION_COUNT, max = constants::question::MAX_OPTION_COUNT),
        inner(length(chars, max = constants::question::MAX_OPTION_LENGTH))
    )]
    pub options: Vec<String>,
}

impl Question {
    /// Number of answer options
    pub fn option_count(&self) -> usize {
        self.options.len()
    }

    /// Whether `option` is a valid 0-based option index for this question
    pub fn has_option(&self, option: usize) -> bool {
        option < self.options.len()
    }
}
