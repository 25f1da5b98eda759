//! Participant identity and the player registry
//!
//! Each participant is identified by a random [`PlayerId`] minted on first
//! join and persisted on the device, so reloading the page resumes the same
//! identity rather than creating a fresh one. The registry keeps one
//! document per participant with the display name and accumulated score.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;
use uuid::Uuid;

use crate::{clock::UnixMillis, constants};

/// Stable identity of one participant
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr,
)]
pub struct PlayerId(Uuid);

impl PlayerId {
    /// Mints a fresh random identity
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for PlayerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// One participant's document in the player registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    /// Display name shown in rankings
    pub name: String,
    /// Accumulated score across the session
    #[serde(default)]
    pub score: u64,
    /// When this participant first joined, server basis
    #[serde(default)]
    pub joined_at_ms: UnixMillis,
}

/// Errors rejecting a proposed display name
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    /// Name is empty after trimming
    #[error("name is empty")]
    Empty,
    /// Name exceeds the length cap
    #[error("name is too long")]
    TooLong,
    /// Name contains inappropriate content
    #[error("name is inappropriate")]
    Inappropriate,
}

/// Checks a proposed display name, returning the trimmed form
pub fn validate_name(name: &str) -> Result<String, NameError> {
    use rustrict::CensorStr;

    let name = rustrict::trim_whitespace(name);
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    if name.len() > constants::name::MAX_LENGTH {
        return Err(NameError::TooLong);
    }
    if name.is_inappropriate() {
        return Err(NameError::Inappropriate);
    }
    Ok(name.to_owned())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn player_id_round_trips_as_string() {
        let id = PlayerId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: PlayerId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn player_ids_are_unique() {
        assert_ne!(PlayerId::new(), PlayerId::new());
    }

    #[test]
    fn names_are_trimmed() {
        assert_eq!(validate_name("  Alice  "), Ok("Alice".to_owned()));
    }

    #[test]
    fn empty_names_rejected() {
        assert_eq!(validate_name(""), Err(NameError::Empty));
        assert_eq!(validate_name("   "), Err(NameError::Empty));
    }

    #[test]
    fn oversized_names_rejected() {
        let name = "a".repeat(constants::name::MAX_LENGTH + 1);
        assert_eq!(validate_name(&name), Err(NameError::TooLong));
    }

    #[test]
    fn inappropriate_names_rejected() {
        assert_eq!(validate_name("shit"), Err(NameError::Inappropriate));
    }

    #[test]
    fn record_defaults_missing_fields() {
        let record: PlayerRecord = serde_json::from_str(r#"{"name":"Alice"}"#).unwrap();
        assert_eq!(record.score, 0);
        assert_eq!(record.joined_at_ms, 0);
    }
}
