// Match Validation
//
// Structural checks run before any state is touched. A record that
// passes here can always be decomposed; whether its players and
// tournament exist is checked against the standings by the store.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::EngineConfig;
use crate::log::{MatchKind, MatchRecord};
use crate::ranking;

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]{3,20}$").expect("static name pattern"));

/// Reasons a submission or registration is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("tournament name is required")]
    MissingTournament,

    #[error("at least 2 players are required, got {found}")]
    InsufficientPlayers { found: usize },

    #[error("player {0} appears more than once")]
    DuplicatePlayer(String),

    #[error("a two-player match takes exactly 2 players, got {found}")]
    TooManyPlayers { found: usize },

    #[error("winner and loser must be different players")]
    SamePlayer,

    #[error("slots 1 and 2 must both be filled")]
    IncompleteMatch,

    #[error("slot {position} is filled after an empty slot")]
    NonContiguousEntry { position: usize },

    #[error("slot {position} has a player without a score or a score without a player")]
    PartialSlot { position: usize },

    #[error("at most {max} slots are allowed, got {found}")]
    TooManySlots { found: usize, max: usize },

    #[error("slot {position} has a non-finite score")]
    InvalidScore { position: usize },

    #[error("expected {expected} draw flags, got {found}")]
    DrawFlagsMismatch { expected: usize, found: usize },

    #[error("`{0}` is not a valid name (3-20 letters, digits or underscores)")]
    InvalidName(String),

    #[error("`{0}` is already registered")]
    AlreadyRegistered(String),

    #[error("only two-player matches can be switched")]
    SwitchUnsupported,
}

/// Check a user or tournament name against the registration rule.
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if NAME_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::InvalidName(name.to_string()))
    }
}

/// Structural validator for match records.
#[derive(Debug, Clone)]
pub struct MatchValidator {
    max_scored_slots: usize,
}

impl MatchValidator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_scored_slots: config.max_scored_slots,
        }
    }

    /// Validate a record. Stops at the first failure.
    pub fn validate(&self, record: &MatchRecord) -> Result<(), ValidationError> {
        self.validate_tournament(record)?;

        match &record.kind {
            MatchKind::TwoPlayer { players, .. } => {
                let found = players.iter().filter(|name| !name.is_empty()).count();
                if found < 2 {
                    return Err(ValidationError::InsufficientPlayers { found });
                }
                if players[0] == players[1] {
                    return Err(ValidationError::SamePlayer);
                }
            }
            MatchKind::FreeForAll { ranking, draws } => {
                if ranking.len() < 2 {
                    return Err(ValidationError::InsufficientPlayers {
                        found: ranking.len(),
                    });
                }
                ensure_distinct(ranking.iter().map(String::as_str))?;

                let expected = ranking.len() - 1;
                if !draws.is_empty() && draws.len() != expected {
                    return Err(ValidationError::DrawFlagsMismatch {
                        expected,
                        found: draws.len(),
                    });
                }
            }
            MatchKind::Scored { slots } => {
                if slots.len() > self.max_scored_slots {
                    return Err(ValidationError::TooManySlots {
                        found: slots.len(),
                        max: self.max_scored_slots,
                    });
                }
                if let Some(index) = slots
                    .iter()
                    .position(|slot| matches!(slot, Some(entry) if entry.player.is_empty()))
                {
                    return Err(ValidationError::PartialSlot { position: index + 1 });
                }

                ranking::assign_ranks(slots)?;
                ensure_distinct(slots.iter().flatten().map(|entry| entry.player.as_str()))?;
            }
        }

        Ok(())
    }

    fn validate_tournament(&self, record: &MatchRecord) -> Result<(), ValidationError> {
        match (&record.tournament, &record.kind) {
            (Some(name), _) if name.trim().is_empty() => Err(ValidationError::MissingTournament),
            (None, MatchKind::FreeForAll { .. } | MatchKind::Scored { .. }) => {
                Err(ValidationError::MissingTournament)
            }
            _ => Ok(()),
        }
    }
}

fn ensure_distinct<'a>(names: impl Iterator<Item = &'a str>) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ValidationError::DuplicatePlayer(name.to_string()));
        }
    }
    Ok(())
}
