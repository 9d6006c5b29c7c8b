// Deterministic Replay Engine
//
// Folds the match log into standings while enforcing invariants.
// Replaying the same log always yields the same ratings and histories.

use log::debug;

use crate::config::EngineConfig;
use crate::invariants::{InvariantEngine, InvariantViolation};
use crate::log::{MatchKey, MatchLog};
use crate::state::{StateError, Standings};
use crate::validate::{MatchValidator, ValidationError};

/// Errors that can occur during replay.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("standings error: {0}")]
    State(#[from] StateError),

    #[error("invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error("logged match {key} is malformed: {source}")]
    InvalidRecord {
        key: MatchKey,
        #[source]
        source: ValidationError,
    },

    #[error("cannot replay from position {position}: the log holds {len} matches")]
    PositionOutOfRange { position: usize, len: usize },
}

/// Replay the whole log from empty standings.
///
/// This is the only supported way to derive standings from scratch.
pub fn replay_standings(
    log: &MatchLog,
    config: &EngineConfig,
    invariants: &InvariantEngine,
) -> Result<Standings, ReplayError> {
    let mut standings = Standings::seeded(log, config);
    replay_from(&mut standings, log, 0, config, invariants)?;
    Ok(standings)
}

/// Rewind `standings` to `position` and fold the rest of the log.
///
/// Every folded record is validated again, so a hand-edited log cannot
/// smuggle in a match the store would have rejected. The first `position`
/// folded matches must equal the first `position` entries of `log`. On error `standings` is left partially replayed and
/// must be discarded.
pub fn replay_from(
    standings: &mut Standings,
    log: &MatchLog,
    position: usize,
    config: &EngineConfig,
    invariants: &InvariantEngine,
) -> Result<(), ReplayError> {
    let remaining = log
        .matches()
        .get(position..)
        .ok_or(ReplayError::PositionOutOfRange {
            position,
            len: log.len(),
        })?;

    standings.rewind(position)?;
    let validator = MatchValidator::new(config);

    for entry in remaining {
        validator
            .validate(&entry.record)
            .map_err(|source| ReplayError::InvalidRecord {
                key: entry.key,
                source,
            })?;

        let previous = standings.roster().clone();
        standings.apply(entry, config)?;

        if let Some(applied) = standings.committed().last() {
            invariants.evaluate(&previous, applied, standings)?;
        }

        debug!("replayed match {} (sequence {})", entry.key, entry.sequence);
    }

    Ok(())
}
