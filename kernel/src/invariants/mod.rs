// Invariant Framework
//
// Invariants are pure rules that must hold across every committed match.
// They run on the working copy before it is published, so a violation
// is caught before any reader can observe it.

use crate::state::{CommittedMatch, Roster, Standings};

/// Result of invariant evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantResult {
    Pass,
    Fail(String),
}

/// Trait implemented by all invariants.
///
/// Invariants must be:
/// - Pure
/// - Deterministic
/// - Side-effect free
pub trait Invariant: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(
        &self,
        previous: &Roster,
        applied: &CommittedMatch,
        next: &Standings,
    ) -> InvariantResult;
}

/// Invariant engine that evaluates a set of invariants.
#[derive(Default)]
pub struct InvariantEngine {
    invariants: Vec<Box<dyn Invariant>>,
}

impl InvariantEngine {
    /// Create an engine with no invariants.
    pub fn new() -> Self {
        Self {
            invariants: Vec::new(),
        }
    }

    /// Engine with every built-in rating invariant registered.
    pub fn standard() -> Self {
        let mut engine = Self::new();
        engine.register(SnapshotBeforeApply);
        engine.register(ZeroSumRatings);
        engine.register(BystandersUnchanged);
        engine.register(HistoryTracksRating);
        engine
    }

    /// Register an invariant.
    pub fn register<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }

    /// Evaluate all invariants.
    ///
    /// Stops at the first failure.
    pub fn evaluate(
        &self,
        previous: &Roster,
        applied: &CommittedMatch,
        next: &Standings,
    ) -> Result<(), InvariantViolation> {
        for invariant in &self.invariants {
            match invariant.validate(previous, applied, next) {
                InvariantResult::Pass => continue,
                InvariantResult::Fail(reason) => {
                    return Err(InvariantViolation {
                        invariant: invariant.name(),
                        reason,
                    })
                }
            }
        }
        Ok(())
    }
}

/// Returned when an invariant is violated.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invariant `{invariant}` violated: {reason}")]
pub struct InvariantViolation {
    pub invariant: &'static str,
    pub reason: String,
}

const TOLERANCE: f64 = 1e-6;

/// Every participant's starting rating is the rating they held before the match.
pub struct SnapshotBeforeApply;

impl Invariant for SnapshotBeforeApply {
    fn name(&self) -> &'static str {
        "snapshot-before-apply"
    }

    fn validate(
        &self,
        previous: &Roster,
        applied: &CommittedMatch,
        _next: &Standings,
    ) -> InvariantResult {
        for result in &applied.participants {
            match previous.user(&result.player) {
                Some(user) if user.rating == result.rating_before => {}
                Some(user) => {
                    return InvariantResult::Fail(format!(
                        "{} started at {} but held {}",
                        result.player, result.rating_before, user.rating
                    ))
                }
                None => {
                    return InvariantResult::Fail(format!(
                        "{} was not rated before",
                        result.player
                    ))
                }
            }
        }
        InvariantResult::Pass
    }
}

/// Rating points are only exchanged, never created or destroyed.
pub struct ZeroSumRatings;

impl Invariant for ZeroSumRatings {
    fn name(&self) -> &'static str {
        "zero-sum-ratings"
    }

    fn validate(
        &self,
        previous: &Roster,
        _applied: &CommittedMatch,
        next: &Standings,
    ) -> InvariantResult {
        let drift = next.total_rating() - previous.total_rating();
        if drift.abs() > TOLERANCE {
            InvariantResult::Fail(format!("total rating drifted by {drift}"))
        } else {
            InvariantResult::Pass
        }
    }
}

/// Users outside the match keep their rating and record.
pub struct BystandersUnchanged;

impl Invariant for BystandersUnchanged {
    fn name(&self) -> &'static str {
        "bystanders-unchanged"
    }

    fn validate(
        &self,
        previous: &Roster,
        applied: &CommittedMatch,
        next: &Standings,
    ) -> InvariantResult {
        for user in next.users() {
            if applied.participant(&user.name).is_some() {
                continue;
            }
            if previous.user(&user.name) != Some(user) {
                return InvariantResult::Fail(format!("{} changed without playing", user.name));
            }
        }
        InvariantResult::Pass
    }
}

/// The newest history entry of each participant is their current rating.
pub struct HistoryTracksRating;

impl Invariant for HistoryTracksRating {
    fn name(&self) -> &'static str {
        "history-tracks-rating"
    }

    fn validate(
        &self,
        _previous: &Roster,
        applied: &CommittedMatch,
        next: &Standings,
    ) -> InvariantResult {
        for result in &applied.participants {
            let rating = next.user(&result.player).map(|user| user.rating);
            let latest = next
                .history(&result.player)
                .and_then(|history| history.last());

            match (rating, latest) {
                (Some(rating), Some(entry))
                    if entry.rating == rating && entry.date == applied.record.date => {}
                _ => {
                    return InvariantResult::Fail(format!(
                        "history of {} does not end at the committed rating",
                        result.player
                    ))
                }
            }
        }
        InvariantResult::Pass
    }
}
