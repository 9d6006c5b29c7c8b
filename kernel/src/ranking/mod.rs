// Rank Assignment
//
// Converts the slots of a scored match into standard competition ranks.
// Equal scores share the better rank and the following rank is skipped:
// scores [10, 7, 7, 3] rank as [1, 2, 2, 4].

use crate::log::ScoredEntry;
use crate::validate::ValidationError;

/// A participant of a scored match with its derived rank (1 is best).
#[derive(Debug, Clone, PartialEq)]
pub struct RankedEntry {
    pub player: String,
    pub score: f64,
    pub rank: usize,
}

/// Check the contiguous-fill rule and return the populated prefix.
///
/// A filled slot after an empty one is `NonContiguousEntry`, reported at the
/// first such slot. Otherwise fewer than two filled slots is `IncompleteMatch`.
pub fn populated_slots(slots: &[Option<ScoredEntry>]) -> Result<Vec<&ScoredEntry>, ValidationError> {
    let filled = slots.iter().take_while(|slot| slot.is_some()).count();

    if let Some(offset) = slots[filled..].iter().position(Option::is_some) {
        return Err(ValidationError::NonContiguousEntry {
            position: filled + offset + 1,
        });
    }

    if filled < 2 {
        return Err(ValidationError::IncompleteMatch);
    }

    Ok(slots[..filled].iter().flatten().collect())
}

/// Assign competition ranks, returned in original slot order.
pub fn assign_ranks(slots: &[Option<ScoredEntry>]) -> Result<Vec<RankedEntry>, ValidationError> {
    let entries = populated_slots(slots)?;

    if let Some(index) = entries.iter().position(|entry| !entry.score.is_finite()) {
        return Err(ValidationError::InvalidScore { position: index + 1 });
    }

    let mut sorted: Vec<f64> = entries.iter().map(|entry| entry.score).collect();
    sorted.sort_by(|a, b| b.total_cmp(a));

    let ranked = entries
        .into_iter()
        .map(|entry| {
            let first = sorted
                .iter()
                .position(|score| *score == entry.score)
                .unwrap_or(0);
            RankedEntry {
                player: entry.player.clone(),
                score: entry.score,
                rank: first + 1,
            }
        })
        .collect();

    Ok(ranked)
}
