// Submission Payloads
//
// Wire shapes of match submissions as sent by a presentation layer, and
// their conversion into log records. Conversion only reshapes the data;
// the match rules themselves are enforced by the validator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::log::{MatchKind, MatchRecord, ScoredEntry};
use crate::validate::ValidationError;

/// A match submission, tagged by `Kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Kind")]
pub enum MatchPayload {
    /// `Players` is `[winner, loser]`. `Draws` holds at most one flag.
    #[serde(rename_all = "PascalCase")]
    TwoPlayer {
        #[serde(default)]
        tournament: Option<String>,
        players: Vec<String>,
        #[serde(default)]
        draws: Vec<bool>,
        #[serde(default)]
        note: String,
    },

    /// `Ranking` runs best to worst.
    #[serde(rename_all = "PascalCase")]
    FreeForAll {
        #[serde(default)]
        tournament: Option<String>,
        ranking: Vec<String>,
        #[serde(default)]
        draws: Vec<bool>,
        #[serde(default)]
        note: String,
    },

    /// Slot `i` is `Ranking[i]` with `Scores[i]`. An empty name with no
    /// score is an empty slot.
    #[serde(rename_all = "PascalCase")]
    Scored {
        #[serde(default)]
        tournament: Option<String>,
        ranking: Vec<String>,
        scores: Vec<Option<f64>>,
        #[serde(default)]
        note: String,
    },
}

impl MatchPayload {
    /// Build the log record for this submission.
    pub fn into_record(
        self,
        submitter: &str,
        date: DateTime<Utc>,
    ) -> Result<MatchRecord, ValidationError> {
        let (tournament, note, kind) = match self {
            MatchPayload::TwoPlayer {
                tournament,
                players,
                draws,
                note,
            } => {
                if draws.len() > 1 {
                    return Err(ValidationError::DrawFlagsMismatch {
                        expected: 1,
                        found: draws.len(),
                    });
                }
                let players: [String; 2] = match <[String; 2]>::try_from(players) {
                    Ok(players) => players,
                    Err(players) if players.len() < 2 => {
                        return Err(ValidationError::InsufficientPlayers {
                            found: players.len(),
                        })
                    }
                    Err(players) => {
                        return Err(ValidationError::TooManyPlayers {
                            found: players.len(),
                        })
                    }
                };
                let draw = draws.first().copied().unwrap_or(false);
                (tournament, note, MatchKind::TwoPlayer { players, draw })
            }
            MatchPayload::FreeForAll {
                tournament,
                ranking,
                draws,
                note,
            } => (tournament, note, MatchKind::FreeForAll { ranking, draws }),
            MatchPayload::Scored {
                tournament,
                ranking,
                scores,
                note,
            } => {
                let slots = scored_slots(&ranking, &scores)?;
                (tournament, note, MatchKind::Scored { slots })
            }
        };

        Ok(MatchRecord {
            tournament: tournament.filter(|name| !name.trim().is_empty()),
            submitter: submitter.to_string(),
            date,
            note,
            kind,
        })
    }
}

fn scored_slots(
    ranking: &[String],
    scores: &[Option<f64>],
) -> Result<Vec<Option<ScoredEntry>>, ValidationError> {
    let len = ranking.len().max(scores.len());

    (0..len)
        .map(|i| {
            let player = ranking.get(i).map(|name| name.trim()).unwrap_or("");
            let score = scores.get(i).copied().flatten();

            match (player.is_empty(), score) {
                (true, None) => Ok(None),
                (false, Some(score)) => Ok(Some(ScoredEntry {
                    player: player.to_string(),
                    score,
                })),
                _ => Err(ValidationError::PartialSlot { position: i + 1 }),
            }
        })
        .collect()
}
