// Match Decomposition
//
// Expands any match record into the full set of pairwise outcomes
// consumed by the Elo updater, plus the placement of every participant.
// n participants always yield n * (n - 1) / 2 outcomes.

use serde::{Deserialize, Serialize};

use crate::elo::Score;
use crate::log::{MatchKind, MatchRecord};
use crate::ranking;
use crate::validate::ValidationError;

/// One two-party sub-result. `score` is from `player_a`'s side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairwiseOutcome {
    pub player_a: String,
    pub player_b: String,
    pub score: Score,
}

impl PairwiseOutcome {
    fn new(player_a: &str, player_b: &str, score: Score) -> Self {
        Self {
            player_a: player_a.to_string(),
            player_b: player_b.to_string(),
            score,
        }
    }
}

/// Final placement of a participant (1 is best, ties share a rank).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub player: String,
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decomposition {
    /// Participants in submission order.
    pub placements: Vec<Placement>,
    pub outcomes: Vec<PairwiseOutcome>,
}

/// Decompose a record into placements and pairwise outcomes.
pub fn decompose(record: &MatchRecord) -> Result<Decomposition, ValidationError> {
    match &record.kind {
        MatchKind::TwoPlayer { players, draw } => Ok(two_player(&players[0], &players[1], *draw)),
        MatchKind::FreeForAll { ranking, draws } => Ok(free_for_all(ranking, draws)),
        MatchKind::Scored { slots } => {
            let ranked = ranking::assign_ranks(slots)?;
            let placements = ranked
                .into_iter()
                .map(|entry| Placement {
                    player: entry.player,
                    rank: entry.rank,
                })
                .collect();
            Ok(from_placements(placements))
        }
    }
}

fn two_player(winner: &str, loser: &str, draw: bool) -> Decomposition {
    let (score, loser_rank) = if draw { (Score::Draw, 1) } else { (Score::Win, 2) };

    Decomposition {
        placements: vec![
            Placement {
                player: winner.to_string(),
                rank: 1,
            },
            Placement {
                player: loser.to_string(),
                rank: loser_rank,
            },
        ],
        outcomes: vec![PairwiseOutcome::new(winner, loser, score)],
    }
}

/// Adjacent draw flags only affect their own pair; every other pair
/// is a full win for the better-placed player.
fn free_for_all(ranking: &[String], draws: &[bool]) -> Decomposition {
    let tied_with_next = |i: usize| draws.get(i).copied().unwrap_or(false);

    let mut placements: Vec<Placement> = Vec::with_capacity(ranking.len());
    for (i, player) in ranking.iter().enumerate() {
        let rank = match placements.last() {
            Some(previous) if tied_with_next(i - 1) => previous.rank,
            _ => i + 1,
        };
        placements.push(Placement {
            player: player.clone(),
            rank,
        });
    }

    let mut outcomes = Vec::new();
    for i in 0..ranking.len() {
        for j in (i + 1)..ranking.len() {
            let score = if j == i + 1 && tied_with_next(i) {
                Score::Draw
            } else {
                Score::Win
            };
            outcomes.push(PairwiseOutcome::new(&ranking[i], &ranking[j], score));
        }
    }

    Decomposition {
        placements,
        outcomes,
    }
}

/// Equal ranks draw; otherwise the better rank wins. The better-ranked
/// player is always `player_a`; on a draw the earlier slot is.
fn from_placements(placements: Vec<Placement>) -> Decomposition {
    let mut outcomes = Vec::new();
    for (i, first) in placements.iter().enumerate() {
        for second in &placements[i + 1..] {
            let outcome = if first.rank == second.rank {
                PairwiseOutcome::new(&first.player, &second.player, Score::Draw)
            } else if first.rank < second.rank {
                PairwiseOutcome::new(&first.player, &second.player, Score::Win)
            } else {
                PairwiseOutcome::new(&second.player, &first.player, Score::Win)
            };
            outcomes.push(outcome);
        }
    }

    Decomposition {
        placements,
        outcomes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::ScoredEntry;
    use chrono::Utc;

    fn record(kind: MatchKind) -> MatchRecord {
        MatchRecord {
            tournament: Some("league".into()),
            submitter: "referee".into(),
            date: Utc::now(),
            note: String::new(),
            kind,
        }
    }

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn triples(decomposition: &Decomposition) -> Vec<(&str, &str, Score)> {
        decomposition
            .outcomes
            .iter()
            .map(|o| (o.player_a.as_str(), o.player_b.as_str(), o.score))
            .collect()
    }

    #[test]
    fn two_player_win_and_draw() {
        let win = decompose(&record(MatchKind::TwoPlayer {
            players: ["alice".into(), "bob".into()],
            draw: false,
        }))
        .unwrap();
        assert_eq!(triples(&win), vec![("alice", "bob", Score::Win)]);

        let draw = decompose(&record(MatchKind::TwoPlayer {
            players: ["alice".into(), "bob".into()],
            draw: true,
        }))
        .unwrap();
        assert_eq!(triples(&draw), vec![("alice", "bob", Score::Draw)]);
        assert_eq!(draw.placements[1].rank, 1);
    }

    #[test]
    fn free_for_all_expands_every_pair() {
        let result = decompose(&record(MatchKind::FreeForAll {
            ranking: names(&["a", "b", "c"]),
            draws: vec![],
        }))
        .unwrap();

        assert_eq!(
            triples(&result),
            vec![
                ("a", "b", Score::Win),
                ("a", "c", Score::Win),
                ("b", "c", Score::Win),
            ]
        );
    }

    #[test]
    fn free_for_all_pair_count() {
        for n in 2..8 {
            let ranking: Vec<String> = (0..n).map(|i| format!("p{i}")).collect();
            let result = decompose(&record(MatchKind::FreeForAll {
                ranking,
                draws: vec![],
            }))
            .unwrap();
            assert_eq!(result.outcomes.len(), n * (n - 1) / 2);
        }
    }

    #[test]
    fn adjacent_draw_does_not_propagate() {
        let result = decompose(&record(MatchKind::FreeForAll {
            ranking: names(&["a", "b", "c"]),
            draws: vec![true, true],
        }))
        .unwrap();

        assert_eq!(
            triples(&result),
            vec![
                ("a", "b", Score::Draw),
                ("a", "c", Score::Win),
                ("b", "c", Score::Draw),
            ]
        );
    }

    #[test]
    fn free_for_all_draw_shares_placement() {
        let result = decompose(&record(MatchKind::FreeForAll {
            ranking: names(&["a", "b", "c", "d"]),
            draws: vec![false, true, false],
        }))
        .unwrap();

        let ranks: Vec<_> = result.placements.iter().map(|p| p.rank).collect();
        assert_eq!(ranks, vec![1, 2, 2, 4]);
    }

    #[test]
    fn scored_match_uses_ranks() {
        let slot = |player: &str, score: f64| {
            Some(ScoredEntry {
                player: player.into(),
                score,
            })
        };
        let result = decompose(&record(MatchKind::Scored {
            slots: vec![slot("a", 7.0), slot("b", 10.0), slot("c", 7.0), None],
        }))
        .unwrap();

        assert_eq!(
            triples(&result),
            vec![
                ("b", "a", Score::Win),
                ("a", "c", Score::Draw),
                ("b", "c", Score::Win),
            ]
        );
    }

    #[test]
    fn scored_match_gap_fails() {
        let err = decompose(&record(MatchKind::Scored {
            slots: vec![
                Some(ScoredEntry {
                    player: "a".into(),
                    score: 1.0,
                }),
                None,
                Some(ScoredEntry {
                    player: "c".into(),
                    score: 2.0,
                }),
            ],
        }))
        .unwrap_err();

        assert_eq!(err, ValidationError::NonContiguousEntry { position: 3 });
    }
}
