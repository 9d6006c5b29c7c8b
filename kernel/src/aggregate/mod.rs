// Aggregation Views
//
// Read-only projections of the standings for presentation: leaderboards,
// head-to-head matrix, recent matches and rating histories. Every view is
// computed from one snapshot and never mutates it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::elo::Score;
use crate::log::MatchKey;
use crate::state::{
    CommittedMatch, NotFoundError, ParticipantResult, Standings, TournamentStats, User,
};

/// One row of the leaderboard or roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LeaderboardRow {
    pub name: String,
    pub rating: f64,
    pub wins: u32,
    pub losses: u32,
}

/// Wins and losses of the row player against the column player.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DetailResultEntry {
    pub wins: u32,
    pub losses: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DetailMatrix {
    pub usernames: Vec<String>,
    pub result_table: Vec<Vec<DetailResultEntry>>,
}

impl DetailMatrix {
    pub fn entry(&self, row: &str, column: &str) -> Option<DetailResultEntry> {
        let i = self.usernames.iter().position(|name| name == row)?;
        let j = self.usernames.iter().position(|name| name == column)?;
        Some(self.result_table[i][j])
    }
}

/// Summary of one committed match.
///
/// `winner` is the first best-placed participant and `loser` the last
/// worst-placed one; for two-player matches they are exactly the two sides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MatchSummary {
    pub key: MatchKey,
    pub tournament: String,
    pub winner: String,
    pub loser: String,
    pub winner_rating_before: f64,
    pub winner_rating_after: f64,
    pub loser_rating_before: f64,
    pub loser_rating_after: f64,
    pub draw: bool,
    pub expected: bool,
    pub note: String,
    pub submitter: String,
    pub date: DateTime<Utc>,
    pub participants: Vec<ParticipantResult>,
}

impl MatchSummary {
    pub fn from_committed(committed: &CommittedMatch) -> Option<Self> {
        let best = committed.participants.iter().min_by_key(|p| p.rank)?;
        let worst = committed.participants.iter().max_by_key(|p| p.rank)?;

        Some(Self {
            key: committed.key,
            tournament: committed.record.tournament_name().to_string(),
            winner: best.player.clone(),
            loser: worst.player.clone(),
            winner_rating_before: best.rating_before,
            winner_rating_after: best.rating_after,
            loser_rating_before: worst.rating_before,
            loser_rating_after: worst.rating_after,
            draw: committed
                .pairings
                .iter()
                .all(|pairing| pairing.score == Score::Draw),
            expected: committed.expected(),
            note: committed.record.note.clone(),
            submitter: committed.record.submitter.clone(),
            date: committed.record.date,
            participants: committed.participants.clone(),
        })
    }
}

/// One point of a rating chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HistoryPoint {
    pub date: DateTime<Utc>,
    pub rating: f64,
}

/// One row of a tournament's own standings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TournamentStandingRow {
    pub name: String,
    #[serde(flatten)]
    pub stats: TournamentStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TournamentRow {
    pub name: String,
}

/// Users by rating descending, ties by name ascending.
pub fn leaderboard(standings: &Standings) -> Vec<LeaderboardRow> {
    let mut rows: Vec<LeaderboardRow> = standings.users().map(row).collect();
    rows.sort_by(|a, b| b.rating.total_cmp(&a.rating).then_with(|| a.name.cmp(&b.name)));
    rows
}

/// Users in name order.
pub fn roster(standings: &Standings) -> Vec<LeaderboardRow> {
    standings.users().map(row).collect()
}

pub fn tournaments(standings: &Standings) -> Vec<TournamentRow> {
    standings
        .roster()
        .tournaments()
        .map(|name| TournamentRow {
            name: name.to_string(),
        })
        .collect()
}

/// Players of `tournament` by tournament rating descending, ties by name.
///
/// Only users with at least one match in the tournament are listed.
pub fn tournament_leaderboard(
    standings: &Standings,
    tournament: &str,
) -> Result<Vec<TournamentStandingRow>, NotFoundError> {
    if !standings.has_tournament(tournament) {
        return Err(NotFoundError::Tournament(tournament.to_string()));
    }

    let mut rows: Vec<TournamentStandingRow> = standings
        .tournament_stats(tournament)
        .map(|(name, stats)| TournamentStandingRow {
            name: name.to_string(),
            stats: stats.clone(),
        })
        .collect();
    rows.sort_by(|a, b| {
        b.stats
            .rating
            .total_cmp(&a.stats.rating)
            .then_with(|| a.name.cmp(&b.name))
    });
    Ok(rows)
}

fn row(user: &User) -> LeaderboardRow {
    LeaderboardRow {
        name: user.name.clone(),
        rating: user.rating,
        wins: user.wins,
        losses: user.losses,
    }
}

fn in_tournament(committed: &CommittedMatch, tournament: Option<&str>) -> bool {
    tournament.map_or(true, |name| committed.record.tournament_name() == name)
}

/// Head-to-head wins and losses for every ordered pair of users.
///
/// Rows and columns cover every registered user in name order. Draws count
/// for neither side. With `tournament` set only that tournament's matches
/// are counted.
pub fn detail_matrix(standings: &Standings, tournament: Option<&str>) -> DetailMatrix {
    let usernames: Vec<String> = standings.users().map(|user| user.name.clone()).collect();
    let index: HashMap<&str, usize> = usernames
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();

    let mut result_table = vec![vec![DetailResultEntry::default(); usernames.len()]; usernames.len()];

    for committed in standings
        .committed()
        .iter()
        .filter(|committed| in_tournament(committed, tournament))
    {
        for pairing in &committed.pairings {
            let (Some(&a), Some(&b)) = (
                index.get(pairing.player_a.as_str()),
                index.get(pairing.player_b.as_str()),
            ) else {
                continue;
            };

            match pairing.score {
                Score::Win => {
                    result_table[a][b].wins += 1;
                    result_table[b][a].losses += 1;
                }
                Score::Loss => {
                    result_table[a][b].losses += 1;
                    result_table[b][a].wins += 1;
                }
                Score::Draw => {}
            }
        }
    }

    DetailMatrix {
        usernames,
        result_table,
    }
}

/// Head-to-head record of `a` against `b`.
pub fn head_to_head(standings: &Standings, a: &str, b: &str) -> Result<DetailResultEntry, NotFoundError> {
    for name in [a, b] {
        if standings.user(name).is_none() {
            return Err(NotFoundError::User(name.to_string()));
        }
    }

    let mut entry = DetailResultEntry::default();
    for pairing in standings.committed().iter().flat_map(|c| &c.pairings) {
        let score = if pairing.player_a == a && pairing.player_b == b {
            pairing.score
        } else if pairing.player_a == b && pairing.player_b == a {
            pairing.score.reversed()
        } else {
            continue;
        };

        match score {
            Score::Win => entry.wins += 1,
            Score::Loss => entry.losses += 1,
            Score::Draw => {}
        }
    }
    Ok(entry)
}

/// The last `n` folded matches, newest first.
pub fn recent_matches(standings: &Standings, n: usize, tournament: Option<&str>) -> Vec<MatchSummary> {
    standings
        .committed()
        .iter()
        .rev()
        .filter(|committed| in_tournament(committed, tournament))
        .take(n)
        .filter_map(MatchSummary::from_committed)
        .collect()
}

/// The newest folded match.
pub fn latest_match(standings: &Standings) -> Option<MatchSummary> {
    standings
        .committed()
        .last()
        .and_then(MatchSummary::from_committed)
}

/// Every match a user took part in, oldest first.
pub fn user_matches(standings: &Standings, name: &str) -> Result<Vec<MatchSummary>, NotFoundError> {
    if standings.user(name).is_none() {
        return Err(NotFoundError::User(name.to_string()));
    }

    Ok(standings
        .committed()
        .iter()
        .filter(|committed| committed.record.involves(name))
        .filter_map(MatchSummary::from_committed)
        .collect())
}

/// Rating chart of a user, oldest first.
pub fn rating_history(standings: &Standings, name: &str) -> Result<Vec<HistoryPoint>, NotFoundError> {
    let history = standings
        .history(name)
        .ok_or_else(|| NotFoundError::User(name.to_string()))?;

    Ok(history
        .iter()
        .map(|entry| HistoryPoint {
            date: entry.date,
            rating: entry.rating,
        })
        .collect())
}
