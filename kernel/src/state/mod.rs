// Standings
//
// Derived rating state: users, their append-only rating histories, a
// separate rating table per tournament and the per-match results in
// fold order. Built only by applying logged
// matches one at a time; every rating is a pure function of the log prefix.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::decompose::{self, Placement};
use crate::elo::{self, Score};
use crate::log::{
    LoggedMatch, MatchKey, MatchKind, MatchLog, MatchRecord, Registration, Sequence,
    DEFAULT_TOURNAMENT,
};
use crate::validate::ValidationError;

/// A rated player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct User {
    pub name: String,
    pub rating: f64,
    pub wins: u32,
    pub losses: u32,
    pub joined: DateTime<Utc>,
}

/// Rating of a user right after one match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RatingHistoryEntry {
    pub user: String,
    pub date: DateTime<Utc>,
    pub rating: f64,
}

/// A user's record inside one tournament.
///
/// Tournament ratings start at the initial rating and only move with
/// matches filed under that tournament.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TournamentStats {
    pub rating: f64,
    pub wins: u32,
    pub losses: u32,
    #[serde(rename = "FFAWins")]
    pub ffa_wins: u32,
    pub matches: u32,
}

impl TournamentStats {
    fn fresh(rating: f64) -> Self {
        Self {
            rating,
            wins: 0,
            losses: 0,
            ffa_wins: 0,
            matches: 0,
        }
    }
}

/// How one participant came out of a committed match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantResult {
    pub player: String,
    pub rank: usize,
    pub rating_before: f64,
    pub rating_after: f64,
    pub tournament_rating_before: f64,
    pub tournament_rating_after: f64,
    pub wins: u32,
    pub losses: u32,
    /// Placed first in a free-for-all.
    pub ffa_win: bool,
}

/// One pairwise outcome with the arithmetic applied to it.
///
/// `delta` was computed from the ratings at the start of the match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairingResult {
    pub player_a: String,
    pub player_b: String,
    pub score: Score,
    pub expected: f64,
    pub delta: f64,
    pub upset: bool,
}

/// A match as folded into the standings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommittedMatch {
    pub key: MatchKey,
    pub sequence: Sequence,
    pub record: MatchRecord,
    pub participants: Vec<ParticipantResult>,
    pub pairings: Vec<PairingResult>,
}

impl CommittedMatch {
    /// No pairing went against the rating favourite.
    pub fn expected(&self) -> bool {
        !self.pairings.iter().any(|pairing| pairing.upset)
    }

    pub fn participant(&self, name: &str) -> Option<&ParticipantResult> {
        self.participants.iter().find(|p| p.player == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotFoundError {
    #[error("user {0} is not registered")]
    User(String),

    #[error("tournament {0} is not registered")]
    Tournament(String),

    #[error("no match with key {0}")]
    Match(MatchKey),
}

/// Errors produced while folding matches into standings.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StateError {
    #[error("invalid match: {0}")]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error("cannot rewind to position {position}: only {committed} matches are folded")]
    RewindOutOfRange { position: usize, committed: usize },

    #[error("rewind of match {key} does not line up for {player}")]
    RewindMismatch { key: MatchKey, player: String },
}

/// Registered users and tournaments with the users' current ratings.
#[derive(Debug, Clone, PartialEq)]
pub struct Roster {
    users: BTreeMap<String, User>,
    tournaments: BTreeSet<String>,
}

impl Roster {
    pub fn user(&self, name: &str) -> Option<&User> {
        self.users.get(name)
    }

    /// Users in name order.
    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn has_tournament(&self, name: &str) -> bool {
        self.tournaments.contains(name)
    }

    /// Tournaments in name order.
    pub fn tournaments(&self) -> impl Iterator<Item = &str> {
        self.tournaments.iter().map(String::as_str)
    }

    /// Sum of every user's rating.
    pub fn total_rating(&self) -> f64 {
        self.users.values().map(|user| user.rating).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Standings {
    roster: Roster,
    histories: HashMap<String, Vec<RatingHistoryEntry>>,
    /// Tournament name to user name to stats. Users appear once they play.
    tournament_stats: BTreeMap<String, BTreeMap<String, TournamentStats>>,
    committed: Vec<CommittedMatch>,
}

impl Standings {
    /// Empty standings with only the default tournament.
    pub fn new() -> Self {
        Self {
            roster: Roster {
                users: BTreeMap::new(),
                tournaments: BTreeSet::from([DEFAULT_TOURNAMENT.to_string()]),
            },
            histories: HashMap::new(),
            tournament_stats: BTreeMap::new(),
            committed: Vec::new(),
        }
    }

    /// Standings holding every registration of `log` and no matches.
    pub fn seeded(log: &MatchLog, config: &EngineConfig) -> Self {
        let mut standings = Self::new();
        for registration in log.users() {
            standings.add_user(registration, config.initial_rating);
        }
        for registration in log.tournaments() {
            standings.add_tournament(&registration.name);
        }
        standings
    }

    pub fn add_user(&mut self, registration: &Registration, initial_rating: f64) {
        self.histories.entry(registration.name.clone()).or_default();
        self.roster.users.insert(
            registration.name.clone(),
            User {
                name: registration.name.clone(),
                rating: initial_rating,
                wins: 0,
                losses: 0,
                joined: registration.joined,
            },
        );
    }

    pub fn add_tournament(&mut self, name: &str) {
        self.roster.tournaments.insert(name.to_string());
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn user(&self, name: &str) -> Option<&User> {
        self.roster.user(name)
    }

    /// Users in name order.
    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.roster.users()
    }

    pub fn has_tournament(&self, name: &str) -> bool {
        self.roster.has_tournament(name)
    }

    /// History of a registered user, oldest first. Empty if they never played.
    pub fn history(&self, name: &str) -> Option<&[RatingHistoryEntry]> {
        self.histories.get(name).map(Vec::as_slice)
    }

    /// Per-user stats inside `tournament`, keyed by user name.
    ///
    /// Empty when the tournament is unknown or nobody has played in it.
    pub fn tournament_stats(&self, tournament: &str) -> impl Iterator<Item = (&str, &TournamentStats)> {
        self.tournament_stats
            .get(tournament)
            .into_iter()
            .flatten()
            .map(|(name, stats)| (name.as_str(), stats))
    }

    /// Folded matches in fold order.
    pub fn committed(&self) -> &[CommittedMatch] {
        &self.committed
    }

    pub fn total_rating(&self) -> f64 {
        self.roster.total_rating()
    }

    /// Check that the record's tournament and participants exist.
    pub fn check_references(&self, record: &MatchRecord) -> Result<(), NotFoundError> {
        let tournament = record.tournament_name();
        if !self.has_tournament(tournament) {
            return Err(NotFoundError::Tournament(tournament.to_string()));
        }

        for name in record.participants() {
            if self.roster.user(name).is_none() {
                return Err(NotFoundError::User(name.to_string()));
            }
        }

        Ok(())
    }

    /// Fold one match onto the end of the standings.
    ///
    /// Every delta is computed from the participants' ratings at the start
    /// of the match, then all updates are written together. On error
    /// nothing has been modified.
    pub fn apply(
        &mut self,
        entry: &LoggedMatch,
        config: &EngineConfig,
    ) -> Result<&CommittedMatch, StateError> {
        let decomposition = decompose::decompose(&entry.record)?;
        self.check_references(&entry.record)?;

        let tournament = entry.record.tournament_name();
        let snapshot: HashMap<&str, f64> = decomposition
            .placements
            .iter()
            .filter_map(|p| {
                self.roster
                    .user(&p.player)
                    .map(|user| (p.player.as_str(), user.rating))
            })
            .collect();
        let table = self.tournament_stats.get(tournament);
        let tournament_snapshot: HashMap<&str, f64> = decomposition
            .placements
            .iter()
            .map(|p| {
                let rating = table
                    .and_then(|stats| stats.get(&p.player))
                    .map_or(config.initial_rating, |stats| stats.rating);
                (p.player.as_str(), rating)
            })
            .collect();

        let mut deltas: HashMap<&str, f64> = HashMap::new();
        let mut tournament_deltas: HashMap<&str, f64> = HashMap::new();
        let mut records: HashMap<&str, (u32, u32)> = HashMap::new();
        let mut pairings = Vec::with_capacity(decomposition.outcomes.len());

        let rating_of = |name: &str| {
            snapshot
                .get(name)
                .copied()
                .ok_or_else(|| NotFoundError::User(name.to_string()))
        };
        let tournament_rating_of = |name: &str| {
            tournament_snapshot
                .get(name)
                .copied()
                .unwrap_or(config.initial_rating)
        };

        for outcome in &decomposition.outcomes {
            let a = outcome.player_a.as_str();
            let b = outcome.player_b.as_str();
            let update = elo::update(rating_of(a)?, rating_of(b)?, outcome.score, config.k_factor);

            *deltas.entry(a).or_insert(0.0) += update.delta;
            *deltas.entry(b).or_insert(0.0) -= update.delta;

            let local = elo::update(
                tournament_rating_of(a),
                tournament_rating_of(b),
                outcome.score,
                config.k_factor,
            );
            *tournament_deltas.entry(a).or_insert(0.0) += local.delta;
            *tournament_deltas.entry(b).or_insert(0.0) -= local.delta;

            match outcome.score {
                Score::Win => {
                    records.entry(a).or_default().0 += 1;
                    records.entry(b).or_default().1 += 1;
                }
                Score::Loss => {
                    records.entry(a).or_default().1 += 1;
                    records.entry(b).or_default().0 += 1;
                }
                Score::Draw => {}
            }

            pairings.push(PairingResult {
                player_a: outcome.player_a.clone(),
                player_b: outcome.player_b.clone(),
                score: outcome.score,
                expected: update.expected,
                delta: update.delta,
                upset: update.upset,
            });
        }

        let free_for_all = matches!(entry.record.kind, MatchKind::FreeForAll { .. });
        let participants = decomposition
            .placements
            .iter()
            .map(|Placement { player, rank }| {
                let before = rating_of(player)?;
                let local_before = tournament_rating_of(player);
                let (wins, losses) = records.get(player.as_str()).copied().unwrap_or((0, 0));
                Ok(ParticipantResult {
                    player: player.clone(),
                    rank: *rank,
                    rating_before: before,
                    rating_after: before + deltas.get(player.as_str()).copied().unwrap_or(0.0),
                    tournament_rating_before: local_before,
                    tournament_rating_after: local_before
                        + tournament_deltas.get(player.as_str()).copied().unwrap_or(0.0),
                    wins,
                    losses,
                    ffa_win: free_for_all && *rank == 1,
                })
            })
            .collect::<Result<Vec<_>, NotFoundError>>()?;

        let table = self
            .tournament_stats
            .entry(tournament.to_string())
            .or_default();

        for result in &participants {
            if let Some(user) = self.roster.users.get_mut(&result.player) {
                user.rating = result.rating_after;
                user.wins += result.wins;
                user.losses += result.losses;
            }
            let stats = table
                .entry(result.player.clone())
                .or_insert_with(|| TournamentStats::fresh(result.tournament_rating_before));
            stats.rating = result.tournament_rating_after;
            stats.wins += result.wins;
            stats.losses += result.losses;
            stats.ffa_wins += u32::from(result.ffa_win);
            stats.matches += 1;

            self.histories
                .entry(result.player.clone())
                .or_default()
                .push(RatingHistoryEntry {
                    user: result.player.clone(),
                    date: entry.record.date,
                    rating: result.rating_after,
                });
        }

        self.committed.push(CommittedMatch {
            key: entry.key,
            sequence: entry.sequence,
            record: entry.record.clone(),
            participants,
            pairings,
        });

        Ok(&self.committed[self.committed.len() - 1])
    }

    /// Undo folded matches until only the first `position` remain.
    ///
    /// Callers should rewind a working copy: a mismatch leaves the
    /// standings half rewound.
    pub fn rewind(&mut self, position: usize) -> Result<(), StateError> {
        if position > self.committed.len() {
            return Err(StateError::RewindOutOfRange {
                position,
                committed: self.committed.len(),
            });
        }

        while self.committed.len() > position {
            let Some(last) = self.committed.pop() else {
                break;
            };

            for result in last.participants.iter().rev() {
                let mismatch = || StateError::RewindMismatch {
                    key: last.key,
                    player: result.player.clone(),
                };

                let user = self
                    .roster
                    .users
                    .get_mut(&result.player)
                    .ok_or_else(|| NotFoundError::User(result.player.clone()))?;
                let entry = self
                    .histories
                    .get_mut(&result.player)
                    .and_then(Vec::pop)
                    .ok_or_else(mismatch)?;

                if entry.rating != user.rating || user.rating != result.rating_after {
                    return Err(mismatch());
                }

                user.rating = result.rating_before;
                user.wins = user.wins.checked_sub(result.wins).ok_or_else(mismatch)?;
                user.losses = user.losses.checked_sub(result.losses).ok_or_else(mismatch)?;

                self.rewind_tournament_stats(&last, result)?;
            }
        }

        Ok(())
    }
}

impl Standings {
    fn rewind_tournament_stats(
        &mut self,
        folded: &CommittedMatch,
        result: &ParticipantResult,
    ) -> Result<(), StateError> {
        let mismatch = || StateError::RewindMismatch {
            key: folded.key,
            player: result.player.clone(),
        };
        let tournament = folded.record.tournament_name();

        let table = self
            .tournament_stats
            .get_mut(tournament)
            .ok_or_else(mismatch)?;
        let stats = table.get_mut(&result.player).ok_or_else(mismatch)?;
        if stats.rating != result.tournament_rating_after {
            return Err(mismatch());
        }

        stats.rating = result.tournament_rating_before;
        stats.wins = stats.wins.checked_sub(result.wins).ok_or_else(mismatch)?;
        stats.losses = stats.losses.checked_sub(result.losses).ok_or_else(mismatch)?;
        stats.ffa_wins = stats
            .ffa_wins
            .checked_sub(u32::from(result.ffa_win))
            .ok_or_else(mismatch)?;
        stats.matches = stats.matches.checked_sub(1).ok_or_else(mismatch)?;

        if stats.matches == 0 {
            table.remove(&result.player);
        }
        if table.is_empty() {
            self.tournament_stats.remove(tournament);
        }
        Ok(())
    }
}

impl Default for Standings {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::ScoredEntry;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap()
    }

    fn standings(names: &[&str]) -> Standings {
        let mut standings = Standings::new();
        for name in names {
            standings.add_user(
                &Registration {
                    name: name.to_string(),
                    joined: at(1),
                },
                1500.0,
            );
        }
        standings.add_tournament("league");
        standings
    }

    fn logged(sequence: Sequence, day: u32, kind: MatchKind) -> LoggedMatch {
        LoggedMatch {
            key: MatchKey::new(),
            sequence,
            record: MatchRecord {
                tournament: Some("league".into()),
                submitter: "referee".into(),
                date: at(day),
                note: String::new(),
                kind,
            },
        }
    }

    fn win(winner: &str, loser: &str) -> MatchKind {
        MatchKind::TwoPlayer {
            players: [winner.into(), loser.into()],
            draw: false,
        }
    }

    #[test]
    fn two_player_win_updates_ratings_and_record() {
        let config = EngineConfig::default_config();
        let mut s = standings(&["alice", "bob"]);

        let committed = s.apply(&logged(1, 2, win("alice", "bob")), &config).unwrap();
        assert!(committed.expected());

        let alice = s.user("alice").unwrap();
        let bob = s.user("bob").unwrap();
        assert_eq!(alice.rating, 1516.0);
        assert_eq!(bob.rating, 1484.0);
        assert_eq!((alice.wins, alice.losses), (1, 0));
        assert_eq!((bob.wins, bob.losses), (0, 1));

        let history = s.history("bob").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].rating, 1484.0);
    }

    #[test]
    fn free_for_all_uses_start_of_match_ratings() {
        let config = EngineConfig::default_config();
        let mut s = standings(&["a", "b", "c"]);

        let kind = MatchKind::FreeForAll {
            ranking: vec!["a".into(), "b".into(), "c".into()],
            draws: vec![],
        };
        s.apply(&logged(1, 2, kind), &config).unwrap();

        // Every pair started level, so each pairing is worth exactly 16.
        assert_eq!(s.user("a").unwrap().rating, 1532.0);
        assert_eq!(s.user("b").unwrap().rating, 1500.0);
        assert_eq!(s.user("c").unwrap().rating, 1468.0);
        assert_eq!(s.user("b").unwrap().wins, 1);
        assert_eq!(s.user("b").unwrap().losses, 1);
        assert!((s.total_rating() - 4500.0).abs() < 1e-9);
    }

    #[test]
    fn scored_draw_moves_nothing_between_equals() {
        let config = EngineConfig::default_config();
        let mut s = standings(&["a", "b"]);

        let kind = MatchKind::Scored {
            slots: vec![
                Some(ScoredEntry {
                    player: "a".into(),
                    score: 40.0,
                }),
                Some(ScoredEntry {
                    player: "b".into(),
                    score: 40.0,
                }),
            ],
        };
        let committed = s.apply(&logged(1, 2, kind), &config).unwrap();

        assert_eq!(committed.participants[0].rank, 1);
        assert_eq!(committed.participants[1].rank, 1);
        assert_eq!(s.user("a").unwrap().rating, 1500.0);
        assert_eq!(s.user("a").unwrap().wins, 0);
    }

    #[test]
    fn unknown_player_leaves_standings_untouched() {
        let config = EngineConfig::default_config();
        let mut s = standings(&["alice"]);
        let before = s.clone();

        let err = s
            .apply(&logged(1, 2, win("alice", "mallory")), &config)
            .unwrap_err();

        assert_eq!(err, StateError::NotFound(NotFoundError::User("mallory".into())));
        assert_eq!(s, before);
    }

    #[test]
    fn unknown_tournament_is_rejected() {
        let s = standings(&["alice", "bob"]);
        let mut record = logged(1, 2, win("alice", "bob")).record;
        record.tournament = Some("elsewhere".into());

        assert_eq!(
            s.check_references(&record).unwrap_err(),
            NotFoundError::Tournament("elsewhere".into())
        );
    }

    #[test]
    fn rewind_restores_previous_state() {
        let config = EngineConfig::default_config();
        let mut s = standings(&["alice", "bob", "carol"]);

        s.apply(&logged(1, 2, win("alice", "bob")), &config).unwrap();
        let checkpoint = s.clone();

        s.apply(&logged(2, 3, win("bob", "carol")), &config).unwrap();
        s.apply(&logged(3, 4, win("carol", "alice")), &config).unwrap();

        s.rewind(1).unwrap();
        assert_eq!(s, checkpoint);
    }

    #[test]
    fn rewind_past_end_is_rejected() {
        let mut s = standings(&["alice"]);
        assert_eq!(
            s.rewind(3).unwrap_err(),
            StateError::RewindOutOfRange {
                position: 3,
                committed: 0
            }
        );
    }

    fn stats<'a>(s: &'a Standings, tournament: &str, name: &str) -> Option<&'a TournamentStats> {
        s.tournament_stats(tournament)
            .find(|(player, _)| *player == name)
            .map(|(_, stats)| stats)
    }

    #[test]
    fn tournaments_keep_separate_ratings() {
        let config = EngineConfig::default_config();
        let mut s = standings(&["alice", "bob"]);
        s.add_tournament("cup");

        s.apply(&logged(1, 2, win("alice", "bob")), &config).unwrap();
        let mut rematch = logged(2, 3, win("bob", "alice"));
        rematch.record.tournament = Some("cup".into());
        let committed = s.apply(&rematch, &config).unwrap();

        // In the cup both start level, whatever happened in the league.
        let bob = committed.participant("bob").unwrap();
        assert_eq!(bob.tournament_rating_before, 1500.0);
        assert_eq!(bob.tournament_rating_after, 1516.0);
        assert!(bob.rating_before < 1500.0);

        assert_eq!(stats(&s, "league", "alice").unwrap().rating, 1516.0);
        assert_eq!(stats(&s, "league", "bob").unwrap().rating, 1484.0);
        assert_eq!(stats(&s, "cup", "alice").unwrap().rating, 1484.0);
        assert_eq!(stats(&s, "cup", "bob").unwrap().rating, 1516.0);
        assert_eq!(stats(&s, "cup", "bob").unwrap().wins, 1);
        assert_eq!(stats(&s, "cup", "bob").unwrap().losses, 0);
    }

    #[test]
    fn free_for_all_winner_counts_an_ffa_win() {
        let config = EngineConfig::default_config();
        let mut s = standings(&["a", "b", "c"]);

        let kind = MatchKind::FreeForAll {
            ranking: vec!["c".into(), "a".into(), "b".into()],
            draws: vec![],
        };
        s.apply(&logged(1, 2, kind), &config).unwrap();
        s.apply(&logged(2, 3, win("a", "c")), &config).unwrap();

        let c = stats(&s, "league", "c").unwrap();
        assert_eq!((c.ffa_wins, c.wins, c.losses, c.matches), (1, 2, 1, 2));
        let a = stats(&s, "league", "a").unwrap();
        assert_eq!((a.ffa_wins, a.wins, a.losses, a.matches), (0, 2, 1, 2));
        assert!(stats(&s, DEFAULT_TOURNAMENT, "a").is_none());
    }

    #[test]
    fn rewind_drops_tournament_stats_of_undone_matches() {
        let config = EngineConfig::default_config();
        let mut s = standings(&["alice", "bob", "carol"]);
        s.add_tournament("cup");

        s.apply(&logged(1, 2, win("alice", "bob")), &config).unwrap();
        let checkpoint = s.clone();

        let mut cup = logged(2, 3, win("carol", "alice"));
        cup.record.tournament = Some("cup".into());
        s.apply(&cup, &config).unwrap();
        s.apply(&logged(3, 4, win("carol", "bob")), &config).unwrap();
        assert_eq!(s.tournament_stats("cup").count(), 2);

        s.rewind(1).unwrap();

        assert_eq!(s, checkpoint);
        assert_eq!(s.tournament_stats("cup").count(), 0);
        assert!(stats(&s, "league", "carol").is_none());
        assert_eq!(stats(&s, "league", "alice").unwrap().matches, 1);
    }

    #[test]
    fn history_of_unknown_user_is_none() {
        let s = standings(&["alice"]);
        assert!(s.history("alice").unwrap().is_empty());
        assert!(s.history("nobody").is_none());
    }
}
