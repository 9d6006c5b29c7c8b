// Match Log
//
// The authoritative, ordered record of every registration and every
// committed match. Ratings are never stored here; they are derived by
// folding this log (see `replay`).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod store;

pub use store::{InMemoryLogStore, JsonFileStore, MatchLogStore};

/// Commit sequence number of a match.
pub type Sequence = u64;

/// Tournament used when a two-player record names none.
pub const DEFAULT_TOURNAMENT: &str = "Default";

/// Stable, opaque identifier for a committed match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchKey(pub Uuid);

impl MatchKey {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MatchKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MatchKey {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(MatchKey)
    }
}

/// One populated slot of a scored match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredEntry {
    pub player: String,
    pub score: f64,
}

/// Shape of a match result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchKind {
    /// `players` is `[winner, loser]`; with `draw` set the order carries no meaning.
    TwoPlayer { players: [String; 2], draw: bool },

    /// `ranking` runs first to last. `draws[i]` ties `ranking[i]` with `ranking[i + 1]`.
    FreeForAll {
        ranking: Vec<String>,
        #[serde(default)]
        draws: Vec<bool>,
    },

    /// Slots in submission order; `None` is an empty slot.
    Scored { slots: Vec<Option<ScoredEntry>> },
}

/// A match submission as recorded in the log. Immutable once committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub tournament: Option<String>,
    pub submitter: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub note: String,
    pub kind: MatchKind,
}

impl MatchRecord {
    /// Tournament the match is filed under.
    pub fn tournament_name(&self) -> &str {
        self.tournament.as_deref().unwrap_or(DEFAULT_TOURNAMENT)
    }

    /// Participant names in submission order. Empty scored slots are skipped.
    pub fn participants(&self) -> Vec<&str> {
        match &self.kind {
            MatchKind::TwoPlayer { players, .. } => players.iter().map(String::as_str).collect(),
            MatchKind::FreeForAll { ranking, .. } => ranking.iter().map(String::as_str).collect(),
            MatchKind::Scored { slots } => slots
                .iter()
                .flatten()
                .map(|entry| entry.player.as_str())
                .collect(),
        }
    }

    pub fn involves(&self, name: &str) -> bool {
        self.participants().contains(&name)
    }

    /// The same record with winner and loser exchanged.
    ///
    /// Only two-player records can be switched.
    pub fn switched(&self) -> Option<MatchRecord> {
        match &self.kind {
            MatchKind::TwoPlayer { players, draw } => {
                let [winner, loser] = players.clone();
                Some(MatchRecord {
                    kind: MatchKind::TwoPlayer {
                        players: [loser, winner],
                        draw: *draw,
                    },
                    ..self.clone()
                })
            }
            _ => None,
        }
    }
}

/// A committed match together with its log identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedMatch {
    pub key: MatchKey,
    pub sequence: Sequence,
    pub record: MatchRecord,
}

/// A registered user or tournament.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub name: String,
    pub joined: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("sequence conflict: expected {expected}, got {actual}")]
    SequenceConflict { expected: Sequence, actual: Sequence },

    #[error("duplicate match key {0}")]
    DuplicateKey(MatchKey),

    #[error("unknown match key {0}")]
    UnknownKey(MatchKey),

    #[error("log storage i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("log serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Ordered match log.
///
/// Matches are kept in chronological order: by date, then by commit
/// sequence. This order is the order in which ratings are folded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchLog {
    #[serde(default)]
    users: Vec<Registration>,
    #[serde(default)]
    tournaments: Vec<Registration>,
    #[serde(default)]
    matches: Vec<LoggedMatch>,
    #[serde(default)]
    next_sequence: Sequence,
}

impl MatchLog {
    pub fn new() -> Self {
        Self {
            users: Vec::new(),
            tournaments: Vec::new(),
            matches: Vec::new(),
            next_sequence: 1,
        }
    }

    /// Restore ordering and sequence bookkeeping after deserialization.
    pub fn normalized(mut self) -> Self {
        self.matches
            .sort_by(|a, b| (a.record.date, a.sequence).cmp(&(b.record.date, b.sequence)));
        let highest = self.matches.iter().map(|m| m.sequence).max().unwrap_or(0);
        self.next_sequence = self.next_sequence.max(highest + 1);
        self
    }

    pub fn register_user(&mut self, registration: Registration) {
        self.users.push(registration);
    }

    pub fn register_tournament(&mut self, registration: Registration) {
        self.tournaments.push(registration);
    }

    pub fn users(&self) -> &[Registration] {
        &self.users
    }

    pub fn tournaments(&self) -> &[Registration] {
        &self.tournaments
    }

    /// Sequence the next appended match must carry.
    pub fn next_sequence(&self) -> Sequence {
        self.next_sequence
    }

    /// Insert a match at its chronological position and return that position.
    pub fn append(&mut self, entry: LoggedMatch) -> Result<usize, LogError> {
        if entry.sequence != self.next_sequence {
            return Err(LogError::SequenceConflict {
                expected: self.next_sequence,
                actual: entry.sequence,
            });
        }

        if self.position(&entry.key).is_some() {
            return Err(LogError::DuplicateKey(entry.key));
        }

        let position = self
            .matches
            .partition_point(|existing| existing.record.date <= entry.record.date);

        self.matches.insert(position, entry);
        self.next_sequence += 1;
        Ok(position)
    }

    /// Remove a match, returning its former position and contents.
    pub fn remove(&mut self, key: &MatchKey) -> Result<(usize, LoggedMatch), LogError> {
        let position = self.position(key).ok_or(LogError::UnknownKey(*key))?;
        Ok((position, self.matches.remove(position)))
    }

    /// Replace the record of a match in place. Date changes are not allowed
    /// through this path, so the position is preserved.
    pub fn replace_record(
        &mut self,
        key: &MatchKey,
        record: MatchRecord,
    ) -> Result<usize, LogError> {
        let position = self.position(key).ok_or(LogError::UnknownKey(*key))?;
        self.matches[position].record = MatchRecord {
            date: self.matches[position].record.date,
            ..record
        };
        Ok(position)
    }

    pub fn position(&self, key: &MatchKey) -> Option<usize> {
        self.matches.iter().position(|m| &m.key == key)
    }

    pub fn get(&self, key: &MatchKey) -> Option<&LoggedMatch> {
        self.matches.iter().find(|m| &m.key == key)
    }

    pub fn matches(&self) -> &[LoggedMatch] {
        &self.matches
    }

    pub fn replay(&self) -> impl Iterator<Item = &LoggedMatch> {
        self.matches.iter()
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

impl Default for MatchLog {
    fn default() -> Self {
        Self::new()
    }
}
