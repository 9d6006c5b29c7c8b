// Rating Store
//
// Owns the match log and the standings derived from it. Every mutation
// runs under a single writer lock against a private copy of the current
// snapshot; the copy is persisted and then published as a whole, so
// readers only ever see the state before or after a mutation.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use log::{error, info, warn};

use crate::config::EngineConfig;
use crate::invariants::{InvariantEngine, InvariantViolation};
use crate::log::{
    InMemoryLogStore, LogError, LoggedMatch, MatchKey, MatchLog, MatchLogStore, MatchRecord,
    Registration, DEFAULT_TOURNAMENT,
};
use crate::replay::{self, ReplayError};
use crate::state::{CommittedMatch, NotFoundError, RatingHistoryEntry, StateError, Standings, User};
use crate::validate::{self, MatchValidator, ValidationError};

/// An internal rule broke while folding matches. Never published.
#[derive(Debug, thiserror::Error)]
pub enum ConsistencyFailure {
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),

    #[error("standings could not be rebuilt: {0}")]
    State(StateError),

    #[error("replay stopped early: {0}")]
    Replay(String),

    #[error("match {0} was logged but not folded")]
    MissingCommit(MatchKey),

    #[error("logged match {key} is malformed: {reason}")]
    InvalidRecord { key: MatchKey, reason: ValidationError },
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error("consistency failure: {0}")]
    Consistency(#[from] ConsistencyFailure),

    #[error("storage failure: {0}")]
    Storage(#[from] LogError),
}

impl From<ReplayError> for EngineError {
    fn from(err: ReplayError) -> Self {
        match err {
            ReplayError::State(StateError::Invalid(err)) => EngineError::Validation(err),
            ReplayError::State(StateError::NotFound(err)) => EngineError::NotFound(err),
            ReplayError::State(err) => ConsistencyFailure::State(err).into(),
            ReplayError::Invariant(violation) => ConsistencyFailure::Invariant(violation).into(),
            ReplayError::InvalidRecord { key, source } => {
                ConsistencyFailure::InvalidRecord {
                    key,
                    reason: source,
                }
                .into()
            }
            err @ ReplayError::PositionOutOfRange { .. } => {
                ConsistencyFailure::Replay(err.to_string()).into()
            }
        }
    }
}

/// An immutable, internally consistent view of the log and its standings.
#[derive(Debug, Clone)]
pub struct Snapshot {
    log: MatchLog,
    standings: Standings,
}

impl Snapshot {
    pub fn log(&self) -> &MatchLog {
        &self.log
    }

    pub fn standings(&self) -> &Standings {
        &self.standings
    }
}

/// Serialized writer over a match log with concurrent snapshot readers.
pub struct RatingStore<S: MatchLogStore> {
    config: EngineConfig,
    validator: MatchValidator,
    invariants: InvariantEngine,
    writer: Mutex<S>,
    published: RwLock<Arc<Snapshot>>,
}

impl RatingStore<InMemoryLogStore> {
    /// Store backed by an empty in-memory log.
    pub fn in_memory(config: EngineConfig) -> Result<Self, EngineError> {
        Self::open(InMemoryLogStore::default(), config)
    }
}

impl<S: MatchLogStore> RatingStore<S> {
    /// Load the log from `store` and rebuild the standings by full replay.
    pub fn open(store: S, config: EngineConfig) -> Result<Self, EngineError> {
        Self::with_invariants(store, config, InvariantEngine::standard())
    }

    /// Like [`RatingStore::open`] with a caller-supplied invariant set.
    pub fn with_invariants(
        store: S,
        config: EngineConfig,
        invariants: InvariantEngine,
    ) -> Result<Self, EngineError> {
        let log = store.load()?;
        let standings = replay::replay_standings(&log, &config, &invariants)?;

        info!(
            "opened rating store: {} users, {} tournaments, {} matches",
            log.users().len(),
            log.tournaments().len(),
            log.len()
        );

        Ok(Self {
            validator: MatchValidator::new(&config),
            config,
            invariants,
            writer: Mutex::new(store),
            published: RwLock::new(Arc::new(Snapshot { log, standings })),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn validator(&self) -> &MatchValidator {
        &self.validator
    }

    /// The currently published snapshot. Never blocks on a running mutation.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        let published = self
            .published
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&published)
    }

    pub fn get_user(&self, name: &str) -> Result<User, EngineError> {
        self.snapshot()
            .standings
            .user(name)
            .cloned()
            .ok_or_else(|| NotFoundError::User(name.to_string()).into())
    }

    /// Rating history of a user, oldest first.
    pub fn get_history(&self, name: &str) -> Result<Vec<RatingHistoryEntry>, EngineError> {
        self.snapshot()
            .standings
            .history(name)
            .map(<[RatingHistoryEntry]>::to_vec)
            .ok_or_else(|| NotFoundError::User(name.to_string()).into())
    }

    /// Register a new user at the initial rating.
    pub fn register_user(&self, name: &str, joined: DateTime<Utc>) -> Result<User, EngineError> {
        validate::validate_name(name)?;

        self.mutate(|next, config| {
            if next.standings.user(name).is_some() {
                return Err(ValidationError::AlreadyRegistered(name.to_string()).into());
            }

            let registration = Registration {
                name: name.to_string(),
                joined,
            };
            next.standings.add_user(&registration, config.initial_rating);
            next.log.register_user(registration);

            next.standings
                .user(name)
                .cloned()
                .ok_or_else(|| NotFoundError::User(name.to_string()).into())
        })
        .map(|(user, _)| {
            info!("registered user {} at {}", user.name, user.rating);
            user
        })
    }

    pub fn register_tournament(&self, name: &str, created: DateTime<Utc>) -> Result<(), EngineError> {
        validate::validate_name(name)?;

        self.mutate(|next, _| {
            if name == DEFAULT_TOURNAMENT || next.standings.has_tournament(name) {
                return Err(ValidationError::AlreadyRegistered(name.to_string()).into());
            }

            next.standings.add_tournament(name);
            next.log.register_tournament(Registration {
                name: name.to_string(),
                joined: created,
            });
            Ok(())
        })?;

        info!("registered tournament {name}");
        Ok(())
    }

    /// Validate, decompose and commit one match.
    ///
    /// A record dated before already committed matches is inserted at its
    /// chronological position and everything after it is refolded.
    pub fn apply_match(&self, record: MatchRecord) -> Result<CommittedMatch, EngineError> {
        if let Err(err) = self.validator.validate(&record) {
            warn!("rejected match from {}: {err}", record.submitter);
            return Err(err.into());
        }

        let (committed, _) =
            self.mutate(|next, config| self.fold_new_match(next, record, config))?;

        info!(
            "committed match {} ({} participants, expected: {})",
            committed.key,
            committed.participants.len(),
            committed.expected()
        );
        Ok(committed)
    }

    /// Remove a match and refold every match after it.
    pub fn delete_match(&self, key: &MatchKey) -> Result<LoggedMatch, EngineError> {
        let (removed, _) = self.mutate(|next, config| {
            if next.log.get(key).is_none() {
                return Err(NotFoundError::Match(*key).into());
            }

            let (position, removed) = next.log.remove(key)?;
            replay::replay_from(
                &mut next.standings,
                &next.log,
                position,
                config,
                &self.invariants,
            )?;
            Ok(removed)
        })?;

        info!("deleted match {key}");
        Ok(removed)
    }

    /// Exchange winner and loser of a two-player match and refold from it.
    pub fn switch_users(&self, key: &MatchKey) -> Result<CommittedMatch, EngineError> {
        let (committed, _) = self.mutate(|next, config| {
            let switched = next
                .log
                .get(key)
                .ok_or(NotFoundError::Match(*key))?
                .record
                .switched()
                .ok_or(ValidationError::SwitchUnsupported)?;

            let position = next.log.replace_record(key, switched)?;
            replay::replay_from(
                &mut next.standings,
                &next.log,
                position,
                config,
                &self.invariants,
            )?;

            next.standings
                .committed()
                .get(position)
                .cloned()
                .ok_or_else(|| ConsistencyFailure::MissingCommit(*key).into())
        })?;

        info!("switched winner and loser of match {key}");
        Ok(committed)
    }

    /// Rebuild every rating and history from the log.
    pub fn replay_all(&self) -> Result<Arc<Snapshot>, EngineError> {
        let ((), replayed) = self.mutate(|next, config| {
            next.standings = replay::replay_standings(&next.log, config, &self.invariants)?;
            Ok(())
        })?;

        info!("replayed all matches");
        Ok(replayed)
    }

    /// Log `record` in `next` and fold it together with every later match.
    pub(crate) fn fold_new_match(
        &self,
        next: &mut Snapshot,
        record: MatchRecord,
        config: &EngineConfig,
    ) -> Result<CommittedMatch, EngineError> {
        if let Err(err) = next.standings.check_references(&record) {
            warn!("rejected match from {}: {err}", record.submitter);
            return Err(err.into());
        }

        let key = MatchKey::new();
        let position = next.log.append(LoggedMatch {
            key,
            sequence: next.log.next_sequence(),
            record,
        })?;

        replay::replay_from(
            &mut next.standings,
            &next.log,
            position,
            config,
            &self.invariants,
        )?;

        next.standings
            .committed()
            .get(position)
            .filter(|committed| committed.key == key)
            .cloned()
            .ok_or_else(|| ConsistencyFailure::MissingCommit(key).into())
    }

    /// Run one mutation against a private copy of the published snapshot.
    ///
    /// The writer lock is held for the whole mutation. The copy is only
    /// persisted and published if `change` succeeds; the published snapshot
    /// is returned alongside the output.
    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut Snapshot, &EngineConfig) -> Result<T, EngineError>,
    ) -> Result<(T, Arc<Snapshot>), EngineError> {
        let mut store = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let mut next = Snapshot::clone(&self.snapshot());
        let output = match change(&mut next, &self.config) {
            Ok(output) => output,
            Err(EngineError::Consistency(failure)) => {
                error!("rolled back mutation: {failure}");
                return Err(EngineError::Consistency(failure));
            }
            Err(err) => return Err(err),
        };

        if let Err(err) = store.persist(&next.log) {
            error!("could not persist match log: {err}");
            return Err(err.into());
        }

        let next = Arc::new(next);
        let mut published = self
            .published
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *published = Arc::clone(&next);

        Ok((output, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invariants::{Invariant, InvariantResult};
    use crate::log::{MatchKind, ScoredEntry};
    use crate::state::Roster;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, day, 20, 0, 0).unwrap()
    }

    fn store(names: &[&str]) -> RatingStore<InMemoryLogStore> {
        let store = RatingStore::in_memory(EngineConfig::default_config()).unwrap();
        for name in names {
            store.register_user(name, at(1)).unwrap();
        }
        store
    }

    fn two_player(day: u32, winner: &str, loser: &str) -> MatchRecord {
        MatchRecord {
            tournament: None,
            submitter: "referee".into(),
            date: at(day),
            note: String::new(),
            kind: MatchKind::TwoPlayer {
                players: [winner.into(), loser.into()],
                draw: false,
            },
        }
    }

    fn rating(store: &RatingStore<InMemoryLogStore>, name: &str) -> f64 {
        store.get_user(name).unwrap().rating
    }

    #[test]
    fn apply_match_commits_ratings_and_history() {
        let store = store(&["alice", "bob"]);
        let committed = store.apply_match(two_player(2, "alice", "bob")).unwrap();

        assert_eq!(committed.sequence, 1);
        assert_eq!(rating(&store, "alice"), 1516.0);
        assert_eq!(rating(&store, "bob"), 1484.0);
        assert_eq!(store.get_history("alice").unwrap().len(), 1);
    }

    #[test]
    fn invalid_match_changes_nothing() {
        let store = store(&["alice", "bob", "carol"]);
        store.register_tournament("tta", at(1)).unwrap();
        let before = store.snapshot();

        let record = MatchRecord {
            tournament: Some("tta".into()),
            kind: MatchKind::Scored {
                slots: vec![
                    Some(ScoredEntry {
                        player: "alice".into(),
                        score: 10.0,
                    }),
                    None,
                    Some(ScoredEntry {
                        player: "carol".into(),
                        score: 4.0,
                    }),
                ],
            },
            ..two_player(2, "alice", "bob")
        };

        let err = store.apply_match(record).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::NonContiguousEntry { position: 3 })
        ));
        assert!(Arc::ptr_eq(&before, &store.snapshot()));
    }

    #[test]
    fn unknown_player_is_not_found() {
        let store = store(&["alice"]);
        let err = store.apply_match(two_player(2, "alice", "ghost")).unwrap_err();

        assert!(matches!(
            err,
            EngineError::NotFound(NotFoundError::User(ref name)) if name == "ghost"
        ));
        assert!(store.snapshot().log().is_empty());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let store = store(&["alice"]);

        assert!(matches!(
            store.register_user("alice", at(2)).unwrap_err(),
            EngineError::Validation(ValidationError::AlreadyRegistered(_))
        ));
        assert!(matches!(
            store.register_tournament("Default", at(2)).unwrap_err(),
            EngineError::Validation(ValidationError::AlreadyRegistered(_))
        ));
        assert!(matches!(
            store.register_user("x", at(2)).unwrap_err(),
            EngineError::Validation(ValidationError::InvalidName(_))
        ));
    }

    #[test]
    fn delete_match_refolds_later_matches() {
        let store = store(&["alice", "bob", "carol"]);
        let first = store.apply_match(two_player(2, "alice", "bob")).unwrap();
        store.apply_match(two_player(3, "bob", "carol")).unwrap();

        store.delete_match(&first.key).unwrap();

        // Only bob beating carol from level ratings remains.
        assert_eq!(rating(&store, "alice"), 1500.0);
        assert_eq!(rating(&store, "bob"), 1516.0);
        assert_eq!(rating(&store, "carol"), 1484.0);
        assert!(store.get_history("alice").unwrap().is_empty());
    }

    #[test]
    fn delete_unknown_match_is_not_found() {
        let store = store(&["alice"]);
        let key = MatchKey::new();

        assert!(matches!(
            store.delete_match(&key).unwrap_err(),
            EngineError::NotFound(NotFoundError::Match(k)) if k == key
        ));
    }

    #[test]
    fn switch_users_reverses_outcome() {
        let store = store(&["alice", "bob"]);
        let committed = store.apply_match(two_player(2, "alice", "bob")).unwrap();

        let switched = store.switch_users(&committed.key).unwrap();

        assert_eq!(switched.key, committed.key);
        assert_eq!(rating(&store, "alice"), 1484.0);
        assert_eq!(rating(&store, "bob"), 1516.0);
        assert_eq!(store.get_user("bob").unwrap().wins, 1);
        assert_eq!(store.get_user("alice").unwrap().wins, 0);
    }

    #[test]
    fn back_dated_match_is_folded_in_date_order() {
        let store = store(&["alice", "bob", "carol"]);
        store.apply_match(two_player(5, "bob", "carol")).unwrap();
        let early = store.apply_match(two_player(2, "alice", "bob")).unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.log().matches()[0].key, early.key);
        assert_eq!(early.participants[1].rating_before, 1500.0);

        let direct = store_replaying(&[(2, "alice", "bob"), (5, "bob", "carol")]);
        assert_eq!(snapshot.standings().roster(), direct.snapshot().standings().roster());
    }

    fn store_replaying(matches: &[(u32, &str, &str)]) -> RatingStore<InMemoryLogStore> {
        let store = store(&["alice", "bob", "carol"]);
        for (day, winner, loser) in matches {
            store.apply_match(two_player(*day, winner, loser)).unwrap();
        }
        store
    }

    #[test]
    fn consistency_failure_rolls_back() {
        struct RejectCarol;

        impl Invariant for RejectCarol {
            fn name(&self) -> &'static str {
                "reject-carol"
            }

            fn validate(
                &self,
                _previous: &Roster,
                applied: &CommittedMatch,
                _next: &Standings,
            ) -> InvariantResult {
                if applied.participant("carol").is_some() {
                    InvariantResult::Fail("carol may not play".into())
                } else {
                    InvariantResult::Pass
                }
            }
        }

        let mut invariants = InvariantEngine::standard();
        invariants.register(RejectCarol);
        let store = RatingStore::with_invariants(
            InMemoryLogStore::default(),
            EngineConfig::default_config(),
            invariants,
        )
        .unwrap();
        for name in ["alice", "bob", "carol"] {
            store.register_user(name, at(1)).unwrap();
        }
        store.apply_match(two_player(2, "alice", "bob")).unwrap();
        let before = store.snapshot();

        let err = store.apply_match(two_player(3, "carol", "alice")).unwrap_err();

        assert!(matches!(
            err,
            EngineError::Consistency(ConsistencyFailure::Invariant(_))
        ));
        assert!(Arc::ptr_eq(&before, &store.snapshot()));
        assert_eq!(rating(&store, "alice"), 1516.0);
    }

    #[test]
    fn reopen_replays_persisted_log() {
        let store = store_replaying(&[(2, "alice", "bob"), (3, "carol", "bob")]);
        let log = store.snapshot().log().clone();

        let reopened =
            RatingStore::open(InMemoryLogStore::with_log(log), EngineConfig::default_config())
                .unwrap();

        assert_eq!(
            reopened.snapshot().standings(),
            store.snapshot().standings()
        );
    }

    #[test]
    fn replay_all_reproduces_standings() {
        let store = store_replaying(&[(2, "alice", "bob"), (3, "carol", "bob"), (4, "alice", "carol")]);
        let before = store.snapshot();

        let after = store.replay_all().unwrap();

        assert_eq!(after.standings(), before.standings());
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(Arc::ptr_eq(&after, &store.snapshot()));
    }

    #[test]
    fn replay_all_returns_its_own_snapshot_under_later_writes() {
        let store = store_replaying(&[(2, "alice", "bob")]);

        let replayed = store.replay_all().unwrap();
        store.apply_match(two_player(3, "carol", "bob")).unwrap();

        assert_eq!(replayed.log().len(), 1);
        assert_eq!(replayed.standings().committed().len(), 1);
        assert_eq!(store.snapshot().log().len(), 2);
    }

    #[test]
    fn switching_a_free_for_all_is_rejected() {
        let store = store(&["alice", "bob", "carol"]);
        store.register_tournament("office", at(1)).unwrap();
        let committed = store
            .apply_match(MatchRecord {
                tournament: Some("office".into()),
                kind: MatchKind::FreeForAll {
                    ranking: vec!["carol".into(), "alice".into(), "bob".into()],
                    draws: Vec::new(),
                },
                ..two_player(2, "alice", "bob")
            })
            .unwrap();
        let before = store.snapshot();

        let err = store.switch_users(&committed.key).unwrap_err();

        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::SwitchUnsupported)
        ));
        assert!(Arc::ptr_eq(&before, &store.snapshot()));
        assert_eq!(store.get_user("carol").unwrap().wins, 2);
    }

    #[test]
    fn open_refuses_log_with_malformed_match() {
        let mut log = MatchLog::new();
        for name in ["alice", "bob"] {
            log.register_user(Registration {
                name: name.into(),
                joined: at(1),
            });
        }
        log.append(LoggedMatch {
            key: MatchKey::new(),
            sequence: log.next_sequence(),
            record: MatchRecord {
                tournament: Some(DEFAULT_TOURNAMENT.into()),
                kind: MatchKind::FreeForAll {
                    ranking: vec!["alice".into(), "bob".into(), "alice".into()],
                    draws: Vec::new(),
                },
                ..two_player(2, "alice", "bob")
            },
        })
        .unwrap();

        let err = RatingStore::open(InMemoryLogStore::with_log(log), EngineConfig::default_config())
            .err()
            .unwrap();

        assert!(matches!(
            err,
            EngineError::Consistency(ConsistencyFailure::InvalidRecord {
                reason: ValidationError::DuplicatePlayer(ref name),
                ..
            }) if name == "alice"
        ));
    }
}
