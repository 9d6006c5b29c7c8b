// Match Preview
//
// Runs a submission through validation, decomposition and the Elo
// updater against a private copy of the current snapshot. Nothing is
// logged, persisted or published.
//
// This is:
// - deterministic for a given snapshot
// - side-effect free
// - safe to run concurrently with mutations

use serde::Serialize;

use crate::log::{MatchLogStore, MatchRecord};
use crate::ratings::{EngineError, RatingStore, Snapshot};
use crate::state::CommittedMatch;

/// What committing a record would do right now.
#[derive(Debug, Clone, Serialize)]
pub struct PreviewOutcome {
    /// The match as it would be folded. Its key is throwaway.
    pub committed: CommittedMatch,

    /// Number of already logged matches dated after this one that would
    /// be refolded.
    pub refolded: usize,
}

impl<S: MatchLogStore> RatingStore<S> {
    /// Dry-run `record` against the published snapshot.
    pub fn preview_match(&self, record: MatchRecord) -> Result<PreviewOutcome, EngineError> {
        self.validator().validate(&record)?;

        let current = self.snapshot();
        let mut next = Snapshot::clone(&current);
        let committed = self.fold_new_match(&mut next, record, self.config())?;

        let refolded = current
            .log()
            .matches()
            .iter()
            .filter(|logged| logged.record.date > committed.record.date)
            .count();

        Ok(PreviewOutcome {
            committed,
            refolded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::log::{InMemoryLogStore, MatchKind};
    use crate::validate::ValidationError;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::Arc;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 10, day, 19, 30, 0).unwrap()
    }

    fn record(day: u32, winner: &str, loser: &str) -> MatchRecord {
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

    fn store() -> RatingStore<InMemoryLogStore> {
        let store = RatingStore::in_memory(EngineConfig::default_config()).unwrap();
        for name in ["alice", "bob", "carol"] {
            store.register_user(name, at(1)).unwrap();
        }
        store
    }

    #[test]
    fn preview_does_not_publish() {
        let store = store();
        let before = store.snapshot();

        let outcome = store.preview_match(record(2, "alice", "bob")).unwrap();

        assert_eq!(outcome.committed.participants[0].rating_after, 1516.0);
        assert_eq!(outcome.refolded, 0);
        assert!(Arc::ptr_eq(&before, &store.snapshot()));
        assert_eq!(store.get_user("alice").unwrap().rating, 1500.0);
    }

    #[test]
    fn preview_matches_actual_commit() {
        let store = store();
        store.apply_match(record(3, "bob", "carol")).unwrap();

        let preview = store.preview_match(record(2, "alice", "bob")).unwrap();
        let actual = store.apply_match(record(2, "alice", "bob")).unwrap();

        assert_eq!(preview.refolded, 1);
        assert_eq!(preview.committed.participants, actual.participants);
        assert_eq!(preview.committed.pairings, actual.pairings);
    }

    #[test]
    fn preview_reports_validation_errors() {
        let store = store();
        let err = store.preview_match(record(2, "alice", "alice")).unwrap_err();

        assert!(matches!(err, EngineError::Validation(ValidationError::SamePlayer)));
    }
}
