//! Pure state-machine transitions for the repository lifecycle.
//!
//! Workers and the submission facade never assign `RepoState` directly: they
//! produce a [`RepoEvent`] and persist whatever [`apply`] returns. Keeping
//! the transition function pure makes the legal lifecycle exhaustively
//! testable without a database.
//!
//! ```text
//! pending            --CommitJobStarted-->   commits_processing
//! commits_processing --CommitsExtracted-->   users_processing
//! commits_processing --CommitPhaseFailed-->  failed
//! users_processing   --BatchSettled{n>0}-->  users_processing
//! users_processing   --BatchSettled{0}-->    completed
//! failed | completed --Resubmitted-->        pending
//! ```

use thiserror::Error;

use crate::types::RepoState;

/// Something that happened to a repository, produced by workers or the
/// submission facade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoEvent {
    /// A commit worker claimed the repository's commit job. Legal as a
    /// re-entry from the processing states and from `Failed` so that jobs
    /// re-delivered after a crash can restart the phase.
    CommitJobStarted,

    /// The commit phase persisted a fresh author histogram.
    CommitsExtracted,

    /// The commit phase failed; `reason` is the user-visible explanation.
    CommitPhaseFailed { reason: String },

    /// An identity batch committed its transaction; `remaining` is the number
    /// of unprocessed commit-data rows left for the repository.
    BatchSettled { remaining: u64 },

    /// The caller re-drove a finished (failed or completed) repository.
    Resubmitted,
}

impl RepoEvent {
    /// Short name for error messages and logs.
    pub fn name(&self) -> &'static str {
        match self {
            RepoEvent::CommitJobStarted => "commit_job_started",
            RepoEvent::CommitsExtracted => "commits_extracted",
            RepoEvent::CommitPhaseFailed { .. } => "commit_phase_failed",
            RepoEvent::BatchSettled { .. } => "batch_settled",
            RepoEvent::Resubmitted => "resubmitted",
        }
    }
}

/// Rejected transition: the event is not legal in the current state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event} while {state}")]
pub struct TransitionError {
    pub state: RepoState,
    pub event: &'static str,
}

/// Computes the state that follows `event` in `state`.
///
/// Total over all inputs; illegal combinations return [`TransitionError`]
/// rather than panicking.
pub fn apply(state: RepoState, event: &RepoEvent) -> Result<RepoState, TransitionError> {
    use RepoState::*;

    match (state, event) {
        // A claimed commit job always owns the commit phase. Re-entry from
        // the processing states covers crash-recovered job deliveries.
        (Pending | CommitsProcessing | UsersProcessing | Failed, RepoEvent::CommitJobStarted) => {
            Ok(CommitsProcessing)
        }

        (CommitsProcessing, RepoEvent::CommitsExtracted) => Ok(UsersProcessing),
        (CommitsProcessing, RepoEvent::CommitPhaseFailed { .. }) => Ok(Failed),

        (UsersProcessing, RepoEvent::BatchSettled { remaining: 0 }) => Ok(Completed),
        (UsersProcessing, RepoEvent::BatchSettled { .. }) => Ok(UsersProcessing),

        (Failed | Completed, RepoEvent::Resubmitted) => Ok(Pending),

        (state, event) => Err(TransitionError {
            state,
            event: event.name(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn all_states() -> [RepoState; 5] {
        [
            RepoState::Pending,
            RepoState::CommitsProcessing,
            RepoState::UsersProcessing,
            RepoState::Completed,
            RepoState::Failed,
        ]
    }

    fn arb_state() -> impl Strategy<Value = RepoState> {
        prop::sample::select(all_states().to_vec())
    }

    fn arb_event() -> impl Strategy<Value = RepoEvent> {
        prop_oneof![
            Just(RepoEvent::CommitJobStarted),
            Just(RepoEvent::CommitsExtracted),
            "[a-z ]{0,30}".prop_map(|reason| RepoEvent::CommitPhaseFailed { reason }),
            (0u64..5).prop_map(|remaining| RepoEvent::BatchSettled { remaining }),
            Just(RepoEvent::Resubmitted),
        ]
    }

    // ─── Legal transitions ────────────────────────────────────────────────────

    #[test]
    fn happy_path_reaches_completed() {
        let mut state = RepoState::Pending;
        state = apply(state, &RepoEvent::CommitJobStarted).unwrap();
        assert_eq!(state, RepoState::CommitsProcessing);
        state = apply(state, &RepoEvent::CommitsExtracted).unwrap();
        assert_eq!(state, RepoState::UsersProcessing);
        state = apply(state, &RepoEvent::BatchSettled { remaining: 40 }).unwrap();
        assert_eq!(state, RepoState::UsersProcessing);
        state = apply(state, &RepoEvent::BatchSettled { remaining: 0 }).unwrap();
        assert_eq!(state, RepoState::Completed);
    }

    #[test]
    fn commit_phase_failure_then_resubmit() {
        let state = apply(RepoState::Pending, &RepoEvent::CommitJobStarted).unwrap();
        let state = apply(
            state,
            &RepoEvent::CommitPhaseFailed {
                reason: "repository not found".to_string(),
            },
        )
        .unwrap();
        assert_eq!(state, RepoState::Failed);
        let state = apply(state, &RepoEvent::Resubmitted).unwrap();
        assert_eq!(state, RepoState::Pending);
    }

    #[test]
    fn completed_can_be_resubmitted_for_refresh() {
        let state = apply(RepoState::Completed, &RepoEvent::Resubmitted).unwrap();
        assert_eq!(state, RepoState::Pending);
    }

    #[test]
    fn crash_recovered_commit_job_reenters_processing() {
        for from in [
            RepoState::CommitsProcessing,
            RepoState::UsersProcessing,
            RepoState::Failed,
        ] {
            assert_eq!(
                apply(from, &RepoEvent::CommitJobStarted).unwrap(),
                RepoState::CommitsProcessing
            );
        }
    }

    // ─── Illegal transitions ──────────────────────────────────────────────────

    #[test]
    fn resubmit_is_illegal_while_processing() {
        for from in [RepoState::CommitsProcessing, RepoState::UsersProcessing] {
            let err = apply(from, &RepoEvent::Resubmitted).unwrap_err();
            assert_eq!(err.state, from);
            assert_eq!(err.event, "resubmitted");
        }
        assert!(apply(RepoState::Pending, &RepoEvent::Resubmitted).is_err());
    }

    #[test]
    fn batch_settled_only_applies_while_users_processing() {
        for from in [
            RepoState::Pending,
            RepoState::CommitsProcessing,
            RepoState::Completed,
            RepoState::Failed,
        ] {
            assert!(apply(from, &RepoEvent::BatchSettled { remaining: 0 }).is_err());
        }
    }

    #[test]
    fn completed_repositories_cannot_restart_without_resubmission() {
        assert!(apply(RepoState::Completed, &RepoEvent::CommitJobStarted).is_err());
    }

    // ─── Properties ───────────────────────────────────────────────────────────

    proptest! {
        #[test]
        fn apply_is_total(state in arb_state(), event in arb_event()) {
            // Must never panic, whatever the combination.
            let _ = apply(state, &event);
        }

        #[test]
        fn completed_only_exits_via_resubmission(event in arb_event()) {
            let result = apply(RepoState::Completed, &event);
            match event {
                RepoEvent::Resubmitted => prop_assert_eq!(result.unwrap(), RepoState::Pending),
                _ => prop_assert!(result.is_err()),
            }
        }

        #[test]
        fn transitions_stay_inside_the_state_set(state in arb_state(), event in arb_event()) {
            if let Ok(next) = apply(state, &event) {
                prop_assert!(all_states().contains(&next));
            }
        }
    }
}
