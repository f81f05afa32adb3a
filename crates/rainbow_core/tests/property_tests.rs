//! Property-based tests for rainbow_core.
//!
//! The session invariants must hold for every completion order and every
//! corrupted session row, not just the hand-picked cases in the unit tests.

use proptest::prelude::*;
use rainbow_core::machine::{complete, start, Outcome};
use rainbow_core::{reconcile, ActivityLedger, Routine, RoutineSession, SessionStatus};

// ============================================================================
// Strategies
// ============================================================================

/// A routine of 1..=8 activities plus a sequence of in-range completions.
fn arb_routine_and_completions() -> impl Strategy<Value = (usize, Vec<usize>)> {
    (1usize..=8).prop_flat_map(|n| (Just(n), prop::collection::vec(0..n, 0..24)))
}

fn arb_status() -> impl Strategy<Value = SessionStatus> {
    prop_oneof![Just(SessionStatus::InProgress), Just(SessionStatus::Completed)]
}

/// A session row whose derived fields may be anything at all.
fn arb_session() -> impl Strategy<Value = RoutineSession> {
    (
        arb_status(),
        0usize..20,
        prop_oneof![-50.0f64..250.0, Just(f64::NAN)],
        prop::option::of(0i64..1000),
    )
        .prop_map(|(status, current_activity, progress, completed_at)| RoutineSession {
            id: 1,
            routine_id: 1,
            child_id: 1,
            status,
            current_activity,
            progress,
            started_at: 0,
            completed_at,
        })
}

fn arb_ledger() -> impl Strategy<Value = ActivityLedger> {
    prop::collection::vec(any::<bool>(), 0..10).prop_map(|flags| {
        let mut ledger = ActivityLedger::from_names((0..flags.len()).map(|i| format!("step {}", i)));
        for (i, done) in flags.iter().enumerate() {
            if *done {
                let _ = ledger.mark_complete(i, 1);
            }
        }
        ledger
    })
}

fn fresh(n: usize) -> (Routine, RoutineSession) {
    let mut routine = Routine::new(1, "Routine", (0..n).map(|i| format!("activity {}", i)), None, 0);
    routine.id = 1;
    let mut session = start(&mut routine, 0);
    session.id = 1;
    (routine, session)
}

// ============================================================================
// State machine properties
// ============================================================================

proptest! {
    /// Progress never decreases across completions and never exceeds 100.
    #[test]
    fn progress_is_monotonic((n, indices) in arb_routine_and_completions()) {
        let (mut routine, mut session) = fresh(n);
        let mut last = session.progress;
        for (t, index) in indices.into_iter().enumerate() {
            let step = complete(&mut routine, &session, index, t as i64 + 1).unwrap();
            session = step.session;
            prop_assert!(session.progress >= last - 1e-9, "{} dropped to {}", last, session.progress);
            prop_assert!(session.progress <= 100.0 + 1e-9);
            prop_assert!(session.current_activity < n);
            last = session.progress;
        }
    }

    /// Completing the same index twice leaves the same state as completing it once.
    #[test]
    fn repeated_completion_is_idempotent((n, indices) in arb_routine_and_completions(), extra in 0usize..8) {
        let index = extra % n;
        let (mut once_routine, mut once) = fresh(n);
        for (t, i) in indices.iter().enumerate() {
            once = complete(&mut once_routine, &once, *i, t as i64 + 1).unwrap().session;
        }
        let mut twice_routine = once_routine.clone();

        let once_step = complete(&mut once_routine, &once, index, 100).unwrap();
        let first = complete(&mut twice_routine, &once, index, 100).unwrap();
        let second = complete(&mut twice_routine, &first.session, index, 200).unwrap();

        prop_assert_eq!(&second.session, &once_step.session);
        prop_assert_eq!(twice_routine.activities(), once_routine.activities());
        prop_assert!(matches!(
            second.outcome,
            Outcome::ActivityAlreadyComplete { .. } | Outcome::AlreadyTerminal
        ), "unexpected outcome on second complete: {:?}", second.outcome);
    }

    /// Once every activity is done the session is completed with progress 100.
    #[test]
    fn completing_everything_terminates(n in 1usize..=8) {
        let (mut routine, mut session) = fresh(n);
        for i in (0..n).rev() {
            session = complete(&mut routine, &session, i, 10).unwrap().session;
        }
        prop_assert_eq!(session.status, SessionStatus::Completed);
        prop_assert!((session.progress - 100.0).abs() < 1e-9);
        prop_assert_eq!(session.current_activity, n - 1);
        prop_assert_eq!(session.completed_at, Some(10));
    }
}

// ============================================================================
// Reconciler properties
// ============================================================================

proptest! {
    /// Reconciling an already-reconciled session changes nothing.
    #[test]
    fn reconcile_is_a_fixpoint(session in arb_session(), ledger in arb_ledger()) {
        let once = reconcile(&session, &ledger, 500);
        let twice = reconcile(&once.session, &ledger, 900);
        prop_assert!(!twice.changed(), "second pass corrected {:?}", twice.corrections);
        prop_assert_eq!(twice.session.completed_at, once.session.completed_at);
    }

    /// An in-progress session comes out satisfying the ledger invariant.
    #[test]
    fn reconcile_restores_invariant(mut session in arb_session(), ledger in arb_ledger()) {
        session.status = SessionStatus::InProgress;
        let fixed = reconcile(&session, &ledger, 500).session;

        let total = ledger.len();
        let done = ledger.completed_count();
        let expected = if total == 0 { 0.0 } else { done as f64 / total as f64 * 100.0 };
        prop_assert!((fixed.progress - expected).abs() < 1e-9);
        prop_assert!(fixed.progress >= 0.0 && fixed.progress <= 100.0);
        match ledger.first_incomplete() {
            Some(i) => prop_assert_eq!(fixed.current_activity, i),
            None => prop_assert_eq!(fixed.current_activity, total.saturating_sub(1)),
        }
        prop_assert_eq!(fixed.status == SessionStatus::Completed, total > 0 && done == total);
    }
}

#[test]
fn zero_activity_routine_starts_completed() {
    let (_, session) = fresh(0);
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.progress, 100.0);
    assert!(session.completed_at.is_some());
}
