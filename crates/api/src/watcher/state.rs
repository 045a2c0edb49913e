//! Pure transition planning for the scan lifecycle state machine.
//!
//! Status moves monotonically along pending → running → {completed, failed};
//! terminal states are absorbing. Keeping the planning separate from the
//! watcher loop makes the machine testable without a database or bus.

use crate::scans::models::ScanStatus;

/// A planned status change with its side-effect flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Transition {
    pub to: ScanStatus,
    /// Drain the output ring into the scan row (any terminal state).
    pub drain_output: bool,
    /// Ingest the structured result blob and classify findings
    /// (completed only).
    pub process_results: bool,
}

/// Plan the transition from `current` given an observed scanner status.
/// Returns None when the observation is a no-op (same state, backwards
/// move, or the scan is already terminal).
pub(crate) fn plan_transition(current: ScanStatus, observed: ScanStatus) -> Option<Transition> {
    if current.is_terminal() || observed == current || observed == ScanStatus::Pending {
        return None;
    }

    Some(Transition {
        to: observed,
        drain_output: observed.is_terminal(),
        process_results: observed == ScanStatus::Completed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_to_running() {
        let t = plan_transition(ScanStatus::Pending, ScanStatus::Running).unwrap();
        assert_eq!(t.to, ScanStatus::Running);
        assert!(!t.drain_output);
        assert!(!t.process_results);
    }

    #[test]
    fn test_pending_straight_to_terminal() {
        let t = plan_transition(ScanStatus::Pending, ScanStatus::Completed).unwrap();
        assert!(t.drain_output);
        assert!(t.process_results);

        let t = plan_transition(ScanStatus::Pending, ScanStatus::Failed).unwrap();
        assert!(t.drain_output);
        assert!(!t.process_results);
    }

    #[test]
    fn test_running_to_terminal() {
        let t = plan_transition(ScanStatus::Running, ScanStatus::Completed).unwrap();
        assert!(t.process_results);

        let t = plan_transition(ScanStatus::Running, ScanStatus::Failed).unwrap();
        assert!(!t.process_results);
    }

    #[test]
    fn test_terminal_states_absorb() {
        for current in [ScanStatus::Completed, ScanStatus::Failed] {
            for observed in [
                ScanStatus::Pending,
                ScanStatus::Running,
                ScanStatus::Completed,
                ScanStatus::Failed,
            ] {
                assert_eq!(plan_transition(current, observed), None);
            }
        }
    }

    #[test]
    fn test_no_backwards_or_self_transitions() {
        assert_eq!(plan_transition(ScanStatus::Running, ScanStatus::Pending), None);
        assert_eq!(plan_transition(ScanStatus::Pending, ScanStatus::Pending), None);
        assert_eq!(plan_transition(ScanStatus::Running, ScanStatus::Running), None);
    }
}
