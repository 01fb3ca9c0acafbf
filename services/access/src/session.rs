//! Entry/exit session state machine
//!
//! A user's session state is never stored on its own. It is derived from the
//! latest granted scan in the log, which also supplies the transition
//! sequence number the next granted scan must claim.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{DenialReason, ScanEvent, ScanType, UserId};

/// Whether a user is currently inside the facility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Outside,
    Inside,
}

/// Result of applying a scan to a session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Accepted(SessionState),
    Rejected(DenialReason),
}

/// Session state as of a given log position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    /// Sequence number of the latest granted scan, 0 when there is none
    pub last_seq: i64,
}

impl SessionSnapshot {
    /// Derive the snapshot from the latest granted event for a user
    pub fn from_latest_granted(latest: Option<&ScanEvent>) -> Self {
        match latest.filter(|event| event.is_granted()) {
            Some(event) => Self {
                state: match event.scan_type {
                    ScanType::Entry => SessionState::Inside,
                    ScanType::Exit => SessionState::Outside,
                },
                last_seq: event.transition_seq.unwrap_or(0),
            },
            None => Self {
                state: SessionState::Outside,
                last_seq: 0,
            },
        }
    }

    /// Sequence slot a granted scan from this snapshot must claim
    pub fn next_seq(&self) -> i64 {
        self.last_seq + 1
    }
}

/// Apply `scan_type` to `current`
///
/// Only an entry leaves `Outside` and only an exit leaves `Inside`; any other
/// combination is rejected as a state violation.
pub fn next_state(user_id: &UserId, scan_type: ScanType, current: SessionState) -> Transition {
    let transition = match (current, scan_type) {
        (SessionState::Outside, ScanType::Entry) => Transition::Accepted(SessionState::Inside),
        (SessionState::Inside, ScanType::Exit) => Transition::Accepted(SessionState::Outside),
        _ => Transition::Rejected(DenialReason::WrongScanTypeForState),
    };

    debug!(
        "Session transition for {}: {:?} + {} -> {:?}",
        user_id,
        current,
        scan_type.as_str(),
        transition
    );

    transition
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ScanAttempt, ScanResult};
    use chrono::Utc;
    use uuid::Uuid;

    fn user() -> UserId {
        UserId::parse("U1").unwrap()
    }

    fn event(scan_type: ScanType, seq: i64) -> ScanEvent {
        let attempt = ScanAttempt {
            scan_type,
            scanned_at: Utc::now(),
            scanned_by: "op".to_string(),
            location: "gate".to_string(),
        };
        ScanEvent::granted(&attempt, user(), Uuid::new_v4(), seq)
    }

    /// Replays a scan sequence from `Outside`, returning each decision
    fn run(scans: &[ScanType]) -> Vec<Transition> {
        let mut state = SessionState::Outside;
        scans
            .iter()
            .map(|scan| {
                let transition = next_state(&user(), *scan, state);
                if let Transition::Accepted(next) = transition {
                    state = next;
                }
                transition
            })
            .collect()
    }

    #[test]
    fn test_transition_table() {
        assert_eq!(
            next_state(&user(), ScanType::Entry, SessionState::Outside),
            Transition::Accepted(SessionState::Inside)
        );
        assert_eq!(
            next_state(&user(), ScanType::Exit, SessionState::Inside),
            Transition::Accepted(SessionState::Outside)
        );
        assert_eq!(
            next_state(&user(), ScanType::Entry, SessionState::Inside),
            Transition::Rejected(DenialReason::WrongScanTypeForState)
        );
        assert_eq!(
            next_state(&user(), ScanType::Exit, SessionState::Outside),
            Transition::Rejected(DenialReason::WrongScanTypeForState)
        );
    }

    #[test]
    fn test_sequences_from_outside() {
        use ScanType::{Entry, Exit};
        let rejected = Transition::Rejected(DenialReason::WrongScanTypeForState);

        assert_eq!(
            run(&[Entry, Entry]),
            vec![Transition::Accepted(SessionState::Inside), rejected]
        );
        assert_eq!(
            run(&[Entry, Exit]),
            vec![
                Transition::Accepted(SessionState::Inside),
                Transition::Accepted(SessionState::Outside)
            ]
        );
        assert_eq!(run(&[Exit]), vec![rejected]);

        // A rejected scan leaves the state untouched
        let decisions = run(&[Entry, Entry, Exit, Exit, Entry]);
        let accepted = decisions
            .iter()
            .filter(|t| matches!(t, Transition::Accepted(_)))
            .count();
        assert_eq!(accepted, 3);
    }

    #[test]
    fn test_snapshot_from_log() {
        let empty = SessionSnapshot::from_latest_granted(None);
        assert_eq!(empty.state, SessionState::Outside);
        assert_eq!(empty.next_seq(), 1);

        let inside = SessionSnapshot::from_latest_granted(Some(&event(ScanType::Entry, 4)));
        assert_eq!(inside.state, SessionState::Inside);
        assert_eq!(inside.next_seq(), 5);

        let outside = SessionSnapshot::from_latest_granted(Some(&event(ScanType::Exit, 5)));
        assert_eq!(outside.state, SessionState::Outside);
    }

    #[test]
    fn test_snapshot_ignores_denied_events() {
        let mut denied = event(ScanType::Entry, 2);
        denied.outcome = ScanResult::Denied;
        let snapshot = SessionSnapshot::from_latest_granted(Some(&denied));
        assert_eq!(snapshot.state, SessionState::Outside);
    }
}
