//! Call tokens and the per-call state machine
//!
//! The engine assigns every call attempt an opaque token. The bus tracks a
//! small state machine per token so late indications against a cleared call
//! can be flagged as stale instead of being delivered as live traffic.
//!
//! Outbound calls progress `Proceeding → Alerting → Established → Cleared`;
//! inbound calls enter at `Incoming`. A failed setup can clear without ever
//! progressing. `Cleared` is terminal: the token stays known as a tombstone
//! so anything that still references it is recognizably stale.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::envelope::Indication;

/// Opaque, engine-assigned identifier for one call attempt
pub type CallToken = String;

/// State of one call attempt, as observed from indications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    /// Inbound call awaiting an answer
    Incoming,
    /// Outbound call accepted by the engine
    Proceeding,
    /// Remote party is alerting
    Alerting,
    /// Media is flowing
    Established,
    /// Call is over; terminal
    Cleared,
}

impl CallState {
    fn rank(&self) -> u8 {
        match self {
            CallState::Incoming => 0,
            CallState::Proceeding => 1,
            CallState::Alerting => 2,
            CallState::Established => 3,
            CallState::Cleared => 4,
        }
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CallState::Incoming => "incoming",
            CallState::Proceeding => "proceeding",
            CallState::Alerting => "alerting",
            CallState::Established => "established",
            CallState::Cleared => "cleared",
        };
        write!(f, "{}", s)
    }
}

/// Tracks the call state machine for every token the bus has seen
///
/// Written only by the indication consumer; read anywhere. Cleared tokens
/// are kept as tombstones so stale indications remain detectable.
#[derive(Debug, Default)]
pub struct CallStateTracker {
    states: DashMap<CallToken, CallState>,
}

impl CallStateTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self {
            states: DashMap::new(),
        }
    }

    /// Current state of `token`, if the bus has seen it
    pub fn state(&self, token: &str) -> Option<CallState> {
        self.states.get(token).map(|entry| *entry.value())
    }

    /// Whether `token` has reached its terminal state
    pub fn is_cleared(&self, token: &str) -> bool {
        self.state(token) == Some(CallState::Cleared)
    }

    /// Number of tokens currently tracked, tombstones included
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Apply `indication` to the state machine
    ///
    /// Returns `false` when the indication references a token that is
    /// already cleared, i.e. the indication is stale. Indications that do
    /// not reference a call are always fresh. State only moves forward;
    /// an out-of-order progress indication is delivered but does not
    /// regress the recorded state.
    pub fn observe(&self, indication: &Indication) -> bool {
        let token = match indication.call_token() {
            Ok(token) => token.to_string(),
            Err(_) => return true,
        };

        let next = match indication {
            Indication::IncomingCall(_) => CallState::Incoming,
            Indication::Proceeding { .. } => CallState::Proceeding,
            Indication::Alerting(_) => CallState::Alerting,
            Indication::Established(_) => CallState::Established,
            Indication::CallCleared(_) => CallState::Cleared,
            // Media, user input, transfer and IVR traffic rides on the
            // call without changing its signaling state.
            _ => {
                return !self.is_cleared(&token);
            }
        };

        let mut stale = false;
        self.states
            .entry(token)
            .and_modify(|state| {
                if *state == CallState::Cleared {
                    stale = true;
                } else if next.rank() > state.rank() {
                    *state = next;
                }
            })
            .or_insert(next);
        !stale
    }

    /// Drop a token, tombstone included
    ///
    /// Useful once a caller has finished processing a cleared call and no
    /// late indications are expected anymore.
    pub fn forget(&self, token: &str) {
        self.states.remove(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{CallClearedInfo, CallProgressInfo};

    fn proceeding(token: &str) -> Indication {
        Indication::Proceeding {
            call_token: token.to_string(),
        }
    }

    fn established(token: &str) -> Indication {
        Indication::Established(CallProgressInfo {
            call_token: token.to_string(),
            party_a: None,
            party_b: None,
        })
    }

    fn cleared(token: &str) -> Indication {
        Indication::CallCleared(CallClearedInfo {
            call_token: token.to_string(),
            reason: None,
        })
    }

    #[test]
    fn outbound_call_progresses_to_cleared() {
        let tracker = CallStateTracker::new();
        assert!(tracker.observe(&proceeding("t1")));
        assert_eq!(tracker.state("t1"), Some(CallState::Proceeding));
        assert!(tracker.observe(&established("t1")));
        assert_eq!(tracker.state("t1"), Some(CallState::Established));
        assert!(tracker.observe(&cleared("t1")));
        assert!(tracker.is_cleared("t1"));
    }

    #[test]
    fn indications_after_clear_are_stale() {
        let tracker = CallStateTracker::new();
        assert!(tracker.observe(&cleared("t1")));
        assert!(!tracker.observe(&established("t1")));
        assert!(!tracker.observe(&cleared("t1")));
    }

    #[test]
    fn failed_setup_clears_directly() {
        let tracker = CallStateTracker::new();
        assert!(tracker.observe(&cleared("t2")));
        assert_eq!(tracker.state("t2"), Some(CallState::Cleared));
    }

    #[test]
    fn out_of_order_progress_does_not_regress() {
        let tracker = CallStateTracker::new();
        assert!(tracker.observe(&established("t3")));
        assert!(tracker.observe(&proceeding("t3")));
        assert_eq!(tracker.state("t3"), Some(CallState::Established));
    }

    #[test]
    fn forget_drops_tombstones() {
        let tracker = CallStateTracker::new();
        tracker.observe(&cleared("t4"));
        tracker.forget("t4");
        assert_eq!(tracker.state("t4"), None);
        assert!(tracker.observe(&proceeding("t4")));
    }
}
