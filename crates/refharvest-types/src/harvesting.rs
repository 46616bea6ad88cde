use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The lifecycle state of a single harvester's participation in a retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarvestingState {
    /// Registered but not yet started.
    Idle,
    /// Currently fetching and converting references.
    Running,
    /// Finished without error.
    Completed,
    /// Finished with an error; see `Harvesting::error`.
    Failed,
}

impl HarvestingState {
    /// Whether this state is terminal (no further transitions expected).
    pub fn is_terminal(self) -> bool {
        matches!(self, HarvestingState::Completed | HarvestingState::Failed)
    }

    /// Whether `self -> next` is an allowed transition.
    pub fn can_transition_to(self, next: HarvestingState) -> bool {
        use HarvestingState::*;
        matches!(
            (self, next),
            (Idle, Running) | (Running, Completed) | (Running, Failed)
        )
    }
}

/// A classification of why a harvesting failed, distinct from the raw error
/// message so callers can branch on cause without string matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarvestingError {
    /// The harvester rejected the retrieval as not applicable to it.
    NotRelevant,
    /// The upstream source could not be reached or returned an error.
    SourceUnavailable,
    /// A fetched payload could not be converted into a reference.
    ConversionFailed,
    /// The harvesting was cancelled before completion.
    Cancelled,
}

/// One harvester's run within a `Retrieval`: its state, timing, and the
/// counts the orchestrator reports back over the result channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Harvesting {
    /// Storage identifier, assigned once persisted.
    pub id: Option<Uuid>,
    /// The retrieval this harvesting belongs to.
    pub retrieval_id: Uuid,
    /// The harvester name, e.g. `"hal"`, `"idref"`.
    pub harvester: String,
    /// Current lifecycle state.
    pub state: HarvestingState,
    /// When this harvesting transitioned out of `Idle`.
    pub started_at: Option<DateTime<Utc>>,
    /// When this harvesting reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Present once `state` is `Failed`.
    pub error: Option<HarvestingError>,
    /// Number of reference events emitted so far.
    pub event_count: u64,
}

impl Harvesting {
    /// A freshly registered, not-yet-started harvesting.
    pub fn idle(retrieval_id: Uuid, harvester: impl Into<String>) -> Self {
        Self {
            id: None,
            retrieval_id,
            harvester: harvester.into(),
            state: HarvestingState::Idle,
            started_at: None,
            finished_at: None,
            error: None,
            event_count: 0,
        }
    }

    /// Transition to `next`, recording timestamps. Returns `false` (and
    /// leaves `self` unchanged) if the transition isn't allowed.
    pub fn transition(&mut self, next: HarvestingState, at: DateTime<Utc>) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        match next {
            HarvestingState::Running => self.started_at = Some(at),
            HarvestingState::Completed | HarvestingState::Failed => self.finished_at = Some(at),
            HarvestingState::Idle => {}
        }
        self.state = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_to_running_to_completed_is_allowed() {
        let mut h = Harvesting::idle(Uuid::new_v4(), "hal");
        let t0 = Utc::now();
        assert!(h.transition(HarvestingState::Running, t0));
        assert_eq!(h.started_at, Some(t0));
        assert!(h.transition(HarvestingState::Completed, t0));
        assert!(h.state.is_terminal());
    }

    #[test]
    fn idle_to_completed_is_rejected() {
        let mut h = Harvesting::idle(Uuid::new_v4(), "hal");
        assert!(!h.transition(HarvestingState::Completed, Utc::now()));
        assert_eq!(h.state, HarvestingState::Idle);
    }

    #[test]
    fn terminal_states_have_no_outgoing_transitions() {
        assert!(!HarvestingState::Completed.can_transition_to(HarvestingState::Running));
        assert!(!HarvestingState::Failed.can_transition_to(HarvestingState::Running));
    }
}
