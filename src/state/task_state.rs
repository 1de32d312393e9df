/// Task state definitions for tracking fetch progress
///
/// This module defines every state a fetch task moves through and the
/// transitions allowed between them.
use std::fmt;

/// Represents the current state of a task in the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskState {
    // ===== Active States =====
    /// Task is waiting in the queue
    Queued,

    /// A worker is leasing an identity and an egress resource for the task
    Leasing,

    /// Task is currently being fetched
    Fetching,

    /// Task failed and will re-enter the queue after a delay
    RetryScheduled,

    // ===== Terminal States =====
    /// Content was fetched and is not a duplicate
    Succeeded,

    /// Content was fetched and matched earlier content
    Duplicate,

    /// Task gave up (fatal response or retries exhausted)
    Failed,
}

impl TaskState {
    /// Returns true if this is a terminal state (no further processing needed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Duplicate | Self::Failed)
    }

    /// Returns true if the task is still owned by the scheduler
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if content was delivered to the sink
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Duplicate)
    }

    /// Returns true if moving from `self` to `next` is a legal transition
    ///
    /// `Leasing -> RetryScheduled` covers tasks put back because a pool was
    /// empty; those do not consume an attempt.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Leasing)
                | (Self::Leasing, Self::Fetching)
                | (Self::Leasing, Self::RetryScheduled)
                | (Self::Fetching, Self::Succeeded)
                | (Self::Fetching, Self::Duplicate)
                | (Self::Fetching, Self::RetryScheduled)
                | (Self::Fetching, Self::Failed)
                | (Self::RetryScheduled, Self::Queued)
        )
    }

    /// Converts the task state to a database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Leasing => "leasing",
            Self::Fetching => "fetching",
            Self::RetryScheduled => "retry_scheduled",
            Self::Succeeded => "succeeded",
            Self::Duplicate => "duplicate",
            Self::Failed => "failed",
        }
    }

    /// Parses a task state from a database string representation
    ///
    /// Returns None if the string doesn't match any known state.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "leasing" => Some(Self::Leasing),
            "fetching" => Some(Self::Fetching),
            "retry_scheduled" => Some(Self::RetryScheduled),
            "succeeded" => Some(Self::Succeeded),
            "duplicate" => Some(Self::Duplicate),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all possible task states
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Queued,
            Self::Leasing,
            Self::Fetching,
            Self::RetryScheduled,
            Self::Succeeded,
            Self::Duplicate,
            Self::Failed,
        ]
    }

    /// Returns the terminal states in report order
    pub fn terminal_states() -> Vec<Self> {
        Self::all_states()
            .into_iter()
            .filter(|s| s.is_terminal())
            .collect()
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_terminal() {
        assert!(!TaskState::Queued.is_terminal());
        assert!(!TaskState::Leasing.is_terminal());
        assert!(!TaskState::Fetching.is_terminal());
        assert!(!TaskState::RetryScheduled.is_terminal());

        assert!(TaskState::Succeeded.is_terminal());
        assert!(TaskState::Duplicate.is_terminal());
        assert!(TaskState::Failed.is_terminal());
    }

    #[test]
    fn test_is_success() {
        assert!(TaskState::Succeeded.is_success());
        assert!(TaskState::Duplicate.is_success());
        assert!(!TaskState::Failed.is_success());
        assert!(!TaskState::Fetching.is_success());
    }

    #[test]
    fn test_happy_path_transitions() {
        assert!(TaskState::Queued.can_transition_to(TaskState::Leasing));
        assert!(TaskState::Leasing.can_transition_to(TaskState::Fetching));
        assert!(TaskState::Fetching.can_transition_to(TaskState::Succeeded));
        assert!(TaskState::Fetching.can_transition_to(TaskState::Duplicate));
        assert!(TaskState::Fetching.can_transition_to(TaskState::RetryScheduled));
        assert!(TaskState::RetryScheduled.can_transition_to(TaskState::Queued));
        assert!(TaskState::Leasing.can_transition_to(TaskState::RetryScheduled));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!TaskState::Queued.can_transition_to(TaskState::Fetching));
        assert!(!TaskState::Queued.can_transition_to(TaskState::Succeeded));
        assert!(!TaskState::Leasing.can_transition_to(TaskState::Failed));
        assert!(!TaskState::RetryScheduled.can_transition_to(TaskState::Fetching));

        for terminal in TaskState::terminal_states() {
            for next in TaskState::all_states() {
                assert!(
                    !terminal.can_transition_to(next),
                    "{} -> {} should be rejected",
                    terminal,
                    next
                );
            }
        }
    }

    #[test]
    fn test_roundtrip_db_string() {
        for state in TaskState::all_states() {
            let db_str = state.to_db_string();
            let parsed = TaskState::from_db_string(db_str);
            assert_eq!(Some(state), parsed, "Failed roundtrip for {:?}", state);
        }
        assert_eq!(TaskState::from_db_string("invalid"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", TaskState::RetryScheduled), "retry_scheduled");
        assert_eq!(format!("{}", TaskState::Succeeded), "succeeded");
    }

    #[test]
    fn test_terminal_states() {
        assert_eq!(
            TaskState::terminal_states(),
            vec![TaskState::Succeeded, TaskState::Duplicate, TaskState::Failed]
        );
    }
}
