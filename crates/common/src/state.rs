//! Saga lifecycle states.

use serde::{Deserialize, Serialize};

/// The lifecycle state of a saga instance.
///
/// State transitions:
/// ```text
/// NotStarted ──► Running ──┬────────────────────────► Completed
///                          └──► Compensating ──┬────► Completed
///                                              └────► Failed
/// Running ──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    /// Instance exists in memory only; start logic has not finished.
    #[default]
    NotStarted,

    /// Start logic finished; the saga is reacting to events.
    Running,

    /// Compensating logic is in progress.
    Compensating,

    /// The process finished successfully (terminal state).
    Completed,

    /// The process ended in failure (terminal state).
    Failed,
}

impl SagaState {
    /// Returns true if a Start command may create the instance from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, SagaState::NotStarted)
    }

    /// Returns true if a Compensate command is valid in this state.
    pub fn can_compensate(&self) -> bool {
        matches!(self, SagaState::Running)
    }

    /// Returns true if a Recover command has work to do in this state.
    pub fn can_recover(&self) -> bool {
        matches!(self, SagaState::Running | SagaState::Compensating)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Completed | SagaState::Failed)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::NotStarted => "NotStarted",
            SagaState::Running => "Running",
            SagaState::Compensating => "Compensating",
            SagaState::Completed => "Completed",
            SagaState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown state name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSagaState(pub String);

impl std::fmt::Display for UnknownSagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown saga state: {}", self.0)
    }
}

impl std::error::Error for UnknownSagaState {}

impl std::str::FromStr for SagaState {
    type Err = UnknownSagaState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NotStarted" => Ok(SagaState::NotStarted),
            "Running" => Ok(SagaState::Running),
            "Compensating" => Ok(SagaState::Compensating),
            "Completed" => Ok(SagaState::Completed),
            "Failed" => Ok(SagaState::Failed),
            other => Err(UnknownSagaState(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_not_started() {
        assert_eq!(SagaState::default(), SagaState::NotStarted);
    }

    #[test]
    fn test_can_start() {
        assert!(SagaState::NotStarted.can_start());
        assert!(!SagaState::Running.can_start());
        assert!(!SagaState::Compensating.can_start());
        assert!(!SagaState::Completed.can_start());
        assert!(!SagaState::Failed.can_start());
    }

    #[test]
    fn test_can_compensate() {
        assert!(!SagaState::NotStarted.can_compensate());
        assert!(SagaState::Running.can_compensate());
        assert!(!SagaState::Compensating.can_compensate());
        assert!(!SagaState::Completed.can_compensate());
        assert!(!SagaState::Failed.can_compensate());
    }

    #[test]
    fn test_can_recover() {
        assert!(!SagaState::NotStarted.can_recover());
        assert!(SagaState::Running.can_recover());
        assert!(SagaState::Compensating.can_recover());
        assert!(!SagaState::Completed.can_recover());
        assert!(!SagaState::Failed.can_recover());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!SagaState::NotStarted.is_terminal());
        assert!(!SagaState::Running.is_terminal());
        assert!(!SagaState::Compensating.is_terminal());
        assert!(SagaState::Completed.is_terminal());
        assert!(SagaState::Failed.is_terminal());
    }

    #[test]
    fn test_parse_matches_display() {
        for state in [
            SagaState::NotStarted,
            SagaState::Running,
            SagaState::Compensating,
            SagaState::Completed,
            SagaState::Failed,
        ] {
            assert_eq!(state.to_string().parse::<SagaState>().unwrap(), state);
        }
        assert!("Paused".parse::<SagaState>().is_err());
    }
}
