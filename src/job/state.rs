use crate::error::{MigrationError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one job instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Constructed, never performed
    Created,
    /// Iterating sub-batches
    Running,
    /// Last `perform` finished every window
    Completed,
    /// Last `perform` propagated an error
    Failed,
}

impl JobState {
    /// A finished `perform`; the job may be performed again from here
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// `Running -> Running` restarts a job whose previous `perform` was dropped
    pub fn can_transition_to(&self, to: JobState) -> bool {
        matches!(
            (self, to),
            (
                Self::Created | Self::Running | Self::Completed | Self::Failed,
                Self::Running
            ) | (Self::Running, Self::Completed | Self::Failed)
        )
    }

    /// Apply `event`, rejecting transitions the lifecycle does not allow
    pub fn transition(self, event: JobEvent) -> Result<JobState> {
        let to = event.target_state();
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(MigrationError::InvalidState(format!(
                "cannot {} a job in state {self}",
                event.event_type()
            )))
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid job state: {s}")),
        }
    }
}

/// Events driving [`JobState`] transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    Start,
    Complete,
    Fail,
}

impl JobEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Fail => "fail",
        }
    }

    fn target_state(&self) -> JobState {
        match self {
            Self::Start => JobState::Running,
            Self::Complete => JobState::Completed,
            Self::Fail => JobState::Failed,
        }
    }
}
