/// Crawl session lifecycle definitions
use std::fmt;

/// Status of a discovery session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    /// The crawl loop is active
    Running,

    /// Stopped on a blocking page, waiting for an automatic or manual resume
    Paused,

    /// Frontier drained normally
    Completed,

    /// Aborted on an unrecoverable condition; resumable from its last checkpoint
    Failed,

    /// Stopped by a signal or page limit after writing a snapshot
    Interrupted,

    /// Abandoned by the operator
    Cancelled,
}

impl SessionStatus {
    /// Returns true if the session can still make progress
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    /// Returns true if a session in this status may be resumed
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Paused | Self::Interrupted | Self::Failed)
    }

    /// Returns true if the transition is part of the session state machine
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Running, Paused | Completed | Failed | Interrupted | Cancelled)
                | (Paused, Running | Interrupted | Cancelled | Failed)
                | (Interrupted, Running | Cancelled)
                | (Failed, Running | Cancelled)
        )
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Interrupted => "interrupted",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "interrupted" => Some(Self::Interrupted),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Running,
            Self::Paused,
            Self::Completed,
            Self::Failed,
            Self::Interrupted,
            Self::Cancelled,
        ]
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
