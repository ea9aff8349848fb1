use chrono::{DateTime, Utc};
use std::fmt;

/// Per-crawler run bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunState {
    /// When the crawler was last started
    pub last_run: Option<DateTime<Utc>>,

    /// Identifier of the run still in progress, if any
    pub current_run: Option<String>,

    /// Number of runs started
    pub run_count: u64,

    /// Tasks completed successfully across all runs
    pub tasks_completed: u64,

    /// Tasks recorded as failed across all runs
    pub tasks_failed: u64,
}

impl RunState {
    /// Returns true if the crawler has never been started
    pub fn never_run(&self) -> bool {
        self.last_run.is_none()
    }
}

/// Due state as reported by `list`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueState {
    Yes,
    No,
    /// The crawler is disabled
    Off,
}

impl DueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
            Self::Off => "off",
        }
    }
}

impl fmt::Display for DueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_never_run() {
        let mut state = RunState::default();
        assert!(state.never_run());

        state.last_run = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert!(!state.never_run());
    }

    #[test]
    fn test_due_state_display() {
        assert_eq!(DueState::Yes.to_string(), "yes");
        assert_eq!(DueState::No.to_string(), "no");
        assert_eq!(DueState::Off.to_string(), "off");
    }
}
