use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::DataError;

/// Lifecycle state of a remote asynchronous job.
///
/// ```text
/// PENDING --run--> QUEUED/EXECUTING --> {COMPLETED, ERROR, ABORTED}
/// any terminal or PENDING --archive--> ARCHIVED
/// ```
///
/// Rerunning an archived job creates a new job; an archived job never moves again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Pending,
    Queued,
    Executing,
    Completed,
    Error,
    Aborted,
    Archived,
    Held,
    Suspended,
    Unknown,
}

impl Phase {
    /// phases a waiting caller usually stops at
    pub const FINISHED: [Phase; 3] = [Phase::Completed, Phase::Error, Phase::Aborted];

    pub const ALL: [Phase; 10] = [
        Phase::Pending,
        Phase::Queued,
        Phase::Executing,
        Phase::Completed,
        Phase::Error,
        Phase::Aborted,
        Phase::Archived,
        Phase::Held,
        Phase::Suspended,
        Phase::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Pending => "PENDING",
            Phase::Queued => "QUEUED",
            Phase::Executing => "EXECUTING",
            Phase::Completed => "COMPLETED",
            Phase::Error => "ERROR",
            Phase::Aborted => "ABORTED",
            Phase::Archived => "ARCHIVED",
            Phase::Held => "HELD",
            Phase::Suspended => "SUSPENDED",
            Phase::Unknown => "UNKNOWN",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Phase::Completed | Phase::Error | Phase::Aborted | Phase::Archived
        )
    }

    /// terminal phases that carry an error instead of results
    pub fn is_error(&self) -> bool {
        matches!(self, Phase::Error | Phase::Aborted)
    }

    fn rank(&self) -> u8 {
        match self {
            Phase::Unknown | Phase::Pending => 0,
            Phase::Held => 1,
            Phase::Queued => 2,
            Phase::Executing | Phase::Suspended => 3,
            Phase::Completed | Phase::Error | Phase::Aborted => 4,
            Phase::Archived => 5,
        }
    }

    /// whether a job observed in `self` may later be observed in `next`
    pub fn can_advance_to(&self, next: Phase) -> bool {
        if *self == next {
            return true;
        }
        match self {
            Phase::Archived => false,
            phase if phase.is_terminal() => next == Phase::Archived,
            Phase::Unknown => true,
            _ => next == Phase::Unknown || next.rank() >= self.rank(),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Phase::ALL
            .iter()
            .copied()
            .find(|phase| phase.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| DataError::UnknownPhase(wanted.to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::Phase;

    #[test]
    fn test_parse_phase_is_case_insensitive() {
        assert_eq!(Phase::Completed, "COMPLETED".parse().unwrap());
        assert_eq!(Phase::Executing, " executing\n".parse().unwrap());
        assert!("DONE".parse::<Phase>().is_err());
    }

    #[test]
    fn test_display_matches_wire_form() {
        for phase in Phase::ALL.iter() {
            assert_eq!(*phase, phase.to_string().parse().unwrap());
        }
        assert_eq!("ARCHIVED", Phase::Archived.to_string());
    }

    #[test]
    fn test_terminal_and_error_classes() {
        assert!(Phase::Completed.is_terminal());
        assert!(Phase::Archived.is_terminal());
        assert!(!Phase::Executing.is_terminal());
        assert!(Phase::Aborted.is_error());
        assert!(!Phase::Completed.is_error());
        assert!(!Phase::Archived.is_error());
    }

    #[test]
    fn test_phase_only_moves_forward() {
        assert!(Phase::Pending.can_advance_to(Phase::Queued));
        assert!(Phase::Queued.can_advance_to(Phase::Executing));
        assert!(Phase::Executing.can_advance_to(Phase::Completed));
        assert!(Phase::Pending.can_advance_to(Phase::Archived));
        assert!(Phase::Completed.can_advance_to(Phase::Archived));
        assert!(Phase::Executing.can_advance_to(Phase::Suspended));
        assert!(Phase::Suspended.can_advance_to(Phase::Executing));

        assert!(!Phase::Executing.can_advance_to(Phase::Pending));
        assert!(!Phase::Completed.can_advance_to(Phase::Executing));
        assert!(!Phase::Error.can_advance_to(Phase::Completed));
        assert!(!Phase::Archived.can_advance_to(Phase::Pending));
    }

    #[test]
    fn test_serde_uses_upper_case() {
        let json = serde_json::to_string(&Phase::Queued).unwrap();
        assert_eq!("\"QUEUED\"", json);
        let phase: Phase = serde_json::from_str("\"HELD\"").unwrap();
        assert_eq!(Phase::Held, phase);
    }
}
