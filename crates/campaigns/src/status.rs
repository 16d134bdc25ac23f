use core::str::FromStr;

use serde::{Deserialize, Serialize};

use auditflow_core::DomainError;

/// Campaign lifecycle status.
///
/// ```text
/// pending -> processing -> {completed, failed}
/// processing <-> paused
/// {pending, processing, paused} -> cancelled   (absorbing)
/// {completed, failed} -> processing            (add job / retry)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Paused,
}

impl CampaignStatus {
    /// No further automatic job processing occurs.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed | CampaignStatus::Failed | CampaignStatus::Cancelled
        )
    }

    /// Terminal because every job reached a final state (can be reopened).
    pub fn is_finished(self) -> bool {
        matches!(self, CampaignStatus::Completed | CampaignStatus::Failed)
    }

    pub fn can_transition_to(self, to: CampaignStatus) -> bool {
        use CampaignStatus::*;

        match (self, to) {
            (Cancelled, _) => false,
            (_, Cancelled) => true,
            (Pending, Processing) => true,
            (Processing, Paused) | (Paused, Processing) => true,
            // Completion can be reached from any live state once every job settled;
            // jobs already leased keep running while a campaign is paused.
            (Pending | Processing | Paused, Completed | Failed) => true,
            (Completed | Failed, Processing) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CampaignStatus::Pending => "pending",
            CampaignStatus::Processing => "processing",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Failed => "failed",
            CampaignStatus::Cancelled => "cancelled",
            CampaignStatus::Paused => "paused",
        }
    }
}

impl core::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CampaignStatus::Pending),
            "processing" => Ok(CampaignStatus::Processing),
            "completed" => Ok(CampaignStatus::Completed),
            "failed" => Ok(CampaignStatus::Failed),
            "cancelled" => Ok(CampaignStatus::Cancelled),
            "paused" => Ok(CampaignStatus::Paused),
            other => Err(DomainError::validation(format!("unknown campaign status '{other}'"))),
        }
    }
}

/// Status of one embedded job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_final(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DomainError::validation(format!("unknown job status '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CampaignStatus::*;
    use super::*;

    #[test]
    fn cancelled_is_absorbing() {
        for to in [Pending, Processing, Completed, Failed, Paused, Cancelled] {
            assert!(!Cancelled.can_transition_to(to), "cancelled -> {to}");
        }
    }

    #[test]
    fn every_live_state_can_be_cancelled() {
        for from in [Pending, Processing, Paused] {
            assert!(from.can_transition_to(Cancelled));
        }
    }

    #[test]
    fn finished_campaigns_reopen_only_to_processing() {
        for from in [Completed, Failed] {
            assert!(from.can_transition_to(Processing));
            assert!(!from.can_transition_to(Paused));
            assert!(!from.can_transition_to(Pending));
        }
    }

    #[test]
    fn pause_only_from_processing() {
        assert!(Processing.can_transition_to(Paused));
        assert!(!Pending.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Processing));
    }

    #[test]
    fn status_strings_round_trip() {
        for s in [Pending, Processing, Completed, Failed, Cancelled, Paused] {
            assert_eq!(s.as_str().parse::<CampaignStatus>().unwrap(), s);
        }
        assert!("archived".parse::<CampaignStatus>().is_err());
    }
}
