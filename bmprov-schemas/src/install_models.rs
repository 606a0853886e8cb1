use std::fmt;
use std::fmt::Formatter;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use thiserror::Error;

/// Lifecycle of a host's operating system install or upgrade. `Active` and the two failed states
/// are terminal for the wave that produced them.
#[derive(Deserialize, Serialize, Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum OsStatus {
    #[default]
    Init,
    PreInstall,
    Installing,
    Active,
    InstallFailed,
    Updating,
    UpdateFailed,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StateTransitionError {
    #[error("invalid os status transition from {from} to {to}")]
    Invalid {
        from: OsStatus,
        to: OsStatus,
    },
    #[error("os progress for {status} can not go from {from}% to {to}%")]
    ProgressRegression {
        status: OsStatus,
        from: u8,
        to: u8,
    },
}

impl OsStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OsStatus::Active | OsStatus::InstallFailed | OsStatus::UpdateFailed)
    }

    /// still being driven by a poll loop
    pub fn is_in_progress(&self) -> bool {
        matches!(self, OsStatus::Installing | OsStatus::Updating)
    }

    pub fn can_transition_to(&self, next: OsStatus) -> bool {
        use OsStatus::*;
        match (self, next) {
            // a new wave may restart any host that has not got an os yet
            (Init | PreInstall | Installing | InstallFailed, PreInstall) => true,
            (PreInstall, Installing | InstallFailed) => true,
            (Installing, Installing | Active | InstallFailed) => true,
            (Active | UpdateFailed, Updating) => true,
            (Updating, Updating | Active | UpdateFailed) => true,
            _ => false,
        }
    }

    pub fn transition(self, next: OsStatus) -> Result<OsStatus, StateTransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(StateTransitionError::Invalid { from: self, to: next })
        }
    }
}

/// State of the cluster software install on a role or role host
#[derive(Deserialize, Serialize, Debug, Default, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum SoftwareStatus {
    #[default]
    Init,
    Installing,
    Active,
    InstallFailed,
    Updating,
    UpdateFailed,
}

#[derive(Deserialize, Serialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SoftwareProgress {
    #[serde(default)]
    pub status: SoftwareStatus,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub messages: String,
}

/// Partial update of a host's os install fields, `None` fields are left untouched
#[derive(Deserialize, Serialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HostStatusUpdate {
    pub os_status: Option<OsStatus>,
    pub os_progress: Option<u8>,
    pub messages: Option<String>,
}

impl HostStatusUpdate {
    pub fn new(os_status: OsStatus, os_progress: u8, messages: &str) -> Self {
        Self {
            os_status: Some(os_status),
            os_progress: Some(os_progress),
            messages: Some(messages.to_string()),
        }
    }

    pub fn message(messages: &str) -> Self {
        Self {
            messages: Some(messages.to_string()),
            ..Default::default()
        }
    }
}

/// In-memory record the scheduler keeps for each host of a wave. It is created when the wave
/// begins and dropped when the wave ends, every observed change is written through to the
/// registry.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HostInstallRecord {
    pub host_id: String,
    pub os_status: OsStatus,
    pub os_progress: u8,
    pub messages: String,
    /// consecutive polls that reported an unchanged progress
    pub stall_count: u32,
}

impl HostInstallRecord {
    pub fn new(host_id: &str) -> Self {
        Self {
            host_id: host_id.to_string(),
            os_status: OsStatus::Init,
            os_progress: 0,
            messages: String::new(),
            stall_count: 0,
        }
    }

    /// Start a fresh wave for this host, the only place progress may go backwards.
    pub fn reset(&mut self, os_status: OsStatus, messages: &str) -> Result<(), StateTransitionError> {
        self.os_status = self.os_status.transition(os_status)?;
        self.os_progress = 0;
        self.messages = messages.to_string();
        self.stall_count = 0;
        Ok(())
    }

    /// Apply an observed state and progress. Progress never decreases while the status stays in
    /// progress, a failure keeps the last known progress.
    pub fn apply(&mut self, os_status: OsStatus, os_progress: u8, messages: &str) -> Result<(), StateTransitionError> {
        let next = self.os_status.transition(os_status)?;
        if next.is_in_progress() && os_progress < self.os_progress {
            return Err(StateTransitionError::ProgressRegression {
                status: next,
                from: self.os_progress,
                to: os_progress,
            });
        }
        self.os_status = next;
        self.os_progress = os_progress.min(100).max(self.os_progress);
        self.messages = messages.to_string();
        Ok(())
    }

    /// Mark as failed, keeping the progress that was reached
    pub fn fail(&mut self, messages: &str) -> Result<(), StateTransitionError> {
        let failed = match self.os_status {
            OsStatus::Updating => OsStatus::UpdateFailed,
            _ => OsStatus::InstallFailed,
        };
        self.os_status = self.os_status.transition(failed)?;
        self.messages = messages.to_string();
        Ok(())
    }

    pub fn to_update(&self) -> HostStatusUpdate {
        HostStatusUpdate::new(self.os_status, self.os_progress, &self.messages)
    }
}

impl fmt::Display for HostInstallRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}   {}   {}", self.host_id, self.os_status, self.messages)
    }
}

/// Update for a role or for the software progress of one of its hosts
#[derive(Deserialize, Serialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RoleStatusUpdate {
    pub status: SoftwareStatus,
    pub progress: u8,
    pub messages: String,
}

impl From<&RoleStatusUpdate> for SoftwareProgress {
    fn from(update: &RoleStatusUpdate) -> Self {
        SoftwareProgress {
            status: update.status,
            progress: update.progress,
            messages: update.messages.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use super::*;

    #[test]
    fn test_os_status_serde_names() {
        assert_eq!(serde_json::to_string(&OsStatus::PreInstall).unwrap(), "\"pre-install\"");
        assert_eq!(serde_json::to_string(&OsStatus::InstallFailed).unwrap(), "\"install-failed\"");
        assert_eq!(OsStatus::from_str("update-failed").unwrap(), OsStatus::UpdateFailed);
        assert_eq!(OsStatus::Installing.to_string(), "installing");
    }

    #[test]
    fn test_os_status_transitions() {
        assert!(OsStatus::Init.transition(OsStatus::PreInstall).is_ok());
        assert!(OsStatus::PreInstall.transition(OsStatus::Installing).is_ok());
        assert!(OsStatus::Installing.transition(OsStatus::Active).is_ok());
        assert!(OsStatus::Active.transition(OsStatus::Updating).is_ok());
        assert!(OsStatus::Updating.transition(OsStatus::UpdateFailed).is_ok());
        // an installed host can not be dropped back into an install
        assert_eq!(
            OsStatus::Active.transition(OsStatus::PreInstall),
            Err(StateTransitionError::Invalid { from: OsStatus::Active, to: OsStatus::PreInstall })
        );
        assert!(OsStatus::Init.transition(OsStatus::Active).is_err());
        assert!(OsStatus::InstallFailed.transition(OsStatus::Installing).is_err());
    }

    #[test]
    fn test_record_progress_is_monotonic() {
        let mut record = HostInstallRecord::new("h1");
        record.reset(OsStatus::PreInstall, "Preparing for OS installation").unwrap();
        record.apply(OsStatus::Installing, 0, "OS installing").unwrap();
        record.apply(OsStatus::Installing, 40, "copying").unwrap();
        let err = record.apply(OsStatus::Installing, 30, "copying");
        assert!(err.is_err());
        assert_eq!(record.os_progress, 40);
        record.fail("os installed timeout").unwrap();
        assert_eq!(record.os_status, OsStatus::InstallFailed);
        assert_eq!(record.os_progress, 40);
        // new wave
        record.reset(OsStatus::PreInstall, "Preparing for OS installation").unwrap();
        assert_eq!(record.os_progress, 0);
    }
}
