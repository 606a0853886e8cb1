use std::fmt;
use std::fmt::Formatter;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use validator::Validate;
use crate::BMPROV_SETTINGS_FOLDER;

/// Settings for the orchestration engine. Everything has a default so an empty json object is a
/// valid configuration, the defaults reproduce the behaviour of the installer tooling this
/// drives.
#[derive(Deserialize, Serialize, Debug, Clone, Validate)]
#[serde(rename_all = "snake_case")]
pub struct OrchestratorConfig {
    /// interval between progress polls of a wave
    #[serde(default = "default_poll_interval_secs")]
    #[validate(range(min = 1, max = 600))]
    pub poll_interval_secs: u64,
    /// a host whose progress has not moved for this long is failed
    #[serde(default = "default_host_install_timeout_secs")]
    #[validate(range(min = 1))]
    pub host_install_timeout_secs: u64,
    #[serde(default = "default_max_parallel")]
    #[validate(range(min = 1, max = 1024))]
    pub max_parallel_os_number: usize,
    #[serde(default = "default_max_parallel")]
    #[validate(range(min = 1, max = 1024))]
    pub max_parallel_os_upgrade_number: usize,
    /// upper bound for a single progress query
    #[serde(default = "default_progress_query_timeout_secs")]
    #[validate(range(min = 1))]
    pub progress_query_timeout_secs: u64,
    #[serde(default = "default_ipmi_retry_times")]
    #[validate(range(min = 1, max = 100))]
    pub ipmi_retry_times: u32,
    /// backoff after the nth failed attempt is `n * ipmi_backoff_unit_secs`
    #[serde(default = "default_ipmi_backoff_unit_secs")]
    pub ipmi_backoff_unit_secs: u64,
    /// wait for the nic fix script on the host before switching it to disk boot
    #[serde(default = "default_nicfix_wait_secs")]
    pub nicfix_wait_secs: u64,
    #[serde(default = "default_software_install_timeout_secs")]
    #[validate(range(min = 1))]
    pub software_install_timeout_secs: u64,
    #[serde(default = "default_ping_times")]
    #[validate(range(min = 1))]
    pub ping_times: u32,
    /// fabric interconnect that holds the service profiles of Cisco blades
    #[serde(default = "default_fabric_manager_addr")]
    pub fabric_manager_addr: String,
    #[serde(default)]
    pub installer: InstallerPaths,
    #[serde(default)]
    pub host_defaults: HostDefaults,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            host_install_timeout_secs: default_host_install_timeout_secs(),
            max_parallel_os_number: default_max_parallel(),
            max_parallel_os_upgrade_number: default_max_parallel(),
            progress_query_timeout_secs: default_progress_query_timeout_secs(),
            ipmi_retry_times: default_ipmi_retry_times(),
            ipmi_backoff_unit_secs: default_ipmi_backoff_unit_secs(),
            nicfix_wait_secs: default_nicfix_wait_secs(),
            software_install_timeout_secs: default_software_install_timeout_secs(),
            ping_times: default_ping_times(),
            fabric_manager_addr: default_fabric_manager_addr(),
            installer: Default::default(),
            host_defaults: Default::default(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {5}
fn default_host_install_timeout_secs() -> u64 {30 * 60}
fn default_max_parallel() -> usize {10}
fn default_progress_query_timeout_secs() -> u64 {30}
fn default_ipmi_retry_times() -> u32 {24}
fn default_ipmi_backoff_unit_secs() -> u64 {2}
fn default_nicfix_wait_secs() -> u64 {10}
fn default_software_install_timeout_secs() -> u64 {2 * 60 * 60}
fn default_ping_times() -> u32 {36}
fn default_fabric_manager_addr() -> String {"10.10.100.254".to_string()}

impl OrchestratorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn host_install_timeout(&self) -> Duration {
        Duration::from_secs(self.host_install_timeout_secs)
    }

    /// Number of consecutive unchanged polls after which a host is failed. The budget is fixed
    /// in wall time, so a faster poll interval allows more polls.
    pub fn stall_poll_limit(&self) -> u32 {
        let polls = self.host_install_timeout_secs / self.poll_interval_secs.max(1);
        polls.max(1) as u32
    }

    /// Wave budget for the shared install infrastructure, `(maxParallel/4 + 2) * 60 * (12 * poll)`
    /// seconds. The multiplier is expressed against the reference 5s poll interval so the wall
    /// time budget does not change when the poll interval is tuned.
    pub fn wave_timeout(&self, max_parallel: usize) -> Duration {
        let reference_poll_secs = default_poll_interval_secs();
        let secs = (max_parallel as u64 / 4 + 2) * 60 * (12 * reference_poll_secs);
        Duration::from_secs(secs)
    }

    pub fn software_install_timeout(&self) -> Duration {
        Duration::from_secs(self.software_install_timeout_secs)
    }

    pub fn config_path(settings_folder: &Path) -> PathBuf {
        settings_folder.join("config").join("orchestrator.json")
    }

    pub async fn write(&self, settings_folder: &Path) -> anyhow::Result<()> {
        let path = Self::config_path(settings_folder);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut output = File::create(&path).await?;
        output.write_all(format!("{self}").as_bytes()).await?;
        Ok(())
    }

    pub async fn read(settings_folder: &Path) -> anyhow::Result<OrchestratorConfig> {
        let name = Self::config_path(settings_folder);
        tracing::trace!("expected orchestrator config json location: {:?}", name);
        if name.is_file() {
            let text = tokio::fs::read_to_string(&name).await?;
            let config: OrchestratorConfig = serde_json::from_str(&text)
                .context(format!("parsing {name:?}"))?;
            config.validate().context("validating orchestrator config")?;
            Ok(config)
        } else {
            bail!("could not read orchestrator.json - this needs to be set in {BMPROV_SETTINGS_FOLDER}config/orchestrator.json")
        }
    }

    /// Read the config if present, otherwise fall back to the defaults
    pub async fn read_or_default(settings_folder: &Path) -> anyhow::Result<OrchestratorConfig> {
        if Self::config_path(settings_folder).is_file() {
            Self::read(settings_folder).await
        } else {
            tracing::debug!("no orchestrator config found, using defaults");
            Ok(OrchestratorConfig::default())
        }
    }
}

impl fmt::Display for OrchestratorConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let text = serde_json::to_string_pretty(&self).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

/// Locations of the external installer tooling
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "snake_case")]
pub struct InstallerPaths {
    #[serde(default = "default_os_install_bin")]
    pub os_install_bin: String,
    #[serde(default = "default_os_progress_bin")]
    pub os_progress_bin: String,
    #[serde(default = "default_pxe_server_bin")]
    pub pxe_server_bin: String,
    /// where per host install parameter documents are written
    #[serde(default = "default_param_dir")]
    pub param_dir: String,
    /// cluster software installer package
    #[serde(default = "default_software_installer")]
    pub software_installer: String,
    /// directory the software installer writes its config and logs relative to
    #[serde(default = "default_software_work_dir")]
    pub software_work_dir: String,
    /// file the software installer writes its manifests directory into
    #[serde(default = "default_progress_location_dir")]
    pub progress_location_dir: String,
    #[serde(default = "default_upgrade_script")]
    pub upgrade_script: String,
}

impl Default for InstallerPaths {
    fn default() -> Self {
        Self {
            os_install_bin: default_os_install_bin(),
            os_progress_bin: default_os_progress_bin(),
            pxe_server_bin: default_pxe_server_bin(),
            param_dir: default_param_dir(),
            software_installer: default_software_installer(),
            software_work_dir: default_software_work_dir(),
            progress_location_dir: default_progress_location_dir(),
            upgrade_script: default_upgrade_script(),
        }
    }
}

fn default_os_install_bin() -> String {"/usr/bin/pxe_os_install".to_string()}
fn default_os_progress_bin() -> String {"/usr/bin/pxe_os_install_progress".to_string()}
fn default_pxe_server_bin() -> String {"/usr/bin/pxe_server_install".to_string()}
fn default_param_dir() -> String {"/var/log/ironic".to_string()}
fn default_software_installer() -> String {"/var/lib/bmprov/tecs/installer.bin".to_string()}
fn default_software_work_dir() -> String {"/var/lib/bmprov/tecs".to_string()}
fn default_progress_location_dir() -> String {"/var/tmp/packstack".to_string()}
fn default_upgrade_script() -> String {"/var/lib/bmprov/tecs/tfg_upgrade.sh".to_string()}

/// Values used when a host record does not specify them
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "snake_case")]
pub struct HostDefaults {
    #[serde(default = "default_root_pwd")]
    pub root_pwd: String,
    #[serde(default = "default_root_disk")]
    pub root_disk: String,
    /// MB
    #[serde(default = "default_root_lv_size")]
    pub root_lv_size: u64,
    #[serde(default = "default_hugepagesize")]
    pub hugepagesize: String,
}

impl Default for HostDefaults {
    fn default() -> Self {
        Self {
            root_pwd: default_root_pwd(),
            root_disk: default_root_disk(),
            root_lv_size: default_root_lv_size(),
            hugepagesize: default_hugepagesize(),
        }
    }
}

fn default_root_pwd() -> String {"ossdbg1".to_string()}
fn default_root_disk() -> String {"sda".to_string()}
fn default_root_lv_size() -> u64 {102400}
fn default_hugepagesize() -> String {"1G".to_string()}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config: OrchestratorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.max_parallel_os_number, 10);
        assert_eq!(config.ipmi_retry_times, 24);
        assert_eq!(config.installer.os_progress_bin, "/usr/bin/pxe_os_install_progress");
        assert_eq!(config.host_defaults.root_lv_size, 102400);
        assert_eq!(config.fabric_manager_addr, "10.10.100.254");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_timeouts() {
        let mut config = OrchestratorConfig::default();
        // 30 min at 5s
        assert_eq!(config.stall_poll_limit(), 360);
        // (10/4 + 2) * 60 * 60
        assert_eq!(config.wave_timeout(10), Duration::from_secs(4 * 3600));
        assert_eq!(config.wave_timeout(3), Duration::from_secs(2 * 3600));
        // the wall time budgets stay put when the cadence changes
        config.poll_interval_secs = 10;
        assert_eq!(config.stall_poll_limit(), 180);
        assert_eq!(config.wave_timeout(10), Duration::from_secs(4 * 3600));
    }

    #[test]
    fn test_validation_rejects_zero_parallel() {
        let config: OrchestratorConfig = serde_json::from_str(r#"{"max_parallel_os_number": 0}"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = OrchestratorConfig::default();
        config.poll_interval_secs = 2;
        config.write(dir.path()).await.unwrap();
        let read = OrchestratorConfig::read(dir.path()).await.unwrap();
        assert_eq!(read.poll_interval_secs, 2);
        let missing = tempfile::tempdir().unwrap();
        assert!(OrchestratorConfig::read(missing.path()).await.is_err());
        assert_eq!(OrchestratorConfig::read_or_default(missing.path()).await.unwrap().poll_interval_secs, 5);
    }
}
