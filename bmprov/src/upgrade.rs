use std::path::Path;
use std::sync::Arc;
use anyhow::{bail, Context};
use futures_util::future::join_all;
use bmprov_schemas::install_models::{HostInstallRecord, OsStatus};
use bmprov_schemas::inventory::{Host, Network};
use bmprov_schemas::settings::OrchestratorConfig;
use crate::orchestration::ssh::SSHClient;
use crate::orchestration::{CommandOutput, CommandRunner};
use crate::progress::tail;
use crate::reachability::{wait_reboot, Reachability};
use crate::registry::Registry;
use crate::scheduler::partition;
use crate::topology::interfaces::host_addresses;

pub const UPDATE_DIR: &str = "/home/bmprov_update";
/// the upgrade script exits with this when it reboots the host itself
const REBOOT_EXIT_CODE: i32 = 255;
const FAILURE_TAIL_LEN: usize = 200;

/// Upgrades the operating system of installed hosts, in waves of
/// `max_parallel_os_upgrade_number`
pub struct OsUpgrade {
    registry: Arc<dyn Registry>,
    runner: Arc<dyn CommandRunner>,
    reachability: Arc<dyn Reachability>,
    config: OrchestratorConfig,
}

impl OsUpgrade {
    pub fn new(
        registry: Arc<dyn Registry>,
        runner: Arc<dyn CommandRunner>,
        reachability: Arc<dyn Reachability>,
        config: OrchestratorConfig,
    ) -> Self {
        Self { registry, runner, reachability, config }
    }

    pub async fn run(&self, host_ids: &[String], iso: &str) -> anyhow::Result<Vec<HostInstallRecord>> {
        let networks = self.registry.get_networks().await?;
        let mut records = vec![];
        for wave in partition(host_ids, self.config.max_parallel_os_upgrade_number) {
            tracing::info!("Stage: upgrading os of hosts {}", wave.join(","));
            let mut hosts = vec![];
            for host_id in &wave {
                hosts.push(self.registry.get_host(host_id).await?);
            }
            let results = join_all(hosts.iter().map(|h| self.upgrade_host(h, &networks, iso))).await;
            let mut wave_records = vec![];
            for result in results {
                wave_records.push(result?);
            }
            for record in &wave_records {
                tracing::info!("{record}");
            }
            if let Some(failed) = wave_records.iter()
                .find(|r| matches!(r.os_status, OsStatus::UpdateFailed | OsStatus::Init)) {
                bail!("{}", failed.messages);
            }
            records.extend(wave_records);
        }
        Ok(records)
    }

    async fn persist(&self, record: &HostInstallRecord) -> anyhow::Result<()> {
        self.registry.update_host_status(&record.host_id, &record.to_update()).await
            .context(format!("writing upgrade status of host {}", record.host_id))
    }

    async fn fail(&self, record: &mut HostInstallRecord, message: &str) -> anyhow::Result<()> {
        tracing::error!("Update os for {} failed: {}", record.host_id, message);
        record.fail(message)?;
        record.os_progress = 0;
        self.persist(record).await
    }

    async fn upgrade_host(&self, host: &Host, networks: &[Network], iso: &str) -> anyhow::Result<HostInstallRecord> {
        let mut record = HostInstallRecord {
            host_id: host.id.clone(),
            os_status: host.os_status,
            os_progress: host.os_progress,
            messages: host.messages.clone(),
            stall_count: 0,
        };
        record.reset(OsStatus::Updating, "os updating,begin copy iso")?;
        record.apply(OsStatus::Updating, 10, "os updating,begin copy iso")?;
        self.persist(&record).await?;

        let ip = match host_addresses(host, networks) {
            Ok(addresses) if !addresses.management.ip.is_empty() => addresses.management.ip,
            Ok(_) => {
                self.fail(&mut record, &format!("no management ip for host {}", host.id)).await?;
                return Ok(record);
            }
            Err(err) => {
                self.fail(&mut record, &err.to_string()).await?;
                return Ok(record);
            }
        };
        tracing::info!("Begin update os for host {}", ip);

        if let Err(err) = self.copy_media(&ip, iso).await {
            self.fail(&mut record, &format!("{err:#}")).await?;
            return Ok(record);
        }
        record.apply(OsStatus::Updating, 30, "os updating,copy iso successfully")?;
        self.persist(&record).await?;

        let script = remote_script_path(&self.config.installer.upgrade_script);
        let output = SSHClient::run_remote_command_output(self.runner.as_ref(), &ip, vec![&script]).await?;
        let text = output.combined();
        match classify_upgrade_output(&output) {
            UpgradeResult::Done => {
                record.apply(OsStatus::Active, 100, "upgrade tfg successfully")?;
                self.persist(&record).await?;
                tracing::info!("Update os for {} successfully!", ip);
                if text.contains("reboot") {
                    self.wait_for_reboot(&ip).await?;
                }
            }
            UpgradeResult::Rebooting => {
                record.apply(OsStatus::Active, 100, "upgrade tfg successfully,os reboot")?;
                self.persist(&record).await?;
                tracing::info!("Update os for {} successfully,os reboot!", ip);
                self.wait_for_reboot(&ip).await?;
            }
            UpgradeResult::Failed(message) => self.fail(&mut record, &message).await?,
        }
        Ok(record)
    }

    async fn copy_media(&self, ip: &str, iso: &str) -> anyhow::Result<()> {
        let runner = self.runner.as_ref();
        SSHClient::run_remote_command(runner, ip, vec!["mkdir", "-p", UPDATE_DIR]).await?;
        let clean = format!("{UPDATE_DIR}/*");
        SSHClient::run_remote_command(runner, ip, vec!["rm", "-rf", &clean]).await?;
        SSHClient::push_file_to_remote(runner, ip, iso, UPDATE_DIR).await?;
        SSHClient::push_file_to_remote(runner, ip, &self.config.installer.upgrade_script, UPDATE_DIR).await?;
        SSHClient::run_remote_command(runner, ip, vec!["chmod", "777", &clean]).await?;
        Ok(())
    }

    async fn wait_for_reboot(&self, ip: &str) -> anyhow::Result<()> {
        if !wait_reboot(self.reachability.as_ref(), ip, self.config.poll_interval()).await? {
            tracing::warn!("host {} did not come back after the upgrade reboot", ip);
        }
        Ok(())
    }
}

fn remote_script_path(local_script: &str) -> String {
    let name = Path::new(local_script)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| local_script.to_string());
    format!("{UPDATE_DIR}/{name}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeResult {
    Done,
    Rebooting,
    Failed(String),
}

pub fn classify_upgrade_output(output: &CommandOutput) -> UpgradeResult {
    let text = output.combined();
    if output.success() {
        UpgradeResult::Done
    } else if output.status_code == Some(REBOOT_EXIT_CODE) && text.contains("reboot") {
        UpgradeResult::Rebooting
    } else {
        UpgradeResult::Failed(tail(&text, FAILURE_TAIL_LEN).replace('\n', " "))
    }
}
