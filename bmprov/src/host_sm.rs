use std::sync::Arc;
use std::time::Duration;
use anyhow::Context;
use tokio::time::Instant;
use bmprov_schemas::install_models::{HostInstallRecord, HostStatusUpdate, OsStatus};
use bmprov_schemas::inventory::{Host, Network, ResourceType, Role};
use bmprov_schemas::settings::OrchestratorConfig;
use crate::install::params::InstallParams;
use crate::install::InstallInvoker;
use crate::power::{BootAction, BootPowerController, PowerError};
use crate::progress::{PollOutcome, ProgressPoller};
use crate::registry::Registry;
use crate::scheduler::ScheduleError;

/// Collaborators a host install is driven through
#[derive(Clone)]
pub struct InstallServices {
    pub registry: Arc<dyn Registry>,
    pub power: Arc<BootPowerController>,
    pub invoker: Arc<dyn InstallInvoker>,
    pub poller: Arc<dyn ProgressPoller>,
    pub config: OrchestratorConfig,
}

/// Drives one host through `pre-install`, `installing` and on to `active` or `install-failed`.
/// Every change of the record is written to the registry before the next step is taken.
pub struct HostInstall {
    host: Host,
    record: HostInstallRecord,
    persisted: Option<HostStatusUpdate>,
    started_at: Instant,
}

impl HostInstall {
    pub fn new(host: Host, started_at: Instant) -> Self {
        let record = HostInstallRecord {
            host_id: host.id.clone(),
            os_status: host.os_status,
            os_progress: host.os_progress,
            messages: host.messages.clone(),
            stall_count: 0,
        };
        Self {
            host,
            record,
            persisted: None,
            started_at,
        }
    }

    /// Hosts that already run an os, or are being upgraded, are left alone by an install
    pub fn can_install(host: &Host) -> bool {
        host.os_status.can_transition_to(OsStatus::PreInstall)
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn record(&self) -> &HostInstallRecord {
        &self.record
    }

    pub fn is_in_progress(&self) -> bool {
        self.record.os_status.is_in_progress() || self.record.os_status == OsStatus::PreInstall
    }

    fn is_docker(&self) -> bool {
        self.host.resource_type == ResourceType::Docker
    }

    fn elapsed_minutes(&self) -> f64 {
        (self.started_at.elapsed().as_secs_f64() / 60.0 * 100.0).round() / 100.0
    }

    async fn persist(&mut self, services: &InstallServices) -> anyhow::Result<()> {
        let update = self.record.to_update();
        if self.persisted.as_ref() == Some(&update) {
            return Ok(());
        }
        services.registry.update_host_status(&self.host.id, &update).await
            .context(format!("writing install status of host {}", self.host.id))?;
        self.persisted = Some(update);
        Ok(())
    }

    async fn fail(&mut self, services: &InstallServices, message: &str) -> anyhow::Result<()> {
        tracing::info!("host {} install failed: {}", self.host.id, message);
        self.record.fail(message)?;
        self.persist(services).await
    }

    /// Boot and power failures only stop the cluster operation for controller hosts
    async fn power_failed(
        &mut self,
        services: &InstallServices,
        action: BootAction,
        err: PowerError,
    ) -> anyhow::Result<()> {
        let fatal = self.host.is_ha_controller();
        let message = if fatal {
            format!("{err}, is controller host, can't go on playing")
        } else {
            format!("{err}, not controller host or no role, go on playing")
        };
        tracing::warn!("host {}: {}", self.host.id, message);
        if self.record.os_status.is_terminal() {
            self.record.messages = message.clone();
            self.persist(services).await?;
        } else {
            self.fail(services, &message).await?;
        }
        if fatal {
            return Err(ScheduleError::ControllerBootFailure {
                host_id: self.host.id.clone(),
                action: action.to_string(),
                message,
            }.into());
        }
        Ok(())
    }

    /// Reset the record for a new wave and point the host at the pxe server
    pub async fn begin(&mut self, services: &InstallServices) -> anyhow::Result<()> {
        self.record.reset(OsStatus::PreInstall, "Preparing for OS installation")?;
        self.persist(services).await?;
        if self.is_docker() || self.host.uses_appliance() {
            return Ok(());
        }
        if let Err(err) = services.power.set(&self.host, BootAction::Pxe).await {
            return self.power_failed(services, BootAction::Pxe, err).await;
        }
        Ok(())
    }

    /// Hand the host to the installer and reboot it into the pxe install. A host whose installer
    /// could not be started is failed straight away.
    pub async fn start(
        &mut self,
        services: &InstallServices,
        roles: &[Role],
        networks: &[Network],
    ) -> anyhow::Result<()> {
        if self.record.os_status != OsStatus::PreInstall {
            return Ok(());
        }
        let params = match InstallParams::build(&self.host, roles, networks, &services.config.host_defaults) {
            Ok(params) => params,
            Err(err) => return self.fail(services, &format!("{err:#}")).await,
        };
        if let Err(err) = services.invoker.install(&params).await {
            return self.fail(services, &format!("{err:#}")).await;
        }
        let message = if self.is_docker() { "docker container is creating" } else { "OS installing" };
        self.record.apply(OsStatus::Installing, 0, message)?;
        self.persist(services).await?;
        if self.is_docker() {
            return Ok(());
        }
        if self.host.uses_appliance() {
            if let Err(err) = services.power.set(&self.host, BootAction::Pxe).await {
                return self.power_failed(services, BootAction::Pxe, err).await;
            }
        }
        if let Err(err) = services.power.restart(&self.host).await {
            return self.power_failed(services, BootAction::Reset, err).await;
        }
        Ok(())
    }

    /// Apply one progress observation
    pub async fn poll(&mut self, services: &InstallServices) -> anyhow::Result<()> {
        if !self.record.os_status.is_in_progress() {
            return Ok(());
        }
        match services.poller.poll(&self.host).await {
            PollOutcome::Failed { message } => self.fail(services, &message).await,
            PollOutcome::Progress { progress: 100, .. } => self.complete(services).await,
            PollOutcome::Progress { progress, message } => {
                if progress <= self.record.os_progress {
                    self.record.stall_count += 1;
                    tracing::debug!(
                        "host {} has kept {}s when progress is {}",
                        self.host.id,
                        self.record.stall_count as u64 * services.config.poll_interval_secs,
                        self.record.os_progress,
                    );
                    if self.record.stall_count >= services.config.stall_poll_limit() {
                        let message = if self.is_docker() { "docker container created timeout" } else { "os installed timeout" };
                        return self.fail(services, message).await;
                    }
                    return Ok(());
                }
                self.record.stall_count = 0;
                let message = if message.is_empty() { self.record.messages.clone() } else { message };
                self.record.apply(OsStatus::Installing, progress, &message)?;
                self.persist(services).await
            }
        }
    }

    /// Poll at the configured interval until the host is done or `deadline` passes. The
    /// post install boot switch runs in here too, so it only holds up this host.
    pub async fn poll_until(&mut self, services: &InstallServices, deadline: Instant) -> anyhow::Result<()> {
        while self.record.os_status.is_in_progress() && Instant::now() < deadline {
            tokio::time::sleep(services.config.poll_interval()).await;
            self.poll(services).await?;
        }
        Ok(())
    }

    async fn complete(&mut self, services: &InstallServices) -> anyhow::Result<()> {
        self.record.stall_count = 0;
        self.record.apply(OsStatus::Active, 100, "OS installed successfully")?;
        self.persist(services).await?;
        tracing::info!("It takes {} min for host {} to install os", self.elapsed_minutes(), self.host.id);
        if self.is_docker() {
            return Ok(());
        }
        // the nic fix script runs on first boot of the installed os
        tokio::time::sleep(Duration::from_secs(services.config.nicfix_wait_secs)).await;
        tracing::info!("Set boot from disk for host {}", self.host.id);
        if let Err(err) = services.power.set(&self.host, BootAction::Disk).await {
            return self.power_failed(services, BootAction::Disk, err).await;
        }
        tracing::info!("reboot host {}", self.host.id);
        if let Err(err) = services.power.restart(&self.host).await {
            return self.power_failed(services, BootAction::Reset, err).await;
        }
        Ok(())
    }

    /// Fail a host that did not finish before its wave ran out of time
    pub async fn force_fail(&mut self, services: &InstallServices, message: &str) -> anyhow::Result<()> {
        if !self.is_in_progress() {
            return Ok(());
        }
        self.fail(services, message).await
    }
}
