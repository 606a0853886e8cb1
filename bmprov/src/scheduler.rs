use std::collections::BTreeSet;
use futures_util::future::{join_all, try_join_all};
use thiserror::Error;
use tokio::time::Instant;
use tracing::Instrument;
use bmprov_schemas::install_models::{HostInstallRecord, OsStatus};
use bmprov_schemas::inventory::{Host, Network, Role};
use crate::host_sm::{HostInstall, InstallServices};
use crate::topology::resolve_network_plan;

pub const CLUSTER_TIMEOUT_MESSAGE: &str = "cluster os installed timeout";

/// Failures that stop the whole operation instead of a single host
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("host {host_id} must succeed but its os install failed: {message}")]
    MustSucceedFailed {
        host_id: String,
        message: String,
    },
    #[error("set host {host_id} to '{action}' failed: {message}")]
    ControllerBootFailure {
        host_id: String,
        action: String,
        message: String,
    },
    #[error("cluster os install timed out after {minutes} min, hosts failed: {}", hosts.join(","))]
    WaveTimeout {
        minutes: u64,
        hosts: Vec<String>,
    },
}

/// Split into consecutive waves of at most `max_parallel`
pub fn partition<T: Clone>(items: &[T], max_parallel: usize) -> Vec<Vec<T>> {
    items.chunks(max_parallel.max(1)).map(|c| c.to_vec()).collect()
}

/// Outcome of a whole run, the records are in wave order
#[derive(Debug, Clone, Default)]
pub struct ScheduleReport {
    pub waves: usize,
    pub records: Vec<HostInstallRecord>,
    /// hosts left untouched because their os status does not allow an install
    pub skipped: Vec<String>,
}

impl ScheduleReport {
    /// Hosts that never reached `active`
    pub fn failed(&self) -> BTreeSet<String> {
        self.records.iter()
            .filter(|r| r.os_status != OsStatus::Active)
            .map(|r| r.host_id.clone())
            .collect()
    }
}

/// Installs hosts in sequential waves, concurrently within a wave
pub struct BatchScheduler {
    services: InstallServices,
    max_parallel: usize,
    run_id: String,
}

impl BatchScheduler {
    pub fn new(services: InstallServices, max_parallel: usize) -> Self {
        Self {
            services,
            max_parallel: max_parallel.max(1),
            run_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// id attached to the log spans of every wave of this scheduler
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Install `hosts`. A failed host of `must_succeed` stops the run once its wave is over, the
    /// later waves are not started.
    pub async fn run(&self, hosts: Vec<Host>, must_succeed: &BTreeSet<String>) -> anyhow::Result<ScheduleReport> {
        let mut report = ScheduleReport::default();
        let (hosts, skipped): (Vec<Host>, Vec<Host>) = hosts.into_iter().partition(HostInstall::can_install);
        for host in skipped {
            tracing::warn!("host {} is {}, skipping its os install", host.id, host.os_status);
            report.skipped.push(host.id);
        }
        if hosts.is_empty() {
            return Ok(report);
        }

        let roles = self.services.registry.get_roles().await?;
        let networks = self.services.registry.get_networks().await?;
        resolve_network_plan(&hosts, &networks)?;

        let started_at = Instant::now();
        for wave in partition(&hosts, self.max_parallel) {
            report.waves += 1;
            let span = tracing::info_span!("wave", run_id = %self.run_id, wave = report.waves);
            let ids: Vec<&str> = wave.iter().map(|h| h.id.as_str()).collect();
            span.in_scope(|| tracing::info!("Stage: begin install os for hosts {}", ids.join(",")));
            let machines = self.run_wave(wave, &roles, &networks, started_at).instrument(span).await;
            let machines = match machines {
                Ok(machines) => machines,
                Err((machines, err)) => {
                    report.records.extend(machines.iter().map(|m| m.record().clone()));
                    log_results(&report.records);
                    return Err(err);
                }
            };
            report.records.extend(machines.iter().map(|m| m.record().clone()));
            if let Some(failed) = machines.iter()
                .map(|m| m.record())
                .find(|r| must_succeed.contains(&r.host_id) && r.os_status != OsStatus::Active) {
                log_results(&report.records);
                return Err(ScheduleError::MustSucceedFailed {
                    host_id: failed.host_id.clone(),
                    message: failed.messages.clone(),
                }.into());
            }
        }
        tracing::info!(
            "It totally takes {:.2} min for all host to install os",
            started_at.elapsed().as_secs_f64() / 60.0
        );
        log_results(&report.records);
        Ok(report)
    }

    async fn run_wave(
        &self,
        wave: Vec<Host>,
        roles: &[Role],
        networks: &[Network],
        started_at: Instant,
    ) -> Result<Vec<HostInstall>, (Vec<HostInstall>, anyhow::Error)> {
        let services = &self.services;
        let mut machines: Vec<HostInstall> = wave.into_iter()
            .map(|h| HostInstall::new(h, started_at))
            .collect();

        let starts = join_all(machines.iter_mut().map(|machine| async move {
            machine.begin(services).await?;
            machine.start(services, roles, networks).await
        })).await;
        if let Some(err) = starts.into_iter().find_map(|r| r.err()) {
            abort_wave(&mut machines, services, &err).await;
            return Err((machines, err));
        }

        tracing::info!("Begin to query install progress...");
        let wave_timeout = services.config.wave_timeout(self.max_parallel);
        let deadline = Instant::now() + wave_timeout;
        let polled = try_join_all(machines.iter_mut()
            .map(|machine| machine.poll_until(services, deadline))
        ).await;
        if let Err(err) = polled {
            abort_wave(&mut machines, services, &err).await;
            return Err((machines, err));
        }

        let hosts = match fail_unfinished(&mut machines, services, CLUSTER_TIMEOUT_MESSAGE).await {
            Ok(hosts) => hosts,
            Err(err) => return Err((machines, err)),
        };
        if !hosts.is_empty() {
            let err = ScheduleError::WaveTimeout { minutes: wave_timeout.as_secs() / 60, hosts };
            return Err((machines, err.into()));
        }
        Ok(machines)
    }
}

/// Fail every host of the wave that has not reached a terminal state, returns their ids
async fn fail_unfinished(
    machines: &mut [HostInstall],
    services: &InstallServices,
    message: &str,
) -> anyhow::Result<Vec<String>> {
    let mut hosts = vec![];
    for machine in machines.iter_mut().filter(|m| m.is_in_progress()) {
        hosts.push(machine.host().id.clone());
        machine.force_fail(services, message).await?;
    }
    Ok(hosts)
}

/// A wave stopped by `err` leaves no host behind in `pre-install` or `installing`
async fn abort_wave(machines: &mut [HostInstall], services: &InstallServices, err: &anyhow::Error) {
    let message = format!("os install aborted: {err}");
    match fail_unfinished(machines, services, &message).await {
        Ok(hosts) if !hosts.is_empty() => tracing::warn!("aborted os install of hosts {}", hosts.join(",")),
        Ok(_) => {}
        Err(persist) => tracing::error!("failing the hosts of an aborted wave: {persist:#}"),
    }
}

fn log_results(records: &[HostInstallRecord]) {
    tracing::info!("OS install result is:");
    tracing::info!("{}   {}   {}", "host-id", "os-status", "description");
    for record in records {
        tracing::info!("{record}");
    }
}
