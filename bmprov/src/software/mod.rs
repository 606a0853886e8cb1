use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use anyhow::Context;
use async_trait::async_trait;
use thiserror::Error;
use tracing::Instrument;
use bmprov_schemas::install_models::{RoleStatusUpdate, SoftwareStatus};
use bmprov_schemas::inventory::{Host, Role};
use crate::orchestration::OrchestrationCommon;
use crate::progress::markers::MarkerProgressSource;
use crate::progress::{ClusterProgressSource, PollOutcome};
use crate::reachability::{check_ping_hosts, Reachability};
use crate::registry::Registry;
use crate::software::config::SoftwareConfig;
use crate::software::post_steps::PostSteps;
use crate::topology::dns::DnsTable;
use crate::topology::{resolve_cluster, ClusterTopology};

pub mod config;
pub mod post_steps;

pub const SOFTWARE_BACKEND: &str = "tecs";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SoftwareInstallError {
    #[error("ping hosts {0} failed")]
    Unreachable(String),
    #[error("ping hosts {0} failed after DNS configuration")]
    UnreachableAfterDns(String),
    #[error("{0}")]
    InstallerLog(String),
    #[error("TECS install timeout for {hours} hours")]
    Timeout { hours: u64 },
}

/// Starts the cluster wide installer. It runs detached, progress is followed through its log.
#[async_trait]
pub trait ClusterInstaller: Send + Sync {
    async fn launch(&self, conf_file: &Path, log_file: &Path) -> anyhow::Result<()>;
}

/// `<installer> conf_file <tecs.conf>` with stdout and stderr appended to the install log
pub struct BinClusterInstaller {
    installer: String,
}

impl BinClusterInstaller {
    pub fn new(installer: &str) -> Self {
        Self { installer: installer.to_string() }
    }
}

#[async_trait]
impl ClusterInstaller for BinClusterInstaller {
    async fn launch(&self, conf_file: &Path, log_file: &Path) -> anyhow::Result<()> {
        if let Some(parent) = log_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let log = tokio::fs::File::create(log_file).await
            .context(format!("creating install log {log_file:?}"))?
            .into_std()
            .await;
        let child = tokio::process::Command::new(&self.installer)
            .arg("conf_file")
            .arg(conf_file)
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            .spawn()
            .context(format!("starting {}", self.installer))?;
        tracing::info!("installer {} started with pid {:?}", self.installer, child.id());
        Ok(())
    }
}

/// Installs the cluster software on every role host deployed with the software backend, once
/// their operating systems are up
pub struct SoftwareInstallTask {
    common: OrchestrationCommon,
    registry: Arc<dyn Registry>,
    reachability: Arc<dyn Reachability>,
    post_steps: Arc<dyn PostSteps>,
    installer: Arc<dyn ClusterInstaller>,
    /// only report progress on this role
    role: Option<String>,
}

impl SoftwareInstallTask {
    pub fn new(
        common: OrchestrationCommon,
        registry: Arc<dyn Registry>,
        reachability: Arc<dyn Reachability>,
        post_steps: Arc<dyn PostSteps>,
        installer: Arc<dyn ClusterInstaller>,
    ) -> Self {
        Self { common, registry, reachability, post_steps, installer, role: None }
    }

    pub fn for_role(mut self, role: Option<String>) -> Self {
        self.role = role;
        self
    }

    pub fn log_file(&self) -> PathBuf {
        Path::new(&self.common.config.installer.software_work_dir)
            .join(format!("tecs_{}_install.log", self.common.cluster_id))
    }

    /// file the installer writes its working directory into
    pub fn location_file(&self) -> PathBuf {
        Path::new(&self.common.config.installer.progress_location_dir).join(&self.common.cluster_id)
    }

    pub fn progress_source(&self) -> MarkerProgressSource {
        MarkerProgressSource::new(self.location_file(), self.log_file())
    }

    /// Run the install. Returns false when no host needed the software.
    pub async fn run(&self, source: &mut dyn ClusterProgressSource) -> anyhow::Result<bool> {
        let started_at = tokio::time::Instant::now();
        let mut progress = 0u8;
        let span = tracing::info_span!("software_install", run_id = %self.common.run_id, cluster = %self.common.cluster_id);
        let installed = self.install(source, &mut progress).instrument(span).await;
        match installed {
            Ok(false) => Ok(false),
            Ok(true) => {
                self.write_progress(SoftwareStatus::Active, 100, "Tecs installed successfully").await?;
                tracing::info!(
                    "Install TECS for cluster {} successfully, took {} min",
                    self.common.cluster_id,
                    started_at.elapsed().as_secs() / 60
                );
                Ok(true)
            }
            Err(err) => {
                tracing::error!("Install TECS for cluster {} failed: {:#}", self.common.cluster_id, err);
                self.write_progress(SoftwareStatus::InstallFailed, progress, &format!("{err:#}")).await?;
                Err(err)
            }
        }
    }

    async fn install(&self, source: &mut dyn ClusterProgressSource, progress: &mut u8) -> anyhow::Result<bool> {
        let cluster = self.registry.get_cluster().await?;
        let roles = self.registry.get_roles().await?;
        let networks = self.registry.get_networks().await?;
        let hosts = self.registry.get_hosts().await?;
        if !self.write_progress(SoftwareStatus::Init, 0, "Preparing for TECS installation").await? {
            tracing::info!("No host in cluster {} need to install tecs", cluster.id);
            return Ok(false);
        }

        let topology = resolve_cluster(&cluster, &roles, &networks, &hosts, SOFTWARE_BACKEND)?;
        let nodes = all_nodes(&topology);
        let interval = self.common.config.poll_interval();
        let ping_times = self.common.config.ping_times;
        let unreachable = check_ping_hosts(self.reachability.as_ref(), &nodes, ping_times, interval).await?;
        if !unreachable.is_empty() {
            return Err(SoftwareInstallError::Unreachable(unreachable.join(",")).into());
        }

        let dns = self.configure_name_resolution(&topology, &nodes).await?;
        let config = SoftwareConfig::synthesize(&topology, dns.as_ref())?;
        let conf_file = config.write(&self.common.cluster_conf_dir()).await?;
        tracing::info!("Stage: generated software config {:?}", conf_file);

        let location = self.location_file();
        if location.exists() {
            tokio::fs::remove_file(&location).await
                .context(format!("removing stale progress location {location:?}"))?;
        }
        tracing::info!("Stage: installing TECS in cluster {}", cluster.id);
        self.installer.launch(&conf_file, &self.log_file()).await?;
        *progress = 1;
        self.write_progress(SoftwareStatus::Installing, *progress, "TECS installing").await?;

        let timeout = self.common.config.software_install_timeout();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            tokio::time::sleep(interval).await;
            match source.poll().await {
                PollOutcome::Failed { message } => {
                    return Err(SoftwareInstallError::InstallerLog(message).into());
                }
                PollOutcome::Progress { progress: polled, message } => {
                    if polled > *progress {
                        tracing::debug!("software progress {}% ({})", polled, message);
                        *progress = polled;
                        if polled < 100 {
                            self.write_progress(SoftwareStatus::Installing, polled, "TECS installing").await?;
                        }
                    }
                }
            }
            if *progress == 100 {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(SoftwareInstallError::Timeout { hours: timeout.as_secs() / 3600 }.into());
            }
        }

        if let Some(dns) = &dns {
            self.patch_services(&topology, dns).await?;
        }
        Ok(true)
    }

    /// In dns mode the ha controllers serve every name and all nodes resolve through them,
    /// otherwise each node gets the names in its hosts file
    async fn configure_name_resolution(&self, topology: &ClusterTopology, nodes: &[String]) -> anyhow::Result<Option<DnsTable>> {
        let names = DnsTable::from_topology(topology);
        if !topology.cluster.use_dns {
            let host_entries: Vec<(String, String)> = names.entries().into_iter()
                .filter(|(name, _)| !name.ends_with("-vip"))
                .collect();
            self.post_steps.distribute_hosts_table(nodes, &host_entries).await?;
            return Ok(None);
        }

        let ha_nodes = topology.ha_role().map(|r| r.management_ips()).unwrap_or_default();
        let entries = names.entries();
        tracing::info!("Stage: configuring dns on {}", ha_nodes.join(","));
        self.post_steps.configure_dns_servers(&ha_nodes, &entries).await?;
        self.post_steps.configure_dns_clients(nodes, &ha_nodes).await?;
        self.post_steps.distribute_hosts_table(nodes, &entries).await?;

        let host_names: Vec<String> = entries.iter()
            .filter(|(name, _)| !name.contains("vip"))
            .map(|(name, _)| name.clone())
            .collect();
        let interval = self.common.config.poll_interval();
        let unreachable = check_ping_hosts(self.reachability.as_ref(), &host_names, self.common.config.ping_times, interval).await?;
        if !unreachable.is_empty() {
            return Err(SoftwareInstallError::UnreachableAfterDns(unreachable.join(",")).into());
        }
        Ok(Some(names))
    }

    /// Swap the names the installed services were configured with for what the nodes reach them by
    async fn patch_services(&self, topology: &ClusterTopology, dns: &DnsTable) -> anyhow::Result<()> {
        let Some(ha) = topology.ha_role() else {
            return Ok(());
        };
        let Some(floating) = &ha.floating else {
            return Ok(());
        };
        let public_vip = ha.role.public_vip.as_ref().filter(|v| !v.is_empty());
        let computes: Vec<(String, String)> = topology.roles.iter()
            .filter(|r| r.role.name == "COMPUTER")
            .flat_map(|r| r.hosts.iter())
            .map(|h| {
                let name = dns.name_of(&h.management.ip).unwrap_or(&h.name).to_string();
                (h.management.ip.clone(), name)
            })
            .collect();
        let (proxy_name, proxy_ip) = match public_vip {
            Some(public) => ("public-vip", public.as_str()),
            None => ("ha-vip", floating.vip.as_str()),
        };
        self.post_steps.patch_compute_nodes(&computes, proxy_name, proxy_ip).await?;

        let mut aliases = vec![floating.vip.clone()];
        if let Some(public) = public_vip {
            aliases.push(public.clone());
        }
        self.post_steps.patch_dashboard(&ha.management_ips(), &aliases).await?;
        Ok(())
    }

    /// Write the software progress to every not yet active host of the targeted roles and to the
    /// roles themselves. Returns whether any host still needed the software.
    async fn write_progress(&self, status: SoftwareStatus, progress: u8, message: &str) -> anyhow::Result<bool> {
        let roles = self.registry.get_roles().await?;
        let hosts = self.registry.get_hosts().await?;
        let update = RoleStatusUpdate { status, progress, messages: message.to_string() };
        let mut pending_any = false;
        for role in roles.iter().filter(|r| self.targets(r)) {
            let pending = pending_hosts(role, &hosts);
            for host in &pending {
                self.registry.update_role_host_status(&role.id, &host.id, &update).await?;
            }
            if !pending.is_empty() {
                self.registry.update_role_status(&role.id, &update).await?;
                pending_any = true;
            }
        }
        Ok(pending_any)
    }

    fn targets(&self, role: &Role) -> bool {
        role.deployment_backend == SOFTWARE_BACKEND
            && self.role.as_ref().map_or(true, |name| &role.name == name)
    }
}

fn pending_hosts<'a>(role: &Role, hosts: &'a [Host]) -> Vec<&'a Host> {
    hosts.iter()
        .filter(|h| role.host_ids.contains(&h.id))
        .filter(|h| h.software.status != SoftwareStatus::Active)
        .collect()
}

/// management ips of every role host, each once
fn all_nodes(topology: &ClusterTopology) -> Vec<String> {
    topology.installed_hosts.iter()
        .chain(topology.pending_hosts.iter())
        .cloned()
        .collect::<std::collections::BTreeSet<String>>()
        .into_iter()
        .collect()
}
