mod logging;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::{anyhow, bail, Context};
use clap::Parser;
use tracing::level_filters::LevelFilter;
use bmprov_lib::host_sm::{HostInstall, InstallServices};
use bmprov_lib::install::pxe_server::build_pxe_server;
use bmprov_lib::install::PxeInstallInvoker;
use bmprov_lib::orchestration::{CommandRunner, OrchestrationCommon, SubprocessRunner};
use bmprov_lib::power::appliance::{HttpApplianceClient, DEFAULT_APPLIANCE_PORT};
use bmprov_lib::power::fabric::UcsFabric;
use bmprov_lib::power::ipmi::IpmiTool;
use bmprov_lib::power::BootPowerController;
use bmprov_lib::progress::process::ProcessProgressPoller;
use bmprov_lib::reachability::Fping;
use bmprov_lib::registry::{InventoryRegistry, Registry};
use bmprov_lib::scheduler::BatchScheduler;
use bmprov_lib::software::post_steps::SshPostSteps;
use bmprov_lib::software::{BinClusterInstaller, SoftwareInstallTask, SOFTWARE_BACKEND};
use bmprov_lib::topology::pxe::plan_pxe_server;
use bmprov_lib::topology::{resolve_cluster, resolve_network_plan};
use bmprov_lib::upgrade::OsUpgrade;
use bmprov_schemas::cli_models::{InstallOsCmd, InstallSoftwareCmd, Opts, SubCommand, UpgradeOsCmd};
use bmprov_schemas::install_models::OsStatus;
use bmprov_schemas::settings::OrchestratorConfig;
use crate::logging::{configure_logging, DEFAULT_LOG_LEVEL};

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() {
    std::process::exit(match run_app().await {
        Ok(_) => 0,
        Err(err) => {
            tracing::error!("{:#}", err);
            1
        }
    });
}

fn log_level(s: &str) -> anyhow::Result<LevelFilter> {
    match s.to_lowercase().as_str() {
        "error" => Ok(LevelFilter::ERROR),
        "warn" => Ok(LevelFilter::WARN),
        "info" => Ok(LevelFilter::INFO),
        "debug" => Ok(LevelFilter::DEBUG),
        "trace" => Ok(LevelFilter::TRACE),
        _ => Err(anyhow!("Unknown Log LevelFilter {}", s)),
    }
}

/// Parse the command line, set up logging and run the requested operation
pub async fn run_app() -> Result<(), anyhow::Error> {
    let opts: Opts = Opts::parse();
    let mut e = None;
    let level = match &opts.verbosity {
        None => DEFAULT_LOG_LEVEL,
        Some(x) => match log_level(x) {
            Ok(l) => l,
            Err(err) => {
                e = Some(err);
                DEFAULT_LOG_LEVEL
            }
        },
    };
    let settings_folder = bmprov_lib::settings_folder(opts.settings_folder.clone());
    let _guard = configure_logging(&settings_folder, level).await?;
    if let Some(e) = e {
        tracing::warn!("{}", e);
    }

    let name = opts.sub_command.name();
    match parse_command(opts, settings_folder).await {
        Ok(_) => Ok(()),
        Err(err) => {
            tracing::error!("ERROR: {}", err);
            err.chain().skip(1).for_each(|cause| tracing::error!("because: {}", cause));
            bail!("{name} failed")
        }
    }
}

/// Entrypoint for all commands
pub async fn parse_command(opts: Opts, settings_folder: PathBuf) -> anyhow::Result<()> {
    if opts.sub_command == SubCommand::SetupConfig {
        let config = OrchestratorConfig::default();
        config.write(&settings_folder).await?;
        tracing::info!("wrote default config to {:?}", OrchestratorConfig::config_path(&settings_folder));
        return Ok(());
    }

    let config = OrchestratorConfig::read_or_default(&settings_folder).await?;
    let registry = Arc::new(InventoryRegistry::from_file(Path::new(&opts.inventory)).await?);
    let runner: Arc<dyn CommandRunner> = Arc::new(SubprocessRunner::default());

    let result = match &opts.sub_command {
        SubCommand::Plan => plan(registry.as_ref()).await,
        SubCommand::BuildPxe(cmd) => {
            let networks = registry.get_networks().await?;
            let pxe_plan = plan_pxe_server(&networks, &cmd.interface)?;
            let path = build_pxe_server(runner.as_ref(), &config.installer, &pxe_plan).await?;
            tracing::info!("pxe server built from {:?}", path);
            Ok(())
        }
        SubCommand::InstallOs(cmd) => install_os(registry, runner, config, cmd).await,
        SubCommand::UpgradeOs(cmd) => upgrade_os(registry, runner, config, cmd).await,
        SubCommand::InstallSoftware(cmd) => {
            install_software(registry, runner, config, settings_folder, cmd).await
        }
        SubCommand::SetupConfig => Ok(()),
    };
    result.context(format!("running {}", opts.sub_command.name()))
}

/// Resolve the network plan and the cluster topology without touching any host
async fn plan(registry: &dyn Registry) -> anyhow::Result<()> {
    let cluster = registry.get_cluster().await?;
    let roles = registry.get_roles().await?;
    let networks = registry.get_networks().await?;
    let hosts = registry.get_hosts().await?;
    let network_plan = resolve_network_plan(&hosts, &networks)?;
    let topology = resolve_cluster(&cluster, &roles, &networks, &hosts, SOFTWARE_BACKEND)?;
    for role in &topology.roles {
        tracing::info!("role {} ({:?}): {}", role.role.name, role.kind(), role.management_ips().join(","));
    }
    println!("{}", serde_json::to_string_pretty(&network_plan)?);
    Ok(())
}

async fn install_os(
    registry: Arc<InventoryRegistry>,
    runner: Arc<dyn CommandRunner>,
    config: OrchestratorConfig,
    cmd: &InstallOsCmd,
) -> anyhow::Result<()> {
    let candidates = if cmd.hosts.is_empty() {
        registry.get_hosts().await?
    } else {
        let mut hosts = vec![];
        for host_id in &cmd.hosts {
            hosts.push(registry.get_host(host_id).await?);
        }
        hosts
    };
    let explicit = !cmd.hosts.is_empty();
    let hosts: Vec<_> = candidates.into_iter()
        .filter(|h| {
            let installable = HostInstall::can_install(h);
            if !installable && explicit {
                tracing::warn!("host {} is {}, not installing its os", h.id, h.os_status);
            }
            installable
        })
        .collect();
    if hosts.is_empty() {
        tracing::info!("no host needs an os install");
        return Ok(());
    }

    let mut must_succeed = BTreeSet::new();
    if let Some(role_name) = &cmd.must_succeed_role {
        let role = registry.get_roles().await?
            .into_iter()
            .find(|r| &r.name == role_name)
            .context(format!("role {role_name} not found"))?;
        must_succeed.extend(role.host_ids);
    }

    let power = Arc::new(BootPowerController::new(
        Arc::new(IpmiTool::new(runner.clone())),
        Arc::new(HttpApplianceClient::new(DEFAULT_APPLIANCE_PORT)),
        &config,
    ).with_fabric(Arc::new(UcsFabric::new(runner.clone(), &config.fabric_manager_addr))));
    let max_parallel = cmd.max_parallel.unwrap_or(config.max_parallel_os_number);
    let services = InstallServices {
        registry,
        power,
        invoker: Arc::new(PxeInstallInvoker::new(runner.clone(), &config.installer)),
        poller: Arc::new(ProcessProgressPoller::new(runner, &config)),
        config,
    };
    let report = BatchScheduler::new(services, max_parallel).run(hosts, &must_succeed).await?;
    let failed = report.failed();
    if !failed.is_empty() {
        bail!("os install failed for hosts {}", failed.into_iter().collect::<Vec<_>>().join(","));
    }
    Ok(())
}

async fn upgrade_os(
    registry: Arc<InventoryRegistry>,
    runner: Arc<dyn CommandRunner>,
    config: OrchestratorConfig,
    cmd: &UpgradeOsCmd,
) -> anyhow::Result<()> {
    let host_ids = if cmd.hosts.is_empty() {
        registry.get_hosts().await?
            .into_iter()
            .filter(|h| h.os_status == OsStatus::Active)
            .map(|h| h.id)
            .collect()
    } else {
        cmd.hosts.clone()
    };
    let reachability = Arc::new(Fping::new(runner.clone()));
    let records = OsUpgrade::new(registry, runner, reachability, config)
        .run(&host_ids, &cmd.iso)
        .await?;
    tracing::info!("upgraded os of {} hosts", records.len());
    Ok(())
}

async fn install_software(
    registry: Arc<InventoryRegistry>,
    runner: Arc<dyn CommandRunner>,
    config: OrchestratorConfig,
    settings_folder: PathBuf,
    cmd: &InstallSoftwareCmd,
) -> anyhow::Result<()> {
    let cluster = registry.get_cluster().await?;
    let installer = Arc::new(BinClusterInstaller::new(&config.installer.software_installer));
    let common = OrchestrationCommon::new(&cluster.id, settings_folder, config);
    let task = SoftwareInstallTask::new(
        common,
        registry,
        Arc::new(Fping::new(runner.clone())),
        Arc::new(SshPostSteps::new(runner)),
        installer,
    ).for_role(cmd.role.clone());
    let mut source = task.progress_source();
    if !task.run(&mut source).await? {
        tracing::info!("no host of cluster {} needs the software install", cluster.id);
    }
    Ok(())
}
