//! Inventory builders and recording doubles for the process boundaries of the engine

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use anyhow::bail;
use async_trait::async_trait;
use tokio::time::Instant;
use bmprov_schemas::inventory::{
    AssignedNetwork, Cluster, Host, Interface, Inventory, Network, NetworkType, Role,
};
use crate::install::params::InstallParams;
use crate::install::InstallInvoker;
use crate::orchestration::{CommandOutput, CommandRunner};
use crate::power::{ApplianceClient, BootAction, FabricManager, IpmiCredentials, PowerChannel};
use crate::progress::{ClusterProgressSource, PollOutcome, ProgressPoller};
use crate::reachability::Reachability;
use crate::software::post_steps::PostSteps;
use crate::software::ClusterInstaller;

pub fn network(name: &str, network_type: NetworkType, cidr: &str) -> Network {
    Network {
        id: name.to_lowercase(),
        name: name.to_string(),
        network_type,
        cidr: Some(cidr.to_string()).filter(|c| !c.is_empty()),
        gateway: None,
        vlan_id: None,
        vlan_start: None,
        vlan_end: None,
        ip_ranges: vec![],
        ip: None,
        physnet_name: None,
        ml2_type: None,
        capability: None,
        alias: None,
    }
}

/// A cluster with `n` hosts, host-1 and host-2 form the HA controller role and the rest are
/// compute nodes. host-i has management address 10.0.0.(10+i) on eth0, which is also its pxe
/// nic, and storage address 10.1.0.(10+i) on eth1.
pub fn sample_inventory(n: usize) -> Inventory {
    let networks = vec![
        network("MANAGEMENT", NetworkType::Management, "10.0.0.0/24"),
        network("STORAGE", NetworkType::Storage, "10.1.0.0/24"),
        network("PXE", NetworkType::System, "192.168.1.0/24"),
    ];
    let host_id = |i: usize| format!("host-{i}");
    let mut hosts = vec![];
    for i in 1..=n {
        let role = if i <= 2 { "CONTROLLER_HA" } else { "COMPUTER" };
        hosts.push(Host {
            id: host_id(i),
            name: host_id(i),
            ipmi_user: Some("admin".into()),
            ipmi_passwd: Some("secret".into()),
            ipmi_addr: Some(format!("192.168.100.1{i}")),
            os_version_file: Some("/var/lib/bmprov/os/os.iso".into()),
            interfaces: vec![
                Interface {
                    name: "eth0".into(),
                    mac: Some(format!("52:54:00:00:00:{i:02x}")),
                    is_deployment: true,
                    assigned_networks: vec![AssignedNetwork {
                        name: "MANAGEMENT".into(),
                        ip: Some(format!("10.0.0.{}", 10 + i)),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
                Interface {
                    name: "eth1".into(),
                    mac: Some(format!("52:54:00:00:01:{i:02x}")),
                    assigned_networks: vec![AssignedNetwork {
                        name: "STORAGE".into(),
                        ip: Some(format!("10.1.0.{}", 10 + i)),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
            ],
            roles: vec![role.to_string()],
            ..Default::default()
        });
    }
    let roles = vec![
        Role {
            id: "role-ha".into(),
            name: "CONTROLLER_HA".into(),
            vip: Some("10.0.0.100".into()),
            deployment_backend: "tecs".into(),
            host_ids: (1..=n.min(2)).map(host_id).collect(),
            ..Default::default()
        },
        Role {
            id: "role-computer".into(),
            name: "COMPUTER".into(),
            deployment_backend: "tecs".into(),
            host_ids: (3..=n).map(host_id).collect(),
            ..Default::default()
        },
    ];
    Inventory {
        cluster: Cluster { id: "cluster-1".into(), name: "lab".into(), ..Default::default() },
        roles,
        networks,
        hosts,
    }
}

/// Records every command and answers with the first canned output whose key is contained in the
/// command line. Anything else succeeds and echoes the command line on stdout.
#[derive(Default)]
pub struct RecordingRunner {
    commands: Mutex<Vec<String>>,
    responses: Mutex<Vec<(String, CommandOutput)>>,
    delay: Mutex<Option<Duration>>,
}

impl RecordingRunner {
    pub fn respond(&self, contains: &str, output: CommandOutput) {
        self.responses.lock().unwrap().push((contains.to_string(), output));
    }

    pub fn delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, cmd: Vec<String>) -> anyhow::Result<CommandOutput> {
        let line = cmd.join(" ");
        self.commands.lock().unwrap().push(line.clone());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let canned = self.responses.lock().unwrap().iter()
            .find(|(key, _)| line.contains(key.as_str()))
            .map(|(_, output)| output.clone());
        Ok(canned.unwrap_or(CommandOutput { status_code: Some(0), stdout: line, stderr: String::new() }))
    }
}

/// Power channel that fails the first `failures` requests, calls are recorded as `<addr> <action>`
#[derive(Default)]
pub struct MockPowerChannel {
    failures: Mutex<u32>,
    calls: Mutex<Vec<String>>,
}

impl MockPowerChannel {
    pub fn failing_first(failures: u32) -> Self {
        Self { failures: Mutex::new(failures), ..Default::default() }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PowerChannel for MockPowerChannel {
    async fn set(&self, credentials: &IpmiCredentials, action: BootAction) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(format!("{} {}", credentials.addr, action));
        let mut failures = self.failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            bail!("ipmitool: unable to establish session with {}", credentials.addr);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MockAppliance {
    calls: Mutex<Vec<String>>,
}

impl MockAppliance {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ApplianceClient for MockAppliance {
    async fn set_boot(&self, hwm_ip: &str, hwm_id: &str, action: BootAction) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(format!("set_boot {hwm_ip} {hwm_id} {action}"));
        Ok(())
    }

    async fn restart(&self, hwm_ip: &str, hwm_id: &str) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(format!("restart {hwm_ip} {hwm_id}"));
        Ok(())
    }
}

/// Places every blade in chassis 1 at the last octet of its management address, unless built
/// with `unlocated`. Calls are recorded as `locate <addr>` and `apply <location> <action>`.
#[derive(Default)]
pub struct MockFabric {
    unlocated: bool,
    calls: Mutex<Vec<String>>,
}

impl MockFabric {
    pub fn unlocated() -> Self {
        Self { unlocated: true, ..Default::default() }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FabricManager for MockFabric {
    async fn locate(&self, credentials: &IpmiCredentials) -> anyhow::Result<String> {
        self.calls.lock().unwrap().push(format!("locate {}", credentials.addr));
        if self.unlocated {
            bail!("no blade with management address {}", credentials.addr);
        }
        let blade = credentials.addr.rsplit('.').next().unwrap_or_default();
        Ok(format!("1/{blade}"))
    }

    async fn apply(&self, _credentials: &IpmiCredentials, location: &str, action: BootAction) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(format!("apply {location} {action}"));
        Ok(())
    }
}

/// Records the host names it was asked to install, fails the ones set up with `fail_for`
#[derive(Default)]
pub struct MockInvoker {
    installed: Mutex<Vec<String>>,
    failures: Mutex<BTreeMap<String, String>>,
}

impl MockInvoker {
    pub fn fail_for(&self, hostname: &str, message: &str) {
        self.failures.lock().unwrap().insert(hostname.to_string(), message.to_string());
    }

    pub fn installed(&self) -> Vec<String> {
        self.installed.lock().unwrap().clone()
    }
}

#[async_trait]
impl InstallInvoker for MockInvoker {
    async fn install(&self, params: &InstallParams) -> anyhow::Result<()> {
        if let Some(message) = self.failures.lock().unwrap().get(&params.hostname) {
            bail!("{}", message);
        }
        self.installed.lock().unwrap().push(params.hostname.clone());
        Ok(())
    }
}

/// Answers each host's polls from a script, the last outcome repeats. Unscripted hosts sit at 0.
#[derive(Default)]
pub struct ScriptedPoller {
    scripts: Mutex<BTreeMap<String, VecDeque<PollOutcome>>>,
    polls: Mutex<BTreeMap<String, Vec<Instant>>>,
}

impl ScriptedPoller {
    pub fn script(&self, host_id: &str, outcomes: Vec<PollOutcome>) {
        self.scripts.lock().unwrap().insert(host_id.to_string(), outcomes.into());
    }

    pub fn polls(&self, host_id: &str) -> usize {
        self.poll_times(host_id).len()
    }

    pub fn poll_times(&self, host_id: &str) -> Vec<Instant> {
        self.polls.lock().unwrap().get(host_id).cloned().unwrap_or_default()
    }
}

fn next_outcome(script: &mut VecDeque<PollOutcome>) -> PollOutcome {
    match script.len() {
        0 => PollOutcome::progress(0, ""),
        1 => script[0].clone(),
        _ => script.pop_front().unwrap_or_else(|| PollOutcome::progress(0, "")),
    }
}

#[async_trait]
impl ProgressPoller for ScriptedPoller {
    async fn poll(&self, host: &Host) -> PollOutcome {
        self.polls.lock().unwrap().entry(host.id.clone()).or_default().push(Instant::now());
        let mut scripts = self.scripts.lock().unwrap();
        next_outcome(scripts.entry(host.id.clone()).or_default())
    }
}

pub struct ScriptedProgressSource {
    script: VecDeque<PollOutcome>,
}

impl ScriptedProgressSource {
    pub fn new(outcomes: Vec<PollOutcome>) -> Self {
        Self { script: outcomes.into() }
    }
}

#[async_trait]
impl ClusterProgressSource for ScriptedProgressSource {
    async fn poll(&mut self) -> PollOutcome {
        next_outcome(&mut self.script)
    }
}

/// Every address answers unless scripted otherwise. Each address keeps its own ping count.
#[derive(Default)]
pub struct ScriptedReachability {
    patterns: Mutex<BTreeMap<String, Vec<bool>>>,
    down_for: Mutex<BTreeMap<String, usize>>,
    pings: Mutex<BTreeMap<String, usize>>,
    rounds: Mutex<usize>,
}

impl ScriptedReachability {
    /// unreachable for the first `pings` pings
    pub fn down_for(&self, ip: &str, pings: usize) {
        self.down_for.lock().unwrap().insert(ip.to_string(), pings);
    }

    /// `true` is up, the last entry repeats
    pub fn pattern(&self, ip: &str, pattern: Vec<bool>) {
        self.patterns.lock().unwrap().insert(ip.to_string(), pattern);
    }

    pub fn rounds(&self) -> usize {
        *self.rounds.lock().unwrap()
    }

    fn is_up(&self, ip: &str) -> bool {
        let ping = {
            let mut pings = self.pings.lock().unwrap();
            let count = pings.entry(ip.to_string()).or_default();
            *count += 1;
            *count - 1
        };
        if let Some(pattern) = self.patterns.lock().unwrap().get(ip) {
            return pattern.get(ping).or(pattern.last()).copied().unwrap_or(true);
        }
        match self.down_for.lock().unwrap().get(ip) {
            Some(down) => ping >= *down,
            None => true,
        }
    }
}

#[async_trait]
impl Reachability for ScriptedReachability {
    async fn unreachable(&self, ips: &[String]) -> anyhow::Result<Vec<String>> {
        *self.rounds.lock().unwrap() += 1;
        Ok(ips.iter().filter(|ip| !self.is_up(ip)).cloned().collect())
    }
}

#[derive(Default)]
pub struct MockPostSteps {
    calls: Mutex<Vec<String>>,
}

impl MockPostSteps {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

fn names(table: &[(String, String)]) -> String {
    table.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>().join(",")
}

#[async_trait]
impl PostSteps for MockPostSteps {
    async fn configure_dns_servers(&self, servers: &[String], _table: &[(String, String)]) -> anyhow::Result<()> {
        self.record(format!("dns-servers {}", servers.join(",")));
        Ok(())
    }

    async fn configure_dns_clients(&self, nodes: &[String], nameservers: &[String]) -> anyhow::Result<()> {
        self.record(format!("dns-clients {} via {}", nodes.join(","), nameservers.join(",")));
        Ok(())
    }

    async fn distribute_hosts_table(&self, nodes: &[String], table: &[(String, String)]) -> anyhow::Result<()> {
        self.record(format!("hosts {} {}", nodes.join(","), names(table)));
        Ok(())
    }

    async fn patch_compute_nodes(&self, computes: &[(String, String)], proxy_name: &str, proxy_ip: &str) -> anyhow::Result<()> {
        let computes: Vec<String> = computes.iter().map(|(ip, name)| format!("{ip}={name}")).collect();
        self.record(format!("nova {} {}={}", computes.join(","), proxy_name, proxy_ip));
        Ok(())
    }

    async fn patch_dashboard(&self, ha_nodes: &[String], aliases: &[String]) -> anyhow::Result<()> {
        self.record(format!("dashboard {} {}", ha_nodes.join(","), aliases.join(",")));
        Ok(())
    }
}

#[derive(Default)]
pub struct MockClusterInstaller {
    launches: Mutex<Vec<(PathBuf, PathBuf)>>,
}

impl MockClusterInstaller {
    pub fn launches(&self) -> Vec<(PathBuf, PathBuf)> {
        self.launches.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterInstaller for MockClusterInstaller {
    async fn launch(&self, conf_file: &Path, log_file: &Path) -> anyhow::Result<()> {
        self.launches.lock().unwrap().push((conf_file.to_path_buf(), log_file.to_path_buf()));
        Ok(())
    }
}
