use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Formatter;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use crate::install_models::{OsStatus, SoftwareProgress};

pub const CISCO_MANUFACTURER: &str = "Cisco Systems Inc";

/// The full set of records the registry holds for one cluster. This is what is loaded from the
/// inventory file by the CLI, the orchestration engine only ever reads it through the registry.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "snake_case")]
pub struct Inventory {
    pub cluster: Cluster,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub networks: Vec<Network>,
    #[serde(default)]
    pub hosts: Vec<Host>,
}

impl fmt::Display for Inventory {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let text = serde_json::to_string_pretty(&self).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "snake_case")]
pub struct Cluster {
    pub id: String,
    pub name: String,
    /// replace addresses in the generated software config with host names and `-vip` tokens
    #[serde(default)]
    pub use_dns: bool,
    #[serde(default)]
    pub networking_parameters: NetworkingParameters,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "snake_case")]
pub struct NetworkingParameters {
    pub base_mac: Option<String>,
    pub gre_id_range: Option<(u32, u32)>,
    /// when set, tenant networks are vxlan segmented with this vni range, otherwise vlan
    pub vni_range: Option<String>,
    /// plain ovs hosts get a vswitch config only when an sdn controller drives them
    #[serde(default)]
    pub enable_sdn: bool,
}

/// Naming convention based semantics of a role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleKind {
    Ha,
    Lb,
    ChildCell,
    Plain,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "snake_case")]
pub struct Role {
    pub id: String,
    pub name: String,
    pub vip: Option<String>,
    pub ntp_server: Option<String>,
    pub db_vip: Option<String>,
    pub glance_vip: Option<String>,
    pub public_vip: Option<String>,
    pub glance_lv_size: Option<u64>,
    pub db_lv_size: Option<u64>,
    pub nova_lv_size: Option<u64>,
    #[serde(default = "default_deployment_backend")]
    pub deployment_backend: String,
    /// service name to the component it belongs to, i.e. `nova-api` -> `nova`
    #[serde(default)]
    pub services: BTreeMap<String, String>,
    #[serde(default)]
    pub service_disks: Vec<ServiceDisk>,
    #[serde(default)]
    pub host_ids: Vec<String>,
    #[serde(default)]
    pub software: SoftwareProgress,
}

pub fn default_deployment_backend() -> String {"tecs".to_string()}

impl Role {
    pub fn kind(&self) -> RoleKind {
        if self.name.contains("_CHILD_CELL") {
            RoleKind::ChildCell
        } else if self.name.ends_with("_HA") {
            RoleKind::Ha
        } else if self.name.ends_with("_LB") {
            RoleKind::Lb
        } else {
            RoleKind::Plain
        }
    }

    pub fn share_disk_services(&self) -> Vec<String> {
        self.service_disks.iter()
            .filter(|d| d.disk_location == DiskLocation::Share)
            .map(|d| d.service.clone())
            .collect()
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiskLocation {
    Local,
    Share,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "snake_case")]
pub struct ServiceDisk {
    pub service: String,
    pub disk_location: DiskLocation,
    /// size in GB
    #[serde(default)]
    pub size: u64,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum NetworkType {
    Management,
    PublicApi,
    Storage,
    DataPlane,
    Heartbeat,
    Private,
    Vxlan,
    External,
    /// the PXE/deployment network, at most one per cluster
    System,
}

impl NetworkType {
    /// Network planes that a cluster may define more than once
    pub fn may_repeat(&self) -> bool {
        matches!(self, NetworkType::DataPlane | NetworkType::Storage | NetworkType::Heartbeat)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct IpRange {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "snake_case")]
pub struct Network {
    pub id: String,
    pub name: String,
    pub network_type: NetworkType,
    pub cidr: Option<String>,
    pub gateway: Option<String>,
    pub vlan_id: Option<String>,
    pub vlan_start: Option<u32>,
    pub vlan_end: Option<u32>,
    #[serde(default)]
    pub ip_ranges: Vec<IpRange>,
    /// server address, only meaningful for the system network
    pub ip: Option<String>,
    pub physnet_name: Option<String>,
    pub ml2_type: Option<String>,
    pub capability: Option<String>,
    pub alias: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceType {
    #[default]
    Ether,
    Bond,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VswitchType {
    #[serde(alias = "OVS")]
    Ovs,
    #[serde(alias = "DVS")]
    Dvs,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "snake_case")]
pub struct AssignedNetwork {
    /// name of the cluster network
    pub name: String,
    pub ip: Option<String>,
    pub vswitch_type: Option<VswitchType>,
    pub dvs_domain_id: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "snake_case")]
pub struct Interface {
    pub name: String,
    #[serde(rename = "type", default)]
    pub interface_type: InterfaceType,
    pub mac: Option<String>,
    pub pci: Option<String>,
    pub ip: Option<String>,
    pub slave1: Option<String>,
    pub slave2: Option<String>,
    /// bonding mode, either a linux mode name/code or `<mode>;<lacp>`
    pub mode: Option<String>,
    /// marks the nic used for dhcp during pxe install
    #[serde(default)]
    pub is_deployment: bool,
    #[serde(default)]
    pub assigned_networks: Vec<AssignedNetwork>,
}

impl Interface {
    pub fn has_network(&self, network_name: &str) -> bool {
        self.assigned_networks.iter().any(|a| a.name == network_name)
    }

    pub fn assigned(&self, network_name: &str) -> Option<&AssignedNetwork> {
        self.assigned_networks.iter().find(|a| a.name == network_name)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "snake_case")]
pub struct Disk {
    pub name: String,
    /// by-path location, used to skip fibre channel and iscsi disks
    #[serde(default)]
    pub path: String,
    pub size_bytes: u64,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    #[default]
    Baremetal,
    Docker,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "snake_case")]
pub struct Host {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub resource_type: ResourceType,
    pub ipmi_user: Option<String>,
    pub ipmi_passwd: Option<String>,
    pub ipmi_addr: Option<String>,
    /// management appliance id, when present boot and power go through the appliance
    pub hwm_id: Option<String>,
    pub hwm_ip: Option<String>,
    /// system manufacturer as reported by the host's discovery
    pub manufacturer: Option<String>,
    pub os_version_file: Option<String>,
    pub root_disk: Option<String>,
    pub root_lv_size: Option<u64>,
    #[serde(default)]
    pub swap_lv_size: u64,
    pub root_pwd: Option<String>,
    /// cpu set reserved for the os, i.e. "0-3,^2"
    pub os_cpus: Option<String>,
    pub cpu_total: Option<u32>,
    #[serde(default)]
    pub memory_total_kb: u64,
    pub hugepages: Option<u32>,
    pub hugepagesize: Option<String>,
    #[serde(default)]
    pub disks: Vec<Disk>,
    #[serde(default)]
    pub interfaces: Vec<Interface>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub os_status: OsStatus,
    #[serde(default)]
    pub os_progress: u8,
    #[serde(default)]
    pub messages: String,
    #[serde(default)]
    pub software: SoftwareProgress,
    /// last time the engine wrote the os status of this host
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Host {
    pub fn uses_appliance(&self) -> bool {
        self.hwm_id.is_some()
    }

    /// Cisco blades take boot and power changes through their fabric manager
    pub fn is_cisco(&self) -> bool {
        self.manufacturer.as_deref() == Some(CISCO_MANUFACTURER)
    }

    pub fn has_role(&self, role_name: &str) -> bool {
        self.roles.iter().any(|r| r == role_name)
    }

    /// Hosts carrying a controller role are fatal to the cluster operation if they cannot be
    /// booted.
    pub fn is_ha_controller(&self) -> bool {
        self.has_role("CONTROLLER_HA") || self.has_role("CONTROLLER_LB")
    }

    pub fn interface_for_network(&self, network_name: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.has_network(network_name))
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let text = serde_json::to_string_pretty(&self).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}
