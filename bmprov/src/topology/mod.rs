use std::collections::{BTreeMap, BTreeSet};
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use thiserror::Error;
use bmprov_schemas::install_models::SoftwareStatus;
use bmprov_schemas::inventory::{Cluster, Host, Network, NetworkType, Role, RoleKind};
use crate::topology::dvs::{plan_dvs, DvsPlan};
use crate::topology::floating_ip::FloatingIps;
use crate::topology::interfaces::{host_addresses, plan_interfaces, pxe_mac, HostAddresses, InterfacePlan};
use crate::topology::physnet::{plan_physnets, PhysnetPlan};

pub mod bond;
pub mod dns;
pub mod dvs;
pub mod floating_ip;
pub mod heartbeat;
pub mod interfaces;
pub mod netmask;
pub mod physnet;
pub mod pxe;

/// Configuration errors found while resolving the topology. These are raised before any host is
/// touched and abort the whole cluster operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("Invalid bond_mode({mode}) for {vswitch} in {segmentation} network")]
    InvalidBondMode {
        mode: String,
        vswitch: String,
        segmentation: String,
    },
    #[error("no {network} network found for host {host}")]
    MissingNetwork {
        host: String,
        network: String,
    },
    #[error("network {network} assigned to host {host} is not defined in the cluster")]
    UnknownNetwork {
        host: String,
        network: String,
    },
    #[error("invalid cidr '{0}'")]
    InvalidCidr(String),
    #[error("role {role} has no {kind} configured")]
    MissingFloatingIp {
        role: String,
        kind: String,
    },
    #[error("network type {0} can only be defined once per cluster")]
    DuplicateNetwork(NetworkType),
    #[error("can't find dhcp interface for host {0}")]
    MissingPxeInterface(String),
    #[error("dhcp interface should only has one for host {0}")]
    MultiplePxeInterfaces(String),
    #[error("pxe server: {0}")]
    PxeServer(String),
}

/// Tenant network segmentation a vswitch carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Segmentation {
    Vlan,
    Vxlan,
}

/// At most one system network, and only DATAPLANE/STORAGE/HEARTBEAT may repeat
pub fn validate_networks(networks: &[Network]) -> Result<(), TopologyError> {
    let mut seen = BTreeSet::new();
    for network in networks {
        if network.network_type.may_repeat() {
            continue;
        }
        if !seen.insert(network.network_type) {
            return Err(TopologyError::DuplicateNetwork(network.network_type));
        }
    }
    Ok(())
}

pub fn network_by_type(networks: &[Network], network_type: NetworkType) -> Option<&Network> {
    networks.iter().find(|n| n.network_type == network_type)
}

/// Per host output of the resolver
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HostNetworkPlan {
    pub host_id: String,
    pub dhcp_mac: String,
    pub interfaces: Vec<InterfacePlan>,
    pub addresses: HostAddresses,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct NetworkPlan {
    pub hosts: BTreeMap<String, HostNetworkPlan>,
}

/// Resolve the network plan of every host. Nothing is written, an error here means the inventory
/// can not be deployed as it stands.
pub fn resolve_network_plan(hosts: &[Host], networks: &[Network]) -> Result<NetworkPlan, TopologyError> {
    validate_networks(networks)?;
    let mut plan = NetworkPlan::default();
    for host in hosts {
        let host_plan = HostNetworkPlan {
            host_id: host.id.clone(),
            dhcp_mac: pxe_mac(host)?,
            interfaces: plan_interfaces(host, networks)?,
            addresses: host_addresses(host, networks)?,
        };
        plan.hosts.insert(host.id.clone(), host_plan);
    }
    Ok(plan)
}

/// Resolved view of one role: its hosts' addresses and, for HA roles, its floating ips
#[derive(Debug, Clone)]
pub struct RoleTopology {
    pub role: Role,
    pub hosts: Vec<HostAddresses>,
    pub floating: Option<FloatingIps>,
}

impl RoleTopology {
    pub fn kind(&self) -> RoleKind {
        self.role.kind()
    }

    pub fn management_ips(&self) -> Vec<String> {
        self.hosts.iter().map(|h| h.management.ip.clone()).collect()
    }
}

/// Everything the software configuration synthesis needs for one cluster
#[derive(Debug, Clone)]
pub struct ClusterTopology {
    pub cluster: Cluster,
    pub roles: Vec<RoleTopology>,
    /// management ips of hosts that already run the cluster software
    pub installed_hosts: BTreeSet<String>,
    /// management ips of hosts still to be installed
    pub pending_hosts: BTreeSet<String>,
    /// nic the HA floating ips are brought up on
    pub ha_nic_name: Option<String>,
    pub dvs: Option<DvsPlan>,
    pub physnets: PhysnetPlan,
}

impl ClusterTopology {
    pub fn role(&self, name: &str) -> Option<&RoleTopology> {
        self.roles.iter().find(|r| r.role.name == name)
    }

    pub fn ha_role(&self) -> Option<&RoleTopology> {
        self.roles.iter().find(|r| r.kind() == RoleKind::Ha)
    }

    pub fn lb_role(&self) -> Option<&RoleTopology> {
        self.roles.iter().find(|r| r.kind() == RoleKind::Lb)
    }
}

/// Resolve the topology of every role deployed with `backend`
pub fn resolve_cluster(
    cluster: &Cluster,
    roles: &[Role],
    networks: &[Network],
    hosts: &[Host],
    backend: &str,
) -> Result<ClusterTopology, TopologyError> {
    validate_networks(networks)?;
    let mut topology = ClusterTopology {
        cluster: cluster.clone(),
        roles: vec![],
        installed_hosts: Default::default(),
        pending_hosts: Default::default(),
        ha_nic_name: None,
        dvs: None,
        physnets: Default::default(),
    };
    let mut compute_hosts = vec![];
    let mut role_hosts_all = vec![];

    for role in roles.iter().filter(|r| r.deployment_backend == backend) {
        let role_hosts: Vec<&Host> = role.host_ids.iter()
            .filter_map(|id| hosts.iter().find(|h| &h.id == id))
            .collect();
        let mut addresses = vec![];
        for host in &role_hosts {
            let host_addresses = host_addresses(host, networks)?;
            if matches!(host.software.status, SoftwareStatus::Active | SoftwareStatus::Updating | SoftwareStatus::UpdateFailed) {
                topology.installed_hosts.insert(host_addresses.management.ip.clone());
            } else {
                topology.pending_hosts.insert(host_addresses.management.ip.clone());
            }
            addresses.push(host_addresses);
        }
        if role.name == "CONTROLLER_HA" && topology.ha_nic_name.is_none() {
            topology.ha_nic_name = addresses.first().map(|a| a.management.nic.clone());
        }
        if role.name == "COMPUTER" {
            compute_hosts.extend(role_hosts.iter().copied());
        }
        role_hosts_all.extend(role_hosts.iter().copied());
        if addresses.is_empty() {
            continue;
        }
        if role.public_vip.is_some() && addresses[0].public.is_none() {
            return Err(TopologyError::MissingNetwork {
                host: addresses[0].name.clone(),
                network: NetworkType::PublicApi.to_string(),
            });
        }
        let floating = match role.kind() {
            RoleKind::Ha => Some(FloatingIps::for_ha_role(role)?),
            _ => None,
        };
        topology.roles.push(RoleTopology {
            role: role.clone(),
            hosts: addresses,
            floating,
        });
    }
    topology.dvs = plan_dvs(&compute_hosts, networks)?;
    topology.physnets = plan_physnets(&role_hosts_all, networks)?;
    Ok(topology)
}

#[cfg(test)]
mod tests {
    use bmprov_schemas::inventory::IpRange;
    use crate::test_support::{network, sample_inventory};
    use super::*;

    #[test]
    fn test_validate_networks() {
        let mut networks = vec![
            network("MANAGEMENT", NetworkType::Management, "10.0.0.0/24"),
            network("STORAGE1", NetworkType::Storage, "10.1.0.0/24"),
            network("STORAGE2", NetworkType::Storage, "10.2.0.0/24"),
            network("PXE", NetworkType::System, "192.168.1.0/24"),
        ];
        assert!(validate_networks(&networks).is_ok());
        networks.push(network("PXE2", NetworkType::System, "192.168.2.0/24"));
        assert_eq!(validate_networks(&networks), Err(TopologyError::DuplicateNetwork(NetworkType::System)));
    }

    #[test]
    fn test_resolve_network_plan() {
        let inventory = sample_inventory(3);
        let plan = resolve_network_plan(&inventory.hosts, &inventory.networks).unwrap();
        assert_eq!(plan.hosts.len(), 3);
        let host = &plan.hosts["host-2"];
        assert_eq!(host.dhcp_mac, "52:54:00:00:00:02");
        assert_eq!(host.addresses.management.ip, "10.0.0.12");
        assert_eq!(host.addresses.management.netmask, "255.255.255.0");
    }

    #[test]
    fn test_resolve_cluster() {
        let mut inventory = sample_inventory(4);
        inventory.hosts[0].software.status = SoftwareStatus::Active;
        let topology = resolve_cluster(&inventory.cluster, &inventory.roles, &inventory.networks, &inventory.hosts, "tecs").unwrap();
        let ha = topology.ha_role().unwrap();
        assert_eq!(ha.management_ips(), vec!["10.0.0.11".to_string(), "10.0.0.12".to_string()]);
        assert_eq!(ha.floating.as_ref().unwrap().db_vip, "10.0.0.100");
        assert_eq!(topology.ha_nic_name.as_deref(), Some("eth0"));
        assert!(topology.installed_hosts.contains("10.0.0.11"));
        assert!(topology.pending_hosts.contains("10.0.0.14"));
        assert!(topology.dvs.is_none());
    }

    #[test]
    fn test_public_vip_needs_public_network() {
        let mut inventory = sample_inventory(2);
        inventory.roles[0].public_vip = Some("172.16.0.10".into());
        let err = resolve_cluster(&inventory.cluster, &inventory.roles, &inventory.networks, &inventory.hosts, "tecs").unwrap_err();
        assert!(matches!(err, TopologyError::MissingNetwork { .. }));
        // other backends are not resolved at all
        let mut other = inventory.clone();
        other.networks.push(Network { ip_ranges: vec![IpRange { start: None, end: None }], ..network("PUBLIC", NetworkType::PublicApi, "172.16.0.0/24") });
        assert!(resolve_cluster(&other.cluster, &other.roles, &other.networks, &other.hosts, "kolla").unwrap().roles.is_empty());
    }
}
