use std::collections::HashSet;
use serde::{Deserialize, Serialize};
use bmprov_schemas::inventory::{Host, Interface, InterfaceType, Network, NetworkType};
use crate::topology::bond::linux_bond_mode_code;
use crate::topology::netmask::cidr_to_netmask;
use crate::topology::TopologyError;

/// Longest port name the vswitch accepts once the vlan suffix is added
const MAX_PORT_NAME_LEN: usize = 14;

/// Network as handed to the os installer for one interface
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AssignedNetworkPlan {
    pub name: String,
    pub network_type: NetworkType,
    pub ml2_type: Option<String>,
    pub capability: Option<String>,
    pub physnet_name: Option<String>,
    pub gateway: String,
    pub ip: String,
    pub netmask: String,
    pub vlan_id: String,
}

/// Interface as handed to the os installer. Addressing lives on the assigned networks, so the
/// interface's own address fields are always blank.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct InterfacePlan {
    pub name: String,
    #[serde(rename = "type")]
    pub interface_type: InterfaceType,
    pub mac: String,
    pub pci: String,
    pub slave1: Option<String>,
    pub slave2: Option<String>,
    pub mode: Option<String>,
    pub is_deployment: bool,
    pub ip: String,
    pub netmask: String,
    pub gateway: String,
    pub assigned_networks: Vec<AssignedNetworkPlan>,
}

/// Address of a host on one network plane
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct NicAddress {
    pub nic: String,
    pub ip: String,
    pub netmask: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HostAddresses {
    pub host_id: String,
    pub name: String,
    pub management: NicAddress,
    pub deployment: Option<NicAddress>,
    pub storage: Option<NicAddress>,
    pub public: Option<NicAddress>,
    pub heartbeat1: Option<NicAddress>,
    pub heartbeat2: Option<NicAddress>,
}

/// Mac of the single interface marked for dhcp
pub fn pxe_mac(host: &Host) -> Result<String, TopologyError> {
    let pxe: Vec<&Interface> = host.interfaces.iter().filter(|i| i.is_deployment).collect();
    match pxe.as_slice() {
        [] => Err(TopologyError::MissingPxeInterface(host.name.clone())),
        [interface] => interface.mac.clone()
            .ok_or_else(|| TopologyError::MissingPxeInterface(host.name.clone())),
        _ => Err(TopologyError::MultiplePxeInterfaces(host.name.clone())),
    }
}

/// Keep the tail of a port name so that `<name>.<vlan>` still fits the vswitch limit
pub fn fit_port_name(name: &str, max_vlan_id_len: usize) -> String {
    let len = name.chars().count();
    let redundant = (len + max_vlan_id_len).saturating_sub(MAX_PORT_NAME_LEN);
    name.chars().skip(redundant).collect()
}

fn find_network<'a>(networks: &'a [Network], host: &Host, name: &str) -> Result<&'a Network, TopologyError> {
    networks.iter()
        .find(|n| n.name == name)
        .ok_or_else(|| TopologyError::UnknownNetwork {
            host: host.name.clone(),
            network: name.to_string(),
        })
}

fn netmask_of(network: &Network) -> Result<String, TopologyError> {
    match network.cidr.as_deref() {
        Some(cidr) if !cidr.trim().is_empty() => cidr_to_netmask(cidr),
        _ => Ok(String::new()),
    }
}

/// One network per address on an interface. A management network takes the place of an
/// earlier network with its address, networks without an address are all kept.
fn dedup_by_ip(assigned: Vec<AssignedNetworkPlan>) -> Vec<AssignedNetworkPlan> {
    let mut kept: Vec<AssignedNetworkPlan> = vec![];
    for plan in assigned {
        let same_ip = kept.iter().position(|k| !plan.ip.is_empty() && k.ip == plan.ip);
        match same_ip {
            None => kept.push(plan),
            Some(index) if plan.network_type == NetworkType::Management => kept[index] = plan,
            Some(_) => {}
        }
    }
    kept
}

/// Interfaces of a host in the form the os installer consumes. Bond slaves are left out, port
/// names are shortened to leave room for the vlan suffix and linux bond mode names are turned
/// into their numeric codes.
pub fn plan_interfaces(host: &Host, networks: &[Network]) -> Result<Vec<InterfacePlan>, TopologyError> {
    let slaves: HashSet<&str> = host.interfaces.iter()
        .filter(|i| i.interface_type == InterfaceType::Bond)
        .flat_map(|i| [i.slave1.as_deref(), i.slave2.as_deref()])
        .flatten()
        .collect();

    let mut plans = vec![];
    for interface in &host.interfaces {
        let mut assigned = vec![];
        for (index, assigned_network) in interface.assigned_networks.iter().enumerate() {
            let network = find_network(networks, host, &assigned_network.name)?;
            // aliased planes share a port, only the first one is configured
            if network.alias.is_some() && index > 0 {
                continue;
            }
            assigned.push(AssignedNetworkPlan {
                name: network.name.clone(),
                network_type: network.network_type,
                ml2_type: network.ml2_type.clone(),
                capability: network.capability.clone(),
                physnet_name: network.physnet_name.clone(),
                gateway: network.gateway.clone().unwrap_or_default(),
                // data planes are addressed by the vswitch, not the os
                ip: match network.network_type {
                    NetworkType::DataPlane => String::new(),
                    _ => assigned_network.ip.clone().unwrap_or_default(),
                },
                netmask: netmask_of(network)?,
                vlan_id: network.vlan_id.clone().unwrap_or_default(),
            });
        }
        let mode = match (interface.interface_type, interface.mode.as_deref()) {
            (InterfaceType::Bond, Some(mode)) => Some(
                linux_bond_mode_code(mode).map(|c| c.to_string()).unwrap_or_else(|| mode.to_string())
            ),
            (_, mode) => mode.map(|m| m.to_string()),
        };
        plans.push(InterfacePlan {
            name: interface.name.clone(),
            interface_type: interface.interface_type,
            mac: interface.mac.clone().unwrap_or_default(),
            pci: interface.pci.clone().unwrap_or_default(),
            slave1: interface.slave1.clone(),
            slave2: interface.slave2.clone(),
            mode,
            is_deployment: interface.is_deployment,
            ip: String::new(),
            netmask: String::new(),
            gateway: String::new(),
            assigned_networks: dedup_by_ip(assigned),
        });
    }

    for plan in plans.iter_mut() {
        if slaves.contains(plan.name.as_str()) {
            continue;
        }
        let max_vlan_id_len = plan.assigned_networks.iter()
            .map(|a| a.vlan_id.len())
            .max()
            .unwrap_or(0);
        plan.name = fit_port_name(&plan.name, max_vlan_id_len);
    }
    Ok(plans)
}

fn address_on(host: &Host, network: &Network) -> Result<Option<NicAddress>, TopologyError> {
    let Some(interface) = host.interface_for_network(&network.name) else {
        return Ok(None);
    };
    let ip = interface.assigned(&network.name)
        .and_then(|a| a.ip.clone())
        .or_else(|| interface.ip.clone())
        .unwrap_or_default();
    Ok(Some(NicAddress {
        nic: interface.name.clone(),
        ip,
        netmask: netmask_of(network)?,
    }))
}

fn address_by_type(
    host: &Host,
    networks: &[Network],
    network_type: NetworkType,
) -> Result<Option<NicAddress>, TopologyError> {
    for network in networks.iter().filter(|n| n.network_type == network_type) {
        if let Some(address) = address_on(host, network)? {
            return Ok(Some(address));
        }
    }
    Ok(None)
}

/// Addresses of a host on the planes the software config refers to. A management address is
/// required, the other planes are optional.
pub fn host_addresses(host: &Host, networks: &[Network]) -> Result<HostAddresses, TopologyError> {
    let management = address_by_type(host, networks, NetworkType::Management)?
        .ok_or_else(|| TopologyError::MissingNetwork {
            host: host.name.clone(),
            network: NetworkType::Management.to_string(),
        })?;
    let public = match address_by_type(host, networks, NetworkType::PublicApi)? {
        Some(mut address) => {
            let vlan = networks.iter()
                .find(|n| n.network_type == NetworkType::PublicApi && host.interface_for_network(&n.name).is_some())
                .and_then(|n| n.vlan_id.clone());
            if let Some(vlan) = vlan {
                address.nic = format!("{}.{}", address.nic, vlan);
            }
            Some(address)
        }
        None => None,
    };
    let mut heartbeat_networks: Vec<&Network> = networks.iter()
        .filter(|n| n.network_type == NetworkType::Heartbeat)
        .collect();
    heartbeat_networks.sort_by(|a, b| a.name.cmp(&b.name));
    let mut heartbeats = vec![];
    for network in heartbeat_networks {
        if let Some(address) = address_on(host, network)? {
            heartbeats.push(address);
        }
    }
    let mut heartbeats = heartbeats.into_iter();

    Ok(HostAddresses {
        host_id: host.id.clone(),
        name: host.name.clone(),
        management,
        deployment: address_by_type(host, networks, NetworkType::System)?,
        storage: address_by_type(host, networks, NetworkType::Storage)?,
        public,
        heartbeat1: heartbeats.next(),
        heartbeat2: heartbeats.next(),
    })
}
