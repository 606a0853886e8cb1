use std::collections::{BTreeMap, BTreeSet};
use bmprov_schemas::inventory::{Host, Interface, InterfaceType, Network, NetworkType, VswitchType};
use crate::topology::bond::resolve_bond_mode;
use crate::topology::interfaces::host_addresses;
use crate::topology::{Segmentation, TopologyError};

/// Vswitch layout of the compute hosts carrying tenant traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DvsPlan {
    pub segmentation: Segmentation,
    /// management ips of hosts switching with dvs
    pub dvs_hosts: Vec<String>,
    /// management ips of hosts switching with ovs
    pub ovs_hosts: Vec<String>,
    pub vtep_ip_ranges: Vec<(String, String)>,
    /// dvs domain id to the hosts in that domain
    pub domain_ids: BTreeMap<String, Vec<String>>,
    pub vxlan_info: Option<String>,
    pub bridge_mappings: BTreeSet<String>,
    pub physical_mappings: BTreeSet<String>,
    pub physical_nics: BTreeSet<String>,
}

/// Python style list literal, the software installer reads these back with `eval`
pub fn py_list<S: AsRef<str>>(items: &[S]) -> String {
    let quoted: Vec<String> = items.iter().map(|i| format!("'{}'", i.as_ref())).collect();
    format!("[{}]", quoted.join(", "))
}

fn segmentation_network_type(segmentation: Segmentation) -> NetworkType {
    match segmentation {
        Segmentation::Vxlan => NetworkType::Vxlan,
        Segmentation::Vlan => NetworkType::Private,
    }
}

fn segment_interfaces<'a>(host: &'a Host, networks: &'a [Network], network_type: NetworkType) -> Vec<(&'a Interface, &'a Network)> {
    host.interfaces.iter()
        .filter_map(|interface| {
            networks.iter()
                .filter(|n| n.network_type == network_type)
                .find(|n| interface.has_network(&n.name))
                .map(|n| (interface, n))
        })
        .collect()
}

fn bond_slaves(interface: &Interface) -> Vec<String> {
    [&interface.slave1, &interface.slave2].into_iter()
        .flatten()
        .cloned()
        .collect()
}

/// Describe an interface to the vswitch, a bond is validated against the segmentation first
fn describe_interface(
    interface: &Interface,
    segmentation: Segmentation,
    vswitch: VswitchType,
) -> Result<String, TopologyError> {
    if interface.interface_type == InterfaceType::Ether {
        return Ok(interface.name.clone());
    }
    let mode = resolve_bond_mode(segmentation, vswitch, interface.mode.as_deref().unwrap_or("0"))?;
    Ok(mode.describe(
        segmentation,
        &interface.name,
        interface.slave1.as_deref().unwrap_or_default(),
        interface.slave2.as_deref().unwrap_or_default(),
    ))
}

/// Work out the vswitch layout of the compute hosts. Vxlan wins when any host carries a vxlan
/// plane, no plan is made when no host carries tenant traffic at all.
pub fn plan_dvs(compute_hosts: &[&Host], networks: &[Network]) -> Result<Option<DvsPlan>, TopologyError> {
    let carries = |network_type: NetworkType| compute_hosts.iter()
        .any(|h| !segment_interfaces(h, networks, network_type).is_empty());
    let segmentation = if carries(NetworkType::Vxlan) {
        Segmentation::Vxlan
    } else if carries(NetworkType::Private) {
        Segmentation::Vlan
    } else {
        return Ok(None);
    };
    let network_type = segmentation_network_type(segmentation);

    let mut plan = DvsPlan {
        segmentation,
        dvs_hosts: vec![],
        ovs_hosts: vec![],
        vtep_ip_ranges: vec![],
        domain_ids: BTreeMap::new(),
        vxlan_info: None,
        bridge_mappings: BTreeSet::new(),
        physical_mappings: BTreeSet::new(),
        physical_nics: BTreeSet::new(),
    };

    for host in compute_hosts {
        let interfaces = segment_interfaces(host, networks, network_type);
        let Some((first, first_network)) = interfaces.first() else {
            continue;
        };
        let management_ip = host_addresses(host, networks)?.management.ip;
        let assigned = first.assigned(&first_network.name);
        let vswitch = assigned.and_then(|a| a.vswitch_type).unwrap_or(VswitchType::Ovs);
        match vswitch {
            VswitchType::Dvs => plan.dvs_hosts.push(management_ip.clone()),
            VswitchType::Ovs => plan.ovs_hosts.push(management_ip.clone()),
        }

        match segmentation {
            Segmentation::Vxlan => {
                let domain = assigned.and_then(|a| a.dvs_domain_id.clone()).unwrap_or_else(|| "0".to_string());
                plan.domain_ids.entry(domain).or_default().push(management_ip);
                let described = describe_interface(first, segmentation, vswitch)?;
                if plan.vxlan_info.is_none() {
                    plan.vxlan_info = Some(described);
                }
                match first.interface_type {
                    InterfaceType::Bond => plan.physical_nics.extend(bond_slaves(first)),
                    InterfaceType::Ether => { plan.physical_nics.insert(first.name.clone()); }
                }
            }
            Segmentation::Vlan => {
                for (interface, network) in &interfaces {
                    let bridge_nic = network.physnet_name.as_deref()
                        .and_then(|p| p.split_once('_'))
                        .map(|(_, nic)| nic.to_string())
                        .unwrap_or_else(|| interface.name.clone());
                    plan.bridge_mappings.insert(format!("{}:br_{}", network.name, bridge_nic));
                    let described = describe_interface(interface, segmentation, vswitch)?;
                    plan.physical_mappings.insert(format!("{}:{}", network.name, described));
                    match interface.interface_type {
                        InterfaceType::Bond => plan.physical_nics.extend(bond_slaves(interface)),
                        InterfaceType::Ether => { plan.physical_nics.insert(interface.name.clone()); }
                    }
                }
            }
        }
    }

    if segmentation == Segmentation::Vxlan {
        for network in networks.iter().filter(|n| n.network_type == NetworkType::Vxlan) {
            for range in &network.ip_ranges {
                if let (Some(start), Some(end)) = (&range.start, &range.end) {
                    plan.vtep_ip_ranges.push((start.clone(), end.clone()));
                }
            }
        }
    }
    Ok(Some(plan))
}

impl DvsPlan {
    /// Software config entries for the vswitch. Nothing is set for plain ovs clusters that do not
    /// enable sdn.
    pub fn config_entries(&self, enable_sdn: bool) -> BTreeMap<String, String> {
        let mut entries = BTreeMap::new();
        if !enable_sdn && !self.ovs_hosts.is_empty() {
            return entries;
        }
        if self.dvs_hosts.is_empty() && self.ovs_hosts.is_empty() {
            return entries;
        }
        entries.insert(
            "CONFIG_DVS_TYPE".to_string(),
            format!("{{'ovdk': {}, 'ovs_agent_patch': {}}}", py_list(&self.dvs_hosts), py_list(&self.ovs_hosts)),
        );
        let nics: Vec<&str> = self.physical_nics.iter().map(|s| s.as_str()).collect();
        entries.insert("CONFIG_DVS_PHYSICAL_NICS".to_string(), nics.join(","));
        match self.segmentation {
            Segmentation::Vlan => {
                let bridges: Vec<&str> = self.bridge_mappings.iter().map(|s| s.as_str()).collect();
                let ifaces: Vec<&str> = self.physical_mappings.iter().map(|s| s.as_str()).collect();
                entries.insert("CONFIG_NEUTRON_OVS_BRIDGE_MAPPINGS".to_string(), bridges.join(","));
                entries.insert("CONFIG_NEUTRON_OVS_PHYSNET_IFACES".to_string(), ifaces.join(","));
            }
            Segmentation::Vxlan => {
                entries.insert("CONFIG_DVS_VXLAN_INFO".to_string(), self.vxlan_info.clone().unwrap_or_default());
                let domains: Vec<String> = self.domain_ids.iter()
                    .map(|(domain, hosts)| format!("'{}': {}", domain, py_list(hosts)))
                    .collect();
                entries.insert("CONFIG_DVS_NODE_DOMAIN_ID".to_string(), format!("{{{}}}", domains.join(", ")));
                let ranges: Vec<String> = self.vtep_ip_ranges.iter()
                    .map(|(start, end)| py_list(&[start, end]))
                    .collect();
                entries.insert("CONFIG_NEUTRON_ML2_VTEP_IP_RANGES".to_string(), format!("[{}]", ranges.join(", ")));
            }
        }
        entries
    }
}
