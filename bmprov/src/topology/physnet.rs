use std::collections::{BTreeMap, BTreeSet};
use bmprov_schemas::inventory::{Host, InterfaceType, Network, NetworkType, VswitchType};
use crate::topology::bond::resolve_bond_mode;
use crate::topology::{Segmentation, TopologyError};

/// Tenant physical networks of the cluster: vlan ranges of the private planes and the bridge and
/// interface mappings of the sriov and ovs data planes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhysnetPlan {
    /// `name:start:end`
    pub vlan_ranges: Vec<String>,
    pub sriov_bridge_mappings: BTreeSet<String>,
    pub sriov_physnet_ifaces: BTreeSet<String>,
    pub ovs_bridge_mappings: BTreeSet<String>,
    pub ovs_physnet_ifaces: BTreeSet<String>,
}

pub fn plan_physnets(hosts: &[&Host], networks: &[Network]) -> Result<PhysnetPlan, TopologyError> {
    let mut plan = PhysnetPlan::default();
    let assigned_anywhere = |name: &str| hosts.iter().any(|h| h.interface_for_network(name).is_some());

    for network in networks.iter().filter(|n| n.network_type == NetworkType::Private) {
        if let (Some(start), Some(end)) = (network.vlan_start, network.vlan_end) {
            let range = format!("{}:{}:{}", network.name, start, end);
            if assigned_anywhere(&network.name) && !plan.vlan_ranges.contains(&range) {
                plan.vlan_ranges.push(range);
            }
        }
    }

    for network in networks.iter().filter(|n| n.network_type == NetworkType::DataPlane) {
        let Some(physnet) = network.physnet_name.as_deref() else {
            continue;
        };
        let (bridges, ifaces) = match network.ml2_type.as_deref() {
            Some("sriov") => (&mut plan.sriov_bridge_mappings, &mut plan.sriov_physnet_ifaces),
            Some("ovs") => (&mut plan.ovs_bridge_mappings, &mut plan.ovs_physnet_ifaces),
            _ => continue,
        };
        for host in hosts {
            for interface in host.interfaces.iter().filter(|i| i.has_network(&network.name)) {
                bridges.insert(format!("{}:br-{}", physnet, interface.name));
                let iface = match interface.interface_type {
                    InterfaceType::Ether => interface.name.clone(),
                    InterfaceType::Bond => {
                        let mode = resolve_bond_mode(Segmentation::Vlan, VswitchType::Ovs, interface.mode.as_deref().unwrap_or("0"))?;
                        mode.describe(
                            Segmentation::Vlan,
                            &interface.name,
                            interface.slave1.as_deref().unwrap_or_default(),
                            interface.slave2.as_deref().unwrap_or_default(),
                        )
                    }
                };
                ifaces.insert(format!("{}:{}", physnet, iface));
            }
        }
    }
    Ok(plan)
}

impl PhysnetPlan {
    pub fn config_entries(&self) -> BTreeMap<String, String> {
        let join = |set: &BTreeSet<String>| set.iter().cloned().collect::<Vec<_>>().join(",");
        let mut entries = BTreeMap::new();
        if !self.vlan_ranges.is_empty() {
            entries.insert("CONFIG_NEUTRON_ML2_VLAN_RANGES".to_string(), self.vlan_ranges.join(","));
        }
        if !self.sriov_bridge_mappings.is_empty() {
            entries.insert("CONFIG_NEUTRON_SRIOV_BRIDGE_MAPPINGS".to_string(), join(&self.sriov_bridge_mappings));
            entries.insert("CONFIG_NEUTRON_SRIOV_PHYSNET_IFACES".to_string(), join(&self.sriov_physnet_ifaces));
        }
        if !self.ovs_bridge_mappings.is_empty() {
            entries.insert("CONFIG_NEUTRON_OVS_BRIDGE_MAPPINGS".to_string(), join(&self.ovs_bridge_mappings));
            entries.insert("CONFIG_NEUTRON_OVS_PHYSNET_IFACES".to_string(), join(&self.ovs_physnet_ifaces));
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use bmprov_schemas::inventory::{AssignedNetwork, Interface};
    use crate::test_support::{network, sample_inventory};
    use super::*;

    #[test]
    fn test_vlan_ranges_and_sriov() {
        let inventory = sample_inventory(3);
        let mut networks = inventory.networks.clone();
        networks.push(Network { vlan_start: Some(100), vlan_end: Some(200), ..network("physnet1", NetworkType::Private, "") });
        networks.push(Network { vlan_start: Some(300), vlan_end: Some(400), ..network("physnet2", NetworkType::Private, "") });
        networks.push(Network {
            physnet_name: Some("sriovnet".into()),
            ml2_type: Some("sriov".into()),
            ..network("DATA1", NetworkType::DataPlane, "")
        });
        let mut hosts = inventory.hosts.clone();
        for host in hosts.iter_mut() {
            host.interfaces.push(Interface {
                name: "eth5".into(),
                assigned_networks: vec![
                    AssignedNetwork { name: "physnet1".into(), ..Default::default() },
                    AssignedNetwork { name: "DATA1".into(), ..Default::default() },
                ],
                ..Default::default()
            });
        }
        let refs: Vec<&Host> = hosts.iter().collect();
        let plan = plan_physnets(&refs, &networks).unwrap();
        // physnet2 is not carried by any host
        assert_eq!(plan.vlan_ranges, vec!["physnet1:100:200"]);
        let entries = plan.config_entries();
        assert_eq!(entries["CONFIG_NEUTRON_SRIOV_BRIDGE_MAPPINGS"], "sriovnet:br-eth5");
        assert_eq!(entries["CONFIG_NEUTRON_SRIOV_PHYSNET_IFACES"], "sriovnet:eth5");
        assert!(!entries.contains_key("CONFIG_NEUTRON_OVS_BRIDGE_MAPPINGS"));
    }
}
