use std::net::Ipv4Addr;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use bmprov_schemas::inventory::{Network, NetworkType};
use crate::topology::netmask::Ipv4Cidr;
use crate::topology::TopologyError;

/// Parameters of the dhcp/tftp server the hosts boot from, serialized as the `pxe.json` the
/// server builder reads.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PxeServerPlan {
    pub build_pxe: String,
    pub ethname_l: String,
    pub ip_addr_l: String,
    pub net_mask_l: String,
    pub client_ip_begin: String,
    pub client_ip_end: String,
}

/// Plan the pxe server from the system network. The server takes the network's configured
/// address, or the first host address, and hands out the rest of the range when no explicit
/// client range is given.
pub fn plan_pxe_server(networks: &[Network], interface: &str) -> Result<PxeServerPlan, TopologyError> {
    let network = networks.iter()
        .find(|n| n.network_type == NetworkType::System)
        .ok_or_else(|| TopologyError::PxeServer("no system network defined".to_string()))?;
    let cidr_text = network.cidr.as_deref().unwrap_or_default();
    if cidr_text.trim().is_empty() {
        return Err(TopologyError::PxeServer("The CIDR is blank of pxe server!".to_string()));
    }
    let cidr = Ipv4Cidr::from_str(cidr_text)?;

    let server_ip = match network.ip.as_deref().filter(|ip| !ip.is_empty()) {
        Some(ip) => {
            let parsed = Ipv4Addr::from_str(ip)
                .map_err(|_| TopologyError::PxeServer(format!("invalid server ip '{ip}'")))?;
            if !cidr.contains(parsed) {
                return Err(TopologyError::PxeServer(format!("The ip '{ip}' is not in cidr '{cidr_text}' range.")));
            }
            parsed
        }
        None => cidr.nth(1),
    };

    let explicit = network.ip_ranges.iter()
        .find(|r| r.start.is_some() || r.end.is_some());
    let (begin, end) = match explicit {
        Some(range) => (
            range.start.clone().unwrap_or_default(),
            range.end.clone().unwrap_or_default(),
        ),
        None => (cidr.nth(2).to_string(), cidr.broadcast().to_string()),
    };

    if interface.trim().is_empty() {
        return Err(TopologyError::PxeServer("The nic name is blank of build pxe server!".to_string()));
    }
    Ok(PxeServerPlan {
        build_pxe: "yes".to_string(),
        ethname_l: interface.to_string(),
        ip_addr_l: server_ip.to_string(),
        net_mask_l: cidr.netmask().to_string(),
        client_ip_begin: begin,
        client_ip_end: end,
    })
}

#[cfg(test)]
mod tests {
    use bmprov_schemas::inventory::IpRange;
    use crate::test_support::{network, sample_inventory};
    use super::*;

    #[test]
    fn test_plan_pxe_server() {
        let inventory = sample_inventory(1);
        let plan = plan_pxe_server(&inventory.networks, "eth9").unwrap();
        assert_eq!(plan.build_pxe, "yes");
        assert_eq!(plan.ip_addr_l, "192.168.1.1");
        assert_eq!(plan.net_mask_l, "255.255.255.0");
        assert_eq!(plan.client_ip_begin, "192.168.1.2");
        assert_eq!(plan.client_ip_end, "192.168.1.255");
        assert!(plan_pxe_server(&inventory.networks, "").is_err());
    }

    #[test]
    fn test_explicit_range_and_server_ip() {
        let networks = vec![Network {
            ip: Some("10.20.0.5".into()),
            ip_ranges: vec![IpRange { start: Some("10.20.0.100".into()), end: Some("10.20.0.200".into()) }],
            ..network("DEPLOYMENT", NetworkType::System, "10.20.0.0/16")
        }];
        let plan = plan_pxe_server(&networks, "eth1").unwrap();
        assert_eq!(plan.ip_addr_l, "10.20.0.5");
        assert_eq!(plan.net_mask_l, "255.255.0.0");
        assert_eq!(plan.client_ip_begin, "10.20.0.100");
    }

    #[test]
    fn test_invalid_system_network() {
        let blank = vec![network("DEPLOYMENT", NetworkType::System, "")];
        assert_eq!(
            plan_pxe_server(&blank, "eth1").unwrap_err().to_string(),
            "pxe server: The CIDR is blank of pxe server!"
        );
        let outside = vec![Network { ip: Some("10.30.0.1".into()), ..network("DEPLOYMENT", NetworkType::System, "10.20.0.0/24") }];
        assert!(plan_pxe_server(&outside, "eth1").is_err());
        assert!(plan_pxe_server(&[], "eth1").is_err());
    }
}
