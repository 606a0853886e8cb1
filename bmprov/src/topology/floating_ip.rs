use bmprov_schemas::inventory::Role;
use crate::topology::RoleTopology;
use crate::topology::TopologyError;

/// Floating addresses of an HA role. Every address that is not configured explicitly falls back
/// to the role vip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloatingIps {
    pub vip: String,
    pub db_vip: String,
    pub glance_vip: String,
    pub public_vip: String,
    pub ntp_server: String,
}

impl FloatingIps {
    pub fn for_ha_role(role: &Role) -> Result<Self, TopologyError> {
        let vip = role.vip.clone()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| TopologyError::MissingFloatingIp {
                role: role.name.clone(),
                kind: "vip".to_string(),
            })?;
        let or_vip = |value: &Option<String>| value.clone()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| vip.clone());
        Ok(Self {
            db_vip: or_vip(&role.db_vip),
            glance_vip: or_vip(&role.glance_vip),
            public_vip: or_vip(&role.public_vip),
            ntp_server: or_vip(&role.ntp_server),
            vip,
        })
    }
}

/// How the load balancer splits the controller hosts
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LbSplit {
    /// HA hosts running the `lb` service, they carry the frontend
    pub frontend: Vec<String>,
    /// hosts of the LB role the requests are balanced to
    pub backend: Vec<String>,
}

pub fn lb_split(ha: Option<&RoleTopology>, lb: &RoleTopology) -> LbSplit {
    let frontend = match ha {
        Some(ha) if ha.role.services.contains_key("lb") => ha.management_ips(),
        _ => vec![],
    };
    LbSplit {
        frontend,
        backend: lb.management_ips(),
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::sample_inventory;
    use crate::topology::resolve_cluster;
    use super::*;

    #[test]
    fn test_defaults_to_vip() {
        let mut role = Role { name: "CONTROLLER_HA".into(), vip: Some("10.0.0.100".into()), ..Default::default() };
        role.glance_vip = Some("10.0.0.101".into());
        role.public_vip = Some("".into());
        let ips = FloatingIps::for_ha_role(&role).unwrap();
        assert_eq!(ips.db_vip, "10.0.0.100");
        assert_eq!(ips.glance_vip, "10.0.0.101");
        assert_eq!(ips.public_vip, "10.0.0.100");
        assert_eq!(ips.ntp_server, "10.0.0.100");

        role.vip = None;
        assert_eq!(
            FloatingIps::for_ha_role(&role).unwrap_err().to_string(),
            "role CONTROLLER_HA has no vip configured"
        );
    }

    #[test]
    fn test_lb_split() {
        let mut inventory = sample_inventory(4);
        inventory.roles[1].name = "CONTROLLER_LB".into();
        inventory.roles[1].vip = Some("10.0.0.200".into());
        inventory.roles[0].services.insert("lb".into(), "loadbalance".into());
        let topology = resolve_cluster(&inventory.cluster, &inventory.roles, &inventory.networks, &inventory.hosts, "tecs").unwrap();
        let split = lb_split(topology.ha_role(), topology.lb_role().unwrap());
        assert_eq!(split.frontend, vec!["10.0.0.11", "10.0.0.12"]);
        assert_eq!(split.backend, vec!["10.0.0.13", "10.0.0.14"]);
    }
}
