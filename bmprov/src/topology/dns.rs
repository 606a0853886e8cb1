use std::collections::BTreeMap;
use bmprov_schemas::inventory::RoleKind;
use crate::topology::ClusterTopology;

/// Address to name table used when the cluster resolves its hosts through dns. Host management
/// addresses map to the host name and floating ips to fixed `*-vip` names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsTable {
    names: BTreeMap<String, String>,
}

impl DnsTable {
    pub fn from_topology(topology: &ClusterTopology) -> Self {
        let mut names = BTreeMap::new();
        for role in &topology.roles {
            for host in &role.hosts {
                names.insert(host.management.ip.clone(), host.name.clone());
            }
        }
        for role in &topology.roles {
            if let Some(floating) = &role.floating {
                // order matters when several floating ips share an address, the plain vip wins
                names.insert(floating.public_vip.clone(), "public-vip".to_string());
                names.insert(floating.glance_vip.clone(), "glance-vip".to_string());
                names.insert(floating.db_vip.clone(), "db-vip".to_string());
                names.insert(floating.vip.clone(), "ha-vip".to_string());
            }
            if role.kind() == RoleKind::Lb {
                if let Some(vip) = &role.role.vip {
                    names.insert(vip.clone(), "lb-vip".to_string());
                }
            }
        }
        Self { names }
    }

    pub fn name_of(&self, ip: &str) -> Option<&str> {
        self.names.get(ip).map(|s| s.as_str())
    }

    /// `(name, address)` pairs for the hosts file of the installed nodes
    pub fn entries(&self) -> Vec<(String, String)> {
        self.names.iter().map(|(ip, name)| (name.clone(), ip.clone())).collect()
    }

    /// Replace every address in `value` that has a name. Addresses are matched as whole tokens so
    /// `10.0.0.1` is not replaced inside `10.0.0.11`.
    pub fn substitute(&self, value: &str) -> String {
        let mut out = String::with_capacity(value.len());
        let mut token = String::new();
        let is_addr_char = |c: char| c.is_ascii_digit() || c == '.';
        for c in value.chars() {
            if is_addr_char(c) {
                token.push(c);
                continue;
            }
            self.flush(&mut token, &mut out);
            out.push(c);
        }
        self.flush(&mut token, &mut out);
        out
    }

    fn flush(&self, token: &mut String, out: &mut String) {
        if token.is_empty() {
            return;
        }
        match self.names.get(token.as_str()) {
            Some(name) => out.push_str(name),
            None => out.push_str(token),
        }
        token.clear();
    }
}
