use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use anyhow::Context;
use lazy_static::lazy_static;
use serde::Serialize;
use tera::Tera;
use bmprov_schemas::inventory::RoleKind;
use crate::topology::dns::DnsTable;
use crate::topology::floating_ip::{lb_split, FloatingIps};
use crate::topology::heartbeat::heartbeat_links;
use crate::topology::netmask::netmask_prefix_len;
use crate::topology::{ClusterTopology, RoleTopology, TopologyError};

pub const SOFTWARE_CONF_FILE: &str = "tecs.conf";
pub const HA_CONF_FILE: &str = "HA_1.conf";

lazy_static! {
    pub static ref TEMPLATES: Tera = {
        let mut tera = Tera::default();
        if let Err(e) = tera.add_raw_templates(vec![
            ("software_conf", include_str!("templates/tecs.conf")),
            ("ha_conf", include_str!("templates/HA.conf")),
        ]) {
            tracing::error!("Parsing error(s): {}", e);
            ::std::process::exit(1);
        }
        tera
    };
}

/// Daemons each service runs as, the HA cluster manager watches these
const SERVICE_DAEMONS: &[(&str, &str)] = &[
    ("lb", "haproxy"),
    ("mongodb", "mongod"),
    ("ha", ""),
    ("mariadb", "mariadb"),
    ("amqp", "rabbitmq-server"),
    ("ceilometer-api", "openstack-ceilometer-api"),
    ("ceilometer-collector", "openstack-ceilometer-collector,openstack-ceilometer-mend"),
    ("ceilometer-central", "openstack-ceilometer-central"),
    ("ceilometer-notification", "openstack-ceilometer-notification"),
    ("ceilometer-alarm", "openstack-ceilometer-alarm-evaluator,openstack-ceilometer-alarm-notifier"),
    ("heat-api", "openstack-heat-api"),
    ("heat-api-cfn", "openstack-heat-api-cfn"),
    ("heat-engine", "openstack-heat-engine"),
    ("ironic", "openstack-ironic-api,openstack-ironic-conductor"),
    ("horizon", "httpd,opencos-alarmmanager"),
    ("keystone", "openstack-keystone"),
    ("glance", "openstack-glance-api,openstack-glance-registry"),
    ("cinder-volume", "openstack-cinder-volume"),
    ("cinder-scheduler", "openstack-cinder-scheduler"),
    ("cinder-api", "openstack-cinder-api"),
    ("neutron-metadata", "neutron-metadata-agent"),
    ("neutron-lbaas", "neutron-lbaas-agent"),
    ("neutron-dhcp", "neutron-dhcp-agent"),
    ("neutron-server", "neutron-server"),
    ("neutron-l3", "neutron-l3-agent"),
    ("compute", "openstack-nova-compute"),
    ("nova-cert", "openstack-nova-cert"),
    ("nova-sched", "openstack-nova-scheduler"),
    ("nova-vncproxy", "openstack-nova-novncproxy,openstack-nova-consoleauth"),
    ("nova-conductor", "openstack-nova-conductor"),
    ("nova-api", "openstack-nova-api"),
    ("nova-cells", "openstack-nova-cells"),
    ("camellia-api", "camellia-api"),
];

/// services whose `CONFIG_<S>_HOST` is a dedicated floating ip rather than the role vip
const DEDICATED_VIP_SERVICES: [&str; 5] = ["LB", "NOVA_VNCPROXY", "MARIADB", "GLANCE", "HORIZON"];

pub fn service_daemons(service: &str) -> &str {
    SERVICE_DAEMONS.iter()
        .find(|(name, _)| *name == service)
        .map(|(_, daemons)| *daemons)
        .unwrap_or(service)
}

/// One component managed by the HA cluster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct HaComponent {
    daemons: Vec<String>,
    fip: String,
    nic: String,
    netmask: String,
}

/// Key/value sections of the cluster software configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SoftwareConfig {
    /// `[general]` of the software installer config
    pub general: BTreeMap<String, String>,
    /// `[DEFAULT]` of the HA cluster config, empty without an HA role
    pub ha: BTreeMap<String, String>,
}

#[derive(Default)]
struct Synthesis {
    services: BTreeMap<String, Vec<String>>,
    components: BTreeSet<String>,
    modes: BTreeMap<String, String>,
    ha_components: BTreeMap<String, HaComponent>,
    lb_components: BTreeSet<String>,
    heartbeats: Option<[Vec<String>; 3]>,
    share_disk_services: Vec<String>,
    floating: Option<FloatingIps>,
    lb_vip: Option<String>,
    /// `(ip, hostname)` of the first LB host
    lb_master: Option<(String, String)>,
    child_cells: BTreeMap<String, String>,
}

impl Synthesis {
    fn add(&mut self, key: &str, value: &str) {
        self.services.entry(key.to_string()).or_default().push(value.to_string());
    }

    fn add_all(&mut self, key: &str, values: &[String]) {
        self.services.entry(key.to_string()).or_default().extend(values.iter().cloned());
    }

    fn prepare_ha(&mut self, role: &RoleTopology) -> Result<(), TopologyError> {
        let floating = role.floating.clone().ok_or_else(|| TopologyError::MissingFloatingIp {
            role: role.role.name.clone(),
            kind: "vip".to_string(),
        })?;
        let ips = role.management_ips();
        self.components.insert("CONFIG_HA_INSTALL".to_string());
        if let Some(first) = ips.first() {
            self.add("CONFIG_HA_HOST", first);
        }
        self.add_all("CONFIG_HA_HOSTS", &ips);
        self.add("CONFIG_NTP_SERVERS", &floating.ntp_server);
        self.add("CONFIG_MARIADB_HOST", &floating.db_vip);
        self.add("CONFIG_GLANCE_HOST", &floating.glance_vip);
        for key in ["CONFIG_NOVA_VNCPROXY_HOST", "CONFIG_PUBLIC_IP", "CONFIG_HORIZON_HOST"] {
            self.add(key, &floating.public_vip);
        }
        self.heartbeats = Some(heartbeat_links(&role.hosts));
        self.share_disk_services.extend(role.role.share_disk_services());
        self.floating = Some(floating);
        Ok(())
    }

    fn prepare_lb(&mut self, role: &RoleTopology) {
        if let Some(first) = role.hosts.first() {
            self.lb_master = Some((first.management.ip.clone(), first.name.clone()));
        }
        self.components.insert("CONFIG_LB_INSTALL".to_string());
        self.add_all("CONFIG_LB_BACKEND_HOSTS", &role.management_ips());
        self.lb_vip = role.role.vip.clone().filter(|v| !v.is_empty());
    }

    fn prepare_services(&mut self, topology: &ClusterTopology, role: &RoleTopology) -> Result<(), TopologyError> {
        let kind = role.kind();
        let ips = role.management_ips();
        for (service, component) in &role.role.services {
            let key = service.to_uppercase().replace('-', "_");
            self.add_all(&format!("CONFIG_{key}_HOSTS"), &ips);
            if !DEDICATED_VIP_SERVICES.contains(&key.as_str()) {
                if let Some(vip) = role.role.vip.as_ref().filter(|v| !v.is_empty()) {
                    self.add(&format!("CONFIG_{key}_HOST"), vip);
                }
            }
            if kind == RoleKind::Ha && key == "LB" {
                if let Some(lb) = topology.lb_role() {
                    let split = lb_split(Some(role), lb);
                    self.add_all("CONFIG_LB_FRONTEND_HOSTS", &split.frontend);
                }
            }
            let mode = match kind {
                RoleKind::Ha => "HA",
                RoleKind::Lb => "LB",
                _ => "None",
            };
            self.modes.insert(format!("CONFIG_{key}_INSTALL_MODE"), mode.to_string());
            if kind == RoleKind::Lb {
                if key == "GLANCE" {
                    self.modes.insert("CONFIG_GLANCE_API_INSTALL_MODE".to_string(), "LB".to_string());
                    self.modes.insert("CONFIG_GLANCE_REGISTRY_INSTALL_MODE".to_string(), "LB".to_string());
                }
                if key == "IRONIC" {
                    self.modes.insert("CONFIG_IRONIC_API_INSTALL_MODE".to_string(), "LB".to_string());
                }
                self.lb_components.insert(component.clone());
            }
            self.components.insert(format!("CONFIG_{}_INSTALL", component.to_uppercase().replace('-', "_")));
            if kind == RoleKind::Ha && component != "log" {
                self.add_ha_component(topology, role, service, component)?;
            }
        }
        Ok(())
    }

    fn add_ha_component(
        &mut self,
        topology: &ClusterTopology,
        role: &RoleTopology,
        service: &str,
        component: &str,
    ) -> Result<(), TopologyError> {
        let Some(floating) = role.floating.as_ref() else {
            return Ok(());
        };
        let Some(first) = role.hosts.first() else {
            return Ok(());
        };
        let mut fip = match component {
            "horizon" => floating.public_vip.clone(),
            "database" => floating.db_vip.clone(),
            "glance" => floating.glance_vip.clone(),
            _ => floating.vip.clone(),
        };
        if component == "loadbalance" {
            if let Some(lb_vip) = topology.lb_role().and_then(|lb| lb.role.vip.clone()).filter(|v| !v.is_empty()) {
                fip = lb_vip;
            }
        }
        let address = match (component, &first.public) {
            ("horizon", Some(public)) => public,
            _ => &first.management,
        };
        let netmask = netmask_prefix_len(&address.netmask)?.to_string();
        let entry = self.ha_components.entry(component.to_string()).or_default();
        let daemons = service_daemons(service);
        if !daemons.is_empty() {
            entry.daemons.push(daemons.to_string());
        }
        entry.fip = fip;
        entry.nic = address.nic.clone();
        entry.netmask = netmask;
        Ok(())
    }

    fn prepare_amqp_mariadb(&mut self) {
        let (ha_vip, db_vip, glance_vip, public_vip) = match &self.floating {
            Some(f) => (f.vip.clone(), f.db_vip.clone(), f.glance_vip.clone(), f.public_vip.clone()),
            None => Default::default(),
        };
        let dicts = if let Some(lb_vip) = self.lb_vip.clone() {
            let amqp_vip = if self.modes.get("CONFIG_AMQP_INSTALL_MODE").map(|m| m.as_str()) == Some("LB") {
                if let Some((ip, hostname)) = self.lb_master.clone() {
                    self.add("CONFIG_AMQP_CLUSTER_MASTER_NODE_IP", &ip);
                    self.add("CONFIG_AMQP_CLUSTER_MASTER_NODE_HOSTNAME", &hostname);
                }
                lb_vip.clone()
            } else {
                ha_vip.clone()
            };
            self.add("CONFIG_LB_HOST", &lb_vip);
            let rest = format!("{ha_vip},{lb_vip},{glance_vip},{public_vip}");
            Some((format!("{{'{amqp_vip}':'{rest}'}}"), format!("{{'{db_vip}':'{rest}'}}")))
        } else if self.floating.is_some() {
            let rest = format!("{ha_vip},{glance_vip},{public_vip}");
            Some((format!("{{'{ha_vip}':'{rest}'}}"), format!("{{'{db_vip}':'{rest}'}}")))
        } else {
            None
        };
        if let Some((amqp, mariadb)) = dicts {
            self.add("CONFIG_MARIADB_DICT", &mariadb);
            self.add("CONFIG_AMQP_DICT", &amqp);
        }
    }

    fn ha_section(&self, ha_nic_name: Option<&str>, general: &mut BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut ha = BTreeMap::new();
        let Some(heartbeats) = &self.heartbeats else {
            return ha;
        };
        for (index, link) in heartbeats.iter().enumerate() {
            ha.insert(format!("heartbeat_link{}", index + 1), link.join(","));
        }
        let names: Vec<&str> = self.ha_components.keys().map(|k| k.as_str()).collect();
        ha.insert("components".to_string(), names.join(","));
        let shared = |service: &str| self.share_disk_services.iter().any(|s| s == service);
        let mut set = |key: &str, value: &str| {
            ha.insert(key.to_string(), value.to_string());
        };

        for (name, component) in &self.ha_components {
            set(name, &component.daemons.join(","));
            if name == "glance" {
                if shared("glance") {
                    set("glance_device_type", "iscsi");
                    set("glance_device", "/dev/mapper/vg_glance-lv_glance");
                } else {
                    set("glance_device_type", "drbd");
                    set("glance_device", "/dev/vg_data/lv_glance");
                }
                set("glance_fs_type", "ext4");
            }
            if name == "database" {
                if shared("db") {
                    set("database_device", "/dev/mapper/vg_db-lv_db");
                    set("database_fs_type", "ext4");
                    set("database_device_type", "share");
                    general.insert("CONFIG_HA_INSTALL_MARIADB_LOCAL".to_string(), "n".to_string());
                } else {
                    set("database_device_type", "local_cluster");
                    general.insert("CONFIG_HA_INSTALL_MARIADB_LOCAL".to_string(), "y".to_string());
                }
                if shared("db_backup") {
                    set("backup_database_device", "/dev/mapper/vg_db_backup-lv_db_backup");
                    set("backup_database_fs_type", "ext4");
                }
                if component.daemons.iter().any(|d| d == "mongod") {
                    set("mongod_fs_type", "ext4");
                    if shared("mongodb") {
                        set("mongod_device", "/dev/mapper/vg_mongodb-lv_mongodb");
                        set("mongod_local", "");
                        general.insert("CONFIG_HA_INSTALL_MONGODB_LOCAL".to_string(), "n".to_string());
                    } else {
                        set("mongod_local", "yes");
                        general.insert("CONFIG_HA_INSTALL_MONGODB_LOCAL".to_string(), "y".to_string());
                    }
                }
            }
            if !self.lb_components.contains(name) {
                set(&format!("{name}_fip"), &component.fip);
                let nic = match ha_nic_name {
                    Some(nic) if name != "horizon" => nic,
                    _ => component.nic.as_str(),
                };
                set(&format!("{name}_nic"), nic);
                set(&format!("{name}_netmask"), &component.netmask);
            }
        }
        ha
    }
}

impl SoftwareConfig {
    /// Build both sections from the resolved topology. With a dns table every address that has
    /// a name is written as that name.
    pub fn synthesize(topology: &ClusterTopology, dns: Option<&DnsTable>) -> Result<Self, TopologyError> {
        let mut synthesis = Synthesis::default();

        // compute roles of child cells are folded into the cell dictionary
        let mut cell_compute_roles = BTreeSet::new();
        for role in topology.roles.iter().filter(|r| r.kind() == RoleKind::ChildCell) {
            let cell = role.role.name.strip_prefix("CONTROLLER_").unwrap_or(&role.role.name);
            let compute_name = format!("{cell}_COMPUTER");
            let compute_ips = topology.role(&compute_name)
                .map(|r| r.management_ips())
                .unwrap_or_default();
            if let Some(first) = role.hosts.first() {
                synthesis.child_cells.insert(first.management.ip.clone(), compute_ips.join(","));
            }
            cell_compute_roles.insert(compute_name);
        }

        let ordered = topology.roles.iter()
            .filter(|r| r.kind() != RoleKind::ChildCell && !cell_compute_roles.contains(&r.role.name));
        for role in ordered.clone().filter(|r| r.kind() == RoleKind::Ha) {
            synthesis.prepare_ha(role)?;
        }
        for role in ordered.clone().filter(|r| r.kind() == RoleKind::Lb) {
            synthesis.prepare_lb(role);
        }
        for role in ordered {
            synthesis.prepare_services(topology, role)?;
        }
        synthesis.prepare_amqp_mariadb();

        let mut general = BTreeMap::new();
        general.insert("CLUSTER_ID".to_string(), topology.cluster.id.clone());
        general.extend(cluster_network_entries(topology));
        for (key, values) in &synthesis.services {
            general.insert(key.clone(), values.join(","));
        }
        for component in &synthesis.components {
            general.insert(component.clone(), "y".to_string());
        }
        general.extend(synthesis.modes.clone());
        if !synthesis.child_cells.is_empty() {
            let cells: Vec<String> = synthesis.child_cells.iter()
                .map(|(controller, computes)| format!("'{controller}': '{computes}'"))
                .collect();
            general.insert("CONFIG_CHILD_CELL_DICT".to_string(), format!("{{{}}}", cells.join(", ")));
        }
        if !topology.installed_hosts.is_empty() {
            let installed: Vec<&str> = topology.installed_hosts.iter().map(|s| s.as_str()).collect();
            general.insert("EXCLUDE_SERVERS".to_string(), installed.join(","));
        }

        let mut ha = synthesis.ha_section(topology.ha_nic_name.as_deref(), &mut general);
        if let Some(dns) = dns {
            for value in general.values_mut().chain(ha.values_mut()) {
                *value = dns.substitute(value);
            }
        }
        Ok(Self { general, ha })
    }

    pub fn render_software_conf(&self) -> anyhow::Result<String> {
        let mut tera_context = tera::Context::new();
        tera_context.insert("general", &self.general);
        Ok(TEMPLATES.render("software_conf", &tera_context)?)
    }

    pub fn render_ha_conf(&self) -> anyhow::Result<String> {
        let mut tera_context = tera::Context::new();
        tera_context.insert("ha", &self.ha);
        Ok(TEMPLATES.render("ha_conf", &tera_context)?)
    }

    /// Write `tecs.conf` and `HA_1.conf` into `dir`, returns the software config path
    pub async fn write(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await
            .context(format!("creating cluster config dir {dir:?}"))?;
        let software_conf = dir.join(SOFTWARE_CONF_FILE);
        tokio::fs::write(&software_conf, self.render_software_conf()?).await
            .context(format!("writing {software_conf:?}"))?;
        if !self.ha.is_empty() {
            let ha_conf = dir.join(HA_CONF_FILE);
            tokio::fs::write(&ha_conf, self.render_ha_conf()?).await
                .context(format!("writing {ha_conf:?}"))?;
        }
        Ok(software_conf)
    }
}

/// Neutron entries that depend on the cluster's networking parameters and the vswitch plan
fn cluster_network_entries(topology: &ClusterTopology) -> BTreeMap<String, String> {
    let params = &topology.cluster.networking_parameters;
    let mut entries = BTreeMap::new();
    if let Some(base_mac) = params.base_mac.as_ref().filter(|m| !m.is_empty()) {
        entries.insert("CONFIG_NEUTRON_BASE_MAC".to_string(), base_mac.clone());
    }
    if let Some((start, end)) = params.gre_id_range {
        entries.insert("CONFIG_NEUTRON_ML2_TUNNEL_ID_RANGES".to_string(), format!("{start}:{end}"));
    }
    let tenant_type = match params.vni_range.as_ref().filter(|r| !r.is_empty()) {
        Some(range) => {
            entries.insert("CONFIG_NEUTRON_ML2_VNI_RANGES".to_string(), range.clone());
            "vxlan"
        }
        None => "vlan",
    };
    entries.insert("CONFIG_NEUTRON_ML2_TENANT_NETWORK_TYPES".to_string(), tenant_type.to_string());
    entries.insert("CONFIG_NEUTRON_ML2_TYPE_DRIVERS".to_string(), tenant_type.to_string());
    entries.extend(topology.physnets.config_entries());
    if let Some(dvs) = &topology.dvs {
        entries.extend(dvs.config_entries(params.enable_sdn));
    }
    entries
}
