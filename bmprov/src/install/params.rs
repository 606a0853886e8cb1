use std::collections::BTreeSet;
use std::fmt;
use std::fmt::Formatter;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use bmprov_schemas::inventory::{DiskLocation, Host, Network, Role};
use bmprov_schemas::settings::HostDefaults;
use crate::topology::interfaces::{plan_interfaces, pxe_mac, InterfacePlan};

/// Parameter document the os installer is run with, one per host
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct InstallParams {
    pub hostname: String,
    pub iso_path: String,
    pub dhcp_mac: String,
    /// MB
    pub storage_size: u64,
    /// GB
    pub memory_size: u64,
    pub interfaces: Vec<InterfacePlan>,
    pub root_lv_size: u64,
    pub swap_lv_size: u64,
    pub cinder_vg_size: u64,
    pub disk_list: String,
    pub root_disk: String,
    pub root_pwd: String,
    pub isolcpus: Option<String>,
    pub hugepagesize: String,
    pub hugepages: u32,
    pub reboot: String,
    pub glance_lv_size: u64,
    pub db_lv_size: u64,
    pub mongodb_lv_size: u64,
    pub nova_lv_size: u64,
}

impl fmt::Display for InstallParams {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let text = serde_json::to_string_pretty(&self).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

/// Parse a cpu set spec such as `1-4,^3,6` into the sorted cpu ids
pub fn cpu_str_to_list(spec: &str) -> anyhow::Result<Vec<u32>> {
    let mut ids = BTreeSet::new();
    let mut rejects = BTreeSet::new();
    for rule in spec.split(',').map(|r| r.trim()).filter(|r| !r.is_empty()) {
        if let Some(excluded) = rule.strip_prefix('^') {
            let id = excluded.trim().parse::<u32>()
                .context(format!("Invalid exclusion expression {rule:?}"))?;
            rejects.insert(id);
        } else if let Some((start, end)) = rule.split_once('-') {
            let start = start.trim().parse::<u32>().context(format!("Invalid range expression {rule:?}"))?;
            let end = end.trim().parse::<u32>().context(format!("Invalid range expression {rule:?}"))?;
            if start > end {
                bail!("Invalid range expression {rule:?}");
            }
            ids.extend(start..=end);
        } else {
            let id = rule.parse::<u32>().context(format!("Invalid cpu expression {rule:?}"))?;
            ids.insert(id);
        }
    }
    Ok(ids.difference(&rejects).copied().collect())
}

/// Render cpu ids as a spec, runs longer than two become ranges: `[1,2,3,4,6,7]` -> `1-4,6,7`
pub fn cpu_list_to_str(cpus: &[u32]) -> String {
    let mut sorted = cpus.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    let mut groups: Vec<Vec<u32>> = vec![];
    for cpu in sorted {
        match groups.last_mut() {
            Some(group) if group.last().map(|last| last + 1) == Some(cpu) => group.push(cpu),
            _ => groups.push(vec![cpu]),
        }
    }
    groups.iter()
        .map(|group| {
            if group.len() > 2 {
                format!("{}-{}", group[0], group[group.len() - 1])
            } else {
                group.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(",")
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Cpus not reserved for the os, `None` when the host has no reservation or unknown cpu count
pub fn isolated_cpus(host: &Host) -> anyhow::Result<Option<String>> {
    let (Some(os_cpus), Some(total)) = (host.os_cpus.as_deref().filter(|s| !s.is_empty()), host.cpu_total) else {
        return Ok(None);
    };
    let reserved: BTreeSet<u32> = cpu_str_to_list(os_cpus)?.into_iter().collect();
    let isolated: Vec<u32> = (0..total).filter(|c| !reserved.contains(c)).collect();
    Ok(Some(cpu_list_to_str(&isolated)))
}

/// Local disks of the host, fibre channel and iscsi disks and multipath devices are left out
fn local_disks(host: &Host) -> (Vec<String>, u64) {
    let mut names = vec![];
    let mut size_bytes = 0;
    for disk in &host.disks {
        if disk.path.contains("-fc-") || disk.path.contains("-iscsi-")
            || disk.name.contains("mpath") || disk.name.contains("spath") {
            continue;
        }
        names.push(disk.name.clone());
        size_bytes += disk.size_bytes;
    }
    (names, size_bytes)
}

impl InstallParams {
    /// Build the parameter document of a host from its hardware facts and the policies of the
    /// roles it belongs to
    pub fn build(
        host: &Host,
        roles: &[Role],
        networks: &[Network],
        defaults: &HostDefaults,
    ) -> anyhow::Result<InstallParams> {
        let Some(iso_path) = host.os_version_file.clone().filter(|f| !f.is_empty()) else {
            bail!("No OS version file configed for host {}", host.id);
        };
        let (disks, storage_bytes) = local_disks(host);
        let host_roles: Vec<&Role> = roles.iter().filter(|r| host.has_role(&r.name)).collect();

        let glance_lv_size = host_roles.iter().filter_map(|r| r.glance_lv_size).last().unwrap_or(0);
        let db_lv_size = host_roles.iter().filter_map(|r| r.db_lv_size).max().unwrap_or(0);
        let nova_lv_size = host_roles.iter()
            .filter(|r| r.name == "COMPUTER")
            .filter_map(|r| r.nova_lv_size)
            .last()
            .unwrap_or(0);
        let mongodb_lv_size = host_roles.iter()
            .flat_map(|r| r.service_disks.iter())
            .find(|d| d.service == "mongodb" && d.disk_location == DiskLocation::Local)
            .map(|d| d.size)
            .unwrap_or(0);

        Ok(InstallParams {
            hostname: host.name.clone(),
            iso_path,
            dhcp_mac: pxe_mac(host)?,
            storage_size: storage_bytes / (1024 * 1024),
            memory_size: host.memory_total_kb / 1024 / 1024,
            interfaces: plan_interfaces(host, networks)?,
            root_lv_size: host.root_lv_size.filter(|s| *s > 0).unwrap_or(defaults.root_lv_size),
            swap_lv_size: host.swap_lv_size,
            cinder_vg_size: 0,
            disk_list: disks.join(","),
            root_disk: host.root_disk.clone().filter(|d| !d.is_empty()).unwrap_or_else(|| defaults.root_disk.clone()),
            root_pwd: host.root_pwd.clone().filter(|p| !p.is_empty()).unwrap_or_else(|| defaults.root_pwd.clone()),
            isolcpus: isolated_cpus(host)?,
            hugepagesize: host.hugepagesize.clone().filter(|h| !h.is_empty()).unwrap_or_else(|| defaults.hugepagesize.clone()),
            hugepages: host.hugepages.unwrap_or(0),
            reboot: "no".to_string(),
            glance_lv_size,
            db_lv_size,
            mongodb_lv_size,
            nova_lv_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use bmprov_schemas::inventory::{Disk, ServiceDisk};
    use crate::test_support::sample_inventory;
    use super::*;

    #[test]
    fn test_cpu_specs() {
        assert_eq!(cpu_str_to_list("1-4,^3,6").unwrap(), vec![1, 2, 4, 6]);
        assert_eq!(cpu_str_to_list(" 0 , 2").unwrap(), vec![0, 2]);
        assert!(cpu_str_to_list("4-1").is_err());
        assert!(cpu_str_to_list("a").is_err());
        assert_eq!(cpu_list_to_str(&[1, 2, 3, 4, 6, 7]), "1-4,6,7");
        assert_eq!(cpu_list_to_str(&[]), "");
    }

    #[test]
    fn test_isolated_cpus() {
        let mut host = sample_inventory(1).hosts.remove(0);
        assert_eq!(isolated_cpus(&host).unwrap(), None);
        host.os_cpus = Some("0-1".into());
        host.cpu_total = Some(8);
        assert_eq!(isolated_cpus(&host).unwrap().as_deref(), Some("2-7"));
    }

    #[test]
    fn test_build_params() {
        let mut inventory = sample_inventory(4);
        inventory.roles[0].db_lv_size = Some(100);
        inventory.roles[0].service_disks.push(ServiceDisk { service: "mongodb".into(), disk_location: DiskLocation::Local, size: 50 });
        let mut host = inventory.hosts[0].clone();
        host.disks = vec![
            Disk { name: "sda".into(), path: "pci-0000:00:1f.2-ata-1".into(), size_bytes: 500 * 1024 * 1024 * 1024 },
            Disk { name: "sdb".into(), path: "ip-10.0.0.5:3260-iscsi-iqn".into(), size_bytes: 100 * 1024 * 1024 * 1024 },
            Disk { name: "mpatha".into(), path: "".into(), size_bytes: 1024 },
        ];
        host.memory_total_kb = 64 * 1024 * 1024;

        let params = InstallParams::build(&host, &inventory.roles, &inventory.networks, &HostDefaults::default()).unwrap();
        assert_eq!(params.dhcp_mac, "52:54:00:00:00:01");
        assert_eq!(params.disk_list, "sda");
        assert_eq!(params.storage_size, 500 * 1024);
        assert_eq!(params.memory_size, 64);
        assert_eq!(params.root_pwd, "ossdbg1");
        assert_eq!(params.root_lv_size, 102400);
        assert_eq!(params.db_lv_size, 100);
        assert_eq!(params.mongodb_lv_size, 50);
        assert_eq!(params.nova_lv_size, 0);
        assert_eq!(params.reboot, "no");

        host.os_version_file = None;
        let err = InstallParams::build(&host, &inventory.roles, &inventory.networks, &HostDefaults::default()).unwrap_err();
        assert_eq!(err.to_string(), "No OS version file configed for host host-1");
    }
}
