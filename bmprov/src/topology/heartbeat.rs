use std::collections::BTreeSet;
use crate::topology::interfaces::HostAddresses;

/// Heartbeat links of an HA role, up to three lists of addresses with one entry per host.
///
/// The management plane always feeds the first link and the dedicated heartbeat planes the other
/// two, storage fills in for a missing heartbeat plane. Empty links are shifted forward and a link
/// carrying the same addresses as an earlier one is dropped.
pub fn heartbeat_links(hosts: &[HostAddresses]) -> [Vec<String>; 3] {
    let mut links: [Vec<String>; 3] = Default::default();
    for host in hosts {
        links[0].push(host.management.ip.clone());
        if let Some(heartbeat) = &host.heartbeat1 {
            links[1].push(heartbeat.ip.clone());
        }
        if let Some(heartbeat) = &host.heartbeat2 {
            links[2].push(heartbeat.ip.clone());
        }
        if let Some(storage) = &host.storage {
            if host.heartbeat1.is_none() {
                links[1].push(storage.ip.clone());
            } else if host.heartbeat2.is_none() {
                links[2].push(storage.ip.clone());
            }
        }
    }

    if links[0].is_empty() {
        links[0] = std::mem::take(&mut links[1]);
        links[1] = std::mem::take(&mut links[2]);
    }
    if links[1].is_empty() {
        links[1] = std::mem::take(&mut links[2]);
    }

    let as_set = |v: &Vec<String>| v.iter().cloned().collect::<BTreeSet<String>>();
    if as_set(&links[1]) == as_set(&links[0]) {
        links[1].clear();
        if as_set(&links[2]) != as_set(&links[0]) {
            links[1] = std::mem::take(&mut links[2]);
        }
    }
    if as_set(&links[2]) == as_set(&links[0]) || as_set(&links[2]) == as_set(&links[1]) {
        links[2].clear();
    }
    links
}
