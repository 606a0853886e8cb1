use std::sync::Arc;
use anyhow::bail;
use async_trait::async_trait;
use crate::orchestration::{run_checked, CommandRunner};
use crate::power::{BootAction, FabricManager, IpmiCredentials};
use crate::vec_of_strings;

/// `sshpass` wrapped `ssh` to the fabric manager, logging in with the blade's own management
/// controller account
pub fn fabric_command(manager_addr: &str, credentials: &IpmiCredentials, remote_cmd: &str) -> Vec<String> {
    vec_of_strings![
        "sshpass", format!("-p{}", credentials.passwd),
        "ssh", "-o", "StrictHostKeyChecking=no",
        format!("{}@{}", credentials.user, manager_addr),
        remote_cmd
    ]
}

/// Service profile change for a blade at `location`
pub fn profile_command(location: &str, action: BootAction) -> String {
    let change = match action {
        BootAction::Pxe => "set boot-policy pxe",
        BootAction::Disk => "set boot-policy local-disk",
        BootAction::Reset => "reboot",
        BootAction::On => "power up",
        BootAction::Off => "power down",
    };
    format!("scope service-profile server {location};{change};commit-buffer")
}

fn digits(s: &str) -> &str {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    &s[..end]
}

/// `chassis-<n>/blade-<m>` in the identity output becomes `<n>/<m>`
pub fn parse_location(output: &str) -> Option<String> {
    output.match_indices("chassis-").find_map(|(index, marker)| {
        let rest = &output[index + marker.len()..];
        let chassis = digits(rest);
        let blade = rest[chassis.len()..].strip_prefix("/blade-").map(digits)?;
        Some(format!("{chassis}/{blade}"))
    })
}

/// Cisco UCS fabric interconnect driven over its ssh cli
pub struct UcsFabric {
    runner: Arc<dyn CommandRunner>,
    manager_addr: String,
}

impl UcsFabric {
    pub fn new(runner: Arc<dyn CommandRunner>, manager_addr: &str) -> Self {
        Self { runner, manager_addr: manager_addr.to_string() }
    }
}

#[async_trait]
impl FabricManager for UcsFabric {
    async fn locate(&self, credentials: &IpmiCredentials) -> anyhow::Result<String> {
        let remote = format!("show identity ip-addr {}", credentials.addr);
        let output = run_checked(self.runner.as_ref(), fabric_command(&self.manager_addr, credentials, &remote)).await?;
        match parse_location(&output) {
            Some(location) => Ok(location),
            None => bail!("no blade with management address {} on {}", credentials.addr, self.manager_addr),
        }
    }

    async fn apply(&self, credentials: &IpmiCredentials, location: &str, action: BootAction) -> anyhow::Result<()> {
        let remote = profile_command(location, action);
        run_checked(self.runner.as_ref(), fabric_command(&self.manager_addr, credentials, &remote)).await?;
        Ok(())
    }
}
