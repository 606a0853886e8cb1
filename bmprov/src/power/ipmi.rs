use std::sync::Arc;
use async_trait::async_trait;
use crate::orchestration::{run_checked, CommandRunner};
use crate::power::{BootAction, IpmiCredentials, PowerChannel};
use crate::vec_of_strings;

/// `ipmitool` command line for an action, boot devices are set persistently
pub fn ipmi_command(credentials: &IpmiCredentials, action: BootAction) -> Vec<String> {
    let device = if action.is_boot_device() { "bootdev" } else { "power" };
    let mut cmd = vec_of_strings![
        "ipmitool", "-I", "lanplus",
        "-H", &credentials.addr,
        "-U", &credentials.user,
        "-P", &credentials.passwd,
        "chassis", device, action.to_string()
    ];
    if action.is_boot_device() {
        cmd.push("options=persistent".to_string());
    }
    cmd
}

/// Management controller access through the local `ipmitool`
pub struct IpmiTool {
    runner: Arc<dyn CommandRunner>,
}

impl IpmiTool {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl PowerChannel for IpmiTool {
    async fn set(&self, credentials: &IpmiCredentials, action: BootAction) -> anyhow::Result<()> {
        tracing::debug!("ipmi {} {}", credentials.addr, action);
        run_checked(self.runner.as_ref(), ipmi_command(credentials, action)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::orchestration::CommandOutput;
    use crate::test_support::RecordingRunner;
    use super::*;

    fn credentials() -> IpmiCredentials {
        IpmiCredentials { addr: "192.168.100.11".into(), user: "admin".into(), passwd: "secret".into() }
    }

    #[test]
    fn test_ipmi_command() {
        let expected = vec_of_strings![
            "ipmitool", "-I", "lanplus", "-H", "192.168.100.11", "-U", "admin", "-P", "secret",
            "chassis", "bootdev", "pxe", "options=persistent"
        ].join(" ");
        assert_eq!(expected, ipmi_command(&credentials(), BootAction::Pxe).join(" "));
        let expected = "ipmitool -I lanplus -H 192.168.100.11 -U admin -P secret chassis power reset";
        assert_eq!(expected, ipmi_command(&credentials(), BootAction::Reset).join(" "));
    }

    #[tokio::test]
    async fn test_failed_ipmitool_is_an_error() {
        let runner = Arc::new(RecordingRunner::default());
        runner.respond("chassis power", CommandOutput {
            status_code: Some(1),
            stdout: String::new(),
            stderr: "Unable to establish IPMI v2 / RMCP+ session".into(),
        });
        let tool = IpmiTool::new(runner.clone());
        assert!(tool.set(&credentials(), BootAction::Disk).await.is_ok());
        let err = tool.set(&credentials(), BootAction::Off).await.unwrap_err();
        assert!(err.to_string().contains("RMCP+"));
        assert_eq!(runner.commands().len(), 2);
    }
}
