use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(version = "1.0", about = "Bare-metal provisioning orchestration engine")]
pub struct Opts {
    #[arg(long, default_value = "inventory.yaml", help = "Cluster inventory file, yaml or json")]
    pub inventory: String,
    #[arg(short, long)]
    pub verbosity: Option<String>,
    #[arg(long, help = "Override the settings folder, defaults to /var/lib/bmprov/")]
    pub settings_folder: Option<String>,
    #[command(subcommand)]
    pub sub_command: SubCommand,
}

#[derive(Subcommand, Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub enum SubCommand {
    #[command(about = "Validate the inventory and print the resolved network plan")]
    Plan,
    #[command(about = "Build the PXE server from the cluster's system network")]
    BuildPxe(BuildPxeCmd),
    #[command(about = "Install the operating system on hosts in waves")]
    InstallOs(InstallOsCmd),
    #[command(about = "Upgrade the operating system on active hosts")]
    UpgradeOs(UpgradeOsCmd),
    #[command(about = "Install the cluster software on a role's hosts")]
    InstallSoftware(InstallSoftwareCmd),
    #[command(about = "Write the default orchestrator config")]
    SetupConfig,
}

impl SubCommand {
    pub fn name(&self) -> String {
        match &self {
            SubCommand::Plan => "plan".into(),
            SubCommand::BuildPxe(_) => "build pxe".into(),
            SubCommand::InstallOs(_) => "install os".into(),
            SubCommand::UpgradeOs(_) => "upgrade os".into(),
            SubCommand::InstallSoftware(_) => "install software".into(),
            SubCommand::SetupConfig => "setup config".into(),
        }
    }
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BuildPxeCmd {
    #[clap(long, help = "Nic on this server attached to the system network")]
    pub interface: String,
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct InstallOsCmd {
    #[clap(long, value_delimiter = ',', help = "Host ids to install, defaults to every host not active")]
    pub hosts: Vec<String>,
    #[clap(long, help = "Role whose hosts must all succeed for the install to carry on")]
    pub must_succeed_role: Option<String>,
    #[clap(long, help = "Override max_parallel_os_number")]
    pub max_parallel: Option<usize>,
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct UpgradeOsCmd {
    #[clap(long, value_delimiter = ',', help = "Host ids to upgrade, defaults to every active host")]
    pub hosts: Vec<String>,
    #[clap(long, help = "Upgrade media to copy to each host")]
    pub iso: String,
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct InstallSoftwareCmd {
    #[clap(long, help = "Role to install, defaults to every role of the cluster")]
    pub role: Option<String>,
}
