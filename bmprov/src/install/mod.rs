use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::Context;
use async_trait::async_trait;
use bmprov_schemas::settings::InstallerPaths;
use crate::install::params::InstallParams;
use crate::orchestration::{run_checked, CommandRunner};

pub mod params;
pub mod pxe_server;

/// Starts the os install of one host. Success only means the installer accepted the host, the
/// progress is followed through a `ProgressPoller`.
#[async_trait]
pub trait InstallInvoker: Send + Sync {
    async fn install(&self, params: &InstallParams) -> anyhow::Result<()>;
}

/// Runs the pxe installer with the parameter document written next to the other host documents
pub struct PxeInstallInvoker {
    runner: Arc<dyn CommandRunner>,
    os_install_bin: String,
    param_dir: PathBuf,
}

impl PxeInstallInvoker {
    pub fn new(runner: Arc<dyn CommandRunner>, paths: &InstallerPaths) -> Self {
        Self {
            runner,
            os_install_bin: paths.os_install_bin.clone(),
            param_dir: PathBuf::from(&paths.param_dir),
        }
    }

    pub fn param_path(&self, dhcp_mac: &str) -> PathBuf {
        param_document_path(&self.param_dir, dhcp_mac)
    }
}

pub fn param_document_path(param_dir: &Path, dhcp_mac: &str) -> PathBuf {
    param_dir.join(format!("{dhcp_mac}.json"))
}

#[async_trait]
impl InstallInvoker for PxeInstallInvoker {
    async fn install(&self, params: &InstallParams) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.param_dir).await
            .context(format!("creating {:?}", self.param_dir))?;
        let path = self.param_path(&params.dhcp_mac);
        tokio::fs::write(&path, format!("{params}")).await
            .context(format!("writing install parameters to {path:?}"))?;
        tracing::info!("starting os install of {} with {:?}", params.hostname, path);
        let cmd = vec![self.os_install_bin.clone(), path.to_string_lossy().to_string()];
        run_checked(self.runner.as_ref(), cmd).await
            .context(format!("install os return failed for host {}", params.hostname))?;
        Ok(())
    }
}
