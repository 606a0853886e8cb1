use std::path::PathBuf;
use anyhow::Context;
use bmprov_schemas::settings::InstallerPaths;
use crate::orchestration::{run_checked, CommandRunner};
use crate::topology::pxe::PxeServerPlan;

/// Write `pxe.json` and run the pxe server installer with it
pub async fn build_pxe_server(
    runner: &dyn CommandRunner,
    paths: &InstallerPaths,
    plan: &PxeServerPlan,
) -> anyhow::Result<PathBuf> {
    tracing::info!("Stage: building pxe server on {} ({})", plan.ethname_l, plan.ip_addr_l);
    tokio::fs::create_dir_all(&paths.param_dir).await
        .context(format!("creating {}", paths.param_dir))?;
    let path = PathBuf::from(&paths.param_dir).join("pxe.json");
    tokio::fs::write(&path, serde_json::to_string_pretty(plan)?).await
        .context(format!("writing {path:?}"))?;
    let cmd = vec![paths.pxe_server_bin.clone(), path.to_string_lossy().to_string()];
    run_checked(runner, cmd).await.context("build_pxe_server error")?;
    tracing::info!("pxe server built, clients get {} - {}", plan.client_ip_begin, plan.client_ip_end);
    Ok(path)
}
