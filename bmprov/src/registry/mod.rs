use std::path::{Path, PathBuf};
use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use bmprov_schemas::install_models::{HostStatusUpdate, RoleStatusUpdate, SoftwareProgress};
use bmprov_schemas::inventory::{Cluster, Host, Inventory, Network, Role};

/// The registry holds the cluster, role, network and host records. The engine only reads the
/// records and writes the status fields of hosts and roles back.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn get_cluster(&self) -> anyhow::Result<Cluster>;
    async fn get_roles(&self) -> anyhow::Result<Vec<Role>>;
    async fn get_networks(&self) -> anyhow::Result<Vec<Network>>;
    async fn get_host(&self, host_id: &str) -> anyhow::Result<Host>;
    async fn get_hosts(&self) -> anyhow::Result<Vec<Host>>;
    async fn update_host_status(&self, host_id: &str, update: &HostStatusUpdate) -> anyhow::Result<()>;
    async fn update_role_status(&self, role_id: &str, update: &RoleStatusUpdate) -> anyhow::Result<()>;
    async fn update_role_host_status(&self, role_id: &str, host_id: &str, update: &RoleStatusUpdate) -> anyhow::Result<()>;
}

/// Registry backed by an inventory document in memory. Writes take the write lock, so updates to
/// a host are applied in the order they are made. When a path is set every write is flushed back
/// to that file.
pub struct InventoryRegistry {
    inventory: RwLock<Inventory>,
    path: Option<PathBuf>,
}

impl InventoryRegistry {
    pub fn new(inventory: Inventory) -> Self {
        Self {
            inventory: RwLock::new(inventory),
            path: None,
        }
    }

    /// Load an inventory file, yaml or json depending on the extension
    pub async fn from_file(path: &Path) -> anyhow::Result<Self> {
        tracing::info!("loading inventory from {:?}", path);
        let text = tokio::fs::read_to_string(path).await
            .context(format!("reading inventory {path:?}"))?;
        let inventory = if is_json(path) {
            serde_json::from_str(&text).context(format!("parsing inventory {path:?}"))?
        } else {
            serde_yaml::from_str(&text).context(format!("parsing inventory {path:?}"))?
        };
        Ok(Self {
            inventory: RwLock::new(inventory),
            path: Some(path.to_path_buf()),
        })
    }

    pub async fn snapshot(&self) -> Inventory {
        self.inventory.read().await.clone()
    }

    async fn persist(&self, inventory: &Inventory) -> anyhow::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let text = if is_json(path) {
            serde_json::to_string_pretty(inventory)?
        } else {
            serde_yaml::to_string(inventory)?
        };
        tokio::fs::write(path, text).await
            .context(format!("writing inventory {path:?}"))?;
        Ok(())
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().map(|e| e == "json").unwrap_or(false)
}

#[async_trait]
impl Registry for InventoryRegistry {
    async fn get_cluster(&self) -> anyhow::Result<Cluster> {
        Ok(self.inventory.read().await.cluster.clone())
    }

    async fn get_roles(&self) -> anyhow::Result<Vec<Role>> {
        Ok(self.inventory.read().await.roles.clone())
    }

    async fn get_networks(&self) -> anyhow::Result<Vec<Network>> {
        Ok(self.inventory.read().await.networks.clone())
    }

    async fn get_host(&self, host_id: &str) -> anyhow::Result<Host> {
        let inventory = self.inventory.read().await;
        let host = inventory.hosts.iter()
            .find(|h| h.id == host_id)
            .context(format!("getting host {host_id} from the registry"))?;
        Ok(host.clone())
    }

    async fn get_hosts(&self) -> anyhow::Result<Vec<Host>> {
        Ok(self.inventory.read().await.hosts.clone())
    }

    async fn update_host_status(&self, host_id: &str, update: &HostStatusUpdate) -> anyhow::Result<()> {
        let mut inventory = self.inventory.write().await;
        let Some(host) = inventory.hosts.iter_mut().find(|h| h.id == host_id) else {
            bail!("could not update status of unknown host {host_id}");
        };
        if let Some(status) = update.os_status {
            host.os_status = status;
        }
        if let Some(progress) = update.os_progress {
            host.os_progress = progress;
        }
        if let Some(messages) = &update.messages {
            host.messages = messages.clone();
        }
        host.updated_at = Some(Utc::now());
        tracing::trace!("host {} now {} {}% {}", host_id, host.os_status, host.os_progress, host.messages);
        self.persist(&inventory).await
    }

    async fn update_role_status(&self, role_id: &str, update: &RoleStatusUpdate) -> anyhow::Result<()> {
        let mut inventory = self.inventory.write().await;
        let Some(role) = inventory.roles.iter_mut().find(|r| r.id == role_id) else {
            bail!("could not update status of unknown role {role_id}");
        };
        role.software = SoftwareProgress::from(update);
        self.persist(&inventory).await
    }

    async fn update_role_host_status(&self, role_id: &str, host_id: &str, update: &RoleStatusUpdate) -> anyhow::Result<()> {
        let mut inventory = self.inventory.write().await;
        let Some(role) = inventory.roles.iter().find(|r| r.id == role_id) else {
            bail!("could not update status of unknown role {role_id}");
        };
        if !role.host_ids.iter().any(|h| h == host_id) {
            bail!("host {host_id} is not a member of role {role_id}");
        }
        let Some(host) = inventory.hosts.iter_mut().find(|h| h.id == host_id) else {
            bail!("could not update status of unknown host {host_id}");
        };
        host.software = SoftwareProgress::from(update);
        self.persist(&inventory).await
    }
}

#[cfg(test)]
mod tests {
    use bmprov_schemas::install_models::{OsStatus, SoftwareStatus};
    use crate::test_support::sample_inventory;
    use super::*;

    #[tokio::test]
    async fn test_partial_host_update() {
        let registry = InventoryRegistry::new(sample_inventory(2));
        registry.update_host_status("host-1", &HostStatusUpdate::new(OsStatus::PreInstall, 0, "Preparing for OS installation")).await.unwrap();
        registry.update_host_status("host-1", &HostStatusUpdate::message("still going")).await.unwrap();
        let host = registry.get_host("host-1").await.unwrap();
        assert_eq!(host.os_status, OsStatus::PreInstall);
        assert_eq!(host.messages, "still going");
        assert!(host.updated_at.is_some());
        assert!(registry.get_host("host-2").await.unwrap().updated_at.is_none());
        assert!(registry.update_host_status("nope", &HostStatusUpdate::message("x")).await.is_err());
        assert!(registry.get_host("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_role_updates() {
        let registry = InventoryRegistry::new(sample_inventory(3));
        let update = RoleStatusUpdate { status: SoftwareStatus::Installing, progress: 40, messages: "installing".into() };
        registry.update_role_status("role-ha", &update).await.unwrap();
        registry.update_role_host_status("role-ha", "host-1", &update).await.unwrap();
        let inventory = registry.snapshot().await;
        assert_eq!(inventory.roles[0].software.progress, 40);
        assert_eq!(inventory.hosts[0].software.status, SoftwareStatus::Installing);
        // host-3 is a compute host
        assert!(registry.update_role_host_status("role-ha", "host-3", &update).await.is_err());
    }

    #[tokio::test]
    async fn test_write_through_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.json");
        tokio::fs::write(&path, serde_json::to_string(&sample_inventory(1)).unwrap()).await.unwrap();
        let registry = InventoryRegistry::from_file(&path).await.unwrap();
        registry.update_host_status("host-1", &HostStatusUpdate::new(OsStatus::Installing, 35, "OS installing")).await.unwrap();
        let reloaded = InventoryRegistry::from_file(&path).await.unwrap();
        let host = reloaded.get_host("host-1").await.unwrap();
        assert_eq!(host.os_progress, 35);
        assert_eq!(host.os_status, OsStatus::Installing);
    }
}
