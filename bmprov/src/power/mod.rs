use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use strum_macros::Display;
use thiserror::Error;
use tokio::sync::Mutex;
use bmprov_schemas::inventory::Host;
use bmprov_schemas::settings::OrchestratorConfig;

pub mod appliance;
pub mod fabric;
pub mod ipmi;

/// Boot device or power action sent to a host's management controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum BootAction {
    Pxe,
    Disk,
    On,
    Off,
    Reset,
}

impl BootAction {
    pub fn is_boot_device(&self) -> bool {
        matches!(self, BootAction::Pxe | BootAction::Disk)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PowerError {
    #[error("set {addr} to '{action}' failed for {attempts} times, last error: {last_error}")]
    RetriesExhausted {
        addr: String,
        action: BootAction,
        attempts: u32,
        last_error: String,
    },
    #[error("Invalid ipmi information configed for host {0}")]
    MissingCredentials(String),
    #[error("management appliance {hwm_ip} could not {action} node {hwm_id}: {message}")]
    Appliance {
        hwm_ip: String,
        hwm_id: String,
        action: String,
        message: String,
    },
    #[error("fabric manager could not set host {host_id} to '{action}': {message}")]
    Fabric {
        host_id: String,
        action: BootAction,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpmiCredentials {
    pub addr: String,
    pub user: String,
    pub passwd: String,
}

impl IpmiCredentials {
    pub fn from_host(host: &Host) -> Result<Self, PowerError> {
        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
        match (non_empty(&host.ipmi_addr), non_empty(&host.ipmi_user), non_empty(&host.ipmi_passwd)) {
            (Some(addr), Some(user), Some(passwd)) => Ok(Self { addr, user, passwd }),
            _ => Err(PowerError::MissingCredentials(host.id.clone())),
        }
    }
}

/// Out of band channel to a host's management controller
#[async_trait]
pub trait PowerChannel: Send + Sync {
    async fn set(&self, credentials: &IpmiCredentials, action: BootAction) -> anyhow::Result<()>;
}

/// Management appliance that owns boot and power of the hosts registered with it
#[async_trait]
pub trait ApplianceClient: Send + Sync {
    async fn set_boot(&self, hwm_ip: &str, hwm_id: &str, action: BootAction) -> anyhow::Result<()>;
    async fn restart(&self, hwm_ip: &str, hwm_id: &str) -> anyhow::Result<()>;
}

/// Fabric manager owning the service profiles, and with them boot policy and power, of blade
/// servers
#[async_trait]
pub trait FabricManager: Send + Sync {
    /// `<chassis>/<blade>` of the blade with this management address
    async fn locate(&self, credentials: &IpmiCredentials) -> anyhow::Result<String>;
    async fn apply(&self, credentials: &IpmiCredentials, location: &str, action: BootAction) -> anyhow::Result<()>;
}

/// Sets boot devices and power states, either directly over the management controller with
/// retries, through the management appliance when the host is registered with one, or through
/// the fabric manager for Cisco blades.
pub struct BootPowerController {
    channel: Arc<dyn PowerChannel>,
    appliance: Arc<dyn ApplianceClient>,
    fabric: Option<Arc<dyn FabricManager>>,
    /// blade locations by host id, looked up once per host
    locations: Mutex<HashMap<String, String>>,
    retry_times: u32,
    backoff_unit: Duration,
}

impl BootPowerController {
    pub fn new(
        channel: Arc<dyn PowerChannel>,
        appliance: Arc<dyn ApplianceClient>,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            channel,
            appliance,
            fabric: None,
            locations: Mutex::new(HashMap::new()),
            retry_times: config.ipmi_retry_times.max(1),
            backoff_unit: Duration::from_secs(config.ipmi_backoff_unit_secs),
        }
    }

    pub fn with_fabric(mut self, fabric: Arc<dyn FabricManager>) -> Self {
        self.fabric = Some(fabric);
        self
    }

    pub async fn set(&self, host: &Host, action: BootAction) -> Result<(), PowerError> {
        if host.uses_appliance() {
            return self.set_appliance(host, action).await;
        }
        let credentials = IpmiCredentials::from_host(host)?;
        if host.is_cisco() {
            return self.set_fabric(host, &credentials, action).await;
        }
        self.set_direct(&credentials, action).await
    }

    /// Restart a host through the appliance, the appliance keeps its own retry policy
    pub async fn restart(&self, host: &Host) -> Result<(), PowerError> {
        if host.uses_appliance() {
            return self.set_appliance(host, BootAction::Reset).await;
        }
        self.set(host, BootAction::Reset).await
    }

    async fn set_appliance(&self, host: &Host, action: BootAction) -> Result<(), PowerError> {
        let hwm_id = host.hwm_id.clone().unwrap_or_default();
        let hwm_ip = host.hwm_ip.clone().unwrap_or_default();
        let result = match action {
            BootAction::Pxe | BootAction::Disk => self.appliance.set_boot(&hwm_ip, &hwm_id, action).await,
            BootAction::Reset | BootAction::On => self.appliance.restart(&hwm_ip, &hwm_id).await,
            BootAction::Off => Err(anyhow::anyhow!("powering off is not supported by the appliance")),
        };
        result.map_err(|e| PowerError::Appliance {
            hwm_ip,
            hwm_id,
            action: action.to_string(),
            message: format!("{e:#}"),
        })
    }

    /// The fabric manager commits a service profile change once, there is no retry
    async fn set_fabric(&self, host: &Host, credentials: &IpmiCredentials, action: BootAction) -> Result<(), PowerError> {
        let fabric_error = |message: String| PowerError::Fabric {
            host_id: host.id.clone(),
            action,
            message,
        };
        let Some(fabric) = &self.fabric else {
            return Err(fabric_error("no fabric manager configured".to_string()));
        };
        let location = self.location_of(host, fabric.as_ref(), credentials).await
            .map_err(|e| fabric_error(format!("{e:#}")))?;
        fabric.apply(credentials, &location, action).await
            .map_err(|e| fabric_error(format!("{e:#}")))?;
        tracing::info!("set {} ({}) to '{}' through the fabric manager", host.id, location, action);
        Ok(())
    }

    async fn location_of(&self, host: &Host, fabric: &dyn FabricManager, credentials: &IpmiCredentials) -> anyhow::Result<String> {
        let mut locations = self.locations.lock().await;
        if let Some(location) = locations.get(&host.id) {
            return Ok(location.clone());
        }
        let location = fabric.locate(credentials).await?;
        tracing::info!("Get location {} for host {}", location, host.id);
        locations.insert(host.id.clone(), location.clone());
        Ok(location)
    }

    /// Retry with a linearly growing back off. A boot device is set a second time once it took,
    /// some controllers drop the first persistent setting.
    async fn set_direct(&self, credentials: &IpmiCredentials, action: BootAction) -> Result<(), PowerError> {
        let mut last_error = String::new();
        for attempt in 1..=self.retry_times {
            match self.channel.set(credentials, action).await {
                Ok(()) => {
                    tracing::info!("set {} to '{}' successfully for {} times", credentials.addr, action, attempt);
                    if action.is_boot_device() {
                        if let Err(err) = self.channel.set(credentials, action).await {
                            tracing::warn!("re-setting {} to '{}' failed: {err:#}", credentials.addr, action);
                        }
                    }
                    return Ok(());
                }
                Err(err) => {
                    tracing::info!("try setting {} to '{}' failed for {} times: {err:#}", credentials.addr, action, attempt);
                    last_error = format!("{err:#}");
                    if attempt < self.retry_times {
                        tokio::time::sleep(self.backoff_unit * attempt).await;
                    }
                }
            }
        }
        Err(PowerError::RetriesExhausted {
            addr: credentials.addr.clone(),
            action,
            attempts: self.retry_times,
            last_error,
        })
    }
}
