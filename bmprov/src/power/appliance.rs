use anyhow::bail;
use async_trait::async_trait;
use reqwest::Response;
use serde::{Deserialize, Serialize};
use crate::power::{ApplianceClient, BootAction};

pub const DEFAULT_APPLIANCE_PORT: u16 = 8089;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BootTypeRequest {
    pub boot_type: String,
}

/// Reusable helper method for parsing the response of the appliance for command results
async fn parse_response(resp: Response, command_name: String) -> anyhow::Result<String> {
    let http_code = resp.status();
    let text_response = resp.text().await?;

    if http_code.is_success() {
        tracing::info!("{command_name} command successful");
    } else {
        tracing::error!(
            "command was not successful with code {:?}",
            http_code.to_string()
        );
        bail!("appliance response: {:?}", text_response);
    }
    Ok(text_response)
}

/// Talks to the hardware management appliance over its http api
pub struct HttpApplianceClient {
    client: reqwest::Client,
    port: u16,
}

impl HttpApplianceClient {
    pub fn new(port: u16) -> Self {
        Self {
            client: reqwest::Client::new(),
            port,
        }
    }

    fn node_url(&self, hwm_ip: &str, hwm_id: &str, action: &str) -> String {
        format!("http://{}:{}/api/v1.0/hardware/nodes/{}/{}", hwm_ip, self.port, hwm_id, action)
    }
}

impl Default for HttpApplianceClient {
    fn default() -> Self {
        Self::new(DEFAULT_APPLIANCE_PORT)
    }
}

#[async_trait]
impl ApplianceClient for HttpApplianceClient {
    async fn set_boot(&self, hwm_ip: &str, hwm_id: &str, action: BootAction) -> anyhow::Result<()> {
        tracing::info!("setting boot of node {hwm_id} on appliance {hwm_ip} to {action}");
        let server_api = self.node_url(hwm_ip, hwm_id, "boot_type");
        tracing::trace!("api url used = {:?}", &server_api);
        let json = BootTypeRequest { boot_type: action.to_string() };
        let resp = self.client.post(server_api).json(&json).send().await?;
        parse_response(resp, format!("set boot {action}")).await?;
        Ok(())
    }

    async fn restart(&self, hwm_ip: &str, hwm_id: &str) -> anyhow::Result<()> {
        tracing::info!("restarting node {hwm_id} on appliance {hwm_ip}");
        let server_api = self.node_url(hwm_ip, hwm_id, "restart");
        tracing::trace!("api url used = {:?}", &server_api);
        let resp = self.client.post(server_api).send().await?;
        parse_response(resp, "restart".into()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_url() {
        let client = HttpApplianceClient::default();
        assert_eq!(
            client.node_url("10.9.0.1", "node-7", "boot_type"),
            "http://10.9.0.1:8089/api/v1.0/hardware/nodes/node-7/boot_type"
        );
        let body = serde_json::to_string(&BootTypeRequest { boot_type: BootAction::Pxe.to_string() }).unwrap();
        assert_eq!(body, r#"{"boot_type":"pxe"}"#);
    }

    #[tokio::test]
    async fn test_unreachable_appliance() {
        // nothing listens on port 9 of the loopback
        let client = HttpApplianceClient::new(9);
        assert!(client.restart("127.0.0.1", "node-7").await.is_err());
    }
}
