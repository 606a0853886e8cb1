use std::sync::Arc;
use anyhow::{bail, Context};
use async_trait::async_trait;
use crate::orchestration::ssh::SSHClient;
use crate::orchestration::CommandRunner;

const DNSMASQ_CONF: &str = "/etc/dnsmasq.conf";
const RESOLV_CONF: &str = "/etc/resolv.conf";
const HOSTS_FILE: &str = "/etc/hosts";
const NOVA_CONF: &str = "/etc/nova/nova.conf";
const DASHBOARD_CONF: &str = "/etc/httpd/conf.d/15-horizon_vhost.conf";

/// Steps run on the installed nodes around the cluster software install. `table` is a
/// list of `(name, address)` pairs.
#[async_trait]
pub trait PostSteps: Send + Sync {
    /// dnsmasq on the HA controllers answering for every name in the table
    async fn configure_dns_servers(&self, servers: &[String], table: &[(String, String)]) -> anyhow::Result<()>;
    /// point the resolver of every node at the HA controllers
    async fn configure_dns_clients(&self, nodes: &[String], nameservers: &[String]) -> anyhow::Result<()>;
    async fn distribute_hosts_table(&self, nodes: &[String], table: &[(String, String)]) -> anyhow::Result<()>;
    /// `computes` are `(address, name)` pairs. The vnc proxy url was written with `proxy_name`
    /// and is pointed at `proxy_ip`.
    async fn patch_compute_nodes(&self, computes: &[(String, String)], proxy_name: &str, proxy_ip: &str) -> anyhow::Result<()>;
    /// let the dashboard on the HA controllers answer on their own address and the floating ones
    async fn patch_dashboard(&self, ha_nodes: &[String], aliases: &[String]) -> anyhow::Result<()>;
}

/// Applies the post steps over ssh
pub struct SshPostSteps {
    runner: Arc<dyn CommandRunner>,
}

impl SshPostSteps {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn run_script(&self, host_ip: &str, script: &[String]) -> anyhow::Result<()> {
        for line in script {
            SSHClient::run_remote_command(self.runner.as_ref(), host_ip, vec![line.as_str()])
                .await
                .context(format!("post step on {host_ip}"))?;
        }
        Ok(())
    }
}

pub fn dnsmasq_server_script(table: &[(String, String)]) -> Vec<String> {
    let mut script = vec![
        format!("sed -i '/^[^#]/s/no-resolv[[:space:]]*/#no-resolv/' {DNSMASQ_CONF}"),
        format!("sed -i '/^[^#]/s/no-poll[[:space:]]*/#no-poll/' {DNSMASQ_CONF}"),
        format!("sed -i '/^cache-size=/d' {DNSMASQ_CONF}"),
        format!("echo 'cache-size=3000' >> {DNSMASQ_CONF}"),
    ];
    for (name, address) in table {
        script.push(format!("sed -i '/^address=\\/{name}\\//d' {DNSMASQ_CONF}"));
        script.push(format!("echo 'address=/{name}/{address}' >> {DNSMASQ_CONF}"));
    }
    script.push("systemctl daemon-reload && systemctl enable dnsmasq.service && systemctl restart dnsmasq.service".to_string());
    script
}

pub fn resolv_conf_script(nameservers: &[String]) -> Vec<String> {
    let mut script = vec![format!("rm -f {RESOLV_CONF}")];
    for nameserver in nameservers {
        script.push(format!("echo 'nameserver {nameserver}' >> {RESOLV_CONF}"));
    }
    script
}

pub fn hosts_table_script(table: &[(String, String)]) -> Vec<String> {
    let mut script = vec![];
    for (name, address) in table {
        script.push(format!("sed -i '/[[:space:]]{name}$/d' {HOSTS_FILE}"));
        script.push(format!("echo '{address} {name}' >> {HOSTS_FILE}"));
    }
    script
}

pub fn nova_vnc_script(compute_name: &str, proxy_name: &str, proxy_ip: &str) -> Vec<String> {
    vec![
        format!("sed -i '/^novncproxy_base_url/s/{proxy_name}/{proxy_ip}/' {NOVA_CONF}"),
        format!("sed -i '/^vncserver_proxyclient_address/s/127.0.0.1/{compute_name}/' {NOVA_CONF}"),
        "systemctl restart openstack-nova-compute.service".to_string(),
    ]
}

pub fn dashboard_alias_script(aliases: &[String]) -> Vec<String> {
    let mut script = vec![];
    for alias in aliases {
        script.push(format!("sed -i '/ServerAlias {alias}$/d' {DASHBOARD_CONF}"));
    }
    for alias in aliases {
        script.push(format!("sed -i '/ServerAlias localhost/a ServerAlias {alias}' {DASHBOARD_CONF}"));
    }
    script
}

#[async_trait]
impl PostSteps for SshPostSteps {
    async fn configure_dns_servers(&self, servers: &[String], table: &[(String, String)]) -> anyhow::Result<()> {
        let script = dnsmasq_server_script(table);
        for server in servers {
            let check = SSHClient::run_remote_command_output(
                self.runner.as_ref(), server, vec!["test", "-f", DNSMASQ_CONF],
            ).await?;
            if !check.success() {
                bail!("{} does not exist in {}", DNSMASQ_CONF, server);
            }
            tracing::info!("configuring dnsmasq on {}", server);
            self.run_script(server, &script).await?;
        }
        Ok(())
    }

    async fn configure_dns_clients(&self, nodes: &[String], nameservers: &[String]) -> anyhow::Result<()> {
        let script = resolv_conf_script(nameservers);
        for node in nodes {
            self.run_script(node, &script).await?;
        }
        Ok(())
    }

    async fn distribute_hosts_table(&self, nodes: &[String], table: &[(String, String)]) -> anyhow::Result<()> {
        let script = hosts_table_script(table);
        for node in nodes {
            tracing::debug!("writing {} entries to {} on {}", table.len(), HOSTS_FILE, node);
            self.run_script(node, &script).await?;
        }
        Ok(())
    }

    async fn patch_compute_nodes(&self, computes: &[(String, String)], proxy_name: &str, proxy_ip: &str) -> anyhow::Result<()> {
        for (address, name) in computes {
            self.run_script(address, &nova_vnc_script(name, proxy_name, proxy_ip)).await?;
        }
        Ok(())
    }

    async fn patch_dashboard(&self, ha_nodes: &[String], aliases: &[String]) -> anyhow::Result<()> {
        for node in ha_nodes {
            let mut node_aliases = vec![node.clone()];
            node_aliases.extend(aliases.iter().cloned());
            let mut script = dashboard_alias_script(&node_aliases);
            script.push("systemctl daemon-reload && systemctl restart httpd.service".to_string());
            self.run_script(node, &script).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::orchestration::CommandOutput;
    use crate::test_support::RecordingRunner;
    use super::*;

    fn table() -> Vec<(String, String)> {
        vec![("host-1".to_string(), "10.0.0.11".to_string()), ("ha-vip".to_string(), "10.0.0.100".to_string())]
    }

    #[test]
    fn test_scripts() {
        assert_eq!(hosts_table_script(&table()), vec![
            "sed -i '/[[:space:]]host-1$/d' /etc/hosts",
            "echo '10.0.0.11 host-1' >> /etc/hosts",
            "sed -i '/[[:space:]]ha-vip$/d' /etc/hosts",
            "echo '10.0.0.100 ha-vip' >> /etc/hosts",
        ]);
        assert_eq!(resolv_conf_script(&["10.0.0.11".to_string()]), vec![
            "rm -f /etc/resolv.conf",
            "echo 'nameserver 10.0.0.11' >> /etc/resolv.conf",
        ]);
        let dnsmasq = dnsmasq_server_script(&table());
        assert!(dnsmasq.contains(&"echo 'address=/ha-vip/10.0.0.100' >> /etc/dnsmasq.conf".to_string()));
        assert!(dnsmasq.last().unwrap().contains("systemctl restart dnsmasq.service"));
        assert_eq!(nova_vnc_script("host-3", "ha-vip", "10.0.0.100")[0],
                   "sed -i '/^novncproxy_base_url/s/ha-vip/10.0.0.100/' /etc/nova/nova.conf");
        assert_eq!(dashboard_alias_script(&["10.0.0.11".to_string(), "10.0.0.100".to_string()]), vec![
            "sed -i '/ServerAlias 10.0.0.11$/d' /etc/httpd/conf.d/15-horizon_vhost.conf",
            "sed -i '/ServerAlias 10.0.0.100$/d' /etc/httpd/conf.d/15-horizon_vhost.conf",
            "sed -i '/ServerAlias localhost/a ServerAlias 10.0.0.11' /etc/httpd/conf.d/15-horizon_vhost.conf",
            "sed -i '/ServerAlias localhost/a ServerAlias 10.0.0.100' /etc/httpd/conf.d/15-horizon_vhost.conf",
        ]);
    }

    #[tokio::test]
    async fn test_hosts_table_runs_on_every_node() {
        let runner = Arc::new(RecordingRunner::default());
        let steps = SshPostSteps::new(runner.clone());
        let nodes = vec!["10.0.0.11".to_string(), "10.0.0.12".to_string()];
        steps.distribute_hosts_table(&nodes, &table()).await.unwrap();
        let commands = runner.commands();
        assert_eq!(commands.len(), 8);
        assert!(commands[0].contains("root@10.0.0.11 sed -i"));
        assert!(commands[7].ends_with("root@10.0.0.12 echo '10.0.0.100 ha-vip' >> /etc/hosts"));
    }

    #[tokio::test]
    async fn test_dns_server_needs_dnsmasq() {
        let runner = Arc::new(RecordingRunner::default());
        runner.respond("test -f /etc/dnsmasq.conf", CommandOutput { status_code: Some(1), ..Default::default() });
        let steps = SshPostSteps::new(runner.clone());
        let err = steps.configure_dns_servers(&["10.0.0.11".to_string()], &table()).await.unwrap_err();
        assert_eq!(err.to_string(), "/etc/dnsmasq.conf does not exist in 10.0.0.11");
    }
}
