use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use crate::orchestration::CommandRunner;

/// a reboot of an HA host can take 20 minutes
const REBOOT_DOWN_PINGS: u32 = 360;
const REBOOT_UP_PINGS: u32 = 60;

/// Answers which of a set of addresses did not reply to a ping
#[async_trait]
pub trait Reachability: Send + Sync {
    async fn unreachable(&self, ips: &[String]) -> anyhow::Result<Vec<String>>;
}

/// `fping` all addresses in one go, it prints `<ip> is unreachable` for the silent ones
pub struct Fping {
    runner: Arc<dyn CommandRunner>,
}

impl Fping {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

pub fn parse_unreachable(output: &str) -> Vec<String> {
    output.lines()
        .filter(|l| l.contains("is unreachable"))
        .filter_map(|l| l.split_whitespace().next())
        .map(|ip| ip.to_string())
        .collect()
}

#[async_trait]
impl Reachability for Fping {
    async fn unreachable(&self, ips: &[String]) -> anyhow::Result<Vec<String>> {
        let mut cmd = vec!["fping".to_string()];
        cmd.extend(ips.iter().cloned());
        let output = self.runner.run(cmd).await?;
        Ok(parse_unreachable(&output.combined()))
    }
}

/// Ping until every address answered or `max_times` rounds were made, returns the addresses
/// that never answered
pub async fn check_ping_hosts(
    reachability: &dyn Reachability,
    ips: &[String],
    max_times: u32,
    interval: Duration,
) -> anyhow::Result<Vec<String>> {
    if ips.is_empty() {
        tracing::info!("no ip got for ping test");
        return Ok(vec![]);
    }
    tracing::info!("begin ping test for {}", ips.join(","));
    let mut pending = ips.to_vec();
    for attempt in 1..=max_times.max(1) {
        pending = reachability.unreachable(&pending).await?;
        if pending.is_empty() {
            tracing::info!("ping {} successfully", ips.join(","));
            return Ok(pending);
        }
        tracing::debug!("ping host {} for {} times", pending.join(","), attempt);
        if attempt < max_times {
            tokio::time::sleep(interval).await;
        }
    }
    tracing::info!("ping host {} timeout", pending.join(","));
    Ok(pending)
}

/// Wait for a host to go down and come back up again. Returns false if either does not happen in
/// time.
pub async fn wait_reboot(reachability: &dyn Reachability, ip: &str, interval: Duration) -> anyhow::Result<bool> {
    let ips = vec![ip.to_string()];
    let mut went_down = false;
    for _ in 0..REBOOT_DOWN_PINGS {
        if !reachability.unreachable(&ips).await?.is_empty() {
            went_down = true;
            break;
        }
        tokio::time::sleep(interval).await;
    }
    if !went_down {
        tracing::info!("host {} did not go down for reboot", ip);
        return Ok(false);
    }
    let still_down = check_ping_hosts(reachability, &ips, REBOOT_UP_PINGS, interval).await?;
    if !still_down.is_empty() {
        return Ok(false);
    }
    tokio::time::sleep(interval).await;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use crate::orchestration::CommandOutput;
    use crate::test_support::{RecordingRunner, ScriptedReachability};
    use super::*;

    #[tokio::test]
    async fn test_fping() {
        let runner = Arc::new(RecordingRunner::default());
        runner.respond("fping", CommandOutput {
            status_code: Some(1),
            stdout: "10.0.0.11 is alive\n".into(),
            stderr: "10.0.0.12 is unreachable\n".into(),
        });
        let fping = Fping::new(runner.clone());
        let ips = vec!["10.0.0.11".to_string(), "10.0.0.12".to_string()];
        assert_eq!(fping.unreachable(&ips).await.unwrap(), vec!["10.0.0.12"]);
        assert_eq!(runner.commands(), vec!["fping 10.0.0.11 10.0.0.12"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_ping_hosts() {
        let reach = ScriptedReachability::default();
        // down for two rounds
        reach.down_for("10.0.0.12", 2);
        let ips = vec!["10.0.0.11".to_string(), "10.0.0.12".to_string()];
        let left = check_ping_hosts(&reach, &ips, 5, Duration::from_secs(5)).await.unwrap();
        assert!(left.is_empty());
        assert_eq!(reach.rounds(), 3);

        let reach = ScriptedReachability::default();
        reach.down_for("10.0.0.12", 100);
        let left = check_ping_hosts(&reach, &ips, 3, Duration::from_secs(5)).await.unwrap();
        assert_eq!(left, vec!["10.0.0.12"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_reboot() {
        let reach = ScriptedReachability::default();
        // up for the first ping, then down for two, then back
        reach.pattern("10.0.0.11", vec![true, false, false, true]);
        assert!(wait_reboot(&reach, "10.0.0.11", Duration::from_secs(5)).await.unwrap());

        let reach = ScriptedReachability::default();
        assert!(!wait_reboot(&reach, "10.0.0.11", Duration::from_secs(5)).await.unwrap());
    }
}
