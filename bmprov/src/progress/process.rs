use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use bmprov_schemas::inventory::Host;
use bmprov_schemas::settings::OrchestratorConfig;
use crate::orchestration::{CommandOutput, CommandRunner};
use crate::progress::{tail, PollOutcome, ProgressPoller};
use crate::topology::interfaces::pxe_mac;

const FAILURE_TAIL_LEN: usize = 200;

/// Runs the installer's progress query for the host's dhcp mac. The query prints
/// `<progress> <message>` and exits non-zero when the install failed.
pub struct ProcessProgressPoller {
    runner: Arc<dyn CommandRunner>,
    progress_bin: String,
    query_timeout: Duration,
}

impl ProcessProgressPoller {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &OrchestratorConfig) -> Self {
        Self {
            runner,
            progress_bin: config.installer.os_progress_bin.clone(),
            query_timeout: Duration::from_secs(config.progress_query_timeout_secs),
        }
    }
}

/// Map the output of a progress query to an outcome
pub fn parse_progress_output(output: &CommandOutput) -> PollOutcome {
    if !output.success() {
        return PollOutcome::failed(&tail(&output.combined(), FAILURE_TAIL_LEN));
    }
    let mut tokens = output.stdout.split_whitespace();
    let Some(first) = tokens.next() else {
        return PollOutcome::failed("progress query returned no output");
    };
    let Ok(progress) = first.parse::<u32>() else {
        return PollOutcome::failed(&format!("unexpected progress output '{}'", tail(&output.stdout, FAILURE_TAIL_LEN)));
    };
    let message = tokens.collect::<Vec<_>>().join(" ");
    PollOutcome::progress(progress.min(100) as u8, &message)
}

#[async_trait]
impl ProgressPoller for ProcessProgressPoller {
    async fn poll(&self, host: &Host) -> PollOutcome {
        let mac = match pxe_mac(host) {
            Ok(mac) => mac,
            Err(err) => return PollOutcome::failed(&err.to_string()),
        };
        let cmd = vec![self.progress_bin.clone(), mac];
        match tokio::time::timeout(self.query_timeout, self.runner.run(cmd)).await {
            Err(_) => PollOutcome::failed(&format!(
                "progress query timed out after {}s", self.query_timeout.as_secs()
            )),
            Ok(Err(err)) => {
                tracing::error!("{}: execute get install progress failed: {err:#}", host.id);
                PollOutcome::failed(&format!("{err:#}"))
            }
            Ok(Ok(output)) => parse_progress_output(&output),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::{sample_inventory, RecordingRunner};
    use super::*;

    fn ok(stdout: &str) -> CommandOutput {
        CommandOutput { status_code: Some(0), stdout: stdout.into(), stderr: String::new() }
    }

    #[test]
    fn test_parse_progress_output() {
        assert_eq!(parse_progress_output(&ok("45 copying packages\n")), PollOutcome::progress(45, "copying packages"));
        assert_eq!(parse_progress_output(&ok("100")), PollOutcome::progress(100, ""));
        assert_eq!(parse_progress_output(&ok("250 odd")), PollOutcome::progress(100, "odd"));
        assert!(matches!(parse_progress_output(&ok("")), PollOutcome::Failed { .. }));
        assert!(matches!(parse_progress_output(&ok("abc")), PollOutcome::Failed { .. }));
        let failed = CommandOutput { status_code: Some(1), stdout: "12 partitioning".into(), stderr: "disk sda not found".into() };
        assert_eq!(parse_progress_output(&failed), PollOutcome::failed("12 partitioningdisk sda not found"));
    }

    #[tokio::test]
    async fn test_poll_runs_query_for_mac() {
        let runner = Arc::new(RecordingRunner::default());
        runner.respond("pxe_os_install_progress", ok("30 installing base"));
        let poller = ProcessProgressPoller::new(runner.clone(), &OrchestratorConfig::default());
        let host = sample_inventory(1).hosts.remove(0);
        assert_eq!(poller.poll(&host).await, PollOutcome::progress(30, "installing base"));
        assert_eq!(runner.commands(), vec!["/usr/bin/pxe_os_install_progress 52:54:00:00:00:01"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_is_bounded() {
        let runner = Arc::new(RecordingRunner::default());
        runner.delay(Duration::from_secs(120));
        let poller = ProcessProgressPoller::new(runner, &OrchestratorConfig::default());
        let host = sample_inventory(1).hosts.remove(0);
        assert_eq!(poller.poll(&host).await, PollOutcome::failed("progress query timed out after 30s"));
    }
}
