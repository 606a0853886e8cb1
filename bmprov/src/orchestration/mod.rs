use std::path::PathBuf;
use anyhow::bail;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use bmprov_schemas::settings::OrchestratorConfig;

pub mod ssh;

#[macro_export]
macro_rules! vec_of_strings {
    ($($x:expr),*) => (vec![$($x.to_string()),*]);
}

/// This is the minimal set of data every engine operation needs: which cluster is being worked
/// on, where the settings live and the orchestrator config that was loaded for this run.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestrationCommon {
    pub cluster_id: String,
    pub settings_folder: PathBuf,
    pub config: OrchestratorConfig,
    /// id of this engine run, attached to the log span of the operation
    pub run_id: String,
}

impl OrchestrationCommon {
    pub fn new(
        cluster_id: &str,
        settings_folder: PathBuf,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            cluster_id: cluster_id.to_string(),
            settings_folder,
            config,
            run_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Folder the generated cluster config documents are written to
    pub fn cluster_conf_dir(&self) -> PathBuf {
        self.settings_folder.join("clusters").join(&self.cluster_id)
    }
}

/// Exit status and captured streams of an external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == Some(0)
    }

    /// stdout followed by stderr, the installer tooling is not consistent about which stream it
    /// reports on
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Process boundary for everything the engine shells out to. The subprocess implementation is
/// used at runtime, tests swap in a runner that records the argument vectors.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, cmd: Vec<String>) -> anyhow::Result<CommandOutput>;
}

#[derive(Debug, Clone, Default)]
pub struct SubprocessRunner {}

#[async_trait]
impl CommandRunner for SubprocessRunner {
    async fn run(&self, cmd: Vec<String>) -> anyhow::Result<CommandOutput> {
        let (starting_command, args) = match cmd.split_first() {
            Some(split) => split,
            None => bail!("no command given to the subprocess runner"),
        };
        let args: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        run_subprocess_output(starting_command, args).await
    }
}

/// Run a command and hand back the exit code and both streams without judging the result, used
/// where a non-zero exit carries meaning (progress queries, the upgrade script).
pub async fn run_subprocess_output(
    starting_command: &str,
    command_string: Vec<&str>,
) -> anyhow::Result<CommandOutput> {
    tracing::debug!("running command: {} {}", starting_command, command_string.join(" "));
    let sub_process = Command::new(starting_command)
        .args(&command_string)
        .output()
        .await?;
    Ok(CommandOutput {
        status_code: sub_process.status.code(),
        stdout: String::from_utf8_lossy(&sub_process.stdout).to_string(),
        stderr: String::from_utf8_lossy(&sub_process.stderr).to_string(),
    })
}

/// Run through a `CommandRunner` and turn a non-zero exit into an error carrying stderr, or stdout
/// when stderr is empty
pub async fn run_checked(
    runner: &dyn CommandRunner,
    cmd: Vec<String>,
) -> anyhow::Result<String> {
    let output = runner.run(cmd).await?;
    if !output.success() {
        let reason = if output.stderr.trim().is_empty() { output.stdout } else { output.stderr };
        bail!("{}", reason.trim());
    }
    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subprocess_output() {
        let output = run_subprocess_output("echo", vec!["hello"]).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
        let output = run_subprocess_output("sh", vec!["-c", "echo oops >&2; exit 3"]).await.unwrap();
        assert_eq!(output.status_code, Some(3));
        assert_eq!(output.stderr.trim(), "oops");
        assert_eq!(output.combined().trim(), "oops");
    }

    #[test]
    fn test_run_id_per_operation() {
        let first = OrchestrationCommon::new("cluster-1", PathBuf::from("/tmp/bmprov"), OrchestratorConfig::default());
        let second = OrchestrationCommon::new("cluster-1", PathBuf::from("/tmp/bmprov"), OrchestratorConfig::default());
        assert!(uuid::Uuid::parse_str(&first.run_id).is_ok());
        assert_ne!(first.run_id, second.run_id);
        assert_eq!(first.cluster_conf_dir(), PathBuf::from("/tmp/bmprov/clusters/cluster-1"));
    }

    #[tokio::test]
    async fn test_run_checked() {
        let runner = SubprocessRunner::default();
        let out = run_checked(&runner, vec_of_strings!["echo", "ok"]).await.unwrap();
        assert_eq!(out.trim(), "ok");
        let err = run_checked(&runner, vec_of_strings!["sh", "-c", "echo broken; exit 1"]).await.unwrap_err();
        assert_eq!(err.to_string(), "broken");
        assert!(runner.run(vec![]).await.is_err());
    }
}
