use crate::orchestration::{run_checked, CommandOutput, CommandRunner};

/// Remote execution on provisioned hosts. The installed hosts trust the provisioning server's key,
/// so all we need is to run a remote command and push some files, which is done with plain
/// `ssh`/`scp` sub process commands through a `CommandRunner`.
pub struct SSHClient {}

impl SSHClient {

    /// Build the argument vector for running `remote_cmd` on `host_ip` as root
    pub fn remote_command(host_ip: &str, remote_cmd: Vec<&str>) -> Vec<String> {
        let ssh_address = format!("root@{host_ip}");
        let mut cmd = vec!["ssh".to_string()];
        cmd.extend(_get_ssh_opts().into_iter().map(|s| s.to_string()));
        cmd.push(ssh_address);
        cmd.extend(remote_cmd.into_iter().map(|s| s.to_string()));
        cmd
    }

    /// Build the argument vector to copy a local file into `remote_dst` on `host_ip`
    pub fn push_file_command(host_ip: &str, local_src: &str, remote_dst: &str) -> Vec<String> {
        let mut cmd = vec!["scp".to_string()];
        cmd.extend(_get_ssh_opts().into_iter().map(|s| s.to_string()));
        cmd.push(local_src.to_string());
        cmd.push(format!("root@{host_ip}:{remote_dst}"));
        cmd
    }

    /// Run a command on a remote host, failing on a non-zero exit
    pub async fn run_remote_command(
        runner: &dyn CommandRunner,
        host_ip: &str,
        remote_cmd: Vec<&str>,
    ) -> anyhow::Result<String> {
        let cmd = Self::remote_command(host_ip, remote_cmd);
        tracing::debug!("running remote command: {}", cmd.join(" "));
        run_checked(runner, cmd).await
    }

    /// Run a command on a remote host and hand back the raw output, for scripts whose exit code
    /// carries meaning
    pub async fn run_remote_command_output(
        runner: &dyn CommandRunner,
        host_ip: &str,
        remote_cmd: Vec<&str>,
    ) -> anyhow::Result<CommandOutput> {
        let cmd = Self::remote_command(host_ip, remote_cmd);
        tracing::debug!("running remote command: {}", cmd.join(" "));
        runner.run(cmd).await
    }

    /// Push a file to a remote host, creating the destination folder first
    pub async fn push_file_to_remote(
        runner: &dyn CommandRunner,
        host_ip: &str,
        local_src: &str,
        remote_dst: &str,
    ) -> anyhow::Result<()> {
        tracing::info!("pushing {} to {} at {}", local_src, remote_dst, host_ip);
        Self::run_remote_command(runner, host_ip, vec!["mkdir", "-p", remote_dst]).await?;
        run_checked(runner, Self::push_file_command(host_ip, local_src, remote_dst)).await?;
        Ok(())
    }
}

fn _get_ssh_opts<'a>() -> Vec<&'a str> {
    // freshly installed hosts have new host keys on every install
    vec!["-o", "BatchMode=yes", "-o", "StrictHostKeyChecking=no", "-o", "UserKnownHostsFile=/dev/null"]
}

#[cfg(test)]
mod tests {
    use crate::test_support::RecordingRunner;
    use super::*;

    #[test]
    fn test_ssh_commands() {
        let expected = "ssh -o BatchMode=yes -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null root@10.0.0.11 mkdir -p /home/bmprov_update";
        assert_eq!(expected, SSHClient::remote_command("10.0.0.11", vec!["mkdir", "-p", "/home/bmprov_update"]).join(" "));
        let expected = "scp -o BatchMode=yes -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null /tmp/os.iso root@10.0.0.11:/home/bmprov_update";
        assert_eq!(expected, SSHClient::push_file_command("10.0.0.11", "/tmp/os.iso", "/home/bmprov_update").join(" "));
    }

    #[tokio::test]
    async fn test_push_file_runs_mkdir_then_scp() {
        let runner = RecordingRunner::default();
        SSHClient::push_file_to_remote(&runner, "10.0.0.11", "/tmp/os.iso", "/home/x").await.unwrap();
        let commands = runner.commands();
        assert_eq!(commands.len(), 2);
        assert!(commands[0].starts_with("ssh "));
        assert!(commands[0].ends_with("mkdir -p /home/x"));
        assert!(commands[1].starts_with("scp "));
    }
}
