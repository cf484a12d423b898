//! SSH connection module
//!
//! Drives the system OpenSSH client. Commands are joined into one shell
//! line for the remote login shell; files move with `scp`. Multiplexing is
//! left to the user's ssh configuration.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{CommandResult, ConnectionError, ConnectionHandler, ConnectionResult};

/// Exit status ssh uses for its own failures.
const SSH_ERROR_RC: i32 = 255;

/// SSH connection to one host
#[derive(Debug, Clone)]
pub struct SshConnection {
    host: String,
    port: Option<u16>,
    user: Option<String>,
    /// Connect timeout in seconds
    timeout: u64,
    connected: bool,
}

impl SshConnection {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            user: None,
            timeout: 10,
            connected: false,
        }
    }

    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }

    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = timeout;
        self
    }

    fn common_args(&self, port_flag: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.timeout),
        ];
        if let Some(port) = self.port {
            args.push(port_flag.to_string());
            args.push(port.to_string());
        }
        args
    }

    fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }

    /// Full `ssh` argument vector for a remote command.
    pub fn ssh_args(&self, cmd: &[String]) -> Vec<String> {
        let mut args = self.common_args("-p");
        args.push(self.destination());
        args.push("--".to_string());
        args.push(shell_words::join(cmd));
        args
    }

    fn scp_args(&self, from: String, to: String) -> Vec<String> {
        let mut args = self.common_args("-P");
        args.push("-q".to_string());
        args.push(from);
        args.push(to);
        args
    }

    fn remote_path(&self, path: &Path) -> String {
        format!("{}:{}", self.destination(), path.display())
    }

    async fn run(&self, program: &str, args: &[String], stdin: Option<&str>) -> ConnectionResult<CommandResult> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ConnectionError::ExecutionFailed(format!("Failed to spawn {}: {}", program, e)))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await.map_err(|e| {
                ConnectionError::ExecutionFailed(format!("Failed to write stdin: {}", e))
            })?;
            drop(pipe);
        }

        let output = child.wait_with_output().await.map_err(|e| {
            ConnectionError::ExecutionFailed(format!("Failed to wait for {}: {}", program, e))
        })?;
        Ok(CommandResult::new(
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        ))
    }

    async fn transfer(&self, from: String, to: String) -> ConnectionResult<()> {
        if !self.connected {
            return Err(ConnectionError::NotConnected);
        }
        let out = self.run("scp", &self.scp_args(from, to), None).await?;
        if out.success() {
            Ok(())
        } else {
            Err(ConnectionError::TransferFailed(out.stderr.trim().to_string()))
        }
    }
}

#[async_trait]
impl ConnectionHandler for SshConnection {
    fn transport(&self) -> &str {
        "ssh"
    }

    async fn connect(&mut self) -> ConnectionResult<()> {
        debug!(host = %self.host, port = ?self.port, user = ?self.user, "Connecting via SSH");
        let out = self.run("ssh", &self.ssh_args(&["true".to_string()]), None).await?;
        if out.rc == SSH_ERROR_RC {
            return Err(ConnectionError::ConnectionFailed(format!(
                "{}: {}",
                self.host,
                out.stderr.trim()
            )));
        }
        self.connected = true;
        Ok(())
    }

    async fn close(&mut self) -> ConnectionResult<()> {
        self.connected = false;
        Ok(())
    }

    async fn execute(&self, cmd: &[String], stdin: Option<&str>) -> ConnectionResult<CommandResult> {
        if !self.connected {
            return Err(ConnectionError::NotConnected);
        }
        trace!(host = %self.host, command = %shell_words::join(cmd), "Executing remote command");
        let out = self.run("ssh", &self.ssh_args(cmd), stdin).await?;
        if out.rc == SSH_ERROR_RC {
            return Err(ConnectionError::ConnectionFailed(out.stderr.trim().to_string()));
        }
        Ok(out)
    }

    async fn put_file(&self, local: &Path, remote: &Path) -> ConnectionResult<()> {
        self.transfer(local.display().to_string(), self.remote_path(remote)).await
    }

    async fn get_file(&self, remote: &Path, local: &Path) -> ConnectionResult<()> {
        self.transfer(self.remote_path(remote), local.display().to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_args() {
        let conn = SshConnection::new("web1")
            .with_port(Some(2222))
            .with_user(Some("deploy".into()))
            .with_timeout(5);
        let args = conn.ssh_args(&["echo".into(), "a b".into()]);
        assert_eq!(
            args,
            vec![
                "-o",
                "BatchMode=yes",
                "-o",
                "ConnectTimeout=5",
                "-p",
                "2222",
                "deploy@web1",
                "--",
                "echo 'a b'"
            ]
        );
    }

    #[test]
    fn test_scp_uses_capital_port_flag() {
        let conn = SshConnection::new("db1").with_port(Some(2200));
        let args = conn.scp_args("/tmp/a".into(), conn.remote_path(Path::new("/tmp/b")));
        assert!(args.contains(&"-P".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("db1:/tmp/b"));
    }

    #[tokio::test]
    async fn test_execute_before_connect() {
        let conn = SshConnection::new("web1");
        let err = conn.execute(&["true".into()], None).await.unwrap_err();
        assert!(matches!(err, ConnectionError::NotConnected));
    }
}
