//! Local connection module
//!
//! Runs commands as child processes of the control node and copies files
//! on the local filesystem.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{CommandResult, ConnectionError, ConnectionHandler, ConnectionResult};

/// Local connection for executing commands on the current host
#[derive(Debug, Clone)]
pub struct LocalConnection {
    /// Identifier for this connection
    identifier: String,
    connected: bool,
}

impl LocalConnection {
    /// Create a new local connection
    pub fn new() -> Self {
        let identifier = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "localhost".to_string());

        Self {
            identifier,
            connected: false,
        }
    }

    /// Create a local connection with a custom identifier
    pub fn with_identifier(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            connected: false,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    fn ensure_connected(&self) -> ConnectionResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(ConnectionError::NotConnected)
        }
    }
}

impl Default for LocalConnection {
    fn default() -> Self {
        Self::new()
    }
}

async fn copy_file(from: &Path, to: &Path) -> ConnectionResult<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            ConnectionError::TransferFailed(format!(
                "Failed to create directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }
    tokio::fs::copy(from, to).await.map_err(|e| {
        ConnectionError::TransferFailed(format!(
            "Failed to copy {} to {}: {}",
            from.display(),
            to.display(),
            e
        ))
    })?;
    Ok(())
}

#[async_trait]
impl ConnectionHandler for LocalConnection {
    fn transport(&self) -> &str {
        "local"
    }

    async fn connect(&mut self) -> ConnectionResult<()> {
        trace!(identifier = %self.identifier, "Opening local connection");
        self.connected = true;
        Ok(())
    }

    async fn close(&mut self) -> ConnectionResult<()> {
        self.connected = false;
        Ok(())
    }

    async fn execute(&self, cmd: &[String], stdin: Option<&str>) -> ConnectionResult<CommandResult> {
        self.ensure_connected()?;
        let (program, args) = cmd
            .split_first()
            .ok_or_else(|| ConnectionError::ExecutionFailed("empty command".to_string()))?;
        debug!(command = %shell_words::join(cmd), "Executing local command");

        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ConnectionError::ExecutionFailed(format!("Failed to spawn process: {}", e)))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await.map_err(|e| {
                ConnectionError::ExecutionFailed(format!("Failed to write stdin: {}", e))
            })?;
            drop(pipe);
        }

        let output = child.wait_with_output().await.map_err(|e| {
            ConnectionError::ExecutionFailed(format!("Failed to wait for process: {}", e))
        })?;

        let result = CommandResult::new(
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        );
        trace!(rc = result.rc, stdout_len = result.stdout.len(), stderr_len = result.stderr.len(), "Command completed");
        Ok(result)
    }

    async fn put_file(&self, local: &Path, remote: &Path) -> ConnectionResult<()> {
        self.ensure_connected()?;
        debug!(src = %local.display(), dst = %remote.display(), "Copying file locally");
        copy_file(local, remote).await
    }

    async fn get_file(&self, remote: &Path, local: &Path) -> ConnectionResult<()> {
        self.ensure_connected()?;
        debug!(src = %remote.display(), dst = %local.display(), "Copying file locally");
        copy_file(remote, local).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[tokio::test]
    async fn test_execute_requires_connect() {
        let conn = LocalConnection::with_identifier("test");
        let err = conn.execute(&argv(&["true"]), None).await.unwrap_err();
        assert!(matches!(err, ConnectionError::NotConnected));
    }

    #[tokio::test]
    async fn test_execute_captures_output() {
        let mut conn = LocalConnection::new();
        conn.connect().await.unwrap();

        let out = conn.execute(&argv(&["sh", "-c", "echo out; echo err >&2; exit 3"]), None).await.unwrap();
        assert_eq!(out.rc, 3);
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");
    }

    #[tokio::test]
    async fn test_execute_feeds_stdin() {
        let mut conn = LocalConnection::new();
        conn.connect().await.unwrap();
        let out = conn.execute(&argv(&["cat"]), Some("piped")).await.unwrap();
        assert_eq!(out.stdout, "piped");
    }

    #[tokio::test]
    async fn test_missing_program_is_error() {
        let mut conn = LocalConnection::new();
        conn.connect().await.unwrap();
        let err = conn.execute(&argv(&["/definitely/not/here"]), None).await.unwrap_err();
        assert!(matches!(err, ConnectionError::ExecutionFailed(_)));
    }

    #[tokio::test]
    async fn test_put_and_get_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        std::fs::write(&src, "payload").unwrap();

        let mut conn = LocalConnection::new();
        conn.connect().await.unwrap();
        let remote = dir.path().join("nested/remote.txt");
        conn.put_file(&src, &remote).await.unwrap();
        let back = dir.path().join("back.txt");
        conn.get_file(&remote, &back).await.unwrap();
        assert_eq!(std::fs::read_to_string(back).unwrap(), "payload");
        conn.close().await.unwrap();
    }
}
