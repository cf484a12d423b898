//! Connection transports.
//!
//! A [`ConnectionHandler`] runs commands and moves files on one host. The
//! task executor opens one connection per task invocation and closes it when
//! the task is done. Transports are looked up by name in the plugin
//! registry; `smart` resolves to `ssh`, except for the control node which
//! uses `local`.
//!
//! # Example
//!
//! ```rust,no_run
//! use playengine::connection::{ConnectionHandler, LocalConnection};
//!
//! # async fn example() -> playengine::connection::ConnectionResult<()> {
//! let mut conn = LocalConnection::new();
//! conn.connect().await?;
//! let out = conn.execute(&["echo".into(), "hello".into()], None).await?;
//! assert_eq!(out.stdout.trim(), "hello");
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "local")]
pub mod local;
pub mod ssh;

#[cfg(feature = "local")]
pub use local::LocalConnection;
pub use ssh::SshConnection;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by a transport. The executor reports them as an
/// unreachable host.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Failed to establish the connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The command could not be started or waited on. A non-zero exit code
    /// is not an error.
    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    /// File upload or download failed.
    #[error("File transfer failed: {0}")]
    TransferFailed(String),

    /// The operation timed out.
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    /// An operation was attempted before `connect`.
    #[error("Connection is not open")]
    NotConnected,

    /// No transport is registered under this name.
    #[error("Unsupported connection type: {0}")]
    UnsupportedTransport(String),

    /// I/O error during connection operations.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Outcome of one command.
///
/// # Example
///
/// ```rust
/// use playengine::connection::CommandResult;
///
/// let ok = CommandResult::new(0, "hi\n", "");
/// assert!(ok.success());
/// assert_eq!(ok.stdout_lines(), vec!["hi"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Exit code; -1 when the process was killed by a signal
    pub rc: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn new(rc: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            rc,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.rc == 0
    }

    pub fn stdout_lines(&self) -> Vec<String> {
        self.stdout.lines().map(str::to_string).collect()
    }

    /// Get the combined output (stdout + stderr)
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// A transport to one host.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    /// Transport name, e.g. `local` or `ssh`.
    fn transport(&self) -> &str;

    /// Open the connection.
    async fn connect(&mut self) -> ConnectionResult<()>;

    /// Close the connection. Closing twice is not an error.
    async fn close(&mut self) -> ConnectionResult<()>;

    /// Run an argument vector, optionally feeding `stdin`.
    async fn execute(&self, cmd: &[String], stdin: Option<&str>) -> ConnectionResult<CommandResult>;

    /// Copy a control-node file to the host.
    async fn put_file(&self, local: &Path, remote: &Path) -> ConnectionResult<()>;

    /// Copy a host file to the control node.
    async fn get_file(&self, remote: &Path, local: &Path) -> ConnectionResult<()>;
}

/// Wrap an argument vector for privilege escalation.
pub fn become_command(cmd: &[String], method: &str, user: Option<&str>, flags: Option<&str>) -> Vec<String> {
    let user = user.unwrap_or("root").to_string();
    let mut wrapped: Vec<String> = match method {
        "su" => {
            let line = shell_words::join(cmd);
            return vec!["su".into(), "-".into(), user, "-c".into(), line];
        }
        "doas" => vec!["doas".into(), "-u".into(), user],
        _ => vec!["sudo".into(), "-H".into(), "-n".into(), "-u".into(), user],
    };
    if let Some(flags) = flags {
        wrapped.extend(shell_words::split(flags).unwrap_or_default());
    }
    if method != "doas" {
        wrapped.push("--".into());
    }
    wrapped.extend(cmd.iter().cloned());
    wrapped
}
