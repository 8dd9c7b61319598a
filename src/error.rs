//! Error types for the devmem selftest harness.

use std::process::ExitStatus;
use std::time::Duration;

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Errors that can end a scenario.
///
/// `Skip` is not a defect: it marks an unmet precondition and is reported
/// separately from failures.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// A precondition is not met; the scenario is skipped.
    #[error("{0}")]
    Skip(String),

    /// The listening side never showed up in the socket table.
    #[error("port {port} not listening after {timeout:?}")]
    PortTimeout { port: u16, timeout: Duration },

    /// A background process asked to exit on its own did not.
    #[error("`{command}` did not exit within {timeout:?}")]
    ExitTimeout { command: String, timeout: Duration },

    /// A foreground command did not complete.
    #[error("`{command}` did not complete within {timeout:?}")]
    CommandTimeout { command: String, timeout: Duration },

    /// Received payload differs from the one sent.
    #[error("output mismatch: expected {expected:?}, got {actual:?}")]
    Mismatch { expected: String, actual: String },

    /// The command could not be started at all.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The command ran but exited unsuccessfully.
    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    /// No usable port was found.
    #[error("no free port after {0} attempts")]
    PortExhausted(u32),

    /// Copying the helper binary to a remote host failed.
    #[error("failed to deploy {path} to {host}: {reason}")]
    Deploy {
        path: String,
        host: String,
        reason: String,
    },

    /// A command cannot be rendered for a remote shell.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// Configuration values are present but unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Returns true if this error marks a skipped scenario.
    pub fn is_skip(&self) -> bool {
        matches!(self, HarnessError::Skip(_))
    }

    /// Returns true if a bounded wait expired.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            HarnessError::PortTimeout { .. }
                | HarnessError::ExitTimeout { .. }
                | HarnessError::CommandTimeout { .. }
        )
    }

    /// Returns the skip reason if this is a skip.
    pub fn skip_reason(&self) -> Option<&str> {
        match self {
            HarnessError::Skip(reason) => Some(reason),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_is_not_timeout() {
        let err = HarnessError::Skip("Test requires devmem support".to_string());
        assert!(err.is_skip());
        assert!(!err.is_timeout());
        assert_eq!(err.skip_reason(), Some("Test requires devmem support"));
        assert_eq!(err.to_string(), "Test requires devmem support");
    }

    #[test]
    fn test_mismatch_message_shows_both_strings() {
        let err = HarnessError::Mismatch {
            expected: "hello\nworld".to_string(),
            actual: "hello\nworlx".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains(r#""hello\nworld""#));
        assert!(msg.contains(r#""hello\nworlx""#));
        assert!(!err.is_skip());
    }

    #[test]
    fn test_port_timeout_names_port() {
        let err = HarnessError::PortTimeout {
            port: 55123,
            timeout: Duration::from_secs(5),
        };
        assert!(err.is_timeout());
        assert!(err.to_string().contains("55123"));
    }
}
