//! Error types for the mock deployment and the client command path.

use std::fmt;
use thiserror::Error;

/// Transport-level failures raised by a [`Deployment`](crate::Deployment).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeploymentError {
    /// The response queue was empty when a command arrived. This is a
    /// scenario authoring bug, never a simulated server failure.
    #[error(
        "mock deployment exhausted: no queued response for '{command_name}' (command #{received})"
    )]
    ExhaustedResponses {
        /// Name of the command that found the queue empty
        command_name: String,
        /// How many commands the deployment had received, including this one
        received: u64,
    },
}

/// A single write error reported inside an otherwise successful reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteError {
    /// Index of the offending document within the write batch
    pub index: i32,
    /// Server error code
    pub code: i32,
    /// Human-readable message
    pub message: String,
}

/// All write errors decoded from one reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFailure {
    pub errors: Vec<WriteError>,
}

impl WriteFailure {
    /// Codes of every write error, in reply order.
    pub fn codes(&self) -> Vec<i32> {
        self.errors.iter().map(|e| e.code).collect()
    }

    pub fn has_code(&self, code: i32) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }
}

impl fmt::Display for WriteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "write errors: [")?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(
                f,
                "{{index: {}, code: {}, message: {}}}",
                err.index, err.code, err.message
            )?;
        }
        write!(f, "]")
    }
}

/// A command the server rejected outright (`ok: 0`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandError {
    pub code: i32,
    pub code_name: Option<String>,
    pub message: String,
    pub labels: Vec<String>,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code_name {
            Some(name) => write!(f, "({}) {} [code {}]", name, self.message, self.code),
            None => write!(f, "{} [code {}]", self.message, self.code),
        }
    }
}

/// Operation-level errors surfaced to callers of the client path.
#[derive(Debug, Error)]
pub enum Error {
    /// The deployment failed to produce a reply.
    #[error(transparent)]
    Deployment(#[from] DeploymentError),

    /// The reply succeeded at the transport level but carried write errors.
    #[error("{0}")]
    Write(WriteFailure),

    /// The server answered with `ok: 0`.
    #[error("command failed: {0}")]
    Command(CommandError),

    /// The reply did not have the shape the operation expected.
    #[error("malformed reply: {0}")]
    MalformedReply(String),

    /// The caller passed arguments the operation cannot send.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Whether this error was caused by running out of queued responses.
    pub fn is_exhausted(&self) -> bool {
        matches!(
            self,
            Error::Deployment(DeploymentError::ExhaustedResponses { .. })
        )
    }

    /// Server error codes carried by this error, if any.
    pub fn codes(&self) -> Vec<i32> {
        match self {
            Error::Write(failure) => failure.codes(),
            Error::Command(err) => vec![err.code],
            _ => Vec::new(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_failure_display_includes_codes() {
        let failure = WriteFailure {
            errors: vec![WriteError {
                index: 0,
                code: 20,
                message: "Not transaction numbers".to_string(),
            }],
        };
        let text = Error::Write(failure).to_string();
        assert!(text.contains("code: 20"));
        assert!(text.contains("Not transaction numbers"));
    }

    #[test]
    fn test_exhausted_is_distinguishable() {
        let err: Error = DeploymentError::ExhaustedResponses {
            command_name: "insert".to_string(),
            received: 3,
        }
        .into();
        assert!(err.is_exhausted());
        assert!(err.codes().is_empty());
        assert!(err.to_string().contains("command #3"));

        let cmd = Error::Command(CommandError {
            code: 11600,
            code_name: Some("InterruptedAtShutdown".to_string()),
            message: "shutting down".to_string(),
            labels: vec![],
        });
        assert!(!cmd.is_exhausted());
        assert_eq!(cmd.codes(), vec![11600]);
    }
}
