//! Unified error types for the Nexus workspace.
//!
//! Lower layers return the most specific variant they can. The orchestrator
//! wraps errors in [`NexusError::Context`] to name the operation and node,
//! and [`NexusError::kind`] looks through that wrapper so a resource or
//! cleanup failure is never reported as something milder.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum NexusError {
    /// The request was rejected before any OS action was taken.
    #[error("invalid node configuration: {message}")]
    Validation {
        /// Description of the invalid input.
        message: String,
    },

    /// Cgroup, namespace, or mount setup failed. Partial state may exist.
    #[error("resource setup failed for node {node} during {stage}: {message}")]
    ResourceSetup {
        /// Node being set up.
        node: String,
        /// Setup step that failed (e.g. `cgroup`, `mount /proc`).
        stage: &'static str,
        /// Description of the failure.
        message: String,
    },

    /// Spawning or exec'ing the node process failed after resources were allocated.
    #[error("launch failed for node {node}: {message}")]
    Launch {
        /// Node being launched.
        node: String,
        /// Description of the failure.
        message: String,
    },

    /// A failure was followed by a failed cleanup. Resources have leaked.
    #[error(
        "{original}; cleanup of node {node} also failed, manual remediation required: {cleanup}"
    )]
    Cleanup {
        /// Node whose resources could not be released.
        node: String,
        /// The error that triggered the cleanup.
        original: Box<NexusError>,
        /// The error raised by the cleanup itself.
        cleanup: Box<NexusError>,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A node with the same ID is already tracked.
    #[error("node {id} already exists")]
    AlreadyExists {
        /// The conflicting node ID.
        id: String,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The parent/init handshake broke its framing or sequencing.
    #[error("init protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// An error annotated with the operation and node it belongs to.
    #[error("failed to {operation} node {node}: {source}")]
    Context {
        /// Operation that failed (e.g. `create`, `stop`).
        operation: &'static str,
        /// Node the operation targeted.
        node: String,
        /// The wrapped error.
        source: Box<NexusError>,
    },
}

/// Classification of a [`NexusError`], independent of added context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input, no OS side effect.
    Validation,
    /// Cgroup, namespace, or mount creation failed.
    ResourceSetup,
    /// Process spawn or exec failed.
    Launch,
    /// Cleanup after a failure also failed.
    Cleanup,
    /// Unknown node or resource.
    NotFound,
    /// Duplicate node ID.
    AlreadyExists,
    /// Plain I/O failure.
    Io,
    /// Init handshake violation.
    Protocol,
    /// Encoding or decoding failure.
    Serialization,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validation => "validation",
            Self::ResourceSetup => "resource-setup",
            Self::Launch => "launch",
            Self::Cleanup => "cleanup",
            Self::NotFound => "not-found",
            Self::AlreadyExists => "already-exists",
            Self::Io => "io",
            Self::Protocol => "protocol",
            Self::Serialization => "serialization",
        };
        f.write_str(name)
    }
}

impl NexusError {
    /// Shorthand for a [`NexusError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Builds a double-fault error from the original failure and the failed cleanup.
    pub fn double_fault(node: impl Into<String>, original: Self, cleanup: Self) -> Self {
        Self::Cleanup {
            node: node.into(),
            original: Box::new(original),
            cleanup: Box::new(cleanup),
        }
    }

    /// Wraps this error with the operation and node it belongs to.
    #[must_use]
    pub fn context(self, operation: &'static str, node: impl Into<String>) -> Self {
        Self::Context {
            operation,
            node: node.into(),
            source: Box::new(self),
        }
    }

    /// Returns the classification of this error, looking through context.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::ResourceSetup { .. } => ErrorKind::ResourceSetup,
            Self::Launch { .. } => ErrorKind::Launch,
            Self::Cleanup { .. } => ErrorKind::Cleanup,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::Io { .. } => ErrorKind::Io,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::Serialization { .. } => ErrorKind::Serialization,
            Self::Context { source, .. } => source.kind(),
        }
    }

    /// Returns `true` when a failure was followed by a failed cleanup.
    pub fn is_double_fault(&self) -> bool {
        self.kind() == ErrorKind::Cleanup
    }

    /// Returns the error that triggered a failed cleanup, if this is a double fault.
    pub fn original(&self) -> Option<&Self> {
        match self {
            Self::Cleanup { original, .. } => Some(original),
            Self::Context { source, .. } => source.original(),
            _ => None,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, NexusError>;
