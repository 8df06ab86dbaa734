//! Error taxonomy for store access and reconciliation.
//!
//! Every failure a reconcile can hit maps onto an [`ErrorKind`]. The controller
//! only looks at the kind: benign kinds are absorbed by the reconciler, every
//! other kind is retried with backoff.

use thiserror::Error;

use crate::meta::{ObjectKey, Uid};

/// Core error type for kron operations.
#[derive(Debug, Error)]
pub enum Error {
    // Store outcomes
    #[error("{kind} '{key}' not found")]
    NotFound { kind: String, key: ObjectKey },

    #[error("{kind} '{key}' already exists")]
    AlreadyExists { kind: String, key: ObjectKey },

    #[error("conflict writing '{key}': {reason}")]
    Conflict { key: ObjectKey, reason: String },

    #[error("store operation '{operation}' failed: {reason}")]
    Transient { operation: String, reason: String },

    // Owner links and type resolution
    #[error("type '{type_name}' is not registered")]
    UnresolvedType { type_name: String },

    #[error("owner '{key}' is being deleted, refusing to attach children")]
    OwnerTerminating { key: ObjectKey },

    #[error("'{key}' is already controlled by {owner_kind} '{owner_name}' ({owner_uid})")]
    AlreadyOwned {
        key: ObjectKey,
        owner_kind: String,
        owner_name: String,
        owner_uid: Uid,
    },

    #[error("invalid object: {reason}")]
    Invalid { reason: String },

    // Lifecycle
    #[error("operation cancelled by shutdown")]
    Cancelled,

    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification used by retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Object is gone. Benign for reads of the owner.
    NotFound,
    /// Create raced with another create. Benign.
    AlreadyExists,
    /// Optimistic write lost a race.
    Conflict,
    /// Store unavailable, timed out, or similar.
    Transient,
    /// Malformed object or unresolvable reference. May clear on its own.
    Invalid,
    /// Shutdown in progress.
    Cancelled,
    /// Startup misconfiguration.
    Config,
}

impl Error {
    /// Create a not found error.
    pub fn not_found(kind: impl Into<String>, key: ObjectKey) -> Self {
        Self::NotFound {
            kind: kind.into(),
            key,
        }
    }

    /// Create an already exists error.
    pub fn already_exists(kind: impl Into<String>, key: ObjectKey) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            key,
        }
    }

    /// Create a conflict error.
    pub fn conflict(key: ObjectKey, reason: impl Into<String>) -> Self {
        Self::Conflict {
            key,
            reason: reason.into(),
        }
    }

    /// Create a transient store error.
    pub fn transient(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create an unresolved type error.
    pub fn unresolved_type(type_name: impl Into<String>) -> Self {
        Self::UnresolvedType {
            type_name: type_name.into(),
        }
    }

    /// Create an invalid object error.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// Classify this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Transient { .. } | Self::Io(_) => ErrorKind::Transient,
            Self::UnresolvedType { .. }
            | Self::OwnerTerminating { .. }
            | Self::AlreadyOwned { .. }
            | Self::Invalid { .. }
            | Self::Serialization { .. } => ErrorKind::Invalid,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config { .. } => ErrorKind::Config,
        }
    }

    /// True for [`ErrorKind::NotFound`].
    pub const fn is_not_found(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotFound)
    }

    /// True for [`ErrorKind::AlreadyExists`].
    pub const fn is_already_exists(&self) -> bool {
        matches!(self.kind(), ErrorKind::AlreadyExists)
    }

    /// True for [`ErrorKind::Conflict`].
    pub const fn is_conflict(&self) -> bool {
        matches!(self.kind(), ErrorKind::Conflict)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::AlreadyExists => write!(f, "already_exists"),
            Self::Conflict => write!(f, "conflict"),
            Self::Transient => write!(f, "transient"),
            Self::Invalid => write!(f, "invalid"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Config => write!(f, "config"),
        }
    }
}
