//! Engine error type.

use fieldsync_core::identifier::IdentifierError;
use fieldsync_core::naming::NamingError;
use fieldsync_core::{AccessError, ObjectId, RegistryError};

/// Errors produced by engine operations.
///
/// Every variant names the record and the cause, so it can be shown to the
/// operator as is.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("no object with identity '{identity}' in {domains}")]
    IdentityNotFound { identity: String, domains: String },

    #[error("{object} in {domain} has no usable configuration: {reason}")]
    InvalidConfigLinkage {
        object: ObjectId,
        domain: String,
        reason: String,
    },

    #[error("{context}: {source}")]
    RegistryWrite {
        context: String,
        #[source]
        source: RegistryError,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    NameCollisionUnresolved(#[from] NamingError),

    #[error(transparent)]
    MalformedIdentifier(#[from] IdentifierError),

    #[error("preliminary check failed: {0}")]
    PreliminaryCheck(String),

    #[error("{context}: {source}")]
    Access {
        context: String,
        #[source]
        source: AccessError,
    },

    #[error("{identifier} {reason}")]
    DeviceKindMismatch { identifier: String, reason: String },

    #[error("cancelled by operator")]
    Cancelled,
}

impl SyncError {
    pub(crate) fn write(context: impl Into<String>, source: RegistryError) -> Self {
        SyncError::RegistryWrite {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn access(context: impl Into<String>, source: AccessError) -> Self {
        SyncError::Access {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
