//! Error types for the GATT link

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::protocol::GattStatus;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors surfaced through the continuation of a failed operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// The transport reported a non-success status for this operation
    #[error("{tag} failed with status {status}")]
    Status { tag: &'static str, status: GattStatus },

    /// The link dropped while this operation was queued or in flight
    #[error("connection lost")]
    LostConnection,

    /// The awaited operation did not resolve before its deadline. The
    /// in-flight transport request is not cancelled; a late completion is
    /// absorbed silently.
    #[error("{tag} timed out after {after:?}")]
    Timeout { tag: &'static str, after: Duration },

    /// The characteristic has no client-characteristic-configuration
    /// descriptor, so notifications cannot be configured on it
    #[error("characteristic {characteristic} has no client configuration descriptor")]
    DescriptorNotFound { characteristic: Uuid },

    /// A completion arrived from the transport with no operation
    /// outstanding. Either a platform bug or queue corruption; logged
    /// loudly and recovered from.
    #[error("completion {event} arrived with no operation outstanding")]
    ProtocolViolation { event: &'static str },

    /// The transport refused to even begin the operation
    #[error("transport refused to issue {tag}")]
    IssueFailed { tag: &'static str },

    /// Connect called while earlier operations are still queued or in flight
    #[error("connect rejected: {pending} operations still outstanding")]
    Busy { pending: usize },

    /// The link was closed, or the driver task is gone
    #[error("link closed")]
    Closed,
}

impl LinkError {
    /// Build a status error for the given operation tag, or `Ok(())` when
    /// the status denotes success.
    pub fn check(tag: &'static str, status: GattStatus) -> Result<()> {
        if status.is_success() {
            Ok(())
        } else {
            Err(LinkError::Status { tag, status })
        }
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, LinkError>;
