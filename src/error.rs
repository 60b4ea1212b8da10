//! Error taxonomy for stream acquisition and detector configuration.
//!
//! Acquisition failures are surfaced to the caller after the broker has rolled
//! back all partial state; nothing in this crate is fatal to the process.

use thiserror::Error;

use crate::stream::StreamKind;

/// Errors surfaced by a stream acquisition transaction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AcquireError {
    /// The user (or platform policy) refused access to the device.
    #[error("permission denied for {kind}")]
    PermissionDenied { kind: StreamKind },

    /// No device backing this kind exists or it cannot be opened.
    #[error("device unavailable for {kind}")]
    DeviceUnavailable { kind: StreamKind },

    /// The device exists but is exclusively held outside this process.
    #[error("device busy for {kind}")]
    DeviceBusy { kind: StreamKind },

    /// A request must name at least one stream kind.
    #[error("requested stream set is empty")]
    EmptyRequest,
}

impl AcquireError {
    /// The stream kind the failure relates to, if any.
    pub fn kind(&self) -> Option<StreamKind> {
        match self {
            Self::PermissionDenied { kind }
            | Self::DeviceUnavailable { kind }
            | Self::DeviceBusy { kind } => Some(*kind),
            Self::EmptyRequest => None,
        }
    }
}

/// Rejected similarity-threshold updates. The previous value is retained.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum ThresholdError {
    #[error("threshold {value} is outside [0.0, 1.0]")]
    OutOfRange { value: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_error_reports_kind() {
        let err = AcquireError::PermissionDenied {
            kind: StreamKind::Microphone,
        };
        assert_eq!(err.kind(), Some(StreamKind::Microphone));
        assert_eq!(AcquireError::EmptyRequest.kind(), None);
    }

    #[test]
    fn acquire_error_messages_name_the_kind() {
        let err = AcquireError::DeviceUnavailable {
            kind: StreamKind::Camera,
        };
        assert_eq!(err.to_string(), "device unavailable for camera");
    }
}
