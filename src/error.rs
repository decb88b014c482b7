//! Error types for radio operations.
//!
//! Every fallible operation in the crate returns [`Result<T>`]. Statuses
//! reported by the transport collaborator are translated into [`RadioError`]
//! through the `From<TransportStatus>` impl below.

use crate::transport::TransportStatus;

/// Errors that can occur while driving a radio module.
#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    /// Another thread is already executing a command on this radio.
    #[error("radio is busy")]
    DeviceBusy,

    /// The requested radio does not exist.
    #[error("radio not found")]
    DeviceNotFound,

    /// The radio was detached or the session has been closed.
    #[error("radio detached")]
    DeviceDetached,

    /// The transport refused access to the radio.
    #[error("access denied")]
    AccessDenied,

    /// The supplied buffer cannot hold the result.
    ///
    /// `required` is the exact number of bytes needed.
    #[error("buffer too small: {required} bytes required")]
    BufferTooSmall { required: usize },

    /// An invalid parameter was passed to a radio operation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The command was cancelled before it completed.
    #[error("operation cancelled")]
    OperationCancelled,

    /// The command was aborted; any partial results were discarded.
    #[error("operation aborted")]
    OperationAborted,

    /// `cancel_operation`/`abort_operation` was called with no command in flight.
    #[error("no command in progress")]
    NotBusy,

    /// The radio stopped responding (transport timeout).
    #[error("radio not responding")]
    RadioNotResponding,

    /// The transport's receive buffer overflowed. The channel has been aborted.
    #[error("receive overflow")]
    ReceiveOverflow,

    /// The transport driver version is not compatible with this library.
    #[error("driver version mismatch")]
    DriverVersionMismatch,

    /// The transport could not allocate memory.
    #[error("out of memory")]
    OutOfMemory,

    /// A packet arrived out of order or was malformed.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The radio's firmware does not provide the requested feature.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// The MAC finished the command with a non-zero status.
    #[error("radio failure: MAC status 0x{mac_status:08X}")]
    RadioFailure { mac_status: u32 },

    /// Any other transport failure.
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

/// A convenience `Result` alias using [`RadioError`] as the error type.
pub type Result<T> = std::result::Result<T, RadioError>;

impl From<TransportStatus> for RadioError {
    fn from(status: TransportStatus) -> Self {
        match status {
            TransportStatus::Busy => RadioError::DeviceBusy,
            TransportStatus::NotFound => RadioError::DeviceNotFound,
            TransportStatus::DeviceGone => RadioError::DeviceDetached,
            TransportStatus::AccessDenied => RadioError::AccessDenied,
            TransportStatus::BufferTooSmall { required } => RadioError::BufferTooSmall { required },
            TransportStatus::Timeout => RadioError::RadioNotResponding,
            TransportStatus::ReceiveOverflow => RadioError::ReceiveOverflow,
            TransportStatus::Cancelled => RadioError::OperationCancelled,
            TransportStatus::Aborted => RadioError::OperationAborted,
            TransportStatus::VersionMismatch => RadioError::DriverVersionMismatch,
            TransportStatus::OutOfMemory => RadioError::OutOfMemory,
            TransportStatus::InvalidParameter(msg) => RadioError::InvalidParameter(msg),
            TransportStatus::Other(msg) => RadioError::Unexpected(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_buffer_too_small() {
        let e = RadioError::BufferTooSmall { required: 68 };
        assert_eq!(e.to_string(), "buffer too small: 68 bytes required");
    }

    #[test]
    fn error_display_radio_failure() {
        let e = RadioError::RadioFailure { mac_status: 0x0000_0101 };
        assert_eq!(e.to_string(), "radio failure: MAC status 0x00000101");
    }

    #[test]
    fn transport_status_translation() {
        assert!(matches!(RadioError::from(TransportStatus::Busy), RadioError::DeviceBusy));
        assert!(matches!(
            RadioError::from(TransportStatus::DeviceGone),
            RadioError::DeviceDetached
        ));
        assert!(matches!(
            RadioError::from(TransportStatus::Timeout),
            RadioError::RadioNotResponding
        ));
        assert!(matches!(
            RadioError::from(TransportStatus::BufferTooSmall { required: 12 }),
            RadioError::BufferTooSmall { required: 12 }
        ));
        assert!(matches!(
            RadioError::from(TransportStatus::Other("usb stall".into())),
            RadioError::Unexpected(_)
        ));
    }
}
