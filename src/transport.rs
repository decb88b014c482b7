//! Boundary to the raw transport driver.
//!
//! The driver performs the actual I/O with a physical or virtual radio. This
//! crate only relies on the contract described by [`RadioTransport`] (one open
//! channel) and [`RadioDriver`] (opening and enumerating channels).

use crate::types::{DriverVersion, RadioCookie, ResetKind};

/// Status reported by a transport driver call that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportStatus {
    #[error("device busy")]
    Busy,
    #[error("device not found")]
    NotFound,
    #[error("device gone")]
    DeviceGone,
    #[error("access denied")]
    AccessDenied,
    /// The caller's buffer is too small; `required` bytes are needed.
    #[error("buffer too small: {required} bytes required")]
    BufferTooSmall { required: usize },
    #[error("timed out")]
    Timeout,
    #[error("receive overflow")]
    ReceiveOverflow,
    /// A blocking call was interrupted by [`RadioTransport::cancel`].
    #[error("cancelled")]
    Cancelled,
    /// A blocking call was interrupted by [`RadioTransport::abort`].
    #[error("aborted")]
    Aborted,
    #[error("driver version mismatch")]
    VersionMismatch,
    #[error("out of memory")]
    OutOfMemory,
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("{0}")]
    Other(String),
}

/// Outcome of a raw read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawRead {
    /// Bytes copied into the caller's buffer
    pub delivered: usize,
    /// Bytes still pending in the transport after this read
    pub available: usize,
}

/// One open communication channel to a radio.
///
/// The channel is shared between the thread executing a command and threads
/// that want to cancel or abort it, so every method takes `&self`.
/// Dropping the value releases the channel.
pub trait RadioTransport: Send + Sync {
    /// Write a frame. Returns the number of bytes accepted.
    fn write(&self, data: &[u8]) -> Result<usize, TransportStatus>;

    /// Read into `buf`, blocking until at least one byte arrives.
    ///
    /// With an empty `buf` this must not block or consume anything; it only
    /// reports how many bytes are pending.
    fn read(&self, buf: &mut [u8]) -> Result<RawRead, TransportStatus>;

    /// Abandon the current operation. A blocked `read` returns
    /// [`TransportStatus::Cancelled`].
    fn cancel(&self) -> Result<(), TransportStatus>;

    /// Abort the current operation and discard pending input. A blocked
    /// `read` returns [`TransportStatus::Aborted`].
    fn abort(&self) -> Result<(), TransportStatus>;

    /// Reset the radio.
    fn reset(&self, kind: ResetKind) -> Result<(), TransportStatus>;

    /// Copy the characteristics block into `buf` and return its length.
    ///
    /// Fails with [`TransportStatus::BufferTooSmall`] carrying the required
    /// size when `buf` cannot hold it.
    fn characteristics(&self, buf: &mut [u8]) -> Result<usize, TransportStatus>;
}

/// Cursor movement for [`RadioDriver::enumerate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorAction {
    /// Restart at the first attached radio.
    First,
    /// Repeat the current entry (after growing the serial-number buffer).
    Same,
    /// Advance to the next entry.
    Next,
}

/// One successful enumeration step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumerationStep {
    /// A radio was found; its serial number occupies the first
    /// `serial_len` bytes of the caller's buffer.
    Radio { cookie: RadioCookie, serial_len: usize },
    /// No more radios.
    EndOfList,
}

/// Transport driver: opens channels and walks the attached radios.
pub trait RadioDriver {
    type Transport: RadioTransport;

    /// Open the radio identified by `cookie`.
    fn open(&self, cookie: RadioCookie) -> Result<Self::Transport, TransportStatus>;

    /// Move the enumeration cursor and report the entry under it.
    ///
    /// Fails with [`TransportStatus::BufferTooSmall`] when `serial` cannot hold
    /// the entry's serial number, and with [`TransportStatus::DeviceGone`] when
    /// the entry disappeared while being inspected.
    fn enumerate(
        &self,
        action: CursorAction,
        serial: &mut [u8],
    ) -> Result<EnumerationStep, TransportStatus>;

    /// Version of the driver serving the radio identified by `cookie`.
    fn driver_version(&self, cookie: RadioCookie) -> Result<DriverVersion, TransportStatus>;
}
