//! Serial port transport for desktop using serialport crate

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use log::debug;
use parking_lot::Mutex;
use serialport::{ClearBuffer, SerialPort, SerialPortInfo, SerialPortType};

use crate::transport::{
    CursorAction, EnumerationStep, RadioDriver, RadioTransport, RawRead, TransportStatus,
};
use crate::types::{DriverVersion, RadioCookie, ResetKind, TransportCharacteristics};

/// How often a blocked read wakes up to check for cancel/abort
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(3);
const RESET_PULSE: Duration = Duration::from_millis(100);

pub struct SerialTransport {
    /// Handle used by the reading thread
    reader: Mutex<Box<dyn SerialPort>>,
    /// Clone used for writes and out-of-band control while a read blocks
    control: Mutex<Box<dyn SerialPort>>,
    interrupt: Mutex<Option<TransportStatus>>,
    response_timeout: Duration,
    max_inbound: u32,
}

impl SerialTransport {
    pub fn new(port_name: &str, baud_rate: u32) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(POLL_INTERVAL)
            .open()?;
        std::thread::sleep(Duration::from_millis(500));
        port.clear(ClearBuffer::Input)?;
        let control = port.try_clone()?;

        Ok(Self {
            reader: Mutex::new(port),
            control: Mutex::new(control),
            interrupt: Mutex::new(None),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            max_inbound: 4096,
        })
    }

    /// How long a read may wait for the first byte before reporting a timeout
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    fn pending(&self) -> Result<usize, TransportStatus> {
        self.control
            .lock()
            .bytes_to_read()
            .map(|n| n as usize)
            .map_err(serial_status)
    }
}

fn io_status(e: std::io::Error) -> TransportStatus {
    match e.kind() {
        std::io::ErrorKind::PermissionDenied => TransportStatus::AccessDenied,
        std::io::ErrorKind::NotFound => TransportStatus::NotFound,
        std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::NotConnected => {
            TransportStatus::DeviceGone
        }
        std::io::ErrorKind::TimedOut => TransportStatus::Timeout,
        std::io::ErrorKind::OutOfMemory => TransportStatus::OutOfMemory,
        _ => TransportStatus::Other(e.to_string()),
    }
}

fn serial_status(e: serialport::Error) -> TransportStatus {
    match e.kind() {
        serialport::ErrorKind::NoDevice => TransportStatus::DeviceGone,
        serialport::ErrorKind::InvalidInput => TransportStatus::InvalidParameter(e.description),
        serialport::ErrorKind::Io(kind) => io_status(std::io::Error::new(kind, e.description)),
        serialport::ErrorKind::Unknown => TransportStatus::Other(e.description),
    }
}

impl RadioTransport for SerialTransport {
    fn write(&self, data: &[u8]) -> Result<usize, TransportStatus> {
        *self.interrupt.lock() = None;
        self.control.lock().write_all(data).map_err(io_status)?;
        Ok(data.len())
    }

    fn read(&self, buf: &mut [u8]) -> Result<RawRead, TransportStatus> {
        if buf.is_empty() {
            return Ok(RawRead {
                delivered: 0,
                available: self.pending()?,
            });
        }

        let mut port = self.reader.lock();
        let deadline = Instant::now() + self.response_timeout;
        loop {
            if let Some(status) = self.interrupt.lock().take() {
                return Err(status);
            }
            match port.read(buf) {
                Ok(0) => {}
                Ok(delivered) => {
                    return Ok(RawRead {
                        delivered,
                        available: self.pending().unwrap_or(0),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => return Err(io_status(e)),
            }
            if Instant::now() >= deadline {
                return Err(TransportStatus::Timeout);
            }
        }
    }

    fn cancel(&self) -> Result<(), TransportStatus> {
        *self.interrupt.lock() = Some(TransportStatus::Cancelled);
        Ok(())
    }

    fn abort(&self) -> Result<(), TransportStatus> {
        *self.interrupt.lock() = Some(TransportStatus::Aborted);
        self.control
            .lock()
            .clear(ClearBuffer::All)
            .map_err(serial_status)
    }

    fn reset(&self, kind: ResetKind) -> Result<(), TransportStatus> {
        let mut port = self.control.lock();
        // RTS held during the DTR pulse selects the bootloader
        port.write_request_to_send(kind == ResetKind::ToBootloader)
            .map_err(serial_status)?;
        port.write_data_terminal_ready(false).map_err(serial_status)?;
        std::thread::sleep(RESET_PULSE);
        port.write_data_terminal_ready(true).map_err(serial_status)?;
        port.write_request_to_send(false).map_err(serial_status)?;
        port.clear(ClearBuffer::All).map_err(serial_status)
    }

    fn characteristics(&self, buf: &mut [u8]) -> Result<usize, TransportStatus> {
        if buf.len() < TransportCharacteristics::WIRE_LEN {
            return Err(TransportStatus::BufferTooSmall {
                required: TransportCharacteristics::WIRE_LEN,
            });
        }
        let block = TransportCharacteristics {
            protocol_version: 1,
            max_inbound: self.max_inbound,
            max_outbound: 512,
        }
        .encode();
        buf[..block.len()].copy_from_slice(&block);
        Ok(block.len())
    }
}

/// Enumerates USB serial adapters and opens them as radios.
pub struct SerialDriver {
    baud_rate: u32,
    ports: Mutex<Vec<SerialPortInfo>>,
    cursor: Mutex<usize>,
}

impl SerialDriver {
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            ports: Mutex::new(Vec::new()),
            cursor: Mutex::new(0),
        }
    }

    fn port_name(&self, cookie: RadioCookie) -> Result<String, TransportStatus> {
        self.ports
            .lock()
            .get(cookie.0 as usize)
            .map(|info| info.port_name.clone())
            .ok_or(TransportStatus::NotFound)
    }
}

impl RadioDriver for SerialDriver {
    type Transport = SerialTransport;

    fn open(&self, cookie: RadioCookie) -> Result<Self::Transport, TransportStatus> {
        let name = self.port_name(cookie)?;
        debug!("Opening {} at {} baud", name, self.baud_rate);
        SerialTransport::new(&name, self.baud_rate).map_err(serial_status)
    }

    fn enumerate(
        &self,
        action: CursorAction,
        serial: &mut [u8],
    ) -> Result<EnumerationStep, TransportStatus> {
        let mut cursor = self.cursor.lock();
        match action {
            CursorAction::First => {
                let usb_ports = serialport::available_ports()
                    .map_err(serial_status)?
                    .into_iter()
                    .filter(|p| matches!(p.port_type, SerialPortType::UsbPort(_)))
                    .collect();
                *self.ports.lock() = usb_ports;
                *cursor = 0;
            }
            CursorAction::Same => {}
            CursorAction::Next => *cursor += 1,
        }

        let ports = self.ports.lock();
        let Some(info) = ports.get(*cursor) else {
            return Ok(EnumerationStep::EndOfList);
        };
        let serial_number = match &info.port_type {
            SerialPortType::UsbPort(usb) => usb
                .serial_number
                .clone()
                .unwrap_or_else(|| info.port_name.clone()),
            _ => info.port_name.clone(),
        };
        let bytes = serial_number.as_bytes();
        if bytes.len() > serial.len() {
            return Err(TransportStatus::BufferTooSmall {
                required: bytes.len(),
            });
        }
        serial[..bytes.len()].copy_from_slice(bytes);
        Ok(EnumerationStep::Radio {
            cookie: RadioCookie(*cursor as u64),
            serial_len: bytes.len(),
        })
    }

    fn driver_version(&self, cookie: RadioCookie) -> Result<DriverVersion, TransportStatus> {
        let name = self.port_name(cookie)?;
        if !std::path::Path::new(&name).exists() && cfg!(unix) {
            return Err(TransportStatus::DeviceGone);
        }
        Ok(DriverVersion {
            major: env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
            minor: env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
            maintenance: env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0),
            release: 0,
        })
    }
}
