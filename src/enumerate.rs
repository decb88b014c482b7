//! Radio enumeration.
//!
//! [`RadioEnumeration::discover`] walks the driver's radio list with an
//! explicit cursor. [`RadioEnumeration::encode_into`] serializes the result
//! into the caller's buffer:
//!
//! ```text
//! envelope  length:u32 (=16) | total_length:u32 | count:u32 | table_offset:u32
//! table     count x record_offset:u32
//! records   info_length:u32 (=24) | cookie:u64 | driver_version:4 x u16 |
//!           serial_length:u32 | serial bytes, zero-padded to 4 bytes
//! ```
//!
//! When the buffer is too small, `total_length` is overwritten with the exact
//! size needed so the caller can probe with an envelope-sized buffer first.

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};

use crate::config::RadioConfig;
use crate::error::{RadioError, Result};
use crate::transport::{CursorAction, EnumerationStep, RadioDriver, TransportStatus};
use crate::types::{DriverVersion, RadioCookie, bytes_to_hex};

pub const ENVELOPE_LEN: usize = 16;
pub const RECORD_INFO_LEN: usize = 24;
const ALIGNMENT: usize = 4;

/// One attached radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioInfo {
    pub cookie: RadioCookie,
    pub serial_number: Vec<u8>,
    pub driver_version: DriverVersion,
}

impl RadioInfo {
    pub fn serial_string(&self) -> String {
        String::from_utf8_lossy(&self.serial_number).to_string()
    }

    fn record_len(&self) -> usize {
        RECORD_INFO_LEN + self.serial_number.len().next_multiple_of(ALIGNMENT)
    }
}

/// Position in the driver's radio list plus the serial-number scratch buffer.
struct EnumerationCursor {
    action: CursorAction,
    serial: Vec<u8>,
}

impl EnumerationCursor {
    fn new(serial_capacity: usize) -> Self {
        Self {
            action: CursorAction::First,
            serial: vec![0u8; serial_capacity],
        }
    }

    /// Grow the serial buffer to `required` bytes and retry the same entry.
    fn grow(&mut self, required: usize) -> Result<()> {
        if required <= self.serial.len() {
            return Err(RadioError::ProtocolViolation(format!(
                "Driver asked for a {} byte serial buffer but already had {}",
                required,
                self.serial.len()
            )));
        }
        self.serial.resize(required, 0);
        self.action = CursorAction::Same;
        Ok(())
    }
}

/// Radios found by one enumeration pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RadioEnumeration {
    radios: Vec<RadioInfo>,
}

impl RadioEnumeration {
    pub fn new(radios: Vec<RadioInfo>) -> Self {
        Self { radios }
    }

    /// Walk every radio the driver reports.
    ///
    /// Radios that vanish mid-walk or whose driver version cannot be read are
    /// skipped; allocation failures end the walk.
    pub fn discover<D: RadioDriver>(driver: &D, serial_capacity: usize) -> Result<Self> {
        let mut cursor = EnumerationCursor::new(serial_capacity);
        let mut radios = Vec::new();

        loop {
            match driver.enumerate(cursor.action, &mut cursor.serial) {
                Ok(EnumerationStep::EndOfList) => break,
                Ok(EnumerationStep::Radio { cookie, serial_len }) => {
                    if serial_len > cursor.serial.len() {
                        return Err(RadioError::ProtocolViolation(format!(
                            "Serial number of {} bytes overruns {} byte buffer",
                            serial_len,
                            cursor.serial.len()
                        )));
                    }
                    let serial_number = cursor.serial[..serial_len].to_vec();
                    match driver.driver_version(cookie) {
                        Ok(driver_version) => {
                            debug!(
                                "Found radio {:?} serial {}",
                                cookie,
                                bytes_to_hex(&serial_number)
                            );
                            radios.push(RadioInfo {
                                cookie,
                                serial_number,
                                driver_version,
                            });
                        }
                        Err(TransportStatus::OutOfMemory) => return Err(RadioError::OutOfMemory),
                        Err(status) => warn!(
                            "Skipping radio {:?} serial {}: driver version query failed: {}",
                            cookie,
                            bytes_to_hex(&serial_number),
                            status
                        ),
                    }
                    cursor.action = CursorAction::Next;
                }
                Err(TransportStatus::BufferTooSmall { required }) => cursor.grow(required)?,
                Err(TransportStatus::DeviceGone) => {
                    debug!("Radio disappeared during enumeration, skipping");
                    cursor.action = CursorAction::Next;
                }
                Err(TransportStatus::OutOfMemory) => return Err(RadioError::OutOfMemory),
                Err(status) => {
                    return Err(RadioError::ProtocolViolation(format!(
                        "Unexpected enumeration status: {}",
                        status
                    )));
                }
            }
        }

        Ok(Self { radios })
    }

    pub fn radios(&self) -> &[RadioInfo] {
        &self.radios
    }

    pub fn len(&self) -> usize {
        self.radios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.radios.is_empty()
    }

    /// Exact number of bytes [`encode_into`](Self::encode_into) needs
    pub fn encoded_len(&self) -> usize {
        self.table_len() + self.radios.iter().map(RadioInfo::record_len).sum::<usize>()
    }

    fn table_len(&self) -> usize {
        ENVELOPE_LEN + 4 * self.radios.len()
    }

    /// Serialize into `buf`, returning the bytes written.
    ///
    /// Fails with [`RadioError::BufferTooSmall`] when `buf` is too short; if
    /// `buf` can hold the envelope, its `total_length` then carries the
    /// required size.
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<usize> {
        let required = self.encoded_len();
        if buf.len() < required {
            if buf.len() >= ENVELOPE_LEN {
                LittleEndian::write_u32(&mut buf[0..4], ENVELOPE_LEN as u32);
                LittleEndian::write_u32(&mut buf[4..8], required as u32);
                LittleEndian::write_u32(&mut buf[8..12], 0);
                LittleEndian::write_u32(&mut buf[12..16], 0);
            }
            return Err(RadioError::BufferTooSmall { required });
        }

        LittleEndian::write_u32(&mut buf[0..4], ENVELOPE_LEN as u32);
        LittleEndian::write_u32(&mut buf[4..8], required as u32);
        LittleEndian::write_u32(&mut buf[8..12], self.radios.len() as u32);
        LittleEndian::write_u32(&mut buf[12..16], ENVELOPE_LEN as u32);

        let mut offset = self.table_len();
        for (index, radio) in self.radios.iter().enumerate() {
            let slot = ENVELOPE_LEN + 4 * index;
            LittleEndian::write_u32(&mut buf[slot..slot + 4], offset as u32);

            let record = &mut buf[offset..offset + radio.record_len()];
            LittleEndian::write_u32(&mut record[0..4], RECORD_INFO_LEN as u32);
            LittleEndian::write_u64(&mut record[4..12], radio.cookie.0);
            let version = radio.driver_version;
            LittleEndian::write_u16(&mut record[12..14], version.major);
            LittleEndian::write_u16(&mut record[14..16], version.minor);
            LittleEndian::write_u16(&mut record[16..18], version.maintenance);
            LittleEndian::write_u16(&mut record[18..20], version.release);
            LittleEndian::write_u32(&mut record[20..24], radio.serial_number.len() as u32);

            let serial_end = RECORD_INFO_LEN + radio.serial_number.len();
            record[RECORD_INFO_LEN..serial_end].copy_from_slice(&radio.serial_number);
            record[serial_end..].fill(0);

            offset += radio.record_len();
        }
        Ok(required)
    }

    /// Parse a buffer produced by [`encode_into`](Self::encode_into).
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let malformed = |what: &str| RadioError::ProtocolViolation(format!("Malformed enumeration: {}", what));

        if buf.len() < ENVELOPE_LEN {
            return Err(malformed("envelope truncated"));
        }
        let total = LittleEndian::read_u32(&buf[4..8]) as usize;
        let count = LittleEndian::read_u32(&buf[8..12]) as usize;
        let table = LittleEndian::read_u32(&buf[12..16]) as usize;
        if total > buf.len() || table + 4 * count > total {
            return Err(malformed("lengths exceed buffer"));
        }

        let mut radios = Vec::with_capacity(count);
        for index in 0..count {
            let slot = table + 4 * index;
            let offset = LittleEndian::read_u32(&buf[slot..slot + 4]) as usize;
            if offset + RECORD_INFO_LEN > total {
                return Err(malformed("record offset out of range"));
            }
            let record = &buf[offset..total];
            let serial_len = LittleEndian::read_u32(&record[20..24]) as usize;
            if RECORD_INFO_LEN + serial_len > record.len() {
                return Err(malformed("serial number out of range"));
            }
            radios.push(RadioInfo {
                cookie: RadioCookie(LittleEndian::read_u64(&record[4..12])),
                driver_version: DriverVersion {
                    major: LittleEndian::read_u16(&record[12..14]),
                    minor: LittleEndian::read_u16(&record[14..16]),
                    maintenance: LittleEndian::read_u16(&record[16..18]),
                    release: LittleEndian::read_u16(&record[18..20]),
                },
                serial_number: record[RECORD_INFO_LEN..RECORD_INFO_LEN + serial_len].to_vec(),
            });
        }
        Ok(Self { radios })
    }
}

/// Enumerate every radio behind `driver` and serialize the result into `buf`.
///
/// Serial numbers are first read into a buffer of
/// `config.initial_serial_capacity` bytes. The whole walk runs even when `buf`
/// turns out too small, so the [`RadioError::BufferTooSmall`] it returns
/// always carries the exact size.
pub fn enumerate_radios<D: RadioDriver>(
    driver: &D,
    config: &RadioConfig,
    buf: &mut [u8],
) -> Result<usize> {
    RadioEnumeration::discover(driver, config.initial_serial_capacity)?.encode_into(buf)
}
