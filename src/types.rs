//! Types shared across the transport, stream and enumeration layers

use byteorder::{ByteOrder, LittleEndian};

use crate::error::RadioError;

/// Opaque identifier the transport driver hands out for an attached radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RadioCookie(pub u64);

/// Transport driver version, as a major/minor/maintenance/release quad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct DriverVersion {
    pub major: u16,
    pub minor: u16,
    pub maintenance: u16,
    pub release: u16,
}

/// Kind of reset requested from the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ResetKind {
    /// Restart the MAC firmware.
    Soft = 0,
    /// Restart into the firmware bootloader.
    ToBootloader = 1,
}

impl TryFrom<u32> for ResetKind {
    type Error = RadioError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ResetKind::Soft),
            1 => Ok(ResetKind::ToBootloader),
            other => Err(RadioError::InvalidParameter(format!(
                "Unknown reset kind: {}",
                other
            ))),
        }
    }
}

/// Protocol version and buffer limits reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportCharacteristics {
    pub protocol_version: u32,
    /// Largest packet the transport delivers in one read, in bytes
    pub max_inbound: u32,
    /// Largest frame the transport accepts in one write, in bytes
    pub max_outbound: u32,
}

impl TransportCharacteristics {
    /// Size of the characteristics block on the wire
    pub const WIRE_LEN: usize = 16;

    /// Decode the characteristics block
    /// (`length:u32 | protocol_version:u32 | max_inbound:u32 | max_outbound:u32`).
    pub fn decode(buf: &[u8]) -> Result<Self, RadioError> {
        if buf.len() < Self::WIRE_LEN {
            return Err(RadioError::ProtocolViolation(format!(
                "Characteristics block too short: {} bytes",
                buf.len()
            )));
        }
        let declared = LittleEndian::read_u32(&buf[0..4]) as usize;
        if declared < Self::WIRE_LEN || declared > buf.len() {
            return Err(RadioError::ProtocolViolation(format!(
                "Characteristics block declares {} bytes, got {}",
                declared,
                buf.len()
            )));
        }
        Ok(Self {
            protocol_version: LittleEndian::read_u32(&buf[4..8]),
            max_inbound: LittleEndian::read_u32(&buf[8..12]),
            max_outbound: LittleEndian::read_u32(&buf[12..16]),
        })
    }

    /// Encode into the wire block. Used by transports that synthesize it.
    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        LittleEndian::write_u32(&mut out[0..4], Self::WIRE_LEN as u32);
        LittleEndian::write_u32(&mut out[4..8], self.protocol_version);
        LittleEndian::write_u32(&mut out[8..12], self.max_inbound);
        LittleEndian::write_u32(&mut out[12..16], self.max_outbound);
        out
    }
}

/// Convert bytes to uppercase hex string
pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}
