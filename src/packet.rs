//! Inbound packet framing.
//!
//! Every packet starts with an 8-byte common header:
//!
//! ```text
//! +---------+-------+-----------+------------+-----------+
//! | version | flags | type: u16 | words: u16 | status:u16|
//! +---------+-------+-----------+------------+-----------+
//! ```
//!
//! followed by `words * 4` body bytes. All fields are little-endian.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{RadioError, Result};

/// Size of the common packet header
pub const HEADER_LEN: usize = 8;

/// The only header version this crate understands
pub const PACKET_VERSION: u8 = 1;

/// Packet type tag carried in the common header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    CommandBegin,
    CommandEnd,
    AntennaCycleBegin,
    AntennaBegin,
    AntennaEnd,
    AntennaCycleEnd,
    Inventory,
    TagAccess,
    InventoryCycleBegin,
    InventoryCycleEnd,
    CarrierInfo,
    NonCriticalFault,
    RegisterRead,
    GpioRead,
    OemConfigRead,
    NvMemUpdateConfig,
    LinkProfileRegisterRead,
    /// Any type this crate does not know about; forwarded unchanged.
    Other(u16),
}

impl PacketType {
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            0x0000 => PacketType::CommandBegin,
            0x0001 => PacketType::CommandEnd,
            0x0002 => PacketType::AntennaCycleBegin,
            0x0003 => PacketType::AntennaBegin,
            0x0004 => PacketType::AntennaEnd,
            0x0005 => PacketType::AntennaCycleEnd,
            0x0006 => PacketType::Inventory,
            0x0007 => PacketType::TagAccess,
            0x0008 => PacketType::InventoryCycleBegin,
            0x0009 => PacketType::InventoryCycleEnd,
            0x000A => PacketType::CarrierInfo,
            0x000B => PacketType::NonCriticalFault,
            0x3000 => PacketType::RegisterRead,
            0x3001 => PacketType::GpioRead,
            0x3002 => PacketType::OemConfigRead,
            0x3003 => PacketType::NvMemUpdateConfig,
            0x3004 => PacketType::LinkProfileRegisterRead,
            other => PacketType::Other(other),
        }
    }

    pub fn to_raw(self) -> u16 {
        match self {
            PacketType::CommandBegin => 0x0000,
            PacketType::CommandEnd => 0x0001,
            PacketType::AntennaCycleBegin => 0x0002,
            PacketType::AntennaBegin => 0x0003,
            PacketType::AntennaEnd => 0x0004,
            PacketType::AntennaCycleEnd => 0x0005,
            PacketType::Inventory => 0x0006,
            PacketType::TagAccess => 0x0007,
            PacketType::InventoryCycleBegin => 0x0008,
            PacketType::InventoryCycleEnd => 0x0009,
            PacketType::CarrierInfo => 0x000A,
            PacketType::NonCriticalFault => 0x000B,
            PacketType::RegisterRead => 0x3000,
            PacketType::GpioRead => 0x3001,
            PacketType::OemConfigRead => 0x3002,
            PacketType::NvMemUpdateConfig => 0x3003,
            PacketType::LinkProfileRegisterRead => 0x3004,
            PacketType::Other(raw) => raw,
        }
    }

    /// Packets consumed by the command state machine rather than handed to
    /// the application.
    pub fn is_internal(self) -> bool {
        matches!(
            self,
            PacketType::CommandBegin
                | PacketType::CommandEnd
                | PacketType::RegisterRead
                | PacketType::GpioRead
                | PacketType::OemConfigRead
                | PacketType::NvMemUpdateConfig
                | PacketType::LinkProfileRegisterRead
        )
    }

    /// Minimum body length for the types whose layout this crate decodes
    fn min_body_len(self) -> usize {
        match self {
            PacketType::CommandBegin | PacketType::CommandEnd => 8,
            PacketType::RegisterRead => 8,
            PacketType::GpioRead => 4,
            PacketType::OemConfigRead => 8,
            PacketType::NvMemUpdateConfig => 4,
            PacketType::LinkProfileRegisterRead => 8,
            _ => 0,
        }
    }
}

/// Decoded common header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub version: u8,
    pub flags: u8,
    pub packet_type: PacketType,
    pub status: u16,
    body_words: u16,
}

impl PacketHeader {
    pub fn new(packet_type: PacketType, body_len: usize) -> Self {
        Self {
            version: PACKET_VERSION,
            flags: 0,
            packet_type,
            status: 0,
            body_words: body_len.div_ceil(4) as u16,
        }
    }

    pub fn decode(buf: &[u8; HEADER_LEN]) -> Result<Self> {
        let header = Self {
            version: buf[0],
            flags: buf[1],
            packet_type: PacketType::from_raw(LittleEndian::read_u16(&buf[2..4])),
            body_words: LittleEndian::read_u16(&buf[4..6]),
            status: LittleEndian::read_u16(&buf[6..8]),
        };
        if header.version != PACKET_VERSION {
            return Err(RadioError::ProtocolViolation(format!(
                "Unsupported packet version {} in header {:02X?}",
                header.version, buf
            )));
        }
        Ok(header)
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = self.version;
        out[1] = self.flags;
        LittleEndian::write_u16(&mut out[2..4], self.packet_type.to_raw());
        LittleEndian::write_u16(&mut out[4..6], self.body_words);
        LittleEndian::write_u16(&mut out[6..8], self.status);
        out
    }

    /// Body length in bytes as declared by the header
    pub fn body_len(&self) -> usize {
        self.body_words as usize * 4
    }

    /// Header plus body
    pub fn total_len(&self) -> usize {
        HEADER_LEN + self.body_len()
    }
}

/// One complete packet: header plus body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub body: Vec<u8>,
}

impl Packet {
    /// Assemble a packet, checking the body against the header.
    pub fn new(header: PacketHeader, body: Vec<u8>) -> Result<Self> {
        if body.len() != header.body_len() {
            return Err(RadioError::ProtocolViolation(format!(
                "{:?} packet declares {} body bytes, got {}",
                header.packet_type,
                header.body_len(),
                body.len()
            )));
        }
        let min = header.packet_type.min_body_len();
        if body.len() < min {
            return Err(RadioError::ProtocolViolation(format!(
                "{:?} packet body too short: {} bytes (minimum {})",
                header.packet_type,
                body.len(),
                min
            )));
        }
        Ok(Self { header, body })
    }

    /// Build a packet of `packet_type` around `body`, zero-padding the body
    /// to a whole number of words.
    pub fn build(packet_type: PacketType, body: &[u8]) -> Self {
        let header = PacketHeader::new(packet_type, body.len());
        let mut padded = body.to_vec();
        padded.resize(header.body_len(), 0);
        Self { header, body: padded }
    }

    pub fn packet_type(&self) -> PacketType {
        self.header.packet_type
    }

    /// Serialize header and body
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.header.total_len());
        out.extend_from_slice(&self.header.encode());
        out.extend_from_slice(&self.body);
        out
    }

    fn u16_at(&self, offset: usize) -> u16 {
        LittleEndian::read_u16(&self.body[offset..offset + 2])
    }

    fn u32_at(&self, offset: usize) -> u32 {
        LittleEndian::read_u32(&self.body[offset..offset + 4])
    }

    fn expect_type(&self, expected: PacketType) -> Result<()> {
        if self.packet_type() != expected {
            return Err(RadioError::ProtocolViolation(format!(
                "Expected {:?} packet, got {:?}",
                expected,
                self.packet_type()
            )));
        }
        Ok(())
    }

    /// Command code carried by a Command-Begin packet
    pub fn command_begin(&self) -> Result<u32> {
        self.expect_type(PacketType::CommandBegin)?;
        Ok(self.u32_at(0))
    }

    /// MAC status carried by a Command-End packet
    pub fn command_end_status(&self) -> Result<u32> {
        self.expect_type(PacketType::CommandEnd)?;
        Ok(self.u32_at(4))
    }

    /// `(address, value)` from a register-read packet
    pub fn register_read(&self) -> Result<(u16, u32)> {
        self.expect_type(PacketType::RegisterRead)?;
        Ok((self.u16_at(0), self.u32_at(4)))
    }

    /// Pin state word from a GPIO-read packet
    pub fn gpio_read(&self) -> Result<u32> {
        self.expect_type(PacketType::GpioRead)?;
        Ok(self.u32_at(0))
    }

    /// `(address, value)` from an OEM-config-read packet
    pub fn oem_config_read(&self) -> Result<(u32, u32)> {
        self.expect_type(PacketType::OemConfigRead)?;
        Ok((self.u32_at(0), self.u32_at(4)))
    }

    /// Maximum packet size acknowledged by an NVRAM-update-config packet
    pub fn nv_mem_update_config(&self) -> Result<u32> {
        self.expect_type(PacketType::NvMemUpdateConfig)?;
        Ok(self.u32_at(0))
    }

    /// `(profile, address, data)` from a link-profile-register-read packet
    pub fn link_profile_register_read(&self) -> Result<(u16, u16, u16)> {
        self.expect_type(PacketType::LinkProfileRegisterRead)?;
        Ok((self.u16_at(0), self.u16_at(2), self.u16_at(4)))
    }
}

/// Body builders for the internally tracked packet types. Transports that
/// synthesize responses and tests use these.
pub mod build {
    use super::{Packet, PacketType};

    pub fn command_begin(command: u32, ms_counter: u32) -> Packet {
        let mut body = Vec::with_capacity(8);
        body.extend_from_slice(&command.to_le_bytes());
        body.extend_from_slice(&ms_counter.to_le_bytes());
        Packet::build(PacketType::CommandBegin, &body)
    }

    pub fn command_end(ms_counter: u32, status: u32) -> Packet {
        let mut body = Vec::with_capacity(8);
        body.extend_from_slice(&ms_counter.to_le_bytes());
        body.extend_from_slice(&status.to_le_bytes());
        Packet::build(PacketType::CommandEnd, &body)
    }

    pub fn register_read(address: u16, value: u32) -> Packet {
        let mut body = Vec::with_capacity(8);
        body.extend_from_slice(&address.to_le_bytes());
        body.extend_from_slice(&[0, 0]);
        body.extend_from_slice(&value.to_le_bytes());
        Packet::build(PacketType::RegisterRead, &body)
    }

    pub fn gpio_read(value: u32) -> Packet {
        Packet::build(PacketType::GpioRead, &value.to_le_bytes())
    }

    pub fn oem_config_read(address: u32, value: u32) -> Packet {
        let mut body = Vec::with_capacity(8);
        body.extend_from_slice(&address.to_le_bytes());
        body.extend_from_slice(&value.to_le_bytes());
        Packet::build(PacketType::OemConfigRead, &body)
    }

    pub fn nv_mem_update_config(max_packet_size: u32) -> Packet {
        Packet::build(PacketType::NvMemUpdateConfig, &max_packet_size.to_le_bytes())
    }

    pub fn link_profile_register_read(profile: u16, address: u16, data: u16) -> Packet {
        let mut body = Vec::with_capacity(8);
        body.extend_from_slice(&profile.to_le_bytes());
        body.extend_from_slice(&address.to_le_bytes());
        body.extend_from_slice(&data.to_le_bytes());
        Packet::build(PacketType::LinkProfileRegisterRead, &body)
    }
}
