//! MAC register map, command codes and outbound register-access frames.
//!
//! The host talks to the MAC by reading and writing 32-bit registers. A
//! command is started by writing its parameter registers and then writing
//! the command code into [`HST_CMD`].

use byteorder::{ByteOrder, LittleEndian};

// Register addresses
pub const MAC_VER: u16 = 0x0000;
pub const MAC_ERROR: u16 = 0x0005;
pub const HST_GPIO_INMSK: u16 = 0x0100;
pub const HST_OEM_ADDR: u16 = 0x0500;
pub const HST_OEM_DATA: u16 = 0x0501;
pub const HST_RFTC_PROF_SEL: u16 = 0x0B60;
pub const HST_RFTC_PROF_XCVR_ADDR: u16 = 0x0B61;
pub const HST_CMD: u16 = 0xF000;

/// Size of an outbound register-access frame
pub const FRAME_LEN: usize = 8;

const ACCESS_READ: u8 = 0x00;
const ACCESS_WRITE: u8 = 0x01;

/// Commands understood by the MAC, written to [`HST_CMD`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MacCommand {
    NvMemUpdate = 0x01,
    WriteOem = 0x02,
    ReadOem = 0x03,
    EngineeringTest = 0x04,
    Inventory = 0x0F,
    TagRead = 0x10,
    TagWrite = 0x11,
    TagLock = 0x12,
    TagKill = 0x13,
    SetPowerManagement = 0x14,
    ClearError = 0x15,
    CarrierOn = 0x17,
    CarrierOff = 0x18,
    UpdateLinkProfile = 0x19,
    GpioRead = 0x1A,
    ReadLinkProfileRegister = 0x1C,
    WriteLinkProfileRegister = 0x1D,
    TagBlockWrite = 0x1F,
    TagBlockErase = 0x20,
}

impl MacCommand {
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Frame requesting the value of register `address`
pub fn read_register_frame(address: u16) -> [u8; FRAME_LEN] {
    create_frame(ACCESS_READ, address, 0)
}

/// Frame writing `value` into register `address`
pub fn write_register_frame(address: u16, value: u32) -> [u8; FRAME_LEN] {
    create_frame(ACCESS_WRITE, address, value)
}

/// Frames that load `parameters` into their registers and then start `command`
pub fn command_frames(command: MacCommand, parameters: &[(u16, u32)]) -> Vec<u8> {
    let mut frames = Vec::with_capacity((parameters.len() + 1) * FRAME_LEN);
    for &(address, value) in parameters {
        frames.extend_from_slice(&write_register_frame(address, value));
    }
    frames.extend_from_slice(&write_register_frame(HST_CMD, command.code()));
    frames
}

fn create_frame(access: u8, address: u16, value: u32) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = access;
    LittleEndian::write_u16(&mut frame[2..4], address);
    LittleEndian::write_u32(&mut frame[4..8], value);
    frame
}

/// MAC firmware version as reported by [`MAC_VER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub maintenance: u16,
}

impl FirmwareVersion {
    pub const fn new(major: u8, minor: u8, maintenance: u16) -> Self {
        Self { major, minor, maintenance }
    }

    /// Register layout: `major:8 | minor:8 | maintenance:16`
    pub fn from_register(value: u32) -> Self {
        Self {
            major: (value >> 24) as u8,
            minor: (value >> 16) as u8,
            maintenance: (value & 0xFFFF) as u16,
        }
    }
}

impl std::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.maintenance)
    }
}

/// Features whose availability depends on the MAC firmware version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub link_profile_registers: bool,
    pub nv_mem_update: bool,
}

impl Capabilities {
    const LINK_PROFILE_REGISTERS_SINCE: FirmwareVersion = FirmwareVersion::new(1, 3, 0);
    const NV_MEM_UPDATE_SINCE: FirmwareVersion = FirmwareVersion::new(1, 1, 0);

    /// Every feature enabled. Used until the firmware version is known.
    pub const fn all() -> Self {
        Self {
            link_profile_registers: true,
            nv_mem_update: true,
        }
    }

    pub fn for_firmware(version: FirmwareVersion) -> Self {
        Self {
            link_profile_registers: version >= Self::LINK_PROFILE_REGISTERS_SINCE,
            nv_mem_update: version >= Self::NV_MEM_UPDATE_SINCE,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_register_frame() {
        let frame = write_register_frame(HST_CMD, MacCommand::Inventory.code());
        assert_eq!(frame, [0x01, 0x00, 0x00, 0xF0, 0x0F, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_read_register_frame() {
        let frame = read_register_frame(MAC_VER);
        assert_eq!(frame, [0x00; 8]);
    }

    #[test]
    fn test_command_frames_parameters_first() {
        let frames = command_frames(MacCommand::ReadOem, &[(HST_OEM_ADDR, 0x0000_00A0)]);
        assert_eq!(frames.len(), 16);
        assert_eq!(&frames[..8], &[0x01, 0x00, 0x00, 0x05, 0xA0, 0x00, 0x00, 0x00]);
        assert_eq!(&frames[8..], &[0x01, 0x00, 0x00, 0xF0, 0x03, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_firmware_version_from_register() {
        let version = FirmwareVersion::from_register(0x0102_0007);
        assert_eq!(version, FirmwareVersion::new(1, 2, 7));
        assert_eq!(version.to_string(), "1.2.7");
    }

    #[test]
    fn test_capabilities_by_version() {
        let old = Capabilities::for_firmware(FirmwareVersion::new(1, 0, 9));
        assert!(!old.nv_mem_update);
        assert!(!old.link_profile_registers);

        let mid = Capabilities::for_firmware(FirmwareVersion::new(1, 2, 0));
        assert!(mid.nv_mem_update);
        assert!(!mid.link_profile_registers);

        let new = Capabilities::for_firmware(FirmwareVersion::new(2, 0, 0));
        assert_eq!(new, Capabilities::all());
    }
}
