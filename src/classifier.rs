//! Per-command packet state machine.
//!
//! A [`CommandContext`] is created for every issued command. Each received
//! packet goes through [`CommandContext::classify`], which either consumes it
//! (Command-Begin, Command-End and the typed read responses), hands it back as
//! an application packet, or reports that the command has completed.
//!
//! ```text
//! bracketed command:  CommandBegin -> [read payload] -> CommandEnd -> Complete
//! bare register read: RegisterRead -> Complete
//! ```

use crate::error::{RadioError, Result};
use crate::mac::MacCommand;
use crate::packet::{Packet, PacketType};

/// What the state machine expects to see next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    CommandBegin,
    CommandEnd,
    RegisterRead,
    GpioRead,
    OemConfigRead,
    NvMemUpdateConfigRead,
    LinkProfileRegisterRead,
    /// Terminal: the command is finished.
    Complete,
}

impl Expectation {
    fn packet_type(self) -> Option<PacketType> {
        match self {
            Expectation::CommandBegin => Some(PacketType::CommandBegin),
            Expectation::CommandEnd => Some(PacketType::CommandEnd),
            Expectation::RegisterRead => Some(PacketType::RegisterRead),
            Expectation::GpioRead => Some(PacketType::GpioRead),
            Expectation::OemConfigRead => Some(PacketType::OemConfigRead),
            Expectation::NvMemUpdateConfigRead => Some(PacketType::NvMemUpdateConfig),
            Expectation::LinkProfileRegisterRead => Some(PacketType::LinkProfileRegisterRead),
            Expectation::Complete => None,
        }
    }

    fn is_read(self) -> bool {
        !matches!(
            self,
            Expectation::CommandBegin | Expectation::CommandEnd | Expectation::Complete
        )
    }
}

/// Typed result accumulated from a read payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadResult {
    #[default]
    None,
    Register { address: u16, value: u32 },
    Gpio { value: u32 },
    OemConfig { address: u32, value: u32 },
    NvMemUpdateConfig { max_packet_size: u32 },
    LinkProfileRegister { profile: u16, address: u16, data: u16 },
}

/// Outcome of classifying one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Consumed by the state machine.
    Consumed,
    /// Not tracked here; belongs to the application.
    Application,
    /// The command finished with the given MAC status.
    Complete { status: u32 },
}

#[derive(Debug)]
pub struct CommandContext {
    command: Option<MacCommand>,
    expectation: Expectation,
    /// Read payload expected between Command-Begin and Command-End
    payload: Option<Expectation>,
    /// Register address a bare register read asked for
    register: Option<u16>,
    result: ReadResult,
}

impl CommandContext {
    /// Context for a command bracketed by Command-Begin/Command-End with no
    /// data in between.
    pub fn command(command: MacCommand) -> Self {
        Self {
            command: Some(command),
            expectation: Expectation::CommandBegin,
            payload: None,
            register: None,
            result: ReadResult::None,
        }
    }

    /// Context for a bracketed command that returns one read payload.
    pub fn command_with_read(command: MacCommand, read: Expectation) -> Result<Self> {
        if !read.is_read() {
            return Err(RadioError::InvalidParameter(format!(
                "{:?} is not a read payload",
                read
            )));
        }
        Ok(Self {
            payload: Some(read),
            ..Self::command(command)
        })
    }

    /// Context for a bare register read: the register-read packet alone
    /// completes it.
    pub fn register_read(address: u16) -> Self {
        Self {
            command: None,
            expectation: Expectation::RegisterRead,
            payload: None,
            register: Some(address),
            result: ReadResult::None,
        }
    }

    pub fn expectation(&self) -> Expectation {
        self.expectation
    }

    pub fn is_complete(&self) -> bool {
        self.expectation == Expectation::Complete
    }

    pub fn result(&self) -> ReadResult {
        self.result
    }

    /// Advance the state machine with `packet`.
    pub fn classify(&mut self, packet: &Packet) -> Result<Classification> {
        let packet_type = packet.packet_type();
        if !packet_type.is_internal() {
            return Ok(Classification::Application);
        }
        if self.expectation.packet_type() != Some(packet_type) {
            return Err(RadioError::ProtocolViolation(format!(
                "{:?} packet while expecting {:?}",
                packet_type, self.expectation
            )));
        }

        match self.expectation {
            Expectation::CommandBegin => {
                let code = packet.command_begin()?;
                if let Some(command) = self.command {
                    if command.code() != code {
                        return Err(RadioError::ProtocolViolation(format!(
                            "Command-Begin for 0x{:02X} while executing {:?}",
                            code, command
                        )));
                    }
                }
                self.expectation = self.payload.unwrap_or(Expectation::CommandEnd);
                Ok(Classification::Consumed)
            }
            Expectation::CommandEnd => {
                let status = packet.command_end_status()?;
                self.expectation = Expectation::Complete;
                Ok(Classification::Complete { status })
            }
            Expectation::RegisterRead => {
                let (address, value) = packet.register_read()?;
                if let Some(expected) = self.register {
                    if expected != address {
                        return Err(RadioError::ProtocolViolation(format!(
                            "Register 0x{:04X} returned while reading 0x{:04X}",
                            address, expected
                        )));
                    }
                }
                self.result = ReadResult::Register { address, value };
                Ok(self.after_payload())
            }
            Expectation::GpioRead => {
                self.result = ReadResult::Gpio {
                    value: packet.gpio_read()?,
                };
                Ok(self.after_payload())
            }
            Expectation::OemConfigRead => {
                let (address, value) = packet.oem_config_read()?;
                self.result = ReadResult::OemConfig { address, value };
                Ok(self.after_payload())
            }
            Expectation::NvMemUpdateConfigRead => {
                self.result = ReadResult::NvMemUpdateConfig {
                    max_packet_size: packet.nv_mem_update_config()?,
                };
                Ok(self.after_payload())
            }
            Expectation::LinkProfileRegisterRead => {
                let (profile, address, data) = packet.link_profile_register_read()?;
                self.result = ReadResult::LinkProfileRegister { profile, address, data };
                Ok(self.after_payload())
            }
            Expectation::Complete => unreachable!("Complete has no packet type"),
        }
    }

    fn after_payload(&mut self) -> Classification {
        if self.command.is_some() {
            self.expectation = Expectation::CommandEnd;
            Classification::Consumed
        } else {
            self.expectation = Expectation::Complete;
            Classification::Complete { status: 0 }
        }
    }
}
