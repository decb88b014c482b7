use log::{debug, error, warn};

use crate::classifier::{Classification, CommandContext, Expectation, ReadResult};
use crate::config::RadioConfig;
use crate::error::{RadioError, Result};
use crate::mac::{self, Capabilities, FirmwareVersion, MacCommand};
use crate::packet::Packet;
use crate::session::{BusyGuard, Interrupt, RadioSession};
use crate::stream::RadioStream;
use crate::transport::{RadioDriver, RadioTransport};
use crate::types::{RadioCookie, ResetKind, TransportCharacteristics};

/// What the application's packet sink wants after seeing a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketFlow {
    Continue,
    /// Cancel the running operation. Remaining packets are drained and the
    /// operation ends with [`RadioError::OperationCancelled`].
    Cancel,
}

/// A radio module session.
///
/// All methods take `&self`; share the radio across threads with an `Arc` so
/// that one thread can cancel or abort a command another thread is running.
pub struct Radio<T: RadioTransport> {
    stream: RadioStream<T>,
    session: RadioSession,
    capabilities: Capabilities,
    firmware: Option<FirmwareVersion>,
    characteristics: Option<TransportCharacteristics>,
}

impl<T: RadioTransport> Radio<T> {
    /// Wrap an already open transport without probing the radio. Every
    /// firmware capability is assumed present.
    pub fn new(transport: T, config: RadioConfig) -> Self {
        Self {
            stream: RadioStream::new(transport, config.cache_capacity, config.max_packet_size),
            session: RadioSession::new(),
            capabilities: Capabilities::all(),
            firmware: None,
            characteristics: None,
        }
    }

    /// Open the radio identified by `cookie`, query the transport limits and
    /// the MAC firmware version.
    pub fn open<D>(driver: &D, cookie: RadioCookie, config: RadioConfig) -> Result<Self>
    where
        D: RadioDriver<Transport = T>,
    {
        let transport = driver.open(cookie)?;
        let mut radio = Self::new(transport, config);

        let characteristics = radio.stream.characteristics()?;
        if characteristics.max_inbound > 0 {
            radio
                .stream
                .set_max_packet_size(characteristics.max_inbound as usize);
        }
        radio.characteristics = Some(characteristics);

        let version = FirmwareVersion::from_register(radio.read_mac_register(mac::MAC_VER)?);
        debug!("Radio {:?} runs MAC firmware {}", cookie, version);
        radio.firmware = Some(version);
        radio.capabilities = Capabilities::for_firmware(version);
        Ok(radio)
    }

    pub fn firmware_version(&self) -> Option<FirmwareVersion> {
        self.firmware
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn characteristics(&self) -> Option<TransportCharacteristics> {
        self.characteristics
    }

    pub fn stream(&self) -> &RadioStream<T> {
        &self.stream
    }

    pub fn is_busy(&self) -> bool {
        self.session.is_busy()
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }

    /// Whether the most recent command observed a cancel before completing
    pub fn was_cancelled(&self) -> bool {
        self.session.was_cancelled()
    }

    /// Read a MAC register
    pub fn read_mac_register(&self, address: u16) -> Result<u32> {
        let result = self.exec(
            &mac::read_register_frame(address),
            CommandContext::register_read(address),
            &mut Self::drop_application_packet,
        )?;
        match result {
            ReadResult::Register { value, .. } => Ok(value),
            other => Err(Self::unexpected_result("register read", other)),
        }
    }

    /// Write a MAC register. The MAC does not acknowledge register writes.
    pub fn write_mac_register(&self, address: u16, value: u32) -> Result<()> {
        let _busy = self.session.begin()?;
        self.stream.write(&mac::write_register_frame(address, value))
    }

    /// Error code latched by the MAC after a failed command
    pub fn last_mac_error(&self) -> Result<u32> {
        self.read_mac_register(mac::MAC_ERROR)
    }

    /// Read the GPIO pins selected by `mask`
    pub fn read_gpio(&self, mask: u32) -> Result<u32> {
        if mask == 0 {
            return Err(RadioError::InvalidParameter("GPIO mask selects no pins".into()));
        }
        let result = self.run_read(
            MacCommand::GpioRead,
            &[(mac::HST_GPIO_INMSK, mask)],
            Expectation::GpioRead,
        )?;
        match result {
            ReadResult::Gpio { value } => Ok(value & mask),
            other => Err(Self::unexpected_result("GPIO read", other)),
        }
    }

    /// Read one word of OEM configuration memory
    pub fn read_oem_config(&self, address: u32) -> Result<u32> {
        let result = self.run_read(
            MacCommand::ReadOem,
            &[(mac::HST_OEM_ADDR, address)],
            Expectation::OemConfigRead,
        )?;
        match result {
            ReadResult::OemConfig { address: echoed, value } if echoed == address => Ok(value),
            other => Err(Self::unexpected_result("OEM config read", other)),
        }
    }

    /// Write one word of OEM configuration memory
    pub fn write_oem_config(&self, address: u32, value: u32) -> Result<()> {
        let frames = mac::command_frames(
            MacCommand::WriteOem,
            &[(mac::HST_OEM_ADDR, address), (mac::HST_OEM_DATA, value)],
        );
        self.exec(
            &frames,
            CommandContext::command(MacCommand::WriteOem),
            &mut Self::drop_application_packet,
        )?;
        Ok(())
    }

    /// Put the MAC into non-volatile memory update mode. Returns the maximum
    /// update packet size the MAC acknowledged.
    pub fn nv_mem_update_config(&self) -> Result<u32> {
        if !self.capabilities.nv_mem_update {
            return Err(self.unsupported("non-volatile memory update"));
        }
        let result = self.run_read(
            MacCommand::NvMemUpdate,
            &[],
            Expectation::NvMemUpdateConfigRead,
        )?;
        match result {
            ReadResult::NvMemUpdateConfig { max_packet_size } => Ok(max_packet_size),
            other => Err(Self::unexpected_result("NV memory update", other)),
        }
    }

    /// Read a transceiver register belonging to link profile `profile`
    pub fn read_link_profile_register(&self, profile: u16, address: u16) -> Result<u16> {
        if !self.capabilities.link_profile_registers {
            return Err(self.unsupported("link profile register access"));
        }
        let result = self.run_read(
            MacCommand::ReadLinkProfileRegister,
            &[
                (mac::HST_RFTC_PROF_SEL, profile as u32),
                (mac::HST_RFTC_PROF_XCVR_ADDR, address as u32),
            ],
            Expectation::LinkProfileRegisterRead,
        )?;
        match result {
            ReadResult::LinkProfileRegister {
                profile: p,
                address: a,
                data,
            } if p == profile && a == address => Ok(data),
            other => Err(Self::unexpected_result("link profile register read", other)),
        }
    }

    /// Start a tag operation and feed every application packet to `sink`
    /// until the MAC reports the command finished.
    ///
    /// `parameters` are `(register, value)` pairs written before the command.
    pub fn start_operation<F>(
        &self,
        command: MacCommand,
        parameters: &[(u16, u32)],
        mut sink: F,
    ) -> Result<()>
    where
        F: FnMut(&Packet) -> PacketFlow,
    {
        self.exec(
            &mac::command_frames(command, parameters),
            CommandContext::command(command),
            &mut sink,
        )?;
        Ok(())
    }

    /// Cancel the command running on another thread and wait until it has
    /// stopped.
    pub fn cancel_operation(&self) -> Result<()> {
        let generation = self.session.request(Interrupt::Cancel, || {
            if let Err(e) = self.stream.cancel() {
                warn!("Transport cancel failed: {}", e);
            }
        })?;
        self.session.wait_idle(generation);
        Ok(())
    }

    /// Abort the command running on another thread, discarding buffered
    /// input, and wait until it has stopped.
    pub fn abort_operation(&self) -> Result<()> {
        let generation = self
            .session
            .request(Interrupt::Abort, || self.signal_abort())?;
        self.session.wait_idle(generation);
        Ok(())
    }

    fn signal_abort(&self) {
        if let Err(e) = self.stream.abort() {
            warn!("Transport abort failed: {}", e);
        }
    }

    pub fn reset(&self, kind: ResetKind) -> Result<()> {
        let _busy = self.session.begin()?;
        debug!("Resetting radio: {:?}", kind);
        self.stream.reset(kind)
    }

    /// Close the session. A command running on another thread is aborted
    /// first. Later commands fail with [`RadioError::DeviceDetached`].
    pub fn close(&self) {
        if let Some(generation) = self.session.close(|| self.signal_abort()) {
            debug!("Aborted command {} before close", generation);
            self.session.wait_idle(generation);
        }
    }

    fn run_read(
        &self,
        command: MacCommand,
        parameters: &[(u16, u32)],
        read: Expectation,
    ) -> Result<ReadResult> {
        self.exec(
            &mac::command_frames(command, parameters),
            CommandContext::command_with_read(command, read)?,
            &mut Self::drop_application_packet,
        )
    }

    fn exec(
        &self,
        frames: &[u8],
        mut context: CommandContext,
        sink: &mut dyn FnMut(&Packet) -> PacketFlow,
    ) -> Result<ReadResult> {
        let busy = self.session.begin()?;
        self.stream.write(frames)?;
        match self.process_operation_data(&busy, &mut context, sink) {
            Ok(()) => Ok(context.result()),
            Err(e @ (RadioError::ProtocolViolation(_) | RadioError::RadioNotResponding)) => {
                // A partial packet may be cached; the next command starts clean
                self.stream.discard_cached();
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Pull packets until the command completes, is cancelled or aborted, or
    /// the transport fails.
    fn process_operation_data(
        &self,
        busy: &BusyGuard<'_>,
        context: &mut CommandContext,
        sink: &mut dyn FnMut(&Packet) -> PacketFlow,
    ) -> Result<()> {
        let mut cancelled = false;
        loop {
            if self.session.abort_requested() {
                debug!("Command {} aborted", busy.generation());
                return Err(RadioError::OperationAborted);
            }
            if !cancelled && self.session.cancel_requested() {
                debug!("Command {} cancelled, draining", busy.generation());
                busy.acknowledge_cancel();
                cancelled = true;
            }

            let packet = match self.stream.next_packet() {
                Ok(packet) => packet,
                Err(e @ (RadioError::OperationCancelled | RadioError::OperationAborted)) => {
                    if matches!(e, RadioError::OperationCancelled) {
                        busy.acknowledge_cancel();
                    }
                    debug!("Command {} interrupted: {}", busy.generation(), e);
                    return Err(e);
                }
                Err(e) => {
                    error!("Command {} failed reading packets: {}", busy.generation(), e);
                    return Err(e);
                }
            };

            match context.classify(&packet)? {
                Classification::Consumed => {}
                Classification::Application if cancelled => {
                    debug!("Dropping {:?} packet after cancel", packet.packet_type());
                }
                Classification::Application => {
                    if sink(&packet) == PacketFlow::Cancel {
                        self.session.request_cancel_from_busy_thread();
                        if let Err(e) = self.stream.cancel() {
                            warn!("Transport cancel failed: {}", e);
                        }
                    }
                }
                Classification::Complete { status } => {
                    if cancelled || self.session.cancel_requested() {
                        busy.acknowledge_cancel();
                        return Err(RadioError::OperationCancelled);
                    }
                    if status != 0 {
                        return Err(RadioError::RadioFailure { mac_status: status });
                    }
                    return Ok(());
                }
            }
        }
    }

    fn drop_application_packet(packet: &Packet) -> PacketFlow {
        debug!("Ignoring {:?} packet during internal read", packet.packet_type());
        PacketFlow::Continue
    }

    fn unexpected_result(what: &str, result: ReadResult) -> RadioError {
        RadioError::ProtocolViolation(format!("Unexpected {} result: {:?}", what, result))
    }

    fn unsupported(&self, feature: &str) -> RadioError {
        let firmware = self
            .firmware
            .map_or_else(|| "unknown".to_string(), |v| v.to_string());
        RadioError::Unsupported(format!("{} (MAC firmware {})", feature, firmware))
    }
}
