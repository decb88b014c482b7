//! Command/response engine for UHF RFID radio modules.
//!
//! The crate frames MAC commands, buffers the inbound byte stream of a
//! transport channel, sorts the received packets into internally consumed
//! responses and application packets, and lets a second thread cancel or
//! abort a long-running tag operation.
//!
//! # Features
//!
//! - `serial` - Serial port transport for desktop using serialport crate
//!
//! # Example
//!
//! ```ignore
//! use uhf_radio::{MacCommand, PacketFlow, Radio, RadioConfig, RadioEnumeration, SerialDriver};
//!
//! let driver = SerialDriver::new(115200);
//! let config = RadioConfig::default();
//! let radios = RadioEnumeration::discover(&driver, config.initial_serial_capacity)?;
//! let radio = Radio::open(&driver, radios.radios()[0].cookie, config)?;
//!
//! radio.start_operation(MacCommand::Inventory, &[], |packet| {
//!     println!("{:?}: {} bytes", packet.packet_type(), packet.body.len());
//!     PacketFlow::Continue
//! })?;
//! ```

mod cache;
pub mod classifier;
mod config;
mod enumerate;
mod error;
pub mod loopback;
pub mod mac;
pub mod packet;
mod radio;
mod session;
mod stream;
mod transport;
mod types;

#[cfg(feature = "serial")]
mod serial;

// Re-exports
pub use cache::{ByteCache, DEFAULT_CACHE_CAPACITY};
pub use config::RadioConfig;
pub use enumerate::{RadioEnumeration, RadioInfo, enumerate_radios};
pub use error::{RadioError, Result};
pub use mac::{Capabilities, FirmwareVersion, MacCommand};
pub use packet::{Packet, PacketHeader, PacketType};
pub use radio::{PacketFlow, Radio};
pub use stream::{Packets, RadioStream};
pub use transport::{
    CursorAction, EnumerationStep, RadioDriver, RadioTransport, RawRead, TransportStatus,
};
pub use types::{DriverVersion, RadioCookie, ResetKind, TransportCharacteristics};

#[cfg(feature = "serial")]
pub use serial::{SerialDriver, SerialTransport};

#[cfg(test)]
mod tests {
    use super::*;
    use loopback::{LoopbackHandle, LoopbackTransport};
    use packet::build;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn radio() -> (Radio<LoopbackTransport>, LoopbackHandle) {
        let (transport, device) = LoopbackTransport::new();
        device.set_read_timeout(Duration::from_millis(500));
        (Radio::new(transport, RadioConfig::default()), device)
    }

    fn inventory(epc: &[u8]) -> Packet {
        Packet::build(PacketType::Inventory, epc)
    }

    /// Driver handing out a single loopback radio
    struct LoopbackDriver {
        transport: Mutex<Option<LoopbackTransport>>,
        open_status: Option<TransportStatus>,
    }

    impl LoopbackDriver {
        fn new(transport: LoopbackTransport) -> Self {
            Self {
                transport: Mutex::new(Some(transport)),
                open_status: None,
            }
        }
    }

    impl RadioDriver for LoopbackDriver {
        type Transport = LoopbackTransport;

        fn open(
            &self,
            _cookie: RadioCookie,
        ) -> std::result::Result<LoopbackTransport, TransportStatus> {
            if let Some(status) = &self.open_status {
                return Err(status.clone());
            }
            self.transport.lock().take().ok_or(TransportStatus::Busy)
        }

        fn enumerate(
            &self,
            _action: CursorAction,
            _serial: &mut [u8],
        ) -> std::result::Result<EnumerationStep, TransportStatus> {
            Ok(EnumerationStep::EndOfList)
        }

        fn driver_version(
            &self,
            _cookie: RadioCookie,
        ) -> std::result::Result<DriverVersion, TransportStatus> {
            Ok(DriverVersion::default())
        }
    }

    // ===================
    // register access tests
    // ===================

    #[test]
    fn test_read_mac_register() {
        let (radio, device) = radio();
        device.queue_response(vec![build::register_read(mac::MAC_ERROR, 0x0000_0309)]);

        assert_eq!(radio.last_mac_error().unwrap(), 0x0309);
        assert_eq!(device.written(), mac::read_register_frame(mac::MAC_ERROR));
        assert!(!radio.is_busy());
    }

    #[test]
    fn test_read_mac_register_wrong_address() {
        let (radio, device) = radio();
        device.queue_response(vec![build::register_read(0x0006, 1)]);

        assert!(matches!(
            radio.read_mac_register(0x0005),
            Err(RadioError::ProtocolViolation(_))
        ));
        assert!(!radio.is_busy());
    }

    #[test]
    fn test_protocol_violation_discards_trailing_bytes() {
        let (radio, device) = radio();
        device.queue_response(vec![
            build::register_read(0x0006, 1),
            build::register_read(0x0005, 2),
        ]);

        assert!(matches!(
            radio.read_mac_register(0x0005),
            Err(RadioError::ProtocolViolation(_))
        ));
        assert_eq!(radio.stream().cached(), 0);

        device.queue_response(vec![build::register_read(0x0005, 3)]);
        assert_eq!(radio.read_mac_register(0x0005).unwrap(), 3);
    }

    #[test]
    fn test_write_mac_register_sends_frame_only() {
        let (radio, device) = radio();
        radio.write_mac_register(0x0700, 0xDEAD_BEEF).unwrap();

        assert_eq!(
            device.written(),
            [0x01, 0x00, 0x00, 0x07, 0xEF, 0xBE, 0xAD, 0xDE]
        );
        assert_eq!(device.raw_read_count(), 0);
    }

    #[test]
    fn test_read_times_out_as_not_responding() {
        let (radio, device) = radio();
        device.set_read_timeout(Duration::from_millis(20));

        assert!(matches!(
            radio.read_mac_register(mac::MAC_VER),
            Err(RadioError::RadioNotResponding)
        ));
        assert!(!radio.is_busy());
    }

    // ===================
    // typed read tests
    // ===================

    #[test]
    fn test_read_gpio_masks_value() {
        let (radio, device) = radio();
        device.queue_response(vec![
            build::command_begin(MacCommand::GpioRead.code(), 0),
            build::gpio_read(0b1011),
            build::command_end(1, 0),
        ]);

        assert_eq!(radio.read_gpio(0b0011).unwrap(), 0b0011);
        assert_eq!(
            device.written(),
            mac::command_frames(MacCommand::GpioRead, &[(mac::HST_GPIO_INMSK, 0b0011)])
        );
    }

    #[test]
    fn test_read_gpio_empty_mask() {
        let (radio, device) = radio();
        assert!(matches!(radio.read_gpio(0), Err(RadioError::InvalidParameter(_))));
        assert!(device.written().is_empty());
    }

    #[test]
    fn test_read_oem_config() {
        let (radio, device) = radio();
        device.queue_response(vec![
            build::command_begin(MacCommand::ReadOem.code(), 0),
            build::oem_config_read(0x40, 0xCAFE),
            build::command_end(2, 0),
        ]);

        assert_eq!(radio.read_oem_config(0x40).unwrap(), 0xCAFE);
    }

    #[test]
    fn test_read_oem_config_wrong_echo() {
        let (radio, device) = radio();
        device.queue_response(vec![
            build::command_begin(MacCommand::ReadOem.code(), 0),
            build::oem_config_read(0x41, 0xCAFE),
            build::command_end(2, 0),
        ]);

        assert!(matches!(
            radio.read_oem_config(0x40),
            Err(RadioError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_write_oem_config() {
        let (radio, device) = radio();
        device.queue_response(vec![
            build::command_begin(MacCommand::WriteOem.code(), 0),
            build::command_end(1, 0),
        ]);

        radio.write_oem_config(0x80, 7).unwrap();
        assert_eq!(
            device.written(),
            mac::command_frames(
                MacCommand::WriteOem,
                &[(mac::HST_OEM_ADDR, 0x80), (mac::HST_OEM_DATA, 7)]
            )
        );
    }

    #[test]
    fn test_nv_mem_update_config() {
        let (radio, device) = radio();
        device.queue_response(vec![
            build::command_begin(MacCommand::NvMemUpdate.code(), 0),
            build::nv_mem_update_config(256),
            build::command_end(0, 0),
        ]);

        assert_eq!(radio.nv_mem_update_config().unwrap(), 256);
    }

    #[test]
    fn test_read_link_profile_register() {
        let (radio, device) = radio();
        device.queue_response(vec![
            build::command_begin(MacCommand::ReadLinkProfileRegister.code(), 0),
            build::link_profile_register_read(2, 0x0450, 0x0077),
            build::command_end(0, 0),
        ]);

        assert_eq!(radio.read_link_profile_register(2, 0x0450).unwrap(), 0x0077);
    }

    // ===================
    // start_operation tests
    // ===================

    #[test]
    fn test_start_operation_forwards_application_packets() {
        let (radio, device) = radio();
        device.queue_response(vec![
            build::command_begin(MacCommand::Inventory.code(), 0),
            inventory(&[0xE2, 0x00, 0x68, 0x16]),
            inventory(&[0xE2, 0x00, 0x68, 0x17]),
            build::command_end(40, 0),
        ]);

        let mut seen = Vec::new();
        radio
            .start_operation(MacCommand::Inventory, &[], |packet| {
                seen.push(packet.body.clone());
                PacketFlow::Continue
            })
            .unwrap();

        assert_eq!(seen, vec![vec![0xE2, 0x00, 0x68, 0x16], vec![0xE2, 0x00, 0x68, 0x17]]);
        assert!(!radio.was_cancelled());
    }

    #[test]
    fn test_start_operation_sink_cancel() {
        let (radio, device) = radio();
        device.queue_response(vec![
            build::command_begin(MacCommand::Inventory.code(), 0),
            inventory(&[1, 2, 3, 4]),
            inventory(&[5, 6, 7, 8]),
        ]);
        device.set_cancel_response(vec![build::command_end(9, 0)]);

        let mut calls = 0;
        let result = radio.start_operation(MacCommand::Inventory, &[], |_| {
            calls += 1;
            PacketFlow::Cancel
        });

        assert!(matches!(result, Err(RadioError::OperationCancelled)));
        assert_eq!(calls, 1);
        assert_eq!(device.cancel_count(), 1);
        assert!(radio.was_cancelled());
        assert!(!radio.is_busy());
    }

    #[test]
    fn test_start_operation_mac_failure() {
        let (radio, device) = radio();
        device.queue_response(vec![
            build::command_begin(MacCommand::TagKill.code(), 0),
            build::command_end(3, 0x0101),
        ]);

        let result = radio.start_operation(MacCommand::TagKill, &[], |_| PacketFlow::Continue);
        assert!(matches!(
            result,
            Err(RadioError::RadioFailure { mac_status: 0x0101 })
        ));
    }

    #[test]
    fn test_start_operation_begin_for_other_command() {
        let (radio, device) = radio();
        device.queue_response(vec![
            build::command_begin(MacCommand::TagRead.code(), 0),
            build::command_end(0, 0),
        ]);

        let result = radio.start_operation(MacCommand::TagWrite, &[], |_| PacketFlow::Continue);
        assert!(matches!(result, Err(RadioError::ProtocolViolation(_))));
    }

    #[test]
    fn test_command_from_sink_is_rejected() {
        let (radio, device) = radio();
        device.queue_response(vec![
            build::command_begin(MacCommand::Inventory.code(), 0),
            inventory(&[0xAA; 4]),
            build::command_end(0, 0),
        ]);

        let mut nested = None;
        radio
            .start_operation(MacCommand::Inventory, &[], |_| {
                nested = Some(radio.read_mac_register(mac::MAC_VER));
                PacketFlow::Continue
            })
            .unwrap();

        assert!(matches!(nested, Some(Err(RadioError::InvalidParameter(_)))));
    }

    // ===================
    // session tests
    // ===================

    #[test]
    fn test_cancel_without_command() {
        let (radio, _device) = radio();
        assert!(matches!(radio.cancel_operation(), Err(RadioError::NotBusy)));
        assert!(matches!(radio.abort_operation(), Err(RadioError::NotBusy)));
    }

    #[test]
    fn test_closed_radio_rejects_commands() {
        let (radio, device) = radio();
        radio.close();

        assert!(radio.is_closed());
        assert!(matches!(
            radio.read_mac_register(mac::MAC_VER),
            Err(RadioError::DeviceDetached)
        ));
        assert!(device.written().is_empty());
    }

    #[test]
    fn test_reset_to_bootloader() {
        let (radio, device) = radio();
        radio.reset(ResetKind::ToBootloader).unwrap();
        assert_eq!(device.resets(), vec![ResetKind::ToBootloader]);
    }

    // ===================
    // open tests
    // ===================

    #[test]
    fn test_open_probes_firmware_and_characteristics() {
        let (transport, device) = LoopbackTransport::new();
        device.set_characteristics(TransportCharacteristics {
            protocol_version: 2,
            max_inbound: 1024,
            max_outbound: 256,
        });
        device.queue_response(vec![build::register_read(mac::MAC_VER, 0x0102_0005)]);
        let driver = LoopbackDriver::new(transport);

        let radio = Radio::open(&driver, RadioCookie(0), RadioConfig::default()).unwrap();

        assert_eq!(radio.firmware_version(), Some(FirmwareVersion::new(1, 2, 5)));
        assert_eq!(radio.stream().max_packet_size(), 1024);
        assert_eq!(radio.characteristics().unwrap().max_outbound, 256);
        let capabilities = radio.capabilities();
        assert!(capabilities.nv_mem_update);
        assert!(!capabilities.link_profile_registers);
    }

    #[test]
    fn test_capability_gate_blocks_old_firmware() {
        let (transport, device) = LoopbackTransport::new();
        device.queue_response(vec![build::register_read(mac::MAC_VER, 0x0100_0000)]);
        let driver = LoopbackDriver::new(transport);
        let radio = Radio::open(&driver, RadioCookie(0), RadioConfig::default()).unwrap();
        let written = device.written().len();

        assert!(matches!(
            radio.read_link_profile_register(0, 0x0450),
            Err(RadioError::Unsupported(_))
        ));
        assert!(matches!(
            radio.nv_mem_update_config(),
            Err(RadioError::Unsupported(_))
        ));
        assert_eq!(device.written().len(), written);
    }

    #[test]
    fn test_open_failure_maps_status() {
        let (transport, _device) = LoopbackTransport::new();
        let mut driver = LoopbackDriver::new(transport);
        driver.open_status = Some(TransportStatus::NotFound);

        assert!(matches!(
            Radio::open(&driver, RadioCookie(3), RadioConfig::default()),
            Err(RadioError::DeviceNotFound)
        ));
    }
}
