//! Cross-thread cancel/abort handshake against the loopback radio.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use uhf_radio::loopback::{LoopbackHandle, LoopbackTransport};
use uhf_radio::packet::build;
use uhf_radio::{
    MacCommand, Packet, PacketFlow, PacketType, Radio, RadioConfig, RadioError, RadioTransport,
    RawRead, ResetKind, TransportStatus, mac,
};

const BLOCK_WAIT: Duration = Duration::from_secs(2);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn shared_radio() -> (Arc<Radio<LoopbackTransport>>, LoopbackHandle) {
    init_logging();
    let (transport, device) = LoopbackTransport::new();
    (Arc::new(Radio::new(transport, RadioConfig::default())), device)
}

fn inventory(epc: &[u8]) -> Packet {
    Packet::build(PacketType::Inventory, epc)
}

/// Start an inventory on a worker thread and wait until it blocks for data.
fn start_blocked_inventory(
    radio: &Arc<Radio<LoopbackTransport>>,
    device: &LoopbackHandle,
) -> thread::JoinHandle<Result<usize, RadioError>> {
    device.queue_response(vec![
        build::command_begin(MacCommand::Inventory.code(), 0),
        inventory(&[0xE2, 0x00, 0x00, 0x01]),
    ]);
    let worker = Arc::clone(radio);
    let handle = thread::spawn(move || {
        let mut packets = 0;
        worker
            .start_operation(MacCommand::Inventory, &[], |_| {
                packets += 1;
                PacketFlow::Continue
            })
            .map(|()| packets)
    });
    assert!(device.wait_for_blocked_reader(BLOCK_WAIT));
    handle
}

#[test]
fn test_cancel_interrupts_blocked_read() {
    let (radio, device) = shared_radio();
    let worker = start_blocked_inventory(&radio, &device);

    radio.cancel_operation().unwrap();

    // cancel_operation only returns once the worker has let go of the radio
    assert!(!radio.is_busy());
    assert!(radio.was_cancelled());
    assert!(matches!(
        worker.join().unwrap(),
        Err(RadioError::OperationCancelled)
    ));
    assert_eq!(device.cancel_count(), 1);
}

#[test]
fn test_cancel_drains_until_command_end() {
    let (radio, device) = shared_radio();
    device.set_cancel_response(vec![
        inventory(&[0xE2, 0x00, 0x00, 0x02]),
        build::command_end(12, 0),
    ]);
    let worker = start_blocked_inventory(&radio, &device);

    radio.cancel_operation().unwrap();

    assert!(matches!(
        worker.join().unwrap(),
        Err(RadioError::OperationCancelled)
    ));
    assert!(radio.was_cancelled());
}

#[test]
fn test_abort_discards_buffered_input() {
    let (radio, device) = shared_radio();
    let worker = start_blocked_inventory(&radio, &device);

    radio.abort_operation().unwrap();

    assert!(matches!(
        worker.join().unwrap(),
        Err(RadioError::OperationAborted)
    ));
    assert_eq!(device.abort_count(), 1);
    assert_eq!(radio.stream().cached(), 0);
    assert_eq!(radio.stream().read(&mut []).unwrap(), 0);
}

#[test]
fn test_second_thread_sees_busy() {
    let (radio, device) = shared_radio();
    let worker = start_blocked_inventory(&radio, &device);

    let other = Arc::clone(&radio);
    let result = thread::spawn(move || other.read_mac_register(mac::MAC_VER))
        .join()
        .unwrap();
    assert!(matches!(result, Err(RadioError::DeviceBusy)));

    radio.abort_operation().unwrap();
    assert!(worker.join().unwrap().is_err());
}

#[test]
fn test_close_aborts_command_in_flight() {
    let (radio, device) = shared_radio();
    let worker = start_blocked_inventory(&radio, &device);

    radio.close();

    assert!(matches!(
        worker.join().unwrap(),
        Err(RadioError::OperationAborted)
    ));
    assert!(matches!(
        radio.read_mac_register(mac::MAC_VER),
        Err(RadioError::DeviceDetached)
    ));
}

#[test]
fn test_radio_usable_after_cancel() {
    let (radio, device) = shared_radio();
    let worker = start_blocked_inventory(&radio, &device);
    radio.cancel_operation().unwrap();
    assert!(worker.join().unwrap().is_err());

    device.queue_response(vec![build::register_read(mac::MAC_VER, 0x0104_0000)]);
    assert_eq!(radio.read_mac_register(mac::MAC_VER).unwrap(), 0x0104_0000);
    assert!(!radio.was_cancelled());
}

#[test]
fn test_commands_never_overlap() {
    const THREADS: usize = 4;
    const COMMANDS_PER_THREAD: usize = 10;

    let (radio, device) = shared_radio();
    for _ in 0..THREADS * COMMANDS_PER_THREAD {
        device.queue_response(vec![
            build::command_begin(MacCommand::Inventory.code(), 0),
            inventory(&[0xAB; 4]),
            build::command_end(0, 0),
        ]);
    }

    let active = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let radio = Arc::clone(&radio);
            let active = Arc::clone(&active);
            let overlaps = Arc::clone(&overlaps);
            thread::spawn(move || {
                let mut done = 0;
                while done < COMMANDS_PER_THREAD {
                    let result = radio.start_operation(MacCommand::Inventory, &[], |_| {
                        if active.fetch_add(1, Ordering::SeqCst) != 0 {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        thread::sleep(Duration::from_micros(200));
                        active.fetch_sub(1, Ordering::SeqCst);
                        PacketFlow::Continue
                    });
                    match result {
                        Ok(()) => done += 1,
                        Err(RadioError::DeviceBusy) => thread::yield_now(),
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert!(!radio.is_busy());
}

/// Loopback radio whose cancel signal stalls until the test lets it through.
struct HeldCancelTransport {
    inner: LoopbackTransport,
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl RadioTransport for HeldCancelTransport {
    fn write(&self, data: &[u8]) -> Result<usize, TransportStatus> {
        self.inner.write(data)
    }

    fn read(&self, buf: &mut [u8]) -> Result<RawRead, TransportStatus> {
        self.inner.read(buf)
    }

    fn cancel(&self) -> Result<(), TransportStatus> {
        let _ = self.entered.lock().send(());
        let _ = self.release.lock().recv();
        self.inner.cancel()
    }

    fn abort(&self) -> Result<(), TransportStatus> {
        self.inner.abort()
    }

    fn reset(&self, kind: ResetKind) -> Result<(), TransportStatus> {
        self.inner.reset(kind)
    }

    fn characteristics(&self, buf: &mut [u8]) -> Result<usize, TransportStatus> {
        self.inner.characteristics(buf)
    }
}

#[test]
fn test_late_cancel_signal_never_reaches_next_command() {
    init_logging();
    let (inner, device) = LoopbackTransport::new();
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let transport = HeldCancelTransport {
        inner,
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    };
    let radio = Arc::new(Radio::new(transport, RadioConfig::default()));

    device.queue_response(vec![build::command_begin(MacCommand::Inventory.code(), 0)]);
    let worker = {
        let radio = Arc::clone(&radio);
        thread::spawn(move || {
            radio.start_operation(MacCommand::Inventory, &[], |_| PacketFlow::Continue)
        })
    };
    assert!(device.wait_for_blocked_reader(BLOCK_WAIT));

    let canceller = {
        let radio = Arc::clone(&radio);
        thread::spawn(move || radio.cancel_operation())
    };
    entered_rx.recv_timeout(BLOCK_WAIT).unwrap();

    // The running command finishes on its own while the cancel is stalled,
    // and another thread queues up behind it
    device.push_packet(&build::command_end(0, 0));
    let next = {
        let radio = Arc::clone(&radio);
        thread::spawn(move || loop {
            match radio.read_mac_register(mac::MAC_VER) {
                Err(RadioError::DeviceBusy) => thread::sleep(Duration::from_millis(1)),
                other => return other,
            }
        })
    };
    thread::sleep(Duration::from_millis(50));
    release_tx.send(()).unwrap();

    canceller.join().unwrap().unwrap();
    assert!(matches!(
        worker.join().unwrap(),
        Err(RadioError::OperationCancelled)
    ));

    // The next command starts only after the cancel was delivered
    assert!(device.wait_for_blocked_reader(BLOCK_WAIT));
    device.push_packet(&build::register_read(mac::MAC_VER, 0x0104_0000));
    assert_eq!(next.join().unwrap().unwrap(), 0x0104_0000);
    assert!(!radio.was_cancelled());
}
