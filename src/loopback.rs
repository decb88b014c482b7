//! In-memory virtual radio.
//!
//! [`LoopbackTransport`] implements [`RadioTransport`] without hardware. The
//! matching [`LoopbackHandle`] plays the device side: it injects inbound
//! bytes and packets, queues responses to commands, and records what the host
//! wrote. Reads block like a real channel until data arrives, the read is
//! cancelled or aborted, or the read timeout elapses.
//!
//! # Example
//!
//! ```
//! use uhf_radio::loopback::LoopbackTransport;
//! use uhf_radio::packet::build;
//! use uhf_radio::{mac, Radio, RadioConfig};
//!
//! let (transport, device) = LoopbackTransport::new();
//! device.queue_response(vec![build::register_read(mac::MAC_VER, 0x0203_0001)]);
//!
//! let radio = Radio::new(transport, RadioConfig::default());
//! assert_eq!(radio.read_mac_register(mac::MAC_VER).unwrap(), 0x0203_0001);
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::mac::{FRAME_LEN, HST_CMD};
use crate::packet::Packet;
use crate::transport::{RadioTransport, RawRead, TransportStatus};
use crate::types::{ResetKind, TransportCharacteristics};

const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

struct State {
    inbound: VecDeque<u8>,
    max_chunk: usize,
    read_timeout: Duration,
    written: Vec<u8>,
    write_limit: Option<usize>,
    responses: VecDeque<Vec<u8>>,
    cancel_response: Option<Vec<u8>>,
    interrupt: Option<TransportStatus>,
    fail_read: Option<(usize, TransportStatus)>,
    characteristics: TransportCharacteristics,
    characteristics_required: Option<usize>,
    characteristics_calls: usize,
    raw_reads: usize,
    cancels: usize,
    aborts: usize,
    resets: Vec<ResetKind>,
    blocked_readers: usize,
}

struct Shared {
    state: Mutex<State>,
    changed: Condvar,
}

/// Host side of the virtual radio.
pub struct LoopbackTransport {
    shared: Arc<Shared>,
}

/// Device side of the virtual radio.
#[derive(Clone)]
pub struct LoopbackHandle {
    shared: Arc<Shared>,
}

impl LoopbackTransport {
    pub fn new() -> (Self, LoopbackHandle) {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                inbound: VecDeque::new(),
                max_chunk: usize::MAX,
                read_timeout: DEFAULT_READ_TIMEOUT,
                written: Vec::new(),
                write_limit: None,
                responses: VecDeque::new(),
                cancel_response: None,
                interrupt: None,
                fail_read: None,
                characteristics: TransportCharacteristics {
                    protocol_version: 1,
                    max_inbound: 4096,
                    max_outbound: 512,
                },
                characteristics_required: None,
                characteristics_calls: 0,
                raw_reads: 0,
                cancels: 0,
                aborts: 0,
                resets: Vec::new(),
                blocked_readers: 0,
            }),
            changed: Condvar::new(),
        });
        (
            Self { shared: shared.clone() },
            LoopbackHandle { shared },
        )
    }
}

/// The last frame of a write asks for a response when it reads a register or
/// starts a command.
fn wants_response(data: &[u8]) -> bool {
    if data.len() < FRAME_LEN {
        return false;
    }
    let frame = &data[data.len() - FRAME_LEN..];
    let address = u16::from_le_bytes([frame[2], frame[3]]);
    frame[0] == 0x00 || address == HST_CMD
}

impl RadioTransport for LoopbackTransport {
    fn write(&self, data: &[u8]) -> Result<usize, TransportStatus> {
        let mut state = self.shared.state.lock();
        let accepted = state.write_limit.map_or(data.len(), |limit| limit.min(data.len()));
        state.written.extend_from_slice(&data[..accepted]);
        // A new command starts a new operation
        state.interrupt = None;
        if wants_response(data) {
            if let Some(response) = state.responses.pop_front() {
                state.inbound.extend(response);
            }
        }
        self.shared.changed.notify_all();
        Ok(accepted)
    }

    fn read(&self, buf: &mut [u8]) -> Result<RawRead, TransportStatus> {
        let mut state = self.shared.state.lock();
        if buf.is_empty() {
            return Ok(RawRead {
                delivered: 0,
                available: state.inbound.len(),
            });
        }

        state.raw_reads += 1;
        if let Some((skip, status)) = state.fail_read.take() {
            if skip == 0 {
                return Err(status);
            }
            state.fail_read = Some((skip - 1, status));
        }
        let deadline = Instant::now() + state.read_timeout;
        loop {
            if let Some(status) = state.interrupt.take() {
                return Err(status);
            }
            if !state.inbound.is_empty() {
                let count = buf.len().min(state.max_chunk).min(state.inbound.len());
                for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..count)) {
                    *slot = byte;
                }
                return Ok(RawRead {
                    delivered: count,
                    available: state.inbound.len(),
                });
            }

            state.blocked_readers += 1;
            self.shared.changed.notify_all();
            let timed_out = self
                .shared
                .changed
                .wait_until(&mut state, deadline)
                .timed_out();
            state.blocked_readers -= 1;
            if timed_out && state.inbound.is_empty() && state.interrupt.is_none() {
                return Err(TransportStatus::Timeout);
            }
        }
    }

    fn cancel(&self) -> Result<(), TransportStatus> {
        let mut state = self.shared.state.lock();
        state.cancels += 1;
        match state.cancel_response.take() {
            Some(response) => state.inbound.extend(response),
            None => state.interrupt = Some(TransportStatus::Cancelled),
        }
        self.shared.changed.notify_all();
        Ok(())
    }

    fn abort(&self) -> Result<(), TransportStatus> {
        let mut state = self.shared.state.lock();
        state.aborts += 1;
        state.inbound.clear();
        state.interrupt = Some(TransportStatus::Aborted);
        self.shared.changed.notify_all();
        Ok(())
    }

    fn reset(&self, kind: ResetKind) -> Result<(), TransportStatus> {
        let mut state = self.shared.state.lock();
        state.resets.push(kind);
        state.inbound.clear();
        state.responses.clear();
        Ok(())
    }

    fn characteristics(&self, buf: &mut [u8]) -> Result<usize, TransportStatus> {
        let mut state = self.shared.state.lock();
        state.characteristics_calls += 1;
        let required = state
            .characteristics_required
            .unwrap_or(TransportCharacteristics::WIRE_LEN);
        if buf.len() < TransportCharacteristics::WIRE_LEN {
            return Err(TransportStatus::BufferTooSmall { required });
        }
        buf[..TransportCharacteristics::WIRE_LEN].copy_from_slice(&state.characteristics.encode());
        Ok(TransportCharacteristics::WIRE_LEN)
    }
}

impl LoopbackHandle {
    /// Make `bytes` readable by the host
    pub fn push_bytes(&self, bytes: &[u8]) {
        self.shared.state.lock().inbound.extend(bytes.iter().copied());
        self.shared.changed.notify_all();
    }

    pub fn push_packet(&self, packet: &Packet) {
        self.push_bytes(&packet.to_bytes());
    }

    /// Queue `packets` to be emitted when the host next reads a register or
    /// starts a command.
    pub fn queue_response(&self, packets: Vec<Packet>) {
        let bytes = packets.iter().flat_map(Packet::to_bytes).collect();
        self.shared.state.lock().responses.push_back(bytes);
    }

    /// Emit `packets` when the host cancels, instead of interrupting the read.
    pub fn set_cancel_response(&self, packets: Vec<Packet>) {
        let bytes = packets.iter().flat_map(Packet::to_bytes).collect();
        self.shared.state.lock().cancel_response = Some(bytes);
    }

    /// Deliver at most `max_chunk` bytes per raw read
    pub fn set_max_chunk(&self, max_chunk: usize) {
        self.shared.state.lock().max_chunk = max_chunk.max(1);
    }

    pub fn set_read_timeout(&self, timeout: Duration) {
        self.shared.state.lock().read_timeout = timeout;
    }

    /// Accept at most `limit` bytes per write
    pub fn set_write_limit(&self, limit: Option<usize>) {
        self.shared.state.lock().write_limit = limit;
    }

    /// Fail the next non-empty read with `status`
    pub fn fail_next_read(&self, status: TransportStatus) {
        self.fail_read_after(0, status);
    }

    /// Let `skip` non-empty reads through, then fail the next one with `status`
    pub fn fail_read_after(&self, skip: usize, status: TransportStatus) {
        self.shared.state.lock().fail_read = Some((skip, status));
        self.shared.changed.notify_all();
    }

    pub fn characteristics(&self) -> TransportCharacteristics {
        self.shared.state.lock().characteristics
    }

    pub fn set_characteristics(&self, characteristics: TransportCharacteristics) {
        self.shared.state.lock().characteristics = characteristics;
    }

    /// Override the size reported with `BufferTooSmall`
    pub fn set_characteristics_required(&self, required: Option<usize>) {
        self.shared.state.lock().characteristics_required = required;
    }

    pub fn characteristics_calls(&self) -> usize {
        self.shared.state.lock().characteristics_calls
    }

    /// Everything the host has written so far
    pub fn written(&self) -> Vec<u8> {
        self.shared.state.lock().written.clone()
    }

    pub fn raw_read_count(&self) -> usize {
        self.shared.state.lock().raw_reads
    }

    pub fn cancel_count(&self) -> usize {
        self.shared.state.lock().cancels
    }

    pub fn abort_count(&self) -> usize {
        self.shared.state.lock().aborts
    }

    pub fn resets(&self) -> Vec<ResetKind> {
        self.shared.state.lock().resets.clone()
    }

    /// Block until a host read is waiting for data, or `timeout` elapses.
    /// Returns whether a reader was seen.
    pub fn wait_for_blocked_reader(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.blocked_readers == 0 {
            if self
                .shared
                .changed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.blocked_readers > 0;
            }
        }
        true
    }
}
