//! Buffered byte stream over a [`RadioTransport`].
//!
//! [`RadioStream`] turns the transport's possibly-partial raw reads into
//! exact-length reads, keeps a read-ahead [`ByteCache`] to cut down on raw
//! round trips, and assembles complete [`Packet`]s.

use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, warn};
use parking_lot::Mutex;

use crate::cache::ByteCache;
use crate::error::{RadioError, Result};
use crate::packet::{HEADER_LEN, Packet, PacketHeader};
use crate::transport::{RadioTransport, RawRead, TransportStatus};
use crate::types::{ResetKind, TransportCharacteristics, bytes_to_hex};

pub struct RadioStream<T: RadioTransport> {
    transport: T,
    cache: Mutex<ByteCache>,
    /// Bumped under the cache lock whenever cached bytes are thrown away
    epoch: AtomicU64,
    /// Interrupt seen by a prefetch, reported by the next blocking read
    deferred: Mutex<Option<TransportStatus>>,
    max_packet_size: usize,
}

impl<T: RadioTransport> RadioStream<T> {
    /// Wrap `transport`, caching up to `cache_capacity` bytes of read-ahead
    pub fn new(transport: T, cache_capacity: usize, max_packet_size: usize) -> Self {
        Self {
            transport,
            cache: Mutex::new(ByteCache::new(cache_capacity)),
            epoch: AtomicU64::new(0),
            deferred: Mutex::new(None),
            max_packet_size,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    pub fn set_max_packet_size(&mut self, size: usize) {
        self.max_packet_size = size;
    }

    /// Bytes currently held in the read-ahead cache
    pub fn cached(&self) -> usize {
        self.cache.lock().bytes_used()
    }

    /// Fill `buf` completely, blocking as needed.
    ///
    /// Returns the number of bytes that can still be read without blocking.
    /// With an empty `buf` nothing is consumed and the return value is the
    /// number of bytes available right now (cache plus transport).
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            let cached = self.cache.lock().bytes_used();
            let raw = self.raw_read(&mut [])?;
            return Ok(cached + raw.available);
        }

        let mut filled = {
            let mut cache = self.cache.lock();
            if cache.bytes_used() >= buf.len() {
                cache.remove_into(buf);
                let cached = cache.bytes_used();
                drop(cache);
                return Ok(cached + self.raw_read(&mut [])?.available);
            }
            let cached = cache.bytes_used();
            cache.remove_into(&mut buf[..cached]);
            cached
        };

        let mut pending = 0;
        while filled < buf.len() {
            let raw = self.raw_read(&mut buf[filled..])?;
            if raw.delivered == 0 {
                return Err(RadioError::RadioNotResponding);
            }
            filled += raw.delivered;
            pending = raw.available;
        }

        if pending > 0 {
            pending = self.prefetch(pending);
        }
        Ok(self.cache.lock().bytes_used() + pending)
    }

    /// Pull up to `pending` bytes into the cache. Returns what is left in the
    /// transport afterwards.
    fn prefetch(&self, mut pending: usize) -> usize {
        let (want, epoch) = {
            let cache = self.cache.lock();
            (pending.min(cache.bytes_free()), self.epoch.load(Ordering::Acquire))
        };
        if want == 0 {
            return pending;
        }

        let mut scratch = vec![0u8; want];
        let mut got = 0;
        while got < want && pending > 0 {
            match self.raw_read(&mut scratch[got..]) {
                Ok(raw) if raw.delivered > 0 => {
                    got += raw.delivered;
                    pending = raw.available;
                }
                Ok(_) => break,
                Err(RadioError::OperationCancelled) => {
                    *self.deferred.lock() = Some(TransportStatus::Cancelled);
                    pending = 0;
                    break;
                }
                Err(e @ (RadioError::OperationAborted | RadioError::ReceiveOverflow)) => {
                    let status = match e {
                        RadioError::ReceiveOverflow => TransportStatus::ReceiveOverflow,
                        _ => TransportStatus::Aborted,
                    };
                    *self.deferred.lock() = Some(status);
                    got = 0;
                    pending = 0;
                    break;
                }
                Err(e) => {
                    debug!("Prefetch stopped after {} of {} bytes: {}", got, want, e);
                    pending = 0;
                    break;
                }
            }
        }

        let mut cache = self.cache.lock();
        if self.epoch.load(Ordering::Acquire) != epoch {
            debug!("Dropping {} prefetched bytes read before an abort", got);
            return 0;
        }
        let keep = got.min(cache.bytes_free());
        cache.add(&scratch[..keep]);
        pending
    }

    fn raw_read(&self, buf: &mut [u8]) -> Result<RawRead> {
        if !buf.is_empty() {
            if let Some(status) = self.deferred.lock().take() {
                return Err(status.into());
            }
        }
        match self.transport.read(buf) {
            Ok(raw) => Ok(raw),
            Err(TransportStatus::ReceiveOverflow) => {
                warn!("Receive overflow, aborting channel to resynchronize");
                if let Err(e) = self.abort() {
                    warn!("Abort after receive overflow failed: {}", e);
                }
                Err(RadioError::ReceiveOverflow)
            }
            Err(status) => Err(status.into()),
        }
    }

    /// Write `data`; the transport must accept all of it
    pub fn write(&self, data: &[u8]) -> Result<()> {
        debug!("Sending: {:02X?}", data);
        // A new command starts without a stale interrupt
        self.deferred.lock().take();
        let written = self.transport.write(data)?;
        if written != data.len() {
            return Err(RadioError::Unexpected(format!(
                "Short write: {} of {} bytes",
                written,
                data.len()
            )));
        }
        Ok(())
    }

    /// Ask the transport to abandon the current operation. Cached bytes are kept.
    pub fn cancel(&self) -> Result<()> {
        self.transport.cancel()?;
        Ok(())
    }

    /// Drop cached bytes, then abort the transport.
    pub fn abort(&self) -> Result<()> {
        // Clear first so bytes racing in with the abort are not kept
        self.discard_cached();
        self.transport.abort()?;
        Ok(())
    }

    pub fn reset(&self, kind: ResetKind) -> Result<()> {
        self.transport.reset(kind)?;
        self.discard_cached();
        Ok(())
    }

    /// Throw away the read-ahead cache, including bytes a prefetch in
    /// progress has not stored yet.
    pub fn discard_cached(&self) {
        let mut cache = self.cache.lock();
        cache.clear();
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Query the transport's characteristics, growing the buffer until the
    /// block fits.
    pub fn characteristics(&self) -> Result<TransportCharacteristics> {
        let mut buf: Vec<u8> = Vec::new();
        loop {
            match self.transport.characteristics(&mut buf) {
                Ok(len) => return TransportCharacteristics::decode(&buf[..len.min(buf.len())]),
                Err(TransportStatus::BufferTooSmall { required }) => {
                    if required <= buf.len() {
                        return Err(RadioError::ProtocolViolation(format!(
                            "Transport asked for {} bytes but already had {}",
                            required,
                            buf.len()
                        )));
                    }
                    debug!("Characteristics need {} bytes, retrying", required);
                    buf.resize(required, 0);
                }
                Err(status) => return Err(status.into()),
            }
        }
    }

    /// Read the next complete packet: header first, then the body it declares.
    pub fn next_packet(&self) -> Result<Packet> {
        let mut raw_header = [0u8; HEADER_LEN];
        self.read(&mut raw_header)?;
        let header = PacketHeader::decode(&raw_header)?;

        if header.total_len() > self.max_packet_size {
            return Err(RadioError::ProtocolViolation(format!(
                "{:?} packet of {} bytes exceeds maximum {}",
                header.packet_type,
                header.total_len(),
                self.max_packet_size
            )));
        }

        let mut body = vec![0u8; header.body_len()];
        if !body.is_empty() {
            self.read(&mut body)?;
        }
        debug!(
            "Received {:?} packet (status {}): {}",
            header.packet_type,
            header.status,
            bytes_to_hex(&body)
        );
        Packet::new(header, body)
    }

    /// Lazy sequence of packets. Ends after the first error.
    pub fn packets(&self) -> Packets<'_, T> {
        Packets { stream: self, failed: false }
    }
}

/// Iterator returned by [`RadioStream::packets`].
pub struct Packets<'a, T: RadioTransport> {
    stream: &'a RadioStream<T>,
    failed: bool,
}

impl<T: RadioTransport> Iterator for Packets<'_, T> {
    type Item = Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let next = self.stream.next_packet();
        self.failed = next.is_err();
        Some(next)
    }
}
