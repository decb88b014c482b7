//! Fixed-capacity circular byte buffer sitting between the transport and the
//! packet reader.

/// Default cache capacity in bytes
pub const DEFAULT_CACHE_CAPACITY: usize = 2048;

/// Circular FIFO of bytes with a fixed capacity.
///
/// `head` is the offset of the oldest byte, `tail` the offset the next byte
/// is written to. Both wrap modulo the capacity; `used` disambiguates the
/// empty and full cases where `head == tail`.
#[derive(Debug)]
pub struct ByteCache {
    storage: Box<[u8]>,
    head: usize,
    tail: usize,
    used: usize,
}

impl ByteCache {
    /// Create an empty cache holding at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be non-zero");
        Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            head: 0,
            tail: 0,
            used: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub fn bytes_used(&self) -> usize {
        self.used
    }

    pub fn bytes_free(&self) -> usize {
        self.capacity() - self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    pub fn is_full(&self) -> bool {
        self.used == self.capacity()
    }

    /// Discard every cached byte
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.used = 0;
    }

    /// Append `bytes`.
    ///
    /// # Panics
    /// If `bytes` does not fit in [`bytes_free`](Self::bytes_free).
    pub fn add(&mut self, bytes: &[u8]) {
        assert!(
            bytes.len() <= self.bytes_free(),
            "cache overrun: adding {} bytes with {} free",
            bytes.len(),
            self.bytes_free()
        );

        let capacity = self.capacity();
        let first = bytes.len().min(capacity - self.tail);
        self.storage[self.tail..self.tail + first].copy_from_slice(&bytes[..first]);
        // Wrapped remainder goes to the start of storage
        let rest = bytes.len() - first;
        self.storage[..rest].copy_from_slice(&bytes[first..]);

        self.tail = (self.tail + bytes.len()) % capacity;
        self.used += bytes.len();
    }

    /// Append `bytes` if they fit; returns `false` and leaves the cache
    /// untouched otherwise.
    pub fn try_add(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.bytes_free() {
            return false;
        }
        self.add(bytes);
        true
    }

    /// Move the oldest `out.len()` bytes into `out`.
    ///
    /// # Panics
    /// If more bytes are requested than [`bytes_used`](Self::bytes_used).
    pub fn remove_into(&mut self, out: &mut [u8]) {
        assert!(
            out.len() <= self.used,
            "cache underrun: removing {} bytes with {} used",
            out.len(),
            self.used
        );

        let capacity = self.capacity();
        let first = out.len().min(capacity - self.head);
        out[..first].copy_from_slice(&self.storage[self.head..self.head + first]);
        let rest = out.len() - first;
        out[first..].copy_from_slice(&self.storage[..rest]);

        self.head = (self.head + out.len()) % capacity;
        self.used -= out.len();
    }

    /// Remove and return the oldest `count` bytes.
    ///
    /// # Panics
    /// If `count` exceeds [`bytes_used`](Self::bytes_used).
    pub fn remove(&mut self, count: usize) -> Vec<u8> {
        let mut out = vec![0u8; count];
        self.remove_into(&mut out);
        out
    }
}

impl Default for ByteCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}
