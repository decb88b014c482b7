//! Radio session configuration

use crate::cache::DEFAULT_CACHE_CAPACITY;

/// Tunables for a [`Radio`](crate::Radio) session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioConfig {
    /// Capacity of the read-ahead byte cache
    pub cache_capacity: usize,
    /// Largest inbound packet accepted, header included. Replaced by the
    /// transport's reported limit when the radio is opened.
    pub max_packet_size: usize,
    /// Initial serial-number buffer used while enumerating radios
    pub initial_serial_capacity: usize,
}

impl RadioConfig {
    pub const DEFAULT_MAX_PACKET_SIZE: usize = 4096;
    pub const DEFAULT_SERIAL_CAPACITY: usize = 16;

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    pub fn with_initial_serial_capacity(mut self, capacity: usize) -> Self {
        self.initial_serial_capacity = capacity;
        self
    }
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            max_packet_size: Self::DEFAULT_MAX_PACKET_SIZE,
            initial_serial_capacity: Self::DEFAULT_SERIAL_CAPACITY,
        }
    }
}
