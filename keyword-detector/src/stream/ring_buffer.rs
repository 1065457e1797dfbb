//! Fixed-size word storage addressed by absolute stream index.
//!
//! The buffer knows nothing about readers or writers; it only maps a
//! monotonically increasing [`Index`] onto a slot and copies whole words in
//! and out, wrapping around the end of the allocation.

use super::{Index, StreamError};
use tracing::debug;

/// Raw storage for `capacity` words of `word_size` bytes each.
pub struct RingBuffer {
    data: Box<[u8]>,
    capacity: usize,
    word_size: usize,
}

impl RingBuffer {
    /// Allocate zeroed storage for `capacity` words.
    pub fn new(capacity: usize, word_size: usize) -> Result<Self, StreamError> {
        if capacity == 0 {
            return Err(StreamError::InvalidArgument(
                "capacity must be greater than 0".to_string(),
            ));
        }
        if word_size == 0 {
            return Err(StreamError::InvalidArgument(
                "word size must be greater than 0".to_string(),
            ));
        }

        let bytes = capacity.checked_mul(word_size).ok_or_else(|| {
            StreamError::InvalidArgument(format!(
                "{} words of {} bytes overflows the address space",
                capacity, word_size
            ))
        })?;

        debug!(
            "Allocating ring buffer: {} words x {} bytes ({} bytes)",
            capacity, word_size, bytes
        );

        Ok(Self {
            data: vec![0u8; bytes].into_boxed_slice(),
            capacity,
            word_size,
        })
    }

    /// Number of words the buffer holds
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Size of one word in bytes
    pub fn word_size(&self) -> usize {
        self.word_size
    }

    /// Byte offset of the slot holding `index`
    fn offset(&self, index: Index) -> usize {
        (index % self.capacity as u64) as usize * self.word_size
    }

    /// Copy `src` into the slots starting at `index`.
    ///
    /// `src` must hold whole words and no more than `capacity` of them.
    pub fn write_at(&mut self, index: Index, src: &[u8]) {
        debug_assert!(src.len() % self.word_size == 0);
        debug_assert!(src.len() <= self.data.len());

        let start = self.offset(index);
        let first = src.len().min(self.data.len() - start);
        self.data[start..start + first].copy_from_slice(&src[..first]);

        let rest = src.len() - first;
        if rest > 0 {
            self.data[..rest].copy_from_slice(&src[first..]);
        }
    }

    /// Copy the slots starting at `index` into `dst`.
    ///
    /// `dst` must hold whole words and no more than `capacity` of them.
    pub fn read_at(&self, index: Index, dst: &mut [u8]) {
        debug_assert!(dst.len() % self.word_size == 0);
        debug_assert!(dst.len() <= self.data.len());

        let start = self.offset(index);
        let first = dst.len().min(self.data.len() - start);
        dst[..first].copy_from_slice(&self.data[start..start + first]);

        let rest = dst.len() - first;
        if rest > 0 {
            dst[first..].copy_from_slice(&self.data[..rest]);
        }
    }
}
