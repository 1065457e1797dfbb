//! Shared audio stream: one writer, many independent readers.
//!
//! A [`Stream`] wraps a fixed-size [`RingBuffer`] and the index bookkeeping
//! that lets every [`Reader`] consume the same audio at its own pace. All
//! positions are expressed as an absolute [`Index`] counted in words since the
//! stream was created, so an index handed from one consumer to another (for
//! example a keyword detection) addresses the same sample for both.
//!
//! Index state and sample storage are guarded separately: bookkeeping lives
//! behind a mutex with two condition variables, while sample copies happen
//! under a reader/writer lock so concurrent readers never serialise on each
//! other.

mod reader;
mod ring_buffer;
mod writer;

pub use reader::{Reader, ReaderPolicy};
pub use ring_buffer::RingBuffer;
pub use writer::{Writer, WriterPolicy};

use cache_padded::CachePadded;
use parking_lot::{Condvar, Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Absolute position in the stream, in words since creation
pub type Index = u64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Reader overrun: index {index} fell more than one buffer behind write index {write_index}")]
    ReaderOverrun { index: Index, write_index: Index },

    #[error("Stream handle closed")]
    Closed,

    #[error("No data available")]
    WouldBlock,

    #[error("Timed out waiting for data")]
    TimedOut,
}

/// Index bookkeeping shared by every handle on a stream
struct StreamState {
    write_index: Index,
    writer_created: bool,
    writer_closed: bool,
    /// Slot per reader id; `Some(index)` while the reader is open
    readers: Vec<Option<Index>>,
}

impl StreamState {
    fn reader_index(&self, id: usize) -> Result<Index, StreamError> {
        self.readers
            .get(id)
            .copied()
            .flatten()
            .ok_or(StreamError::Closed)
    }

    fn set_reader_index(&mut self, id: usize, index: Index) {
        if let Some(slot) = self.readers.get_mut(id) {
            *slot = Some(index);
        }
    }

    /// Words the writer may add without overwriting any open reader's unread data
    fn free_space(&self, capacity: usize) -> usize {
        let slowest = self.readers.iter().flatten().min().copied();
        match slowest {
            Some(index) => {
                let lag = self.write_index.saturating_sub(index);
                capacity.saturating_sub(lag.min(capacity as u64) as usize)
            }
            None => capacity,
        }
    }

    /// Check that `index` still addresses data held by the buffer
    fn check_seekable(&self, index: Index, capacity: usize) -> Result<(), StreamError> {
        if index > self.write_index {
            return Err(StreamError::InvalidArgument(format!(
                "index {} is ahead of write index {}",
                index, self.write_index
            )));
        }
        let oldest = self.write_index.saturating_sub(capacity as u64);
        if index < oldest {
            return Err(StreamError::InvalidArgument(format!(
                "index {} has already been overwritten (oldest available is {})",
                index, oldest
            )));
        }
        Ok(())
    }
}

struct Shared {
    state: CachePadded<Mutex<StreamState>>,
    buffer: CachePadded<RwLock<RingBuffer>>,
    data_available: Condvar,
    space_available: Condvar,
    capacity: usize,
    word_size: usize,
    max_readers: usize,
}

/// Handle on a shared audio stream.
///
/// Cloning is cheap and every clone refers to the same buffer; the storage is
/// released once the last stream, writer and reader handle is dropped.
#[derive(Clone)]
pub struct Stream {
    shared: Arc<Shared>,
}

impl Stream {
    /// Create a stream holding `capacity` words of `word_size` bytes, readable
    /// by at most `max_readers` readers at a time.
    pub fn create(
        capacity: usize,
        max_readers: usize,
        word_size: usize,
    ) -> Result<Self, StreamError> {
        if max_readers == 0 {
            return Err(StreamError::InvalidArgument(
                "max_readers must be greater than 0".to_string(),
            ));
        }

        let buffer = RingBuffer::new(capacity, word_size)?;

        info!(
            "Creating stream: capacity={} words, word_size={} bytes, max_readers={}",
            capacity, word_size, max_readers
        );

        Ok(Self {
            shared: Arc::new(Shared {
                state: CachePadded::new(Mutex::new(StreamState {
                    write_index: 0,
                    writer_created: false,
                    writer_closed: false,
                    readers: vec![None; max_readers],
                })),
                buffer: CachePadded::new(RwLock::new(buffer)),
                data_available: Condvar::new(),
                space_available: Condvar::new(),
                capacity,
                word_size,
                max_readers,
            }),
        })
    }

    /// Create the stream's only writer.
    ///
    /// Fails if a writer has ever been created for this stream, even if it has
    /// since been closed.
    pub fn create_writer(&self, policy: WriterPolicy) -> Result<Writer, StreamError> {
        let mut state = self.shared.state.lock();
        if state.writer_created {
            return Err(StreamError::InvalidArgument(
                "stream already has a writer".to_string(),
            ));
        }
        state.writer_created = true;
        debug!("Created {:?} writer", policy);

        Ok(Writer::new(self.clone(), policy))
    }

    /// Create a reader positioned at the current write index
    pub fn create_reader(&self, policy: ReaderPolicy) -> Result<Reader, StreamError> {
        let start = self.write_index();
        self.create_reader_at(policy, start)
    }

    /// Create a reader positioned at `start_index`.
    ///
    /// The index must not be ahead of the writer and must not have been
    /// overwritten yet.
    pub fn create_reader_at(
        &self,
        policy: ReaderPolicy,
        start_index: Index,
    ) -> Result<Reader, StreamError> {
        let mut state = self.shared.state.lock();

        let id = state
            .readers
            .iter()
            .position(Option::is_none)
            .ok_or_else(|| {
                StreamError::InvalidArgument(format!(
                    "maximum of {} readers already reached",
                    self.shared.max_readers
                ))
            })?;

        state.check_seekable(start_index, self.shared.capacity)?;
        state.readers[id] = Some(start_index);
        debug!(
            "Created {:?} reader {} at index {}",
            policy, id, start_index
        );

        Ok(Reader::new(self.clone(), id, policy))
    }

    /// Total words written since creation
    pub fn write_index(&self) -> Index {
        self.shared.state.lock().write_index
    }

    /// Buffer capacity in words
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Size of one word in bytes
    pub fn word_size(&self) -> usize {
        self.shared.word_size
    }

    pub fn max_readers(&self) -> usize {
        self.shared.max_readers
    }

    /// Number of currently open readers
    pub fn reader_count(&self) -> usize {
        self.shared.state.lock().readers.iter().flatten().count()
    }

    /// Whether the writer has been closed (or dropped)
    pub fn is_writer_closed(&self) -> bool {
        self.shared.state.lock().writer_closed
    }

    /// Whether two handles refer to the same underlying stream
    pub fn ptr_eq(&self, other: &Stream) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Stream")
            .field("capacity", &self.shared.capacity)
            .field("word_size", &self.shared.word_size)
            .field("write_index", &state.write_index)
            .field("readers", &state.readers.iter().flatten().count())
            .field("writer_closed", &state.writer_closed)
            .finish()
    }
}
