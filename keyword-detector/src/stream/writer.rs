//! Producer handle for a [`Stream`].

use super::{Index, Stream, StreamError};
use tracing::{debug, trace, warn};

/// How a writer behaves when readers have not yet consumed enough data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterPolicy {
    /// Wait until the whole write fits behind every open reader
    Blocking,

    /// Write as many words as currently fit, possibly none
    NonBlocking,

    /// Never wait; readers that fall a full buffer behind are overrun
    Overwrite,
}

/// Append-only handle; a stream only ever has one.
///
/// Dropping the writer closes it.
pub struct Writer {
    stream: Stream,
    policy: WriterPolicy,
    closed: bool,
}

impl Writer {
    pub(super) fn new(stream: Stream, policy: WriterPolicy) -> Self {
        Self {
            stream,
            policy,
            closed: false,
        }
    }

    /// Append whole words from `data`.
    ///
    /// Returns the number of words written. The words become visible to
    /// readers only once they are completely copied into the buffer.
    ///
    /// A non-blocking writer accepts requests of any length and writes the
    /// prefix that currently fits. Blocking and overwriting writers reject
    /// requests longer than the buffer capacity with
    /// [`StreamError::InvalidArgument`], since such a write could never be
    /// held in full.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }

        let shared = &self.stream.shared;
        let word_size = shared.word_size;
        let capacity = shared.capacity;

        if data.len() % word_size != 0 {
            return Err(StreamError::InvalidArgument(format!(
                "write of {} bytes is not a whole number of {}-byte words",
                data.len(),
                word_size
            )));
        }

        let requested = data.len() / word_size;
        if requested == 0 {
            return Ok(0);
        }
        if requested > capacity && self.policy != WriterPolicy::NonBlocking {
            return Err(StreamError::InvalidArgument(format!(
                "write of {} words exceeds buffer capacity of {}",
                requested, capacity
            )));
        }

        let (start, words) = {
            let mut state = shared.state.lock();
            loop {
                match self.policy {
                    WriterPolicy::Overwrite => break (state.write_index, requested),
                    WriterPolicy::NonBlocking => {
                        let free = state.free_space(capacity);
                        if free == 0 {
                            trace!("Buffer full, non-blocking write returns 0");
                            return Ok(0);
                        }
                        break (state.write_index, requested.min(free));
                    }
                    WriterPolicy::Blocking => {
                        if state.free_space(capacity) >= requested {
                            break (state.write_index, requested);
                        }
                        trace!("Waiting for space for {} words", requested);
                        shared.space_available.wait(&mut state);
                    }
                }
            }
        };

        // Storage stays locked until the index is published, so a reader that
        // validates its range under the storage lock never sees a torn write.
        let mut buffer = shared.buffer.write();
        buffer.write_at(start, &data[..words * word_size]);
        shared.state.lock().write_index = start + words as Index;
        drop(buffer);

        shared.data_available.notify_all();
        trace!("Wrote {} words at index {}", words, start);

        Ok(words)
    }

    /// Append 16-bit samples, encoded little-endian.
    ///
    /// Only valid on streams with a two-byte word size.
    pub fn write_samples(&mut self, samples: &[i16]) -> Result<usize, StreamError> {
        if self.stream.word_size() != 2 {
            return Err(StreamError::InvalidArgument(format!(
                "16-bit samples need a 2-byte word size, stream uses {}",
                self.stream.word_size()
            )));
        }

        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        self.write(&bytes)
    }

    /// Index the next written word will occupy
    pub fn tell(&self) -> Index {
        self.stream.write_index()
    }

    pub fn policy(&self) -> WriterPolicy {
        self.policy
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Close the writer for good.
    ///
    /// Blocked readers wake up, drain whatever is left and then see
    /// end-of-stream.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let shared = &self.stream.shared;
        let write_index = {
            let mut state = shared.state.lock();
            state.writer_closed = true;
            state.write_index
        };
        shared.data_available.notify_all();
        debug!("Writer closed at index {}", write_index);
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if !self.closed {
            warn!("Writer dropped without close, closing");
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{ReaderPolicy, Stream};
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_rejects_partial_words() {
        let stream = Stream::create(8, 1, 2).unwrap();
        let mut writer = stream.create_writer(WriterPolicy::Blocking).unwrap();
        assert!(matches!(
            writer.write(&[1, 2, 3]),
            Err(StreamError::InvalidArgument(_))
        ));
        assert_eq!(writer.tell(), 0);
    }

    #[test]
    fn test_rejects_oversized_write() {
        let stream = Stream::create(4, 1, 1).unwrap();
        let mut writer = stream.create_writer(WriterPolicy::Overwrite).unwrap();
        assert!(writer.write(&[0; 5]).is_err());
        assert_eq!(writer.write(&[0; 4]).unwrap(), 4);
    }

    #[test]
    fn test_non_blocking_oversized_write_is_truncated() {
        let stream = Stream::create(4, 1, 1).unwrap();
        let mut reader = stream.create_reader(ReaderPolicy::NonBlocking).unwrap();
        let mut writer = stream.create_writer(WriterPolicy::NonBlocking).unwrap();

        assert_eq!(writer.write(&[1, 2, 3, 4, 5]).unwrap(), 4);
        assert_eq!(stream.write_index(), 4);
        assert_eq!(writer.write(&[6, 7, 8, 9, 10]).unwrap(), 0);

        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn test_write_after_close() {
        let stream = Stream::create(8, 1, 1).unwrap();
        let mut writer = stream.create_writer(WriterPolicy::NonBlocking).unwrap();
        writer.close();
        assert!(writer.is_closed());
        assert!(stream.is_writer_closed());
        assert_eq!(writer.write(&[1]), Err(StreamError::Closed));
    }

    #[test]
    fn test_drop_closes_writer() {
        let stream = Stream::create(8, 1, 1).unwrap();
        let writer = stream.create_writer(WriterPolicy::NonBlocking).unwrap();
        drop(writer);
        assert!(stream.is_writer_closed());
    }

    #[test]
    fn test_write_samples_little_endian() {
        let stream = Stream::create(8, 1, 2).unwrap();
        let mut reader = stream.create_reader(ReaderPolicy::NonBlocking).unwrap();
        let mut writer = stream.create_writer(WriterPolicy::NonBlocking).unwrap();

        assert_eq!(writer.write_samples(&[0x0102, -2]).unwrap(), 2);

        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(buf, [0x02, 0x01, 0xFE, 0xFF]);
    }

    #[test]
    fn test_write_samples_needs_two_byte_words() {
        let stream = Stream::create(8, 1, 4).unwrap();
        let mut writer = stream.create_writer(WriterPolicy::NonBlocking).unwrap();
        assert!(writer.write_samples(&[1, 2]).is_err());
    }

    #[test]
    fn test_overwrite_ignores_readers() {
        let stream = Stream::create(4, 1, 1).unwrap();
        let _reader = stream.create_reader(ReaderPolicy::NonBlocking).unwrap();
        let mut writer = stream.create_writer(WriterPolicy::Overwrite).unwrap();

        assert_eq!(writer.write(&[1, 2, 3, 4]).unwrap(), 4);
        assert_eq!(writer.write(&[5, 6, 7, 8]).unwrap(), 4);
        assert_eq!(writer.tell(), 8);
    }

    #[test]
    fn test_blocking_write_waits_for_reader() {
        let stream = Stream::create(4, 1, 1).unwrap();
        let mut reader = stream.create_reader(ReaderPolicy::Blocking).unwrap();
        let mut writer = stream.create_writer(WriterPolicy::Blocking).unwrap();
        writer.write(&[1, 2, 3, 4]).unwrap();

        let handle = thread::spawn(move || {
            // Needs two free slots, so it blocks until the reader catches up
            let written = writer.write(&[5, 6]).unwrap();
            (written, writer)
        });

        thread::sleep(Duration::from_millis(50));
        assert_eq!(stream.write_index(), 4);

        let mut buf = [0u8; 2];
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(buf, [1, 2]);

        let (written, _writer) = handle.join().unwrap();
        assert_eq!(written, 2);
        assert_eq!(stream.write_index(), 6);

        let mut rest = [0u8; 4];
        assert_eq!(reader.read(&mut rest).unwrap(), 4);
        assert_eq!(rest, [3, 4, 5, 6]);
    }

    #[test]
    fn test_blocking_write_released_by_reader_close() {
        let stream = Stream::create(2, 1, 1).unwrap();
        let reader = stream.create_reader(ReaderPolicy::Blocking).unwrap();
        let mut writer = stream.create_writer(WriterPolicy::Blocking).unwrap();
        writer.write(&[1, 2]).unwrap();

        let handle = thread::spawn(move || writer.write(&[3, 4]).map(|n| (n, writer)));

        thread::sleep(Duration::from_millis(50));
        drop(reader);

        let (written, _writer) = handle.join().unwrap().unwrap();
        assert_eq!(written, 2);
    }
}
