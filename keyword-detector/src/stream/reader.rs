//! Consumer handle for a [`Stream`].

use super::{Index, Stream, StreamError};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// How a reader behaves when it has caught up with the writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderPolicy {
    /// Wait for at least one word or end-of-stream
    Blocking,

    /// Return [`StreamError::WouldBlock`] immediately
    NonBlocking,
}

/// Independent cursor over a stream.
///
/// Each reader keeps its own index; closing or dropping one has no effect on
/// the writer or on other readers.
pub struct Reader {
    stream: Stream,
    id: usize,
    policy: ReaderPolicy,
    closed: bool,
}

impl Reader {
    pub(super) fn new(stream: Stream, id: usize, policy: ReaderPolicy) -> Self {
        Self {
            stream,
            id,
            policy,
            closed: false,
        }
    }

    /// Read up to `buf.len() / word_size` words into `buf`.
    ///
    /// Returns the number of words read, or `Ok(0)` once the writer is closed
    /// and everything has been consumed.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        self.read_until(buf, None)
    }

    /// Like [`Reader::read`], but a blocking reader gives up with
    /// [`StreamError::TimedOut`] after `timeout`.
    pub fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, StreamError> {
        self.read_until(buf, Some(Instant::now() + timeout))
    }

    fn read_until(
        &mut self,
        buf: &mut [u8],
        deadline: Option<Instant>,
    ) -> Result<usize, StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }

        let shared = &self.stream.shared;
        let word_size = shared.word_size;
        let capacity = shared.capacity as Index;

        let max_words = (buf.len() / word_size).min(shared.capacity);
        if max_words == 0 {
            return Err(StreamError::InvalidArgument(format!(
                "read buffer of {} bytes cannot hold a {}-byte word",
                buf.len(),
                word_size
            )));
        }

        let (start, words) = {
            let mut state = shared.state.lock();
            loop {
                let index = state.reader_index(self.id)?;
                let write_index = state.write_index;

                if write_index - index > capacity {
                    warn!(
                        "Reader {} overrun: index={}, write_index={}",
                        self.id, index, write_index
                    );
                    return Err(StreamError::ReaderOverrun { index, write_index });
                }

                let available = write_index - index;
                if available > 0 {
                    break (index, (available as usize).min(max_words));
                }

                if state.writer_closed {
                    trace!("Reader {} reached end of stream at {}", self.id, index);
                    return Ok(0);
                }

                match (self.policy, deadline) {
                    (ReaderPolicy::NonBlocking, _) => return Err(StreamError::WouldBlock),
                    (ReaderPolicy::Blocking, None) => shared.data_available.wait(&mut state),
                    (ReaderPolicy::Blocking, Some(deadline)) => {
                        if shared
                            .data_available
                            .wait_until(&mut state, deadline)
                            .timed_out()
                            && state.write_index == index
                            && !state.writer_closed
                        {
                            return Err(StreamError::TimedOut);
                        }
                    }
                }
            }
        };

        let bytes = words * word_size;
        let buffer = shared.buffer.read();
        buffer.read_at(start, &mut buf[..bytes]);

        let mut state = shared.state.lock();
        // An overwriting writer may have lapped this reader while it was
        // waiting for the storage lock.
        let write_index = state.write_index;
        if write_index - start > capacity {
            warn!(
                "Reader {} overrun during copy: index={}, write_index={}",
                self.id, start, write_index
            );
            return Err(StreamError::ReaderOverrun {
                index: start,
                write_index,
            });
        }
        state.set_reader_index(self.id, start + words as Index);
        drop(state);
        drop(buffer);

        shared.space_available.notify_all();
        trace!("Reader {} read {} words at index {}", self.id, words, start);

        Ok(words)
    }

    /// Current read position
    pub fn tell(&self) -> Result<Index, StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        self.stream.shared.state.lock().reader_index(self.id)
    }

    /// Move the read position to `index`.
    ///
    /// This is the only way to recover from an overrun; the reader is never
    /// repositioned automatically.
    pub fn seek(&mut self, index: Index) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }

        let shared = &self.stream.shared;
        {
            let mut state = shared.state.lock();
            state.check_seekable(index, shared.capacity)?;
            state.set_reader_index(self.id, index);
        }
        // Seeking forward may release a waiting writer
        shared.space_available.notify_all();
        debug!("Reader {} repositioned to {}", self.id, index);

        Ok(())
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn policy(&self) -> ReaderPolicy {
        self.policy
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Close the reader and release its slot
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let shared = &self.stream.shared;
        if let Some(slot) = shared.state.lock().readers.get_mut(self.id) {
            *slot = None;
        }
        shared.space_available.notify_all();
        debug!("Reader {} closed", self.id);
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Stream, WriterPolicy};
    use super::*;
    use std::thread;

    #[test]
    fn test_reads_in_order() {
        let stream = Stream::create(16, 1, 1).unwrap();
        let mut reader = stream.create_reader(ReaderPolicy::NonBlocking).unwrap();
        let mut writer = stream.create_writer(WriterPolicy::NonBlocking).unwrap();

        writer.write(&[1, 2, 3]).unwrap();
        writer.write(&[4, 5]).unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(reader.tell().unwrap(), 4);

        assert_eq!(reader.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 5);
    }

    #[test]
    fn test_non_blocking_read_would_block() {
        let stream = Stream::create(16, 1, 1).unwrap();
        let mut reader = stream.create_reader(ReaderPolicy::NonBlocking).unwrap();
        let _writer = stream.create_writer(WriterPolicy::NonBlocking).unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf), Err(StreamError::WouldBlock));
    }

    #[test]
    fn test_read_timeout() {
        let stream = Stream::create(16, 1, 1).unwrap();
        let mut reader = stream.create_reader(ReaderPolicy::Blocking).unwrap();
        let _writer = stream.create_writer(WriterPolicy::NonBlocking).unwrap();

        let mut buf = [0u8; 4];
        let started = Instant::now();
        assert_eq!(
            reader.read_timeout(&mut buf, Duration::from_millis(30)),
            Err(StreamError::TimedOut)
        );
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_buffer_smaller_than_word() {
        let stream = Stream::create(16, 1, 4).unwrap();
        let mut reader = stream.create_reader(ReaderPolicy::NonBlocking).unwrap();
        let mut buf = [0u8; 3];
        assert!(matches!(
            reader.read(&mut buf),
            Err(StreamError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_blocking_read_wakes_on_write() {
        let stream = Stream::create(16, 1, 1).unwrap();
        let mut reader = stream.create_reader(ReaderPolicy::Blocking).unwrap();
        let mut writer = stream.create_writer(WriterPolicy::NonBlocking).unwrap();

        let handle = thread::spawn(move || {
            let mut buf = [0u8; 8];
            let n = reader.read(&mut buf).unwrap();
            buf[..n].to_vec()
        });

        thread::sleep(Duration::from_millis(20));
        writer.write(&[9, 8, 7]).unwrap();

        assert_eq!(handle.join().unwrap(), vec![9, 8, 7]);
    }

    #[test]
    fn test_drain_then_end_of_stream() {
        let stream = Stream::create(16, 1, 1).unwrap();
        let mut reader = stream.create_reader(ReaderPolicy::Blocking).unwrap();
        let mut writer = stream.create_writer(WriterPolicy::NonBlocking).unwrap();

        writer.write(&[1, 2, 3, 4, 5]).unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(reader.read(&mut buf).unwrap(), 2);

        writer.close();

        let mut rest = [0u8; 8];
        assert_eq!(reader.read(&mut rest).unwrap(), 3);
        assert_eq!(&rest[..3], &[3, 4, 5]);
        assert_eq!(reader.read(&mut rest).unwrap(), 0);
        assert_eq!(reader.read(&mut rest).unwrap(), 0);
    }

    #[test]
    fn test_close_wakes_blocked_reader() {
        let stream = Stream::create(16, 1, 1).unwrap();
        let mut reader = stream.create_reader(ReaderPolicy::Blocking).unwrap();
        let mut writer = stream.create_writer(WriterPolicy::NonBlocking).unwrap();

        let handle = thread::spawn(move || {
            let mut buf = [0u8; 8];
            reader.read(&mut buf)
        });

        thread::sleep(Duration::from_millis(20));
        writer.close();

        assert_eq!(handle.join().unwrap(), Ok(0));
    }

    #[test]
    fn test_overrun_and_recovery() {
        let stream = Stream::create(4, 1, 1).unwrap();
        let mut reader = stream.create_reader(ReaderPolicy::NonBlocking).unwrap();
        let mut writer = stream.create_writer(WriterPolicy::Overwrite).unwrap();

        writer.write(&[1, 2, 3, 4]).unwrap();
        writer.write(&[5]).unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(
            reader.read(&mut buf),
            Err(StreamError::ReaderOverrun {
                index: 0,
                write_index: 5
            })
        );
        // Still overrun until repositioned
        assert!(reader.read(&mut buf).is_err());

        reader.seek(stream.write_index()).unwrap();
        writer.write(&[6, 7]).unwrap();
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[6, 7]);
    }

    #[test]
    fn test_overrun_while_waiting_for_storage() {
        let stream = Stream::create(4, 1, 1).unwrap();
        let mut reader = stream.create_reader(ReaderPolicy::NonBlocking).unwrap();
        let mut writer = stream.create_writer(WriterPolicy::Overwrite).unwrap();
        writer.write(&[1, 2, 3, 4]).unwrap();

        // Hold the storage so the reader stalls after picking its range
        let storage = stream.shared.buffer.write();
        let handle = thread::spawn(move || {
            let mut buf = [0u8; 4];
            let result = reader.read(&mut buf);
            (result, reader)
        });
        thread::sleep(Duration::from_millis(50));

        // A writer lapping the reader in the meantime
        stream.shared.state.lock().write_index = 9;
        drop(storage);

        let (result, reader) = handle.join().unwrap();
        assert_eq!(
            result,
            Err(StreamError::ReaderOverrun {
                index: 0,
                write_index: 9
            })
        );
        assert_eq!(reader.tell().unwrap(), 0);
    }

    #[test]
    fn test_lag_of_exactly_capacity_is_not_overrun() {
        let stream = Stream::create(4, 1, 1).unwrap();
        let mut reader = stream.create_reader(ReaderPolicy::NonBlocking).unwrap();
        let mut writer = stream.create_writer(WriterPolicy::Overwrite).unwrap();

        writer.write(&[1, 2, 3, 4]).unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn test_seek_bounds() {
        let stream = Stream::create(4, 1, 1).unwrap();
        let mut reader = stream.create_reader(ReaderPolicy::NonBlocking).unwrap();
        let mut writer = stream.create_writer(WriterPolicy::Overwrite).unwrap();
        writer.write(&[1, 2, 3, 4]).unwrap();
        writer.write(&[5, 6]).unwrap();

        assert!(reader.seek(1).is_err());
        assert!(reader.seek(7).is_err());
        reader.seek(3).unwrap();
        assert_eq!(reader.tell().unwrap(), 3);
    }

    #[test]
    fn test_closed_reader() {
        let stream = Stream::create(4, 1, 1).unwrap();
        let mut reader = stream.create_reader(ReaderPolicy::NonBlocking).unwrap();
        reader.close();

        let mut buf = [0u8; 1];
        assert_eq!(reader.read(&mut buf), Err(StreamError::Closed));
        assert_eq!(reader.tell(), Err(StreamError::Closed));
        assert_eq!(reader.seek(0), Err(StreamError::Closed));
        assert_eq!(stream.reader_count(), 0);
    }

    #[test]
    fn test_closing_one_reader_leaves_others() {
        let stream = Stream::create(8, 2, 1).unwrap();
        let mut first = stream.create_reader(ReaderPolicy::NonBlocking).unwrap();
        let mut second = stream.create_reader(ReaderPolicy::NonBlocking).unwrap();
        let mut writer = stream.create_writer(WriterPolicy::NonBlocking).unwrap();

        writer.write(&[1, 2]).unwrap();
        first.close();

        let mut buf = [0u8; 2];
        assert_eq!(second.read(&mut buf).unwrap(), 2);
        assert_eq!(writer.write(&[3]).unwrap(), 1);
        assert!(first.is_closed());
        assert!(!writer.is_closed());
    }
}
