//! The stream gate: streamed column access at most once per row fetch.
//!
//! Every time the cursor materializes a row, the gate is reset and its
//! generation advances. Stream handles remember the generation they were
//! opened under and stop reading once it moves on, so a stream can never
//! observe a row other than the one it was opened for.
//!
//! ```text
//!   next() ──► reset (gen 4) ──► get_binary_stream(2) ──► handle{gen 4}
//!                                get_blob(2)          ──► StreamAlreadyRetrieved
//!   next() ──► reset (gen 5) ──► handle{gen 4}.read() ──► "stream closed"
//! ```

use std::collections::HashSet;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tessera_common::constants::STREAM_COPY_CHUNK;
use tessera_common::types::RowId;
use tessera_common::{TesseraError, TesseraResult};

/// What keeps a stream readable.
#[derive(Debug, Clone)]
enum Guard {
    /// Valid while the cursor stays on the fetch it was opened for.
    Fetch {
        generation: Arc<AtomicU64>,
        opened_at: u64,
        closed: Arc<AtomicBool>,
    },
    /// Valid while the LOB locator it was produced from is valid.
    Locator(Arc<AtomicBool>),
}

impl Guard {
    fn check(&self) -> io::Result<()> {
        match self {
            Guard::Fetch {
                generation,
                opened_at,
                closed,
            } => {
                if closed.load(Ordering::Acquire) {
                    return Err(io::Error::new(
                        io::ErrorKind::Other,
                        TesseraError::closed("read"),
                    ));
                }
                if generation.load(Ordering::Acquire) != *opened_at {
                    return Err(io::Error::new(
                        io::ErrorKind::Other,
                        "stream closed: the cursor moved off its row",
                    ));
                }
                Ok(())
            }
            Guard::Locator(valid) => {
                if valid.load(Ordering::Acquire) {
                    Ok(())
                } else {
                    Err(io::Error::new(
                        io::ErrorKind::Other,
                        TesseraError::invalid_lob("locator is no longer valid"),
                    ))
                }
            }
        }
    }
}

/// Permission to stream one column of one fetched row.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    row_id: RowId,
    column: usize,
    guard: Guard,
}

impl StreamHandle {
    pub(crate) fn for_locator(row_id: RowId, column: usize, valid: Arc<AtomicBool>) -> Self {
        Self {
            row_id,
            column,
            guard: Guard::Locator(valid),
        }
    }

    /// The row the handle was opened for.
    pub fn row_id(&self) -> RowId {
        self.row_id
    }

    /// The 1-based column the handle was opened for.
    pub fn column(&self) -> usize {
        self.column
    }

    /// Returns true while reads can succeed.
    pub fn is_open(&self) -> bool {
        self.guard.check().is_ok()
    }
}

/// Tracks which columns of the current fetch have been streamed.
#[derive(Debug)]
pub struct StreamGate {
    used: HashSet<usize>,
    generation: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl StreamGate {
    /// Creates a gate tied to the cursor's closed flag.
    pub fn new(closed: Arc<AtomicBool>) -> Self {
        Self {
            used: HashSet::new(),
            generation: Arc::new(AtomicU64::new(0)),
            closed,
        }
    }

    /// Starts a new fetch. Handles of the previous fetch stop reading.
    pub fn reset(&mut self) {
        self.used.clear();
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Opens a stream for a 1-based column of the current row.
    ///
    /// # Errors
    ///
    /// `StreamAlreadyRetrieved` if the column was already streamed since the
    /// last reset.
    pub fn open_stream(&mut self, row_id: RowId, column: usize) -> TesseraResult<StreamHandle> {
        self.check(column)?;
        self.used.insert(column);
        Ok(StreamHandle {
            row_id,
            column,
            guard: Guard::Fetch {
                generation: Arc::clone(&self.generation),
                opened_at: self.generation.load(Ordering::Acquire),
                closed: Arc::clone(&self.closed),
            },
        })
    }

    /// Fails if the column was already streamed, without marking it.
    pub fn check(&self, column: usize) -> TesseraResult<()> {
        if self.used.contains(&column) {
            return Err(TesseraError::StreamAlreadyRetrieved { column });
        }
        Ok(())
    }

    /// Returns true if the column was streamed since the last reset.
    pub fn is_used(&self, column: usize) -> bool {
        self.used.contains(&column)
    }

    /// Current fetch generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

/// A binary stream over a column value.
#[derive(Debug)]
pub struct BinaryStream {
    data: Bytes,
    pos: usize,
    handle: StreamHandle,
}

impl BinaryStream {
    pub(crate) fn new(data: Bytes, handle: StreamHandle) -> Self {
        Self {
            data,
            pos: 0,
            handle,
        }
    }

    /// Total length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true for an empty value.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The handle this stream reads under.
    pub fn handle(&self) -> &StreamHandle {
        &self.handle
    }
}

impl Read for BinaryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.handle.guard.check()?;
        let remaining = &self.data[self.pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

/// A character stream over a column value. Reads yield UTF-8.
#[derive(Debug)]
pub struct CharacterStream {
    text: Arc<str>,
    pos: usize,
    handle: StreamHandle,
}

impl CharacterStream {
    pub(crate) fn new(text: Arc<str>, handle: StreamHandle) -> Self {
        Self {
            text,
            pos: 0,
            handle,
        }
    }

    /// Total length in characters.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// The handle this stream reads under.
    pub fn handle(&self) -> &StreamHandle {
        &self.handle
    }
}

impl Read for CharacterStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.handle.guard.check()?;
        let remaining = &self.text.as_bytes()[self.pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

/// Reads a caller-supplied stream into memory.
///
/// The reader is only borrowed; it stays open and usable afterwards. With a
/// declared `length`, exactly that many bytes are read and a shorter stream
/// is an error. Without one, the stream is read to its end. Either way the
/// result may not exceed `max_length`.
pub fn drain_stream<R: Read + ?Sized>(
    reader: &mut R,
    length: Option<u64>,
    max_length: u64,
) -> TesseraResult<Vec<u8>> {
    if let Some(length) = length {
        if length > max_length {
            return Err(TesseraError::LobTooLarge {
                size: length,
                max_size: max_length,
            });
        }
    }

    // Never ask the reader for more than the limit; the rest is the caller's.
    let limit = length.unwrap_or(max_length);
    let mut data = Vec::new();
    let mut chunk = vec![0u8; STREAM_COPY_CHUNK];
    while (data.len() as u64) < limit {
        let want = (limit - data.len() as u64).min(STREAM_COPY_CHUNK as u64) as usize;
        let read = reader.read(&mut chunk[..want])?;
        if read == 0 {
            break;
        }
        data.extend_from_slice(&chunk[..read]);
    }

    match length {
        Some(length) if (data.len() as u64) < length => {
            return Err(TesseraError::invalid_argument(format!(
                "stream ended after {} of {} bytes",
                data.len(),
                length
            )));
        }
        Some(_) => {}
        None => {
            // A stream ending exactly at the limit may still have more.
            if data.len() as u64 == max_length && reader.read(&mut chunk[..1])? > 0 {
                return Err(TesseraError::LobTooLarge {
                    size: max_length + 1,
                    max_size: max_length,
                });
            }
        }
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn gate() -> (StreamGate, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        (StreamGate::new(Arc::clone(&closed)), closed)
    }

    #[test]
    fn test_second_open_fails_until_reset() {
        let (mut gate, _) = gate();
        let row = RowId::new(1);

        gate.open_stream(row, 2).unwrap();
        let err = gate.open_stream(row, 2).unwrap_err();
        assert_eq!(err.sql_state(), "XCL18");
        assert!(gate.check(2).is_err());
        gate.open_stream(row, 3).unwrap();

        gate.reset();
        assert!(!gate.is_used(2));
        gate.open_stream(row, 2).unwrap();
    }

    #[test]
    fn test_dropping_handle_does_not_rearm() {
        let (mut gate, _) = gate();
        drop(gate.open_stream(RowId::new(1), 1).unwrap());
        assert!(gate.open_stream(RowId::new(1), 1).is_err());
    }

    #[test]
    fn test_reset_closes_previous_streams() {
        let (mut gate, _) = gate();
        let handle = gate.open_stream(RowId::new(1), 1).unwrap();
        let mut stream = BinaryStream::new(Bytes::from_static(b"abcdef"), handle);

        let mut buf = [0u8; 3];
        assert_eq!(stream.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"abc");

        gate.reset();
        assert!(!stream.handle().is_open());
        assert!(stream.read(&mut buf).is_err());
    }

    #[test]
    fn test_closed_cursor_fails_reads() {
        let (mut gate, closed) = gate();
        let handle = gate.open_stream(RowId::new(1), 1).unwrap();
        let mut stream = CharacterStream::new(Arc::from("héllo"), handle);
        assert_eq!(stream.char_len(), 5);

        closed.store(true, Ordering::Release);
        let err = stream.read_to_string(&mut String::new()).unwrap_err();
        let inner = err.into_inner().unwrap();
        let inner = inner.downcast::<TesseraError>().unwrap();
        assert_eq!(inner.sql_state(), "XCL16");
    }

    #[test]
    fn test_locator_guard() {
        let valid = Arc::new(AtomicBool::new(true));
        let handle = StreamHandle::for_locator(RowId::new(1), 1, Arc::clone(&valid));
        let mut stream = BinaryStream::new(Bytes::from_static(b"xy"), handle);
        assert_eq!(stream.len(), 2);

        valid.store(false, Ordering::Release);
        assert!(stream.read(&mut [0u8; 2]).is_err());
    }

    #[test]
    fn test_drain_borrows_reader() {
        let mut reader = Cursor::new(vec![7u8; 100]);
        let data = drain_stream(&mut reader, Some(40), 1000).unwrap();
        assert_eq!(data.len(), 40);

        // The caller still owns the reader and can keep using it.
        assert_eq!(reader.position(), 40);

        let rest = drain_stream(&mut reader, None, 1000).unwrap();
        assert_eq!(rest.len(), 60);
    }

    #[test]
    fn test_drain_stops_at_declared_length_across_chunks() {
        let len = STREAM_COPY_CHUNK + 17;
        let mut reader = Cursor::new(vec![3u8; len * 2]);
        let data = drain_stream(&mut reader, Some(len as u64), u64::MAX).unwrap();
        assert_eq!(data.len(), len);
        assert_eq!(reader.position(), len as u64);

        // Without a length the limit check reads one byte past the limit.
        let mut reader = Cursor::new(vec![3u8; 10]);
        assert!(drain_stream(&mut reader, None, 4).is_err());
        assert_eq!(reader.position(), 5);
    }

    #[test]
    fn test_drain_limits() {
        let mut short = Cursor::new(vec![1u8; 10]);
        assert_eq!(drain_stream(&mut short, Some(20), 100).unwrap_err().sql_state(), "XJ081");

        let mut long = Cursor::new(vec![1u8; 101]);
        assert_eq!(drain_stream(&mut long, None, 100).unwrap_err().sql_state(), "22001");

        let mut exact = Cursor::new(vec![1u8; 100]);
        assert_eq!(drain_stream(&mut exact, None, 100).unwrap().len(), 100);

        let mut any = Cursor::new(Vec::new());
        assert_eq!(drain_stream(&mut any, Some(200), 100).unwrap_err().sql_state(), "22001");
    }
}
