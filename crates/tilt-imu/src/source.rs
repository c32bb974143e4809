//! Byte sources feeding the packet decoder.
//!
//! The core never touches a device directly. Anything that can hand over
//! "whatever bytes have arrived" implements [`ByteSource`]: a serial port,
//! a raw capture file, or an in-memory script of chunks for tests.

use crate::error::ImuError;
use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;
use tokio_serial::SerialPort;

/// Read timeout on the serial port. Bounds how long a stop request waits.
const SERIAL_TIMEOUT: Duration = Duration::from_millis(10);

/// Chunk size for plain `Read` sources.
const READ_CHUNK: usize = 4096;

/// Chunks a `ReaderSource` helper may read ahead of the producer.
const READ_QUEUE_DEPTH: usize = 16;

/// A non-blocking (or briefly blocking) supplier of raw bytes.
pub trait ByteSource: Send {
    /// Return the bytes that arrived since the last call. An empty vec means
    /// nothing is available yet. Blocks for a bounded time at most, so the
    /// producer can notice a stop request.
    fn read_available(&mut self) -> Result<Vec<u8>, ImuError>;

    /// Whether more bytes may still arrive.
    fn is_open(&self) -> bool;

    /// Release the underlying resource. Idempotent, and must not wait on
    /// a pending read.
    fn close(&mut self);
}

/// Names of the serial ports present on this machine.
pub fn available_ports() -> Result<Vec<String>, ImuError> {
    let ports = tokio_serial::available_ports().map_err(io::Error::from)?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// Serial port carrying the sensor's telemetry stream.
pub struct SerialSource {
    name: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialSource {
    pub fn open(name: &str, baud_rate: u32) -> Result<Self, ImuError> {
        let port = tokio_serial::new(name, baud_rate)
            .timeout(SERIAL_TIMEOUT)
            .open()
            .map_err(io::Error::from)?;
        tracing::info!(port = name, baud_rate, "Opened serial port");

        Ok(Self {
            name: name.to_owned(),
            port: Some(port),
        })
    }
}

impl ByteSource for SerialSource {
    fn read_available(&mut self) -> Result<Vec<u8>, ImuError> {
        let Some(port) = self.port.as_mut() else {
            return Ok(Vec::new());
        };

        let available = match port.bytes_to_read() {
            Ok(n) => n as usize,
            Err(e) => {
                self.close();
                return Err(io::Error::from(e).into());
            }
        };
        if available == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; available];
        match port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => {
                self.close();
                Err(e.into())
            }
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            tracing::info!(port = %self.name, "Closed serial port");
        }
    }
}

/// Any [`Read`] implementation, e.g. a raw binary capture or a pipe. End of
/// file closes the source.
///
/// The blocking reads run on a helper thread and arrive over a bounded
/// channel, so `read_available` and `close` return immediately even while a
/// read is stuck. A helper blocked at close time exits after its next read
/// returns.
pub struct ReaderSource {
    chunks_rx: Option<std_mpsc::Receiver<io::Result<Vec<u8>>>>,
}

impl ReaderSource {
    pub fn new<R: Read + Send + 'static>(reader: R) -> Result<Self, ImuError> {
        let (chunks_tx, chunks_rx) = std_mpsc::sync_channel(READ_QUEUE_DEPTH);
        std::thread::Builder::new()
            .name("tilt-imu-read".into())
            .spawn(move || read_chunks(reader, chunks_tx))?;

        Ok(Self {
            chunks_rx: Some(chunks_rx),
        })
    }
}

/// Helper loop: forward chunks until EOF, an error, or the receiver closing.
fn read_chunks<R: Read>(mut reader: R, chunks_tx: std_mpsc::SyncSender<io::Result<Vec<u8>>>) {
    loop {
        let mut buf = vec![0u8; READ_CHUNK];
        let chunk = match reader.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => Err(e),
        };
        let failed = chunk.is_err();
        if chunks_tx.send(chunk).is_err() || failed {
            return;
        }
    }
}

impl ByteSource for ReaderSource {
    fn read_available(&mut self) -> Result<Vec<u8>, ImuError> {
        let Some(chunks_rx) = self.chunks_rx.as_ref() else {
            return Ok(Vec::new());
        };

        match chunks_rx.try_recv() {
            Ok(Ok(chunk)) => Ok(chunk),
            Ok(Err(e)) => {
                self.close();
                Err(e.into())
            }
            Err(std_mpsc::TryRecvError::Empty) => Ok(Vec::new()),
            Err(std_mpsc::TryRecvError::Disconnected) => {
                self.close();
                Ok(Vec::new())
            }
        }
    }

    fn is_open(&self) -> bool {
        self.chunks_rx.is_some()
    }

    fn close(&mut self) {
        self.chunks_rx = None;
    }
}

/// Scripted sequence of chunks, handed out one per read. Closes once the
/// script runs out.
#[derive(Debug, Default)]
pub struct ChunkSource {
    chunks: VecDeque<Vec<u8>>,
}

impl ChunkSource {
    pub fn new<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Vec<u8>>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
        }
    }
}

impl ByteSource for ChunkSource {
    fn read_available(&mut self) -> Result<Vec<u8>, ImuError> {
        Ok(self.chunks.pop_front().unwrap_or_default())
    }

    fn is_open(&self) -> bool {
        !self.chunks.is_empty()
    }

    fn close(&mut self) {
        self.chunks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Instant;

    /// Blocks in `read` until `release` is dropped or sent to.
    struct StuckReader {
        release: std_mpsc::Receiver<()>,
    }

    impl Read for StuckReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            let _ = self.release.recv();
            Ok(0)
        }
    }

    struct BrokenReader;

    impl Read for BrokenReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("pipe broke"))
        }
    }

    #[test]
    fn reader_source_closes_at_eof() {
        let data: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();
        let mut source = ReaderSource::new(io::Cursor::new(data.clone())).unwrap();

        let mut collected = Vec::new();
        while source.is_open() {
            collected.extend(source.read_available().unwrap());
        }

        assert_eq!(collected, data);
        assert!(source.read_available().unwrap().is_empty());
    }

    #[test]
    fn reader_source_surfaces_read_errors() {
        let mut source = ReaderSource::new(BrokenReader).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let err = loop {
            assert!(Instant::now() < deadline, "error never surfaced");
            match source.read_available() {
                Ok(chunk) => assert!(chunk.is_empty()),
                Err(e) => break e,
            }
        };

        assert!(matches!(err, ImuError::Io(_)));
        assert!(!source.is_open());
    }

    #[test]
    fn reader_source_does_not_block_on_a_stuck_read() {
        let (release_tx, release_rx) = std_mpsc::channel();
        let mut source = ReaderSource::new(StuckReader {
            release: release_rx,
        })
        .unwrap();

        let started = Instant::now();
        assert!(source.read_available().unwrap().is_empty());
        assert!(source.is_open());
        source.close();
        assert!(!source.is_open());
        assert!(started.elapsed() < Duration::from_secs(1));

        // lets the helper thread exit
        drop(release_tx);
    }

    #[test]
    fn chunk_source_replays_script() {
        let mut source = ChunkSource::new([vec![1u8, 2], vec![], vec![3]]);

        assert_eq!(source.read_available().unwrap(), vec![1, 2]);
        assert!(source.read_available().unwrap().is_empty());
        assert!(source.is_open());
        assert_eq!(source.read_available().unwrap(), vec![3]);
        assert!(!source.is_open());
    }

    #[test]
    fn close_is_idempotent() {
        let mut source = ChunkSource::new([vec![1u8]]);
        source.close();
        source.close();
        assert!(!source.is_open());
    }
}
