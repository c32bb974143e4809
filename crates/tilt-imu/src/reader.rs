use crate::error::ImuError;
use crate::protocol::PacketDecoder;
use crate::source::ByteSource;
use crate::types::RawSample;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;

/// Back-off when the byte source has nothing to offer.
const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Background reader turning a [`ByteSource`] into a stream of samples.
///
/// One named thread polls the source and decodes packets; samples cross to
/// the consumer over an unbounded channel. There is no backpressure: a
/// consumer that stops draining lets the queue grow without limit.
///
/// Dropping the reader stops and joins the thread.
pub struct SampleReader {
    samples_rx: mpsc::UnboundedReceiver<RawSample>,
    stop: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<(), ImuError>>>,
}

/// Clears the running flag when the producer exits, including by panic.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SampleReader {
    pub fn spawn<S: ByteSource + 'static>(source: S) -> Result<Self, ImuError> {
        let (samples_tx, samples_rx) = mpsc::unbounded_channel();
        let stop = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));

        let thread = {
            let stop = stop.clone();
            let running = running.clone();
            std::thread::Builder::new()
                .name("tilt-imu-reader".into())
                .spawn(move || {
                    // Dropped last, after the sender inside `read_loop`.
                    let _running = RunningGuard(running);
                    let result = read_loop(source, samples_tx, &stop);
                    if let Err(e) = &result {
                        tracing::error!(?e, "IMU reader thread exited with error");
                    }
                    result
                })?
        };

        Ok(Self {
            samples_rx,
            stop,
            running,
            thread: Some(thread),
        })
    }

    /// Next buffered sample, or `None` if nothing is queued right now.
    /// Never blocks.
    pub fn try_next(&mut self) -> Option<RawSample> {
        self.samples_rx.try_recv().ok()
    }

    /// Every sample currently queued, in arrival order.
    pub fn drain(&mut self) -> Vec<RawSample> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    /// Whether the producer thread is still polling its source.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// The producer has exited and every sample it sent has been taken.
    pub fn is_finished(&self) -> bool {
        // The sender is dropped before the running flag clears, so nothing
        // can be queued after this reads true.
        !self.is_running() && self.samples_rx.is_empty()
    }

    /// Signal the producer to stop, join it, and report how it ended.
    ///
    /// Samples already queued stay available through `try_next`/`drain`.
    pub fn stop(&mut self) -> Result<(), ImuError> {
        self.stop.store(true, Ordering::Release);
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| ImuError::ReaderPanicked)?,
            None => Ok(()),
        }
    }
}

impl Drop for SampleReader {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(?e, "IMU reader stopped with error");
        }
    }
}

/// Background loop: poll source, decode packets, forward samples.
fn read_loop<S: ByteSource>(
    mut source: S,
    samples_tx: mpsc::UnboundedSender<RawSample>,
    stop: &AtomicBool,
) -> Result<(), ImuError> {
    tracing::debug!("IMU reader thread started");
    let mut decoder = PacketDecoder::new();
    let mut sample_count: u64 = 0;

    let result = loop {
        if stop.load(Ordering::Acquire) {
            tracing::debug!("Stop requested, IMU reader exiting");
            break Ok(());
        }
        if !source.is_open() {
            tracing::info!("Byte source closed");
            break Ok(());
        }

        let chunk = match source.read_available() {
            Ok(chunk) => chunk,
            Err(e) => break Err(e),
        };
        if chunk.is_empty() {
            std::thread::sleep(IDLE_SLEEP);
            continue;
        }

        decoder.push_data(&chunk);
        let mut receiver_gone = false;
        for sample in decoder.samples() {
            if samples_tx.send(sample).is_err() {
                receiver_gone = true;
                break;
            }
            sample_count += 1;
            if sample_count % 1000 == 0 {
                tracing::debug!(sample_count, "IMU samples decoded");
            }
        }
        if receiver_gone {
            tracing::debug!("Sample receiver dropped, IMU reader exiting");
            break Ok(());
        }
    };

    source.close();
    tracing::debug!(
        sample_count,
        dropped_bytes = decoder.dropped_bytes(),
        discarded_tail = decoder.pending(),
        "IMU reader thread finished"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_packet;
    use crate::source::{ChunkSource, ReaderSource};
    use crate::types::Vector3;
    use std::time::Instant;

    /// Fails after handing out its bytes.
    struct FailingSource {
        bytes: Option<Vec<u8>>,
    }

    impl ByteSource for FailingSource {
        fn read_available(&mut self) -> Result<Vec<u8>, ImuError> {
            match self.bytes.take() {
                Some(bytes) => Ok(bytes),
                None => Err(std::io::Error::other("device unplugged").into()),
            }
        }

        fn is_open(&self) -> bool {
            true
        }

        fn close(&mut self) {}
    }

    /// Open forever, never yields a byte.
    struct IdleSource;

    impl ByteSource for IdleSource {
        fn read_available(&mut self) -> Result<Vec<u8>, ImuError> {
            Ok(Vec::new())
        }

        fn is_open(&self) -> bool {
            true
        }

        fn close(&mut self) {}
    }

    /// Panics on the first read.
    struct PanickingSource;

    impl ByteSource for PanickingSource {
        fn read_available(&mut self) -> Result<Vec<u8>, ImuError> {
            panic!("driver fault");
        }

        fn is_open(&self) -> bool {
            true
        }

        fn close(&mut self) {}
    }

    /// Read that never returns until the test lets it.
    struct StuckReader(std::sync::mpsc::Receiver<()>);

    impl std::io::Read for StuckReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            let _ = self.0.recv();
            Ok(0)
        }
    }

    fn packet(t: u32) -> Vec<u8> {
        encode_packet(&RawSample {
            timestamp_ms: t,
            accel: Vector3::X,
            gyro: Vector3::new(0.0, 0.0, t as f64),
        })
        .to_vec()
    }

    fn wait_finished(reader: &mut SampleReader) -> Vec<RawSample> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut samples = Vec::new();
        while !reader.is_finished() {
            assert!(Instant::now() < deadline, "reader never finished");
            samples.extend(reader.drain());
            std::thread::sleep(Duration::from_millis(1));
        }
        samples.extend(reader.drain());
        samples
    }

    #[test]
    fn delivers_samples_in_order_then_finishes() {
        let mut stream = Vec::new();
        for t in 0..50 {
            stream.extend(packet(t));
        }
        let chunks: Vec<Vec<u8>> = stream.chunks(13).map(<[u8]>::to_vec).collect();

        let mut reader = SampleReader::spawn(ChunkSource::new(chunks)).unwrap();
        let samples = wait_finished(&mut reader);

        let times: Vec<u32> = samples.iter().map(|s| s.timestamp_ms).collect();
        assert_eq!(times, (0..50u32).collect::<Vec<_>>());
        assert!(!reader.is_running());
        reader.stop().unwrap();
    }

    #[test]
    fn producer_failure_is_reported() {
        let mut reader = SampleReader::spawn(FailingSource {
            bytes: Some(packet(7)),
        })
        .unwrap();

        let samples = wait_finished(&mut reader);
        assert_eq!(samples.len(), 1);
        assert!(matches!(reader.stop(), Err(ImuError::Io(_))));
    }

    #[test]
    fn stop_joins_an_idle_reader() {
        let mut reader = SampleReader::spawn(IdleSource).unwrap();
        assert!(reader.try_next().is_none());
        assert!(reader.is_running());

        reader.stop().unwrap();
        assert!(!reader.is_running());
        assert!(reader.is_finished());
        // second stop is a no-op
        reader.stop().unwrap();
    }

    #[test]
    fn panicking_source_still_finishes() {
        let mut reader = SampleReader::spawn(PanickingSource).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while reader.is_running() {
            assert!(Instant::now() < deadline, "running flag never cleared");
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(reader.is_finished());
        assert!(matches!(reader.stop(), Err(ImuError::ReaderPanicked)));
    }

    #[test]
    fn stop_is_prompt_while_a_read_is_stuck() {
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let source = ReaderSource::new(StuckReader(release_rx)).unwrap();
        let mut reader = SampleReader::spawn(source).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        reader.stop().unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(reader.is_finished());

        drop(release_tx);
    }
}
