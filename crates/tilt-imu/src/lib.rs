pub mod calibration;
pub mod capture;
pub mod error;
pub mod fusion;
pub mod pipeline;
pub mod protocol;
pub mod reader;
pub mod source;
pub mod types;
pub mod window;

pub use calibration::Calibrator;
pub use error::ImuError;
pub use fusion::{FusionSettings, LowPassFilter, OrientationEstimator};
pub use pipeline::{FusionPipeline, ImuSettings};
pub use protocol::PacketDecoder;
pub use reader::SampleReader;
pub use source::ByteSource;
pub use types::{OrientationRecord, RawSample, Vector3};
pub use window::{SharedTimeWindow, TimeWindowBuffer};

/// Client for a streaming IMU.
///
/// Owns the background reader and the calibrate-then-fuse stage, and
/// publishes fused records into a shared time window that any sink can
/// read from another thread.
pub struct ImuClient {
    reader: SampleReader,
    pipeline: FusionPipeline,
    window: SharedTimeWindow,
}

impl ImuClient {
    /// Spawn the reader on `source` and prepare the fusion stage.
    pub fn start<S: ByteSource + 'static>(
        source: S,
        settings: ImuSettings,
        window_ms: f64,
    ) -> Result<Self, ImuError> {
        let pipeline = FusionPipeline::new(settings)?;
        let window = SharedTimeWindow::new(window_ms)?;
        let reader = SampleReader::spawn(source)?;
        tracing::info!(
            calibration_samples = settings.calibration_samples,
            window_ms,
            "IMU client started"
        );

        Ok(Self {
            reader,
            pipeline,
            window,
        })
    }

    /// Process every queued sample without blocking.
    ///
    /// Returns the raw samples handled, in arrival order, so callers can
    /// tap the uncalibrated stream.
    pub fn poll(&mut self) -> Vec<RawSample> {
        let samples = self.reader.drain();
        for sample in &samples {
            self.pipeline.push(*sample);
        }
        self.window.extend(self.pipeline.drain());
        samples
    }

    /// Process a single queued sample, publishing any record it produces.
    /// For callers that act on the stream sample by sample.
    pub fn next_sample(&mut self) -> Option<RawSample> {
        let sample = self.reader.try_next()?;
        self.pipeline.push(sample);
        self.window.extend(self.pipeline.drain());
        Some(sample)
    }

    /// Handle to the published records.
    pub fn window(&self) -> SharedTimeWindow {
        self.window.clone()
    }

    pub fn pipeline(&self) -> &FusionPipeline {
        &self.pipeline
    }

    /// Whether calibration is complete.
    pub fn is_calibrated(&self) -> bool {
        self.pipeline.calibrator().is_calibrated()
    }

    /// The reader has stopped and its queue is fully consumed.
    pub fn is_finished(&self) -> bool {
        self.reader.is_finished()
    }

    /// Stop and join the reader. Samples it already queued are still
    /// returned by later `poll` calls.
    pub fn stop(&mut self) -> Result<(), ImuError> {
        self.reader.stop()
    }
}
