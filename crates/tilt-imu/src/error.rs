use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImuError {
    #[error("Calibration sample count must be greater than zero")]
    ZeroCalibrationSamples,
    #[error("Low-pass cutoff must be a positive, finite frequency (got {0} Hz)")]
    InvalidCutoff(f64),
    #[error("Complementary filter weight must lie in [0, 1] (got {0})")]
    InvalidBlendWeight(f64),
    #[error("Time window must be non-negative and finite (got {0} ms)")]
    InvalidWindow(f64),
    #[error("Byte source I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed capture row: {0}")]
    Csv(#[from] csv::Error),
    #[error("IMU reader thread panicked")]
    ReaderPanicked,
}
