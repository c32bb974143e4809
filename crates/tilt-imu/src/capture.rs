//! Space-delimited capture files.
//!
//! A capture holds one raw sample per row under the header
//! `time accel_x accel_y accel_z gyro_x gyro_y gyro_z`. Replaying one
//! through [`FusionPipeline`](crate::FusionPipeline) gives the same records
//! as the live run that wrote it.

use crate::error::ImuError;
use crate::types::{OrientationRecord, RawSample, Vector3};
use serde::Deserialize;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

pub const CAPTURE_COLUMNS: [&str; 7] = [
    "time", "accel_x", "accel_y", "accel_z", "gyro_x", "gyro_y", "gyro_z",
];

/// Vector groups of an exported [`OrientationRecord`], after `time`.
const RECORD_GROUPS: [&str; 8] = [
    "accel",
    "gyro",
    "fused",
    "gyro_integral",
    "gravity_tilt",
    "low_pass_gyro_integral",
    "low_pass_accel",
    "low_pass_gyro",
];

fn vector_fields(v: Vector3) -> impl Iterator<Item = String> {
    v.to_array().into_iter().map(|c| format!("{c:+.6}"))
}

/// Writes raw samples as they arrive, before any calibration.
pub struct CaptureWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl CaptureWriter<File> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, ImuError> {
        let file = File::create(path.as_ref())?;
        tracing::info!(path = %path.as_ref().display(), "Writing capture");
        Self::new(file)
    }
}

impl<W: Write> CaptureWriter<W> {
    pub fn new(inner: W) -> Result<Self, ImuError> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b' ')
            .from_writer(inner);
        writer.write_record(CAPTURE_COLUMNS)?;
        Ok(Self { writer })
    }

    pub fn write(&mut self, sample: &RawSample) -> Result<(), ImuError> {
        let mut row = Vec::with_capacity(CAPTURE_COLUMNS.len());
        row.push(sample.timestamp_ms.to_string());
        row.extend(vector_fields(sample.accel));
        row.extend(vector_fields(sample.gyro));
        self.writer.write_record(&row)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), ImuError> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and hand back the underlying writer.
    pub fn into_inner(self) -> Result<W, ImuError> {
        self.writer
            .into_inner()
            .map_err(|e| ImuError::Io(e.into_error()))
    }
}

#[derive(Debug, Deserialize)]
struct CaptureRow {
    time: f64,
    accel_x: f64,
    accel_y: f64,
    accel_z: f64,
    gyro_x: f64,
    gyro_y: f64,
    gyro_z: f64,
}

impl From<CaptureRow> for RawSample {
    fn from(row: CaptureRow) -> Self {
        RawSample {
            // fractional milliseconds are truncated
            timestamp_ms: row.time as u32,
            accel: Vector3::new(row.accel_x, row.accel_y, row.accel_z),
            gyro: Vector3::new(row.gyro_x, row.gyro_y, row.gyro_z),
        }
    }
}

/// Reads a capture back as raw samples.
pub struct CaptureReader<R: Read> {
    rows: csv::DeserializeRecordsIntoIter<R, CaptureRow>,
}

impl CaptureReader<File> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ImuError> {
        let file = File::open(path.as_ref())?;
        tracing::info!(path = %path.as_ref().display(), "Replaying capture");
        Ok(Self::new(file))
    }
}

impl<R: Read> CaptureReader<R> {
    pub fn new(inner: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .delimiter(b' ')
            .trim(csv::Trim::All)
            .from_reader(inner);
        Self {
            rows: reader.into_deserialize(),
        }
    }
}

impl<R: Read> Iterator for CaptureReader<R> {
    type Item = Result<RawSample, ImuError>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.next()?;
        Some(row.map(RawSample::from).map_err(ImuError::from))
    }
}

/// Exports every field of each orientation record.
pub struct RecordWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl RecordWriter<File> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, ImuError> {
        let file = File::create(path.as_ref())?;
        tracing::info!(path = %path.as_ref().display(), "Exporting orientation records");
        Self::new(file)
    }
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W) -> Result<Self, ImuError> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b' ')
            .from_writer(inner);

        let mut header = vec!["time".to_owned()];
        for group in RECORD_GROUPS {
            header.extend(["x", "y", "z"].map(|axis| format!("{group}_{axis}")));
        }
        writer.write_record(&header)?;
        Ok(Self { writer })
    }

    pub fn write(&mut self, record: &OrientationRecord) -> Result<(), ImuError> {
        let mut row = vec![format!("{}", record.elapsed_time_ms)];
        for v in record.vectors() {
            row.extend(vector_fields(v));
        }
        self.writer.write_record(&row)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), ImuError> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> Result<W, ImuError> {
        self.writer
            .into_inner()
            .map_err(|e| ImuError::Io(e.into_error()))
    }
}
