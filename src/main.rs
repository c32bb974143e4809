use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tilt_config::AppConfig;
use tilt_imu::capture::{CaptureReader, CaptureWriter, RecordWriter};
use tilt_imu::source::{self, ReaderSource, SerialSource};
use tilt_imu::{
    FusionPipeline, FusionSettings, ImuClient, ImuSettings, OrientationRecord, RawSample,
    SampleReader, SharedTimeWindow, TimeWindowBuffer,
};
use tracing::{info, warn};

/// Consumer tick: how often queued samples are pulled through the pipeline.
const POLL_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Parser)]
#[command(name = "tilt")]
#[command(about = "Tilt estimation from a streaming accelerometer/gyroscope board")]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List serial ports on this machine")]
    Ports,
    Live(LiveArgs),
    Replay(ReplayArgs),
}

#[derive(clap::Args)]
#[command(about = "Stream from the sensor, optionally capturing raw samples")]
struct LiveArgs {
    #[arg(long)]
    port: Option<String>,
    #[arg(long)]
    baud_rate: Option<u32>,
    #[arg(long)]
    calibration_samples: Option<u32>,
    /// Preview window in seconds.
    #[arg(long)]
    preview_window: Option<f64>,
    /// Write raw samples to this capture file.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Stop after this many seconds of fused data (with --output).
    #[arg(long)]
    sampling_time: Option<f64>,
}

#[derive(clap::Args)]
#[command(about = "Run a capture file through the fusion pipeline")]
struct ReplayArgs {
    #[arg(long)]
    input: PathBuf,
    /// Treat the input as raw wire bytes rather than a sample capture.
    #[arg(long)]
    raw: bool,
    #[arg(long)]
    calibration_samples: Option<u32>,
    /// Export every orientation record to this file.
    #[arg(long)]
    records: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tilt_app=info,tilt_imu=info,tilt_config=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = tilt_config::load_config().unwrap_or_else(|e| {
        warn!(?e, "Failed to load config, using defaults");
        AppConfig::default()
    });
    if !tilt_config::config_path().is_ok_and(|p| p.exists()) {
        if let Err(e) = tilt_config::save_config(&config) {
            warn!(?e, "Failed to write default config");
        }
    }

    match cli.command {
        Commands::Ports => list_ports(),
        Commands::Live(args) => {
            if let Some(port) = args.port {
                config.serial.port = port;
            }
            if let Some(baud_rate) = args.baud_rate {
                config.serial.baud_rate = baud_rate;
            }
            if let Some(n) = args.calibration_samples {
                config.imu.calibration_samples = n;
            }
            if let Some(window_s) = args.preview_window {
                config.preview.window_s = window_s;
            }
            if let Some(sampling_time_s) = args.sampling_time {
                config.capture.sampling_time_s = sampling_time_s;
            }
            run_live(&config, args.output.as_deref()).await
        }
        Commands::Replay(args) => {
            if let Some(n) = args.calibration_samples {
                config.imu.calibration_samples = n;
            }
            if args.raw {
                run_raw_replay(&config, &args.input, args.records.as_deref()).await
            } else {
                run_replay(&config, &args.input, args.records.as_deref())
            }
        }
    }
}

fn imu_settings(config: &AppConfig) -> ImuSettings {
    ImuSettings {
        calibration_samples: config.imu.calibration_samples,
        fusion: FusionSettings {
            accel_cutoff_hz: config.imu.accel_cutoff_hz,
            gyro_cutoff_hz: config.imu.gyro_cutoff_hz,
            complementary_alpha: config.imu.complementary_alpha,
        },
    }
}

fn list_ports() -> Result<()> {
    let ports = source::available_ports()?;
    if ports.is_empty() {
        info!("No serial ports found");
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

/// Stream from the serial port until Ctrl-C, end of stream, or the
/// capture duration elapses.
async fn run_live(config: &AppConfig, output: Option<&Path>) -> Result<()> {
    info!(port = %config.serial.port, "Connecting to IMU");
    let source = SerialSource::open(&config.serial.port, config.serial.baud_rate)
        .with_context(|| format!("Failed to open serial port {}", config.serial.port))?;

    let mut client = ImuClient::start(source, imu_settings(config), config.preview.window_ms())?;
    let mut capture = output.map(CaptureWriter::create).transpose()?;
    // Only a capture run has a fixed length.
    let sampling_limit_ms = capture
        .as_ref()
        .map(|_| config.capture.sampling_time_s * 1000.0);

    let preview = tokio::spawn(log_preview(
        client.window(),
        Duration::from_millis(config.preview.log_interval_ms.max(1)),
    ));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut tick = tokio::time::interval(POLL_INTERVAL);
    let mut limit_reached = false;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, shutting down");
                break;
            }
            _ = tick.tick() => {
                if capture_queued(&mut client, capture.as_mut(), sampling_limit_ms)? {
                    limit_reached = true;
                    let elapsed_ms = client.pipeline().estimator().elapsed_time_ms();
                    info!(elapsed_s = elapsed_ms / 1000.0, "Finished capture");
                    break;
                }
                if client.is_finished() {
                    warn!("IMU stream ended");
                    break;
                }
            }
        }
    }

    preview.abort();
    let stopped = client.stop();

    // Whatever the reader queued before stopping still goes to the capture,
    // up to the sampling limit.
    if !limit_reached {
        capture_queued(&mut client, capture.as_mut(), sampling_limit_ms)?;
    }
    if let Some(writer) = capture.as_mut() {
        writer.flush()?;
    }

    log_summary(client.window().latest(), client.pipeline().samples_seen());
    stopped.context("IMU reader failed")
}

/// Run queued samples through the client one at a time, writing each to
/// the capture. Returns `true` at the first sample whose fused time passes
/// `limit_ms`; anything queued behind it is left unread.
fn capture_queued<W: std::io::Write>(
    client: &mut ImuClient,
    mut capture: Option<&mut CaptureWriter<W>>,
    limit_ms: Option<f64>,
) -> Result<bool> {
    while let Some(sample) = client.next_sample() {
        if let Some(writer) = capture.as_mut() {
            writer.write(&sample)?;
        }
        let elapsed_ms = client.pipeline().estimator().elapsed_time_ms();
        if limit_ms.is_some_and(|limit| elapsed_ms > limit) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Periodically report the newest fused orientation.
async fn log_preview(window: SharedTimeWindow, every: Duration) {
    let mut tick = tokio::time::interval(every);
    loop {
        tick.tick().await;
        if let Some(latest) = window.latest() {
            info!(
                elapsed_s = latest.elapsed_time_ms / 1000.0,
                fused = ?latest.fused_orientation.to_array(),
                tilt = ?latest.gravity_tilt_orientation.to_array(),
                records = window.len(),
                span_ms = window.span_ms(),
                "Orientation"
            );
        }
    }
}

/// Replay a space-delimited sample capture.
fn run_replay(config: &AppConfig, input: &Path, records: Option<&Path>) -> Result<()> {
    let mut replay = Replay::new(config, records)?;
    let reader = CaptureReader::open(input)
        .with_context(|| format!("Failed to open capture {}", input.display()))?;
    for sample in reader {
        replay.push(sample?)?;
    }
    replay.finish()
}

/// Replay a raw byte capture through the same reader thread as a live port.
async fn run_raw_replay(config: &AppConfig, input: &Path, records: Option<&Path>) -> Result<()> {
    let file = File::open(input)
        .with_context(|| format!("Failed to open raw capture {}", input.display()))?;
    info!(path = %input.display(), "Replaying raw capture");

    let mut replay = Replay::new(config, records)?;
    let mut reader = SampleReader::spawn(ReaderSource::new(file)?)?;
    let mut tick = tokio::time::interval(Duration::from_millis(1));
    while !reader.is_finished() {
        tick.tick().await;
        for sample in reader.drain() {
            replay.push(sample)?;
        }
    }
    reader.stop().context("Raw capture reader failed")?;
    replay.finish()
}

/// Offline consumer: pipeline, preview window and optional record export.
struct Replay {
    pipeline: FusionPipeline,
    window: TimeWindowBuffer,
    export: Option<RecordWriter<File>>,
}

impl Replay {
    fn new(config: &AppConfig, records: Option<&Path>) -> Result<Self> {
        Ok(Self {
            pipeline: FusionPipeline::new(imu_settings(config))?,
            window: TimeWindowBuffer::new(config.preview.window_ms())?,
            export: records.map(RecordWriter::create).transpose()?,
        })
    }

    fn push(&mut self, sample: RawSample) -> Result<()> {
        self.pipeline.push(sample);
        for record in self.pipeline.drain() {
            if let Some(writer) = self.export.as_mut() {
                writer.write(&record)?;
            }
            self.window.append(record);
        }
        Ok(())
    }

    fn finish(mut self) -> Result<()> {
        if let Some(writer) = self.export.as_mut() {
            writer.flush()?;
        }
        log_summary(self.window.back().copied(), self.pipeline.samples_seen());
        Ok(())
    }
}

fn log_summary(latest: Option<OrientationRecord>, samples: u64) {
    match latest {
        Some(record) => info!(
            samples,
            elapsed_s = record.elapsed_time_ms / 1000.0,
            fused = ?record.fused_orientation.to_array(),
            gyro_integral = ?record.integrated_gyro_orientation.to_array(),
            "Stream complete"
        ),
        None => warn!(samples, "Stream ended before calibration finished"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tilt_imu::protocol::encode_packet;
    use tilt_imu::source::ChunkSource;
    use tilt_imu::Vector3;

    #[test]
    fn capture_stops_at_first_sample_past_limit() {
        let mut stream = Vec::new();
        for i in 0..20u32 {
            stream.extend_from_slice(&encode_packet(&RawSample {
                timestamp_ms: i * 10,
                accel: Vector3::X,
                gyro: Vector3::ZERO,
            }));
        }
        let settings = ImuSettings {
            calibration_samples: 1,
            ..ImuSettings::default()
        };
        let mut client = ImuClient::start(ChunkSource::new([stream]), settings, 1_000.0).unwrap();
        let mut writer = CaptureWriter::new(Vec::new()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut reached = false;
        while !reached && !client.is_finished() {
            assert!(Instant::now() < deadline, "stream never finished");
            reached = capture_queued(&mut client, Some(&mut writer), Some(50.0)).unwrap();
            std::thread::sleep(Duration::from_millis(1));
        }
        client.stop().unwrap();

        assert!(reached);
        // one calibration sample, then fused times 0..=60 ms
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let rows: Vec<_> = text.lines().skip(1).collect();
        assert_eq!(rows.len(), 8);
        assert!(rows[7].starts_with("70 "));
        // the rest stays queued
        assert_eq!(client.poll().len(), 12);
    }
}
