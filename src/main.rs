//! Plant Camera CLI
//!
//! Command-line interface for calibrating the rig and taking corrected
//! captures. Captures go through the configured still-capture program. No
//! sensor library binding ships with the crate: gain and white-balance
//! calibration only run against the simulated sensor, and only when
//! `--simulate` is given, so synthetic values never reach a real rig's
//! calibration file by accident.

use clap::{Parser, Subcommand};
use plant_camera::{
    CameraSettings, CaptureEngine, LightChannel, LightLog, ProcessWorker, Recalibration,
    RigConfig, SensorDriver, SimulatedSensor, UnattachedSensor,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "plant-camera", version, about = "Calibrated plant camera captures")]
struct Cli {
    /// Rig configuration file (TOML); defaults are used when absent
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Calibrate against the simulated sensor (writes synthetic values)
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Capture a dark-frame corrected image
    Capture {
        /// Light channel (white or growth)
        channel: LightChannel,
        /// Where to write the image
        #[arg(short, long, default_value = "capture.png")]
        output: PathBuf,
    },
    /// Converge white balance for a light channel
    CalibrateWb {
        /// Light channel (white or growth)
        channel: LightChannel,
    },
    /// Re-measure sensor gains for every enabled channel
    Update,
    /// Print the stored calibration record
    Show,
    /// Serve Prometheus metrics for the calibration file
    #[cfg(feature = "metrics")]
    ServeMetrics,
}

fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    info!("Plant Camera v{}", plant_camera::VERSION);

    let config = match &cli.config {
        Some(path) => match RigConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load config {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => RigConfig::default(),
    };

    let sensor: Box<dyn SensorDriver> = if cli.simulate {
        warn!("Using the simulated sensor, calibration values are synthetic");
        Box::new(SimulatedSensor::new())
    } else {
        Box::new(UnattachedSensor)
    };

    let worker = ProcessWorker::new(&config.capture_program, config.timing.worker_timeout());
    let mut engine = match CaptureEngine::new(
        CameraSettings::pi_cam_v21(),
        config,
        sensor,
        LightLog::new(),
        worker,
    ) {
        Ok(engine) => engine,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(reason) = check_sensor_access(&cli.command, cli.simulate, engine.is_calibrated()) {
        error!("{}", reason);
        return ExitCode::FAILURE;
    }

    match run(cli.command, &mut engine) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

type Engine = CaptureEngine<Box<dyn SensorDriver>, LightLog, ProcessWorker>;

/// Refuses commands that would persist sensor measurements when no real
/// sensor is attached and `--simulate` was not given.
fn check_sensor_access(command: &Command, simulate: bool, calibrated: bool) -> Result<(), String> {
    if simulate {
        return Ok(());
    }
    let needs_sensor = match command {
        Command::Update | Command::CalibrateWb { .. } => true,
        Command::Capture { .. } => !calibrated,
        _ => false,
    };
    if needs_sensor {
        Err(format!(
            "{} needs a sensor driver and none is attached; \
             pass --simulate to calibrate against the simulated sensor",
            command.name()
        ))
    } else {
        Ok(())
    }
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Capture { .. } => "capture of an uncalibrated camera",
            Command::CalibrateWb { .. } => "calibrate-wb",
            Command::Update => "update",
            Command::Show => "show",
            #[cfg(feature = "metrics")]
            Command::ServeMetrics => "serve-metrics",
        }
    }
}

fn run(command: Command, engine: &mut Engine) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Capture { channel, output } => {
            let result = engine.capture(channel)?;
            image::RgbImage::from_raw(
                result.image.width(),
                result.image.height(),
                result.image.into_pixels(),
            )
            .ok_or("captured frame has an inconsistent size")?
            .save(&output)?;

            info!(
                "Saved {} capture to {} (gain {:.3})",
                channel,
                output.display(),
                result.gain
            );
            if let Recalibration::Failed(reason) = &result.recalibration {
                warn!("Stale gains could not be refreshed: {}", reason);
            }
        }
        Command::CalibrateWb { channel } => {
            let gains = engine.calibrate_white_balance(channel)?;
            println!("{}: red {:.3}, blue {:.3}", channel, gains.red, gains.blue);
        }
        Command::Update => {
            engine.update()?;
            if let Some(table) = engine.record().gain.table() {
                for (channel, gain) in &table.channels {
                    println!(
                        "{}: analog {:.3}, digital {:.3}",
                        channel, gain.analog, gain.digital
                    );
                }
            }
        }
        Command::Show => {
            if !engine.is_calibrated() {
                warn!("Camera has no gain calibration yet");
            }
            print!("{}", toml::to_string_pretty(engine.record())?);
        }
        #[cfg(feature = "metrics")]
        Command::ServeMetrics => serve_metrics(engine)?,
    }
    Ok(())
}

#[cfg(feature = "metrics")]
fn serve_metrics(engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
    use plant_camera::metrics::{MetricsRegistry, MetricsServer, MetricsServerConfig};
    use std::time::Duration;

    let port = engine.config().metrics_port;
    if port == 0 {
        return Err("metrics_port is 0, metrics are disabled".into());
    }

    // This process never captures, so only calibration state is published
    let server = MetricsServer::new(
        MetricsServerConfig::with_port(port),
        MetricsRegistry::calibration_only()?,
    );
    let store = engine.store().clone();
    let settings = engine.settings().clone();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let _watcher = server.watch_store(store, settings, Duration::from_secs(15));
        server.run().await
    })?;
    Ok(())
}
