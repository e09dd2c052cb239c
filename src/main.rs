//! CLI entry point for rig_daq
//!
//! Provides command-line interface for:
//! - Running an experiment plan against the rig (or the built-in emulator)
//! - Auto-calibrating the laser against the photometer
//! - Listing serial ports
//!
//! # Usage
//!
//! Run a plan:
//! ```bash
//! rig_daq run plans/example.toml
//! rig_daq run plans/example.toml --emulate
//! ```
//!
//! Calibrate the laser:
//! ```bash
//! rig_daq calibrate --out opto_calibration.json --lo 0 --hi 0.81 --step 0.01
//! ```
//!
//! Ctrl-C during a plan skips the wait in progress. A second Ctrl-C within two
//! seconds stops the plan, ends the recording and saves the log.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rig_daq::config::RecordControlKind;
use rig_daq::mock::{MockDevice, MockRecorder};
use rig_daq::recording::RecordControl;
use rig_daq::{logging, Plan, Rig, RigConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{info, warn};

/// Two interrupts this close together stop the plan
const ABORT_WINDOW: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "rig_daq")]
#[command(about = "Serial control and event logging for a physiological recording rig", long_about = None)]
struct Cli {
    /// Configuration file (default: config/rig.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an experiment plan
    Run {
        /// Path to the plan TOML file
        plan: PathBuf,

        /// Use the built-in device emulator and an in-memory recorder
        #[arg(long)]
        emulate: bool,

        /// Calibration table to load before the plan starts
        #[arg(long)]
        calibration: Option<PathBuf>,
    },

    /// Sweep the laser and write a calibration table
    Calibrate(CalibrateArgs),

    /// List serial ports
    Ports,
}

#[derive(Args)]
struct CalibrateArgs {
    /// Output JSON file
    #[arg(long, default_value = "opto_calibration.json")]
    out: PathBuf,

    /// Lowest amplitude in the sweep
    #[arg(long, default_value_t = 0.0)]
    lo: f64,

    /// Sweep stops below this amplitude
    #[arg(long, default_value_t = 0.81)]
    hi: f64,

    /// Amplitude step
    #[arg(long, default_value_t = 0.01)]
    step: f64,

    /// Fiber description stored with the table
    #[arg(long)]
    fiber: Option<String>,

    /// Laser wavelength stored with the table
    #[arg(long)]
    wavelength: Option<String>,

    /// Use the built-in device emulator
    #[arg(long)]
    emulate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RigConfig::load_from(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => RigConfig::load().context("loading configuration")?,
    };
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Run {
            plan,
            emulate,
            calibration,
        } => run_plan(config, plan, emulate, calibration).await,
        Commands::Calibrate(args) => calibrate(config, args).await,
        Commands::Ports => list_ports(),
    }
}

async fn build_rig(config: RigConfig, emulate: bool) -> Result<Rig> {
    if !emulate {
        return Rig::connect(config).await.context("connecting to the rig");
    }

    config.validate().context("invalid configuration")?;
    info!("Running against the emulator");
    let (link, _device) = MockDevice::spawn(config.serial.ack_timeout());
    let control = match config.recording.control {
        RecordControlKind::Ttl => RecordControl::Ttl,
        RecordControlKind::Remote => RecordControl::Remote(Box::new(MockRecorder::new(
            "emulated",
            &config.recording.data_dir,
        ))),
    };
    let mut rig = Rig::new(config, link, control);
    rig.init_device().await?;
    Ok(rig)
}

async fn run_plan(
    config: RigConfig,
    plan_path: PathBuf,
    emulate: bool,
    calibration: Option<PathBuf>,
) -> Result<()> {
    let plan = Plan::load(&plan_path)
        .with_context(|| format!("loading plan {}", plan_path.display()))?;
    let mut rig = build_rig(config, emulate).await?;
    if let Some(path) = calibration {
        rig.load_calibration(&path)
            .with_context(|| format!("loading calibration {}", path.display()))?;
    }

    let cancel = rig.cancel_handle();
    let abort = Arc::new(Notify::new());
    let abort_signal = Arc::clone(&abort);
    tokio::spawn(async move {
        let mut last: Option<Instant> = None;
        while tokio::signal::ctrl_c().await.is_ok() {
            let now = Instant::now();
            if last.is_some_and(|t| now.duration_since(t) < ABORT_WINDOW) {
                abort_signal.notify_one();
                break;
            }
            info!("Interrupted. Skipping the current wait (Ctrl-C again to stop)");
            cancel.cancel();
            last = Some(now);
        }
    });

    let finished = tokio::select! {
        result = plan.run(&mut rig) => Some(result),
        _ = abort.notified() => None,
    };

    match finished {
        Some(Ok(report)) => {
            println!(
                "Plan finished: {} of {} steps completed, {} cut short, {} faults",
                report.completed,
                plan.steps.len(),
                report.cancelled,
                report.faults.len()
            );
            for fault in &report.faults {
                println!("  step {} ({}): {}", fault.index + 1, fault.action, fault.message);
            }
            match report.log_path {
                Some(path) => println!("Event log: {}", path.display()),
                None => println!("No recording target; event log not written"),
            }
            Ok(())
        }
        Some(Err(e)) => Err(e).context("plan stopped"),
        None => {
            warn!("Plan stopped by user");
            rig.close().await.context("shutting down")?;
            Ok(())
        }
    }
}

async fn calibrate(config: RigConfig, args: CalibrateArgs) -> Result<()> {
    let mut rig = build_rig(config, args.emulate).await?;
    if !rig.is_connected() {
        bail!("No device connected. Set serial.port in the configuration or pass --emulate");
    }

    let mut table = rig
        .auto_calibrate(args.lo, args.hi, args.step)
        .await
        .context("calibration sweep")?;
    table.fiber = args.fiber;
    table.wavelength = args.wavelength;
    table
        .save(&args.out)
        .with_context(|| format!("writing {}", args.out.display()))?;

    println!("{:>8}  {:>10}", "volts", "mW");
    for (volts, power) in table.command_voltage.iter().zip(&table.light_power) {
        println!("{:>8.2}  {:>10.3}", volts, power);
    }
    println!("Calibration saved to {}", args.out.display());
    Ok(())
}

#[cfg(feature = "instrument_serial")]
fn list_ports() -> Result<()> {
    use serialport::SerialPortType;

    let ports = serialport::available_ports().context("listing serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        let kind = match port.port_type {
            SerialPortType::UsbPort(info) => format!(
                "USB {:04x}:{:04x} {}",
                info.vid,
                info.pid,
                info.product.unwrap_or_default()
            ),
            SerialPortType::PciPort => "PCI".to_string(),
            SerialPortType::BluetoothPort => "Bluetooth".to_string(),
            SerialPortType::Unknown => "unknown".to_string(),
        };
        println!("{}\t{}", port.port_name, kind);
    }
    Ok(())
}

#[cfg(not(feature = "instrument_serial"))]
fn list_ports() -> Result<()> {
    bail!("Serial support not compiled in. Rebuild with --features instrument_serial")
}
