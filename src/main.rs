//! CLI entry point for goniospec.
//!
//! Provides command-line interface for:
//! - Running the configured angular sweep (`run`)
//! - Homing the mount without measuring (`home`)
//! - Listing attached serial ports (`list-ports`)
//!
//! # Usage
//!
//! Run the configured sweep against the bench:
//! ```bash
//! goniospec run
//! ```
//!
//! Dry-run with simulated hardware and no window:
//! ```bash
//! goniospec run --mock --headless
//! ```
//!
//! The live plot needs the main thread, so `main` is synchronous: it builds
//! a tokio runtime, spawns the sweep onto it and hands the main thread to
//! the window. Headless runs simply block on the sweep.

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use goniospec::config::Settings;
use goniospec::display::DisplayHandle;
use goniospec::hardware::{MockSpectrometer, MockStage};
use goniospec::mount::GonioMount;
use goniospec::sweep::{SweepRunner, SweepSummary};

#[derive(Parser)]
#[command(name = "goniospec")]
#[command(about = "Angular sweep tool for a goniometer-mounted spectrometer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured sweep
    Run {
        /// Configuration file
        #[arg(long, default_value = "config/goniospec.toml")]
        config: PathBuf,

        /// Use simulated hardware instead of the bench
        #[arg(long)]
        mock: bool,

        /// Run without the live spectrum window
        #[arg(long)]
        headless: bool,
    },

    /// Home both axes and exit
    Home {
        /// Configuration file
        #[arg(long, default_value = "config/goniospec.toml")]
        config: PathBuf,

        /// Use simulated hardware instead of the bench
        #[arg(long)]
        mock: bool,
    },

    /// List attached serial ports with their USB serial numbers
    ListPorts,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            mock,
            headless,
        } => run_sweep(config, mock, headless),
        Commands::Home { config, mock } => home_mount(config, mock),
        Commands::ListPorts => list_ports(),
    }
}

fn load_settings(path: &PathBuf) -> Result<Settings> {
    let settings = Settings::load_from(path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    settings.validate()?;
    Ok(settings)
}

/// Initialize logging. `RUST_LOG` wins over the configured level.
fn init_tracing(settings: &Settings) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.application.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run_sweep(config: PathBuf, mock: bool, headless: bool) -> Result<()> {
    let settings = load_settings(&config)?;
    init_tracing(&settings);
    info!(
        config = %config.display(),
        mode = %settings.sweep.mode,
        mock,
        "Starting goniospec"
    );

    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    let want_window = settings.display.enabled && !headless;

    #[cfg(feature = "display")]
    {
        if want_window {
            let (display_handle, receiver) = goniospec::display::channel();
            let task = {
                let settings = settings.clone();
                runtime
                    .spawn(async move { run_with_hardware(settings, mock, display_handle).await })
            };

            // The window owns the main thread; the sweep runs on the runtime
            // behind it. Closing the window early does not abort the sweep.
            goniospec::display::window::run(receiver)?;

            let summary = runtime.block_on(task).context("sweep task failed")??;
            report(&summary);
            return Ok(());
        }
    }

    #[cfg(not(feature = "display"))]
    {
        if want_window {
            tracing::warn!("Built without the display feature; running headless");
        }
    }

    let summary = runtime.block_on(run_with_hardware(
        settings,
        mock,
        DisplayHandle::disabled(),
    ))?;
    report(&summary);
    Ok(())
}

fn report(summary: &SweepSummary) {
    println!(
        "{} sweep complete: {} rows -> {} ({:.1?})",
        summary.mode,
        summary.rows_written,
        summary.output_path.display(),
        summary.elapsed
    );
}

async fn run_with_hardware(
    settings: Settings,
    mock: bool,
    display: DisplayHandle,
) -> Result<SweepSummary> {
    if mock {
        info!("Using simulated hardware");
        let spectrometer = Arc::new(
            MockSpectrometer::new(settings.spectrometer.pixels)
                .with_max_intensity(settings.spectrometer.max_intensity),
        );
        let runner = SweepRunner::new(mock_mount(&settings), spectrometer, settings, display);
        return runner.run().await;
    }

    #[cfg(feature = "instrument_serial")]
    {
        use goniospec::hardware::ObpSpectrometer;
        use tracing::warn;

        let (mount, chain) = connect_mount(&settings).await?;
        let spectrometer = ObpSpectrometer::connect(&settings.spectrometer).await?;

        let dim_leds = settings.mount.disable_led_during_sweep;
        if dim_leds {
            chain.set_led_enabled(false).await?;
        }
        let runner = SweepRunner::new(mount, Arc::new(spectrometer), settings, display);
        let outcome = runner.run().await;
        // Put the LEDs back even when the sweep failed.
        if dim_leds {
            if let Err(err) = chain.set_led_enabled(true).await {
                warn!(error = %err, "Could not re-enable the stage LEDs");
            }
        }
        outcome
    }

    #[cfg(not(feature = "instrument_serial"))]
    {
        let _ = (settings, display);
        Err(goniospec::error::GonioError::FeatureDisabled("instrument_serial").into())
    }
}

fn mock_mount(settings: &Settings) -> GonioMount {
    GonioMount::new(
        Arc::new(MockStage::new()),
        Arc::new(MockStage::new()),
        &settings.mount,
    )
}

#[cfg(feature = "instrument_serial")]
async fn connect_mount(settings: &Settings) -> Result<(GonioMount, goniospec::hardware::ZaberChain)> {
    use goniospec::hardware::ZaberChain;

    let chain = ZaberChain::connect(&settings.mount).await?;
    let azimuth = chain.claim_axis("azimuth", &settings.mount.azimuth).await?;
    let altitude = chain
        .claim_axis("altitude", &settings.mount.altitude)
        .await?;
    let mount = GonioMount::new(Arc::new(azimuth), Arc::new(altitude), &settings.mount);
    Ok((mount, chain))
}

fn home_mount(config: PathBuf, mock: bool) -> Result<()> {
    let settings = load_settings(&config)?;
    init_tracing(&settings);

    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    runtime.block_on(async {
        let mount = if mock {
            info!("Using simulated hardware");
            mock_mount(&settings)
        } else {
            #[cfg(feature = "instrument_serial")]
            {
                connect_mount(&settings).await?.0
            }
            #[cfg(not(feature = "instrument_serial"))]
            {
                return Err(
                    goniospec::error::GonioError::FeatureDisabled("instrument_serial").into(),
                );
            }
        };

        mount.initialize().await?;
        let azimuth = mount.azimuth().await?;
        let altitude = mount.altitude().await?;
        println!("Mount homed: azimuth {azimuth:+.2} deg, altitude {altitude:+.2} deg");
        Ok(())
    })
}

fn list_ports() -> Result<()> {
    #[cfg(feature = "instrument_serial")]
    {
        let ports = goniospec::hardware::describe_ports()?;
        if ports.is_empty() {
            println!("No serial ports found");
        }
        for line in ports {
            println!("{line}");
        }
        Ok(())
    }

    #[cfg(not(feature = "instrument_serial"))]
    {
        Err(goniospec::error::GonioError::FeatureDisabled("instrument_serial").into())
    }
}
