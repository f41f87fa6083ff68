//! Mock sweep demonstration.
//!
//! Runs a coarse altitude sweep over simulated hardware and prints where
//! the CSV landed. Nothing needs to be attached.
//!
//! Run with:
//! ```bash
//! cargo run --example mock_sweep
//! ```

use std::sync::Arc;

use goniospec::config::{AngleRange, Settings};
use goniospec::display::DisplayHandle;
use goniospec::hardware::{MockSpectrometer, MockStage};
use goniospec::mount::GonioMount;
use goniospec::sweep::SweepRunner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("=== Mock Goniometer Sweep ===\n");

    let mut settings = Settings::default();
    settings.sweep.altitude = AngleRange {
        start_deg: -30.0,
        end_deg: 30.0,
        step_deg: 5.0,
    };
    settings.sweep.settle_s = Some(0.05);
    settings.acquisition.averaging_points = Some(4);
    settings.acquisition.boxcar_width = Some(10);
    settings.validate()?;

    println!(
        "Sweeping altitude {:+.0} to {:+.0} deg in {:.0} deg steps",
        settings.sweep.altitude.start_deg,
        settings.sweep.altitude.end_deg,
        settings.sweep.altitude.step_deg
    );

    let mount = GonioMount::new(
        Arc::new(MockStage::with_speed(360.0)),
        Arc::new(MockStage::with_speed(360.0)),
        &settings.mount,
    );
    let spectrometer = Arc::new(MockSpectrometer::new(settings.spectrometer.pixels));

    let runner = SweepRunner::new(mount, spectrometer, settings, DisplayHandle::disabled());
    let summary = runner.run().await?;

    println!(
        "\n✓ {} rows written to {}",
        summary.rows_written,
        summary.output_path.display()
    );
    println!("  elapsed: {:.1?}", summary.elapsed);
    Ok(())
}
