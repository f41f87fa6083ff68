//! Sweep orchestration.
//!
//! [`SweepRunner`] owns the device handles for one run and walks the
//! configured angle grid: move, settle, acquire, average, smooth, write,
//! publish. It is handed everything it needs up front; there are no
//! globals and no retry machinery. The first error aborts the sweep and
//! propagates to the caller.

pub mod angles;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::time::sleep;
use tracing::{debug, info};

use crate::config::{Settings, SweepMode};
use crate::data::SweepCsvWriter;
use crate::display::{DisplayHandle, SpectrumFrame};
use crate::error::GonioError;
use crate::hardware::capabilities::Spectrometer;
use crate::mount::GonioMount;
use crate::processing::{boxcar_smooth, RunningMean};

pub use angles::angle_sequence;

/// What a finished sweep reports back.
#[derive(Debug, Clone)]
pub struct SweepSummary {
    /// Mode the sweep ran in.
    pub mode: SweepMode,
    /// Data rows written (header excluded).
    pub rows_written: u64,
    /// The CSV file produced.
    pub output_path: PathBuf,
    /// Wall-clock duration of the whole run.
    pub elapsed: Duration,
}

/// One angular sweep over the goniometer.
pub struct SweepRunner {
    mount: GonioMount,
    spectrometer: Arc<dyn Spectrometer>,
    settings: Settings,
    display: DisplayHandle,
}

impl SweepRunner {
    /// Assemble a runner from its parts. `settings` must already be
    /// validated.
    pub fn new(
        mount: GonioMount,
        spectrometer: Arc<dyn Spectrometer>,
        settings: Settings,
        display: DisplayHandle,
    ) -> Self {
        Self {
            mount,
            spectrometer,
            settings,
            display,
        }
    }

    /// Execute the sweep: home the mount, configure the spectrometer, then
    /// walk the angle grid.
    pub async fn run(self) -> Result<SweepSummary> {
        let started = Instant::now();
        let mode = self.settings.sweep.mode;
        info!(%mode, "starting sweep");

        self.mount
            .initialize()
            .await
            .context("initializing goniometer mount")?;

        self.apply_integration_time().await?;

        let raw_axis = self
            .spectrometer
            .wavelengths()
            .await
            .context("reading wavelength calibration")?;
        let width = self.settings.boxcar_width();
        // Smoothing shortens rows; the label axis gets the same treatment so
        // every column header still names the band under it.
        let axis = Arc::new(boxcar_smooth(&raw_axis, width)?);

        let mut writer = SweepCsvWriter::create(
            &self.settings.storage.output_dir,
            &self.settings.storage.file_prefix,
            mode,
            &axis,
        )?;

        match mode {
            SweepMode::AltitudeOnly => self.run_altitude_only(&mut writer, &axis).await?,
            SweepMode::DualAxis => self.run_dual_axis(&mut writer, &axis).await?,
        }

        let summary = SweepSummary {
            mode,
            rows_written: writer.rows_written(),
            output_path: writer.path().to_path_buf(),
            elapsed: started.elapsed(),
        };
        info!(
            rows = summary.rows_written,
            path = %summary.output_path.display(),
            elapsed_s = format_args!("{:.1}", summary.elapsed.as_secs_f64()),
            "sweep complete"
        );
        Ok(summary)
    }

    /// Validate the configured integration time against the device's range,
    /// then apply it. Nothing is written to the device on rejection.
    async fn apply_integration_time(&self) -> Result<()> {
        let requested_us = self.settings.integration_time_us();
        let (min_us, max_us) = self
            .spectrometer
            .integration_time_limits()
            .await
            .context("querying integration time limits")?;

        if requested_us < min_us || requested_us > max_us {
            return Err(GonioError::IntegrationTimeOutOfRange {
                requested_us,
                min_us,
                max_us,
            }
            .into());
        }

        self.spectrometer
            .set_integration_time(requested_us)
            .await
            .context("setting integration time")?;
        info!(requested_us, "integration time set");
        Ok(())
    }

    async fn run_altitude_only(
        &self,
        writer: &mut SweepCsvWriter,
        axis: &Arc<Vec<f64>>,
    ) -> Result<()> {
        let sweep = &self.settings.sweep;
        let park = sweep.azimuth_park_deg;
        info!(azimuth_deg = park, "parking azimuth stage");
        self.mount.set_azimuth(park).await?;

        let altitudes =
            angle_sequence(sweep.altitude.start_deg, sweep.altitude.end_deg, sweep.altitude.step_deg);
        let settle = Duration::from_secs_f64(self.settings.settle_s());
        let points = self.settings.averaging_points();
        let width = self.settings.boxcar_width();

        for altitude in altitudes {
            info!(altitude_deg = format_args!("{altitude:+.2}"), "stepping altitude");
            self.mount.set_altitude(altitude).await?;
            sleep(settle).await;

            let spectrum = self.acquire_averaged(points).await?;
            let smoothed = boxcar_smooth(&spectrum, width)?;
            writer.append_row(&[altitude], &smoothed)?;

            self.display.publish(SpectrumFrame {
                title: format!("Spectrometer Reading ({altitude:+5.2}°)"),
                wavelengths: axis.clone(),
                intensities: smoothed,
                y_max: self.spectrometer.max_intensity(),
            });
        }
        Ok(())
    }

    async fn run_dual_axis(
        &self,
        writer: &mut SweepCsvWriter,
        axis: &Arc<Vec<f64>>,
    ) -> Result<()> {
        let sweep = &self.settings.sweep;
        let azimuths =
            angle_sequence(sweep.azimuth.start_deg, sweep.azimuth.end_deg, sweep.azimuth.step_deg);
        let altitudes =
            angle_sequence(sweep.altitude.start_deg, sweep.altitude.end_deg, sweep.altitude.step_deg);
        let settle = Duration::from_secs_f64(self.settings.settle_s());
        let points = self.settings.averaging_points();
        let width = self.settings.boxcar_width();

        for azimuth in &azimuths {
            info!(azimuth_deg = format_args!("{azimuth:+.2}"), "stepping azimuth");
            self.mount.set_azimuth(*azimuth).await?;

            for altitude in &altitudes {
                debug!(altitude_deg = format_args!("{altitude:+.2}"), "stepping altitude");
                self.mount.set_altitude(*altitude).await?;
                sleep(settle).await;

                let spectrum = self.acquire_averaged(points).await?;
                let smoothed = boxcar_smooth(&spectrum, width)?;
                writer.append_row(&[*azimuth, *altitude], &smoothed)?;

                self.display.publish(SpectrumFrame {
                    title: format!(
                        "Spectrometer Reading ({azimuth:+5.2}°, {altitude:+5.2}°)"
                    ),
                    wavelengths: axis.clone(),
                    intensities: smoothed,
                    y_max: self.spectrometer.max_intensity(),
                });
            }
        }
        Ok(())
    }

    /// Acquire `points` spectra and return their elementwise mean. A single
    /// point skips the accumulator entirely.
    async fn acquire_averaged(&self, points: u32) -> Result<Vec<f64>> {
        if points == 1 {
            return self.spectrometer.intensities().await;
        }
        let mut mean = RunningMean::new();
        for _ in 0..points {
            mean.add(&self.spectrometer.intensities().await?)?;
        }
        Ok(mean.mean()?)
    }
}
