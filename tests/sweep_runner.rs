//! End-to-end sweep tests over simulated hardware.
//!
//! Each test assembles a [`SweepRunner`] from mock stages and a mock
//! spectrometer, runs a tiny sweep into a temporary directory and asserts
//! on the CSV that lands on disk. Ranges are kept to a handful of angles
//! and settle time to zero so the whole file runs in milliseconds.

use std::path::Path;
use std::sync::Arc;

use goniospec::config::{AngleRange, Settings, SweepMode};
use goniospec::display::{self, DisplayHandle};
use goniospec::error::GonioError;
use goniospec::hardware::{MockSpectrometer, MockStage, RotationStage};
use goniospec::mount::GonioMount;
use goniospec::sweep::SweepRunner;

/// Three altitude points, no settling, no averaging, no smoothing.
fn sweep_settings(dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.sweep.altitude = AngleRange {
        start_deg: -1.0,
        end_deg: 1.0,
        step_deg: 1.0,
    };
    settings.sweep.settle_s = Some(0.0);
    settings.acquisition.integration_time_us = Some(5_000);
    settings.acquisition.averaging_points = Some(1);
    settings.acquisition.boxcar_width = Some(1);
    settings.storage.output_dir = dir.to_path_buf();
    settings
}

fn fast_mount(settings: &Settings) -> (GonioMount, Arc<MockStage>, Arc<MockStage>) {
    let azimuth = Arc::new(MockStage::with_speed(100_000.0));
    let altitude = Arc::new(MockStage::with_speed(100_000.0));
    let mount = GonioMount::new(azimuth.clone(), altitude.clone(), &settings.mount);
    (mount, azimuth, altitude)
}

fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn altitude_sweep_writes_one_row_per_angle() {
    let dir = tempfile::tempdir().unwrap();
    let settings = sweep_settings(dir.path());
    settings.validate().unwrap();

    let (mount, azimuth, altitude) = fast_mount(&settings);
    let spectrometer = Arc::new(MockSpectrometer::with_fixed_reading(
        vec![400.1, 450.2],
        vec![10.0, 20.0],
    ));

    let runner = SweepRunner::new(
        mount,
        spectrometer.clone(),
        settings,
        DisplayHandle::disabled(),
    );
    let summary = runner.run().await.unwrap();

    assert_eq!(summary.mode, SweepMode::AltitudeOnly);
    assert_eq!(summary.rows_written, 3);
    let name = summary.output_path.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("goniometer_data_"));
    assert!(name.ends_with(".csv"));

    let lines = read_lines(&summary.output_path);
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "Altitude (deg),400.1 nm,450.2 nm");
    assert_eq!(lines[1], "-1,10,20");
    assert_eq!(lines[2], "0,10,20");
    assert_eq!(lines[3], "1,10,20");

    // Both axes were homed once during initialization.
    assert_eq!(azimuth.home_calls(), 1);
    assert_eq!(altitude.home_calls(), 1);

    // Azimuth parked at the configured angle; the altitude stage sits at
    // the device-frame equivalent of the last user angle (offset -45).
    assert_eq!(azimuth.position().await.unwrap(), 0.0);
    assert_eq!(altitude.position().await.unwrap(), 46.0);
}

#[tokio::test]
async fn dual_axis_sweep_covers_the_full_grid() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = sweep_settings(dir.path());
    settings.sweep.mode = SweepMode::DualAxis;
    settings.sweep.azimuth = AngleRange {
        start_deg: 0.0,
        end_deg: 1.0,
        step_deg: 1.0,
    };
    settings.validate().unwrap();

    let (mount, _azimuth, _altitude) = fast_mount(&settings);
    let spectrometer = Arc::new(MockSpectrometer::with_fixed_reading(
        vec![400.1, 450.2],
        vec![10.0, 20.0],
    ));

    let runner = SweepRunner::new(mount, spectrometer, settings, DisplayHandle::disabled());
    let summary = runner.run().await.unwrap();

    assert_eq!(summary.rows_written, 6);
    let lines = read_lines(&summary.output_path);
    assert_eq!(lines.len(), 7);
    assert_eq!(lines[0], "Azimuth (deg),Altitude (deg),400.1 nm,450.2 nm");

    // Outer azimuth loop, inner altitude sweep.
    assert_eq!(lines[1], "0,-1,10,20");
    assert_eq!(lines[3], "0,1,10,20");
    assert_eq!(lines[4], "1,-1,10,20");
    assert_eq!(lines[6], "1,1,10,20");
}

#[tokio::test]
async fn out_of_range_integration_time_aborts_before_hardware() {
    let dir = tempfile::tempdir().unwrap();
    let settings = sweep_settings(dir.path());

    let (mount, _azimuth, _altitude) = fast_mount(&settings);
    let spectrometer = Arc::new(
        MockSpectrometer::with_fixed_reading(vec![400.1], vec![10.0])
            .with_integration_limits(10, 1_000),
    );

    let runner = SweepRunner::new(
        mount,
        spectrometer.clone(),
        settings,
        DisplayHandle::disabled(),
    );
    let err = runner.run().await.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<GonioError>(),
        Some(GonioError::IntegrationTimeOutOfRange {
            requested_us: 5_000,
            min_us: 10,
            max_us: 1_000,
        })
    ));

    // The rejected value never reached the device, and no data file was
    // created.
    assert_eq!(spectrometer.set_calls(), 0);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn averaging_and_smoothing_shape_the_rows() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = sweep_settings(dir.path());
    settings.sweep.altitude = AngleRange {
        start_deg: 0.0,
        end_deg: 0.0,
        step_deg: 1.0,
    };
    settings.acquisition.averaging_points = Some(4);
    settings.acquisition.boxcar_width = Some(2);

    let (mount, _azimuth, _altitude) = fast_mount(&settings);
    let spectrometer = Arc::new(MockSpectrometer::with_fixed_reading(
        vec![400.0, 450.0, 500.0],
        vec![10.0, 20.0, 30.0],
    ));

    let runner = SweepRunner::new(mount, spectrometer, settings, DisplayHandle::disabled());
    let summary = runner.run().await.unwrap();

    // A width-2 boxcar turns three pixels into two window means, and the
    // wavelength labels shrink with the data.
    assert_eq!(summary.rows_written, 1);
    let lines = read_lines(&summary.output_path);
    assert_eq!(lines[0], "Altitude (deg),425 nm,475 nm");
    assert_eq!(lines[1], "0,15,25");
}

#[tokio::test]
async fn last_published_frame_carries_the_final_angle() {
    let dir = tempfile::tempdir().unwrap();
    let settings = sweep_settings(dir.path());

    let (mount, _azimuth, _altitude) = fast_mount(&settings);
    let spectrometer = Arc::new(MockSpectrometer::with_fixed_reading(
        vec![400.1, 450.2],
        vec![10.0, 20.0],
    ));

    let (handle, rx) = display::channel();
    let runner = SweepRunner::new(mount, spectrometer, settings, handle);
    runner.run().await.unwrap();

    let frame = rx.borrow().clone().unwrap();
    assert_eq!(frame.title, "Spectrometer Reading (+1.00°)");
    assert_eq!(*frame.wavelengths, vec![400.1, 450.2]);
    assert_eq!(frame.intensities, vec![10.0, 20.0]);
    assert_eq!(frame.y_max, 16383.0);
}

#[tokio::test]
async fn configured_detector_ceiling_shapes_the_published_frame() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = sweep_settings(dir.path());
    settings.sweep.altitude = AngleRange {
        start_deg: 0.0,
        end_deg: 0.0,
        step_deg: 1.0,
    };
    settings.spectrometer.max_intensity = 4095.0;

    // Built the way the binary builds its simulated detector: pixel count
    // and saturation value both come from the settings tree.
    let (mount, _azimuth, _altitude) = fast_mount(&settings);
    let spectrometer = Arc::new(
        MockSpectrometer::new(settings.spectrometer.pixels)
            .with_max_intensity(settings.spectrometer.max_intensity),
    );

    let (handle, rx) = display::channel();
    let runner = SweepRunner::new(mount, spectrometer, settings, handle);
    runner.run().await.unwrap();

    let frame = rx.borrow().clone().unwrap();
    assert_eq!(frame.y_max, 4095.0);
    assert!(frame
        .intensities
        .iter()
        .all(|v| (0.0..=4095.0).contains(v)));
}
