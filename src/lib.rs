//! # Goniospec Core Library
//!
//! This crate is the core library for the `goniospec` binary: an angular
//! sweep tool for a two-axis goniometer with a fiber spectrometer riding on
//! the moving arm. The binary only wires configuration, hardware and the
//! sweep loop together; everything else lives here so the same logic drives
//! the real bench, the mock demo and the test suite.
//!
//! ## Crate Structure
//!
//! The library is organized into several modules, each with a distinct
//! responsibility:
//!
//! - **`config`**: Figment-based settings with per-mode defaults and
//!   post-load validation. See `config::Settings`.
//! - **`data`**: The sweep CSV writer; the header carries the smoothed
//!   wavelength axis and every row is flushed to disk as it is taken.
//! - **`display`**: The live spectrum plot (behind the `display` feature)
//!   and the watch channel that feeds it.
//! - **`error`**: The `GonioError` enum. Every failure during a run is
//!   fatal and propagates up to `main`.
//! - **`hardware`**: The `RotationStage` and `Spectrometer` capability
//!   traits, the Zaber chain and OBP spectrometer drivers (behind the
//!   `instrument_serial` feature), and mocks implementing both roles.
//! - **`mount`**: The assembled two-axis mount: user-frame angles, mounting
//!   offsets, travel limits and the guarded homing sequence.
//! - **`processing`**: Spectrum averaging and boxcar smoothing.
//! - **`sweep`**: Angle sequence generation and the runner that moves,
//!   settles, acquires and records.

pub mod config;
pub mod data;
pub mod display;
pub mod error;
pub mod hardware;
pub mod mount;
pub mod processing;
pub mod sweep;
