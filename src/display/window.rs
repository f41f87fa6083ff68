//! Live spectrum window.
//!
//! A single egui window with one line plot: intensity versus wavelength,
//! x spanning the (smoothed) wavelength axis and y pinned to
//! `[0, detector saturation]` so successive frames are visually comparable.
//! The window runs on the main thread while the sweep runs as a tokio task,
//! and stays open after the sweep finishes until the operator closes it.

use eframe::egui;
use egui_plot::{Line, Plot, PlotBounds, PlotPoints};

use crate::display::SpectrumReceiver;

struct SpectrumApp {
    rx: SpectrumReceiver,
}

impl eframe::App for SpectrumApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let latest = self.rx.borrow().clone();

        egui::CentralPanel::default().show(ctx, |ui| match latest {
            Some(frame) => {
                ui.heading(&frame.title);

                let (x_min, x_max) = frame
                    .wavelengths
                    .iter()
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), w| {
                        (lo.min(*w), hi.max(*w))
                    });
                let points = PlotPoints::from_iter(
                    frame
                        .wavelengths
                        .iter()
                        .zip(frame.intensities.iter())
                        .map(|(w, i)| [*w, *i]),
                );

                Plot::new("spectrum")
                    .x_axis_label("Wavelength (nm)")
                    .y_axis_label("Counts")
                    .show(ui, |plot_ui| {
                        if x_min.is_finite() && x_max > x_min {
                            plot_ui.set_plot_bounds(PlotBounds::from_min_max(
                                [x_min, 0.0],
                                [x_max, frame.y_max],
                            ));
                        }
                        plot_ui.line(Line::new(points));
                    });
            }
            None => {
                ui.heading("Spectrometer Reading");
                ui.label("Waiting for the first spectrum...");
            }
        });

        // Frames arrive between repaints; poll at ~20Hz.
        ctx.request_repaint_after(std::time::Duration::from_millis(50));
    }
}

/// Open the window and block until the operator closes it.
pub fn run(rx: SpectrumReceiver) -> anyhow::Result<()> {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([900.0, 520.0]),
        ..Default::default()
    };
    eframe::run_native(
        "goniospec",
        options,
        Box::new(|_cc| Ok(Box::new(SpectrumApp { rx }))),
    )
    .map_err(|e| anyhow::anyhow!("display window failed: {e}"))
}
