//! Live spectrum publishing.
//!
//! The sweep publishes its latest processed spectrum through a
//! `tokio::sync::watch` channel; the window (feature `display`) paints
//! whatever frame is current when it repaints. Only the newest frame
//! matters, older ones are dropped, and publishing never blocks or fails
//! the sweep. Headless runs use [`DisplayHandle::disabled`].

use std::sync::Arc;

use tokio::sync::watch;

#[cfg(feature = "display")]
pub mod window;

/// One processed spectrum, ready to draw.
#[derive(Debug, Clone)]
pub struct SpectrumFrame {
    /// Plot title, carries the current angle(s).
    pub title: String,
    /// Smoothed wavelength axis, shared across frames.
    pub wavelengths: Arc<Vec<f64>>,
    /// Smoothed intensities, index-aligned with `wavelengths`.
    pub intensities: Vec<f64>,
    /// Plot ceiling (detector saturation).
    pub y_max: f64,
}

/// Receiving side of the spectrum channel.
pub type SpectrumReceiver = watch::Receiver<Option<SpectrumFrame>>;

/// Publishing side handed to the sweep runner.
pub struct DisplayHandle {
    tx: Option<watch::Sender<Option<SpectrumFrame>>>,
}

impl DisplayHandle {
    /// A handle that drops every frame (headless operation).
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Whether frames go anywhere.
    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Publish a frame, replacing any undrawn predecessor.
    pub fn publish(&self, frame: SpectrumFrame) {
        if let Some(tx) = &self.tx {
            tx.send_replace(Some(frame));
        }
    }
}

/// Create a connected handle/receiver pair.
pub fn channel() -> (DisplayHandle, SpectrumReceiver) {
    let (tx, rx) = watch::channel(None);
    (DisplayHandle { tx: Some(tx) }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(title: &str) -> SpectrumFrame {
        SpectrumFrame {
            title: title.to_string(),
            wavelengths: Arc::new(vec![400.0, 500.0]),
            intensities: vec![1.0, 2.0],
            y_max: 16383.0,
        }
    }

    #[tokio::test]
    async fn receiver_sees_latest_frame_only() {
        let (handle, rx) = channel();
        assert!(rx.borrow().is_none());

        handle.publish(frame("first"));
        handle.publish(frame("second"));

        let latest = rx.borrow().clone().unwrap();
        assert_eq!(latest.title, "second");
    }

    #[tokio::test]
    async fn disabled_handle_drops_frames_silently() {
        let handle = DisplayHandle::disabled();
        assert!(!handle.is_enabled());
        handle.publish(frame("ignored"));
    }

    #[tokio::test]
    async fn publishing_survives_a_dropped_receiver() {
        let (handle, rx) = channel();
        drop(rx);
        handle.publish(frame("nobody listening"));
    }
}
