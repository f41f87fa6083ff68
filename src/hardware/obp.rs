//! Ocean Binary Protocol spectrometer driver.
//!
//! Protocol: Ocean Binary Protocol (OBP) over USB-CDC serial.
//! Reference: Ocean Optics STS Developer's Kit programming guide.
//!
//! Every exchange is one request frame answered by one reply frame. A frame
//! is a fixed 44 byte header, an optional payload, a 16 byte checksum slot
//! and a 4 byte footer. Values that fit in 16 bytes travel in the header's
//! immediate-data block; larger ones (the spectrum) come back as payload.
//! All multi-byte fields are little endian. Requests carry the request-ACK
//! flag so that set commands are acknowledged too and every request maps to
//! exactly one reply.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info};

use crate::config::SpectrometerSettings;
use crate::error::GonioError;
use crate::hardware::capabilities::Spectrometer;
use crate::hardware::find_port_by_usb_serial;

const FRAME_HEADER_LEN: usize = 44;
/// Checksum slot plus footer, the bytes that follow the payload.
const FRAME_TRAILER_LEN: usize = 20;
const START_BYTES: [u8; 2] = [0xC1, 0xC0];
const FOOTER: [u8; 4] = [0xC2, 0xC3, 0xC4, 0xC5];
const PROTOCOL_VERSION: u16 = 0x1100;

/// Reply carries data answering a request.
const FLAG_RESPONSE: u16 = 0x0001;
/// Reply acknowledges a request that produced no data.
const FLAG_ACK: u16 = 0x0002;
/// Ask the device to acknowledge messages that produce no data.
const FLAG_REQUEST_ACK: u16 = 0x0004;
/// The device refused the request; the error number says why.
const FLAG_NACK: u16 = 0x0008;

// Message types, from the STS datasheet.
const GET_SERIAL_NUMBER: u32 = 0x0000_0100;
const SET_INTEGRATION_TIME_US: u32 = 0x0011_0010;
const GET_CORRECTED_SPECTRUM: u32 = 0x0010_1100;
const GET_WAVELENGTH_COEFF_COUNT: u32 = 0x0018_0100;
const GET_WAVELENGTH_COEFF: u32 = 0x0018_0101;

/// STS class detectors accept integration times from 10 us to 10 s.
const INTEGRATION_LIMITS_US: (u64, u64) = (10, 10_000_000);

/// How long a non-acquisition reply may take.
const REPLY_TIMEOUT: Duration = Duration::from_millis(500);

/// Slack on top of the integration time when waiting for a spectrum.
const SPECTRUM_TIMEOUT_MARGIN: Duration = Duration::from_secs(2);

/// Upper bound on a sane reply; anything larger means framing was lost.
const MAX_REPLY_BYTES: usize = 64 * 1024;

fn protocol_error(message: String) -> anyhow::Error {
    GonioError::Protocol {
        device: "spectrometer",
        message,
    }
    .into()
}

fn error_description(error_number: u16) -> &'static str {
    match error_number {
        0 => "success",
        1 => "invalid or unsupported protocol",
        2 => "unknown message type",
        3 => "bad checksum",
        4 => "message too large",
        5 => "payload length does not match message type",
        6 => "payload data invalid",
        7 => "device not ready for given message type",
        8 => "unknown checksum type",
        100 => "device reset required",
        _ => "unrecognized error code",
    }
}

// ===== Frame codec =====

/// A decoded reply frame.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ReplyFrame {
    message_type: u32,
    flags: u16,
    error_number: u16,
    immediate: Vec<u8>,
    payload: Vec<u8>,
}

impl ReplyFrame {
    /// Reply data lives in the immediate block when it fits, otherwise in
    /// the payload.
    fn data(&self) -> &[u8] {
        if self.payload.is_empty() {
            &self.immediate
        } else {
            &self.payload
        }
    }
}

/// Build a request frame with the given immediate data (at most 16 bytes).
fn encode_request(message_type: u32, immediate: &[u8]) -> Vec<u8> {
    debug_assert!(immediate.len() <= 16);
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + FRAME_TRAILER_LEN);
    frame.extend_from_slice(&START_BYTES);
    frame.extend_from_slice(&PROTOCOL_VERSION.to_le_bytes());
    frame.extend_from_slice(&FLAG_REQUEST_ACK.to_le_bytes());
    frame.extend_from_slice(&0u16.to_le_bytes()); // error number
    frame.extend_from_slice(&message_type.to_le_bytes());
    frame.extend_from_slice(&0u32.to_le_bytes()); // regarding
    frame.extend_from_slice(&[0u8; 6]); // reserved
    frame.push(0); // checksum type: none
    frame.push(immediate.len() as u8);
    let mut block = [0u8; 16];
    block[..immediate.len()].copy_from_slice(immediate);
    frame.extend_from_slice(&block);
    frame.extend_from_slice(&(FRAME_TRAILER_LEN as u32).to_le_bytes());
    frame.extend_from_slice(&[0u8; 16]); // checksum slot, unused
    frame.extend_from_slice(&FOOTER);
    frame
}

/// Decode a complete reply frame (header through footer).
fn decode_reply(frame: &[u8]) -> Result<ReplyFrame> {
    if frame.len() < FRAME_HEADER_LEN + FRAME_TRAILER_LEN {
        return Err(protocol_error(format!(
            "frame too short: {} bytes",
            frame.len()
        )));
    }
    if frame[0..2] != START_BYTES {
        return Err(protocol_error(format!(
            "bad start bytes {:02X} {:02X}",
            frame[0], frame[1]
        )));
    }
    if frame[frame.len() - 4..] != FOOTER {
        return Err(protocol_error("bad frame footer".to_string()));
    }

    let flags = u16::from_le_bytes([frame[4], frame[5]]);
    let error_number = u16::from_le_bytes([frame[6], frame[7]]);
    let message_type = u32::from_le_bytes([frame[8], frame[9], frame[10], frame[11]]);
    let immediate_len = frame[23] as usize;
    if immediate_len > 16 {
        return Err(protocol_error(format!(
            "immediate data length {immediate_len} exceeds the 16 byte block"
        )));
    }
    let immediate = frame[24..24 + immediate_len].to_vec();
    let payload = frame[FRAME_HEADER_LEN..frame.len() - FRAME_TRAILER_LEN].to_vec();

    Ok(ReplyFrame {
        message_type,
        flags,
        error_number,
        immediate,
        payload,
    })
}

/// Convert a corrected-spectrum payload into counts, one u16 per pixel.
fn decode_spectrum(data: &[u8], pixels: usize) -> Result<Vec<f64>> {
    if data.len() != pixels * 2 {
        return Err(protocol_error(format!(
            "spectrum is {} bytes, expected {} for {pixels} pixels",
            data.len(),
            pixels * 2
        )));
    }
    Ok(data
        .chunks_exact(2)
        .map(|pair| f64::from(u16::from_le_bytes([pair[0], pair[1]])))
        .collect())
}

/// Evaluate the wavelength calibration polynomial at a pixel index.
fn polynomial(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

// ===== Port I/O =====

async fn transact(
    port: &mut SerialStream,
    message_type: u32,
    immediate: &[u8],
    read_timeout: Duration,
) -> Result<ReplyFrame> {
    let request = encode_request(message_type, immediate);
    port.write_all(&request).await?;
    port.flush().await?;

    let mut header = [0u8; FRAME_HEADER_LEN];
    tokio::time::timeout(read_timeout, port.read_exact(&mut header))
        .await
        .map_err(|_| {
            protocol_error(format!(
                "no reply to message {message_type:#010X} within {read_timeout:?}"
            ))
        })?
        .context("reading OBP reply header")?;

    let bytes_remaining =
        u32::from_le_bytes([header[40], header[41], header[42], header[43]]) as usize;
    if !(FRAME_TRAILER_LEN..=MAX_REPLY_BYTES).contains(&bytes_remaining) {
        return Err(protocol_error(format!(
            "implausible reply length {bytes_remaining}; framing lost"
        )));
    }
    let mut rest = vec![0u8; bytes_remaining];
    tokio::time::timeout(REPLY_TIMEOUT, port.read_exact(&mut rest))
        .await
        .map_err(|_| protocol_error("reply body cut short".to_string()))?
        .context("reading OBP reply body")?;

    let mut frame = header.to_vec();
    frame.extend_from_slice(&rest);
    let reply = decode_reply(&frame)?;

    if reply.flags & FLAG_NACK != 0 || reply.error_number != 0 {
        return Err(protocol_error(format!(
            "device refused message {message_type:#010X}: error {} ({})",
            reply.error_number,
            error_description(reply.error_number)
        )));
    }
    // A frame without the response or ACK bit is our own request coming
    // back, which some adapters do when the device is absent.
    if reply.flags & (FLAG_RESPONSE | FLAG_ACK) == 0 {
        return Err(protocol_error(format!(
            "frame with flags {:#06X} is not a reply",
            reply.flags
        )));
    }
    if reply.message_type != message_type {
        return Err(protocol_error(format!(
            "reply type {:#010X} does not match request {message_type:#010X}",
            reply.message_type
        )));
    }
    Ok(reply)
}

async fn query_serial_number(port: &mut SerialStream) -> Result<String> {
    let reply = transact(port, GET_SERIAL_NUMBER, &[], REPLY_TIMEOUT).await?;
    Ok(String::from_utf8_lossy(reply.data())
        .trim_end_matches('\0')
        .to_string())
}

/// Read the calibration coefficients and expand them over the pixel axis.
async fn query_wavelengths(port: &mut SerialStream, pixels: usize) -> Result<Vec<f64>> {
    let count_reply = transact(port, GET_WAVELENGTH_COEFF_COUNT, &[], REPLY_TIMEOUT).await?;
    let count = *count_reply
        .data()
        .first()
        .ok_or_else(|| protocol_error("empty coefficient count reply".to_string()))?;
    if count == 0 {
        return Err(protocol_error(
            "device reports no wavelength calibration".to_string(),
        ));
    }

    let mut coefficients = Vec::with_capacity(count as usize);
    for index in 0..count {
        let reply = transact(port, GET_WAVELENGTH_COEFF, &[index], REPLY_TIMEOUT).await?;
        let bytes: [u8; 4] = reply
            .data()
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| {
                protocol_error(format!("wavelength coefficient {index} reply too short"))
            })?;
        coefficients.push(f64::from(f32::from_le_bytes(bytes)));
    }
    debug!(?coefficients, "Wavelength calibration read");

    Ok((0..pixels)
        .map(|pixel| polynomial(&coefficients, pixel as f64))
        .collect())
}

// ===== ObpSpectrometer - the connected device =====

/// An OBP spectrometer on a serial port.
///
/// The wavelength calibration is read once at connect; spectra are acquired
/// on demand through [`Spectrometer::intensities`].
pub struct ObpSpectrometer {
    port: Mutex<SerialStream>,
    serial: String,
    wavelengths: Vec<f64>,
    pixels: usize,
    max_intensity: f64,
    /// Last integration time written, used to size the acquisition timeout.
    integration_us: AtomicU64,
}

impl ObpSpectrometer {
    /// Open the device and read its identity and wavelength calibration.
    ///
    /// The port is located by USB serial number unless `spectrometer.port`
    /// names it explicitly.
    pub async fn connect(settings: &SpectrometerSettings) -> Result<Self> {
        let port_name = match &settings.port {
            Some(path) => path.clone(),
            None => {
                if settings.usb_serial.is_empty() {
                    return Err(GonioError::Configuration(
                        "spectrometer.usb_serial is not set; configure the device's USB \
                         serial number or an explicit spectrometer.port"
                            .to_string(),
                    )
                    .into());
                }
                find_port_by_usb_serial(&settings.usb_serial)?
            }
        };

        let mut stream = tokio_serial::new(port_name.as_str(), settings.baud_rate)
            .open_native_async()
            .with_context(|| format!("opening spectrometer on {port_name}"))?;

        let serial = query_serial_number(&mut stream).await?;
        let wavelengths = query_wavelengths(&mut stream, settings.pixels).await?;
        info!(
            port = %port_name,
            serial = %serial,
            pixels = settings.pixels,
            "Connected to spectrometer"
        );

        Ok(Self {
            port: Mutex::new(stream),
            serial,
            wavelengths,
            pixels: settings.pixels,
            max_intensity: settings.max_intensity,
            integration_us: AtomicU64::new(0),
        })
    }

    /// Device serial number string, as reported by the hardware.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    fn acquisition_timeout(&self) -> Duration {
        Duration::from_micros(self.integration_us.load(Ordering::Relaxed))
            + SPECTRUM_TIMEOUT_MARGIN
    }
}

#[async_trait]
impl Spectrometer for ObpSpectrometer {
    async fn wavelengths(&self) -> Result<Vec<f64>> {
        Ok(self.wavelengths.clone())
    }

    async fn intensities(&self) -> Result<Vec<f64>> {
        let timeout = self.acquisition_timeout();
        let mut guard = self.port.lock().await;
        let reply = transact(&mut guard, GET_CORRECTED_SPECTRUM, &[], timeout).await?;
        drop(guard);
        decode_spectrum(reply.data(), self.pixels)
    }

    async fn set_integration_time(&self, micros: u64) -> Result<()> {
        let value = u32::try_from(micros).map_err(|_| {
            protocol_error(format!(
                "integration time {micros} us does not fit the wire format"
            ))
        })?;
        let mut guard = self.port.lock().await;
        transact(
            &mut guard,
            SET_INTEGRATION_TIME_US,
            &value.to_le_bytes(),
            REPLY_TIMEOUT,
        )
        .await?;
        drop(guard);
        self.integration_us.store(micros, Ordering::Relaxed);
        debug!(micros, "Integration time set");
        Ok(())
    }

    async fn integration_time_limits(&self) -> Result<(u64, u64)> {
        Ok(INTEGRATION_LIMITS_US)
    }

    fn max_intensity(&self) -> f64 {
        self.max_intensity
    }
}
