//! Zaber ASCII rotation stage driver.
//!
//! Protocol: Zaber ASCII over a USB serial daisy chain, 115200 baud.
//! Reference: Zaber ASCII Protocol Manual (firmware 6.14 and later).
//!
//! Commands are plain text lines, `/<address> <command>\n`. Every addressed
//! device answers with exactly one reply line of the form
//! `@<address> <axis> <OK|RJ> <BUSY|IDLE> <warning flags> <data>`. A command
//! without an address (`/get system.serial`) is a broadcast and every device
//! on the chain answers it. Motion commands are acknowledged immediately;
//! completion is detected by polling until the status field reads IDLE.
//!
//! Both goniometer stages hang off one chain, so the [`ZaberAxis`] handles
//! share the serial port behind a mutex. A transaction holds the lock for its
//! full write-read cycle, which keeps replies paired with the command that
//! caused them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, trace, warn};

use crate::config::{MountAxisSettings, MountSettings};
use crate::error::GonioError;
use crate::hardware::capabilities::RotationStage;
use crate::hardware::find_port_by_usb_serial;

/// Time base of the Zaber native unit system: speeds are stored in
/// microsteps per 1.6384 s, accelerations in 10 microsteps per 1.6384 s^2.
const ZABER_TIMEBASE: f64 = 1.6384;

/// How long one reply line may take to arrive.
const REPLY_TIMEOUT: Duration = Duration::from_millis(500);

/// Stale bytes older than this are not worth waiting for.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(10);

/// Give up on a move or home that has not finished in this long. Full travel
/// of either stage takes well under a minute.
const MOVE_TIMEOUT: Duration = Duration::from_secs(60);

/// Delay between IDLE polls while a motion command is in flight.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

type ChainPort = Arc<Mutex<BufReader<SerialStream>>>;

fn protocol_error(message: String) -> anyhow::Error {
    GonioError::Protocol {
        device: "zaber",
        message,
    }
    .into()
}

// ===== Reply - one parsed Zaber ASCII reply line =====

#[derive(Debug, Clone, PartialEq, Eq)]
struct Reply {
    /// Chain address of the device that answered.
    address: u8,
    /// False when the device rejected the command (`RJ`).
    accepted: bool,
    /// True while a motion command is still executing (`BUSY`).
    busy: bool,
    /// Warning flags field; `--` when clear.
    warning: String,
    /// Payload after the fixed fields: a position, a serial number, or a
    /// rejection reason.
    data: String,
}

/// Parse `@01 0 OK IDLE -- 132636` into its fields.
fn parse_reply(line: &str) -> Result<Reply> {
    let trimmed = line.trim();
    let body = trimmed
        .strip_prefix('@')
        .ok_or_else(|| protocol_error(format!("expected a reply line, got {trimmed:?}")))?;

    let mut fields = body.split_whitespace();
    let address = fields
        .next()
        .and_then(|field| field.parse::<u8>().ok())
        .ok_or_else(|| protocol_error(format!("bad device address in reply {trimmed:?}")))?;
    // Axis scope field; always 0 for these single-axis devices.
    let _scope = fields
        .next()
        .ok_or_else(|| protocol_error(format!("truncated reply {trimmed:?}")))?;
    let flag = fields
        .next()
        .ok_or_else(|| protocol_error(format!("truncated reply {trimmed:?}")))?;
    let status = fields
        .next()
        .ok_or_else(|| protocol_error(format!("truncated reply {trimmed:?}")))?;
    let warning = fields.next().unwrap_or("--").to_string();
    let data = fields.collect::<Vec<_>>().join(" ");

    Ok(Reply {
        address,
        accepted: flag == "OK",
        busy: status == "BUSY",
        warning,
        data,
    })
}

// ===== Native units - degree conversions =====

fn degrees_to_microsteps(angle_deg: f64, microsteps_per_degree: f64) -> i64 {
    (angle_deg * microsteps_per_degree).round() as i64
}

fn microsteps_to_degrees(microsteps: i64, microsteps_per_degree: f64) -> f64 {
    microsteps as f64 / microsteps_per_degree
}

/// `maxspeed` is stored in microsteps per 1.6384 s.
fn speed_to_native(deg_per_s: f64, microsteps_per_degree: f64) -> i64 {
    (deg_per_s * microsteps_per_degree * ZABER_TIMEBASE).round() as i64
}

/// `motion.accelonly` and `motion.decelonly` are stored in units of
/// 10 microsteps per 1.6384 s^2. Zero is rejected by the firmware, so the
/// conversion never rounds below 1.
fn accel_to_native(deg_per_s2: f64, microsteps_per_degree: f64) -> i64 {
    let native = deg_per_s2 * microsteps_per_degree * ZABER_TIMEBASE * ZABER_TIMEBASE / 10.0;
    (native.round() as i64).max(1)
}

// ===== Chain I/O =====

/// Read one newline terminated reply line. `None` means the bus stayed quiet
/// for the whole timeout, which is how a broadcast collection ends.
async fn read_reply_line(
    port: &mut BufReader<SerialStream>,
    timeout: Duration,
) -> Result<Option<String>> {
    let mut raw = Vec::with_capacity(64);
    match tokio::time::timeout(timeout, port.read_until(b'\n', &mut raw)).await {
        Ok(Ok(0)) => Ok(None),
        Ok(Ok(_)) => Ok(Some(String::from_utf8_lossy(&raw).trim().to_string())),
        Ok(Err(err)) if err.kind() == std::io::ErrorKind::TimedOut => Ok(None),
        Ok(Err(err)) => Err(err).context("reading from Zaber chain"),
        Err(_elapsed) => {
            if raw.is_empty() {
                Ok(None)
            } else {
                Err(protocol_error(format!(
                    "reply cut short: {:?}",
                    String::from_utf8_lossy(&raw)
                )))
            }
        }
    }
}

/// Discard whatever is sitting in the receive buffer. Leftover bytes from an
/// aborted run would otherwise pair the wrong reply with the next command.
async fn drain_stale_input(port: &mut BufReader<SerialStream>) {
    loop {
        match read_reply_line(port, DRAIN_TIMEOUT).await {
            Ok(Some(line)) => trace!(%line, "Discarded stale Zaber reply"),
            // Partial garbage is consumed by the failed read, which is all
            // draining needs to achieve.
            Ok(None) | Err(_) => return,
        }
    }
}

/// Send an addressed command and return the parsed reply.
async fn transact(port: &ChainPort, address: u8, body: &str) -> Result<Reply> {
    // An empty body is the protocol's status ping.
    let command = if body.is_empty() {
        format!("/{address}\n")
    } else {
        format!("/{address} {body}\n")
    };

    let mut guard = port.lock().await;
    drain_stale_input(&mut guard).await;
    guard.write_all(command.as_bytes()).await?;
    guard.flush().await?;
    let line = read_reply_line(&mut guard, REPLY_TIMEOUT)
        .await?
        .ok_or_else(|| protocol_error(format!("no reply to {:?}", command.trim())))?;
    drop(guard);

    let reply = parse_reply(&line)?;
    trace!(command = command.trim(), %line, "Zaber transaction");
    if reply.address != address {
        return Err(protocol_error(format!(
            "reply from device {} to a command for device {address}: {line}",
            reply.address
        )));
    }
    if !reply.accepted {
        return Err(protocol_error(format!(
            "device {address} rejected {body:?}: {}",
            reply.data
        )));
    }
    if reply.warning != "--" {
        warn!(address, flags = %reply.warning, "Zaber device reports warning flags");
    }
    Ok(reply)
}

/// Broadcast `get system.serial` and collect one reply per device.
async fn enumerate_devices(port: &mut BufReader<SerialStream>) -> Result<HashMap<u32, u8>> {
    drain_stale_input(port).await;
    port.write_all(b"/get system.serial\n").await?;
    port.flush().await?;

    let mut devices = HashMap::new();
    while let Some(line) = read_reply_line(port, REPLY_TIMEOUT).await? {
        let reply = parse_reply(&line)?;
        if !reply.accepted {
            warn!(address = reply.address, %line, "Device rejected the serial number query");
            continue;
        }
        let serial: u32 = reply
            .data
            .trim()
            .parse()
            .map_err(|_| protocol_error(format!("unparseable serial number in {line:?}")))?;
        debug!(address = reply.address, serial, "Found Zaber device");
        devices.insert(serial, reply.address);
    }
    Ok(devices)
}

// ===== ZaberChain - port ownership and device discovery =====

/// The serial daisy chain both stages hang off.
///
/// Opens the port, takes an inventory of the devices on it, and hands out
/// [`ZaberAxis`] handles that share the port.
pub struct ZaberChain {
    port: ChainPort,
    port_name: String,
    microsteps_per_degree: f64,
    /// Device serial number to chain address, filled at connect.
    devices: HashMap<u32, u8>,
}

impl ZaberChain {
    /// Open the chain and inventory the devices on it.
    ///
    /// The port is located by USB serial number unless `mount.port` names it
    /// explicitly.
    pub async fn connect(settings: &MountSettings) -> Result<Self> {
        let port_name = match &settings.port {
            Some(path) => path.clone(),
            None => {
                if settings.usb_serial.is_empty() {
                    return Err(GonioError::Configuration(
                        "mount.usb_serial is not set; configure the chain adapter's USB \
                         serial number or an explicit mount.port"
                            .to_string(),
                    )
                    .into());
                }
                find_port_by_usb_serial(&settings.usb_serial)?
            }
        };

        let stream = tokio_serial::new(port_name.as_str(), settings.baud_rate)
            .open_native_async()
            .with_context(|| format!("opening Zaber chain on {port_name}"))?;
        let mut reader = BufReader::new(stream);

        let devices = enumerate_devices(&mut reader).await?;
        if devices.is_empty() {
            return Err(GonioError::DeviceNotFound(format!(
                "no Zaber devices answered on {port_name}"
            ))
            .into());
        }
        info!(port = %port_name, devices = devices.len(), "Connected to Zaber chain");

        Ok(Self {
            port: Arc::new(Mutex::new(reader)),
            port_name,
            microsteps_per_degree: settings.microsteps_per_degree,
            devices,
        })
    }

    /// Hand out the axis with the given configured serial number, applying
    /// its speed and acceleration settings.
    pub async fn claim_axis(
        &self,
        name: &'static str,
        axis_settings: &MountAxisSettings,
    ) -> Result<ZaberAxis> {
        if axis_settings.serial_number == 0 {
            return Err(GonioError::Configuration(format!(
                "mount.{name}.serial_number is not set"
            ))
            .into());
        }
        let address = self
            .devices
            .get(&axis_settings.serial_number)
            .copied()
            .ok_or_else(|| {
                GonioError::DeviceNotFound(format!(
                    "Zaber device {} ({name}) not on chain {}; found {:?}",
                    axis_settings.serial_number,
                    self.port_name,
                    self.inventory()
                ))
            })?;

        let axis = ZaberAxis {
            port: self.port.clone(),
            address,
            microsteps_per_degree: self.microsteps_per_degree,
        };
        if let Some(speed) = axis_settings.maxspeed_deg_s {
            axis.set_maxspeed(speed).await?;
        }
        if let Some(accel) = axis_settings.accel_deg_s2 {
            axis.set_acceleration(accel).await?;
        }
        info!(
            name,
            address,
            serial = axis_settings.serial_number,
            "Claimed Zaber axis"
        );
        Ok(axis)
    }

    /// Serial numbers seen on the chain, for diagnostics.
    pub fn inventory(&self) -> Vec<u32> {
        let mut serials: Vec<u32> = self.devices.keys().copied().collect();
        serials.sort_unstable();
        serials
    }

    /// Switch the status LEDs of every device on the chain.
    ///
    /// The LEDs sit close to the optical path on this rig and leak into the
    /// measurement, so they go dark for the duration of a sweep when
    /// `disable_led_during_sweep` is set.
    pub async fn set_led_enabled(&self, enabled: bool) -> Result<()> {
        let value = u8::from(enabled);
        let mut guard = self.port.lock().await;
        drain_stale_input(&mut guard).await;
        let command = format!("/set system.led.enable {value}\n");
        guard.write_all(command.as_bytes()).await?;
        guard.flush().await?;

        let mut answered = 0usize;
        while let Some(line) = read_reply_line(&mut guard, REPLY_TIMEOUT).await? {
            let reply = parse_reply(&line)?;
            if !reply.accepted {
                return Err(protocol_error(format!(
                    "device {} rejected the LED setting: {}",
                    reply.address, reply.data
                )));
            }
            answered += 1;
            if answered == self.devices.len() {
                break;
            }
        }
        if answered < self.devices.len() {
            warn!(
                answered,
                expected = self.devices.len(),
                "Not every device answered the LED broadcast"
            );
        }
        debug!(enabled, "Chain LEDs switched");
        Ok(())
    }
}

// ===== ZaberAxis - one stage on the chain =====

/// One rotation stage on the chain.
///
/// Works in device-frame degrees; the mounting offset lives a layer up in
/// [`crate::mount::GonioMount`].
pub struct ZaberAxis {
    port: ChainPort,
    address: u8,
    microsteps_per_degree: f64,
}

impl ZaberAxis {
    /// Chain address this axis answers on.
    pub fn address(&self) -> u8 {
        self.address
    }

    async fn command(&self, body: &str) -> Result<Reply> {
        transact(&self.port, self.address, body).await
    }

    /// Poll the device until it reports IDLE.
    async fn wait_until_idle(&self) -> Result<()> {
        let deadline = tokio::time::Instant::now() + MOVE_TIMEOUT;
        loop {
            let reply = self.command("").await?;
            if !reply.busy {
                return Ok(());
            }
            if tokio::time::Instant::now() > deadline {
                return Err(protocol_error(format!(
                    "device {} still BUSY after {MOVE_TIMEOUT:?}",
                    self.address
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Set the peak speed used by subsequent motion commands.
    pub async fn set_maxspeed(&self, deg_per_s: f64) -> Result<()> {
        let native = speed_to_native(deg_per_s, self.microsteps_per_degree);
        self.command(&format!("set maxspeed {native}")).await?;
        debug!(address = self.address, deg_per_s, native, "Set maxspeed");
        Ok(())
    }

    /// Set the acceleration and deceleration ramps.
    pub async fn set_acceleration(&self, deg_per_s2: f64) -> Result<()> {
        let native = accel_to_native(deg_per_s2, self.microsteps_per_degree);
        self.command(&format!("set motion.accelonly {native}")).await?;
        self.command(&format!("set motion.decelonly {native}")).await?;
        debug!(address = self.address, deg_per_s2, native, "Set acceleration");
        Ok(())
    }
}

#[async_trait]
impl RotationStage for ZaberAxis {
    async fn move_abs(&self, angle_deg: f64) -> Result<()> {
        let target = degrees_to_microsteps(angle_deg, self.microsteps_per_degree);
        self.command(&format!("move abs {target}")).await?;
        self.wait_until_idle().await
    }

    async fn move_rel(&self, delta_deg: f64) -> Result<()> {
        let delta = degrees_to_microsteps(delta_deg, self.microsteps_per_degree);
        self.command(&format!("move rel {delta}")).await?;
        self.wait_until_idle().await
    }

    async fn position(&self) -> Result<f64> {
        let reply = self.command("get pos").await?;
        let microsteps: i64 = reply
            .data
            .trim()
            .parse()
            .map_err(|_| protocol_error(format!("unparseable position {:?}", reply.data)))?;
        Ok(microsteps_to_degrees(microsteps, self.microsteps_per_degree))
    }

    async fn home(&self) -> Result<()> {
        self.command("home").await?;
        self.wait_until_idle().await
    }

    async fn set_limits(&self, min_deg: f64, max_deg: f64) -> Result<()> {
        let min = degrees_to_microsteps(min_deg, self.microsteps_per_degree);
        let max = degrees_to_microsteps(max_deg, self.microsteps_per_degree);
        self.command(&format!("set limit.min {min}")).await?;
        self.command(&format!("set limit.max {max}")).await?;
        debug!(
            address = self.address,
            min_deg, max_deg, "Applied travel limits"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_an_idle_reply() {
        let reply = parse_reply("@01 0 OK IDLE -- 0").unwrap();
        assert_eq!(reply.address, 1);
        assert!(reply.accepted);
        assert!(!reply.busy);
        assert_eq!(reply.warning, "--");
        assert_eq!(reply.data, "0");
    }

    #[test]
    fn parses_a_busy_reply() {
        let reply = parse_reply("@02 0 OK BUSY -- 0\r\n").unwrap();
        assert_eq!(reply.address, 2);
        assert!(reply.busy);
    }

    #[test]
    fn parses_a_rejection() {
        let reply = parse_reply("@01 0 RJ IDLE -- BADCOMMAND").unwrap();
        assert!(!reply.accepted);
        assert_eq!(reply.data, "BADCOMMAND");
    }

    #[test]
    fn parses_a_serial_number_reply() {
        let reply = parse_reply("@02 0 OK IDLE -- 132641").unwrap();
        assert_eq!(reply.data.parse::<u32>().unwrap(), 132_641);
    }

    #[test]
    fn keeps_warning_flags() {
        let reply = parse_reply("@01 0 OK IDLE WR 0").unwrap();
        assert_eq!(reply.warning, "WR");
    }

    #[test]
    fn rejects_garbage_lines() {
        assert!(parse_reply("!01 0 OK IDLE -- 0").is_err());
        assert!(parse_reply("@xx 0 OK IDLE -- 0").is_err());
        assert!(parse_reply("@01 0").is_err());
        assert!(parse_reply("").is_err());
    }

    #[test]
    fn microstep_conversion_matches_the_stage_resolution() {
        // X-RSW default resolution: 0.000234375 degrees per microstep.
        let msd = 1.0 / 0.000_234_375;
        assert_eq!(degrees_to_microsteps(90.0, msd), 384_000);
        assert_eq!(degrees_to_microsteps(-5.0, msd), -21_333);
        let back = microsteps_to_degrees(384_000, msd);
        assert!((back - 90.0).abs() < 1e-9);
    }

    #[test]
    fn speed_uses_the_zaber_timebase() {
        let msd = 1.0 / 0.000_234_375;
        // 10 deg/s is 42666.7 microsteps/s, scaled by 1.6384.
        assert_eq!(speed_to_native(10.0, msd), 69_905);
    }

    #[test]
    fn acceleration_never_rounds_to_zero() {
        let msd = 1.0 / 0.000_234_375;
        assert!(accel_to_native(1e-6, msd) >= 1);
    }
}
