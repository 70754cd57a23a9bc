//! Wire types of the amplifier REST API

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// `{ "value": T }` envelope used by the scalar channel settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scalar<T> {
    pub value: T,
}

/// Firmware version (`GET /version`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    #[serde(deserialize_with = "version_string")]
    pub version: String,
}

/// Accept both `"1.4.0"` and bare numbers for the version field
fn version_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

/// Device description (`GET /info/device`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub model_name: String,
    pub channel: u32,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub psu_fan: bool,
    #[serde(default)]
    pub housing_fan: bool,
    #[serde(default)]
    pub sd_card: bool,
    #[serde(default)]
    pub rtc: bool,
    #[serde(default)]
    pub mains_measure: bool,
    #[serde(default)]
    pub sw_revision: String,
    #[serde(default)]
    pub fpga_revision: String,
    #[serde(default)]
    pub loader_revision: String,
    #[serde(default)]
    pub image_id: u64,
    #[serde(default)]
    pub serial: String,
}

/// Delay readout unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DelayMode {
    #[default]
    #[serde(rename = "ms")]
    Ms,
    #[serde(rename = "m")]
    Meters,
    #[serde(rename = "samples")]
    Samples,
}

impl DelayMode {
    pub const ALL: [DelayMode; 3] = [DelayMode::Ms, DelayMode::Meters, DelayMode::Samples];

    pub fn as_str(self) -> &'static str {
        match self {
            DelayMode::Ms => "ms",
            DelayMode::Meters => "m",
            DelayMode::Samples => "samples",
        }
    }
}

impl fmt::Display for DelayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DelayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DelayMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| format!("unknown delay type '{}'", s))
    }
}

/// Delay totals computed by the device (read-only)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct DelayTotals {
    pub ms: f64,
    pub meters: f64,
    pub samples: f64,
}

/// Full delay record of one channel
///
/// The three unit values are independent; the device converts and reports
/// all of them, nothing here derives one from another.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "DelayWire", into = "DelayRequest")]
pub struct DelayState {
    pub mode: DelayMode,
    pub ms: f64,
    pub meters: f64,
    pub samples: f64,
    pub temperature: f64,
    pub totals: DelayTotals,
}

impl DelayState {
    /// Default air temperature the device assumes
    pub const DEFAULT_TEMPERATURE: f64 = 21.0;

    /// User-facing readout: the device total in the selected unit
    pub fn readout(&self) -> f64 {
        match self.mode {
            DelayMode::Ms => self.totals.ms,
            DelayMode::Meters => self.totals.meters,
            DelayMode::Samples => self.totals.samples,
        }
    }
}

impl Default for DelayState {
    fn default() -> Self {
        DelayWire::default().into()
    }
}

/// Delay record as the device reports it
#[derive(Debug, Clone, Default, Deserialize)]
struct DelayWire {
    #[serde(rename = "type")]
    mode: Option<DelayMode>,
    delay_samples: Option<f64>,
    delay_ms: Option<f64>,
    delay_m: Option<f64>,
    samples: Option<f64>,
    ms: Option<f64>,
    m: Option<f64>,
    temperature: Option<f64>,
}

impl From<DelayWire> for DelayState {
    fn from(wire: DelayWire) -> Self {
        let totals = DelayTotals {
            ms: wire.delay_ms.unwrap_or(0.0),
            meters: wire.delay_m.unwrap_or(0.0),
            samples: wire.delay_samples.unwrap_or(0.0),
        };
        DelayState {
            mode: wire.mode.unwrap_or_default(),
            ms: wire.ms.unwrap_or(totals.ms),
            meters: wire.m.unwrap_or(totals.meters),
            samples: wire.samples.unwrap_or(totals.samples),
            temperature: wire
                .temperature
                .unwrap_or(DelayState::DEFAULT_TEMPERATURE),
            totals,
        }
    }
}

/// Delay record as the device expects it on write (whole record)
#[derive(Debug, Clone, Serialize)]
struct DelayRequest {
    #[serde(rename = "type")]
    mode: DelayMode,
    samples: f64,
    ms: f64,
    m: f64,
    temperature: f64,
}

impl From<DelayState> for DelayRequest {
    fn from(state: DelayState) -> Self {
        DelayRequest {
            mode: state.mode,
            samples: state.samples,
            ms: state.ms,
            m: state.meters,
            temperature: state.temperature,
        }
    }
}

/// Auto-standby record of one channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutoStandbyState {
    #[serde(rename = "enable")]
    pub enabled: bool,
    /// dBFS, -80..=0
    #[serde(rename = "threshold")]
    pub threshold_db: f64,
    /// Seconds, 60..=86400
    #[serde(rename = "timeout")]
    pub timeout_seconds: f64,
}

/// Subset of the DSP block inside a bulk channel entry
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DspSettings {
    pub mute: Option<Scalar<bool>>,
    pub volume: Option<Scalar<f64>>,
    pub delay: Option<DelayState>,
}

/// One entry of the bulk `GET /settings/channel` list
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelSettings {
    pub ampenable: Option<Scalar<bool>>,
    pub dsp: Option<DspSettings>,
    pub autostandby: Option<AutoStandbyState>,
}
