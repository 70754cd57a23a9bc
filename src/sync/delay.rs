//! Channel delay (`dsp/delay`)
//!
//! The device replaces the whole delay record on every write, so each action
//! reads the current record, merges the fields it targets and writes the
//! merged record back.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{extract_field, Channel, ChannelCache, ChannelPoint, SyncContext, Synchronizer};
use crate::device::{paths, ChannelSettings, DelayMode, DelayState};
use crate::error::{GatewayError, Result};
use crate::surface::{
    ActionDefinition, Choice, OptionField, ParsedOptions, SurfaceContribution, VariableDefinition,
};

const RESOURCE: &str = "dsp/delay";

pub const ACTION_DELAY: &str = "delay_ch";
pub const ACTION_TYPE: &str = "delay_type";
pub const ACTION_TEMPERATURE: &str = "delay_temperature";

/// Fields one delay action changes
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DelayChange {
    /// Unit values; `None` keeps the current value
    Values {
        ms: Option<f64>,
        meters: Option<f64>,
        samples: Option<f64>,
    },
    Mode(DelayMode),
    Temperature(f64),
}

impl DelayChange {
    /// Merge into a record read from the device
    pub fn apply(self, mut state: DelayState) -> DelayState {
        match self {
            DelayChange::Values {
                ms,
                meters,
                samples,
            } => {
                state.ms = ms.unwrap_or(state.ms);
                state.meters = meters.unwrap_or(state.meters);
                state.samples = samples.unwrap_or(state.samples);
            },
            DelayChange::Mode(mode) => state.mode = mode,
            DelayChange::Temperature(temperature) => state.temperature = temperature,
        }
        state
    }

    fn from_action(action_id: &str, options: &ParsedOptions) -> Result<Self> {
        match action_id {
            ACTION_DELAY => {
                let change = DelayChange::Values {
                    ms: options.number("delay_ms"),
                    meters: options.number("delay_m"),
                    samples: options.number("delay_samples"),
                };
                if change == (DelayChange::Values {
                    ms: None,
                    meters: None,
                    samples: None,
                }) {
                    return Err(GatewayError::validation(
                        "one of 'delay_ms', 'delay_m' or 'delay_samples' is required",
                    ));
                }
                Ok(change)
            },
            ACTION_TYPE => {
                let mode = options
                    .require_choice("type")?
                    .parse::<DelayMode>()
                    .map_err(GatewayError::Validation)?;
                Ok(DelayChange::Mode(mode))
            },
            ACTION_TEMPERATURE => Ok(DelayChange::Temperature(
                options.require_number("temperature")?,
            )),
            other => Err(GatewayError::UnknownAction(other.to_string())),
        }
    }
}

/// Variable values of one channel's delay record
fn variable_values(channel: Channel, state: &DelayState) -> Vec<(String, Value)> {
    vec![
        (format!("delay_ch_value_{}", channel), json!(state.readout())),
        (format!("delay_ch_type_{}", channel), json!(state.mode.as_str())),
        (format!("delay_ch_temp_{}", channel), json!(state.temperature)),
        (format!("delay_ch_value_ms_{}", channel), json!(state.ms)),
        (format!("delay_ch_value_m_{}", channel), json!(state.meters)),
        (format!("delay_ch_value_samples_{}", channel), json!(state.samples)),
    ]
}

pub struct DelayPoint {
    ctx: SyncContext,
    cache: ChannelCache<DelayState>,
}

impl DelayPoint {
    pub fn new(ctx: SyncContext) -> Self {
        let cache = ChannelCache::new(ctx.channels);
        Self { ctx, cache }
    }

    pub fn snapshot(&self) -> Vec<Option<DelayState>> {
        self.cache.snapshot()
    }

    /// Read-merge-write one channel
    pub async fn apply(&self, channel: Channel, change: DelayChange) -> Result<DelayState> {
        let current = self.fetch_record(channel).await?;
        let merged = change.apply(current);
        self.write_channel(channel, merged).await?;
        Ok(merged)
    }

    async fn fetch_record(&self, channel: Channel) -> Result<DelayState> {
        self.ctx
            .connection
            .fetch(&paths::channel(channel.number(), RESOURCE))
            .await
    }

    fn commit(&self, channel: Channel, state: DelayState) {
        self.cache.set(channel, state);
        self.ctx
            .surface
            .set_variable_values(variable_values(channel, &state));
    }
}

#[async_trait]
impl Synchronizer for DelayPoint {
    fn name(&self) -> &'static str {
        "delay"
    }

    fn register_surface(&self) -> SurfaceContribution {
        debug!("delay data point enabled");
        let count = self.ctx.channels;

        let choices = DelayMode::ALL
            .iter()
            .map(|mode| Choice {
                id: mode.as_str().to_string(),
                label: mode.as_str().to_uppercase(),
            })
            .collect();

        let actions = vec![
            ActionDefinition {
                id: ACTION_DELAY.to_string(),
                name: "Set Channel Delay".to_string(),
                options: vec![
                    OptionField::channel(count),
                    OptionField::number("delay_ms", "Delay (ms)", 0.0, 1000.0, 0.0)
                        .step(0.1)
                        .optional(),
                    OptionField::number("delay_m", "Delay (Meters)", 0.0, 330.0, 0.0)
                        .step(0.1)
                        .optional(),
                    OptionField::number("delay_samples", "Delay (Samples)", 0.0, 48000.0, 0.0)
                        .step(1.0)
                        .optional(),
                ],
            },
            ActionDefinition {
                id: ACTION_TYPE.to_string(),
                name: "Set Channel Delay Readout Type".to_string(),
                options: vec![
                    OptionField::channel(count),
                    OptionField::dropdown("type", "Delay Type", DelayMode::Ms.as_str(), choices),
                ],
            },
            ActionDefinition {
                id: ACTION_TEMPERATURE.to_string(),
                name: "Set Channel Delay Temperature".to_string(),
                options: vec![
                    OptionField::channel(count),
                    OptionField::number("temperature", "Temperature (°C)", -100.0, 100.0, 20.0)
                        .step(0.1),
                ],
            },
        ];

        let mut variables = Vec::new();
        for ch in Channel::all(count) {
            variables.push(VariableDefinition::new(
                format!("delay_ch_value_{}", ch),
                format!("Delay Sum Channel {}", ch),
            ));
            variables.push(VariableDefinition::new(
                format!("delay_ch_type_{}", ch),
                format!("Delay Readout Type Channel {}", ch),
            ));
            variables.push(VariableDefinition::new(
                format!("delay_ch_value_ms_{}", ch),
                format!("Delay in ms Channel {}", ch),
            ));
            variables.push(VariableDefinition::new(
                format!("delay_ch_value_m_{}", ch),
                format!("Delay in m Channel {}", ch),
            ));
            variables.push(VariableDefinition::new(
                format!("delay_ch_value_samples_{}", ch),
                format!("Delay in samples Channel {}", ch),
            ));
            variables.push(VariableDefinition::new(
                format!("delay_ch_temp_{}", ch),
                format!("Delay Temperature in °C Channel {}", ch),
            ));
        }

        SurfaceContribution {
            actions,
            feedbacks: Vec::new(),
            variables,
        }
    }

    async fn refresh(&self) -> Result<()> {
        let channels = self.ctx.fetch_channels().await?;
        self.apply_settings(&channels)
    }

    fn apply_settings(&self, channels: &[ChannelSettings]) -> Result<()> {
        let records = extract_field(channels, "delay", |settings| settings.dsp.as_ref()?.delay)?;
        self.cache.replace(&records);
        debug!("delay data point updated: {:?}", records);

        let updates = Channel::all(self.ctx.channels)
            .zip(&records)
            .flat_map(|(ch, state)| variable_values(ch, state))
            .collect();
        self.ctx.surface.set_variable_values(updates);
        Ok(())
    }

    async fn handle_action(&self, action_id: &str, options: &ParsedOptions) -> Result<()> {
        let change = DelayChange::from_action(action_id, options)?;
        let channel = options.channel(self.ctx.channels)?;

        let merged = self.apply(channel, change).await?;
        info!(
            "Set delay ({:?}): {} on channel {}",
            change,
            json!(merged),
            channel
        );
        Ok(())
    }

    fn is_populated(&self) -> bool {
        self.cache.is_populated()
    }
}

#[async_trait]
impl ChannelPoint for DelayPoint {
    type Value = DelayState;

    async fn read_channel(&self, channel: Channel) -> Result<DelayState> {
        let state = self.fetch_record(channel).await?;
        self.commit(channel, state);
        Ok(state)
    }

    async fn write_channel(&self, channel: Channel, state: DelayState) -> Result<()> {
        self.ctx
            .connection
            .store(&paths::channel(channel.number(), RESOURCE), &json!(state))
            .await?;
        self.commit(channel, state);
        Ok(())
    }

    fn cached(&self, channel: Channel) -> Option<DelayState> {
        self.cache.get(channel)
    }
}
