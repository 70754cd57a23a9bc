//! Channel auto-standby (`autostandby`)

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{extract_field, Channel, ChannelCache, ChannelPoint, SyncContext, Synchronizer};
use crate::device::{paths, AutoStandbyState, ChannelSettings};
use crate::error::{GatewayError, Result};
use crate::surface::{
    ActionDefinition, OptionField, ParsedOptions, SurfaceContribution, VariableDefinition,
};

const RESOURCE: &str = "autostandby";

pub const ACTION_ID: &str = "autostandby_ch";

fn variable_id(channel: Channel) -> String {
    format!("autostandby_ch_{}", channel)
}

/// Variables carry the record as a JSON string
fn variable_value(state: &AutoStandbyState) -> Value {
    Value::String(json!(state).to_string())
}

pub struct AutoStandbyPoint {
    ctx: SyncContext,
    cache: ChannelCache<AutoStandbyState>,
}

impl AutoStandbyPoint {
    pub fn new(ctx: SyncContext) -> Self {
        let cache = ChannelCache::new(ctx.channels);
        Self { ctx, cache }
    }

    pub fn snapshot(&self) -> Vec<Option<AutoStandbyState>> {
        self.cache.snapshot()
    }

    fn path(channel: Channel) -> String {
        paths::channel(channel.number(), RESOURCE)
    }

    fn commit(&self, channel: Channel, state: AutoStandbyState) {
        self.cache.set(channel, state);
        self.ctx
            .surface
            .set_variable_values(vec![(variable_id(channel), variable_value(&state))]);
    }
}

#[async_trait]
impl Synchronizer for AutoStandbyPoint {
    fn name(&self) -> &'static str {
        "autostandby"
    }

    fn register_surface(&self) -> SurfaceContribution {
        debug!("autostandby data point enabled");
        let count = self.ctx.channels;

        let actions = vec![ActionDefinition {
            id: ACTION_ID.to_string(),
            name: "Set Channel Autostandby".to_string(),
            options: vec![
                OptionField::channel(count),
                OptionField::checkbox("enable", "Enable Autostandby", false),
                OptionField::number("threshold", "Threshold (in dBFs)", -80.0, 0.0, -80.0).step(1.0),
                OptionField::number("timeout", "Timeout (in seconds)", 60.0, 86400.0, 60.0)
                    .step(1.0),
            ],
        }];

        let variables = Channel::all(count)
            .map(|ch| VariableDefinition::new(variable_id(ch), format!("Autostandby Channel {}", ch)))
            .collect();

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
        let records = extract_field(channels, "autostandby", |settings| settings.autostandby)?;
        self.cache.replace(&records);
        debug!("autostandby data point updated: {:?}", records);

        let updates = Channel::all(self.ctx.channels)
            .zip(&records)
            .map(|(ch, state)| (variable_id(ch), variable_value(state)))
            .collect();
        self.ctx.surface.set_variable_values(updates);
        Ok(())
    }

    async fn handle_action(&self, action_id: &str, options: &ParsedOptions) -> Result<()> {
        if action_id != ACTION_ID {
            return Err(GatewayError::UnknownAction(action_id.to_string()));
        }
        let channel = options.channel(self.ctx.channels)?;
        let state = AutoStandbyState {
            enabled: options.require_flag("enable")?,
            threshold_db: options.require_number("threshold")?,
            timeout_seconds: options.require_number("timeout")?,
        };

        self.write_channel(channel, state).await?;
        info!("Set autostandby: {} on channel {}", json!(state), channel);
        Ok(())
    }

    fn is_populated(&self) -> bool {
        self.cache.is_populated()
    }
}

#[async_trait]
impl ChannelPoint for AutoStandbyPoint {
    type Value = AutoStandbyState;

    async fn read_channel(&self, channel: Channel) -> Result<AutoStandbyState> {
        let state: AutoStandbyState = self.ctx.connection.fetch(&Self::path(channel)).await?;
        self.commit(channel, state);
        Ok(state)
    }

    async fn write_channel(&self, channel: Channel, state: AutoStandbyState) -> Result<()> {
        self.ctx
            .connection
            .store(&Self::path(channel), &json!(state))
            .await?;
        self.commit(channel, state);
        Ok(())
    }

    fn cached(&self, channel: Channel) -> Option<AutoStandbyState> {
        self.cache.get(channel)
    }
}
