//! Synchronizer for `{ "value": T }` channel settings (mute, power, volume)

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::fmt;
use tracing::{debug, info};

use super::{extract_field, Channel, ChannelCache, ChannelPoint, SyncContext, Synchronizer};
use crate::device::{paths, ChannelSettings, Scalar};
use crate::error::{GatewayError, Result};
use crate::surface::{
    ActionDefinition, FeedbackDefinition, FeedbackStyle, OptionField, ParsedOptions,
    SurfaceContribution, VariableDefinition,
};

/// Value type of a scalar setting
pub trait ScalarValue:
    Copy + PartialEq + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Pull the value out of validated action options
    fn from_options(options: &ParsedOptions, id: &str) -> Result<Self>;

    /// Boolean view for feedbacks
    fn as_flag(self) -> Option<bool> {
        None
    }
}

impl ScalarValue for bool {
    fn from_options(options: &ParsedOptions, id: &str) -> Result<Self> {
        options.require_flag(id)
    }

    fn as_flag(self) -> Option<bool> {
        Some(self)
    }
}

impl ScalarValue for f64 {
    fn from_options(options: &ParsedOptions, id: &str) -> Result<Self> {
        options.require_number(id)
    }
}

/// Boolean feedback exposed by a scalar feature
#[derive(Debug, Clone, Copy)]
pub struct FeedbackTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub style: FeedbackStyle,
}

/// Static description of one scalar feature
pub struct ScalarFeature<T> {
    /// Feature name for logs and bulk-field errors
    pub name: &'static str,
    /// Per-channel resource below `/settings/channel/{ch}/`
    pub resource: &'static str,
    pub action_id: &'static str,
    pub action_name: &'static str,
    /// Option carrying the new value
    pub value_option: fn() -> OptionField,
    /// Variables are named `{prefix}_{channel}`
    pub variable_prefix: &'static str,
    pub variable_label: &'static str,
    pub feedback: Option<FeedbackTemplate>,
    /// Field of a bulk channel entry
    pub extract: fn(&ChannelSettings) -> Option<T>,
}

/// Synchronizer for one scalar feature
pub struct ScalarPoint<T: ScalarValue> {
    feature: &'static ScalarFeature<T>,
    ctx: SyncContext,
    cache: ChannelCache<T>,
}

impl<T: ScalarValue> ScalarPoint<T> {
    pub fn new(ctx: SyncContext, feature: &'static ScalarFeature<T>) -> Self {
        let cache = ChannelCache::new(ctx.channels);
        Self {
            feature,
            ctx,
            cache,
        }
    }

    /// Snapshot of the cache, index 0 = channel 1
    pub fn snapshot(&self) -> Vec<Option<T>> {
        self.cache.snapshot()
    }

    fn variable_id(&self, channel: Channel) -> String {
        format!("{}_{}", self.feature.variable_prefix, channel)
    }

    fn path(&self, channel: Channel) -> String {
        paths::channel(channel.number(), self.feature.resource)
    }

    fn option_id(&self) -> &'static str {
        (self.feature.value_option)().id
    }

    fn commit(&self, channel: Channel, value: T) {
        self.cache.set(channel, value);
        self.ctx
            .surface
            .set_variable_values(vec![(self.variable_id(channel), json!(value))]);
        if let Some(feedback) = &self.feature.feedback {
            self.ctx.surface.check_feedbacks(&[feedback.id]);
        }
    }
}

#[async_trait]
impl<T: ScalarValue> Synchronizer for ScalarPoint<T> {
    fn name(&self) -> &'static str {
        self.feature.name
    }

    fn register_surface(&self) -> SurfaceContribution {
        debug!("{} data point enabled", self.feature.name);
        let count = self.ctx.channels;

        let actions = vec![ActionDefinition {
            id: self.feature.action_id.to_string(),
            name: self.feature.action_name.to_string(),
            options: vec![OptionField::channel(count), (self.feature.value_option)()],
        }];

        let feedbacks = self
            .feature
            .feedback
            .iter()
            .map(|template| FeedbackDefinition {
                id: template.id.to_string(),
                name: template.name.to_string(),
                style: template.style,
                options: vec![OptionField::channel(count)],
            })
            .collect();

        let variables = Channel::all(count)
            .map(|ch| {
                VariableDefinition::new(
                    self.variable_id(ch),
                    format!("{} Channel {}", self.feature.variable_label, ch),
                )
            })
            .collect();

        SurfaceContribution {
            actions,
            feedbacks,
            variables,
        }
    }

    async fn refresh(&self) -> Result<()> {
        let channels = self.ctx.fetch_channels().await?;
        self.apply_settings(&channels)
    }

    fn apply_settings(&self, channels: &[ChannelSettings]) -> Result<()> {
        let values = extract_field(channels, self.feature.name, self.feature.extract)?;
        self.cache.replace(&values);
        debug!("{} data point updated: {:?}", self.feature.name, values);

        let updates = Channel::all(self.ctx.channels)
            .zip(&values)
            .map(|(ch, value)| (self.variable_id(ch), json!(value)))
            .collect();
        self.ctx.surface.set_variable_values(updates);
        if let Some(feedback) = &self.feature.feedback {
            self.ctx.surface.check_feedbacks(&[feedback.id]);
        }
        Ok(())
    }

    async fn handle_action(&self, action_id: &str, options: &ParsedOptions) -> Result<()> {
        if action_id != self.feature.action_id {
            return Err(GatewayError::UnknownAction(action_id.to_string()));
        }
        let channel = options.channel(self.ctx.channels)?;
        let value = T::from_options(options, self.option_id())?;

        self.write_channel(channel, value).await?;
        info!(
            "Set {}: {:?} on channel {}",
            self.feature.name, value, channel
        );
        Ok(())
    }

    fn feedback(&self, feedback_id: &str, options: &ParsedOptions) -> Option<bool> {
        let template = self.feature.feedback.as_ref()?;
        if template.id != feedback_id {
            return None;
        }
        let state = options
            .channel(self.ctx.channels)
            .ok()
            .and_then(|ch| self.cache.get(ch))
            .and_then(ScalarValue::as_flag)
            .unwrap_or(false);
        Some(state)
    }

    fn is_populated(&self) -> bool {
        self.cache.is_populated()
    }
}

#[async_trait]
impl<T: ScalarValue> ChannelPoint for ScalarPoint<T> {
    type Value = T;

    async fn read_channel(&self, channel: Channel) -> Result<T> {
        let scalar: Scalar<T> = self.ctx.connection.fetch(&self.path(channel)).await?;
        self.commit(channel, scalar.value);
        Ok(scalar.value)
    }

    async fn write_channel(&self, channel: Channel, value: T) -> Result<()> {
        self.ctx
            .connection
            .store(&self.path(channel), &json!({ "value": value }))
            .await?;
        self.commit(channel, value);
        Ok(())
    }

    fn cached(&self, channel: Channel) -> Option<T> {
        self.cache.get(channel)
    }
}
