//! Channel mute (`dsp/mute`)

use super::scalar::{FeedbackTemplate, ScalarFeature, ScalarPoint};
use super::SyncContext;
use crate::device::ChannelSettings;
use crate::surface::{FeedbackStyle, OptionField, Rgb};

pub type MutePoint = ScalarPoint<bool>;

fn mute_option() -> OptionField {
    OptionField::checkbox("mute", "Mute", false)
}

fn extract(settings: &ChannelSettings) -> Option<bool> {
    settings.dsp.as_ref()?.mute.map(|m| m.value)
}

pub static MUTE: ScalarFeature<bool> = ScalarFeature {
    name: "mute",
    resource: "dsp/mute",
    action_id: "mute_ch",
    action_name: "Channel Mute",
    value_option: mute_option,
    variable_prefix: "mute_ch",
    variable_label: "Mute",
    feedback: Some(FeedbackTemplate {
        id: "mute",
        name: "Channel Mute",
        style: FeedbackStyle {
            bgcolor: Rgb(255, 0, 0),
            color: Rgb(255, 255, 255),
        },
    }),
    extract,
};

pub fn new(ctx: SyncContext) -> MutePoint {
    ScalarPoint::new(ctx, &MUTE)
}
