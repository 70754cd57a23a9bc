//! Channel amplifier power (`ampenable`)

use super::scalar::{FeedbackTemplate, ScalarFeature, ScalarPoint};
use super::SyncContext;
use crate::device::ChannelSettings;
use crate::surface::{FeedbackStyle, OptionField, Rgb};

pub type PowerPoint = ScalarPoint<bool>;

fn power_option() -> OptionField {
    OptionField::checkbox("power", "Power", false)
}

fn extract(settings: &ChannelSettings) -> Option<bool> {
    settings.ampenable.map(|p| p.value)
}

pub static POWER: ScalarFeature<bool> = ScalarFeature {
    name: "power",
    resource: "ampenable",
    action_id: "power_ch",
    action_name: "Set Channel Power",
    value_option: power_option,
    variable_prefix: "power_ch",
    variable_label: "Power",
    feedback: Some(FeedbackTemplate {
        id: "power",
        name: "Channel Power",
        style: FeedbackStyle {
            bgcolor: Rgb(0, 255, 0),
            color: Rgb(255, 255, 255),
        },
    }),
    extract,
};

pub fn new(ctx: SyncContext) -> PowerPoint {
    ScalarPoint::new(ctx, &POWER)
}
