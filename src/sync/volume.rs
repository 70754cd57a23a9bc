//! Channel volume (`dsp/volume`, dB)

use super::scalar::{ScalarFeature, ScalarPoint};
use super::SyncContext;
use crate::device::ChannelSettings;
use crate::surface::OptionField;

pub type VolumePoint = ScalarPoint<f64>;

pub const MIN_DB: f64 = -100.0;
pub const MAX_DB: f64 = 24.0;

fn volume_option() -> OptionField {
    OptionField::number("volume", "Volume", MIN_DB, MAX_DB, 0.0)
}

fn extract(settings: &ChannelSettings) -> Option<f64> {
    settings.dsp.as_ref()?.volume.map(|v| v.value)
}

pub static VOLUME: ScalarFeature<f64> = ScalarFeature {
    name: "volume",
    resource: "dsp/volume",
    action_id: "volume_ch",
    action_name: "Set Channel Volume",
    value_option: volume_option,
    variable_prefix: "volume_ch",
    variable_label: "Volume",
    feedback: None,
    extract,
};

pub fn new(ctx: SyncContext) -> VolumePoint {
    ScalarPoint::new(ctx, &VOLUME)
}
