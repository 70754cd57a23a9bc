//! Amplifier device access: transport, connection gate and wire types

pub mod connection;
pub mod transport;
pub mod types;

pub use connection::{ConnectionManager, ConnectionState, Credentials, StatusCallback};
pub use transport::{DeviceResponse, HttpTransport, Transport, Verb};
pub use types::{
    AutoStandbyState, ChannelSettings, DelayMode, DelayState, DeviceInfo, Scalar, VersionInfo,
};

/// Device-wide endpoints (not channel state, never cached)
pub mod paths {
    pub const VERSION: &str = "/version";
    pub const DEVICE_INFO: &str = "/info/device";
    pub const CHANNELS: &str = "/settings/channel";

    /// `/settings/channel/{ch}/{resource}` with a 1-based channel number
    pub fn channel(number: u8, resource: &str) -> String {
        format!("{}/{}/{}", CHANNELS, number, resource)
    }
}
