//! Channel state synchronizers ("data points")
//!
//! One synchronizer per device feature. Each owns a channel-indexed cache,
//! registers its surface catalog, refreshes from the device in bulk, and
//! performs per-channel reads and writes through the connection gate.
//!
//! Mute, power and volume share [`scalar::ScalarPoint`]; delay and
//! auto-standby carry structured records and have their own types.

pub mod auto_standby;
pub mod delay;
pub mod mute;
pub mod power;
pub mod scalar;
pub mod volume;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::device::{paths, ChannelSettings, ConnectionManager};
use crate::error::{GatewayError, Result};
use crate::surface::{ParsedOptions, Surface, SurfaceContribution};

pub use auto_standby::AutoStandbyPoint;
pub use delay::DelayPoint;
pub use scalar::ScalarPoint;

/// A 1-based amplifier output, checked against the channel count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel(u8);

impl Channel {
    /// Validate a 1-based channel number
    pub fn new(number: u8, count: u8) -> Result<Self> {
        if number == 0 || number > count {
            return Err(GatewayError::validation(format!(
                "channel {} out of range 1..={}",
                number, count
            )));
        }
        Ok(Self(number))
    }

    /// Validate a channel number coming from an untyped option
    pub fn from_number(number: f64, count: u8) -> Result<Self> {
        if number.fract() != 0.0 || number < 1.0 || number > f64::from(count) {
            return Err(GatewayError::validation(format!(
                "channel {} out of range 1..={}",
                number, count
            )));
        }
        Self::new(number as u8, count)
    }

    /// All channels of an amplifier, in order
    pub fn all(count: u8) -> impl Iterator<Item = Channel> {
        (1..=count).map(Channel)
    }

    /// 1-based number used on the wire and on the surface
    pub fn number(self) -> u8 {
        self.0
    }

    /// 0-based cache index
    pub fn index(self) -> usize {
        usize::from(self.0 - 1)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Channel-indexed cache owned by one synchronizer
///
/// Starts empty; slots are overwritten in place by refreshes and confirmed
/// writes and are never removed.
pub struct ChannelCache<T> {
    slots: RwLock<Vec<Option<T>>>,
}

impl<T: Clone> ChannelCache<T> {
    pub fn new(count: u8) -> Self {
        Self {
            slots: RwLock::new(vec![None; usize::from(count)]),
        }
    }

    pub fn get(&self, channel: Channel) -> Option<T> {
        self.slots.read().get(channel.index()).cloned().flatten()
    }

    pub fn set(&self, channel: Channel, value: T) {
        if let Some(slot) = self.slots.write().get_mut(channel.index()) {
            *slot = Some(value);
        }
    }

    /// Overwrite slots from a bulk read; extra device entries are ignored
    pub fn replace(&self, values: &[T]) {
        let mut slots = self.slots.write();
        for (slot, value) in slots.iter_mut().zip(values) {
            *slot = Some(value.clone());
        }
    }

    pub fn snapshot(&self) -> Vec<Option<T>> {
        self.slots.read().clone()
    }

    /// True once any slot has been filled
    pub fn is_populated(&self) -> bool {
        self.slots.read().iter().any(Option::is_some)
    }
}

/// What every synchronizer needs from its owner
#[derive(Clone)]
pub struct SyncContext {
    pub connection: Arc<ConnectionManager>,
    pub surface: Arc<dyn Surface>,
    pub channels: u8,
}

impl SyncContext {
    /// Bulk-read the settings of every channel
    pub async fn fetch_channels(&self) -> Result<Vec<ChannelSettings>> {
        self.connection.fetch(paths::CHANNELS).await
    }
}

/// Pull one field out of every entry of a bulk channel list
///
/// Fails as a whole if any entry lacks the field, so a partial list never
/// reaches a cache.
pub fn extract_field<T>(
    channels: &[ChannelSettings],
    field: &str,
    extract: impl Fn(&ChannelSettings) -> Option<T>,
) -> Result<Vec<T>> {
    channels
        .iter()
        .enumerate()
        .map(|(i, settings)| {
            extract(settings).ok_or_else(|| {
                GatewayError::Decode(format!("channel {} has no {}", i + 1, field))
            })
        })
        .collect()
}

/// Object-safe part of the synchronizer contract, driven by the orchestrator
#[async_trait]
pub trait Synchronizer: Send + Sync {
    /// Short feature name for logs
    fn name(&self) -> &'static str;

    /// Actions, feedbacks and variables this feature exposes
    fn register_surface(&self) -> SurfaceContribution;

    /// Pull all channels and overwrite the cache; on error the cache is untouched
    async fn refresh(&self) -> Result<()>;

    /// Overwrite the cache from a bulk list someone else already fetched
    fn apply_settings(&self, channels: &[ChannelSettings]) -> Result<()>;

    /// Reserved for tearing down surface registrations (currently nothing to do)
    fn unregister(&self) {}

    /// Run one of this feature's actions with validated options
    async fn handle_action(&self, action_id: &str, options: &ParsedOptions) -> Result<()>;

    /// Evaluate one of this feature's boolean feedbacks
    fn feedback(&self, _feedback_id: &str, _options: &ParsedOptions) -> Option<bool> {
        None
    }

    /// True once a refresh or write has succeeded
    fn is_populated(&self) -> bool;
}

/// Typed per-channel point operations
#[async_trait]
pub trait ChannelPoint: Send + Sync {
    type Value: Clone + Send + Sync + 'static;

    /// Read one channel from the device and store it in the cache
    async fn read_channel(&self, channel: Channel) -> Result<Self::Value>;

    /// Write one channel; cache and surface change only on a confirmed 200
    async fn write_channel(&self, channel: Channel, value: Self::Value) -> Result<()>;

    /// Cached value without touching the device
    fn cached(&self, channel: Channel) -> Option<Self::Value>;
}

/// Flag marking a synchronizer refresh as running
#[derive(Debug, Clone, Default)]
pub struct InFlight(Arc<AtomicBool>);

impl InFlight {
    /// Claim the flag, or `None` if a refresh is already running
    pub fn try_begin(&self) -> Option<InFlightGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard(Arc::clone(&self.0)))
    }

    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Releases the in-flight flag when dropped
#[derive(Debug)]
pub struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
