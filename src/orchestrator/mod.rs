//! Synchronization orchestrator
//!
//! Owns the connection manager and the active synchronizers of one device
//! session:
//! - builds the synchronizers in a fixed order and registers their merged
//!   surface catalog once
//! - dispatches actions and feedbacks by id, validating options at the door
//! - runs the metering timer that refreshes every synchronizer
//! - forwards device-wide reads (version, device info)
//! - reacts to configuration changes and tears everything down

#[cfg(test)]
mod tests;

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::device::{
    paths, ChannelSettings, ConnectionManager, ConnectionState, DeviceInfo, HttpTransport,
    Transport, VersionInfo,
};
use crate::error::{GatewayError, Result};
use crate::surface::{parse_options, OptionField, OptionValues, Surface, SurfaceContribution};
use crate::sync::{
    mute, power, volume, AutoStandbyPoint, DelayPoint, InFlight, SyncContext, Synchronizer,
};

/// A synchronizer plus its refresh guard
struct Registered {
    sync: Arc<dyn Synchronizer>,
    in_flight: InFlight,
}

/// Where an action or feedback id is handled
struct Route {
    point: usize,
    options: Vec<OptionField>,
}

/// Outcome of one refresh tick
#[derive(Debug)]
pub enum TickReport {
    /// Device not connected; nothing was refreshed
    Skipped(ConnectionState),
    Ran {
        refreshed: Vec<&'static str>,
        /// Still running from an earlier tick
        busy: Vec<&'static str>,
        failed: Vec<(&'static str, GatewayError)>,
    },
}

/// Result of applying a new configuration to a running session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigChange {
    Unchanged,
    Applied,
    /// Model, feature set or transport changed; build a new session
    RequiresRebuild,
}

pub struct Orchestrator {
    connection: Arc<ConnectionManager>,
    points: Vec<Registered>,
    actions: HashMap<String, Route>,
    feedbacks: HashMap<String, Route>,
    definitions: SurfaceContribution,
    config: RwLock<AppConfig>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Build a session talking HTTP to the configured device
    pub fn new(config: AppConfig, surface: Arc<dyn Surface>) -> anyhow::Result<Arc<Self>> {
        let transport: Arc<dyn Transport> =
            Arc::new(HttpTransport::new(config.device.request_timeout())?);
        Ok(Self::with_transport(config, transport, surface))
    }

    /// Build a session over an arbitrary transport
    pub fn with_transport(
        config: AppConfig,
        transport: Arc<dyn Transport>,
        surface: Arc<dyn Surface>,
    ) -> Arc<Self> {
        let connection = Arc::new(ConnectionManager::new(transport));
        Self::with_connection(config, connection, surface)
    }

    /// Build a session around an existing connection manager
    pub fn with_connection(
        config: AppConfig,
        connection: Arc<ConnectionManager>,
        surface: Arc<dyn Surface>,
    ) -> Arc<Self> {
        let ctx = SyncContext {
            connection: Arc::clone(&connection),
            surface: Arc::clone(&surface),
            channels: config.channels(),
        };

        let mut synchronizers: Vec<Arc<dyn Synchronizer>> = vec![
            Arc::new(mute::new(ctx.clone())),
            Arc::new(power::new(ctx.clone())),
            Arc::new(AutoStandbyPoint::new(ctx.clone())),
            Arc::new(volume::new(ctx.clone())),
        ];
        if config.features.delay {
            synchronizers.push(Arc::new(DelayPoint::new(ctx)));
        }

        let mut definitions = SurfaceContribution::default();
        let mut actions = HashMap::new();
        let mut feedbacks = HashMap::new();
        for (index, sync) in synchronizers.iter().enumerate() {
            let contribution = sync.register_surface();
            for action in &contribution.actions {
                let route = Route {
                    point: index,
                    options: action.options.clone(),
                };
                if actions.insert(action.id.clone(), route).is_some() {
                    warn!("Action '{}' registered twice, last one wins", action.id);
                }
            }
            for feedback in &contribution.feedbacks {
                let route = Route {
                    point: index,
                    options: feedback.options.clone(),
                };
                if feedbacks.insert(feedback.id.clone(), route).is_some() {
                    warn!("Feedback '{}' registered twice, last one wins", feedback.id);
                }
            }
            definitions.merge(contribution);
        }
        surface.set_definitions(&definitions);

        let status_surface = Arc::clone(&surface);
        connection.subscribe_status(Arc::new(move |state| {
            match state {
                ConnectionState::Connected => info!("✅ Device connected"),
                ConnectionState::Failed => warn!("Device connection failed"),
                other => debug!("Device connection: {:?}", other),
            }
            status_surface.update_status(state);
        }));
        surface.update_status(connection.state());

        info!(
            "Session ready: {} ({} channels), {} synchronizers",
            config.device.amp_type.label(),
            config.channels(),
            synchronizers.len()
        );

        let points = synchronizers
            .into_iter()
            .map(|sync| Registered {
                sync,
                in_flight: InFlight::default(),
            })
            .collect();

        Arc::new(Self {
            connection,
            points,
            actions,
            feedbacks,
            definitions,
            config: RwLock::new(config),
            timer: Mutex::new(None),
        })
    }

    /// Open the device connection and start metering if enabled
    pub fn start(self: &Arc<Self>) {
        let device = self.config.read().device.clone();
        self.connection
            .open(device.credentials(), device.probe_interval());
        self.start_metering();
    }

    /// (Re)start the refresh timer according to the metering config
    pub fn start_metering(self: &Arc<Self>) {
        let metering = self.config.read().metering.clone();
        self.stop_metering();
        if !metering.enabled {
            info!("Metering disabled");
            return;
        }

        let interval = metering.interval();
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(refresh_loop(weak, interval));
        *self.timer.lock() = Some(handle);
        info!("Metering every {} ms", metering.interval_ms);
    }

    /// Cancel the refresh timer; in-flight refreshes finish on their own
    pub fn stop_metering(&self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
            debug!("Metering timer stopped");
        }
    }

    pub fn is_metering(&self) -> bool {
        self.timer.lock().is_some()
    }

    /// Refresh every synchronizer once, unless the device is not connected
    ///
    /// One bulk read of the channel list feeds every synchronizer, in
    /// registration order. A synchronizer still held by an earlier tick is
    /// skipped; if the bulk read fails, every claimed synchronizer fails with
    /// it and keeps its cache.
    pub async fn tick(&self) -> TickReport {
        let state = self.connection.state();
        if state != ConnectionState::Connected {
            debug!("Refresh tick skipped: device {:?}", state);
            return TickReport::Skipped(state);
        }
        debug!("Refresh tick");

        let mut busy = Vec::new();
        let mut claimed = Vec::new();
        for point in &self.points {
            match point.in_flight.try_begin() {
                Some(guard) => claimed.push((point, guard)),
                None => {
                    debug!("{} refresh still running, skipping", point.sync.name());
                    busy.push(point.sync.name());
                },
            }
        }

        let mut refreshed = Vec::new();
        let mut failed = Vec::new();
        if !claimed.is_empty() {
            match self.connection.fetch::<Vec<ChannelSettings>>(paths::CHANNELS).await {
                Ok(channels) => {
                    for (point, _guard) in &claimed {
                        let name = point.sync.name();
                        match point.sync.apply_settings(&channels) {
                            Ok(()) => refreshed.push(name),
                            Err(e) => {
                                warn!("{} refresh failed: {}", name, e);
                                failed.push((name, e));
                            },
                        }
                    }
                },
                Err(e) => {
                    warn!("Channel refresh failed: {}", e);
                    failed.extend(claimed.iter().map(|(point, _)| (point.sync.name(), e.clone())));
                },
            }
        }
        debug!(
            "Refresh tick done: {} ok, {} failed, {} busy",
            refreshed.len(),
            failed.len(),
            busy.len()
        );

        TickReport::Ran {
            refreshed,
            busy,
            failed,
        }
    }

    /// Validate and run an action
    pub async fn handle_action(&self, action_id: &str, raw: &OptionValues) -> Result<()> {
        let result = self.dispatch_action(action_id, raw).await;
        match &result {
            Err(e) if e.is_local() => warn!("Action '{}' rejected: {}", action_id, e),
            Err(e) => error!("Action '{}' failed: {}", action_id, e),
            Ok(()) => {},
        }
        result
    }

    async fn dispatch_action(&self, action_id: &str, raw: &OptionValues) -> Result<()> {
        let route = self
            .actions
            .get(action_id)
            .ok_or_else(|| GatewayError::UnknownAction(action_id.to_string()))?;
        let options = parse_options(&route.options, raw)?;
        self.points[route.point]
            .sync
            .handle_action(action_id, &options)
            .await
    }

    /// Evaluate a boolean feedback from cached state
    pub fn check_feedback(&self, feedback_id: &str, raw: &OptionValues) -> Result<bool> {
        let route = self
            .feedbacks
            .get(feedback_id)
            .ok_or_else(|| GatewayError::UnknownFeedback(feedback_id.to_string()))?;
        let options = parse_options(&route.options, raw)?;
        Ok(self.points[route.point]
            .sync
            .feedback(feedback_id, &options)
            .unwrap_or(false))
    }

    /// Firmware version, read straight from the device
    pub async fn version(&self) -> Result<VersionInfo> {
        self.connection.fetch(paths::VERSION).await
    }

    /// Device description, read straight from the device
    pub async fn device_info(&self) -> Result<DeviceInfo> {
        self.connection.fetch(paths::DEVICE_INFO).await
    }

    /// Apply a reloaded configuration
    pub fn update_config(self: &Arc<Self>, next: AppConfig) -> ConfigChange {
        let previous = self.config.read().clone();
        if previous == next {
            return ConfigChange::Unchanged;
        }
        if previous.device.amp_type != next.device.amp_type
            || previous.features != next.features
            || previous.device.request_timeout_ms != next.device.request_timeout_ms
        {
            info!("Device model, features or transport changed, session must be rebuilt");
            return ConfigChange::RequiresRebuild;
        }

        *self.config.write() = next.clone();

        if previous.device.credentials() != next.device.credentials()
            || previous.device.probe_interval_ms != next.device.probe_interval_ms
        {
            self.connection
                .reconfigure(next.device.credentials(), next.device.probe_interval());
        }
        if previous.metering != next.metering {
            self.start_metering();
        }
        ConfigChange::Applied
    }

    /// Unregister synchronizers, cancel the timer and close the connection
    pub fn shutdown(&self) {
        info!("Shutting down device session...");
        for point in &self.points {
            point.sync.unregister();
        }
        self.stop_metering();
        self.connection.close();
        info!("✅ Device session stopped");
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Merged catalog registered with the surface
    pub fn definitions(&self) -> &SurfaceContribution {
        &self.definitions
    }

    /// Active synchronizers in registration order
    pub fn synchronizer_names(&self) -> Vec<&'static str> {
        self.points.iter().map(|p| p.sync.name()).collect()
    }

    pub fn config(&self) -> AppConfig {
        self.config.read().clone()
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.stop_metering();
    }
}

/// Fire a tick every `interval` while the session is alive
///
/// Each tick runs on its own task so a slow device never delays the timer.
async fn refresh_loop(session: Weak<Orchestrator>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(session) = session.upgrade() else {
            break;
        };
        tokio::spawn(async move {
            session.tick().await;
        });
    }
}
