//! Connection manager: heartbeat loop and connected/disconnected gate
//!
//! Every device call goes through [`ConnectionManager::request`], which refuses
//! to touch the transport unless the last heartbeat probe reported the device
//! ready. The gate only changes state from the heartbeat probe (or `close`).

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::transport::{DeviceResponse, Transport, Verb};
use crate::error::{GatewayError, Result};

/// Path prefix of the amplifier REST API
pub const API_PREFIX: &str = "/rest-api";

/// Health endpoint polled by the heartbeat
pub const HEALTH_PATH: &str = "/status/system";

/// Connection state as seen by the rest of the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Closed, or never opened
    Disconnected,
    /// Opened, no probe has answered yet
    Connecting,
    /// Last probe answered 200 with `ready == true`
    Connected,
    /// Last probe failed for any reason
    Failed,
}

/// Callback fired whenever the connection state changes
pub type StatusCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Where the device lives and how to authenticate
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    pub base_url: String,
    pub token: String,
}

impl Credentials {
    /// Build credentials for a host (`ip` or `ip:port`)
    pub fn for_host(host: &str, token: impl Into<String>) -> Self {
        Self {
            base_url: format!("http://{}{}", host, API_PREFIX),
            token: token.into(),
        }
    }
}

/// State shared between the manager and its heartbeat task
struct Shared {
    transport: Arc<dyn Transport>,
    credentials: RwLock<Credentials>,
    state: RwLock<ConnectionState>,
    /// Bumped on every open/close so stale probes can be discarded
    generation: AtomicU64,
    status_callbacks: RwLock<Vec<StatusCallback>>,
}

impl Shared {
    fn set_state(&self, generation: u64, next: ConnectionState) {
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("Discarding probe result from a closed heartbeat loop");
            return;
        }
        let changed = {
            let mut state = self.state.write();
            let changed = *state != next;
            *state = next;
            changed
        };
        if changed {
            for callback in self.status_callbacks.read().iter() {
                callback(next);
            }
        }
    }

    async fn probe(&self, generation: u64) -> ConnectionState {
        let credentials = self.credentials.read().clone();
        let url = format!("{}{}", credentials.base_url, HEALTH_PATH);

        debug!("PING {}", url);
        let next = match self
            .transport
            .send(Verb::Get, &url, &credentials.token, None)
            .await
        {
            Ok(response) if !response.is_ok() => {
                error!("Connection error: device returned HTTP {}", response.status);
                ConnectionState::Failed
            },
            Ok(response) => match response.body.get("ready") {
                Some(Value::Bool(true)) => {
                    debug!("PONG");
                    ConnectionState::Connected
                },
                other => {
                    error!("Device not ready: {:?}", other);
                    ConnectionState::Failed
                },
            },
            Err(e) => {
                error!("Connection error: {}", e);
                ConnectionState::Failed
            },
        };

        self.set_state(generation, next);
        next
    }
}

/// Owns device URL + token, runs the heartbeat, and gates all I/O
pub struct ConnectionManager {
    shared: Arc<Shared>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    probe_interval: Mutex<Duration>,
}

impl ConnectionManager {
    /// Create a manager in the `Disconnected` state
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                credentials: RwLock::new(Credentials::default()),
                state: RwLock::new(ConnectionState::Disconnected),
                generation: AtomicU64::new(0),
                status_callbacks: RwLock::new(Vec::new()),
            }),
            heartbeat: Mutex::new(None),
            probe_interval: Mutex::new(Duration::ZERO),
        }
    }

    /// Manager with credentials set but no heartbeat; drive it with `probe_now`
    #[cfg(test)]
    pub(crate) fn with_credentials(transport: Arc<dyn Transport>, credentials: Credentials) -> Self {
        let manager = Self::new(transport);
        *manager.shared.credentials.write() = credentials;
        manager
    }

    /// Register a callback for state changes
    pub fn subscribe_status(&self, callback: StatusCallback) {
        self.shared.status_callbacks.write().push(callback);
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    /// Cheap synchronous gate check
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Current credentials
    pub fn credentials(&self) -> Credentials {
        self.shared.credentials.read().clone()
    }

    /// Start probing `credentials` every `probe_interval`
    ///
    /// The state becomes `Connecting` immediately. Reopening an open manager
    /// replaces the previous heartbeat loop.
    pub fn open(&self, credentials: Credentials, probe_interval: Duration) {
        self.stop_heartbeat();

        info!("🔌 Opening device connection to {}", credentials.base_url);
        *self.shared.credentials.write() = credentials;
        *self.probe_interval.lock() = probe_interval;
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.set_state(generation, ConnectionState::Connecting);

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(probe_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if shared.generation.load(Ordering::SeqCst) != generation {
                    break;
                }
                shared.probe(generation).await;
            }
        });
        *self.heartbeat.lock() = Some(handle);
    }

    /// Cancel the heartbeat and force `Disconnected`. Idempotent.
    pub fn close(&self) {
        let was_running = self.stop_heartbeat();
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared
            .set_state(generation, ConnectionState::Disconnected);
        if was_running {
            info!("Device connection closed");
        }
    }

    /// Swap credentials or probe interval at runtime, restarting the
    /// heartbeat if either changed
    ///
    /// Requests already in flight keep using the old credentials.
    pub fn reconfigure(&self, credentials: Credentials, probe_interval: Duration) {
        let running = self.heartbeat.lock().is_some();
        let same_interval = *self.probe_interval.lock() == probe_interval;
        if running && same_interval && self.credentials() == credentials {
            debug!("Device credentials unchanged, keeping heartbeat");
            return;
        }
        info!(
            "🔄 Device connection settings changed, restarting heartbeat every {:?}",
            probe_interval
        );
        self.close();
        self.open(credentials, probe_interval);
    }

    /// Run one heartbeat probe right now and return the resulting state
    ///
    /// A closed manager stays `Disconnected` and is not probed.
    #[cfg(test)]
    pub(crate) async fn probe_now(&self) -> ConnectionState {
        let generation = self.shared.generation.load(Ordering::SeqCst);
        if generation > 0 && self.state() == ConnectionState::Disconnected {
            debug!("Connection closed, not probing");
            return ConnectionState::Disconnected;
        }
        self.shared.probe(generation).await
    }

    /// Issue a gated call and return the raw status/body
    pub async fn request(
        &self,
        verb: Verb,
        path: &str,
        body: Option<&Value>,
    ) -> Result<DeviceResponse> {
        if !self.is_connected() {
            warn!("Not connected, refusing {:?} {}", verb, path);
            return Err(GatewayError::NotConnected);
        }
        let credentials = self.credentials();
        let url = format!("{}{}", credentials.base_url, path);
        self.shared
            .transport
            .send(verb, &url, &credentials.token, body)
            .await
    }

    /// GET `path` and decode a 200 body into `T`
    pub async fn fetch<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(Verb::Get, path, None).await?.decode()
    }

    /// PUT `body` to `path`, succeeding only on 200
    pub async fn store(&self, path: &str, body: &Value) -> Result<()> {
        self.request(Verb::Put, path, Some(body)).await?.into_ok()?;
        Ok(())
    }

    fn stop_heartbeat(&self) -> bool {
        match self.heartbeat.lock().take() {
            Some(handle) => {
                handle.abort();
                true
            },
            None => false,
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.stop_heartbeat();
    }
}
