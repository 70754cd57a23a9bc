//! Test helpers: scripted transport and connected contexts

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::device::connection::{API_PREFIX, HEALTH_PATH};
use crate::device::{ConnectionManager, Credentials, DeviceResponse, Transport, Verb};
use crate::error::{GatewayError, Result};
use crate::surface::LocalSurface;
use crate::sync::SyncContext;

pub const TEST_HOST: &str = "amp.test";
pub const TEST_TOKEN: &str = "token";

#[derive(Debug, Clone)]
enum Reply {
    Respond(u16, Value),
    Fail,
}

/// One call seen by the mock
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub verb: Verb,
    pub path: String,
    pub token: String,
    pub body: Option<Value>,
}

/// Transport answering from a script; unscripted calls get a 404
#[derive(Default)]
pub struct MockTransport {
    replies: Mutex<HashMap<(Verb, String), Reply>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, verb: Verb, path: &str, status: u16, body: Value) {
        self.replies
            .lock()
            .insert((verb, path.to_string()), Reply::Respond(status, body));
    }

    pub fn fail(&self, verb: Verb, path: &str) {
        self.replies
            .lock()
            .insert((verb, path.to_string()), Reply::Fail);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls_to(&self, verb: Verb, path: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.verb == verb && c.path == path)
            .count()
    }

    /// Calls other than heartbeat probes
    pub fn device_calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.path != HEALTH_PATH)
            .cloned()
            .collect()
    }

    pub fn last_token(&self) -> Option<String> {
        self.calls.lock().last().map(|c| c.token.clone())
    }

    pub fn last_body(&self, verb: Verb, path: &str) -> Option<Value> {
        self.calls
            .lock()
            .iter()
            .rev()
            .find(|c| c.verb == verb && c.path == path)
            .and_then(|c| c.body.clone())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        verb: Verb,
        url: &str,
        token: &str,
        body: Option<&Value>,
    ) -> Result<DeviceResponse> {
        let path = url
            .split_once(API_PREFIX)
            .map(|(_, path)| path)
            .unwrap_or(url)
            .to_string();
        self.calls.lock().push(RecordedCall {
            verb,
            path: path.clone(),
            token: token.to_string(),
            body: body.cloned(),
        });

        let reply = self.replies.lock().get(&(verb, path)).cloned();
        match reply {
            Some(Reply::Respond(status, body)) => Ok(DeviceResponse::new(status, body)),
            Some(Reply::Fail) => Err(GatewayError::Transport("connection refused".to_string())),
            None => Ok(DeviceResponse::new(404, Value::Null)),
        }
    }
}

/// Manager whose gate is open (one ready probe, no heartbeat loop)
pub async fn connected_manager(transport: &Arc<MockTransport>) -> Arc<ConnectionManager> {
    transport.respond(Verb::Get, HEALTH_PATH, 200, json!({ "ready": true }));
    let manager = ConnectionManager::with_credentials(
        transport.clone(),
        Credentials::for_host(TEST_HOST, TEST_TOKEN),
    );
    manager.probe_now().await;
    Arc::new(manager)
}

/// Connected synchronizer context backed by a local surface
pub async fn sync_context(
    transport: &Arc<MockTransport>,
    channels: u8,
) -> (SyncContext, Arc<LocalSurface>) {
    let surface = Arc::new(LocalSurface::new());
    let ctx = SyncContext {
        connection: connected_manager(transport).await,
        surface: surface.clone(),
        channels,
    };
    (ctx, surface)
}

/// One bulk channel entry in the device's shape
pub fn channel_entry(mute: bool, power: bool, volume: f64) -> Value {
    json!({
        "ampenable": { "value": power },
        "dsp": {
            "mute": { "value": mute },
            "volume": { "value": volume },
            "delay": {
                "type": "ms",
                "delay_samples": 96.0,
                "delay_ms": 2.0,
                "delay_m": 0.69,
                "temperature": 21.0
            }
        },
        "autostandby": { "enable": false, "threshold": -60.0, "timeout": 600.0 }
    })
}
