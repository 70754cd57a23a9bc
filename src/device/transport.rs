//! Verb-level transport to the amplifier REST API
//!
//! The connection manager only needs "send verb + path + optional JSON body,
//! get back status + JSON body". [`HttpTransport`] implements that with reqwest.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::trace;

use crate::error::{GatewayError, Result};

/// HTTP verbs the device API understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Post,
    Put,
    Delete,
    Options,
}

impl Verb {
    fn as_method(self) -> reqwest::Method {
        match self {
            Verb::Get => reqwest::Method::GET,
            Verb::Post => reqwest::Method::POST,
            Verb::Put => reqwest::Method::PUT,
            Verb::Delete => reqwest::Method::DELETE,
            Verb::Options => reqwest::Method::OPTIONS,
        }
    }
}

/// Raw status + JSON body of a device call
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceResponse {
    pub status: u16,
    pub body: Value,
}

impl DeviceResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    /// Body of a 200 response, or an HTTP error carrying the status
    pub fn into_ok(self) -> Result<Value> {
        if self.is_ok() {
            Ok(self.body)
        } else {
            Err(GatewayError::Http {
                status: self.status,
            })
        }
    }

    /// Decode the body of a 200 response into `T`
    pub fn decode<T: DeserializeOwned>(self) -> Result<T> {
        let body = self.into_ok()?;
        Ok(serde_json::from_value(body)?)
    }
}

/// Something that can carry a device call
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue one call. `url` is absolute; `token` goes in the `token` header.
    async fn send(
        &self,
        verb: Verb,
        url: &str,
        token: &str,
        body: Option<&Value>,
    ) -> Result<DeviceResponse>;
}

/// reqwest-backed transport
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport whose calls give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        verb: Verb,
        url: &str,
        token: &str,
        body: Option<&Value>,
    ) -> Result<DeviceResponse> {
        trace!("{:?} {}", verb, url);

        let mut request = self
            .client
            .request(verb.as_method(), url)
            .header("token", token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Transport(format!("timeout calling {}", url))
            } else if e.is_connect() {
                GatewayError::Transport(format!("connection failed to {}", url))
            } else {
                GatewayError::Transport(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let body = if bytes.is_empty() {
            Value::Null
        } else {
            match serde_json::from_slice(&bytes) {
                Ok(value) => value,
                // Error pages are often plain text; only a 200 must be JSON
                Err(_) if status != 200 => Value::Null,
                Err(e) => return Err(GatewayError::Decode(e.to_string())),
            }
        };

        Ok(DeviceResponse { status, body })
    }
}
