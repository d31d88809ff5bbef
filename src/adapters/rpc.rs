//! Shared JSON-RPC transport helper used by each chain adapter.
//!
//! Node connectivity itself is an external collaborator the core only
//! specifies at its contract boundary; this wraps a [`reqwest::Client`]
//! pointed at a caller-supplied endpoint so every adapter talks to it the
//! same way, the way the lendaswap backend client wrapped `reqwest`.

use crate::error::{Error, NetworkError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Clone)]
pub struct RpcTransport {
    http: reqwest::Client,
    endpoint: String,
}

impl RpcTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.endpoint, path);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Network(NetworkError::Generic(e.to_string())))?;
        if !resp.status().is_success() {
            return Err(Error::Network(NetworkError::Rpc(format!(
                "{} returned {}",
                url,
                resp.status()
            ))));
        }
        resp.json()
            .await
            .map_err(|e| Error::Network(NetworkError::Generic(e.to_string())))
    }

    pub async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = format!("{}{}", self.endpoint, path);
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Network(NetworkError::Generic(e.to_string())))?;
        if !resp.status().is_success() {
            return Err(Error::Network(NetworkError::Rpc(format!(
                "{} returned {}",
                url,
                resp.status()
            ))));
        }
        resp.json()
            .await
            .map_err(|e| Error::Network(NetworkError::Generic(e.to_string())))
    }
}
