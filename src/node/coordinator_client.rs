//! HTTP client for the coordinator API
//!
//! Used by application nodes (load reports, peer discovery, log forwarding)
//! and by the operator CLI.

use crate::common::error::ErrorBody;
use crate::common::{ClientId, Error, FleetEvent, NodeId, Result, SyncMode};
use crate::coordinator::http::{
    AddClientRequest, ClientRoute, LeastLoaded, LogRequest, RegisterRequest,
    SyncRequest, UpdateLoadRequest,
};
use crate::replication::{ReplicationReport, Snapshot};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Clone)]
pub struct CoordinatorClient {
    http: reqwest::Client,
    base_url: String,
}

impl CoordinatorClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// RegisterNode: returns once the worker has been started and added
    pub async fn register(&self, endpoint: &NodeId, load: u32) -> Result<()> {
        let resp = self
            .http
            .post(self.url("/nodes"))
            .json(&RegisterRequest {
                endpoint: endpoint.clone(),
                load,
            })
            .send()
            .await?;
        expect_ok(resp).await
    }

    pub async fn update_load(&self, endpoint: &NodeId, load: u32) -> Result<()> {
        let resp = self
            .http
            .put(self.url(&format!("/nodes/{}/load", endpoint)))
            .json(&UpdateLoadRequest { load })
            .send()
            .await?;
        expect_ok(resp).await
    }

    /// `None` when the fleet is empty
    pub async fn least_loaded(&self) -> Result<Option<NodeId>> {
        let resp = self.http.get(self.url("/nodes/least-loaded")).send().await?;
        match decode::<LeastLoaded>(resp).await {
            Ok(found) => Ok(Some(found.endpoint)),
            Err(Error::NoneAvailable) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn loads(&self) -> Result<BTreeMap<NodeId, u32>> {
        let resp = self.http.get(self.url("/nodes")).send().await?;
        decode(resp).await
    }

    pub async fn add_client(&self, client: &ClientId, endpoint: &NodeId) -> Result<()> {
        let resp = self
            .http
            .post(self.url("/clients"))
            .json(&AddClientRequest {
                client: client.clone(),
                endpoint: endpoint.clone(),
            })
            .send()
            .await?;
        expect_ok(resp).await
    }

    pub async fn remove_client(&self, client: &ClientId) -> Result<()> {
        let resp = self
            .http
            .delete(self.url(&format!("/clients/{}", client)))
            .send()
            .await?;
        expect_ok(resp).await
    }

    pub async fn client_of(&self, client: &ClientId) -> Result<NodeId> {
        let resp = self
            .http
            .get(self.url(&format!("/clients/{}", client)))
            .send()
            .await?;
        let route: ClientRoute = decode(resp).await?;
        Ok(route.endpoint)
    }

    /// SyncState: the coordinator relays `snapshot` to every other member
    pub async fn sync(
        &self,
        origin: &NodeId,
        snapshot: &Snapshot,
        mode: SyncMode,
    ) -> Result<ReplicationReport> {
        let resp = self
            .http
            .post(self.url("/sync"))
            .json(&SyncRequest {
                origin: origin.clone(),
                snapshot: snapshot.clone(),
                mode,
            })
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn log(&self, origin: Option<&NodeId>, message: &str) -> Result<()> {
        let resp = self
            .http
            .post(self.url("/log"))
            .json(&LogRequest {
                origin: origin.cloned(),
                message: message.to_string(),
            })
            .send()
            .await?;
        expect_ok(resp).await
    }

    pub async fn events(&self, limit: usize) -> Result<Vec<FleetEvent>> {
        let resp = self
            .http
            .get(self.url(&format!("/admin/events?limit={}", limit)))
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn health(&self) -> Result<serde_json::Value> {
        let resp = self.http.get(self.url("/health")).send().await?;
        decode(resp).await
    }
}

async fn expect_ok(resp: reqwest::Response) -> Result<()> {
    if resp.status().is_success() {
        Ok(())
    } else {
        Err(error_from_response(resp).await)
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    if resp.status().is_success() {
        Ok(resp.json::<T>().await?)
    } else {
        Err(error_from_response(resp).await)
    }
}

/// Rebuild a typed error from the coordinator's JSON error body
async fn error_from_response(resp: reqwest::Response) -> Error {
    let status = resp.status();
    match resp.json::<ErrorBody>().await {
        Ok(body) => match body.kind.as_str() {
            "not_registered" => Error::NotRegistered(body.error),
            "not_found" => Error::NotFound(body.error),
            "none_available" => Error::NoneAvailable,
            "timeout" | "lock_timeout" => Error::Timeout(body.error),
            _ => Error::Http(format!("{}: {}", status, body.error)),
        },
        Err(_) => Error::Http(format!("coordinator returned {}", status)),
    }
}
