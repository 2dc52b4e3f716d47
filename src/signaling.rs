//! Signaling wire: JSON over HTTP POST to `/sdp` and `/candidate`.
//!
//! Inbound signals are acknowledged before they are handled. A session sends
//! its answer and candidates while holding its negotiation lock, so the
//! receiving side must never make the sender wait on its own handling.

use crate::error::{CallError, Result};
use crate::peer::types::{CandidateSignal, SessionDescriptionSignal};
use crate::registry::PeerRegistry;
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound half of the signaling channel.
#[async_trait]
pub trait SignalTransport: Send + Sync {
    async fn send_description(&self, to: &str, signal: &SessionDescriptionSignal) -> Result<()>;
    async fn send_candidate(&self, to: &str, signal: &CandidateSignal) -> Result<()>;
}

// ========== HTTP CLIENT ==========

pub struct HttpSignaling {
    client: reqwest::Client,
}

impl HttpSignaling {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!("falling back to default http client: {}", e);
                reqwest::Client::new()
            });
        Self { client }
    }

    async fn post<T>(&self, to: &str, path: &str, body: &T) -> Result<()>
    where
        T: serde::Serialize + ?Sized,
    {
        let url = format!("http://{}/{}", to, path);
        debug!(%url, "sending signal");
        self.client
            .post(&url)
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

impl Default for HttpSignaling {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalTransport for HttpSignaling {
    async fn send_description(&self, to: &str, signal: &SessionDescriptionSignal) -> Result<()> {
        self.post(to, "sdp", signal).await
    }

    async fn send_candidate(&self, to: &str, signal: &CandidateSignal) -> Result<()> {
        self.post(to, "candidate", signal).await
    }
}

// ========== HTTP SERVER ==========

pub fn router(registry: PeerRegistry) -> Router {
    Router::new()
        .route("/sdp", post(handle_sdp))
        .route("/candidate", post(handle_candidate))
        .with_state(registry)
}

pub async fn bind(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| CallError::TransportFailure(format!("unable to listen on {}: {}", addr, e)))
}

pub async fn serve(listener: TcpListener, registry: PeerRegistry) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("listening for signals on http://{}", addr);
    }
    axum::serve(listener, router(registry))
        .await
        .map_err(|e| CallError::TransportFailure(format!("signaling server failed: {}", e)))
}

async fn handle_sdp(State(registry): State<PeerRegistry>, body: Bytes) -> StatusCode {
    let Some(signal) = decode::<SessionDescriptionSignal>(&body, "signal message") else {
        return StatusCode::OK;
    };
    debug!(origin = %signal.origin, action = ?signal.action, "description received");
    tokio::spawn(async move { registry.handle_description(signal).await });
    StatusCode::OK
}

async fn handle_candidate(State(registry): State<PeerRegistry>, body: Bytes) -> StatusCode {
    let Some(signal) = decode::<CandidateSignal>(&body, "candidate") else {
        return StatusCode::OK;
    };
    tokio::spawn(async move { registry.handle_candidate(signal).await });
    StatusCode::OK
}

fn decode<T: DeserializeOwned>(body: &[u8], what: &str) -> Option<T> {
    match serde_json::from_slice(body) {
        Ok(signal) => Some(signal),
        Err(e) => {
            warn!("couldn't parse {} from json: {}", what, CallError::from(e));
            None
        }
    }
}
