use crate::error::{CallError, Result};
use crate::peer::types::ServerConfig;
use crate::utils::add_ice_url_scheme;
use tracing::info;
use webrtc::ice_transport::ice_server::RTCIceServer;

/// Candidate bookkeeping for one session.
///
/// Local candidates are held back until the remote knows this session exists
/// (its description has been applied here). Remote candidates that race ahead of
/// the remote description are held back too, since the transport rejects them
/// before then.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    remote_description_set: bool,
    local_pending: Vec<String>,
    remote_pending: Vec<String>,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    /// Returns the candidate back if it may be signaled right away.
    pub fn push_local(&mut self, candidate: String) -> Option<String> {
        if self.remote_description_set {
            Some(candidate)
        } else {
            self.local_pending.push(candidate);
            None
        }
    }

    /// Returns the candidate back if it may be applied right away.
    pub fn push_remote(&mut self, candidate: String) -> Option<String> {
        if self.remote_description_set {
            Some(candidate)
        } else {
            self.remote_pending.push(candidate);
            None
        }
    }

    /// Marks the remote description as applied and drains both buffers, in
    /// discovery order. Only the first call returns anything.
    pub fn mark_remote_set(&mut self) -> PendingCandidates {
        if self.remote_description_set {
            return PendingCandidates::default();
        }
        self.remote_description_set = true;
        PendingCandidates {
            local: std::mem::take(&mut self.local_pending),
            remote: std::mem::take(&mut self.remote_pending),
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PendingCandidates {
    pub local: Vec<String>,
    pub remote: Vec<String>,
}

/// Checks the servers given on the command line, TURN needs credentials
pub fn validate_ice_servers(servers: &[ServerConfig]) -> Result<()> {
    for server in servers {
        if server.url.is_empty() {
            return Err(CallError::Config("ICE server URL cannot be empty".into()));
        }

        if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none()) {
            return Err(CallError::Config(format!(
                "TURN server {} requires username and credential",
                server.url
            )));
        }
    }
    Ok(())
}

/// Converts configured servers into the webrtc representation.
/// No servers means host candidates only, which is enough on a LAN.
pub fn rtc_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    if !servers.is_empty() {
        info!(count = servers.len(), "using configured ICE servers");
    }
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}
