//! Table of live sessions keyed by remote address.
//!
//! The registry is the only place sessions are created or looked up. Every
//! create and every lookup-then-create happens under the table lock, so two
//! concurrent dials, or a dial racing an incoming offer, never leave two
//! sessions registered for the same remote.

use crate::config::Config;
use crate::error::{CallError, Result};
use crate::logger::{CallEvent, EventBus};
use crate::media::{FileMedia, MediaFactory, MediaTiming};
use crate::peer::connection::RtcPeerFactory;
use crate::peer::state::Role;
use crate::peer::transport::PeerSessionFactory;
use crate::peer::types::{CandidateSignal, ConnectionMode, SessionDescriptionSignal, SignalAction};
use crate::session::{Negotiation, Session};
use crate::signaling::{self, HttpSignaling, SignalTransport};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 256;

/// Everything a session needs from the process that owns it.
pub struct SessionContext {
    pub local_addr: String,
    pub peers: Arc<dyn PeerSessionFactory>,
    pub signaling: Arc<dyn SignalTransport>,
    pub media: Arc<dyn MediaFactory>,
    pub timing: MediaTiming,
    pub events: EventBus,
    pub table: SessionTable,
}

#[derive(Default)]
pub struct SessionTable {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionTable {
    pub(crate) async fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.lock().await
    }

    /// Removes `session` if it is still the one registered for its remote.
    pub(crate) async fn remove(&self, session: &Session) -> bool {
        let mut sessions = self.sessions.lock().await;
        let registered = sessions
            .get(session.remote())
            .is_some_and(|s| std::ptr::eq(Arc::as_ptr(s), session));
        if registered {
            sessions.remove(session.remote());
            debug!("{} removed from registry", session.remote());
        }
        registered
    }
}

#[derive(Clone)]
pub struct PeerRegistry {
    ctx: Arc<SessionContext>,
}

impl PeerRegistry {
    pub fn new(
        local_addr: impl Into<String>,
        peers: Arc<dyn PeerSessionFactory>,
        signaling: Arc<dyn SignalTransport>,
        media: Arc<dyn MediaFactory>,
        timing: MediaTiming,
    ) -> Self {
        Self {
            ctx: Arc::new(SessionContext {
                local_addr: local_addr.into(),
                peers,
                signaling,
                media,
                timing,
                events: EventBus::new(EVENT_CAPACITY),
                table: SessionTable::default(),
            }),
        }
    }

    /// Registry backed by WebRTC peers, HTTP signaling and Ogg files.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.listen.clone(),
            Arc::new(RtcPeerFactory::new(config.ice_servers.clone())),
            Arc::new(HttpSignaling::new()),
            Arc::new(FileMedia::new(&config.audio_source, &config.output_dir)),
            config.timing,
        )
    }

    pub fn local_addr(&self) -> &str {
        &self.ctx.local_addr
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.ctx.events.subscribe()
    }

    /// Serves the signaling endpoints on the local address until the
    /// listener fails.
    pub async fn listen(&self) -> Result<()> {
        let listener = signaling::bind(&self.ctx.local_addr).await?;
        signaling::serve(listener, self.clone()).await
    }

    /// ========== CALLS ==========

    pub async fn dial(&self, remote: &str, mode: ConnectionMode) -> Result<Arc<Session>> {
        let (session, negotiation) = {
            let mut sessions = self.ctx.table.lock().await;
            if sessions.contains_key(remote) {
                info!("you are already connected to {}", remote);
                return Err(CallError::AlreadyConnected(remote.to_owned()));
            }
            let session = Session::create(self.ctx.clone(), remote, Role::Initiator, mode)
                .await
                .map_err(|e| {
                    warn!("couldn't create new connection to {}: {}", remote, e);
                    e
                })?;
            // signals for this remote wait until the offer is out
            let negotiation = session.hold_negotiation().await;
            sessions.insert(remote.to_owned(), session.clone());
            (session, negotiation)
        };

        if let Err(e) = session.call(negotiation).await {
            warn!("unable to dial {}: {}", remote, e);
            if let Err(close_err) = session.close().await {
                debug!("closing failed dial to {}: {}", remote, close_err);
            }
            return Err(e);
        }
        Ok(session)
    }

    pub async fn hang_up(&self, remote: &str) -> Result<()> {
        let session = self
            .session(remote)
            .await
            .ok_or_else(|| CallError::UnknownDestination(remote.to_owned()))?;
        session.close().await
    }

    /// Closes every session; failures are logged and do not stop the sweep.
    pub async fn close_all(&self) {
        let sessions: Vec<Arc<Session>> = {
            let mut sessions = self.ctx.table.lock().await;
            sessions.drain().map(|(_, s)| s).collect()
        };
        for session in sessions {
            if let Err(e) = session.close().await {
                warn!("unable to close peer {} connection: {}", session.remote(), e);
            }
        }
    }

    /// ========== SIGNALS ==========

    pub async fn handle_description(&self, signal: SessionDescriptionSignal) {
        let origin = signal.origin.clone();
        let session = {
            let mut sessions = self.ctx.table.lock().await;
            match sessions.get(&origin).cloned() {
                Some(existing) => existing,
                None if signal.action == SignalAction::Offer => {
                    match self.create_responder(&origin, signal.mode).await {
                        Some(session) => {
                            sessions.insert(origin.clone(), session.clone());
                            session
                        }
                        None => return,
                    }
                }
                None => {
                    info!(
                        action = ?signal.action,
                        "got a description from {} but wasn't expecting one", origin
                    );
                    return;
                }
            }
        };

        if let Negotiation::Yielded(signal) = session.handle_description(signal).await {
            self.answer_instead(&session, signal).await;
        }
    }

    /// Replaces a call that lost a collision with a responder for `signal`.
    async fn answer_instead(&self, ours: &Arc<Session>, signal: SessionDescriptionSignal) {
        let origin = signal.origin.clone();
        let responder = {
            let mut sessions = self.ctx.table.lock().await;
            if let Some(current) = sessions.get(&origin) {
                if !Arc::ptr_eq(current, ours) {
                    debug!("{} was replaced before its offer could be answered", origin);
                    return;
                }
            }
            sessions.remove(&origin);
            match self.create_responder(&origin, signal.mode).await {
                Some(session) => {
                    sessions.insert(origin.clone(), session.clone());
                    session
                }
                None => return,
            }
        };
        // a fresh responder is in standby and never yields
        responder.handle_description(signal).await;
    }

    pub async fn handle_candidate(&self, signal: CandidateSignal) {
        match self.session(&signal.origin).await {
            Some(session) => session.add_remote_candidate(signal.candidate).await,
            None => info!(
                "got a candidate from {} but wasn't expecting one",
                signal.origin
            ),
        }
    }

    async fn create_responder(&self, remote: &str, mode: ConnectionMode) -> Option<Arc<Session>> {
        match Session::create(self.ctx.clone(), remote, Role::Responder, mode).await {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("couldn't create new connection for {}: {}", remote, e);
                None
            }
        }
    }

    /// ========== MESSAGES ==========

    pub async fn send_to_one(&self, remote: &str, text: &str) -> Result<()> {
        let session = self
            .session(remote)
            .await
            .ok_or_else(|| CallError::UnknownDestination(remote.to_owned()))?;
        session.send_text(text).await
    }

    /// Sends `text` to every session; failures are logged per remote.
    pub async fn send_to_all(&self, text: &str) {
        let sessions = self.sessions().await;
        if sessions.is_empty() {
            info!("but there was nobody listening...");
            return;
        }
        for session in sessions {
            if let Err(e) = session.send_text(text).await {
                warn!("couldn't send message to {}: {}", session.remote(), e);
            }
        }
    }

    /// ========== LOOKUP ==========

    pub async fn session(&self, remote: &str) -> Option<Arc<Session>> {
        self.ctx.table.lock().await.get(remote).cloned()
    }

    /// Snapshot of the registered sessions, ordered by remote address.
    pub async fn sessions(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<_> = self.ctx.table.lock().await.values().cloned().collect();
        sessions.sort_by(|a, b| a.remote().cmp(b.remote()));
        sessions
    }
}
