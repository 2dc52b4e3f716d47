//! Per-remote session state machine.
//!
//! A [`Session`] turns the unordered stream of signals from its remote, plus the
//! events raised by its peer session, into one negotiation:
//!
//! ```text
//! initiator: Standby -> Ringing   -> Active -> Closed
//! responder: Standby -> Answering -> Active -> Closed
//!            Ringing -> Standby   (refused)
//! ```
//!
//! Signal handling and transport events for one session are serialized by the
//! negotiation lock, which also guards the candidate buffers. An outgoing call
//! holds that lock from registration until it is `Ringing`, so a crossing offer
//! is only judged once our own offer exists. `Closed` is terminal: once reached
//! no other state can be set.

use crate::error::{CallError, Result};
use crate::logger::CallEventKind;
use crate::media::{self, MediaSender, MediaTiming, MediaTrigger};
use crate::peer::ice::CandidateBuffer;
use crate::peer::state::{Role, SessionState, TransportState, AUDIO_CODEC, DATA_CHANNEL_LABEL};
use crate::peer::transport::{DataChannel, PeerEvent, PeerSession, RemoteTrack};
use crate::peer::types::{CandidateSignal, ConnectionMode, SessionDescriptionSignal, SignalAction};
use crate::registry::SessionContext;
use crate::utils::random_id;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch, Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Exclusive hold on a session's negotiation, taken by `dial` before the
/// session becomes visible to signal handlers.
pub(crate) type NegotiationGuard = OwnedMutexGuard<CandidateBuffer>;

/// Outcome of an incoming description.
pub(crate) enum Negotiation {
    Handled,
    /// Our outgoing call lost a collision and was torn down; the offer should
    /// be answered by a fresh responder.
    Yielded(SessionDescriptionSignal),
}

pub struct Session {
    id: String,
    remote: String,
    role: Role,
    mode: ConnectionMode,
    ctx: Arc<SessionContext>,
    peer: Arc<dyn PeerSession>,
    state: watch::Sender<SessionState>,
    negotiation: Arc<Mutex<CandidateBuffer>>,
    data_channel: parking_lot::Mutex<Option<Arc<dyn DataChannel>>>,
    media_sender: parking_lot::Mutex<Option<MediaSender>>,
    media_receiver: parking_lot::Mutex<Option<Box<dyn media::MediaWriter>>>,
    closed: AtomicBool,
}

impl Session {
    /// Creates the session in `Standby` together with its peer session, and
    /// starts consuming the peer session's events.
    pub(crate) async fn create(
        ctx: Arc<SessionContext>,
        remote: &str,
        role: Role,
        mode: ConnectionMode,
    ) -> Result<Arc<Session>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = ctx.peers.create(tx).await?;
        let (state, _) = watch::channel(SessionState::Standby);

        let session = Arc::new(Session {
            id: random_id(),
            remote: remote.to_owned(),
            role,
            mode,
            ctx,
            peer,
            state,
            negotiation: Arc::new(Mutex::new(CandidateBuffer::new())),
            data_channel: parking_lot::Mutex::new(None),
            media_sender: parking_lot::Mutex::new(None),
            media_receiver: parking_lot::Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        debug!(
            remote,
            id = %session.id,
            role = ?role,
            mode = ?mode,
            "session created"
        );

        tokio::spawn(Self::run_events(Arc::downgrade(&session), rx));
        Ok(session)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn peer(&self) -> &Arc<dyn PeerSession> {
        &self.peer
    }

    pub(crate) fn timing(&self) -> MediaTiming {
        self.ctx.timing
    }

    pub(crate) async fn hold_negotiation(&self) -> NegotiationGuard {
        self.negotiation.clone().lock_owned().await
    }

    /// ========== OUTGOING CALL ==========

    /// Creates the data channel and any media sender, then sends the offer.
    /// `negotiation` is held until the session is `Ringing`. The caller tears
    /// the session down if this fails.
    pub(crate) async fn call(self: &Arc<Self>, negotiation: NegotiationGuard) -> Result<()> {
        let dc = self.peer.create_data_channel(DATA_CHANNEL_LABEL).await?;
        *self.data_channel.lock() = Some(dc);

        self.attach_media(MediaTrigger::Dial).await?;

        let offer = self.peer.create_offer().await?;
        self.peer.set_local_description(offer.clone()).await?;

        if !self.advance(SessionState::Standby, SessionState::Ringing) {
            return Err(CallError::Peer(format!(
                "session with {} left standby while dialing ({})",
                self.remote,
                self.state()
            )));
        }
        drop(negotiation);
        info!("dialing {}", self.remote);
        self.emit(CallEventKind::Ringing);

        let signal = SessionDescriptionSignal::offer(offer, self.mode, &self.ctx.local_addr);
        self.ctx.signaling.send_description(&self.remote, &signal).await
    }

    /// ========== SIGNALS FROM THE REMOTE ==========

    pub(crate) async fn handle_description(
        self: &Arc<Self>,
        signal: SessionDescriptionSignal,
    ) -> Negotiation {
        let mut negotiation = self.negotiation.lock().await;
        let previous = self.state();

        match signal.action {
            SignalAction::Offer => {
                if previous == SessionState::Ringing && self.yields_to_remote() {
                    info!("call collision with {}, answering theirs", self.remote);
                    if let Err(e) = self.teardown().await {
                        debug!("dropping our offer to {}: {}", self.remote, e);
                    }
                    return Negotiation::Yielded(signal);
                }
                if previous != SessionState::Standby {
                    info!(
                        state = %previous,
                        "answering incoming call from {} but we are busy", self.remote
                    );
                    return Negotiation::Handled;
                }
                self.set_state(SessionState::Answering);
                info!("incoming call from {}", self.remote);
                self.emit(CallEventKind::Incoming { mode: self.mode });
            }
            SignalAction::Answer => {
                if previous != SessionState::Ringing {
                    warn!("answer from {} but we weren't calling", self.remote);
                    return Negotiation::Handled;
                }
                info!("answer from {}", self.remote);
            }
            SignalAction::Refuse => {
                if previous != SessionState::Ringing {
                    warn!("refusal from {} but we weren't calling", self.remote);
                    return Negotiation::Handled;
                }
                let rejected = CallError::NegotiationRejected(format!("{} is busy", self.remote));
                info!("{}", rejected);
                self.set_state(SessionState::Standby);
                self.emit(CallEventKind::Refused);
                return Negotiation::Handled;
            }
        }

        let trigger = match signal.action {
            SignalAction::Offer => MediaTrigger::OfferReceived,
            _ => MediaTrigger::AnswerReceived,
        };
        if let Err(e) = self.attach_media(trigger).await {
            warn!("can't take call from {}: {}", self.remote, e);
            self.set_state(previous);
            self.refuse().await;
            return Negotiation::Handled;
        }

        if let Err(e) = self.peer.set_remote_description(signal.description).await {
            warn!("couldn't set remote sdp from {}: {}", self.remote, e);
            self.set_state(previous);
            self.refuse().await;
            return Negotiation::Handled;
        }
        let pending = negotiation.mark_remote_set();
        for candidate in &pending.remote {
            self.apply_remote_candidate(candidate).await;
        }

        if self.state() == SessionState::Answering {
            if let Err(e) = self.answer().await {
                warn!("unable to answer {}: {}", self.remote, e);
                return Negotiation::Handled;
            }
        }

        for (sent, candidate) in pending.local.iter().enumerate() {
            if let Err(e) = self.signal_candidate(candidate).await {
                warn!(
                    unsent = pending.local.len() - sent,
                    "unable to signal remote conn {}: {}", self.remote, e
                );
                return Negotiation::Handled;
            }
        }
        debug!(flushed = pending.local.len(), "pending candidates signaled to {}", self.remote);

        self.enter_active();
        Negotiation::Handled
    }

    pub async fn add_remote_candidate(&self, candidate: String) {
        let mut negotiation = self.negotiation.lock().await;
        match negotiation.push_remote(candidate) {
            Some(candidate) => self.apply_remote_candidate(&candidate).await,
            None => debug!(
                "candidate from {} held until its description is applied",
                self.remote
            ),
        }
    }

    async fn apply_remote_candidate(&self, candidate: &str) {
        if let Err(e) = self.peer.add_remote_candidate(candidate).await {
            warn!("couldn't initialize candidate from {}: {}", self.remote, e);
        }
    }

    /// Two sides dialing each other: the side with the greater address drops
    /// its own offer and answers the other one.
    fn yields_to_remote(&self) -> bool {
        self.role == Role::Initiator && self.ctx.local_addr.as_str() > self.remote.as_str()
    }

    async fn answer(&self) -> Result<()> {
        let answer = self.peer.create_answer().await?;
        let signal =
            SessionDescriptionSignal::answer(answer.clone(), self.mode, &self.ctx.local_addr);
        self.ctx.signaling.send_description(&self.remote, &signal).await?;
        self.peer.set_local_description(answer).await
    }

    async fn refuse(&self) {
        let signal = SessionDescriptionSignal::refuse(self.mode, &self.ctx.local_addr);
        if let Err(e) = self.ctx.signaling.send_description(&self.remote, &signal).await {
            warn!("unable to send refusal to {}: {}", self.remote, e);
        }
    }

    async fn signal_candidate(&self, candidate: &str) -> Result<()> {
        let signal = CandidateSignal {
            candidate: candidate.to_owned(),
            origin: self.ctx.local_addr.clone(),
        };
        self.ctx.signaling.send_candidate(&self.remote, &signal).await
    }

    /// ========== PEER SESSION EVENTS ==========

    async fn run_events(session: Weak<Session>, mut rx: mpsc::UnboundedReceiver<PeerEvent>) {
        while let Some(event) = rx.recv().await {
            let Some(session) = session.upgrade() else {
                break;
            };
            session.dispatch(event).await;
        }
    }

    async fn dispatch(self: &Arc<Self>, event: PeerEvent) {
        if self.is_closed() {
            debug!(?event, "event for closed session with {} ignored", self.remote);
            return;
        }

        match event {
            PeerEvent::LocalCandidate(candidate) => self.on_local_candidate(candidate).await,
            PeerEvent::ConnectionState(state) => self.on_transport_state(state).await,
            PeerEvent::DataChannel(dc) => {
                info!("data channel {}@{} offered", dc.label(), self.remote);
                *self.data_channel.lock() = Some(dc);
            }
            PeerEvent::DataChannelOpen => {
                info!("data channel {}@{} open", self.channel_label(), self.remote);
                self.emit(CallEventKind::DataChannelOpen);
            }
            PeerEvent::DataChannelMessage(text) => {
                info!("channel {}@{}: {}", self.channel_label(), self.remote, text);
                self.emit(CallEventKind::Message { text });
            }
            PeerEvent::DataChannelClosed => {
                info!("data channel {}@{} closed", self.channel_label(), self.remote);
                self.data_channel.lock().take();
                self.emit(CallEventKind::DataChannelClosed);
                if let Err(e) = self.close().await {
                    warn!("something happened while attempting to close connection: {}", e);
                }
            }
            PeerEvent::Track(track) => self.on_remote_track(track),
        }
    }

    async fn on_local_candidate(&self, candidate: String) {
        let mut negotiation = self.negotiation.lock().await;
        let Some(candidate) = negotiation.push_local(candidate) else {
            debug!("local candidate buffered for {}", self.remote);
            return;
        };
        if let Err(e) = self.signal_candidate(&candidate).await {
            warn!("unable to signal candidate to {}: {}", self.remote, e);
        }
    }

    async fn on_transport_state(self: &Arc<Self>, state: TransportState) {
        info!(remote = %self.remote, ?state, "peer connection state has changed");

        match state {
            TransportState::Connected => {
                {
                    let negotiation = self.negotiation.lock().await;
                    if !negotiation.remote_description_set() {
                        debug!("connected before negotiation finished with {}", self.remote);
                        return;
                    }
                    self.enter_active();
                }
                self.start_streaming();
            }
            TransportState::Failed | TransportState::Disconnected | TransportState::Closed => {
                if let Err(e) = self.close().await {
                    warn!("unable to close peer connection to {}: {}", self.remote, e);
                }
            }
            TransportState::New | TransportState::Connecting => {}
        }
    }

    fn on_remote_track(self: &Arc<Self>, track: Arc<dyn RemoteTrack>) {
        let mime_type = track.mime_type();
        if !mime_type.eq_ignore_ascii_case(AUDIO_CODEC.mime_type) {
            info!("ignoring {} track from {}", mime_type, self.remote);
            return;
        }
        let sink = self.media_receiver.lock().take();
        let Some(sink) = sink else {
            warn!("track from {} but no receiver is attached", self.remote);
            return;
        };

        tokio::spawn(media::receiver::request_keyframes(self.clone(), track.ssrc()));
        tokio::spawn(media::receiver::receive(self.clone(), track, sink));
    }

    /// ========== MEDIA ==========

    async fn attach_media(&self, trigger: MediaTrigger) -> Result<()> {
        let plan = media::plan(self.mode, self.role, trigger);

        let has_sender = self.media_sender.lock().is_some();
        if plan.attach_sender && !has_sender {
            let reader = self
                .ctx
                .media
                .open_source(&AUDIO_CODEC)
                .map_err(attach_failure)?;
            let track = self
                .peer
                .add_local_track(&AUDIO_CODEC, &self.id)
                .await
                .map_err(attach_failure)?;
            *self.media_sender.lock() = Some(MediaSender { track, reader });
            info!("audio sender attached for {}", self.remote);
        }

        let has_receiver = self.media_receiver.lock().is_some();
        if plan.attach_receiver && !has_receiver {
            self.peer
                .add_remote_receiver(&AUDIO_CODEC)
                .await
                .map_err(attach_failure)?;
            let sink = self
                .ctx
                .media
                .create_sink(&self.remote, &AUDIO_CODEC)
                .map_err(attach_failure)?;
            *self.media_receiver.lock() = Some(sink);
            info!("audio receiver attached for {}", self.remote);
        }
        Ok(())
    }

    fn start_streaming(self: &Arc<Self>) {
        if !media::plan(self.mode, self.role, MediaTrigger::Connected).start_streaming {
            return;
        }
        let sender = self.media_sender.lock().take();
        match sender {
            Some(sender) => {
                tokio::spawn(media::sender::stream(self.clone(), sender));
            }
            // already streaming after an earlier reconnect
            None => debug!("no pending media sender for {}", self.remote),
        }
    }

    /// ========== DATA CHANNEL ==========

    pub async fn send_text(&self, text: &str) -> Result<()> {
        if self.state() != SessionState::Active {
            info!("message to {} but there was nobody listening...", self.remote);
            return Err(CallError::NotConnected(self.remote.clone()));
        }
        let dc = self.data_channel.lock().clone();
        let Some(dc) = dc else {
            return Err(CallError::NotConnected(self.remote.clone()));
        };
        dc.send_text(text).await.map_err(|e| {
            warn!("couldn't send message to {}: {}", self.remote, e);
            CallError::NotConnected(self.remote.clone())
        })
    }

    fn channel_label(&self) -> String {
        self.data_channel
            .lock()
            .as_ref()
            .map(|dc| dc.label())
            .unwrap_or_else(|| DATA_CHANNEL_LABEL.to_owned())
    }

    /// ========== TEARDOWN ==========

    /// Closes the session and removes it from the registry. Safe to call from
    /// any state and any number of times.
    pub async fn close(&self) -> Result<()> {
        let result = self.teardown().await;
        self.ctx.table.remove(self).await;
        result
    }

    /// Releases everything the session owns without touching the registry.
    pub(crate) async fn teardown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.state.send_replace(SessionState::Closed);

        let dc = self.data_channel.lock().take();
        if let Some(dc) = dc {
            if let Err(e) = dc.close().await {
                debug!("data channel to {} did not close cleanly: {}", self.remote, e);
            }
        }

        self.media_sender.lock().take();
        let sink = self.media_receiver.lock().take();
        if let Some(mut sink) = sink {
            if let Err(e) = sink.close() {
                warn!("error closing recording for {}: {}", self.remote, e);
            }
        }

        let result = self.peer.close().await;
        info!("connection to {} closed", self.remote);
        self.emit(CallEventKind::Closed);
        result
    }

    /// Moves to `next` unless already there or closed; true if it changed.
    fn set_state(&self, next: SessionState) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_closed() || *state == next {
                return false;
            }
            debug!(from = %state, to = %next, "session with {} changed state", self.remote);
            *state = next;
            true
        })
    }

    /// Moves from `from` to `next`; false if the session was elsewhere.
    fn advance(&self, from: SessionState, next: SessionState) -> bool {
        self.state.send_if_modified(|state| {
            if *state != from {
                return false;
            }
            debug!(from = %state, to = %next, "session with {} changed state", self.remote);
            *state = next;
            true
        })
    }

    fn enter_active(&self) {
        if self.set_state(SessionState::Active) {
            info!("in call with {}", self.remote);
            self.emit(CallEventKind::Connected);
        }
    }

    fn emit(&self, kind: CallEventKind) {
        self.ctx.events.emit(&self.remote, kind);
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.remote)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("role", &self.role)
            .field("mode", &self.mode)
            .field("state", &self.state())
            .finish()
    }
}

fn attach_failure(err: CallError) -> CallError {
    match err {
        CallError::MediaAttachFailure(_) => err,
        other => CallError::MediaAttachFailure(other.to_string()),
    }
}
