#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use peercall::error::{CallError, Result};
use peercall::logger::{CallEvent, CallEventKind};
use peercall::media::{EncodedUnit, MediaFactory, MediaReader, MediaTiming, MediaWriter};
use peercall::peer::{
    CandidateSignal, DataChannel, LocalTrack, MediaCodec, PeerEvent, PeerEvents, PeerSession,
    PeerSessionFactory, RemoteTrack, SdpType, SessionDescription, SessionDescriptionSignal,
    SignalAction, TransportState,
};
use peercall::signaling::SignalTransport;
use peercall::{PeerRegistry, Session, SessionState};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{timeout, Instant};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("peercall=debug")
        .with_test_writer()
        .try_init();
}

// ========== FAKE PEER SESSIONS ==========

/// Pairs fake peers through their descriptions: an offer or answer SDP names
/// the peer that produced it, and applying an answer connects the two.
#[derive(Default)]
pub struct Switchboard {
    next_id: AtomicU64,
    peers: Mutex<HashMap<u64, Weak<FakePeer>>>,
}

impl Switchboard {
    fn register(&self, peer: &Arc<FakePeer>) {
        self.peers.lock().insert(peer.id, Arc::downgrade(peer));
    }

    fn find(&self, sdp: &str) -> Option<Arc<FakePeer>> {
        let id: u64 = sdp.rsplit(' ').next()?.parse().ok()?;
        self.peers.lock().get(&id)?.upgrade()
    }
}

pub struct FakePeerFactory {
    board: Arc<Switchboard>,
    pub reject_remote: AtomicBool,
    /// How long each new peer takes to build its offer.
    pub offer_delay: Mutex<Duration>,
    pub created: Mutex<Vec<Arc<FakePeer>>>,
}

impl FakePeerFactory {
    pub fn new(board: Arc<Switchboard>) -> Self {
        Self {
            board,
            reject_remote: AtomicBool::new(false),
            offer_delay: Mutex::new(Duration::ZERO),
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn peers(&self) -> Vec<Arc<FakePeer>> {
        self.created.lock().clone()
    }

    pub fn last(&self) -> Arc<FakePeer> {
        self.created.lock().last().cloned().expect("no peer created")
    }
}

#[async_trait]
impl PeerSessionFactory for FakePeerFactory {
    async fn create(&self, events: PeerEvents) -> Result<Arc<dyn PeerSession>> {
        let id = self.board.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let peer = Arc::new_cyclic(|me| FakePeer {
            id,
            me: me.clone(),
            board: self.board.clone(),
            events,
            reject_remote: self.reject_remote.load(Ordering::Relaxed),
            offer_delay: *self.offer_delay.lock(),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            linked: Mutex::new(None),
            data_channel: Mutex::new(None),
            local_track: Mutex::new(None),
            wants_receiver: AtomicBool::new(false),
            remote_candidates: Mutex::new(Vec::new()),
            close_count: AtomicUsize::new(0),
            keyframe_requests: AtomicUsize::new(0),
        });
        self.board.register(&peer);
        self.created.lock().push(peer.clone());
        Ok(peer)
    }
}

pub struct FakePeer {
    pub id: u64,
    me: Weak<FakePeer>,
    board: Arc<Switchboard>,
    events: PeerEvents,
    reject_remote: bool,
    offer_delay: Duration,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    linked: Mutex<Option<Weak<FakePeer>>>,
    data_channel: Mutex<Option<Arc<FakeDataChannel>>>,
    local_track: Mutex<Option<Arc<FakeLocalTrack>>>,
    wants_receiver: AtomicBool,
    pub remote_candidates: Mutex<Vec<String>>,
    pub close_count: AtomicUsize,
    pub keyframe_requests: AtomicUsize,
}

impl FakePeer {
    /// Candidates this peer reports once its local description is set.
    pub fn local_candidates(&self) -> Vec<String> {
        (1..=2).map(|n| format!("candidate:{} {}", self.id, n)).collect()
    }

    pub fn local_track(&self) -> Option<Arc<FakeLocalTrack>> {
        self.local_track.lock().clone()
    }

    /// Reports `event` to the owning session as if the stack raised it.
    pub fn raise(&self, event: PeerEvent) {
        let _ = self.events.send(event);
    }

    /// Called on the initiator when the answer is applied.
    fn connect(&self, responder: &Arc<FakePeer>) {
        *responder.linked.lock() = Some(self.me.clone());

        let ours = self.data_channel.lock().clone();
        if let Some(ours) = &ours {
            let theirs = FakeDataChannel::new(&ours.label, responder.events.clone());
            FakeDataChannel::pair(ours, &theirs);
            *responder.data_channel.lock() = Some(theirs.clone());
            let _ = responder.events.send(PeerEvent::DataChannel(theirs));
        }

        if let Some(me) = self.me.upgrade() {
            route_media(&me, responder);
            route_media(responder, &me);
        }

        for events in [&self.events, &responder.events] {
            let _ = events.send(PeerEvent::ConnectionState(TransportState::Connecting));
            let _ = events.send(PeerEvent::ConnectionState(TransportState::Connected));
            if ours.is_some() {
                let _ = events.send(PeerEvent::DataChannelOpen);
            }
        }
    }
}

fn route_media(from: &Arc<FakePeer>, to: &Arc<FakePeer>) {
    let Some(track) = from.local_track() else {
        return;
    };
    if !to.wants_receiver.load(Ordering::Relaxed) {
        return;
    }
    if let Some(rx) = track.rx.lock().take() {
        let remote = FakeRemoteTrack {
            ssrc: from.id as u32,
            mime_type: track.mime_type.to_owned(),
            rx: tokio::sync::Mutex::new(rx),
        };
        let _ = to.events.send(PeerEvent::Track(Arc::new(remote)));
    };
}

#[async_trait]
impl PeerSession for FakePeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        if !self.offer_delay.is_zero() {
            tokio::time::sleep(self.offer_delay).await;
        }
        Ok(SessionDescription::offer(format!("fake-offer {}", self.id)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        if self.remote.lock().is_none() {
            return Err(CallError::Peer("no remote description".into()));
        }
        Ok(SessionDescription::answer(format!("fake-answer {}", self.id)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        *self.local.lock() = Some(desc);
        for candidate in self.local_candidates() {
            let _ = self.events.send(PeerEvent::LocalCandidate(candidate));
        }
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        if self.reject_remote {
            return Err(CallError::Peer("remote description rejected".into()));
        }
        let other = self
            .board
            .find(&desc.sdp)
            .ok_or_else(|| CallError::Peer(format!("unknown sdp {:?}", desc.sdp)))?;
        let is_answer = desc.sdp_type == SdpType::Answer;
        *self.remote.lock() = Some(desc);
        *self.linked.lock() = Some(Arc::downgrade(&other));
        if is_answer {
            self.connect(&other);
        }
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: &str) -> Result<()> {
        if self.remote.lock().is_none() {
            return Err(CallError::Peer("candidate before remote description".into()));
        }
        self.remote_candidates.lock().push(candidate.to_owned());
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>> {
        let dc = FakeDataChannel::new(label, self.events.clone());
        *self.data_channel.lock() = Some(dc.clone());
        Ok(dc)
    }

    async fn add_local_track(
        &self,
        codec: &MediaCodec,
        _stream_id: &str,
    ) -> Result<Arc<dyn LocalTrack>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let track = Arc::new(FakeLocalTrack {
            mime_type: codec.mime_type,
            clock_rate: codec.clock_rate,
            tx,
            rx: Mutex::new(Some(rx)),
            position: Mutex::new(0),
            writes: Mutex::new(Vec::new()),
        });
        *self.local_track.lock() = Some(track.clone());
        Ok(track)
    }

    async fn add_remote_receiver(&self, _codec: &MediaCodec) -> Result<()> {
        self.wants_receiver.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn request_keyframe(&self, _ssrc: u32) -> Result<()> {
        self.keyframe_requests.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.close_count.fetch_add(1, Ordering::Relaxed);
        self.local_track.lock().take();
        let dc = self.data_channel.lock().take();
        if let Some(dc) = dc {
            let _ = dc.close().await;
        }
        let linked = self.linked.lock().take().and_then(|peer| peer.upgrade());
        if let Some(peer) = linked {
            let _ = peer
                .events
                .send(PeerEvent::ConnectionState(TransportState::Disconnected));
        }
        Ok(())
    }
}

pub struct FakeDataChannel {
    label: String,
    events: PeerEvents,
    peer: Mutex<Option<Weak<FakeDataChannel>>>,
    closed: AtomicBool,
}

impl FakeDataChannel {
    fn new(label: &str, events: PeerEvents) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_owned(),
            events,
            peer: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    fn pair(a: &Arc<Self>, b: &Arc<Self>) {
        *a.peer.lock() = Some(Arc::downgrade(b));
        *b.peer.lock() = Some(Arc::downgrade(a));
    }

    fn peer(&self) -> Option<Arc<FakeDataChannel>> {
        self.peer.lock().as_ref().and_then(Weak::upgrade)
    }
}

#[async_trait]
impl DataChannel for FakeDataChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(CallError::Peer("data channel closed".into()));
        }
        let peer = self
            .peer()
            .ok_or_else(|| CallError::Peer("data channel not open".into()))?;
        let _ = peer
            .events
            .send(PeerEvent::DataChannelMessage(text.to_owned()));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::Relaxed) {
            return Ok(());
        }
        if let Some(peer) = self.peer() {
            if !peer.closed.swap(true, Ordering::Relaxed) {
                let _ = peer.events.send(PeerEvent::DataChannelClosed);
            }
        }
        Ok(())
    }
}

pub struct FakeLocalTrack {
    mime_type: &'static str,
    clock_rate: u32,
    tx: mpsc::UnboundedSender<EncodedUnit>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<EncodedUnit>>>,
    position: Mutex<u64>,
    pub writes: Mutex<Vec<(Instant, Bytes)>>,
}

#[async_trait]
impl LocalTrack for FakeLocalTrack {
    async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<()> {
        let time_position = {
            let mut position = self.position.lock();
            *position += duration.as_millis() as u64 * u64::from(self.clock_rate) / 1000;
            *position
        };
        self.writes.lock().push((Instant::now(), data.clone()));
        let _ = self.tx.send(EncodedUnit {
            data,
            time_position,
        });
        Ok(())
    }
}

pub struct FakeRemoteTrack {
    ssrc: u32,
    mime_type: String,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<EncodedUnit>>,
}

#[async_trait]
impl RemoteTrack for FakeRemoteTrack {
    fn ssrc(&self) -> u32 {
        self.ssrc
    }

    fn mime_type(&self) -> String {
        self.mime_type.clone()
    }

    async fn read_unit(&self) -> Result<EncodedUnit> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| CallError::StreamFault("track ended".into()))
    }
}

// ========== IN-MEMORY MEDIA ==========

pub struct MemoryMedia {
    units: Vec<EncodedUnit>,
    pub fail_source: AtomicBool,
    sinks: Mutex<HashMap<String, Arc<Mutex<Vec<EncodedUnit>>>>>,
    pub sinks_closed: AtomicUsize,
}

impl MemoryMedia {
    /// A source of `pages` Opus-like pages, 20 ms apart on a 48 kHz clock.
    pub fn with_pages(pages: usize) -> Self {
        let units = (1..=pages)
            .map(|n| EncodedUnit {
                data: Bytes::from(vec![n as u8; 4]),
                time_position: n as u64 * 960,
            })
            .collect();
        Self {
            units,
            fail_source: AtomicBool::new(false),
            sinks: Mutex::new(HashMap::new()),
            sinks_closed: AtomicUsize::new(0),
        }
    }

    pub fn source_units(&self) -> &[EncodedUnit] {
        &self.units
    }

    pub fn received(&self, remote: &str) -> Vec<EncodedUnit> {
        self.sinks
            .lock()
            .get(remote)
            .map(|sink| sink.lock().clone())
            .unwrap_or_default()
    }
}

impl MediaFactory for MemoryMedia {
    fn open_source(&self, _codec: &MediaCodec) -> Result<Box<dyn MediaReader>> {
        if self.fail_source.load(Ordering::Relaxed) {
            return Err(CallError::MediaAttachFailure("no audio source".into()));
        }
        Ok(Box::new(MemorySource {
            units: self.units.clone().into_iter(),
        }))
    }

    fn create_sink(&self, remote: &str, _codec: &MediaCodec) -> Result<Box<dyn MediaWriter>> {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        self.sinks.lock().insert(remote.to_owned(), buffer.clone());
        Ok(Box::new(MemorySink { buffer }))
    }
}

struct MemorySource {
    units: std::vec::IntoIter<EncodedUnit>,
}

impl MediaReader for MemorySource {
    fn read_next(&mut self) -> Result<Option<EncodedUnit>> {
        Ok(self.units.next())
    }
}

struct MemorySink {
    buffer: Arc<Mutex<Vec<EncodedUnit>>>,
}

impl MediaWriter for MemorySink {
    fn write_unit(&mut self, unit: &EncodedUnit) -> Result<()> {
        self.buffer.lock().push(unit.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

// ========== LOOPBACK SIGNALING ==========

#[derive(Debug, Clone)]
pub enum Signal {
    Description(SessionDescriptionSignal),
    Candidate(CandidateSignal),
}

/// Addresses of the registries reachable in one test.
#[derive(Default)]
pub struct LoopbackNetwork {
    nodes: Mutex<HashMap<String, PeerRegistry>>,
}

impl LoopbackNetwork {
    pub fn attach(&self, registry: &PeerRegistry) {
        self.nodes
            .lock()
            .insert(registry.local_addr().to_owned(), registry.clone());
    }

    pub fn detach(&self, addr: &str) {
        self.nodes.lock().remove(addr);
    }
}

/// Delivers signals straight to the addressed registry, each on its own task,
/// the way the HTTP listener acknowledges and then handles.
pub struct LoopbackSignaling {
    network: Arc<LoopbackNetwork>,
    paused: AtomicBool,
    queued: Mutex<Vec<(String, Signal)>>,
    pub sent: Mutex<Vec<(String, Signal)>>,
}

impl LoopbackSignaling {
    pub fn new(network: Arc<LoopbackNetwork>) -> Self {
        Self {
            network,
            paused: AtomicBool::new(false),
            queued: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Holds outgoing signals until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        let queued = std::mem::take(&mut *self.queued.lock());
        for (to, signal) in queued {
            let _ = self.deliver(&to, signal);
        }
    }

    pub fn sent_actions(&self) -> Vec<SignalAction> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(_, signal)| match signal {
                Signal::Description(d) => Some(d.action),
                Signal::Candidate(_) => None,
            })
            .collect()
    }

    pub fn sent_candidates(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(_, signal)| match signal {
                Signal::Candidate(c) => Some(c.candidate.clone()),
                Signal::Description(_) => None,
            })
            .collect()
    }

    fn dispatch(&self, to: &str, signal: Signal) -> Result<()> {
        self.sent.lock().push((to.to_owned(), signal.clone()));
        if self.paused.load(Ordering::SeqCst) {
            self.queued.lock().push((to.to_owned(), signal));
            return Ok(());
        }
        self.deliver(to, signal)
    }

    fn deliver(&self, to: &str, signal: Signal) -> Result<()> {
        let registry = self
            .network
            .nodes
            .lock()
            .get(to)
            .cloned()
            .ok_or_else(|| CallError::TransportFailure(format!("connection refused: {}", to)))?;
        tokio::spawn(async move {
            match signal {
                Signal::Description(signal) => registry.handle_description(signal).await,
                Signal::Candidate(signal) => registry.handle_candidate(signal).await,
            }
        });
        Ok(())
    }
}

#[async_trait]
impl SignalTransport for LoopbackSignaling {
    async fn send_description(&self, to: &str, signal: &SessionDescriptionSignal) -> Result<()> {
        self.dispatch(to, Signal::Description(signal.clone()))
    }

    async fn send_candidate(&self, to: &str, signal: &CandidateSignal) -> Result<()> {
        self.dispatch(to, Signal::Candidate(signal.clone()))
    }
}

// ========== TEST NETWORK ==========

pub fn test_timing() -> MediaTiming {
    MediaTiming {
        page_duration: Duration::from_millis(20),
        keyframe_interval: Duration::from_millis(50),
    }
}

pub struct Node {
    pub addr: String,
    pub registry: PeerRegistry,
    pub signaling: Arc<LoopbackSignaling>,
    pub peers: Arc<FakePeerFactory>,
    pub media: Arc<MemoryMedia>,
}

impl Node {
    pub async fn session_with(&self, remote: &str) -> Arc<Session> {
        let deadline = Instant::now() + WAIT;
        loop {
            if let Some(session) = self.registry.session(remote).await {
                return session;
            }
            assert!(
                Instant::now() < deadline,
                "{} never registered {}",
                self.addr,
                remote
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Node {
    pub async fn wait_unregistered(&self, remote: &str) {
        let deadline = Instant::now() + WAIT;
        while self.registry.session(remote).await.is_some() {
            assert!(
                Instant::now() < deadline,
                "{} still holds a session with {}",
                self.addr,
                remote
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

pub struct TestNet {
    pub network: Arc<LoopbackNetwork>,
    pub board: Arc<Switchboard>,
}

impl TestNet {
    pub fn new() -> Self {
        init_tracing();
        Self {
            network: Arc::new(LoopbackNetwork::default()),
            board: Arc::new(Switchboard::default()),
        }
    }

    pub fn node(&self, addr: &str) -> Node {
        self.node_with_media(addr, MemoryMedia::with_pages(15))
    }

    pub fn node_with_media(&self, addr: &str, media: MemoryMedia) -> Node {
        let signaling = Arc::new(LoopbackSignaling::new(self.network.clone()));
        let peers = Arc::new(FakePeerFactory::new(self.board.clone()));
        let media = Arc::new(media);
        let registry = PeerRegistry::new(
            addr,
            peers.clone(),
            signaling.clone(),
            media.clone(),
            test_timing(),
        );
        self.network.attach(&registry);
        Node {
            addr: addr.to_owned(),
            registry,
            signaling,
            peers,
            media,
        }
    }
}

// ========== WAITING ==========

pub async fn wait_for_state(session: &Session, want: SessionState) {
    let mut state = session.watch_state();
    let reached = timeout(WAIT, async move {
        state.wait_for(|s| *s == want).await.map(|_| ())
    })
    .await;
    assert!(
        matches!(reached, Ok(Ok(()))),
        "session with {} never reached {:?}, stuck in {:?}",
        session.remote(),
        want,
        session.state()
    );
}

pub async fn wait_until(what: &str, check: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn next_event(
    events: &mut broadcast::Receiver<CallEvent>,
    matches: impl Fn(&CallEvent) -> bool,
) -> CallEvent {
    timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

pub fn is_kind(kind: CallEventKind) -> impl Fn(&CallEvent) -> bool {
    move |event: &CallEvent| event.kind == kind
}
