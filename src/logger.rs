use crate::peer::types::ConnectionMode;
use chrono::{DateTime, Local};
use std::fmt;
use tokio::sync::broadcast;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub enabled: bool,
    /// Used when `RUST_LOG` is not set.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            filter: crate::config::DEFAULT_LOG_FILTER.to_owned(),
        }
    }
}

/// Installs the global subscriber. Logs go to stderr so they don't interleave
/// with the console prompt.
pub fn init(config: &LogConfig) {
    if !config.enabled {
        return;
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_owned()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Something the user should see about a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEventKind {
    Incoming { mode: ConnectionMode },
    Ringing,
    Refused,
    Connected,
    DataChannelOpen,
    DataChannelClosed,
    Message { text: String },
    Closed,
}

#[derive(Debug, Clone)]
pub struct CallEvent {
    pub at: DateTime<Local>,
    pub remote: String,
    pub kind: CallEventKind,
}

impl fmt::Display for CallEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.at.format("%H:%M:%S"))?;
        match &self.kind {
            CallEventKind::Incoming { mode } => {
                write!(f, "incoming {:?} call from {}", mode, self.remote)
            }
            CallEventKind::Ringing => write!(f, "calling {}...", self.remote),
            CallEventKind::Refused => write!(f, "{} is busy", self.remote),
            CallEventKind::Connected => write!(f, "connected to {}", self.remote),
            CallEventKind::DataChannelOpen => write!(f, "chat with {} is open", self.remote),
            CallEventKind::DataChannelClosed => write!(f, "chat with {} closed", self.remote),
            CallEventKind::Message { text } => write!(f, "{}: {}", self.remote, text),
            CallEventKind::Closed => write!(f, "call with {} ended", self.remote),
        }
    }
}

/// Fan-out of call events to whoever is watching. Emitting with no
/// subscribers is fine.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CallEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, remote: &str, kind: CallEventKind) {
        let _ = self.tx.send(CallEvent {
            at: Local::now(),
            remote: remote.to_owned(),
            kind,
        });
    }
}
