use crate::error::Result;
use crate::logger::LogConfig;
use crate::media::MediaTiming;
use crate::peer::ice::validate_ice_servers;
use crate::peer::types::ServerConfig;
use crate::utils::parse_ice_server;
use clap::Parser;
use std::path::PathBuf;

// Debug builds log per-candidate and per-state detail
#[cfg(debug_assertions)]
pub const DEFAULT_LOG_FILTER: &str = "peercall=debug";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_FILTER: &str = "peercall=info";

pub const DEFAULT_LISTEN: &str = "localhost:8001";
pub const DEFAULT_AUDIO_SOURCE: &str = "resources/sources/audio.ogg";
pub const DEFAULT_OUTPUT_DIR: &str = "resources/results";

#[derive(Parser, Debug)]
#[command(name = "peercall", version, about = "Peer-to-peer calls and chat over WebRTC")]
pub struct Cli {
    /// Address to accept signaling on; also sent to peers as our origin
    #[arg(short, long, default_value = DEFAULT_LISTEN)]
    pub listen: String,

    /// Ogg/Opus file streamed on voice calls
    #[arg(long, default_value = DEFAULT_AUDIO_SOURCE)]
    pub audio_source: PathBuf,

    /// Directory for recordings of received audio
    #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
    pub output_dir: PathBuf,

    /// STUN or TURN server, e.g. stun:host:3478 (repeatable)
    #[arg(long = "ice-server", value_name = "URL")]
    pub ice_servers: Vec<String>,

    #[arg(long, requires = "turn_credential")]
    pub turn_username: Option<String>,

    #[arg(long, requires = "turn_username")]
    pub turn_credential: Option<String>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = DEFAULT_LOG_FILTER)]
    pub log_filter: String,

    /// Disable logging
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub audio_source: PathBuf,
    pub output_dir: PathBuf,
    pub ice_servers: Vec<ServerConfig>,
    pub timing: MediaTiming,
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_owned(),
            audio_source: PathBuf::from(DEFAULT_AUDIO_SOURCE),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            ice_servers: Vec::new(),
            timing: MediaTiming::default(),
            log: LogConfig::default(),
        }
    }
}

impl TryFrom<Cli> for Config {
    type Error = crate::error::CallError;

    fn try_from(cli: Cli) -> Result<Self> {
        let ice_servers: Vec<ServerConfig> = cli
            .ice_servers
            .iter()
            .map(|url| {
                parse_ice_server(
                    url,
                    cli.turn_username.as_deref(),
                    cli.turn_credential.as_deref(),
                )
            })
            .collect();
        validate_ice_servers(&ice_servers)?;

        Ok(Self {
            listen: cli.listen,
            audio_source: cli.audio_source,
            output_dir: cli.output_dir,
            ice_servers,
            timing: MediaTiming::default(),
            log: LogConfig {
                enabled: !cli.quiet,
                filter: cli.log_filter,
            },
        })
    }
}
