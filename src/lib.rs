pub mod commands;
pub mod config;
pub mod error;
pub mod logger;
pub mod media;
pub mod peer;
pub mod registry;
pub mod session;
pub mod signaling;
pub mod utils;

pub use config::Config;
pub use error::{CallError, Result};
pub use logger::{CallEvent, CallEventKind};
pub use peer::{ConnectionMode, Role, SessionState};
pub use registry::PeerRegistry;
pub use session::Session;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

/// Runs the console front end until `/exit`, end of input or Ctrl-C, then
/// closes every session.
pub async fn run(config: Config) -> Result<()> {
    let registry = PeerRegistry::from_config(&config);

    let listener = signaling::bind(registry.local_addr()).await?;
    let server = registry.clone();
    tokio::spawn(async move {
        if let Err(e) = signaling::serve(listener, server).await {
            error!("{}", e);
            std::process::exit(1);
        }
    });

    let mut events = registry.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => println!("{}", event),
                Err(RecvError::Lagged(missed)) => warn!(missed, "console fell behind on events"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    println!("peercall on {} (/help for commands)", registry.local_addr());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !commands::execute(&registry, commands::parse(&line)).await {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("unable to read console input: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("shutting down");
    registry.close_all().await;
    Ok(())
}
