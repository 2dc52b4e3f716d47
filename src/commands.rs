//! Console commands.

use crate::peer::types::ConnectionMode;
use crate::registry::PeerRegistry;
use tracing::warn;

pub const HELP: &str = "\
/help                 show this help
/chat <addr>          open a text chat with <addr>
/call <addr>          call <addr>, streaming our audio to them
/vcall <addr>         two-way voice call with <addr>
/end <addr>           hang up on <addr>
/msg <addr> <text>    send <text> to <addr> only
/list                 show open connections
/exit                 hang up on everyone and quit
anything else is sent to every connected peer";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Dial { remote: String, mode: ConnectionMode },
    HangUp(String),
    Send { remote: String, text: String },
    Broadcast(String),
    List,
    Exit,
    Empty,
    Invalid(String),
}

pub fn parse(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    if !line.starts_with('/') {
        return Command::Broadcast(line.to_owned());
    }

    let mut parts = line.splitn(3, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let remote = parts.next().map(str::trim).filter(|s| !s.is_empty());
    let rest = parts.next().map(str::trim).filter(|s| !s.is_empty());

    let dial = |mode| match remote {
        Some(remote) => Command::Dial {
            remote: remote.to_owned(),
            mode,
        },
        None => Command::Invalid(format!("usage: {} <addr>", name)),
    };

    match name {
        "/help" => Command::Help,
        "/chat" => dial(ConnectionMode::TextOnly),
        "/call" => dial(ConnectionMode::VoiceOneWay),
        "/vcall" => dial(ConnectionMode::VoiceTwoWay),
        "/end" => match remote {
            Some(remote) => Command::HangUp(remote.to_owned()),
            None => Command::Invalid("usage: /end <addr>".into()),
        },
        "/msg" => match (remote, rest) {
            (Some(remote), Some(text)) => Command::Send {
                remote: remote.to_owned(),
                text: text.to_owned(),
            },
            _ => Command::Invalid("usage: /msg <addr> <text>".into()),
        },
        "/list" => Command::List,
        "/exit" | "/quit" => Command::Exit,
        other => Command::Invalid(format!("unknown command {}, try /help", other)),
    }
}

/// Runs `command` against the registry. Returns false when the console
/// should stop.
pub async fn execute(registry: &PeerRegistry, command: Command) -> bool {
    match command {
        Command::Help => println!("{}", HELP),
        Command::Dial { remote, mode } => {
            if let Err(e) = registry.dial(&remote, mode).await {
                println!("unable to call {}: {}", remote, e);
            }
        }
        Command::HangUp(remote) => {
            if let Err(e) = registry.hang_up(&remote).await {
                println!("{}", e);
            }
        }
        Command::Send { remote, text } => {
            if let Err(e) = registry.send_to_one(&remote, &text).await {
                println!("{}", e);
            }
        }
        Command::Broadcast(text) => registry.send_to_all(&text).await,
        Command::List => {
            let sessions = registry.sessions().await;
            if sessions.is_empty() {
                println!("no open connections");
            }
            for session in sessions {
                println!(
                    "{:<24} {:<10} {:?} ({:?})",
                    session.remote(),
                    session.state(),
                    session.mode(),
                    session.role()
                );
            }
        }
        Command::Exit => return false,
        Command::Empty => {}
        Command::Invalid(reason) => {
            warn!("ignored console input: {}", reason);
            println!("{}", reason);
        }
    }
    true
}
