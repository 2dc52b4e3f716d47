use crate::peer::types::ServerConfig;
use rand::Rng;

/// Short hex id used to tell sessions apart in logs and as media stream id
pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

/// Adds the protocol scheme to an ICE server URL if it is missing
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    if config.url.starts_with("turn:") || config.url.starts_with("stun:") {
        config.url.clone()
    } else {
        let scheme = if config.r#type == "turn" {
            "turn:"
        } else {
            "stun:"
        };
        format!("{}{}", scheme, config.url)
    }
}

/// Parses `--ice-server` values: `stun:host:port`, `turn:host:port` or a bare
/// `host:port` (STUN).
pub fn parse_ice_server(url: &str, username: Option<&str>, credential: Option<&str>) -> ServerConfig {
    let r#type = if url.starts_with("turn:") { "turn" } else { "stun" };
    let (username, credential) = if r#type == "turn" {
        (username.map(str::to_owned), credential.map(str::to_owned))
    } else {
        (None, None)
    };
    ServerConfig {
        r#type: r#type.to_owned(),
        url: url.to_owned(),
        username,
        credential,
    }
}
