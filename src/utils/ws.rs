use crate::models::token::PeerToken;

/// The relay routes to us by the path, so the local token goes there.
pub(crate) fn signaling_url(host: &str, port: u16, local: &PeerToken) -> String {
    let prefix = if host.starts_with("ws://") || host.starts_with("wss://") {
        ""
    } else {
        "ws://"
    };
    format!("{prefix}{host}:{port}/{local}")
}
