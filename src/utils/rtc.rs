use std::net::IpAddr;

use anyhow::Result;
use tracing::debug;
use webrtc::{
    api::{APIBuilder, interceptor_registry::register_default_interceptors, media_engine::MediaEngine},
    ice_transport::ice_server::RTCIceServer,
    interceptor::registry::Registry,
    peer_connection::{RTCPeerConnection, configuration::RTCConfiguration},
};

use crate::error::ClientError;

pub(crate) async fn create_rtc_connection(ice_servers: Vec<RTCIceServer>) -> Result<RTCPeerConnection> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;
    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();
    debug!("ice servers: {:?}", ice_servers);
    let config = RTCConfiguration {
        ice_servers,
        ..Default::default()
    };
    Ok(api.new_peer_connection(config).await?)
}

/// `url` or `url|username|credential`.
pub(crate) fn parse_ice_server(input: &str) -> Result<RTCIceServer, ClientError> {
    let splited: Vec<_> = input.split('|').collect();
    match splited.as_slice() {
        [url] if !url.is_empty() => Ok(RTCIceServer {
            urls: vec![url.to_string()],
            ..Default::default()
        }),
        [url, username, credential] if !url.is_empty() => Ok(RTCIceServer {
            urls: vec![url.to_string()],
            username: username.to_string(),
            credential: credential.to_string(),
            ..Default::default()
        }),
        _ => Err(ClientError::IceServer(input.to_string())),
    }
}

pub(crate) fn stun_url(server: &str, port: u16) -> String {
    if server.starts_with("stun:") {
        format!("{server}:{port}")
    } else {
        format!("stun:{server}:{port}")
    }
}

/// Whether a local candidate may be signaled under an ip restriction.
pub(crate) fn candidate_allowed(address: Option<IpAddr>, restriction: Option<IpAddr>) -> bool {
    match restriction {
        None => true,
        Some(expected) => address == Some(expected),
    }
}
