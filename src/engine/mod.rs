use std::{net::IpAddr, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use ractor::{ActorRef, cast};
use tracing::debug;

use crate::{
    actors::net::NetActorMsg,
    models::{
        envelope::{Candidate, Description},
        token::PeerToken,
    },
};

pub(crate) mod webrtc;

#[cfg(test)]
pub(crate) mod testing;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ChannelMessage {
    Text(String),
    Binary(Bytes),
}

impl ChannelMessage {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            ChannelMessage::Text(_) => "text",
            ChannelMessage::Binary(_) => "binary",
        }
    }

    /// Characters for text, bytes for binary.
    pub(crate) fn len(&self) -> usize {
        match self {
            ChannelMessage::Text(text) => text.chars().count(),
            ChannelMessage::Binary(data) => data.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
    Unknown,
}

#[derive(derive_more::Debug)]
pub(crate) enum EngineEvent {
    StateChange(ConnectionState),
    GatheringStateChange(String),
    LocalDescription(Description),
    LocalCandidate {
        candidate: Candidate,
        // None when the engine reports a hostname
        address: Option<IpAddr>,
    },
    #[debug("DataChannel")]
    DataChannel(Arc<dyn DataChannel>),
    ChannelOpen(String),
    ChannelClosed(String),
}

/// Identifies one negotiation session. The id changes when a session for the
/// same token is replaced, so late events from the old one can be told apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct SessionKey {
    pub(crate) token: PeerToken,
    pub(crate) id: u64,
}

/// Where engine callbacks report to.
#[derive(Clone)]
pub(crate) struct EventSink {
    key: SessionKey,
    net: ActorRef<NetActorMsg>,
}

impl EventSink {
    pub(crate) fn new(key: SessionKey, net: ActorRef<NetActorMsg>) -> Self {
        EventSink { key, net }
    }

    pub(crate) fn token(&self) -> &PeerToken {
        &self.key.token
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        if let Err(err) = cast!(self.net, NetActorMsg::Engine(self.key.clone(), event)) {
            debug!("dropping engine event for {}: {err}", self.key.token);
        }
    }
}

#[async_trait]
pub(crate) trait Engine: Send + Sync {
    async fn create_connection(&self, events: EventSink) -> Result<Arc<dyn Connection>>;
}

#[async_trait]
pub(crate) trait Connection: Send + Sync {
    /// Creates a channel and starts negotiation as the offerer.
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>>;
    /// Applies a remote description, answering if it is an offer.
    async fn set_remote_description(&self, description: Description) -> Result<()>;
    async fn add_remote_candidate(&self, candidate: Candidate) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub(crate) trait DataChannel: Send + Sync {
    fn label(&self) -> &str;
    async fn send(&self, message: &ChannelMessage) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_length_counts_characters() {
        assert_eq!(ChannelMessage::Text("héllo".to_string()).len(), 5);
        assert_eq!(ChannelMessage::Binary(Bytes::from_static(&[0, 1, 2])).len(), 3);
        assert_eq!(ChannelMessage::Text(String::new()).kind(), "text");
        assert_eq!(ChannelMessage::Binary(Bytes::new()).kind(), "binary");
    }
}
