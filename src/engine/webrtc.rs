use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;
use webrtc::{
    data_channel::{RTCDataChannel, data_channel_message::DataChannelMessage},
    ice_transport::{
        ice_candidate::{RTCIceCandidate, RTCIceCandidateInit},
        ice_gatherer_state::RTCIceGathererState,
        ice_server::RTCIceServer,
    },
    peer_connection::{
        RTCPeerConnection, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription,
    },
};

use crate::{
    error::ClientError,
    handler::MessageHandler,
    models::envelope::{Candidate, Description, DescriptionKind},
    utils::rtc::create_rtc_connection,
};

use super::{ChannelMessage, Connection, ConnectionState, DataChannel, Engine, EngineEvent, EventSink};

pub(crate) struct WebRtcEngine {
    ice_servers: Vec<RTCIceServer>,
    handler: Arc<MessageHandler>,
}

impl WebRtcEngine {
    pub(crate) fn new(ice_servers: Vec<RTCIceServer>, handler: Arc<MessageHandler>) -> Self {
        WebRtcEngine { ice_servers, handler }
    }
}

#[async_trait]
impl Engine for WebRtcEngine {
    async fn create_connection(&self, events: EventSink) -> Result<Arc<dyn Connection>> {
        let peer = Arc::new(create_rtc_connection(self.ice_servers.clone()).await?);

        let events1 = events.clone();
        peer.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            events1.emit(EngineEvent::StateChange(connection_state(state)));
            Box::pin(async {})
        }));

        let events2 = events.clone();
        peer.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
            events2.emit(EngineEvent::GatheringStateChange(state.to_string()));
            Box::pin(async {})
        }));

        let events3 = events.clone();
        peer.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            // None marks the end of gathering
            if let Some(candidate) = candidate {
                match local_candidate(&candidate) {
                    Ok(event) => events3.emit(event),
                    Err(err) => warn!("failed to encode local candidate for {}: {err}", events3.token()),
                }
            }
            Box::pin(async {})
        }));

        let events4 = events.clone();
        let handler = self.handler.clone();
        peer.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let channel = wire_channel(dc, &events4, &handler);
            events4.emit(EngineEvent::DataChannel(channel));
            Box::pin(async {})
        }));

        Ok(Arc::new(WebRtcConnection {
            peer,
            events,
            handler: self.handler.clone(),
        }))
    }
}

struct WebRtcConnection {
    peer: Arc<RTCPeerConnection>,
    events: EventSink,
    handler: Arc<MessageHandler>,
}

impl WebRtcConnection {
    async fn publish_local_description(&self, kind: DescriptionKind) -> Result<()> {
        let local = self
            .peer
            .local_description()
            .await
            .ok_or(ClientError::NoLocalDescription)?;
        self.events.emit(EngineEvent::LocalDescription(Description { kind, sdp: local.sdp }));
        Ok(())
    }
}

#[async_trait]
impl Connection for WebRtcConnection {
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>> {
        let dc = self.peer.create_data_channel(label, None).await?;
        let channel = wire_channel(dc, &self.events, &self.handler);

        let offer = self.peer.create_offer(None).await?;
        self.peer.set_local_description(offer).await?;
        self.publish_local_description(DescriptionKind::Offer).await?;
        Ok(channel)
    }

    async fn set_remote_description(&self, description: Description) -> Result<()> {
        let remote = match description.kind {
            DescriptionKind::Offer => RTCSessionDescription::offer(description.sdp)?,
            DescriptionKind::Answer => RTCSessionDescription::answer(description.sdp)?,
        };
        self.peer.set_remote_description(remote).await?;
        if description.kind == DescriptionKind::Offer {
            let answer = self.peer.create_answer(None).await?;
            self.peer.set_local_description(answer).await?;
            self.publish_local_description(DescriptionKind::Answer).await?;
        }
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: Candidate) -> Result<()> {
        // sdp attribute form is accepted too
        let line = candidate
            .candidate
            .strip_prefix("a=")
            .unwrap_or(&candidate.candidate)
            .to_string();
        self.peer
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: line,
                sdp_mid: Some(candidate.mid),
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.peer.close().await?;
        Ok(())
    }
}

struct WebRtcChannel {
    label: String,
    dc: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataChannel for WebRtcChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send(&self, message: &ChannelMessage) -> Result<()> {
        match message {
            ChannelMessage::Text(text) => self.dc.send_text(text.clone()).await?,
            ChannelMessage::Binary(data) => self.dc.send(data).await?,
        };
        Ok(())
    }
}

/// Hooks the engine channel up to the event sink and the message handler.
///
/// The callbacks only keep a weak reference to the returned channel; whoever
/// holds the returned `Arc` decides how long it stays usable.
fn wire_channel(dc: Arc<RTCDataChannel>, events: &EventSink, handler: &Arc<MessageHandler>) -> Arc<dyn DataChannel> {
    let label = dc.label().to_string();
    let channel: Arc<dyn DataChannel> = Arc::new(WebRtcChannel {
        label: label.clone(),
        dc: dc.clone(),
    });

    let events_open = events.clone();
    let label_open = label.clone();
    dc.on_open(Box::new(move || {
        events_open.emit(EngineEvent::ChannelOpen(label_open));
        Box::pin(async {})
    }));

    let events_close = events.clone();
    dc.on_close(Box::new(move || {
        events_close.emit(EngineEvent::ChannelClosed(label.clone()));
        Box::pin(async {})
    }));

    let token = events.token().clone();
    let handler = handler.clone();
    let weak = Arc::downgrade(&channel);
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let token = token.clone();
        let handler = handler.clone();
        let weak = weak.clone();
        Box::pin(async move {
            let message = if msg.is_string {
                ChannelMessage::Text(String::from_utf8_lossy(&msg.data).into_owned())
            } else {
                ChannelMessage::Binary(msg.data)
            };
            handler.handle(&token, message, &weak).await;
        })
    }));

    channel
}

fn local_candidate(candidate: &RTCIceCandidate) -> Result<EngineEvent> {
    let init = candidate.to_json()?;
    Ok(EngineEvent::LocalCandidate {
        candidate: Candidate {
            candidate: init.candidate,
            mid: init.sdp_mid.unwrap_or_default(),
        },
        address: candidate.address.parse().ok(),
    })
}

fn connection_state(state: RTCPeerConnectionState) -> ConnectionState {
    match state {
        RTCPeerConnectionState::New => ConnectionState::New,
        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
        RTCPeerConnectionState::Connected => ConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => ConnectionState::Failed,
        RTCPeerConnectionState::Closed => ConnectionState::Closed,
        RTCPeerConnectionState::Unspecified => ConnectionState::Unknown,
    }
}
