use std::{net::IpAddr, sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use tokio::{sync::mpsc, time::timeout};

use crate::models::{
    envelope::{Candidate, Description, DescriptionKind},
    token::PeerToken,
};

use super::{ChannelMessage, Connection, DataChannel, Engine, EngineEvent, EventSink};

/// Everything the orchestrator asked the engine to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Create(PeerToken),
    DataChannel(PeerToken, String),
    Remote(PeerToken, Description),
    Candidate(PeerToken, Candidate),
    Send(PeerToken, ChannelMessage),
    Close(PeerToken),
}

/// Engine double that records calls and plays back a fixed script of local
/// events: a description, the configured candidates and an open channel.
pub(crate) struct RecordingEngine {
    calls: mpsc::UnboundedSender<Call>,
    candidates: Vec<(String, Option<IpAddr>)>,
}

impl RecordingEngine {
    pub(crate) fn new(candidates: Vec<(String, Option<IpAddr>)>) -> (Arc<RecordingEngine>, mpsc::UnboundedReceiver<Call>) {
        let (calls, rx) = mpsc::unbounded_channel();
        (Arc::new(RecordingEngine { calls, candidates }), rx)
    }
}

#[async_trait]
impl Engine for RecordingEngine {
    async fn create_connection(&self, events: EventSink) -> Result<Arc<dyn Connection>> {
        let _ = self.calls.send(Call::Create(events.token().clone()));
        Ok(Arc::new(RecordingConnection {
            events,
            calls: self.calls.clone(),
            candidates: self.candidates.clone(),
        }))
    }
}

struct RecordingConnection {
    events: EventSink,
    calls: mpsc::UnboundedSender<Call>,
    candidates: Vec<(String, Option<IpAddr>)>,
}

impl RecordingConnection {
    fn record(&self, call: Call) {
        let _ = self.calls.send(call);
    }

    fn channel(&self, label: &str) -> Arc<dyn DataChannel> {
        Arc::new(RecordingChannel {
            token: self.events.token().clone(),
            label: label.to_string(),
            calls: self.calls.clone(),
        })
    }

    fn play_local(&self, kind: DescriptionKind) {
        self.events.emit(EngineEvent::LocalDescription(Description {
            kind,
            sdp: format!("v=0 {kind}"),
        }));
        for (candidate, address) in &self.candidates {
            self.events.emit(EngineEvent::LocalCandidate {
                candidate: Candidate { candidate: candidate.clone(), mid: "0".to_string() },
                address: *address,
            });
        }
    }
}

#[async_trait]
impl Connection for RecordingConnection {
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>> {
        self.record(Call::DataChannel(self.events.token().clone(), label.to_string()));
        self.play_local(DescriptionKind::Offer);
        self.events.emit(EngineEvent::ChannelOpen(label.to_string()));
        Ok(self.channel(label))
    }

    async fn set_remote_description(&self, description: Description) -> Result<()> {
        let kind = description.kind;
        self.record(Call::Remote(self.events.token().clone(), description));
        if kind == DescriptionKind::Offer {
            self.play_local(DescriptionKind::Answer);
            self.events.emit(EngineEvent::DataChannel(self.channel("test")));
            self.events.emit(EngineEvent::ChannelOpen("test".to_string()));
        }
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: Candidate) -> Result<()> {
        self.record(Call::Candidate(self.events.token().clone(), candidate));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record(Call::Close(self.events.token().clone()));
        Ok(())
    }
}

struct RecordingChannel {
    token: PeerToken,
    label: String,
    calls: mpsc::UnboundedSender<Call>,
}

#[async_trait]
impl DataChannel for RecordingChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send(&self, message: &ChannelMessage) -> Result<()> {
        let _ = self.calls.send(Call::Send(self.token.clone(), message.clone()));
        Ok(())
    }
}

pub(crate) async fn next_call(calls: &mut mpsc::UnboundedReceiver<Call>) -> Call {
    timeout(Duration::from_secs(5), calls.recv())
        .await
        .expect("timed out waiting for engine call")
        .expect("engine dropped")
}
