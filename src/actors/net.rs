use std::{sync::Arc, time::Instant};

use anyhow::Result;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort, SupervisionEvent, async_trait, cast};
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    engine::{ChannelMessage, Connection, ConnectionState, Engine, EngineEvent, EventSink, SessionKey},
    models::{
        envelope::{Candidate, Description, DescriptionKind, Envelope, Signal},
        token::PeerToken,
    },
    registry::{NegotiationSession, PeerRegistry, Role},
    utils::rtc::candidate_allowed,
};

use super::signaling::{SignalingActor, SignalingActorArgs, SignalingActorMsg};

pub(crate) const CHANNEL_LABEL: &str = "test";

#[derive(derive_more::Debug)]
pub(crate) enum NetActorMsg {
    // from console
    Offer(PeerToken),
    #[debug("Sessions")]
    Sessions(RpcReplyPort<Vec<PeerToken>>),

    // from signaling
    Inbound(String),
    SignalingClosed,

    // from engine callbacks
    Engine(SessionKey, EngineEvent),

    // from self
    Check,
}

pub(crate) struct NetActorArgs {
    pub(crate) config: Arc<Config>,
    pub(crate) engine: Arc<dyn Engine>,
}

pub(crate) struct NetActorState {
    config: Arc<Config>,
    engine: Arc<dyn Engine>,
    signaling: ActorRef<SignalingActorMsg>,
    registry: PeerRegistry,
    next_session: u64,
}

// the only writer of the registry.
// console, signaling and engine callbacks all reach it through messages.
pub(crate) struct NetActor;

#[async_trait]
impl Actor for NetActor {
    type Msg = NetActorMsg;
    type State = NetActorState;
    type Arguments = NetActorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        info!("spawn SignalingActor");
        let (signaling, _) = Actor::spawn_linked(
            None,
            SignalingActor,
            SignalingActorArgs {
                url: args.config.signaling_url.clone(),
                net: myself.clone(),
            },
            myself.get_cell(),
        )
        .await?;

        if args.config.session_timeout.is_some() {
            myself.send_interval(args.config.check_interval, || NetActorMsg::Check);
        }

        Ok(NetActorState {
            config: args.config,
            engine: args.engine,
            signaling,
            registry: PeerRegistry::default(),
            next_session: 0,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        debug!("received event: {message:?}");
        match message {
            NetActorMsg::Offer(token) => {
                if token == state.config.local_token {
                    debug!("not offering to ourselves");
                    return Ok(());
                }
                info!("offering to {token}");
                if let Err(err) = offer(&myself, state, token.clone()).await {
                    error!("failed to offer to {token}: {err}");
                }
            },
            NetActorMsg::Sessions(reply) => {
                reply.send(state.registry.tokens())?;
            },
            NetActorMsg::Inbound(text) => {
                let envelope = match Envelope::parse(&text) {
                    Ok(envelope) => envelope,
                    Err(err) => {
                        debug!("dropping signaling message: {err}");
                        return Ok(());
                    },
                };
                let token = envelope.token.clone();
                if let Err(err) = route(&myself, state, envelope).await {
                    warn!("failed to apply signaling from {token}: {err}");
                }
            },
            NetActorMsg::SignalingClosed => {
                warn!("signaling connection closed, no further negotiation possible");
            },
            NetActorMsg::Engine(key, event) => {
                on_engine_event(state, key, event).await;
            },
            NetActorMsg::Check => {
                let Some(timeout) = state.config.session_timeout else {
                    return Ok(());
                };
                for (token, session) in state.registry.expired(timeout, Instant::now()) {
                    warn!("session with {token} expired after {}", humantime::format_duration(timeout));
                    close(&token, &session).await;
                }
            },
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        info!("cleaning up");
        for (token, session) in state.registry.remove_all() {
            close(&token, &session).await;
        }
        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        _: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorFailed(_, err) => {
                error!("signaling failed: {err}");
                myself.stop(Some("signaling failed".to_string()));
            },
            SupervisionEvent::ActorTerminated(_, _, reason) => {
                warn!("signaling terminated: {reason:?}");
            },
            _ => {},
        }
        Ok(())
    }
}

async fn offer(myself: &ActorRef<NetActorMsg>, state: &mut NetActorState, token: PeerToken) -> Result<()> {
    let connection = create_session(myself, state, token.clone(), Role::Offerer).await?;
    info!("creating data channel with label `{CHANNEL_LABEL}`");
    let channel = connection.create_data_channel(CHANNEL_LABEL).await?;
    state.registry.insert_channel(token, channel);
    Ok(())
}

async fn route(myself: &ActorRef<NetActorMsg>, state: &mut NetActorState, envelope: Envelope) -> Result<()> {
    let token = envelope.token.clone();
    let connection = match state.registry.lookup(&token) {
        Some(session) => session.connection.clone(),
        None if envelope.is_offer() => {
            info!("answering to {token}");
            create_session(myself, state, token.clone(), Role::Answerer).await?
        },
        None => {
            debug!("dropping signaling for unknown peer {token}");
            return Ok(());
        },
    };
    match envelope.signal {
        Signal::Offer { description } => {
            connection
                .set_remote_description(Description { kind: DescriptionKind::Offer, sdp: description })
                .await?
        },
        Signal::Answer { description } => {
            connection
                .set_remote_description(Description { kind: DescriptionKind::Answer, sdp: description })
                .await?
        },
        Signal::Candidate { candidate, mid } => {
            connection.add_remote_candidate(Candidate { candidate, mid }).await?
        },
    }
    Ok(())
}

async fn create_session(
    myself: &ActorRef<NetActorMsg>,
    state: &mut NetActorState,
    token: PeerToken,
    role: Role,
) -> Result<Arc<dyn Connection>> {
    state.next_session += 1;
    let key = SessionKey { token: token.clone(), id: state.next_session };
    let connection = state
        .engine
        .create_connection(EventSink::new(key.clone(), myself.clone()))
        .await?;
    let session = NegotiationSession::new(key.id, role, connection.clone());
    if let Some(old) = state.registry.insert(token.clone(), session) {
        warn!("replacing session with {token}");
        state.registry.remove_channel(&token);
        close(&token, &old).await;
    }
    Ok(connection)
}

async fn close(token: &PeerToken, session: &NegotiationSession) {
    if let Err(err) = session.connection.close().await {
        warn!("failed to close connection with {token}: {err}");
    }
}

fn send(state: &NetActorState, envelope: Envelope) {
    let text = match envelope.to_text() {
        Ok(text) => text,
        Err(err) => {
            error!("failed to encode signaling message: {err}");
            return;
        },
    };
    if let Err(err) = cast!(state.signaling, SignalingActorMsg::Send(text)) {
        error!("failed to hand message to signaling: {err}");
    }
}

async fn on_engine_event(state: &mut NetActorState, key: SessionKey, event: EngineEvent) {
    let token = key.token;
    let role = match state.registry.lookup(&token) {
        Some(session) if session.id == key.id => session.role,
        _ => {
            debug!("dropping event from stale session with {token}: {event:?}");
            return;
        },
    };
    match event {
        EngineEvent::StateChange(connection_state) => {
            info!("peer {token} state: {connection_state:?}");
            if let Some(session) = state.registry.lookup_mut(&token) {
                session.state = connection_state;
            }
            if connection_state == ConnectionState::Failed {
                warn!("connection with {token} failed");
            }
        },
        EngineEvent::GatheringStateChange(gathering) => {
            info!("peer {token} gathering state: {gathering}");
        },
        EngineEvent::LocalDescription(description) => {
            send(state, Envelope::description(token, description));
        },
        EngineEvent::LocalCandidate { candidate, address } => {
            if !candidate_allowed(address, state.config.ip_restriction) {
                debug!("suppressing local candidate {} for {token}", candidate.candidate);
                return;
            }
            send(state, Envelope::candidate(token, candidate));
        },
        EngineEvent::DataChannel(channel) => {
            info!("data channel from peer with {token} received with label `{}`", channel.label());
            state.registry.insert_channel(token, channel);
        },
        EngineEvent::ChannelOpen(label) => {
            info!("data channel `{label}` with {token} open");
            let greeting = match role {
                Role::Offerer => format!("Hello from {}", state.config.local_token),
                Role::Answerer => format!("Hello from peer with {}", state.config.local_token),
            };
            let Some(channel) = state.registry.channel(&token) else {
                return;
            };
            if let Err(err) = channel.send(&ChannelMessage::Text(greeting)).await {
                warn!("failed to greet {token}: {err}");
            }
        },
        EngineEvent::ChannelClosed(label) => {
            info!("data channel `{label}` with {token} closed");
            state.registry.remove_channel(&token);
        },
    }
}

#[cfg(test)]
mod tests {
    use std::{net::IpAddr, sync::Arc, time::Duration};

    use futures_util::{SinkExt, StreamExt};
    use ractor::{Actor, ActorRef, call, cast};
    use serde_json::{Value, json};
    use tokio::{
        net::{TcpListener, TcpStream},
        sync::mpsc,
        task::JoinHandle,
        time::timeout,
    };
    use tokio_tungstenite::{
        WebSocketStream, accept_hdr_async,
        tungstenite::{
            Message,
            handshake::server::{ErrorResponse, Request, Response},
        },
    };

    use super::*;
    use crate::{
        config::Config,
        engine::testing::{Call, RecordingEngine, next_call},
        handler::Mode,
        utils::ws::signaling_url,
    };

    const LOCAL: &str = "LOCL";

    struct Harness {
        net: ActorRef<NetActorMsg>,
        handle: JoinHandle<()>,
        calls: mpsc::UnboundedReceiver<Call>,
        relay: WebSocketStream<TcpStream>,
        path: String,
    }

    fn test_config(port: u16) -> Config {
        let local = PeerToken::from(LOCAL);
        Config {
            signaling_url: signaling_url("127.0.0.1", port, &local),
            local_token: local,
            stun_url: None,
            ice_servers: Vec::new(),
            mode: Mode::Print,
            ip_restriction: None,
            session_timeout: None,
            check_interval: Duration::from_secs(10),
        }
    }

    async fn start(
        candidates: Vec<(String, Option<IpAddr>)>,
        configure: impl FnOnce(&mut Config),
    ) -> Harness {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut path = String::new();
            let relay = accept_hdr_async(stream, |req: &Request, res: Response| -> Result<Response, ErrorResponse> {
                path = req.uri().path().to_string();
                Ok(res)
            })
            .await
            .unwrap();
            (relay, path)
        });

        let mut config = test_config(port);
        configure(&mut config);
        let (engine, calls) = RecordingEngine::new(candidates);
        let (net, handle) = Actor::spawn(None, NetActor, NetActorArgs { config: Arc::new(config), engine })
            .await
            .unwrap();
        let (relay, path) = accept.await.unwrap();
        Harness { net, handle, calls, relay, path }
    }

    async fn push(relay: &mut WebSocketStream<TcpStream>, value: Value) {
        relay.send(Message::text(value.to_string())).await.unwrap();
    }

    async fn next_outbound(relay: &mut WebSocketStream<TcpStream>) -> Value {
        loop {
            let message = timeout(Duration::from_secs(5), relay.next())
                .await
                .expect("timed out waiting for signaling")
                .expect("relay closed")
                .unwrap();
            if let Message::Text(text) = message {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    fn offer_from(token: &str) -> Value {
        json!({ "token": token, "type": "offer", "description": "v=0 remote" })
    }

    fn remote_offer(token: &str) -> Call {
        Call::Remote(
            PeerToken::from(token),
            Description { kind: DescriptionKind::Offer, sdp: "v=0 remote".to_string() },
        )
    }

    fn greeting(token: &str, text: String) -> Call {
        Call::Send(PeerToken::from(token), ChannelMessage::Text(text))
    }

    async fn sessions(net: &ActorRef<NetActorMsg>) -> Vec<PeerToken> {
        call!(net, NetActorMsg::Sessions).unwrap()
    }

    #[tokio::test]
    async fn connects_with_local_token_path() {
        let harness = start(Vec::new(), |_| {}).await;
        assert_eq!(harness.path, format!("/{LOCAL}"));
        harness.net.stop(None);
        harness.handle.await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_relay_fails_startup() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (engine, mut calls) = RecordingEngine::new(Vec::new());
        let result = Actor::spawn(None, NetActor, NetActorArgs { config: Arc::new(test_config(port)), engine }).await;
        assert!(result.is_err());
        assert!(calls.try_recv().is_err());
    }

    #[tokio::test]
    async fn inbound_offer_creates_exactly_one_session() {
        let mut h = start(Vec::new(), |_| {}).await;

        push(&mut h.relay, offer_from("peer")).await;
        assert_eq!(next_call(&mut h.calls).await, Call::Create(PeerToken::from("peer")));
        assert_eq!(next_call(&mut h.calls).await, remote_offer("peer"));
        assert_eq!(
            next_call(&mut h.calls).await,
            greeting("peer", format!("Hello from peer with {LOCAL}"))
        );
        assert_eq!(
            next_outbound(&mut h.relay).await,
            json!({ "token": "peer", "type": "answer", "description": "v=0 answer" })
        );

        // a second offer goes to the same session
        push(&mut h.relay, offer_from("peer")).await;
        assert_eq!(next_call(&mut h.calls).await, remote_offer("peer"));
        assert_eq!(sessions(&h.net).await, vec![PeerToken::from("peer")]);
    }

    #[tokio::test]
    async fn candidate_reaches_only_its_session() {
        let mut h = start(Vec::new(), |_| {}).await;

        for token in ["aaaa", "bbbb"] {
            push(&mut h.relay, offer_from(token)).await;
            assert_eq!(next_call(&mut h.calls).await, Call::Create(PeerToken::from(token)));
            assert_eq!(next_call(&mut h.calls).await, remote_offer(token));
            assert!(matches!(next_call(&mut h.calls).await, Call::Send(..)));
        }

        push(&mut h.relay, json!({ "token": "bbbb", "type": "candidate", "candidate": "a=candidate:1 1 udp 1 10.0.0.2 9 typ host", "mid": "0" })).await;
        assert_eq!(
            next_call(&mut h.calls).await,
            Call::Candidate(
                PeerToken::from("bbbb"),
                Candidate { candidate: "a=candidate:1 1 udp 1 10.0.0.2 9 typ host".to_string(), mid: "0".to_string() },
            )
        );

        // unknown peer, dropped
        push(&mut h.relay, json!({ "token": "cccc", "type": "candidate", "candidate": "c", "mid": "0" })).await;
        push(&mut h.relay, offer_from("dddd")).await;
        assert_eq!(next_call(&mut h.calls).await, Call::Create(PeerToken::from("dddd")));
        assert_eq!(
            sessions(&h.net).await,
            vec![PeerToken::from("aaaa"), PeerToken::from("bbbb"), PeerToken::from("dddd")]
        );
    }

    #[tokio::test]
    async fn bad_envelopes_leave_registry_untouched() {
        let mut h = start(Vec::new(), |_| {}).await;

        h.relay.send(Message::text("not json")).await.unwrap();
        h.relay.send(Message::binary(b"{\"token\":\"bin\",\"type\":\"offer\",\"description\":\"x\"}".to_vec())).await.unwrap();
        push(&mut h.relay, json!({ "type": "offer", "description": "x" })).await;
        push(&mut h.relay, json!({ "token": "xxxx", "description": "x" })).await;
        push(&mut h.relay, json!({ "token": "xxxx", "type": "bye" })).await;
        push(&mut h.relay, json!({ "token": "xxxx", "type": "answer", "description": "x" })).await;
        push(&mut h.relay, json!({ "token": "xxxx", "type": "offer" })).await;
        assert!(sessions(&h.net).await.is_empty());

        push(&mut h.relay, offer_from("yyyy")).await;
        assert_eq!(next_call(&mut h.calls).await, Call::Create(PeerToken::from("yyyy")));
        assert_eq!(sessions(&h.net).await, vec![PeerToken::from("yyyy")]);
    }

    #[tokio::test]
    async fn console_offer_negotiates_and_reoffer_replaces() {
        let mut h = start(Vec::new(), |_| {}).await;

        cast!(h.net, NetActorMsg::Offer(PeerToken::from(LOCAL))).unwrap();
        cast!(h.net, NetActorMsg::Offer(PeerToken::from("peer"))).unwrap();
        assert_eq!(next_call(&mut h.calls).await, Call::Create(PeerToken::from("peer")));
        assert_eq!(
            next_call(&mut h.calls).await,
            Call::DataChannel(PeerToken::from("peer"), CHANNEL_LABEL.to_string())
        );
        assert_eq!(next_call(&mut h.calls).await, greeting("peer", format!("Hello from {LOCAL}")));
        assert_eq!(
            next_outbound(&mut h.relay).await,
            json!({ "token": "peer", "type": "offer", "description": "v=0 offer" })
        );

        push(&mut h.relay, json!({ "token": "peer", "type": "answer", "description": "v=0 remote" })).await;
        assert_eq!(
            next_call(&mut h.calls).await,
            Call::Remote(
                PeerToken::from("peer"),
                Description { kind: DescriptionKind::Answer, sdp: "v=0 remote".to_string() },
            )
        );

        cast!(h.net, NetActorMsg::Offer(PeerToken::from("peer"))).unwrap();
        assert_eq!(next_call(&mut h.calls).await, Call::Create(PeerToken::from("peer")));
        assert_eq!(next_call(&mut h.calls).await, Call::Close(PeerToken::from("peer")));
        assert_eq!(
            next_call(&mut h.calls).await,
            Call::DataChannel(PeerToken::from("peer"), CHANNEL_LABEL.to_string())
        );
        assert_eq!(sessions(&h.net).await, vec![PeerToken::from("peer")]);
    }

    #[tokio::test]
    async fn ip_restriction_suppresses_other_candidates() {
        let candidates = vec![
            ("cand-a".to_string(), Some("10.0.0.1".parse().unwrap())),
            ("cand-b".to_string(), Some("192.0.2.7".parse().unwrap())),
            ("cand-c".to_string(), None),
        ];
        let mut h = start(candidates, |config| {
            config.ip_restriction = Some("192.0.2.7".parse().unwrap());
        })
        .await;

        cast!(h.net, NetActorMsg::Offer(PeerToken::from("peer"))).unwrap();
        assert_eq!(next_outbound(&mut h.relay).await["type"], "offer");
        assert_eq!(
            next_outbound(&mut h.relay).await,
            json!({ "token": "peer", "type": "candidate", "candidate": "cand-b", "mid": "0" })
        );

        push(&mut h.relay, offer_from("zzzz")).await;
        let answer = next_outbound(&mut h.relay).await;
        assert_eq!(answer["type"], "answer");
        assert_eq!(answer["token"], "zzzz");
    }

    #[tokio::test]
    async fn candidates_pass_without_restriction() {
        let candidates = vec![
            ("cand-a".to_string(), Some("10.0.0.1".parse().unwrap())),
            ("cand-c".to_string(), None),
        ];
        let mut h = start(candidates, |_| {}).await;

        cast!(h.net, NetActorMsg::Offer(PeerToken::from("peer"))).unwrap();
        assert_eq!(next_outbound(&mut h.relay).await["type"], "offer");
        assert_eq!(next_outbound(&mut h.relay).await["candidate"], "cand-a");
        assert_eq!(next_outbound(&mut h.relay).await["candidate"], "cand-c");
    }

    #[tokio::test]
    async fn unanswered_sessions_expire() {
        let mut h = start(Vec::new(), |config| {
            config.session_timeout = Some(Duration::from_millis(50));
            config.check_interval = Duration::from_millis(20);
        })
        .await;

        push(&mut h.relay, offer_from("peer")).await;
        assert_eq!(next_call(&mut h.calls).await, Call::Create(PeerToken::from("peer")));
        assert_eq!(next_call(&mut h.calls).await, remote_offer("peer"));
        assert!(matches!(next_call(&mut h.calls).await, Call::Send(..)));
        assert_eq!(next_call(&mut h.calls).await, Call::Close(PeerToken::from("peer")));
        assert!(sessions(&h.net).await.is_empty());
    }

    #[tokio::test]
    async fn shutdown_closes_every_session() {
        let mut h = start(Vec::new(), |_| {}).await;

        for token in ["aaaa", "bbbb"] {
            push(&mut h.relay, offer_from(token)).await;
            assert_eq!(next_call(&mut h.calls).await, Call::Create(PeerToken::from(token)));
            assert_eq!(next_call(&mut h.calls).await, remote_offer(token));
            assert!(matches!(next_call(&mut h.calls).await, Call::Send(..)));
        }

        h.net.stop(None);
        h.handle.await.unwrap();
        let mut closed = vec![next_call(&mut h.calls).await, next_call(&mut h.calls).await];
        closed.sort_by_key(|call| format!("{call:?}"));
        assert_eq!(
            closed,
            vec![Call::Close(PeerToken::from("aaaa")), Call::Close(PeerToken::from("bbbb"))]
        );
    }
}
