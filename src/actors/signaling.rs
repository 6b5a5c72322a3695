use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use ractor::{Actor, ActorProcessingErr, ActorRef, async_trait, cast};
use tokio::{net::TcpStream, task::JoinHandle};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::net::NetActorMsg;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

#[derive(Debug)]
pub(crate) enum SignalingActorMsg {
    Send(String),
    Closed,
}

pub(crate) struct SignalingActorArgs {
    pub(crate) url: String,
    pub(crate) net: ActorRef<NetActorMsg>,
}

pub(crate) struct SignalingActorState {
    net: ActorRef<NetActorMsg>,
    sink: Option<WsSink>,
    reader: JoinHandle<()>,
}

// owns the relay connection.
// startup finishes once the socket is open, so a successful spawn is the
// readiness signal. a failed connect fails the spawn.
pub(crate) struct SignalingActor;

#[async_trait]
impl Actor for SignalingActor {
    type Msg = SignalingActorMsg;
    type State = SignalingActorState;
    type Arguments = SignalingActorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        info!("connecting to {}", args.url);
        let (ws, _) = connect_async(args.url.as_str()).await?;
        info!("websocket connected, signaling ready");

        let (sink, mut stream) = ws.split();
        let net = args.net.clone();
        let reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if let Err(err) = cast!(net, NetActorMsg::Inbound(text.as_str().to_owned())) {
                            error!("failed to forward signaling message: {err}");
                            break;
                        }
                    },
                    Ok(Message::Binary(data)) => {
                        debug!("ignoring binary signaling frame of {} bytes", data.len());
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {},
                    Err(err) => {
                        error!("websocket error: {err}");
                        break;
                    },
                }
            }
            if let Err(err) = cast!(myself, SignalingActorMsg::Closed) {
                debug!("signaling actor gone before close: {err}");
            }
        });

        Ok(SignalingActorState {
            net: args.net,
            sink: Some(sink),
            reader,
        })
    }

    async fn handle(
        &self,
        _: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SignalingActorMsg::Send(text) => {
                let Some(sink) = state.sink.as_mut() else {
                    warn!("signaling closed, dropping outbound message");
                    return Ok(());
                };
                // fire and forget
                if let Err(err) = sink.send(Message::text(text)).await {
                    error!("failed to send signaling message: {err}");
                }
            },
            SignalingActorMsg::Closed => {
                info!("websocket closed");
                state.sink = None;
                cast!(state.net, NetActorMsg::SignalingClosed)?;
            },
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.reader.abort();
        if let Some(mut sink) = state.sink.take() {
            let _ = sink.close().await;
        }
        Ok(())
    }
}
