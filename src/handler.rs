use std::{borrow::Cow, io::Write, sync::Weak};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    engine::{ChannelMessage, DataChannel},
    models::token::PeerToken,
};

pub(crate) const DISPLAY_LIMIT: usize = 80;
const FIRST_SUMMARY_INTERVAL: u64 = 100;
const MAX_SUMMARY_INTERVAL: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Print,
    Echo,
}

/// Counts deliveries and decides when a summary line is due.
///
/// A summary fires every `interval` messages. Once the count reaches ten
/// intervals the interval grows tenfold, up to a cap.
#[derive(Debug)]
pub(crate) struct DeliveryStats {
    count: u64,
    interval: u64,
}

impl DeliveryStats {
    pub(crate) fn new() -> Self {
        DeliveryStats { count: 0, interval: FIRST_SUMMARY_INTERVAL }
    }

    /// Returns the running count when a summary is due.
    pub(crate) fn record(&mut self) -> Option<u64> {
        self.count += 1;
        if self.count % self.interval != 0 {
            return None;
        }
        if self.count >= self.interval * 10 && self.interval < MAX_SUMMARY_INTERVAL {
            self.interval *= 10;
        }
        Some(self.count)
    }
}

pub(crate) fn display_text(text: &str) -> Cow<'_, str> {
    match text.char_indices().nth(DISPLAY_LIMIT) {
        None => Cow::Borrowed(text),
        Some((end, _)) => Cow::Owned(format!("{}...", &text[..end])),
    }
}

pub(crate) fn render(token: &PeerToken, message: &ChannelMessage) -> String {
    match message {
        ChannelMessage::Text(text) => {
            format!("Message from peer with {token} received: {}", display_text(text))
        },
        ChannelMessage::Binary(data) => {
            format!("Binary message from peer with {token} received, size={}", data.len())
        },
    }
}

pub(crate) struct MessageHandler {
    mode: Mode,
    stats: Mutex<DeliveryStats>,
    // shared with the console so printed messages don't break the prompt
    output: Mutex<Box<dyn Write + Send>>,
}

impl MessageHandler {
    pub(crate) fn new(mode: Mode, output: impl Write + Send + 'static) -> Self {
        MessageHandler {
            mode,
            stats: Mutex::new(DeliveryStats::new()),
            output: Mutex::new(Box::new(output)),
        }
    }

    /// Handles one inbound message. In echo mode returns whether the echo
    /// went out.
    pub(crate) async fn handle(
        &self,
        token: &PeerToken,
        message: ChannelMessage,
        channel: &Weak<dyn DataChannel>,
    ) -> Option<bool> {
        let kind = message.kind();
        let len = message.len();
        let echoed = match self.mode {
            Mode::Echo => Some(echo(&message, channel).await),
            Mode::Print => {
                if let Err(err) = writeln!(self.output.lock().await, "{}", render(token, &message)) {
                    debug!("failed to print message from {token}: {err}");
                }
                None
            },
        };
        if let Some(count) = self.stats.lock().await.record() {
            match echoed {
                Some(echoed) => info!(
                    "received {count} messages in total from {token}, most recent of type {kind} and size {len} was {}echoed back",
                    if echoed { "" } else { "not " }
                ),
                None => info!("received {count} messages in total from {token}, most recent of type {kind} and size {len}"),
            }
        }
        echoed
    }
}

async fn echo(message: &ChannelMessage, channel: &Weak<dyn DataChannel>) -> bool {
    let Some(channel) = channel.upgrade() else {
        debug!("channel gone before echo");
        return false;
    };
    match channel.send(message).await {
        Ok(()) => true,
        Err(err) => {
            debug!("failed to echo on `{}`: {err}", channel.label());
            false
        },
    }
}
