use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::{
    io::{AsyncWriteExt, Stdout},
    sync::Mutex,
};
use tracing::debug;

use crate::message::OutgoingMessage;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("delivery to `{recipient}` failed: {reason}")]
    Delivery { recipient: String, reason: String },
    #[error("could not encode outgoing message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("channel i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Delivers rendered messages to users (bot → users).
///
/// `sender` is the routing key the conversation arrived on, so multi-number
/// deployments answer from the same business number.
#[async_trait]
pub trait ChannelClient: Send + Sync {
    fn name(&self) -> &str;

    async fn send(
        &self,
        sender: &str,
        recipient: &str,
        msg: &OutgoingMessage,
    ) -> Result<(), ChannelError>;
}

#[derive(Serialize)]
struct ConsoleLine<'a> {
    from: &'a str,
    to: &'a str,
    message: &'a OutgoingMessage,
}

/// Writes every outgoing message as one JSON line on stdout.
pub struct ConsoleChannel {
    out: Mutex<Stdout>,
}

impl ConsoleChannel {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(tokio::io::stdout()),
        }
    }
}

impl Default for ConsoleChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelClient for ConsoleChannel {
    fn name(&self) -> &str {
        "console"
    }

    async fn send(
        &self,
        sender: &str,
        recipient: &str,
        msg: &OutgoingMessage,
    ) -> Result<(), ChannelError> {
        let mut line = serde_json::to_vec(&ConsoleLine {
            from: sender,
            to: recipient,
            message: msg,
        })?;
        line.push(b'\n');

        // one lock per line keeps concurrent conversations from interleaving
        let mut out = self.out.lock().await;
        out.write_all(&line).await?;
        out.flush().await?;
        debug!(recipient, kind = %msg.kind, "console message written");
        Ok(())
    }
}
