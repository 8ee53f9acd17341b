use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    client::{ChannelClient, ChannelError},
    message::OutgoingMessage,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub sender: String,
    pub recipient: String,
    pub message: OutgoingMessage,
}

/// Records every message instead of delivering it. Can be switched into a
/// failing mode to exercise delivery-error paths.
#[derive(Clone, Default)]
pub struct MemoryChannel {
    sent: Arc<Mutex<Vec<SentMessage>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// While failing, every send returns `ChannelError::Delivery` and nothing
    /// is recorded.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn sent_messages(&self) -> Vec<SentMessage> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_to(&self, recipient: &str) -> Vec<OutgoingMessage> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|s| s.recipient == recipient)
            .map(|s| s.message.clone())
            .collect()
    }
}

#[async_trait]
impl ChannelClient for MemoryChannel {
    fn name(&self) -> &str {
        "memory"
    }

    async fn send(
        &self,
        sender: &str,
        recipient: &str,
        msg: &OutgoingMessage,
    ) -> Result<(), ChannelError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChannelError::Delivery {
                recipient: recipient.to_string(),
                reason: "memory channel is in failing mode".to_string(),
            });
        }
        self.sent.lock().await.push(SentMessage {
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            message: msg.clone(),
        });
        Ok(())
    }
}
