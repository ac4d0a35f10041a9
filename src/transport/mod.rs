//! Pub/sub plumbing between coordinators and workers.
//!
//! A [`Transport`] publishes string payloads to named channels and hands out
//! [`Subscription`]s. Subscriptions come in two modes:
//!
//! - plain: every subscriber of the channel receives every message
//! - grouped: each message goes to exactly one live member of a named group
//!
//! Handlers are driven by [`consume`], a loop that decodes each message and
//! lets the handler decide whether to keep going via [`Flow`].

pub mod channels;
pub mod memory;
pub mod messages;

use std::future::Future;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

pub use channels::Channels;
pub use memory::{MemoryBus, MemoryTransport};

#[derive(Debug, Clone)]
pub struct Envelope {
    pub channel: String,
    pub payload: String,
}

/// Receiving end of a channel subscription. It yields `None` once the
/// subscription is removed with [`Transport::unsubscribe`].
pub struct Subscription {
    channel: String,
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, rx: mpsc::UnboundedReceiver<Envelope>) -> Self {
        Self {
            channel: channel.into(),
            rx,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, channel: &str, payload: String) -> Result<()>;

    async fn subscribe(&self, channel: &str) -> Result<Subscription>;

    async fn subscribe_with_group(
        &self,
        channel: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Subscription>;

    /// Drop every subscription this transport holds on `channel`.
    async fn unsubscribe(&self, channel: &str) -> Result<()>;
}

/// What a message handler wants the consumption loop to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

pub async fn publish_message<T: Serialize>(
    transport: &dyn Transport,
    channel: &str,
    message: &T,
) -> Result<()> {
    let payload = serde_json::to_string(message)?;
    transport.publish(channel, payload).await
}

/// Feed decoded messages to `handler` until the subscription closes, the
/// handler returns [`Flow::Stop`], or `shutdown` fires between messages.
///
/// Payloads that fail to decode are logged and skipped.
pub async fn consume<T, F, Fut>(
    mut subscription: Subscription,
    shutdown: CancellationToken,
    mut handler: F,
) where
    T: DeserializeOwned,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Flow>,
{
    loop {
        let envelope = tokio::select! {
            _ = shutdown.cancelled() => break,
            envelope = subscription.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };

        let message: T = match serde_json::from_str(&envelope.payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(channel = %envelope.channel, error = %e, "Dropping undecodable message");
                continue;
            }
        };

        if handler(message).await == Flow::Stop {
            break;
        }
    }

    tracing::debug!(channel = %subscription.channel(), "Consumption loop finished");
}
