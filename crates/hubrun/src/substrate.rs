//! # Substrate Abstraction
//!
//! A minimal, async interface over the pub/sub messaging system the RPC
//! layer rides on.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: The substrate knows nothing about envelopes or the
//!   codec. It routes opaque buffers by subject string.
//! - **Best-Effort**: No ordering or delivery guarantees beyond
//!   at-most-once per subscriber. Publishing to a subject nobody is
//!   subscribed to silently drops the message; the caller's only signal is
//!   its own timeout.

use std::fmt;

use tokio::sync::mpsc;

/// Errors that occur at the substrate/connection layer.
#[derive(Debug, Clone)]
pub enum SubstrateError {
    /// The connection could not be established or was lost.
    ConnectionLost(String),
    /// The substrate was shut down by its owner.
    Closed,
    /// Generic I/O error or internal substrate failure.
    Io(String),
}

impl fmt::Display for SubstrateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Closed => write!(f, "Substrate closed"),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for SubstrateError {}

pub type Result<T> = std::result::Result<T, SubstrateError>;

/// An inbound message as delivered to a subscriber.
#[derive(Debug, Clone)]
pub struct Message {
    /// The subject the message was published to.
    pub subject: String,
    /// Where the publisher wants the answer, if it wants one.
    pub reply: Option<String>,
    pub payload: Vec<u8>,
}

/// A publish/subscribe messaging system.
///
/// This trait is designed to be object-safe (`Arc<dyn Substrate>`). The
/// in-process implementation lives in [`crate::memory`]; production
/// deployments adapt their broker client to the same two operations.
#[async_trait::async_trait]
pub trait Substrate: Send + Sync + 'static {
    /// Publishes a payload to a subject, optionally naming a reply subject.
    ///
    /// Must not interpret the payload. Returns `Err` only for
    /// connection-level failures; "nobody listening" is not an error.
    async fn publish(&self, subject: &str, reply: Option<&str>, payload: &[u8]) -> Result<()>;

    /// Subscribes to a subject pattern (`*` single token, trailing `>`
    /// multi-token) and returns the inbound stream.
    async fn subscribe(&self, pattern: &str) -> Result<Subscription>;
}

/// An owned stream of inbound messages for one subscription.
///
/// Dropping the subscription unsubscribes. The stream is not restartable
/// mid-flight; to listen again, subscribe again.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Message>,
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wraps a receiver with an unsubscribe action run on drop.
    pub fn new(rx: mpsc::UnboundedReceiver<Message>, on_drop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            rx,
            on_drop: Some(Box::new(on_drop)),
        }
    }

    /// Receives the next message, or `None` once the substrate severs the
    /// subscription (shutdown or connection loss).
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.on_drop.take() {
            unsubscribe();
        }
    }
}
