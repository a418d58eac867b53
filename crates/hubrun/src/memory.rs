//! # In-Process Substrate
//!
//! A substrate backed by in-process channels, with the same wildcard
//! matching a real broker would do. Used by the test suite and by
//! single-process deployments where hub and project logic share a process.
//!
//! Uses DashMap for the subscription registry so publishes and
//! subscribes from many tasks never contend on a global lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;

use hubwire::subject_matches;

use crate::substrate;
use crate::substrate::{Message, Substrate, SubstrateError, Subscription};

struct SubEntry {
    pattern: String,
    tx: mpsc::UnboundedSender<Message>,
}

struct Shared {
    subs: DashMap<u64, SubEntry>,
    next_sub_id: AtomicU64,
    closed: AtomicBool,
}

/// An in-process pub/sub substrate.
///
/// Cloning is cheap and shares the same subject space, so every actor in a
/// process can hold its own handle.
#[derive(Clone)]
pub struct MemorySubstrate {
    shared: Arc<Shared>,
}

impl MemorySubstrate {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                subs: DashMap::new(),
                next_sub_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Severs every subscription and fails all subsequent operations with
    /// `ConnectionLost`. Simulates losing the broker.
    pub fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        // Dropping the senders ends every subscriber's stream.
        self.shared.subs.clear();
    }

    fn check_open(&self) -> substrate::Result<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            Err(SubstrateError::ConnectionLost("substrate shut down".into()))
        } else {
            Ok(())
        }
    }
}

impl Default for MemorySubstrate {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Substrate for MemorySubstrate {
    async fn publish(&self, subject: &str, reply: Option<&str>, payload: &[u8]) -> substrate::Result<()> {
        self.check_open()?;

        let msg = Message {
            subject: subject.to_string(),
            reply: reply.map(str::to_string),
            payload: payload.to_vec(),
        };

        for entry in self.shared.subs.iter() {
            if subject_matches(&entry.pattern, subject) {
                // A receiver dropped between lookup and send is the same as
                // no subscriber at all.
                let _ = entry.tx.send(msg.clone());
            }
        }

        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> substrate::Result<Subscription> {
        self.check_open()?;

        let id = self.shared.next_sub_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        self.shared.subs.insert(id, SubEntry {
            pattern: pattern.to_string(),
            tx,
        });

        let shared = self.shared.clone();
        Ok(Subscription::new(rx, move || {
            shared.subs.remove(&id);
        }))
    }
}
