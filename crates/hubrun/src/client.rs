//! # Service Client
//!
//! Calls a named service as if it were local. Each client owns a reply
//! inbox and a pump task that demultiplexes responses back to their calls
//! through an explicit pending table, so any number of calls can be in
//! flight concurrently without interfering.
//!
//! ## Invariants
//!
//! - Every exit path of a call (reply, timeout, connection loss) removes
//!   its pending entry; nothing leaks.
//! - A reply arriving after its call timed out matches no entry and is
//!   discarded.
//! - Timeouts are client-local: no cancellation is sent, and the server may
//!   still complete the abandoned call.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use hubwire::subject::inbox_subject;
use hubwire::{CallFailure, CodecError, RequestEnvelope, ResponseEnvelope, ServiceAddr, Subject, SubjectError};

use crate::env::Env;
use crate::substrate::SubstrateError;

/// Errors a call can fail with. `Remote` and `Timeout` name the service and
/// method so callers can log or retry without knowing the transport.
#[derive(Debug)]
pub enum CallError {
    Subject(SubjectError),
    Codec(CodecError),
    /// The substrate connection failed before a reply arrived.
    Connection(SubstrateError),
    /// The service answered with a classified failure.
    Remote {
        service: String,
        method: String,
        failure: CallFailure,
    },
    /// No reply within the configured timeout. Says nothing about whether
    /// the server eventually ran the call.
    Timeout {
        service: String,
        method: String,
        elapsed: Duration,
    },
    /// The pending-reply channel closed without a value. Indicates a bug in
    /// the pump, not a remote failure.
    ChannelClosed,
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subject(e) => write!(f, "Subject error: {}", e),
            Self::Codec(e) => write!(f, "Codec error: {}", e),
            Self::Connection(e) => write!(f, "Connection error: {}", e),
            Self::Remote { service, method, failure } => {
                write!(f, "Call to '{}' on {} failed: {}", method, service, failure)
            }
            Self::Timeout { service, method, elapsed } => {
                write!(
                    f,
                    "Call to '{}' on {} timed out after {:?}",
                    method, service, elapsed
                )
            }
            Self::ChannelClosed => write!(f, "Response channel closed"),
        }
    }
}

impl std::error::Error for CallError {}

impl From<SubjectError> for CallError {
    fn from(e: SubjectError) -> Self {
        Self::Subject(e)
    }
}

impl From<CodecError> for CallError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

impl From<SubstrateError> for CallError {
    fn from(e: SubstrateError) -> Self {
        Self::Connection(e)
    }
}

pub type Result<T> = std::result::Result<T, CallError>;

type Pending = DashMap<String, oneshot::Sender<std::result::Result<ResponseEnvelope, SubstrateError>>>;

/// A client for one service descriptor.
///
/// Stateless between calls except for the configured timeout and the
/// pending table. Consumers wrap it in a typed facade per service contract
/// (see [`ServiceClient::call_typed`]).
pub struct ServiceClient {
    env: Env,
    addr: ServiceAddr,
    subject: Subject,
    inbox: String,
    timeout: Duration,
    pending: Arc<Pending>,
    next_request_id: AtomicU64,
    pump: tokio::task::JoinHandle<()>,
}

impl ServiceClient {
    /// Creates a client: derives the subject, subscribes to a fresh reply
    /// inbox, and starts the response pump.
    pub async fn new(env: &Env, addr: ServiceAddr) -> Result<Self> {
        let subject = addr.subject()?;
        let inbox = inbox_subject(Uuid::new_v4().simple().to_string().as_str());

        let mut subscription = env
            .substrate()
            .subscribe(&format!("{}.>", inbox))
            .await?;

        let pending: Arc<Pending> = Arc::new(DashMap::new());
        let pump_pending = pending.clone();
        let codec = env.codec();

        let pump = tokio::spawn(async move {
            while let Some(msg) = subscription.recv().await {
                let response: ResponseEnvelope = match codec.decode(&msg.payload) {
                    Ok(response) => response,
                    Err(e) => {
                        tracing::warn!(subject = %msg.subject, error = %e, "dropping undecodable response");
                        continue;
                    }
                };

                // A handler that couldn't decode the request can't echo
                // its id; recover it from the per-call reply subject,
                // whose final token is the request id.
                let id = if response.request_id.is_empty() {
                    msg.subject.rsplit('.').next().unwrap_or_default().to_string()
                } else {
                    response.request_id.clone()
                };

                match pump_pending.remove(&id) {
                    Some((_, tx)) => {
                        // Receiver dropped means the call already gave up.
                        let _ = tx.send(Ok(response));
                    }
                    None => {
                        tracing::debug!(id = %id, "dropping late or unknown reply");
                    }
                }
            }

            // The inbox subscription only ends with the connection. Fail
            // everything still in flight.
            Self::notify_all_pending(
                &pump_pending,
                SubstrateError::ConnectionLost("reply subscription ended".into()),
            );
        });

        Ok(Self {
            env: env.clone(),
            addr,
            subject,
            inbox,
            timeout: env.call_timeout(),
            pending,
            next_request_id: AtomicU64::new(1),
            pump,
        })
    }

    /// Overrides the environment's default per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn addr(&self) -> &ServiceAddr {
        &self.addr
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn notify_all_pending(pending: &Pending, error: SubstrateError) {
        let ids: Vec<String> = pending.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            if let Some((_, tx)) = pending.remove(&id) {
                let _ = tx.send(Err(error.clone()));
            }
        }
    }

    /// Calls a method with positional arguments and awaits the result.
    ///
    /// Resolves with the service's result value, or fails with a classified
    /// error; replies that arrive after the timeout are discarded.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let id = self
            .next_request_id
            .fetch_add(1, Ordering::Relaxed)
            .to_string();
        let reply = format!("{}.{}", self.inbox, id);

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);

        let request = RequestEnvelope::new(id.clone(), method, args);
        let payload = match self.env.codec().encode(&request) {
            Ok(payload) => payload,
            Err(e) => {
                self.pending.remove(&id);
                return Err(CallError::Codec(e));
            }
        };

        if let Err(e) = self
            .env
            .substrate()
            .publish(self.subject.as_str(), Some(&reply), &payload)
            .await
        {
            self.pending.remove(&id);
            return Err(CallError::Connection(e));
        }

        let started = Instant::now();
        match tokio::time::timeout(self.timeout, rx).await {
            // A reply made it through the pump.
            Ok(Ok(Ok(response))) => response.into_result().map_err(|failure| CallError::Remote {
                service: self.addr.to_string(),
                method: method.to_string(),
                failure,
            }),
            // The pump failed the call; it already removed the entry.
            Ok(Ok(Err(e))) => Err(CallError::Connection(e)),
            Ok(Err(_)) => {
                self.pending.remove(&id);
                Err(CallError::ChannelClosed)
            }
            Err(_) => {
                self.pending.remove(&id);
                Err(CallError::Timeout {
                    service: self.addr.to_string(),
                    method: method.to_string(),
                    elapsed: started.elapsed(),
                })
            }
        }
    }

    /// Typed facade over [`call`](Self::call): serializes `args` (a tuple or
    /// sequence of the positional arguments; a bare scalar is treated as a
    /// single argument) and deserializes the result.
    pub async fn call_typed<A, R>(&self, method: &str, args: &A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let args = match serde_json::to_value(args).map_err(CodecError::Encode)? {
            Value::Array(items) => items,
            single => vec![single],
        };

        let result = self.call(method, args).await?;
        serde_json::from_value(result)
            .map_err(CodecError::Decode)
            .map_err(CallError::Codec)
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for ServiceClient {
    fn drop(&mut self) {
        // Aborting the pump drops the inbox subscription.
        self.pump.abort();
    }
}
