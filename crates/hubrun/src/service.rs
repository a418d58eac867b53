//! # Service Handler
//!
//! Binds a service implementation to its derived subject and answers
//! requests until closed.
//!
//! ## Invariants
//!
//! - Every request is dispatched on its own task: a slow or panicking call
//!   never blocks or kills the subscription loop.
//! - Per-request failures leave as structured `ok:false` responses; only
//!   connection loss ends the handler.

use std::sync::Arc;

use serde_json::Value;

use hubwire::{CallFailure, RequestEnvelope, ResponseEnvelope, ServiceAddr, SubjectError};

use crate::env::Env;
use crate::substrate::{Message, SubstrateError};

#[derive(Debug)]
pub enum Error {
    Subject(SubjectError),
    Substrate(SubstrateError),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Subject(e) => write!(f, "Subject error: {}", e),
            Self::Substrate(e) => write!(f, "Substrate error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<SubjectError> for Error {
    fn from(e: SubjectError) -> Self {
        Self::Subject(e)
    }
}

impl From<SubstrateError> for Error {
    fn from(e: SubstrateError) -> Self {
        Self::Substrate(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A service implementation: a fixed set of named methods.
///
/// Implementations match on the method name and return
/// [`CallFailure::no_such_method`] from the fallthrough arm, so the method
/// set is a closed contract declared in one place:
///
/// ```ignore
/// #[async_trait::async_trait]
/// impl Service for Sync {
///     async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, CallFailure> {
///         match method {
///             "sync" => self.sync().await,
///             "copy_files_to_home_base" => self.copy_to(args).await,
///             _ => Err(CallFailure::no_such_method(method)),
///         }
///     }
/// }
/// ```
///
/// The handler treats the implementation as immutable for its lifetime.
#[async_trait::async_trait]
pub trait Service: Send + Sync + 'static {
    async fn call(&self, method: &str, args: Vec<Value>) -> std::result::Result<Value, CallFailure>;
}

/// Subscribes `service` to the subject derived from `addr` and starts
/// answering requests. Any number of handlers for distinct descriptors can
/// share one `Env`.
pub async fn serve(env: &Env, addr: ServiceAddr, service: Arc<dyn Service>) -> Result<ServiceHandle> {
    let subject = addr.subject()?;
    let mut subscription = env.substrate().subscribe(subject.as_str()).await?;

    let env = env.clone();
    let task_addr = addr.clone();
    let task = tokio::spawn(async move {
        tracing::debug!(service = %task_addr, subject = %subject, "handler listening");

        while let Some(msg) = subscription.recv().await {
            let env = env.clone();
            let addr = task_addr.clone();
            let service = service.clone();
            tokio::spawn(async move {
                handle_request(&env, &addr, service.as_ref(), msg).await;
            });
        }

        // The subscription only ends when the connection does. We don't
        // reconnect here; the owner rebuilds the handler from a fresh Env.
        tracing::warn!(service = %task_addr, "handler subscription ended");
    });

    Ok(ServiceHandle { addr, task })
}

async fn handle_request(env: &Env, addr: &ServiceAddr, service: &dyn Service, msg: Message) {
    let request: RequestEnvelope = match env.codec().decode(&msg.payload) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(service = %addr, error = %e, "received undecodable request");
            if let Some(reply) = &msg.reply {
                // The request id is unrecoverable, so the response carries
                // an empty one; correlation happens via the reply subject.
                let response =
                    ResponseEnvelope::failure("", CallFailure::malformed_request(e.to_string()));
                publish_response(env, addr, reply, &response).await;
            }
            return;
        }
    };

    let outcome = service.call(&request.method, request.args).await;

    let Some(reply) = &msg.reply else {
        // Fire-and-forget request; the result is discarded.
        return;
    };

    let response = match outcome {
        Ok(result) => ResponseEnvelope::success(request.request_id, result),
        Err(failure) => ResponseEnvelope::failure(request.request_id, failure),
    };

    publish_response(env, addr, reply, &response).await;
}

async fn publish_response(env: &Env, addr: &ServiceAddr, reply: &str, response: &ResponseEnvelope) {
    let payload = match env.codec().encode(response) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(service = %addr, error = %e, "failed to encode response");
            return;
        }
    };

    if let Err(e) = env.substrate().publish(reply, None, &payload).await {
        tracing::warn!(service = %addr, error = %e, "failed to publish response");
    }
}

/// A live handler binding. Closing (or dropping) the handle tears down the
/// subscription; in-flight requests already dispatched still run to
/// completion.
pub struct ServiceHandle {
    addr: ServiceAddr,
    task: tokio::task::JoinHandle<()>,
}

impl ServiceHandle {
    pub fn addr(&self) -> &ServiceAddr {
        &self.addr
    }

    /// Stops answering requests and releases the subscription.
    pub fn close(self) {
        self.task.abort();
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        // Aborting the listener task drops the subscription, which
        // unsubscribes from the substrate.
        self.task.abort();
    }
}
