//! # Shared Environment
//!
//! Bundles what every client and handler in a process needs: the one
//! substrate connection, the codec, and the process identity (which project
//! and compute server this is). Built explicitly at process start and
//! passed down, rather than lazily materialized behind a global.
//!
//! Only the creator of the substrate closes it; everything else holds a
//! shared reference.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use hubwire::{JsonCodec, ServiceAddr};

use crate::substrate::Substrate;

/// Default per-call timeout. Generous because the slowest services behind
/// this layer are filesystem syncs.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug)]
pub enum Error {
    MissingSubstrate,
    MissingIdentity,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSubstrate => write!(f, "Env requires a substrate"),
            Self::MissingIdentity => write!(f, "Env requires an identity"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Who this process is, used to fill in default service descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub project_id: String,
    pub compute_server_id: Option<u32>,
}

struct EnvInner {
    substrate: Arc<dyn Substrate>,
    codec: JsonCodec,
    identity: Identity,
    call_timeout: Duration,
}

/// The shared context handed to every client and handler.
///
/// Cloning is cheap; all clones share the one substrate connection.
#[derive(Clone)]
pub struct Env {
    inner: Arc<EnvInner>,
}

impl Env {
    pub fn builder() -> EnvBuilder {
        EnvBuilder::new()
    }

    pub fn substrate(&self) -> &Arc<dyn Substrate> {
        &self.inner.substrate
    }

    pub fn codec(&self) -> JsonCodec {
        self.inner.codec
    }

    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    pub fn call_timeout(&self) -> Duration {
        self.inner.call_timeout
    }

    /// Builds a descriptor for a service hosted by this process's own
    /// project/compute-server, so local callers don't repeat their identity.
    pub fn local_addr(&self, service: impl Into<String>) -> ServiceAddr {
        ServiceAddr {
            project_id: self.inner.identity.project_id.clone(),
            compute_server_id: self.inner.identity.compute_server_id,
            service: service.into(),
        }
    }
}

/// Fluent builder for the environment.
pub struct EnvBuilder {
    substrate: Option<Arc<dyn Substrate>>,
    identity: Option<Identity>,
    call_timeout: Duration,
}

impl EnvBuilder {
    pub fn new() -> Self {
        Self {
            substrate: None,
            identity: None,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn substrate(mut self, substrate: Arc<dyn Substrate>) -> Self {
        self.substrate = Some(substrate);
        self
    }

    pub fn identity(mut self, project_id: impl Into<String>, compute_server_id: Option<u32>) -> Self {
        self.identity = Some(Identity {
            project_id: project_id.into(),
            compute_server_id,
        });
        self
    }

    /// Overrides the default 90s per-call timeout. Individual clients can
    /// override again per service.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<Env> {
        let substrate = self.substrate.ok_or(Error::MissingSubstrate)?;
        let identity = self.identity.ok_or(Error::MissingIdentity)?;

        Ok(Env {
            inner: Arc::new(EnvInner {
                substrate,
                codec: JsonCodec,
                identity,
                call_timeout: self.call_timeout,
            }),
        })
    }
}

impl Default for EnvBuilder {
    fn default() -> Self {
        Self::new()
    }
}
