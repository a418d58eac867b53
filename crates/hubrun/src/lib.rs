//! # Hubrun
//!
//! The runtime half of the service RPC layer: the substrate abstraction the
//! envelopes travel over, the shared environment (connection, codec,
//! identity), the server-side handler, and the client with its pending-call
//! table. Wire types live in `hubwire`.

pub mod client;
pub mod env;
pub mod memory;
pub mod service;
pub mod substrate;

pub use client::{CallError, ServiceClient};
pub use env::{Env, EnvBuilder, Identity};
pub use memory::MemorySubstrate;
pub use service::{Service, ServiceHandle, serve};
pub use substrate::{Message, Substrate, SubstrateError, Subscription};

#[cfg(test)]
mod tests;
