//! # Hubwire
//!
//! The wire layer for service RPC between hub, project, and compute-server
//! processes: subject derivation, request/response envelopes, and the JSON
//! codec they travel through. This crate is transport-agnostic; `hubrun`
//! supplies the substrate and the client/handler machinery.

pub mod codec;
pub mod envelope;
pub mod subject;

pub use codec::{CodecError, JsonCodec};
pub use envelope::{CallFailure, ErrorCode, ErrorPayload, RequestEnvelope, ResponseEnvelope};
pub use subject::{ServiceAddr, Subject, SubjectError, subject_matches};
