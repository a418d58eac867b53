//! # Subject Addressing
//!
//! Maps a service descriptor to the routing key the substrate uses for
//! delivery. Derivation is a pure function: the same descriptor always
//! yields the same subject, and distinct descriptors never collide.
//!
//! ## Invariants
//!
//! - Descriptor tokens never contain separator or wildcard characters;
//!   derivation rejects them instead of escaping.
//! - A missing compute-server id addresses the project-level instance via
//!   the literal token `project`, which cannot collide with the numeric
//!   token of a real compute server.

use std::fmt;

/// Errors from subject derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectError {
    /// A descriptor field was empty.
    EmptyToken { field: &'static str },
    /// A descriptor field contained a separator, wildcard, or whitespace.
    InvalidToken { field: &'static str, value: String },
}

impl fmt::Display for SubjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyToken { field } => write!(f, "Descriptor field '{}' is empty", field),
            Self::InvalidToken { field, value } => {
                write!(f, "Descriptor field '{}' contains forbidden characters: {:?}", field, value)
            }
        }
    }
}

impl std::error::Error for SubjectError {}

pub type Result<T> = std::result::Result<T, SubjectError>;

/// Prefix for all derived service subjects.
const SERVICE_PREFIX: &str = "svc";

/// Prefix for client reply inboxes.
pub const INBOX_PREFIX: &str = "_inbox";

/// Identifies a service instance: which project, which compute server (if
/// any), and the service name. This is the descriptor both the client and
/// the handler derive their subject from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceAddr {
    pub project_id: String,
    pub compute_server_id: Option<u32>,
    pub service: String,
}

impl ServiceAddr {
    /// Addresses the project-level instance of a service.
    pub fn project(project_id: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            compute_server_id: None,
            service: service.into(),
        }
    }

    /// Addresses a service on a specific compute server within a project.
    pub fn compute_server(
        project_id: impl Into<String>,
        compute_server_id: u32,
        service: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            compute_server_id: Some(compute_server_id),
            service: service.into(),
        }
    }

    /// Derives the routing subject for this descriptor.
    ///
    /// Deterministic and collision-free: token validation guarantees that
    /// the dots in the derived string are exactly the field boundaries.
    pub fn subject(&self) -> Result<Subject> {
        check_token("project_id", &self.project_id)?;
        check_token("service", &self.service)?;

        let host = match self.compute_server_id {
            Some(id) => id.to_string(),
            None => "project".to_string(),
        };

        Ok(Subject(format!(
            "{}.{}.{}.{}",
            SERVICE_PREFIX, self.project_id, host, self.service
        )))
    }
}

impl fmt::Display for ServiceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.compute_server_id {
            Some(id) => write!(f, "{}/cs{}/{}", self.project_id, id, self.service),
            None => write!(f, "{}/project/{}", self.project_id, self.service),
        }
    }
}

/// A derived routing key. Only obtainable through derivation, so holding a
/// `Subject` means the descriptor behind it was valid.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subject(String);

impl Subject {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Builds the root inbox subject for a client id.
///
/// Clients subscribe to `_inbox.<id>.>` and hand out per-call reply
/// subjects beneath it.
pub fn inbox_subject(client_id: &str) -> String {
    format!("{}.{}", INBOX_PREFIX, client_id)
}

fn check_token(field: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(SubjectError::EmptyToken { field });
    }
    let forbidden = |c: char| c == '.' || c == '*' || c == '>' || c.is_whitespace();
    if value.chars().any(forbidden) {
        return Err(SubjectError::InvalidToken {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Token-wise wildcard matching for subscription patterns.
///
/// `*` matches exactly one token; a trailing `>` matches one or more
/// remaining tokens. Literal tokens match themselves. A `>` anywhere but
/// the final position makes the pattern malformed, and a malformed
/// pattern matches nothing.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pat = pattern.split('.');
    let mut sub = subject.split('.');

    loop {
        match (pat.next(), sub.next()) {
            (Some(">"), Some(_)) => return pat.next().is_none(),
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
