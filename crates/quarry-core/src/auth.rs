//! Verified identity as seen by tools.
//!
//! Token verification happens upstream. Tools only receive the names of the
//! auth services that verified the caller together with each service's claims,
//! plus an optional opaque credential forwarded to per-caller backends.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// Claims produced by one verified auth service.
pub type Claims = Map<String, Value>;

/// Auth services that verified the caller, with their claims.
#[derive(Debug, Clone, Default)]
pub struct VerifiedAuth {
    services: HashMap<String, Claims>,
}

impl VerifiedAuth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`VerifiedAuth::insert`].
    pub fn with_service(mut self, name: impl Into<String>, claims: Claims) -> Self {
        self.insert(name, claims);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, claims: Claims) {
        self.services.insert(name.into(), claims);
    }

    pub fn is_verified(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }

    pub fn claims(&self, service: &str) -> Option<&Claims> {
        self.services.get(service)
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Tool-level check: every service in `required` must be verified.
pub fn is_authorized(required: &[String], verified: &VerifiedAuth) -> bool {
    required.iter().all(|service| verified.is_verified(service))
}

/// Caller credential used to mint per-caller backend clients.
///
/// `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ClientCredential(String);

impl ClientCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Accepts `Bearer <token>` or a bare token. Empty values yield `None`.
    pub fn from_authorization_header(header: &str) -> Option<Self> {
        let header = header.trim();
        let token = match (header.get(..6), header.get(6..)) {
            (Some(scheme), Some(rest))
                if scheme.eq_ignore_ascii_case("bearer")
                    && (rest.is_empty() || rest.starts_with(' ')) =>
            {
                rest.trim()
            }
            _ => header,
        };
        (!token.is_empty()).then(|| Self(token.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ClientCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ClientCredential(***)")
    }
}
