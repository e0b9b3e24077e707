//! Node Identity
//!
//! Domain-style addresses (`[local@]domain[/resource]`) used as the dedup key of
//! the visited set and as the map key of discovered relay entries.
//!
//! Identities are normalized at parse time so that two spellings of the same
//! remote entity compare equal: surrounding whitespace is trimmed and the local
//! and domain parts are lowercased. The resource part is kept verbatim.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Identity parse errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// Input was empty after trimming
    #[error("identity is empty")]
    Empty,

    /// Domain part missing (e.g. `user@` or `/res`)
    #[error("identity has no domain part: {0:?}")]
    MissingDomain(String),

    /// Local part present but empty (e.g. `@example.org`)
    #[error("identity has an empty local part: {0:?}")]
    EmptyLocal(String),

    /// More than one `@` before the resource (e.g. `a@b@c`)
    #[error("identity has more than one '@': {0:?}")]
    ExtraSeparator(String),

    /// Whitespace inside the local or domain part
    #[error("identity contains whitespace: {0:?}")]
    Whitespace(String),
}

/// Opaque, normalized address of a directory node
///
/// Ordering and hashing follow the normalized string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeIdentity(String);

impl NodeIdentity {
    /// Parse and normalize an identity
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] if the input has no domain part, an empty local
    /// part, or embedded whitespace.
    pub fn parse(input: &str) -> Result<Self, IdentityError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(IdentityError::Empty);
        }

        let (address, resource) = match trimmed.split_once('/') {
            Some((address, resource)) => (address, Some(resource)),
            None => (trimmed, None),
        };

        let (local, domain) = match address.split_once('@') {
            Some((local, domain)) => (Some(local), domain),
            None => (None, address),
        };

        if domain.is_empty() {
            return Err(IdentityError::MissingDomain(trimmed.to_string()));
        }
        if local.is_some_and(str::is_empty) {
            return Err(IdentityError::EmptyLocal(trimmed.to_string()));
        }
        if domain.contains('@') {
            return Err(IdentityError::ExtraSeparator(trimmed.to_string()));
        }
        if address.chars().any(char::is_whitespace) {
            return Err(IdentityError::Whitespace(trimmed.to_string()));
        }

        let mut normalized = String::with_capacity(trimmed.len());
        if let Some(local) = local {
            normalized.push_str(&local.to_lowercase());
            normalized.push('@');
        }
        normalized.push_str(&domain.to_lowercase());
        if let Some(resource) = resource.filter(|r| !r.is_empty()) {
            normalized.push('/');
            normalized.push_str(resource);
        }

        Ok(Self(normalized))
    }

    /// Normalized string form
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Domain part
    #[must_use]
    pub fn domain(&self) -> &str {
        let address = self.0.split('/').next().unwrap_or(&self.0);
        address.rsplit('@').next().unwrap_or(address)
    }

    /// Resource part, if any
    #[must_use]
    pub fn resource(&self) -> Option<&str> {
        self.0.split_once('/').map(|(_, resource)| resource)
    }

    /// Identity of the domain part alone
    #[must_use]
    pub fn domain_identity(&self) -> Self {
        Self(self.domain().to_string())
    }

    /// Identity without its resource part
    #[must_use]
    pub fn bare(&self) -> Self {
        match self.0.split_once('/') {
            Some((address, _)) => Self(address.to_string()),
            None => self.clone(),
        }
    }

    /// Case-sensitive prefix match against the normalized form
    #[must_use]
    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NodeIdentity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for NodeIdentity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NodeIdentity> for String {
    fn from(id: NodeIdentity) -> Self {
        id.0
    }
}

impl AsRef<str> for NodeIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_domain_only() {
        let id = NodeIdentity::parse("relay.example.org").unwrap();
        assert_eq!(id.as_str(), "relay.example.org");
        assert_eq!(id.domain(), "relay.example.org");
        assert!(id.resource().is_none());
    }

    #[test]
    fn test_parse_normalizes_case_and_whitespace() {
        let a = NodeIdentity::parse("  Alice@Example.ORG/Phone ").unwrap();
        let b = NodeIdentity::parse("alice@example.org/Phone").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "alice@example.org/Phone");
    }

    #[test]
    fn test_resource_is_case_sensitive() {
        let a = NodeIdentity::parse("alice@example.org/Phone").unwrap();
        let b = NodeIdentity::parse("alice@example.org/phone").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.bare(), b.bare());
    }

    #[test]
    fn test_empty_resource_dropped() {
        let id = NodeIdentity::parse("alice@example.org/").unwrap();
        assert_eq!(id.as_str(), "alice@example.org");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(NodeIdentity::parse("   "), Err(IdentityError::Empty));
        assert!(matches!(
            NodeIdentity::parse("alice@"),
            Err(IdentityError::MissingDomain(_))
        ));
        assert!(matches!(
            NodeIdentity::parse("@example.org"),
            Err(IdentityError::EmptyLocal(_))
        ));
        assert!(matches!(
            NodeIdentity::parse("a@b@c"),
            Err(IdentityError::ExtraSeparator(_))
        ));
        assert!(matches!(
            NodeIdentity::parse("bad host.org"),
            Err(IdentityError::Whitespace(_))
        ));
    }

    #[test]
    fn test_at_sign_allowed_in_resource() {
        let id = NodeIdentity::parse("bob@chat.example.org/desk@home").unwrap();
        assert_eq!(id.domain(), "chat.example.org");
        assert_eq!(id.resource(), Some("desk@home"));
    }

    #[test]
    fn test_domain_and_bare() {
        let id: NodeIdentity = "bob@chat.example.org/desk".parse().unwrap();
        assert_eq!(id.domain(), "chat.example.org");
        assert_eq!(id.resource(), Some("desk"));
        assert_eq!(id.bare().as_str(), "bob@chat.example.org");
    }

    #[test]
    fn test_prefix_match_is_case_sensitive() {
        let id = NodeIdentity::parse("relay1.example").unwrap();
        assert!(id.starts_with("relay1"));
        assert!(!id.starts_with("Relay1"));
    }

    #[test]
    fn test_serde_as_string() {
        let id = NodeIdentity::parse("Relay.Example").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"relay.example\"");

        let back: NodeIdentity = serde_json::from_str("\"RELAY.example\"").unwrap();
        assert_eq!(back, id);

        assert!(serde_json::from_str::<NodeIdentity>("\"\"").is_err());
    }
}
