//! Discovery entry types
//!
//! Children returned by a directory query are classified once, when the reply
//! is parsed: a child is either a relay offering some transport, a tracker that
//! knows about further nodes, or a plain item with no declared capability.

use crate::identity::NodeIdentity;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Relay transport protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    /// UDP relay (media)
    Udp,
    /// TCP relay
    Tcp,
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udp => write!(f, "udp"),
            Self::Tcp => write!(f, "tcp"),
        }
    }
}

/// Unknown protocol name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown transport protocol: {0:?}")]
pub struct UnknownProtocol(pub String);

impl FromStr for TransportProtocol {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "udp" => Ok(Self::Udp),
            "tcp" => Ok(Self::Tcp),
            _ => Err(UnknownProtocol(s.to_string())),
        }
    }
}

/// Who may use a relay or tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayPolicy {
    /// Anyone
    #[default]
    Public,
    /// Only contacts of the node's owner
    Roster,
}

/// Capability a child declares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildKind {
    /// Relay service; `None` when the declared protocol is not one we know
    Relay {
        /// Declared protocol
        protocol: Option<TransportProtocol>,
    },
    /// Tracker that can be asked for further services
    Tracker,
    /// Item without a declared capability
    Plain,
}

/// One child returned by a directory query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildRef {
    /// Child address
    pub identity: NodeIdentity,
    /// Declared capability
    pub kind: ChildKind,
    /// Access policy
    pub policy: RelayPolicy,
    /// Whether the answering node vouches for the child
    pub verified: bool,
}

impl ChildRef {
    /// Plain item with no declared capability
    #[must_use]
    pub fn plain(identity: NodeIdentity) -> Self {
        Self {
            identity,
            kind: ChildKind::Plain,
            policy: RelayPolicy::Public,
            verified: false,
        }
    }

    /// Relay child
    #[must_use]
    pub fn relay(identity: NodeIdentity, protocol: TransportProtocol) -> Self {
        Self {
            identity,
            kind: ChildKind::Relay {
                protocol: Some(protocol),
            },
            policy: RelayPolicy::Public,
            verified: false,
        }
    }

    /// Tracker child
    #[must_use]
    pub fn tracker(identity: NodeIdentity) -> Self {
        Self {
            identity,
            kind: ChildKind::Tracker,
            policy: RelayPolicy::Public,
            verified: false,
        }
    }

    /// True if this child is a relay for `protocol`
    #[must_use]
    pub fn offers(&self, protocol: TransportProtocol) -> bool {
        matches!(self.kind, ChildKind::Relay { protocol: Some(p) } if p == protocol)
    }

    /// Build the relay entry for this child, if it offers `protocol`
    #[must_use]
    pub fn to_relay_entry(&self, protocol: TransportProtocol) -> Option<RelayEntry> {
        self.offers(protocol).then(|| RelayEntry {
            identity: self.identity.clone(),
            protocol,
            policy: self.policy,
            verified: self.verified,
        })
    }

    /// Build the tracker entry for this child, if it is a tracker
    #[must_use]
    pub fn to_tracker_entry(&self) -> Option<TrackerEntry> {
        (self.kind == ChildKind::Tracker).then(|| TrackerEntry {
            identity: self.identity.clone(),
            policy: self.policy,
            verified: self.verified,
        })
    }
}

/// Discovered relay offering the requested transport
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelayEntry {
    /// Relay address
    pub identity: NodeIdentity,
    /// Declared transport
    pub protocol: TransportProtocol,
    /// Access policy
    #[serde(default)]
    pub policy: RelayPolicy,
    /// Vouched for by the node that listed it
    #[serde(default)]
    pub verified: bool,
}

/// Trusted tracker used as a crawl seed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackerEntry {
    /// Tracker address
    pub identity: NodeIdentity,
    /// Access policy
    #[serde(default)]
    pub policy: RelayPolicy,
    /// Vouched for by configuration or the listing node
    #[serde(default)]
    pub verified: bool,
}

impl TrackerEntry {
    /// Pre-configured, trusted tracker
    #[must_use]
    pub fn trusted(identity: NodeIdentity) -> Self {
        Self {
            identity,
            policy: RelayPolicy::Public,
            verified: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> NodeIdentity {
        NodeIdentity::parse(s).unwrap()
    }

    #[test]
    fn test_protocol_parse() {
        assert_eq!("udp".parse::<TransportProtocol>(), Ok(TransportProtocol::Udp));
        assert_eq!(" TCP ".parse::<TransportProtocol>(), Ok(TransportProtocol::Tcp));
        assert!("sctp".parse::<TransportProtocol>().is_err());
        assert_eq!(TransportProtocol::Udp.to_string(), "udp");
    }

    #[test]
    fn test_child_offers_only_declared_protocol() {
        let relay = ChildRef::relay(id("r.example"), TransportProtocol::Udp);
        assert!(relay.offers(TransportProtocol::Udp));
        assert!(!relay.offers(TransportProtocol::Tcp));

        let unknown = ChildRef {
            kind: ChildKind::Relay { protocol: None },
            ..ChildRef::plain(id("x.example"))
        };
        assert!(!unknown.offers(TransportProtocol::Udp));
        assert!(!ChildRef::tracker(id("t.example")).offers(TransportProtocol::Udp));
    }

    #[test]
    fn test_entry_conversion() {
        let relay = ChildRef::relay(id("r.example"), TransportProtocol::Udp);
        let entry = relay.to_relay_entry(TransportProtocol::Udp).unwrap();
        assert_eq!(entry.identity, id("r.example"));
        assert_eq!(entry.protocol, TransportProtocol::Udp);
        assert!(relay.to_relay_entry(TransportProtocol::Tcp).is_none());
        assert!(relay.to_tracker_entry().is_none());

        let tracker = ChildRef::tracker(id("t.example"));
        assert_eq!(tracker.to_tracker_entry().unwrap().identity, id("t.example"));
    }

    #[test]
    fn test_trusted_tracker() {
        let entry = TrackerEntry::trusted(id("tracker.example"));
        assert!(entry.verified);
        assert_eq!(entry.policy, RelayPolicy::Public);
    }
}
