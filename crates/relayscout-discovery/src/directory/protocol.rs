//! Directory wire messages.

use super::QueryError;
use crate::identity::NodeIdentity;
use crate::types::{ChildKind, ChildRef, RelayPolicy, TransportProtocol};
use serde::{Deserialize, Serialize};

/// Correlation id of one query and its reply
pub type QueryId = u64;

/// What a query asks the remote node for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryKind {
    /// Entities hosted at a domain (used by the prefix pass)
    Items,
    /// Relay and tracker services the node knows about (used by the crawler)
    Services,
}

/// Outbound directory query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryQuery {
    /// Correlation id
    pub id: QueryId,
    /// Queried node
    pub to: NodeIdentity,
    /// Query kind
    pub kind: QueryKind,
}

/// One item as it appears on the wire
///
/// Every field is optional on the wire; items that lack a usable identity are
/// dropped when the reply is parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireItem {
    /// Item address
    pub jid: Option<String>,
    /// `relay`, `tracker`, or anything else
    pub kind: Option<String>,
    /// Declared transport for relays
    pub protocol: Option<String>,
    /// `public` or `roster`
    pub policy: Option<String>,
    /// Vouched for by the answering node
    #[serde(default)]
    pub verified: bool,
}

impl WireItem {
    /// Item carrying only an address
    #[must_use]
    pub fn plain(jid: &str) -> Self {
        Self {
            jid: Some(jid.to_string()),
            ..Self::default()
        }
    }

    /// Relay item
    #[must_use]
    pub fn relay(jid: &str, protocol: &str) -> Self {
        Self {
            jid: Some(jid.to_string()),
            kind: Some("relay".to_string()),
            protocol: Some(protocol.to_string()),
            ..Self::default()
        }
    }

    /// Tracker item
    #[must_use]
    pub fn tracker(jid: &str) -> Self {
        Self {
            jid: Some(jid.to_string()),
            kind: Some("tracker".to_string()),
            ..Self::default()
        }
    }

    /// Resolve the item into a typed child
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Malformed`] if the item has no valid identity.
    pub fn into_child(self) -> Result<ChildRef, QueryError> {
        let raw = self
            .jid
            .ok_or_else(|| QueryError::Malformed("item without identity".to_string()))?;
        let identity =
            NodeIdentity::parse(&raw).map_err(|e| QueryError::Malformed(e.to_string()))?;

        let kind = match self.kind.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("relay") => ChildKind::Relay {
                protocol: self
                    .protocol
                    .as_deref()
                    .and_then(|p| p.parse::<TransportProtocol>().ok()),
            },
            Some("tracker") => ChildKind::Tracker,
            _ => ChildKind::Plain,
        };

        let policy = match self.policy.as_deref() {
            Some(p) if p.eq_ignore_ascii_case("roster") => RelayPolicy::Roster,
            _ => RelayPolicy::Public,
        };

        Ok(ChildRef {
            identity,
            kind,
            policy,
            verified: self.verified,
        })
    }
}

/// Reply payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyBody {
    /// Item list
    Items(Vec<WireItem>),
    /// The queried node (or its server) refused or failed the query
    Error {
        /// Error text
        message: String,
    },
}

/// Inbound reply correlated by id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryReply {
    /// Correlation id of the query being answered
    pub id: QueryId,
    /// Reply payload
    pub body: ReplyBody,
}

impl DirectoryReply {
    /// Successful reply
    #[must_use]
    pub fn items(id: QueryId, items: Vec<WireItem>) -> Self {
        Self {
            id,
            body: ReplyBody::Items(items),
        }
    }

    /// Error reply
    #[must_use]
    pub fn error(id: QueryId, message: impl Into<String>) -> Self {
        Self {
            id,
            body: ReplyBody::Error {
                message: message.into(),
            },
        }
    }

    /// Parse into typed children, dropping malformed items
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Remote`] for an error reply.
    pub fn into_children(self) -> Result<Vec<ChildRef>, QueryError> {
        match self.body {
            ReplyBody::Items(items) => Ok(items
                .into_iter()
                .filter_map(|item| match item.into_child() {
                    Ok(child) => Some(child),
                    Err(e) => {
                        tracing::debug!("Dropping item in reply {}: {}", self.id, e);
                        None
                    }
                })
                .collect()),
            ReplyBody::Error { message } => Err(QueryError::Remote(message)),
        }
    }
}

/// Datagram envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirectoryMessage {
    /// Client to gateway
    Query(DirectoryQuery),
    /// Gateway to client
    Reply(DirectoryReply),
}

impl DirectoryMessage {
    /// Serialize message to bytes
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Codec`] if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, QueryError> {
        bincode::serialize(self).map_err(|e| QueryError::Codec(e.to_string()))
    }

    /// Deserialize message from bytes
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Codec`] if the bytes are not a valid message.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, QueryError> {
        bincode::deserialize(bytes).map_err(|e| QueryError::Codec(e.to_string()))
    }

    /// Get the message type name
    #[must_use]
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::Query(_) => "Query",
            Self::Reply(_) => "Reply",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_resolution() {
        let child = WireItem::relay("Relay.Example", "UDP").into_child().unwrap();
        assert_eq!(child.identity.as_str(), "relay.example");
        assert!(child.offers(TransportProtocol::Udp));

        let child = WireItem::tracker("t.example").into_child().unwrap();
        assert_eq!(child.kind, ChildKind::Tracker);

        let child = WireItem::plain("p.example").into_child().unwrap();
        assert_eq!(child.kind, ChildKind::Plain);
    }

    #[test]
    fn test_unknown_relay_protocol_kept_without_protocol() {
        let child = WireItem::relay("r.example", "sctp").into_child().unwrap();
        assert_eq!(child.kind, ChildKind::Relay { protocol: None });
    }

    #[test]
    fn test_roster_policy() {
        let item = WireItem {
            policy: Some("Roster".to_string()),
            verified: true,
            ..WireItem::relay("r.example", "udp")
        };
        let child = item.into_child().unwrap();
        assert_eq!(child.policy, RelayPolicy::Roster);
        assert!(child.verified);
    }

    #[test]
    fn test_malformed_items_dropped() {
        let reply = DirectoryReply::items(
            7,
            vec![
                WireItem::default(),
                WireItem::plain("   "),
                WireItem::plain("bad host"),
                WireItem::relay("ok.example", "udp"),
            ],
        );
        let children = reply.into_children().unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].identity.as_str(), "ok.example");
    }

    #[test]
    fn test_error_reply() {
        let reply = DirectoryReply::error(3, "service-unavailable");
        assert!(matches!(
            reply.into_children(),
            Err(QueryError::Remote(m)) if m == "service-unavailable"
        ));
    }

    #[test]
    fn test_message_codec() {
        let msg = DirectoryMessage::Query(DirectoryQuery {
            id: 42,
            to: NodeIdentity::parse("tracker.example").unwrap(),
            kind: QueryKind::Services,
        });
        let decoded = DirectoryMessage::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.message_type(), "Query");

        assert!(matches!(
            DirectoryMessage::from_bytes(&[0xff, 0xff]),
            Err(QueryError::Codec(_))
        ));
    }
}
