//! Shared fixtures for RelayScout integration tests
//!
//! [`MockDirectory`] is an in-memory service directory behind the
//! [`DirectoryTransport`] seam. Nodes it does not know never answer, so a
//! query to them runs into the client's reply timeout.

use relayscout_discovery::directory::{DirectoryQuery, DirectoryReply, QueryKind, WireItem};
use relayscout_discovery::{DirectoryClient, DirectoryTransport, QueryError};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::sync::mpsc;

static TRACING: Once = Once::new();

/// Install a test-writer subscriber filtered by `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Parse an identity, panicking on bad test input
///
/// # Panics
///
/// Panics if `s` is not a valid identity.
pub fn id(s: &str) -> relayscout_discovery::NodeIdentity {
    relayscout_discovery::NodeIdentity::parse(s).expect("valid test identity")
}

/// Directory contents and per-node behavior
#[derive(Debug, Clone, Default)]
pub struct DirectoryGraph {
    services: HashMap<String, Vec<WireItem>>,
    items: HashMap<String, Vec<WireItem>>,
    delays: HashMap<String, Duration>,
    errors: HashSet<String>,
}

impl DirectoryGraph {
    /// Empty directory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `node` answers a Services query with `children`
    #[must_use]
    pub fn services(mut self, node: &str, children: Vec<WireItem>) -> Self {
        self.services.insert(node.to_string(), children);
        self
    }

    /// `node` answers an Items query with `children`
    #[must_use]
    pub fn items(mut self, node: &str, children: Vec<WireItem>) -> Self {
        self.items.insert(node.to_string(), children);
        self
    }

    /// `node` answers only after `delay`
    #[must_use]
    pub fn delay(mut self, node: &str, delay: Duration) -> Self {
        self.delays.insert(node.to_string(), delay);
        self
    }

    /// `node` answers every query with a remote error
    #[must_use]
    pub fn error(mut self, node: &str) -> Self {
        self.errors.insert(node.to_string());
        self
    }

    /// Client over this directory with the given reply timeout
    ///
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn into_client(self, reply_timeout: Duration) -> Arc<DirectoryClient<MockDirectory>> {
        let (replies, rx) = mpsc::unbounded_channel();
        let client = Arc::new(DirectoryClient::new(
            MockDirectory {
                graph: self,
                replies,
                log: Mutex::new(Vec::new()),
            },
            reply_timeout,
        ));
        client.spawn_dispatcher(rx);
        client
    }
}

/// In-memory directory transport
pub struct MockDirectory {
    graph: DirectoryGraph,
    replies: mpsc::UnboundedSender<DirectoryReply>,
    log: Mutex<Vec<(QueryKind, String)>>,
}

impl MockDirectory {
    /// Every query sent, in order
    ///
    /// # Panics
    ///
    /// Panics if the log mutex is poisoned.
    pub fn queries(&self) -> Vec<(QueryKind, String)> {
        self.log.lock().unwrap().clone()
    }

    /// Targets of Services queries, in order
    pub fn services_queried(&self) -> Vec<String> {
        self.queries()
            .into_iter()
            .filter(|(kind, _)| *kind == QueryKind::Services)
            .map(|(_, to)| to)
            .collect()
    }

    /// Number of queries sent to `node`, any kind
    pub fn count(&self, node: &str) -> usize {
        self.queries().iter().filter(|(_, to)| to == node).count()
    }
}

impl DirectoryTransport for MockDirectory {
    async fn send(&self, query: &DirectoryQuery) -> Result<(), QueryError> {
        let to = query.to.to_string();
        self.log.lock().unwrap().push((query.kind, to.clone()));

        let reply = if self.graph.errors.contains(&to) {
            DirectoryReply::error(query.id, "service-unavailable")
        } else {
            let table = match query.kind {
                QueryKind::Services => &self.graph.services,
                QueryKind::Items => &self.graph.items,
            };
            match table.get(&to) {
                Some(children) => DirectoryReply::items(query.id, children.clone()),
                None => return Ok(()),
            }
        };

        match self.graph.delays.get(&to).copied() {
            Some(delay) => {
                let replies = self.replies.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = replies.send(reply);
                });
            }
            None => {
                let _ = self.replies.send(reply);
            }
        }
        Ok(())
    }
}
