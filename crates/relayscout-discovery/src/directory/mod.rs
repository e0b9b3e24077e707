//! # Directory Query Client
//!
//! Issues one bounded query to one remote node and returns the typed children
//! it lists.
//!
//! ## Flow
//!
//! ```text
//!   query(to, kind)
//!        │  register collector (id -> oneshot)
//!        ▼
//!   DirectoryTransport::send ──────────► remote node
//!                                             │
//!   spawn_dispatcher ◄──── mpsc<DirectoryReply>
//!        │  route by id
//!        ▼
//!   collector fires, or the reply timeout expires
//!        │  collector removed on every exit path
//!        ▼
//!   Vec<ChildRef> | QueryError
//! ```
//!
//! There are no retries: one failure is final for that node in that run.

pub mod protocol;
pub mod udp;

pub use protocol::{
    DirectoryMessage, DirectoryQuery, DirectoryReply, QueryId, QueryKind, ReplyBody, WireItem,
};
pub use udp::UdpDirectoryTransport;

use crate::identity::NodeIdentity;
use crate::types::ChildRef;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time;

/// Directory query errors
#[derive(Debug, Error)]
pub enum QueryError {
    /// No reply within the reply timeout
    #[error("Directory query timed out")]
    Timeout,

    /// Sending the query failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// The node answered with an error
    #[error("Remote error: {0}")]
    Remote(String),

    /// Reply or item could not be interpreted
    #[error("Malformed reply: {0}")]
    Malformed(String),

    /// Wire encoding failed
    #[error("Codec error: {0}")]
    Codec(String),

    /// Socket error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Reply dispatcher is gone
    #[error("Reply channel closed")]
    Closed,
}

impl QueryError {
    /// True for [`QueryError::Timeout`]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// Outbound half of a directory transport
///
/// Replies travel back through the channel handed to
/// [`DirectoryClient::spawn_dispatcher`].
pub trait DirectoryTransport: Send + Sync {
    /// Send one query
    ///
    /// # Errors
    ///
    /// Returns error if the query could not be handed to the network.
    fn send(&self, query: &DirectoryQuery) -> impl Future<Output = Result<(), QueryError>> + Send;
}

impl<T: DirectoryTransport> DirectoryTransport for Arc<T> {
    fn send(&self, query: &DirectoryQuery) -> impl Future<Output = Result<(), QueryError>> + Send {
        (**self).send(query)
    }
}

type PendingMap = DashMap<QueryId, oneshot::Sender<DirectoryReply>>;

/// Registered response collector, removed from the pending map on drop
struct Collector<'a> {
    pending: &'a PendingMap,
    id: QueryId,
}

impl<'a> Collector<'a> {
    fn register(pending: &'a PendingMap, id: QueryId) -> (Self, oneshot::Receiver<DirectoryReply>) {
        let (tx, rx) = oneshot::channel();
        pending.insert(id, tx);
        (Self { pending, id }, rx)
    }
}

impl Drop for Collector<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

/// Bounded request/reply client over a [`DirectoryTransport`]
pub struct DirectoryClient<T> {
    transport: T,
    pending: PendingMap,
    next_id: AtomicU64,
    reply_timeout: Duration,
}

impl<T: DirectoryTransport> DirectoryClient<T> {
    /// Create a client with a fixed per-query reply timeout
    #[must_use]
    pub fn new(transport: T, reply_timeout: Duration) -> Self {
        Self {
            transport,
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
            reply_timeout,
        }
    }

    /// Per-query reply timeout
    #[must_use]
    pub fn reply_timeout(&self) -> Duration {
        self.reply_timeout
    }

    /// Underlying transport
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Number of collectors waiting for a reply
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Query `to` and wait for its children
    ///
    /// The whole exchange, send included, is bounded by the reply timeout.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Timeout`] if no reply arrives in time, or the
    /// transport / remote error otherwise.
    pub async fn query(
        &self,
        to: &NodeIdentity,
        kind: QueryKind,
    ) -> Result<Vec<ChildRef>, QueryError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (_collector, rx) = Collector::register(&self.pending, id);

        let query = DirectoryQuery {
            id,
            to: to.clone(),
            kind,
        };

        let exchange = async {
            self.transport.send(&query).await?;
            let reply = rx.await.map_err(|_| QueryError::Closed)?;
            Ok::<_, QueryError>(reply)
        };

        let reply = time::timeout(self.reply_timeout, exchange)
            .await
            .map_err(|_| QueryError::Timeout)??;

        reply.into_children()
    }

    /// Route a reply to its waiting collector
    ///
    /// Returns `false` if nobody waits for the reply's id (late or unknown).
    pub fn deliver(&self, reply: DirectoryReply) -> bool {
        match self.pending.remove(&reply.id) {
            Some((_, tx)) => tx.send(reply).is_ok(),
            None => {
                tracing::debug!("Dropping reply {} with no waiting collector", reply.id);
                false
            }
        }
    }
}

impl<T: DirectoryTransport + 'static> DirectoryClient<T> {
    /// Start background reply routing
    ///
    /// The task ends when the reply channel closes or the client is dropped.
    pub fn spawn_dispatcher(
        self: &Arc<Self>,
        mut replies: mpsc::UnboundedReceiver<DirectoryReply>,
    ) -> JoinHandle<()> {
        let client = Arc::downgrade(self);

        tokio::spawn(async move {
            while let Some(reply) = replies.recv().await {
                let Some(client) = client.upgrade() else {
                    break;
                };
                client.deliver(reply);
            }
            tracing::debug!("Directory reply dispatcher stopped");
        })
    }
}
