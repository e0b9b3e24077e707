//! End-to-end discovery over the UDP directory transport

use relayscout_discovery::directory::{DirectoryMessage, DirectoryReply, QueryKind, WireItem};
use relayscout_discovery::{
    ConnectionContext, DirectoryClient, DiscoveryConfig, DiscoveryOrchestrator, NoRoster,
    NodeIdentity, RunState, TrackerEntry, UdpDirectoryTransport,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

/// Directory tables served by the test gateway
#[derive(Clone, Default)]
struct Directory {
    services: HashMap<String, Vec<WireItem>>,
    items: HashMap<String, Vec<WireItem>>,
}

impl Directory {
    fn services(mut self, node: &str, children: Vec<WireItem>) -> Self {
        self.services.insert(node.to_string(), children);
        self
    }

    fn items(mut self, node: &str, children: Vec<WireItem>) -> Self {
        self.items.insert(node.to_string(), children);
        self
    }
}

/// Gateway routing each query to the directory table; unknown nodes stay silent
async fn spawn_gateway(directory: Directory) -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();

    tokio::spawn(async move {
        let mut buf = vec![0u8; 65_536];
        loop {
            let Ok((len, from)) = socket.recv_from(&mut buf).await else {
                break;
            };
            let Ok(DirectoryMessage::Query(query)) = DirectoryMessage::from_bytes(&buf[..len])
            else {
                continue;
            };
            let table = match query.kind {
                QueryKind::Services => &directory.services,
                QueryKind::Items => &directory.items,
            };
            if let Some(children) = table.get(query.to.as_str()) {
                let reply =
                    DirectoryMessage::Reply(DirectoryReply::items(query.id, children.clone()));
                let _ = socket.send_to(&reply.to_bytes().unwrap(), from).await;
            }
        }
    });

    addr
}

fn id(s: &str) -> NodeIdentity {
    NodeIdentity::parse(s).unwrap()
}

async fn orchestrator(
    directory: Directory,
    config: DiscoveryConfig,
) -> DiscoveryOrchestrator<UdpDirectoryTransport, NoRoster> {
    let gateway = spawn_gateway(directory).await;
    let (transport, replies) = UdpDirectoryTransport::connect(gateway).await.unwrap();
    let client = Arc::new(DirectoryClient::new(transport, Duration::from_millis(300)));
    client.spawn_dispatcher(replies);

    let context = Arc::new(ConnectionContext::new(
        id("alice@example.org/laptop"),
        id("example.org"),
    ));
    DiscoveryOrchestrator::new(client, NoRoster, context, config)
}

#[tokio::test]
async fn test_discovery_over_udp_gateway() {
    let directory = Directory::default()
        .services(
            "tracker.example.net",
            vec![
                WireItem::relay("relay.example.net", "udp"),
                WireItem::tracker("tracker2.example.net"),
            ],
        )
        .services(
            "tracker2.example.net",
            vec![WireItem::relay("relay2.example.net", "udp")],
        )
        .items(
            "example.org",
            vec![WireItem::plain("relay.example.org"), WireItem::plain("muc.example.org")],
        )
        .services(
            "relay.example.org",
            vec![WireItem::relay("relay.example.org", "udp")],
        )
        .services("muc.example.org", vec![])
        .services("relay.example.net", vec![])
        .services("relay2.example.net", vec![]);

    let config = DiscoveryConfig {
        search_prefixes: "relay".to_string(),
        ..DiscoveryConfig::default()
    };
    let orch = orchestrator(directory, config)
        .await
        .with_trackers(vec![TrackerEntry::trusted(id("tracker.example.net"))]);

    let report = orch.run().await;

    let found: Vec<&str> = report.relays.iter().map(|r| r.identity.as_str()).collect();
    assert_eq!(
        found,
        vec!["relay.example.net", "relay.example.org", "relay2.example.net"]
    );
    // stop-on-first: the prefixed item answered, muc and the server are skipped
    assert!(report.stopped_early);
    assert_eq!(report.stats.timed_out, 0);
    // tracker, relay, tracker2, relay2, domain items, relay.example.org
    assert_eq!(report.queries_used, 6);

    let table = orch.context().relay_table();
    assert_eq!(table.relay_count(), 3);
    assert!(table.get(&id("relay2.example.net")).is_some());
    assert_eq!(orch.context().state(), RunState::Idle);
}

#[tokio::test]
async fn test_unreachable_seeds_yield_empty_result() {
    // Nothing in the directory answers
    let orch = orchestrator(Directory::default(), DiscoveryConfig::default())
        .await
        .with_trackers(vec![TrackerEntry::trusted(id("gone.example.net"))]);

    let report = orch.run().await;

    assert!(report.relays.is_empty());
    assert!(!report.stopped_early);
    // tracker, domain items, server
    assert_eq!(report.stats.timed_out, 3);
    assert_eq!(orch.context().relay_table().relay_count(), 0);
}
