//! Contract Test: Lease File to Store
//!
//! This test verifies that one sync pass mirrors the lease file into both
//! store namespaces.
//!
//! Constraints verified:
//! - One record key and one heartbeat key per (name, address)
//! - Same name with different addresses yields distinct keys
//! - Repeated syncs converge to the same key set
//! - A change event drives a sync through the watcher
//!
//! If this test fails, someone has changed:
//! - The key layout consumed by the DNS resolver
//! - The record payload schema
//! - Lease identity (name + address)

mod common;

use common::*;
use leasedns_core::backend::HostEntry;
use leasedns_core::{LeaseParser, LeaseSync, MemoryKvStore, TimeoutGroup, coordinate_watcher};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const LEASES: [(&str, &str); 4] = [
    ("test1", "1.1.1.1"),
    ("test2", "2001:db8::2"),
    ("test3", "1.1.1.3"),
    ("test3", "1.1.2.3"),
];

async fn keys(store: &MemoryKvStore) -> (HashSet<String>, HashSet<String>) {
    let records = store.keys_with_prefix(ZONE).await.into_iter().collect();
    let heartbeats = store.keys_with_prefix(HEARTBEAT).await.into_iter().collect();
    (records, heartbeats)
}

#[tokio::test]
async fn one_sync_writes_four_records_and_four_heartbeats() {
    let file = lease_file(&LEASES);
    let store = MemoryKvStore::new();
    let sync = LeaseSync::new(file.path(), backend(Arc::new(store.clone()), Duration::from_secs(60)));

    sync.sync(&CancellationToken::new()).await;

    let (records, heartbeats) = keys(&store).await;
    let expected_records: HashSet<String> = [
        "/skydns/lan/test1/01010101",
        "/skydns/lan/test2/20010db8000000000000000000000002",
        "/skydns/lan/test3/01010103",
        "/skydns/lan/test3/01010203",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    assert_eq!(records, expected_records);
    assert_eq!(heartbeats.len(), 4);
    for record in &records {
        let heartbeat = record.replacen("/skydns/lan/", HEARTBEAT, 1);
        assert!(heartbeats.contains(&heartbeat), "missing heartbeat {heartbeat}");
    }

    let payload = store.get("/skydns/lan/test2/20010db8000000000000000000000002").await.unwrap();
    let entry: HostEntry = serde_json::from_str(&payload).unwrap();
    assert_eq!(entry.host, "2001:db8::2");
    assert_eq!(entry.group, "test2");
    assert_eq!(entry.ttl, 60);
}

#[tokio::test]
async fn repeated_sync_converges() {
    let file = lease_file(&LEASES);
    let store = MemoryKvStore::new();
    let sync = LeaseSync::new(file.path(), backend(Arc::new(store.clone()), Duration::from_secs(60)));

    sync.sync(&CancellationToken::new()).await;
    let first = keys(&store).await;
    sync.sync(&CancellationToken::new()).await;
    let second = keys(&store).await;

    assert_eq!(first, second);
    assert_eq!(store.len().await, 8);
}

#[tokio::test]
async fn extractor_is_idempotent() {
    let file = lease_file(&LEASES);
    let parser = LeaseParser::new();

    let first: HashSet<_> = parser.parse_file(file.path()).await.unwrap().into_iter().collect();
    let second: HashSet<_> = parser.parse_file(file.path()).await.unwrap().into_iter().collect();

    assert_eq!(first, second);
    assert_eq!(first.len(), 4);
}

#[tokio::test]
async fn change_event_drives_sync() {
    let file = lease_file(&LEASES);
    let store = Arc::new(CountingKvStore::new());
    let (source, events) = ControlledChangeSource::new();
    let cancel = CancellationToken::new();
    let group = TimeoutGroup::new();

    coordinate_watcher(
        &cancel,
        file.path(),
        backend(store.clone(), Duration::from_secs(60)),
        &source,
        &group,
    )
    .expect("watch established");

    events.send(modified(file.path())).unwrap();
    assert!(wait_until(Duration::from_secs(5), || async { store.inner.len().await == 8 }).await);

    cancel.cancel();
    group.wait_with_timeout(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn missing_lease_file_writes_nothing() {
    let store = MemoryKvStore::new();
    let sync = LeaseSync::new(missing_file(), backend(Arc::new(store.clone()), Duration::from_secs(60)));

    sync.sync(&CancellationToken::new()).await;

    assert!(store.is_empty().await);
}
