//! Integration tests for the `Dragonfly` field store.
//!
//! These tests require a live Dragonfly (or Redis) instance. Run with:
//!
//! ```bash
//! docker run -d -p 6379:6379 docker.dragonflydb.io/dragonflydb/dragonfly
//! cargo test -p fluxgrid-store -- --ignored
//! ```
//!
//! All tests are marked `#[ignore]` so they are skipped during normal
//! `cargo test` runs.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::missing_panics_doc)]

use fluxgrid_store::{DragonflyStore, FieldStore, StoreError};

/// Dragonfly connection URL for the local Docker instance.
const DRAGONFLY_URL: &str = "redis://localhost:6379";

async fn connect_clean() -> DragonflyStore {
    let store = DragonflyStore::connect(DRAGONFLY_URL)
        .await
        .expect("Failed to connect to Dragonfly -- is Docker running?");
    store.clear().await.expect("Failed to clear");
    store
}

#[tokio::test]
#[ignore = "requires live Dragonfly instance"]
async fn dragonfly_field_roundtrip() {
    let store = connect_clean().await;

    store
        .set_field("machine:a", "energy", 42)
        .await
        .expect("Failed to set field");
    assert_eq!(
        store.get_field("machine:a", "energy").await.expect("get"),
        Some(42)
    );
    assert_eq!(store.get_field("machine:a", "missing").await.expect("get"), None);

    store
        .remove_field("machine:a", "energy")
        .await
        .expect("Failed to remove field");
    assert_eq!(store.get_field("machine:a", "energy").await.expect("get"), None);

    store.clear().await.expect("Failed to clear");
}

#[tokio::test]
#[ignore = "requires live Dragonfly instance"]
async fn dragonfly_empty_group_survives() {
    let store = connect_clean().await;

    store.ensure_group("network:n").await.expect("ensure");
    store.ensure_group("network:n").await.expect("ensure twice");
    assert!(store.group_exists("network:n").await.expect("exists"));
    assert_eq!(
        store.list_groups().await.expect("list"),
        vec!["network:n".to_owned()]
    );

    store.delete_group("network:n").await.expect("delete");
    assert!(!store.group_exists("network:n").await.expect("exists"));

    store.clear().await.expect("Failed to clear");
}

#[tokio::test]
#[ignore = "requires live Dragonfly instance"]
async fn dragonfly_rejects_out_of_range() {
    let store = connect_clean().await;

    let result = store.set_field("machine:a", "energy", i64::MAX).await;
    assert!(matches!(result, Err(StoreError::ValueOutOfRange { .. })));
    assert!(!store.group_exists("machine:a").await.expect("exists"));

    store.clear().await.expect("Failed to clear");
}

#[tokio::test]
#[ignore = "requires live Dragonfly instance"]
async fn dragonfly_reads_whole_group() {
    let store = connect_clean().await;

    store.set_field("machine:b", "x", -3).await.expect("set");
    store.set_field("machine:b", "link:c", 2).await.expect("set");

    let fields = store.fields("machine:b").await.expect("fields");
    assert_eq!(fields.get("x"), Some(&-3));
    assert_eq!(fields.get("link:c"), Some(&2));
    assert_eq!(
        store.list_fields("machine:b").await.expect("names"),
        vec!["link:c".to_owned(), "x".to_owned()]
    );

    store.clear().await.expect("Failed to clear");
}
