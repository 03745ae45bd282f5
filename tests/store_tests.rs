// Persistent store integration tests
// Author: kelexine (https://github.com/kelexine)

use bytes::Bytes;
use chrono::{Duration, TimeZone, Utc};
use imgcache::cache::{normalize_url, CacheEntry, CacheKey, KeyStrategy};
use imgcache::store::{DiskStore, PersistentStore};
use proptest::prelude::*;

fn entry(key: &str, payload: &'static [u8]) -> CacheEntry {
    let stored_at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
    CacheEntry::new(
        CacheKey::new(key),
        Bytes::from_static(payload),
        format!("https://cdn.example.com/{}?v=1", key),
        stored_at,
    )
    .unwrap()
    .with_content_type(Some("image/png".to_string()))
}

#[tokio::test]
async fn test_overwrite_replaces_whole_entry() {
    let dir = tempfile::tempdir().unwrap();
    let store = DiskStore::new(dir.path().join("store"));

    store.put(&entry("a.png", b"first")).await.unwrap();
    let replacement = entry("a.png", b"second payload").with_content_type(None);
    store.put(&replacement).await.unwrap();

    let loaded = store.get(&CacheKey::new("a.png")).await.unwrap().unwrap();
    assert_eq!(&loaded.payload[..], b"second payload");
    assert_eq!(loaded.content_type, None);
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_entries_carry_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let store = DiskStore::new(dir.path());

    let expiring = entry("b.png", b"bbbb").with_retention(Duration::days(7));
    store.put(&entry("a.png", b"aa")).await.unwrap();
    store.put(&expiring).await.unwrap();

    let mut listed = store.entries().await.unwrap();
    listed.sort_by(|x, y| x.key.cmp(&y.key));
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].key.as_str(), "a.png");
    assert_eq!(listed[0].size, 2);
    assert_eq!(listed[0].expires_at, None);
    assert_eq!(listed[1].source_url, "https://cdn.example.com/b.png?v=1");
    assert_eq!(listed[1].expires_at, expiring.expires_at);
    assert_eq!(listed[1].stored_at, expiring.stored_at);
}

#[tokio::test]
async fn test_delete_keeps_content_shared_by_another_key() {
    let dir = tempfile::tempdir().unwrap();
    let store = DiskStore::new(dir.path());

    store.put(&entry("one.png", b"same bytes")).await.unwrap();
    store.put(&entry("two.png", b"same bytes")).await.unwrap();
    store.delete(&CacheKey::new("one.png")).await.unwrap();

    assert!(store.get(&CacheKey::new("one.png")).await.unwrap().is_none());
    let survivor = store.get(&CacheKey::new("two.png")).await.unwrap().unwrap();
    assert_eq!(&survivor.payload[..], b"same bytes");
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_destroy_removes_everything() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("store");
    let store = DiskStore::new(&root);

    store.put(&entry("a.png", b"aa")).await.unwrap();
    store.destroy().await.unwrap();
    assert!(!root.exists());

    // A second destroy on a missing container is fine
    store.destroy().await.unwrap();
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_two_handles_see_the_same_data() {
    let dir = tempfile::tempdir().unwrap();
    let writer = DiskStore::new(dir.path());
    let reader = DiskStore::new(dir.path());

    writer.put(&entry("shared.png", b"data")).await.unwrap();
    let loaded = reader.get(&CacheKey::new("shared.png")).await.unwrap().unwrap();
    assert_eq!(loaded.source_url, "https://cdn.example.com/shared.png?v=1");
}

proptest! {
    #[test]
    fn test_query_and_fragment_never_change_the_key(
        path in "[a-z]{1,8}(/[a-z0-9]{1,8}){0,3}\\.png",
        query in "[a-z]{1,5}=[a-z0-9]{1,5}",
    ) {
        let bare = format!("https://cdn.example.com/{}", path);
        let decorated = format!("{}?{}#frag", bare, query);
        for strategy in [KeyStrategy::FullPath, KeyStrategy::FileName] {
            prop_assert_eq!(
                CacheKey::derive(&bare, strategy),
                CacheKey::derive(&decorated, strategy)
            );
        }
        prop_assert!(!normalize_url(&decorated).contains('?'));
    }
}
