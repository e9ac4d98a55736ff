//! Sorted multi-get across several servers

mod common;

use common::{config_for, FakeServer};
use pipecache::smget::{BKey, BKeyRange, SMGetMode, SMGetStatus};
use pipecache::{CacheClient, CacheError, StringTranscoder};

fn keys(names: &[&str]) -> Vec<String> {
    names.iter().map(|k| k.to_string()).collect()
}

async fn seeded_pair() -> (FakeServer, FakeServer) {
    let first = FakeServer::start().await;
    let second = FakeServer::start().await;
    // the same data on both so routing does not matter
    for server in [&first, &second] {
        server.add_collection("feed:a", &[(1, "a1"), (3, "a3"), (7, "a7")]);
        server.add_collection("feed:b", &[(2, "b2"), (3, "b3"), (8, "b8")]);
        server.add_collection("feed:c", &[(5, "c5"), (6, "c6")]);
    }
    (first, second)
}

fn bkeys(response: &pipecache::SMGetResponse<String>) -> Vec<u64> {
    response
        .elements
        .iter()
        .map(|e| match e.bkey {
            BKey::Long(n) => n,
            BKey::Bytes(_) => panic!("unexpected byte bkey"),
        })
        .collect()
}

#[tokio::test]
async fn test_ascending_merge_with_duplicates() {
    let (first, second) = seeded_pair().await;
    let client = CacheClient::connect(config_for(&[&first, &second])).expect("client");

    let future = client
        .smget(
            &keys(&["feed:a", "feed:b", "feed:c"]),
            BKeyRange::new(0u64, 100u64),
            5,
            SMGetMode::Duplicate,
            StringTranscoder,
        )
        .await
        .unwrap();
    let response = future.get().await.unwrap();

    assert_eq!(bkeys(&response), vec![1, 2, 3, 3, 5]);
    let values: Vec<_> = response.elements.iter().map(|e| e.value.as_str()).collect();
    assert_eq!(values, vec!["a1", "b2", "a3", "b3", "c5"]);
    assert_eq!(response.status, SMGetStatus::Duplicated);
    assert!(response.missed.is_empty());

    client.shutdown().await;
}

#[tokio::test]
async fn test_descending_unique_merge() {
    let (first, second) = seeded_pair().await;
    let client = CacheClient::connect(config_for(&[&first, &second])).expect("client");

    let response = client
        .smget(
            &keys(&["feed:a", "feed:b", "feed:c"]),
            BKeyRange::new(100u64, 0u64),
            4,
            SMGetMode::Unique,
            StringTranscoder,
        )
        .await
        .unwrap()
        .get()
        .await
        .unwrap();

    assert_eq!(bkeys(&response), vec![8, 7, 6, 5]);
    assert_eq!(response.status, SMGetStatus::End);

    client.shutdown().await;
}

#[tokio::test]
async fn test_missing_collections_are_reported() {
    let (first, second) = seeded_pair().await;
    let client = CacheClient::connect(config_for(&[&first, &second])).expect("client");

    let response = client
        .smget(
            &keys(&["feed:a", "feed:zz", "feed:yy"]),
            BKeyRange::new(0u64, 100u64),
            10,
            SMGetMode::Duplicate,
            StringTranscoder,
        )
        .await
        .unwrap()
        .get()
        .await
        .unwrap();

    assert_eq!(bkeys(&response), vec![1, 3, 7]);
    let mut missed = response.missed_keys();
    missed.sort();
    assert_eq!(missed, vec!["feed:yy", "feed:zz"]);

    client.shutdown().await;
}

#[tokio::test]
async fn test_legacy_offset_paging() {
    let (first, second) = seeded_pair().await;
    let client = CacheClient::connect(config_for(&[&first, &second])).expect("client");
    let all = keys(&["feed:a", "feed:b", "feed:c"]);

    let page = client
        .smget_legacy(
            &all,
            BKeyRange::new(0u64, 100u64),
            2,
            3,
            SMGetMode::Duplicate,
            StringTranscoder,
        )
        .await
        .unwrap()
        .get()
        .await
        .unwrap();

    // 1, 2 are skipped
    assert_eq!(bkeys(&page), vec![3, 3, 5]);

    client.shutdown().await;
}

#[tokio::test]
async fn test_invalid_requests_rejected() {
    let server = FakeServer::start().await;
    let client = CacheClient::connect(server.config()).expect("client");
    let range = BKeyRange::new(0u64, 10u64);

    let empty = client
        .smget::<String, _>(&[], range.clone(), 10, SMGetMode::Duplicate, StringTranscoder)
        .await;
    assert!(matches!(empty, Err(CacheError::InvalidArgument(_))));

    let duplicate = client
        .smget::<String, _>(
            &keys(&["feed:a", "feed:a"]),
            range.clone(),
            10,
            SMGetMode::Duplicate,
            StringTranscoder,
        )
        .await;
    assert!(matches!(duplicate, Err(CacheError::InvalidArgument(_))));

    let too_many = client
        .smget::<String, _>(
            &keys(&["feed:a"]),
            range,
            pipecache::smget::MAX_SMGET_COUNT + 1,
            SMGetMode::Duplicate,
            StringTranscoder,
        )
        .await;
    assert!(matches!(too_many, Err(CacheError::InvalidArgument(_))));

    client.shutdown().await;
}

#[tokio::test]
async fn test_silent_shard_times_out() {
    let server = FakeServer::start().await;
    server.add_collection("feed:a", &[(1, "a1")]);
    server.hold_sort_range();
    let mut config = server.config();
    config.op_timeout_ms = 100;
    let client = CacheClient::connect(config).expect("client");

    let future = client
        .smget(
            &keys(&["feed:a"]),
            BKeyRange::new(0u64, 10u64),
            10,
            SMGetMode::Duplicate,
            StringTranscoder,
        )
        .await
        .unwrap();
    let err = future.get().await.unwrap_err();
    assert!(err.is_timeout());
    assert!(future.status().is_none());

    client.shutdown().await;
}
