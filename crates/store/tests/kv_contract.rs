//! `KvStore` contract checks, run against `MemoryStore` through the trait
//! object the presence crate uses.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use futures::TryStreamExt;
use herald_store::{scan_pages, Command, KvStore, MemoryStore, Reply, StoreError};

fn store() -> Arc<dyn KvStore> {
    Arc::new(MemoryStore::new())
}

/// Keys that live through a whole scan are returned at least once, even when
/// other keys are written between pages.
#[tokio::test]
async fn scan_returns_stable_keys_despite_concurrent_writes() {
    let store = store();
    let batch: Vec<Command> = (0..30)
        .map(|i| Command::getset(format!("presenceContext/T1/U{i:02}/{{}}"), "{}"))
        .collect();
    store.exec(batch).await.unwrap();

    let mut seen = BTreeSet::new();
    let mut cursor = None;
    let mut extra = 0;
    loop {
        let page = store
            .scan(cursor.take(), "presenceContext/T1/*", 5)
            .await
            .unwrap();
        seen.extend(page.keys);

        store
            .exec(vec![Command::getset(format!("presenceContext/T1/new{extra}/{{}}"), "{}")])
            .await
            .unwrap();
        extra += 1;

        match page.next {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    for i in 0..30 {
        assert!(seen.contains(&format!("presenceContext/T1/U{i:02}/{{}}")));
    }
}

/// Scan patterns are matched against the whole key.
#[tokio::test]
async fn scan_pattern_is_anchored() {
    let store = store();
    store
        .exec(vec![
            Command::getset("presenceContext/T1/U1/{}", "{}"),
            Command::getset("presenceContext/T10/U1/{}", "{}"),
            Command::getset("presenceContextSeq/T1/U1", "3"),
        ])
        .await
        .unwrap();

    let keys: Vec<String> = scan_pages(store.as_ref(), "presenceContext/T1/*".into(), 2)
        .try_concat()
        .await
        .unwrap();
    assert_eq!(keys, vec!["presenceContext/T1/U1/{}".to_string()]);
}

/// An atomic batch returns one reply per command, in order.
#[tokio::test]
async fn batch_replies_are_positional() {
    let store = store();
    let replies = store
        .exec(vec![
            Command::getset("k", "a"),
            Command::expire("k", Duration::from_secs(30)),
            Command::incr("seq"),
            Command::expire("seq", Duration::from_secs(30)),
            Command::exists("k"),
            Command::get("k"),
            Command::del("k"),
        ])
        .await
        .unwrap();

    assert_eq!(
        replies,
        vec![
            Reply::Nil,
            Reply::Integer(1),
            Reply::Integer(1),
            Reply::Integer(1),
            Reply::Integer(1),
            Reply::Value("a".into()),
            Reply::Integer(1),
        ]
    );
    assert!(!store.exists("k").await.unwrap());
}

/// A failing command leaves every earlier command of the batch unapplied.
#[tokio::test]
async fn batch_failure_reports_the_failing_command() {
    let store = store();
    store.exec(vec![Command::getset("seq", "x")]).await.unwrap();

    let err = store
        .exec(vec![Command::getset("k", "a"), Command::incr("seq")])
        .await
        .unwrap_err();

    assert_matches!(err, StoreError::BatchAborted { index: 1, .. });
    assert_eq!(store.get("k").await.unwrap(), None);
}

/// Concurrent compare-and-delete calls on the same key: exactly one wins.
#[tokio::test]
async fn compare_and_delete_has_a_single_winner() {
    let store = store();
    store.exec(vec![Command::getset("k", "v")]).await.unwrap();

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.compare_and_delete("k", "v").await.unwrap() })
        })
        .collect();

    let mut wins = 0;
    for attempt in attempts {
        if attempt.await.unwrap() {
            wins += 1;
        }
    }
    assert_eq!(wins, 1);
}
