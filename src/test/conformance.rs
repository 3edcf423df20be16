//! Behaviour every [`CacheStore`] backend must share. Keys are made unique per run so the checks can be pointed at a
//! live shared server.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;
use crate::store::CacheStore;
use crate::store::MAX_TTL;
use crate::store::NEGATIVE_MARKER;
use crate::types::Lookup;

static RUN: AtomicU64 = AtomicU64::new(0);

const TTL: Duration = Duration::from_secs(60);

fn namespace() -> String {
    format!(
        "conformance-{}-{}",
        std::process::id(),
        RUN.fetch_add(1, Ordering::SeqCst)
    )
}

pub async fn run_all(store: Arc<dyn CacheStore>) {
    get_set_del(&*store).await;
    negative_markers(&*store).await;
    bulk(&*store).await;
    rejects_bad_input(&*store).await;
}

pub async fn get_set_del(store: &dyn CacheStore) {
    let ns = namespace();
    let key = format!("{ns}:1");

    assert_eq!(store.get(&key).await.unwrap(), Lookup::Miss);
    // Deleting nothing is fine.
    store.del(&key).await.unwrap();

    store.set(&key, br#"{"id":1}"#.to_vec(), TTL).await.unwrap();
    assert_eq!(store.get(&key).await.unwrap(), Lookup::Hit(br#"{"id":1}"#.to_vec()));

    store.set(&key, br#"{"id":1,"v":2}"#.to_vec(), TTL).await.unwrap();
    assert_eq!(store.get(&key).await.unwrap(), Lookup::Hit(br#"{"id":1,"v":2}"#.to_vec()));

    store.del(&key).await.unwrap();
    assert_eq!(store.get(&key).await.unwrap(), Lookup::Miss);
    store.del(&key).await.unwrap();
}

pub async fn negative_markers(store: &dyn CacheStore) {
    let ns = namespace();
    let key = format!("{ns}:1");

    store.set_negative(&key, TTL).await.unwrap();
    assert_eq!(store.get(&key).await.unwrap(), Lookup::Negative);

    // A value replaces the marker and vice versa.
    store.set(&key, b"{}".to_vec(), TTL).await.unwrap();
    assert!(store.get(&key).await.unwrap().is_hit());
    store.set_negative(&key, TTL).await.unwrap();
    assert!(store.get(&key).await.unwrap().is_negative());

    store.del(&key).await.unwrap();
    assert!(store.get(&key).await.unwrap().is_miss());
}

pub async fn bulk(store: &dyn CacheStore) {
    let ns = namespace();
    let keys = (1..=4).map(|i| format!("{ns}:{i}")).collect::<Vec<_>>();

    assert!(store.multi_get(&[]).await.unwrap().is_empty());
    store.multi_set(Vec::new(), TTL).await.unwrap();

    store
        .multi_set(
            vec![
                (keys[0].clone(), b"[1]".to_vec()),
                (keys[1].clone(), b"[2]".to_vec()),
            ],
            TTL,
        )
        .await
        .unwrap();
    store.set_negative(&keys[2], TTL).await.unwrap();

    let found = store.multi_get(&keys).await.unwrap();
    assert_eq!(found.len(), 2, "negative and absent keys are omitted: {found:?}");
    assert_eq!(found[&keys[0]], b"[1]".to_vec());
    assert_eq!(found[&keys[1]], b"[2]".to_vec());

    // The omitted ones are still told apart by a single-key probe.
    assert_eq!(store.get(&keys[2]).await.unwrap(), Lookup::Negative);
    assert_eq!(store.get(&keys[3]).await.unwrap(), Lookup::Miss);

    for key in &keys {
        store.del(key).await.unwrap();
    }
}

pub async fn rejects_bad_input(store: &dyn CacheStore) {
    let ns = namespace();
    let key = format!("{ns}:1");

    assert!(matches!(
        store.set(&key, b"{}".to_vec(), Duration::ZERO).await,
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        store.set_negative(&key, Duration::ZERO).await,
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        store.set(&key, b"{}".to_vec(), Duration::MAX).await,
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        store.multi_set(vec![(key.clone(), b"{}".to_vec())], MAX_TTL + Duration::from_secs(1)).await,
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        store.set(&key, NEGATIVE_MARKER.to_vec(), TTL).await,
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        store.set(&key, Vec::new(), TTL).await,
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(store.get(&key).await.unwrap(), Lookup::Miss);
}
