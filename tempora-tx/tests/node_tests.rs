//! # End-to-End Node Tests
//!
//! Submission → log → consume loop → bitemporal queries, including
//! eviction, CAS failures, replay determinism and compaction tolerance.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use tempora_core::config::Config;
use tempora_core::traits::KvStore;
use tempora_core::types::{ContentHash, Document, EntityId, Timestamp};
use tempora_core::value::Value;
use tempora_storage::MemKv;
use tempora_tx::{Node, SubmitOp};

fn config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.log.data_dir = dir.path().to_path_buf();
    config.indexer.poll_timeout = Duration::from_millis(50);
    config
}

async fn open_node(dir: &TempDir, kv: Arc<MemKv>) -> Node {
    Node::open(kv as Arc<dyn KvStore>, config(dir)).await.unwrap()
}

fn person(keyword: &str, first_name: &str, surname: &str) -> Document {
    Document::new(EntityId::from_keyword(keyword))
        .with("firstName", first_name)
        .with("surname", surname)
}

fn put(doc: Document) -> SubmitOp {
    SubmitOp::Put { doc, business_time: None }
}

fn now() -> Timestamp {
    Timestamp::now()
}

#[tokio::test]
async fn test_put_then_entity_as_of() {
    let dir = TempDir::new().unwrap();
    let node = open_node(&dir, Arc::new(MemKv::new())).await;

    let picasso = EntityId::from_keyword(":person/picasso");
    node.submit_tx(vec![put(person(":person/picasso", "Pablo", "Picasso"))])
        .await
        .unwrap();
    node.catch_up().await.unwrap();

    let doc = node.entity_as_of(&picasso, now(), now()).unwrap().unwrap();
    assert_eq!(doc.get("firstName"), Some(&Value::from("Pablo")));
    assert_eq!(doc.get("surname"), Some(&Value::from("Picasso")));

    // An entity never asserted reads as absent
    let stranger = EntityId::from_keyword(":person/stranger");
    assert!(node.entity_as_of(&stranger, now(), now()).unwrap().is_none());
}

#[tokio::test]
async fn test_one_tx_three_docs_counts_and_tx_log() {
    let dir = TempDir::new().unwrap();
    let node = open_node(&dir, Arc::new(MemKv::new())).await;

    let receipt = node
        .submit_tx(vec![
            put(person(":p/a", "A", "One")),
            put(person(":p/b", "B", "Two")),
            put(person(":p/c", "C", "Three")),
        ])
        .await
        .unwrap();

    let report = node.consume_and_index().await.unwrap();
    assert_eq!(report.txs, 1);
    assert_eq!(report.docs, 3);

    let report = node.consume_and_index().await.unwrap();
    assert_eq!(report.txs, 0);
    assert_eq!(report.docs, 0);

    let txs: Vec<_> = node.tx_log(None).unwrap().map(|t| t.unwrap()).collect();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].tx_id, receipt.tx_id);
    assert_eq!(txs[0].tx_time, receipt.tx_time);
    assert_eq!(txs[0].ops.len(), 3);
}

#[tokio::test]
async fn test_later_put_shadows_earlier() {
    let dir = TempDir::new().unwrap();
    let node = open_node(&dir, Arc::new(MemKv::new())).await;
    let eid = EntityId::from_keyword(":person/ada");

    node.submit_tx(vec![put(person(":person/ada", "Ada", "Lovelace"))])
        .await
        .unwrap();
    node.catch_up().await.unwrap();
    let between = now();
    tokio::time::sleep(Duration::from_millis(5)).await;

    node.submit_tx(vec![put(
        Document::new(eid).with("firstName", "Augusta").with("surname", "King"),
    )])
    .await
    .unwrap();
    node.catch_up().await.unwrap();

    let latest = node.entity_as_of(&eid, now(), now()).unwrap().unwrap();
    assert_eq!(latest.get("firstName"), Some(&Value::from("Augusta")));

    // As-of a transaction time between the two puts sees the first
    let earlier = node.entity_as_of(&eid, between, between).unwrap().unwrap();
    assert_eq!(earlier.get("firstName"), Some(&Value::from("Ada")));

    let history: Vec<_> = node.entity_history(&eid).map(|v| v.unwrap()).collect();
    assert_eq!(history.len(), 2);
    assert!(history[0].tx_id > history[1].tx_id);
}

#[tokio::test]
async fn test_explicit_business_time() {
    let dir = TempDir::new().unwrap();
    let node = open_node(&dir, Arc::new(MemKv::new())).await;
    let eid = EntityId::from_keyword(":sensor/1");

    let asserted_at = Timestamp::from_millis(1_600_000_000_000);
    node.submit_tx(vec![SubmitOp::Put {
        doc: Document::new(eid).with("reading", 42i64),
        business_time: Some(asserted_at),
    }])
    .await
    .unwrap();
    node.catch_up().await.unwrap();

    // Visible at and after the asserted business time
    assert!(node.entity_as_of(&eid, asserted_at, now()).unwrap().is_some());
    assert!(node
        .entity_as_of(&eid, Timestamp::from_millis(1_600_000_000_001), now())
        .unwrap()
        .is_some());
    // Not before it
    assert!(node
        .entity_as_of(&eid, Timestamp::from_millis(1_599_999_999_999), now())
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_delete_hides_entity_from_later_times() {
    let dir = TempDir::new().unwrap();
    let node = open_node(&dir, Arc::new(MemKv::new())).await;
    let eid = EntityId::from_keyword(":person/gone");

    node.submit_tx(vec![put(person(":person/gone", "Here", "Now"))])
        .await
        .unwrap();
    node.catch_up().await.unwrap();
    let while_alive = now();
    tokio::time::sleep(Duration::from_millis(5)).await;

    node.submit_tx(vec![SubmitOp::Delete { eid, business_time: None }])
        .await
        .unwrap();
    node.catch_up().await.unwrap();

    assert!(node.entity_as_of(&eid, now(), now()).unwrap().is_none());
    // The pre-delete coordinate still sees the document
    assert!(node
        .entity_as_of(&eid, while_alive, while_alive)
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_cas_mismatch_advances_offset_without_writes() {
    let dir = TempDir::new().unwrap();
    let node = open_node(&dir, Arc::new(MemKv::new())).await;
    let eid = EntityId::from_keyword(":acct/1");

    node.submit_tx(vec![put(Document::new(eid).with("balance", 100i64))])
        .await
        .unwrap();
    node.catch_up().await.unwrap();

    // Wrong expected hash: the whole transaction is recorded failed
    let bogus = ContentHash::of_bytes(b"not the current doc");
    let receipt = node
        .submit_tx(vec![SubmitOp::Cas {
            expected: bogus,
            doc: Document::new(eid).with("balance", 0i64),
            business_time: None,
        }])
        .await
        .unwrap();
    node.catch_up().await.unwrap();

    assert!(node.tx_failed(receipt.tx_id).unwrap());
    let doc = node.entity_as_of(&eid, now(), now()).unwrap().unwrap();
    assert_eq!(doc.get("balance"), Some(&Value::Long(100)));

    // A fresh consume cycle reports nothing left to do: offset advanced
    let report = node.consume_and_index().await.unwrap();
    assert_eq!(report.txs, 0);
    assert_eq!(report.docs, 0);
}

#[tokio::test]
async fn test_cas_match_swaps_document() {
    let dir = TempDir::new().unwrap();
    let node = open_node(&dir, Arc::new(MemKv::new())).await;
    let eid = EntityId::from_keyword(":acct/2");

    let original = Document::new(eid).with("balance", 100i64);
    let expected = original.content_hash().unwrap();
    node.submit_tx(vec![put(original)]).await.unwrap();
    node.catch_up().await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let receipt = node
        .submit_tx(vec![SubmitOp::Cas {
            expected,
            doc: Document::new(eid).with("balance", 250i64),
            business_time: None,
        }])
        .await
        .unwrap();
    node.catch_up().await.unwrap();

    assert!(!node.tx_failed(receipt.tx_id).unwrap());
    let doc = node.entity_as_of(&eid, now(), now()).unwrap().unwrap();
    assert_eq!(doc.get("balance"), Some(&Value::Long(250)));
}

#[tokio::test]
async fn test_evict_then_replay_on_fresh_kv() {
    let dir = TempDir::new().unwrap();
    let (e1, e2, e3) = (
        EntityId::from_keyword(":p/1"),
        EntityId::from_keyword(":p/2"),
        EntityId::from_keyword(":p/3"),
    );

    {
        let node = open_node(&dir, Arc::new(MemKv::new())).await;
        node.submit_tx(vec![put(person(":p/1", "First", "Doomed"))])
            .await
            .unwrap();
        node.submit_tx(vec![put(person(":p/2", "Second", "Kept"))])
            .await
            .unwrap();
        node.catch_up().await.unwrap();

        node.submit_tx(vec![SubmitOp::Evict { eid: e1 }]).await.unwrap();
        node.submit_tx(vec![put(person(":p/3", "Third", "Later"))])
            .await
            .unwrap();
        node.catch_up().await.unwrap();

        assert!(node.entity_as_of(&e1, now(), now()).unwrap().is_none());
        assert!(node.entity_as_of(&e2, now(), now()).unwrap().is_some());
        assert!(node.entity_as_of(&e3, now(), now()).unwrap().is_some());

        // Every historical version of the evicted entity points at the
        // tombstone, so its history resolves to nothing visible
        for version in node.entity_history(&e1) {
            assert!(version.unwrap().content_hash.is_nil());
        }
    }

    // A brand-new KV store replaying the shared log converges to the same
    // visible state, the evicted document's bytes never coming back
    let node = open_node(&dir, Arc::new(MemKv::new())).await;
    node.catch_up().await.unwrap();

    assert!(node.entity_as_of(&e1, now(), now()).unwrap().is_none());
    let doc2 = node.entity_as_of(&e2, now(), now()).unwrap().unwrap();
    assert_eq!(doc2.get("firstName"), Some(&Value::from("Second")));
    let doc3 = node.entity_as_of(&e3, now(), now()).unwrap().unwrap();
    assert_eq!(doc3.get("firstName"), Some(&Value::from("Third")));
}

#[tokio::test]
async fn test_replay_twice_yields_identical_kv_state() {
    let dir = TempDir::new().unwrap();

    {
        let node = open_node(&dir, Arc::new(MemKv::new())).await;
        node.submit_tx(vec![
            put(person(":r/a", "A", "A")),
            put(person(":r/b", "B", "B")),
        ])
        .await
        .unwrap();
        node.submit_tx(vec![SubmitOp::Delete {
            eid: EntityId::from_keyword(":r/a"),
            business_time: None,
        }])
        .await
        .unwrap();
        node.submit_tx(vec![put(person(":r/c", "C", "C"))]).await.unwrap();
    }

    let kv_a = Arc::new(MemKv::new());
    {
        let node = open_node(&dir, Arc::clone(&kv_a)).await;
        node.catch_up().await.unwrap();
    }

    let kv_b = Arc::new(MemKv::new());
    {
        let node = open_node(&dir, Arc::clone(&kv_b)).await;
        node.catch_up().await.unwrap();
    }

    assert!(!kv_a.is_empty());
    assert_eq!(kv_a.dump(), kv_b.dump());
}

#[tokio::test]
async fn test_reindex_after_compaction() {
    let dir = TempDir::new().unwrap();
    let mut cfg = config(&dir);
    // Tiny segments so eviction tombstones land in sealed segments
    cfg.log.segment_max_size = 200;

    let (doomed, kept) = (
        EntityId::from_keyword(":c/doomed"),
        EntityId::from_keyword(":c/kept"),
    );

    {
        let kv = Arc::new(MemKv::new());
        let node = Node::open(kv as Arc<dyn KvStore>, cfg.clone()).await.unwrap();
        node.submit_tx(vec![put(person(":c/doomed", "Will", "Vanish"))])
            .await
            .unwrap();
        node.submit_tx(vec![put(person(":c/kept", "Will", "Stay"))])
            .await
            .unwrap();
        node.catch_up().await.unwrap();
        node.submit_tx(vec![SubmitOp::Evict { eid: doomed }]).await.unwrap();
        node.catch_up().await.unwrap();

        // Compaction physically drops the evicted document's record,
        // retaining its tombstone
        node.compact_doc_topic().unwrap();
    }

    // Reindexing the retained records + full tx topic converges: the
    // pending put of the vanished document resolves via its tombstone
    let kv = Arc::new(MemKv::new());
    let node = Node::open(kv as Arc<dyn KvStore>, cfg).await.unwrap();
    node.catch_up().await.unwrap();

    assert!(node.entity_as_of(&doomed, now(), now()).unwrap().is_none());
    let doc = node.entity_as_of(&kept, now(), now()).unwrap().unwrap();
    assert_eq!(doc.get("surname"), Some(&Value::from("Stay")));
}

#[tokio::test]
async fn test_offsets_survive_node_restart() {
    let dir = TempDir::new().unwrap();
    let kv = Arc::new(MemKv::new());

    {
        let node = open_node(&dir, Arc::clone(&kv)).await;
        node.submit_tx(vec![put(person(":o/1", "Only", "Once"))])
            .await
            .unwrap();
        node.catch_up().await.unwrap();
    }

    // Same KV store, new node: committed offsets mean nothing replays
    let node = open_node(&dir, Arc::clone(&kv)).await;
    let report = node.consume_and_index().await.unwrap();
    assert_eq!(report.txs, 0);
    assert_eq!(report.docs, 0);

    let eid = EntityId::from_keyword(":o/1");
    assert!(node.entity_as_of(&eid, now(), now()).unwrap().is_some());
}

#[tokio::test]
async fn test_attribute_range_through_node() {
    let dir = TempDir::new().unwrap();
    let node = open_node(&dir, Arc::new(MemKv::new())).await;

    for (kw, age) in [(":a/1", 25i64), (":a/2", 35), (":a/3", 45)] {
        node.submit_tx(vec![put(Document::new(EntityId::from_keyword(kw)).with("age", age))])
            .await
            .unwrap();
    }
    node.catch_up().await.unwrap();

    let hits: Vec<_> = node
        .attribute_range("age", &Value::Long(30), &Value::Long(50))
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(hits.len(), 2);
}
