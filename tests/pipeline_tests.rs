use flate2::read::GzDecoder;
use pubsub_archive::config::{load_config_from_str, Config};
use pubsub_archive::ingress::Event;
use pubsub_archive::pipeline::Pipeline;
use pubsub_archive::storage::{LocalObjectStore, MemoryObjectStore, ObjectCreated, ObjectStore};
use pubsub_archive::writer::template::MAX_VALUE_BYTES;
use serde_json::{json, Value};
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::timeout;

fn config(extra: &str) -> Config {
    load_config_from_str(&format!(
        r#"
stack:
  name: PubSub-Test
  account: "111111111111"
storage:
  path: /tmp/pubsub-pipeline-tests
{}
"#,
        extra
    ))
    .unwrap()
}

/// A JSON record of exactly `size` bytes
fn record_of_size(source: &str, detail_type: &str, size: usize) -> Vec<u8> {
    let head = format!(
        r#"{{"source":"{}","detail-type":"{}","pad":""#,
        source, detail_type
    );
    let tail = r#""}"#;
    let pad = size - head.len() - tail.len();
    format!("{}{}{}", head, "x".repeat(pad), tail).into_bytes()
}

fn gunzip(bytes: &[u8]) -> String {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = String::new();
    decoder.read_to_string(&mut out).unwrap();
    out
}

async fn next_object(rx: &mut broadcast::Receiver<ObjectCreated>) -> ObjectCreated {
    timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for an object")
        .unwrap()
}

#[tokio::test]
async fn test_size_threshold_writes_three_objects() {
    let config = config(
        r#"
stream:
  buffer:
    max_buffer_bytes: 64KiB
    max_buffer_interval: 1h
"#,
    );
    let store = Arc::new(MemoryObjectStore::new());
    let pipeline = Pipeline::start(&config, store.clone()).await.unwrap();
    let ingress = pipeline.ingress();

    for _ in 0..150 {
        ingress
            .put_record(record_of_size("load", "bulk", 1024), false)
            .await
            .unwrap();
    }

    let report = pipeline.shutdown().await.unwrap();
    assert!(report.drain.completed);
    assert_eq!(report.stats.batches_sealed_size, 2);
    assert_eq!(report.stats.batches_sealed_shutdown, 1);
    assert_eq!(report.stats.records_lost, 0);

    let keys = store.list("load/bulk/date=").await.unwrap();
    assert_eq!(keys.len(), 3);

    let mut counts = Vec::new();
    for key in &keys {
        let body = gunzip(&store.get(key).await.unwrap());
        assert!(body.ends_with('\n'));
        counts.push(body.lines().count());
    }
    counts.sort_unstable();
    assert_eq!(counts, vec![22, 64, 64]);
}

#[tokio::test]
async fn test_interval_seals_a_single_event() {
    let config = config(
        r#"
stream:
  buffer:
    max_buffer_bytes: 64MiB
    max_buffer_interval: 200ms
"#,
    );
    let store = Arc::new(MemoryObjectStore::new());
    let pipeline = Pipeline::start(&config, store.clone()).await.unwrap();
    let mut objects = pipeline.subscribe();

    pipeline
        .ingress()
        .submit(Event::new(
            "localTest",
            "eventTested",
            json!({"email": "ada@example.com"}),
        ))
        .await
        .unwrap();

    let created = next_object(&mut objects).await;
    assert_eq!(created.record_count, 1);
    assert_eq!(created.bucket, "pubsub-events");
    assert!(created.key.starts_with("localTest/eventTested/date="));
    assert!(created.key.ends_with(".gz"));

    let line = gunzip(&store.get(&created.key).await.unwrap());
    let envelope: Value = serde_json::from_str(line.trim_end()).unwrap();
    assert_eq!(envelope["source"], "localTest");
    assert_eq!(envelope["detail-type"], "eventTested");
    assert_eq!(envelope["account"], "111111111111");
    assert_eq!(envelope["detail"]["email"], "ada@example.com");

    let report = pipeline.shutdown().await.unwrap();
    assert_eq!(report.stats.batches_sealed_interval, 1);
    assert_eq!(report.stats.objects_written, 1);
}

#[tokio::test]
async fn test_missing_source_is_routed_to_errors() {
    let config = config("");
    let store = Arc::new(MemoryObjectStore::new());
    let pipeline = Pipeline::start(&config, store.clone()).await.unwrap();
    let ingress = pipeline.ingress();

    ingress
        .put_record(br#"{"event_type":"signup","id":1}"#.to_vec(), false)
        .await
        .unwrap();
    ingress
        .put_record(br#"{"source":"app","detail-type":"signup"}"#.to_vec(), false)
        .await
        .unwrap();

    let report = pipeline.shutdown().await.unwrap();
    assert_eq!(report.stats.records_routed_to_errors, 1);

    let errors = store.list("errors/MalformedRecord/date=").await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(
        gunzip(&store.get(&errors[0]).await.unwrap()),
        "{\"event_type\":\"signup\",\"id\":1}\n"
    );
    assert_eq!(store.list("app/signup/").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_missing_detail_type_is_routed_to_errors() {
    let config = config("");
    let store = Arc::new(MemoryObjectStore::new());
    let pipeline = Pipeline::start(&config, store.clone()).await.unwrap();

    pipeline
        .ingress()
        .put_record(br#"{"source":"app","id":2}"#.to_vec(), false)
        .await
        .unwrap();

    let report = pipeline.shutdown().await.unwrap();
    assert_eq!(report.stats.records_routed_to_errors, 1);
    assert!(store.list("app/").await.unwrap().is_empty());

    let errors = store.list("errors/MalformedRecord/date=").await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(
        gunzip(&store.get(&errors[0]).await.unwrap()),
        "{\"source\":\"app\",\"id\":2}\n"
    );
}

#[tokio::test]
async fn test_oversized_partition_value_is_still_written() {
    let root = TempDir::new().unwrap();
    let config = config(
        r#"
writer:
  initial_backoff: 10ms
  max_backoff: 50ms
  retry_duration: 2s
"#,
    );
    let store = Arc::new(LocalObjectStore::open(root.path()).await.unwrap());
    let pipeline = Pipeline::start(&config, store.clone()).await.unwrap();

    let source = "s".repeat(300);
    pipeline
        .ingress()
        .put_record(
            format!(r#"{{"source":"{}","detail-type":"long"}}"#, source).into_bytes(),
            false,
        )
        .await
        .unwrap();

    let report = pipeline.shutdown().await.unwrap();
    assert_eq!(report.stats.objects_written, 1);
    assert_eq!(report.stats.write_retries, 0);
    assert_eq!(report.stats.records_lost, 0);

    let keys = store.list("").await.unwrap();
    assert_eq!(keys.len(), 1);
    let partition = keys[0].split('/').next().unwrap();
    assert_eq!(partition.len(), MAX_VALUE_BYTES);
    assert!(partition.starts_with("sss"));
}

#[tokio::test]
async fn test_aggregated_record_is_split_before_partitioning() {
    let config = config("");
    let store = Arc::new(MemoryObjectStore::new());
    let pipeline = Pipeline::start(&config, store.clone()).await.unwrap();

    pipeline
        .ingress()
        .put_record(
            br#"{"source":"a","detail-type":"x","n":1}{"source":"b","detail-type":"y","n":2}"#
                .to_vec(),
            true,
        )
        .await
        .unwrap();

    pipeline.shutdown().await.unwrap();

    let a = store.list("a/x/").await.unwrap();
    let b = store.list("b/y/").await.unwrap();
    assert_eq!(a.len(), 1);
    assert_eq!(b.len(), 1);
    assert_eq!(
        gunzip(&store.get(&b[0]).await.unwrap()),
        "{\"source\":\"b\",\"detail-type\":\"y\",\"n\":2}\n"
    );
}

#[tokio::test]
async fn test_transient_store_failures_are_retried() {
    let config = config(
        r#"
writer:
  initial_backoff: 10ms
  max_backoff: 50ms
  retry_duration: 5s
"#,
    );
    let store = Arc::new(MemoryObjectStore::new());
    store.fail_next(2);
    let pipeline = Pipeline::start(&config, store.clone()).await.unwrap();

    pipeline
        .ingress()
        .submit(Event::new("app", "retry", json!({"n": 1})))
        .await
        .unwrap();

    let report = pipeline.shutdown().await.unwrap();
    assert_eq!(report.stats.objects_written, 1);
    assert_eq!(report.stats.write_retries, 2);
    assert_eq!(report.stats.write_failures, 0);
    assert_eq!(store.put_attempts(), 3);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_exhausted_retries_are_reported_as_loss() {
    let config = config(
        r#"
writer:
  initial_backoff: 10ms
  max_backoff: 20ms
  retry_duration: 100ms
"#,
    );
    let store = Arc::new(MemoryObjectStore::new());
    store.fail_next(usize::MAX);
    let pipeline = Pipeline::start(&config, store.clone()).await.unwrap();

    pipeline
        .ingress()
        .submit(Event::new("app", "lost", json!({"n": 1})))
        .await
        .unwrap();

    let report = pipeline.shutdown().await.unwrap();
    assert_eq!(report.stats.objects_written, 0);
    assert_eq!(report.stats.write_failures, 1);
    assert_eq!(report.stats.records_lost, 1);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_events_after_shutdown_are_rejected() {
    let config = config("");
    let store = Arc::new(MemoryObjectStore::new());
    let pipeline = Pipeline::start(&config, store.clone()).await.unwrap();
    let ingress = pipeline.ingress();

    ingress
        .submit(Event::new("app", "before", json!({})))
        .await
        .unwrap();
    let report = pipeline.shutdown().await.unwrap();
    assert_eq!(report.stats.batches_sealed_shutdown, 1);
    assert_eq!(store.list("app/before/").await.unwrap().len(), 1);

    let rejected = ingress
        .submit(Event::new("app", "after", json!({})))
        .await
        .unwrap_err();
    assert!(rejected.is_retryable());
}
