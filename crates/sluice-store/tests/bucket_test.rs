use std::path::Path;

use sluice_plugin::{Data, Payload};
use sluice_store::{Bucket, Database, JOB_FILE_EXTENSION, StoreError};
use tempfile::TempDir;

async fn open(dir: &Path, name: &str) -> (Database, Bucket) {
  let db = Database::open(dir.join("sluice.db")).await.unwrap();
  let bucket = Bucket::open(db.clone(), name, dir.join("buckets").join(name))
    .await
    .unwrap();
  (db, bucket)
}

fn data() -> Data {
  Data::from([
    ("name".to_string(), serde_json::json!("cat.png")),
    ("width".to_string(), serde_json::json!(640)),
  ])
}

#[tokio::test]
async fn test_record_survives_reopen() {
  let dir = TempDir::new().unwrap();
  let (db, bucket) = open(dir.path(), "thumbs").await;

  let (record, payload) = bucket
    .create_async_job("resize", Payload::from(&b"pixels"[..]), &data())
    .await
    .unwrap();
  assert_eq!(payload.into_bytes().await.unwrap(), &b"pixels"[..]);
  assert!(record.temp_path().exists());
  db.close().await;

  let (_db, bucket) = open(dir.path(), "thumbs").await;
  let jobs = bucket.get_all_async_jobs().await.unwrap();

  assert_eq!(jobs.len(), 1);
  let job = jobs.into_iter().next().unwrap();
  assert_eq!(job.record.id, record.id);
  assert_eq!(job.record.temp_file, record.temp_file);
  assert_eq!(job.record.node_id, "resize");
  assert_eq!(job.record.data.0, data());
  let payload = job.payload.unwrap();
  assert_eq!(payload.into_bytes().await.unwrap(), &b"pixels"[..]);
}

#[tokio::test]
async fn test_stream_payload_is_drained_to_file() {
  let dir = TempDir::new().unwrap();
  let (_db, bucket) = open(dir.path(), "thumbs").await;

  let upstream = std::io::Cursor::new(b"streamed body".to_vec());
  let (record, payload) = bucket
    .create_async_job("resize", Payload::stream(upstream), &Data::new())
    .await
    .unwrap();

  assert!(matches!(payload, Payload::Stream(_)));
  assert_eq!(payload.into_bytes().await.unwrap(), &b"streamed body"[..]);
  assert_eq!(
    tokio::fs::read(record.temp_path()).await.unwrap(),
    b"streamed body"
  );
  assert_eq!(
    record.temp_path().extension().unwrap().to_str().unwrap(),
    JOB_FILE_EXTENSION
  );
}

#[tokio::test]
async fn test_delete_removes_row_and_file() {
  let dir = TempDir::new().unwrap();
  let (_db, bucket) = open(dir.path(), "thumbs").await;

  let (record, _) = bucket
    .create_async_job("resize", Payload::from(&b"x"[..]), &Data::new())
    .await
    .unwrap();
  assert_eq!(bucket.count().await.unwrap(), 1);

  bucket.delete_async_job(&record.id).await.unwrap();

  assert_eq!(bucket.count().await.unwrap(), 0);
  assert!(!record.temp_path().exists());
  assert!(matches!(
    bucket.delete_async_job(&record.id).await,
    Err(StoreError::NotFound(_))
  ));
}

#[tokio::test]
async fn test_delete_tolerates_missing_file() {
  let dir = TempDir::new().unwrap();
  let (_db, bucket) = open(dir.path(), "thumbs").await;

  let (record, _) = bucket
    .create_async_job("resize", Payload::from(&b"x"[..]), &Data::new())
    .await
    .unwrap();
  tokio::fs::remove_file(record.temp_path()).await.unwrap();

  bucket.delete_async_job(&record.id).await.unwrap();
  assert_eq!(bucket.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_missing_payload_file_is_reported() {
  let dir = TempDir::new().unwrap();
  let (_db, bucket) = open(dir.path(), "thumbs").await;

  let (record, _) = bucket
    .create_async_job("resize", Payload::from(&b"x"[..]), &Data::new())
    .await
    .unwrap();
  tokio::fs::remove_file(record.temp_path()).await.unwrap();

  let jobs = bucket.get_all_async_jobs().await.unwrap();
  assert_eq!(jobs.len(), 1);
  assert!(jobs[0].payload.is_none());
}

#[tokio::test]
async fn test_cleanup_orphans_keeps_live_files() {
  let dir = TempDir::new().unwrap();
  let (_db, bucket) = open(dir.path(), "thumbs").await;

  let (record, _) = bucket
    .create_async_job("resize", Payload::from(&b"live"[..]), &Data::new())
    .await
    .unwrap();
  let orphan = bucket
    .dir()
    .join(format!("{}.{}", uuid_like(), JOB_FILE_EXTENSION));
  tokio::fs::write(&orphan, b"stale").await.unwrap();
  let unrelated = bucket.dir().join("notes.txt");
  tokio::fs::write(&unrelated, b"keep").await.unwrap();

  assert_eq!(bucket.cleanup_orphans().await.unwrap(), 1);

  assert!(!orphan.exists());
  assert!(unrelated.exists());
  assert!(record.temp_path().exists());
  assert_eq!(bucket.cleanup_orphans().await.unwrap(), 0);
}

#[tokio::test]
async fn test_buckets_are_isolated() {
  let dir = TempDir::new().unwrap();
  let (db, thumbs) = open(dir.path(), "thumbs").await;
  let avatars = Bucket::open(db, "avatars", dir.path().join("buckets/avatars"))
    .await
    .unwrap();

  thumbs
    .create_async_job("resize", Payload::from(&b"a"[..]), &Data::new())
    .await
    .unwrap();

  assert_eq!(thumbs.count().await.unwrap(), 1);
  assert_eq!(avatars.count().await.unwrap(), 0);
  assert!(avatars.get_all_async_jobs().await.unwrap().is_empty());
  assert_eq!(avatars.cleanup_orphans().await.unwrap(), 0);
}

#[tokio::test]
async fn test_failed_commit_removes_payload_file() {
  let dir = TempDir::new().unwrap();
  let (db, bucket) = open(dir.path(), "thumbs").await;
  db.close().await;

  let err = bucket
    .create_async_job("resize", Payload::from(&b"x"[..]), &Data::new())
    .await
    .unwrap_err();

  assert!(matches!(err, StoreError::Database(_)));
  let mut entries = tokio::fs::read_dir(bucket.dir()).await.unwrap();
  assert!(entries.next_entry().await.unwrap().is_none());
}

#[tokio::test]
async fn test_in_memory_database() {
  let dir = TempDir::new().unwrap();
  let db = Database::in_memory().await.unwrap();
  let bucket = Bucket::open(db, "thumbs", dir.path()).await.unwrap();

  bucket
    .create_async_job("resize", Payload::from(&b"x"[..]), &Data::new())
    .await
    .unwrap();
  assert_eq!(bucket.count().await.unwrap(), 1);
}

fn uuid_like() -> &'static str {
  "00000000-0000-4000-8000-000000000000"
}
