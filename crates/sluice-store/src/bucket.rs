use std::collections::HashSet;
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use sluice_plugin::{Data, Payload};
use sqlx::types::Json;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::database::Database;
use crate::error::StoreError;
use crate::types::{AsyncJob, AsyncJobRecord};

/// Extension of payload files written for async jobs.
pub const JOB_FILE_EXTENSION: &str = "sluice-job";

/// One pipeline's namespace of async job records.
///
/// Rows live in the shared [`Database`] under the bucket's name; payloads
/// live as `<id>.sluice-job` files in the bucket's directory.
#[derive(Debug, Clone)]
pub struct Bucket {
  db: Database,
  name: String,
  dir: PathBuf,
}

impl Bucket {
  /// Open the bucket `name`, creating its payload directory.
  pub async fn open(
    db: Database,
    name: impl Into<String>,
    dir: impl Into<PathBuf>,
  ) -> Result<Self, StoreError> {
    let dir = dir.into();
    fs::create_dir_all(&dir).await?;
    Ok(Self {
      db,
      name: name.into(),
      dir,
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  /// Persist a payload bound for `node_id`.
  ///
  /// The payload is written to its file before the row is committed. Byte
  /// payloads are handed back as they are; streams are drained into the
  /// file, so the returned payload reads the file from the start. If the
  /// row can't be committed the file is removed again.
  #[instrument(name = "create_async_job", skip(self, payload, data), fields(bucket = %self.name))]
  pub async fn create_async_job(
    &self,
    node_id: &str,
    payload: Payload,
    data: &Data,
  ) -> Result<(AsyncJobRecord, Payload), StoreError> {
    let id = Uuid::new_v4().to_string();
    let path = self.job_path(&id);

    let payload = match write_payload(&path, payload).await {
      Ok(payload) => payload,
      Err(e) => {
        remove_file(&path).await;
        return Err(e.into());
      }
    };

    let record = AsyncJobRecord {
      id,
      node_id: node_id.to_string(),
      temp_file: path.to_string_lossy().into_owned(),
      data: Json(data.clone()),
      created_at: Utc::now(),
    };

    if let Err(e) = self.insert(&record).await {
      remove_file(&path).await;
      return Err(e);
    }

    debug!(job_id = %record.id, node = node_id, "async job persisted");
    Ok((record, payload))
  }

  /// Delete a record and its payload file. A missing file is ignored.
  #[instrument(name = "delete_async_job", skip(self), fields(bucket = %self.name))]
  pub async fn delete_async_job(&self, id: &str) -> Result<(), StoreError> {
    let result = sqlx::query(
      r#"
      DELETE FROM async_jobs
      WHERE bucket = ? AND id = ?
      "#,
    )
    .bind(&self.name)
    .bind(id)
    .execute(self.db.pool())
    .await?;

    remove_file(&self.job_path(id)).await;

    if result.rows_affected() == 0 {
      return Err(StoreError::NotFound(id.to_string()));
    }
    Ok(())
  }

  /// Load every record in the bucket, oldest first, with its payload file
  /// reopened as a stream.
  pub async fn get_all_async_jobs(&self) -> Result<Vec<AsyncJob>, StoreError> {
    let records: Vec<AsyncJobRecord> = sqlx::query_as(
      r#"
      SELECT id, node_id, temp_file, data, created_at
      FROM async_jobs
      WHERE bucket = ?
      ORDER BY created_at
      "#,
    )
    .bind(&self.name)
    .fetch_all(self.db.pool())
    .await?;

    let mut jobs = Vec::with_capacity(records.len());
    for record in records {
      let payload = match File::open(record.temp_path()).await {
        Ok(file) => Some(Payload::stream(file)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
          warn!(bucket = %self.name, job_id = %record.id, "async job payload file is missing");
          None
        }
        Err(e) => return Err(e.into()),
      };
      jobs.push(AsyncJob { record, payload });
    }

    Ok(jobs)
  }

  /// Remove payload files no record refers to. Returns how many were removed.
  ///
  /// Must not run while jobs are being persisted: a file is written before
  /// its row exists.
  pub async fn cleanup_orphans(&self) -> Result<usize, StoreError> {
    let live: HashSet<String> = sqlx::query_scalar(
      r#"
      SELECT id FROM async_jobs
      WHERE bucket = ?
      "#,
    )
    .bind(&self.name)
    .fetch_all(self.db.pool())
    .await?
    .into_iter()
    .collect();

    let mut removed = 0;
    let mut entries = fs::read_dir(&self.dir).await?;
    while let Some(entry) = entries.next_entry().await? {
      let path = entry.path();
      if path.extension() != Some(OsStr::new(JOB_FILE_EXTENSION)) {
        continue;
      }
      let Some(id) = path.file_stem().and_then(OsStr::to_str) else {
        continue;
      };
      if live.contains(id) {
        continue;
      }

      match fs::remove_file(&path).await {
        Ok(()) => removed += 1,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
      }
    }

    if removed > 0 {
      debug!(bucket = %self.name, removed, "orphaned payload files removed");
    }
    Ok(removed)
  }

  /// Number of records in the bucket.
  pub async fn count(&self) -> Result<usize, StoreError> {
    let count: i64 = sqlx::query_scalar(
      r#"
      SELECT COUNT(*) FROM async_jobs
      WHERE bucket = ?
      "#,
    )
    .bind(&self.name)
    .fetch_one(self.db.pool())
    .await?;

    Ok(count as usize)
  }

  fn job_path(&self, id: &str) -> PathBuf {
    self.dir.join(format!("{}.{}", id, JOB_FILE_EXTENSION))
  }

  async fn insert(&self, record: &AsyncJobRecord) -> Result<(), StoreError> {
    let data = serde_json::to_string(&record.data.0)?;

    let mut tx = self.db.pool().begin().await?;
    sqlx::query(
      r#"
      INSERT INTO async_jobs (bucket, id, node_id, temp_file, data, created_at)
      VALUES (?, ?, ?, ?, ?, ?)
      "#,
    )
    .bind(&self.name)
    .bind(&record.id)
    .bind(&record.node_id)
    .bind(&record.temp_file)
    .bind(data)
    .bind(record.created_at)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(())
  }
}

async fn write_payload(path: &Path, payload: Payload) -> io::Result<Payload> {
  let mut file = File::create(path).await?;

  match payload {
    Payload::Bytes(bytes) => {
      file.write_all(&bytes).await?;
      file.sync_all().await?;
      Ok(Payload::Bytes(bytes))
    }
    Payload::Stream(mut reader) => {
      tokio::io::copy(&mut reader, &mut file).await?;
      file.sync_all().await?;
      drop(file);
      Ok(Payload::stream(File::open(path).await?))
    }
  }
}

async fn remove_file(path: &Path) {
  match fs::remove_file(path).await {
    Ok(()) => {}
    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
    Err(e) => warn!(path = %path.display(), error = %e, "failed to remove payload file"),
  }
}
