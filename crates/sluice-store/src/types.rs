use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sluice_plugin::{Data, Payload};
use sqlx::FromRow;
use sqlx::types::Json;

/// An async job as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AsyncJobRecord {
  /// UUID v4, unique within the bucket.
  pub id: String,
  /// Name of the node the payload enters on replay.
  pub node_id: String,
  /// Path of the file holding the job's payload.
  pub temp_file: String,
  /// Snapshot of the job's data at the handoff.
  pub data: Json<Data>,
  pub created_at: DateTime<Utc>,
}

impl AsyncJobRecord {
  pub fn temp_path(&self) -> PathBuf {
    PathBuf::from(&self.temp_file)
  }
}

/// A persisted job loaded back for replay.
#[derive(Debug)]
pub struct AsyncJob {
  pub record: AsyncJobRecord,
  /// The payload file reopened as a stream. `None` when the file is gone.
  pub payload: Option<Payload>,
}
