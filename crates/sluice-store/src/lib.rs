//! Sluice Store
//!
//! Durable records for in-flight async jobs. A single SQLite [`Database`]
//! per process holds an `async_jobs` table; each pipeline gets its own
//! [`Bucket`], a namespace in that table plus a directory of payload files.
//!
//! A record is written when an async node hands a payload to the next node
//! and deleted when that node's work finishes, so whatever is left at
//! startup is work a previous process never completed.

mod bucket;
mod database;
mod error;
mod types;

pub use bucket::{Bucket, JOB_FILE_EXTENSION};
pub use database::Database;
pub use error::StoreError;
pub use types::{AsyncJob, AsyncJobRecord};
