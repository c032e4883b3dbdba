//! Sluice Engine
//!
//! Runs validated pipeline graphs. Each node of a [`Pipeline`] is a task
//! group that receives [`Job`]s over its own bounded channel, runs its
//! plugin stage under a concurrency limit ([`Resource`]), fans the result
//! out to its children and folds their responses into one [`Response`].
//!
//! Async nodes persist each job into the pipeline's bucket, acknowledge it
//! straight away and finish it in the background. Jobs left behind by a
//! crash are replayed with [`Pipeline::recover_async_jobs`].
//!
//! The [`Manager`] builds every configured pipeline at once and routes
//! submissions by pipeline name.

mod error;
mod job;
mod manager;
mod node;
mod pipeline;
mod pool;
mod resource;

pub use error::{AcquireError, EngineError, JobError};
pub use job::{Job, Response};
pub use manager::{DATABASE_FILE, Manager};
pub use pipeline::{Pipeline, RecoveryReport};
pub use resource::Resource;

use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
