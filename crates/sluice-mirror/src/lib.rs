//! Sluice Mirror
//!
//! Fan-out without re-reading: one shared byte buffer, any number of
//! independent readers, each with its own cursor.
//!
//! Two variants are provided:
//!
//! - [`MirrorBuffer`]: write-then-clone. A producer appends bytes through
//!   [`AsyncWrite`](tokio::io::AsyncWrite) and closes the buffer to mark
//!   EOF. Readers may be created before or after the writes and park at the
//!   end of the buffer until more bytes arrive or it is closed.
//! - [`MirrorSource`]: read-then-clone. Wraps one upstream
//!   [`AsyncRead`](tokio::io::AsyncRead). Only the reader that runs past
//!   the buffered bytes pulls from upstream, so upstream is read exactly
//!   once however many readers there are.
//!
//! Both keep their state behind a single mutex that is held for one buffer
//! access at a time, never across an upstream read.

mod buffer;
mod source;

pub use buffer::{BufferReader, MirrorBuffer};
pub use source::{MirrorSource, SourceReader};

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::Waker;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Register `waker` unless an equivalent one is already parked.
fn park(waiters: &mut Vec<Waker>, waker: &Waker) {
  if !waiters.iter().any(|w| w.will_wake(waker)) {
    waiters.push(waker.clone());
  }
}

fn wake_all(waiters: Vec<Waker>) {
  for waker in waiters {
    waker.wake();
  }
}
