use std::sync::Mutex;

use crate::lock;

/// Reusable encode buffers for a stream processor.
#[derive(Debug)]
pub(crate) struct BufferPool {
  buffers: Mutex<Vec<Vec<u8>>>,
  limit: usize,
}

impl BufferPool {
  /// Keep at most `limit` idle buffers.
  pub(crate) fn new(limit: usize) -> Self {
    Self {
      buffers: Mutex::new(Vec::with_capacity(limit)),
      limit,
    }
  }

  pub(crate) fn get(&self) -> Vec<u8> {
    lock(&self.buffers).pop().unwrap_or_default()
  }

  pub(crate) fn put(&self, mut buffer: Vec<u8>) {
    buffer.clear();
    let mut buffers = lock(&self.buffers);
    if buffers.len() < self.limit {
      buffers.push(buffer);
    }
  }

  #[cfg(test)]
  fn idle(&self) -> usize {
    lock(&self.buffers).len()
  }
}
