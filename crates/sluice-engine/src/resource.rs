use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;

use crate::error::AcquireError;

/// Concurrency gate of one node.
///
/// Each permit is returned when it is dropped, on every path out of the
/// stage body.
#[derive(Debug)]
pub struct Resource {
  semaphore: Semaphore,
  capacity: usize,
}

impl Resource {
  /// Create a gate admitting `capacity` jobs at once. Zero is treated as one.
  pub fn new(capacity: usize) -> Self {
    let capacity = capacity.max(1);
    Self {
      semaphore: Semaphore::new(capacity),
      capacity,
    }
  }

  /// Wait for a free slot.
  ///
  /// An already cancelled `cancel` always fails, even when a slot is free.
  pub async fn acquire(
    &self,
    cancel: &CancellationToken,
  ) -> Result<SemaphorePermit<'_>, AcquireError> {
    if cancel.is_cancelled() {
      return Err(AcquireError::Cancelled);
    }

    tokio::select! {
      biased;
      _ = cancel.cancelled() => Err(AcquireError::Cancelled),
      permit = self.semaphore.acquire() => permit.map_err(|_| AcquireError::Closed),
    }
  }

  /// Free slots right now.
  pub fn available(&self) -> usize {
    self.semaphore.available_permits()
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Fail all current and future waiters. Called when the node stops.
  pub fn close(&self) {
    self.semaphore.close();
  }

  pub fn is_closed(&self) -> bool {
    self.semaphore.is_closed()
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;

  #[tokio::test]
  async fn test_cancelled_token_fails_with_free_capacity() {
    let resource = Resource::new(2);
    let cancel = CancellationToken::new();
    cancel.cancel();

    for _ in 0..10 {
      assert_eq!(
        resource.acquire(&cancel).await.unwrap_err(),
        AcquireError::Cancelled
      );
    }
    assert_eq!(resource.available(), 2);
  }

  #[tokio::test]
  async fn test_permit_released_on_drop() {
    let resource = Resource::new(1);
    let cancel = CancellationToken::new();

    let permit = resource.acquire(&cancel).await.unwrap();
    assert_eq!(resource.available(), 0);
    drop(permit);
    assert_eq!(resource.available(), 1);
  }

  #[tokio::test]
  async fn test_waiter_cancelled_while_blocked() {
    let resource = Resource::new(1);
    let _held = resource.acquire(&CancellationToken::new()).await.unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(10)).await;
      trigger.cancel();
    });

    assert_eq!(
      resource.acquire(&cancel).await.unwrap_err(),
      AcquireError::Cancelled
    );
  }

  #[tokio::test]
  async fn test_closed_resource() {
    let resource = Resource::new(0);
    assert_eq!(resource.capacity(), 1);
    resource.close();
    assert!(resource.is_closed());

    assert_eq!(
      resource.acquire(&CancellationToken::new()).await.unwrap_err(),
      AcquireError::Closed
    );
  }
}
