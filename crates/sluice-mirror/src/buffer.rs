use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::{lock, park, wake_all};

#[derive(Default)]
struct State {
  data: Vec<u8>,
  closed: bool,
  waiters: Vec<Waker>,
}

/// Write-then-clone mirror.
///
/// Bytes written are appended to a growable shared buffer. [`close`]
/// records the total length as EOF for every reader.
///
/// [`close`]: MirrorBuffer::close
pub struct MirrorBuffer {
  shared: Arc<Mutex<State>>,
}

/// An independent cursor over a [`MirrorBuffer`].
pub struct BufferReader {
  shared: Arc<Mutex<State>>,
  pos: usize,
}

impl MirrorBuffer {
  pub fn new() -> Self {
    Self::with_buffer(Vec::new())
  }

  /// Use `buffer` as backing storage. Its contents are discarded, its
  /// capacity kept.
  pub fn with_buffer(mut buffer: Vec<u8>) -> Self {
    buffer.clear();
    Self {
      shared: Arc::new(Mutex::new(State {
        data: buffer,
        closed: false,
        waiters: Vec::new(),
      })),
    }
  }

  /// Append bytes. Fails once the buffer is closed.
  pub fn write(&self, bytes: &[u8]) -> io::Result<()> {
    let waiters = {
      let mut state = lock(&self.shared);
      if state.closed {
        return Err(io::Error::new(
          io::ErrorKind::BrokenPipe,
          "write to a closed mirror buffer",
        ));
      }
      state.data.extend_from_slice(bytes);
      std::mem::take(&mut state.waiters)
    };
    wake_all(waiters);
    Ok(())
  }

  /// Mark the current length as EOF. Idempotent.
  pub fn close(&self) {
    let waiters = {
      let mut state = lock(&self.shared);
      state.closed = true;
      std::mem::take(&mut state.waiters)
    };
    wake_all(waiters);
  }

  pub fn is_closed(&self) -> bool {
    lock(&self.shared).closed
  }

  /// Bytes written so far.
  pub fn len(&self) -> usize {
    lock(&self.shared).data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Create a reader positioned at the start of the buffer.
  pub fn reader(&self) -> BufferReader {
    BufferReader {
      shared: self.shared.clone(),
      pos: 0,
    }
  }

  /// Take back the backing storage for reuse.
  ///
  /// Returns `None` while any reader is still alive.
  pub fn into_buffer(self) -> Option<Vec<u8>> {
    Arc::try_unwrap(self.shared)
      .ok()
      .map(|mutex| mutex.into_inner().unwrap_or_else(|e| e.into_inner()).data)
  }
}

impl Default for MirrorBuffer {
  fn default() -> Self {
    Self::new()
  }
}

impl AsyncWrite for MirrorBuffer {
  fn poll_write(
    self: Pin<&mut Self>,
    _cx: &mut Context<'_>,
    buf: &[u8],
  ) -> Poll<io::Result<usize>> {
    Poll::Ready(self.write(buf).map(|()| buf.len()))
  }

  fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    Poll::Ready(Ok(()))
  }

  fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    self.close();
    Poll::Ready(Ok(()))
  }
}

impl BufferReader {
  /// Bytes consumed by this reader.
  pub fn position(&self) -> usize {
    self.pos
  }
}

impl Clone for BufferReader {
  /// The clone starts where this reader currently is.
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
      pos: self.pos,
    }
  }
}

impl AsyncRead for BufferReader {
  fn poll_read(
    self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &mut ReadBuf<'_>,
  ) -> Poll<io::Result<()>> {
    if buf.remaining() == 0 {
      return Poll::Ready(Ok(()));
    }

    let this = self.get_mut();
    let mut state = lock(&this.shared);

    let available = state.data.len().saturating_sub(this.pos);
    if available > 0 {
      let n = available.min(buf.remaining());
      buf.put_slice(&state.data[this.pos..this.pos + n]);
      this.pos += n;
      return Poll::Ready(Ok(()));
    }

    if state.closed {
      return Poll::Ready(Ok(()));
    }

    park(&mut state.waiters, cx.waker());
    Poll::Pending
  }
}
