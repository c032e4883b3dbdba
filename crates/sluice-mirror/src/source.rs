use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use tokio::io::{AsyncRead, ReadBuf};

use crate::{lock, park, wake_all};

/// Largest single pull from upstream.
const MAX_PULL: usize = 64 * 1024;

type Upstream = Box<dyn AsyncRead + Send + Unpin>;

struct State {
  data: Vec<u8>,
  /// Taken out while a reader is polling it.
  upstream: Option<Upstream>,
  eof: bool,
  error: Option<(io::ErrorKind, String)>,
  waiters: Vec<Waker>,
}

/// Read-then-clone mirror.
///
/// Readers share one puller: whichever reader runs past the buffered bytes
/// reads the next chunk from upstream and appends it for everyone else.
pub struct MirrorSource {
  shared: Arc<Mutex<State>>,
}

/// An independent cursor over a [`MirrorSource`].
///
/// A reader that stops polling while its upstream read is pending stalls
/// the other readers until it is polled again or dropped.
pub struct SourceReader {
  shared: Arc<Mutex<State>>,
  pos: usize,
}

impl MirrorSource {
  pub fn new(upstream: impl AsyncRead + Send + Unpin + 'static) -> Self {
    Self::from_boxed(Box::new(upstream))
  }

  pub fn from_boxed(upstream: Upstream) -> Self {
    Self {
      shared: Arc::new(Mutex::new(State {
        data: Vec::new(),
        upstream: Some(upstream),
        eof: false,
        error: None,
        waiters: Vec::new(),
      })),
    }
  }

  /// Create a reader positioned at the start of the stream.
  pub fn reader(&self) -> SourceReader {
    SourceReader {
      shared: self.shared.clone(),
      pos: 0,
    }
  }

  /// Bytes pulled from upstream so far.
  pub fn pulled(&self) -> usize {
    lock(&self.shared).data.len()
  }
}

impl AsyncRead for SourceReader {
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
    if let Some((kind, message)) = &state.error {
      return Poll::Ready(Err(io::Error::new(*kind, message.clone())));
    }
    if state.eof {
      return Poll::Ready(Ok(()));
    }

    let Some(mut upstream) = state.upstream.take() else {
      // Another reader is pulling; it wakes everyone when it's done.
      park(&mut state.waiters, cx.waker());
      return Poll::Pending;
    };
    drop(state);

    let mut chunk = vec![0u8; buf.remaining().min(MAX_PULL)];
    let mut chunk_buf = ReadBuf::new(&mut chunk);
    let polled = Pin::new(&mut upstream).poll_read(cx, &mut chunk_buf);
    let filled = chunk_buf.filled().len();

    let mut state = lock(&this.shared);
    state.upstream = Some(upstream);

    let result = match polled {
      Poll::Pending => {
        park(&mut state.waiters, cx.waker());
        return Poll::Pending;
      }
      Poll::Ready(Err(e)) => {
        state.error = Some((e.kind(), e.to_string()));
        Err(e)
      }
      Poll::Ready(Ok(())) if filled == 0 => {
        state.eof = true;
        Ok(())
      }
      Poll::Ready(Ok(())) => {
        // Nobody else can pull while upstream is taken, so this reader was
        // at the end of the buffer and the new bytes are exactly its next read.
        state.data.extend_from_slice(&chunk[..filled]);
        buf.put_slice(&chunk[..filled]);
        this.pos += filled;
        Ok(())
      }
    };

    let waiters = std::mem::take(&mut state.waiters);
    drop(state);
    wake_all(waiters);

    Poll::Ready(result)
  }
}

impl SourceReader {
  /// Bytes consumed by this reader.
  pub fn position(&self) -> usize {
    self.pos
  }
}

impl Drop for SourceReader {
  fn drop(&mut self) {
    // This reader may have been the one upstream would wake.
    let waiters = std::mem::take(&mut lock(&self.shared).waiters);
    wake_all(waiters);
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  use tokio::io::{AsyncReadExt, AsyncWriteExt};

  use super::*;

  /// Upstream reader counting every byte handed out.
  struct Counting<R> {
    inner: R,
    read: Arc<AtomicUsize>,
  }

  impl<R: AsyncRead + Unpin> AsyncRead for Counting<R> {
    fn poll_read(
      mut self: Pin<&mut Self>,
      cx: &mut Context<'_>,
      buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
      let before = buf.filled().len();
      let polled = Pin::new(&mut self.inner).poll_read(cx, buf);
      let after = buf.filled().len();
      self.read.fetch_add(after - before, Ordering::SeqCst);
      polled
    }
  }

  /// Upstream yielding a prefix and then an error.
  struct Failing {
    prefix: Option<Vec<u8>>,
  }

  impl AsyncRead for Failing {
    fn poll_read(
      mut self: Pin<&mut Self>,
      _cx: &mut Context<'_>,
      buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
      match self.prefix.take() {
        Some(prefix) => {
          buf.put_slice(&prefix);
          Poll::Ready(Ok(()))
        }
        None => Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "gone"))),
      }
    }
  }

  fn body() -> Vec<u8> {
    (0..200_000u32).map(|i| (i % 251) as u8).collect()
  }

  async fn read_all(mut reader: SourceReader) -> Vec<u8> {
    let mut out = Vec::new();
    reader.read_to_end(&mut out).await.unwrap();
    out
  }

  #[tokio::test]
  async fn test_every_reader_sees_all_bytes_upstream_read_once() {
    let body = body();
    let read = Arc::new(AtomicUsize::new(0));
    let source = MirrorSource::new(Counting {
      inner: std::io::Cursor::new(body.clone()),
      read: read.clone(),
    });

    let handles: Vec<_> = (0..5)
      .map(|_| tokio::spawn(read_all(source.reader())))
      .collect();
    for handle in handles {
      assert_eq!(handle.await.unwrap(), body);
    }

    assert_eq!(read.load(Ordering::SeqCst), body.len());
    assert_eq!(source.pulled(), body.len());
  }

  #[tokio::test]
  async fn test_interleaved_small_reads() {
    let source = MirrorSource::new(std::io::Cursor::new(b"abcdefghij".to_vec()));
    let mut a = source.reader();
    let mut b = source.reader();
    let (mut out_a, mut out_b) = (Vec::new(), Vec::new());
    let mut one = [0u8; 1];
    let mut three = [0u8; 3];

    loop {
      let n = b.read(&mut three).await.unwrap();
      out_b.extend_from_slice(&three[..n]);
      let m = a.read(&mut one).await.unwrap();
      out_a.extend_from_slice(&one[..m]);
      if n == 0 && m == 0 {
        break;
      }
    }

    assert_eq!(out_a, b"abcdefghij");
    assert_eq!(out_b, b"abcdefghij");
    assert_eq!(source.pulled(), 10);
  }

  #[tokio::test]
  async fn test_slow_upstream_with_concurrent_readers() {
    let (mut writer, upstream) = tokio::io::duplex(16);
    let source = MirrorSource::new(upstream);
    let handles: Vec<_> = (0..3)
      .map(|_| tokio::spawn(read_all(source.reader())))
      .collect();

    let body = body();
    let producer = {
      let body = body.clone();
      tokio::spawn(async move {
        for chunk in body.chunks(4096) {
          writer.write_all(chunk).await.unwrap();
          tokio::time::sleep(Duration::from_micros(50)).await;
        }
      })
    };

    producer.await.unwrap();
    for handle in handles {
      assert_eq!(handle.await.unwrap(), body);
    }
  }

  #[tokio::test]
  async fn test_dropped_reader_does_not_stall_others() {
    let (mut writer, upstream) = tokio::io::duplex(16);
    let source = MirrorSource::new(upstream);

    // Leave a reader parked on upstream, then drop it.
    let mut early = source.reader();
    let mut byte = [0u8; 1];
    assert!(
      tokio::time::timeout(Duration::from_millis(10), early.read(&mut byte))
        .await
        .is_err()
    );
    let survivor = tokio::spawn(read_all(source.reader()));
    drop(early);

    writer.write_all(b"late bytes").await.unwrap();
    drop(writer);

    assert_eq!(survivor.await.unwrap(), b"late bytes");
  }

  #[tokio::test]
  async fn test_upstream_error_replayed_to_every_reader() {
    let source = MirrorSource::new(Failing {
      prefix: Some(b"head".to_vec()),
    });

    for _ in 0..2 {
      let mut reader = source.reader();
      let mut out = Vec::new();
      let err = reader.read_to_end(&mut out).await.unwrap_err();
      assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
      assert_eq!(out, b"head");
    }
  }
}
