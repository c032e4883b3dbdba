use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Mutable metadata carried alongside a payload.
pub type Data = HashMap<String, serde_json::Value>;

/// A boxed byte stream.
pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

/// The binary body of a job.
pub enum Payload {
  /// A fully buffered payload. Clones share the allocation.
  Bytes(Bytes),
  /// A payload that is read on demand.
  Stream(ByteReader),
}

impl Payload {
  pub fn stream(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
    Self::Stream(Box::new(reader))
  }

  /// Read the whole payload into memory.
  pub async fn into_bytes(self) -> std::io::Result<Bytes> {
    match self {
      Payload::Bytes(bytes) => Ok(bytes),
      Payload::Stream(mut reader) => {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
      }
    }
  }

  /// Turn the payload into a reader regardless of its representation.
  pub fn into_reader(self) -> ByteReader {
    match self {
      Payload::Bytes(bytes) => Box::new(std::io::Cursor::new(bytes)),
      Payload::Stream(reader) => reader,
    }
  }
}

impl From<Bytes> for Payload {
  fn from(bytes: Bytes) -> Self {
    Self::Bytes(bytes)
  }
}

impl From<Vec<u8>> for Payload {
  fn from(bytes: Vec<u8>) -> Self {
    Self::Bytes(Bytes::from(bytes))
  }
}

impl From<&'static [u8]> for Payload {
  fn from(bytes: &'static [u8]) -> Self {
    Self::Bytes(Bytes::from_static(bytes))
  }
}

impl fmt::Debug for Payload {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Payload::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
      Payload::Stream(_) => f.write_str("Stream"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_into_bytes_from_stream() {
    let payload = Payload::stream(std::io::Cursor::new(b"hello".to_vec()));
    assert_eq!(payload.into_bytes().await.unwrap(), Bytes::from_static(b"hello"));
  }

  #[tokio::test]
  async fn test_into_reader_from_bytes() {
    let mut reader = Payload::from(&b"abc"[..]).into_reader();
    let mut out = String::new();
    reader.read_to_string(&mut out).await.unwrap();
    assert_eq!(out, "abc");
  }
}
