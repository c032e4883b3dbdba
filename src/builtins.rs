//! Plugins shipped with the binary.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use sluice_plugin::{
  ByteReader, Data, Inspector, Output, Payload, PluginError, PluginRegistry, Processor,
  RegistryError, StreamProcessor,
};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Registry holding every built-in plugin.
pub fn registry() -> Result<PluginRegistry, RegistryError> {
  let mut registry = PluginRegistry::new();
  registry.register_processor("passthrough", |_| Ok(Passthrough))?;
  registry.register_inspector("inspect", |_| Ok(Inspect))?;
  registry.register_stream_processor("copy", |_| Ok(CopyStream))?;
  registry.register_output("file", FileOutput::from_options)?;
  registry.register_output("discard", |_| Ok(Discard))?;
  Ok(registry)
}

/// Buffers the payload and hands it on unchanged.
struct Passthrough;

#[async_trait]
impl Processor for Passthrough {
  type Decoded = Bytes;

  async fn decode(&self, payload: Payload, _data: &mut Data) -> Result<Bytes, PluginError> {
    Ok(payload.into_bytes().await?)
  }

  async fn process(&self, decoded: Bytes, _data: &mut Data) -> Result<Bytes, PluginError> {
    Ok(decoded)
  }

  async fn encode(&self, decoded: Bytes, _data: &mut Data) -> Result<Bytes, PluginError> {
    Ok(decoded)
  }
}

/// Records the payload size as `size`.
struct Inspect;

#[async_trait]
impl Inspector for Inspect {
  type Decoded = Bytes;

  async fn decode(&self, payload: Payload, _data: &mut Data) -> Result<Bytes, PluginError> {
    Ok(payload.into_bytes().await?)
  }

  async fn process(&self, decoded: Bytes, data: &mut Data) -> Result<(), PluginError> {
    data.insert("size".to_string(), decoded.len().into());
    Ok(())
  }
}

/// Streams the payload into the encode buffer unchanged.
struct CopyStream;

#[async_trait]
impl StreamProcessor for CopyStream {
  type Decoded = ByteReader;

  async fn decode(&self, payload: Payload, _data: &mut Data) -> Result<ByteReader, PluginError> {
    Ok(payload.into_reader())
  }

  async fn process(&self, decoded: ByteReader, _data: &mut Data) -> Result<ByteReader, PluginError> {
    Ok(decoded)
  }

  async fn encode_stream(
    &self,
    mut decoded: ByteReader,
    _data: &mut Data,
    writer: &mut (dyn AsyncWrite + Send + Unpin),
  ) -> Result<(), PluginError> {
    tokio::io::copy(&mut decoded, &mut *writer).await?;
    writer.shutdown().await?;
    Ok(())
  }
}

/// Writes each payload into `options.dir`.
///
/// The file is named after the `name` data key when present, otherwise a
/// fresh UUID.
struct FileOutput {
  dir: PathBuf,
}

impl FileOutput {
  fn from_options(options: &serde_json::Value) -> Result<Self, PluginError> {
    let dir = options
      .get("dir")
      .and_then(serde_json::Value::as_str)
      .ok_or_else(|| PluginError::InvalidOptions("`dir` must be a string".to_string()))?;
    Ok(Self {
      dir: PathBuf::from(dir),
    })
  }

  fn file_name(data: &Data) -> String {
    data
      .get("name")
      .and_then(serde_json::Value::as_str)
      .and_then(|name| Path::new(name).file_name())
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
  }
}

#[async_trait]
impl Output for FileOutput {
  async fn deliver(
    &self,
    payload: Payload,
    data: &Data,
    cancel: &CancellationToken,
  ) -> Result<(), PluginError> {
    if cancel.is_cancelled() {
      return Err(PluginError::failed("cancelled"));
    }

    tokio::fs::create_dir_all(&self.dir).await?;
    let path = self.dir.join(Self::file_name(data));
    let mut file = tokio::fs::File::create(&path).await?;
    let mut reader = payload.into_reader();
    let written = tokio::io::copy(&mut reader, &mut file).await?;
    file.flush().await?;

    debug!(path = %path.display(), bytes = written, "payload written");
    Ok(())
  }
}

/// Accepts and drops every payload.
struct Discard;

#[async_trait]
impl Output for Discard {
  async fn deliver(
    &self,
    _payload: Payload,
    _data: &Data,
    _cancel: &CancellationToken,
  ) -> Result<(), PluginError> {
    Ok(())
  }
}
