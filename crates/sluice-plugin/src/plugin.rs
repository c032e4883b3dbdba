//! Plugin traits.
//!
//! Plugins implement the typed traits ([`Processor`], [`Inspector`],
//! [`StreamProcessor`], [`Output`]). The engine drives them through the
//! object-safe `Dyn*` counterparts, which are implemented for every typed
//! plugin and tag each failure with the phase it came from.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

use crate::error::{Phase, PluginError, StageFailure};
use crate::payload::{Data, Payload};

/// A read-write stage producing a new payload.
#[async_trait]
pub trait Processor: Send + Sync + 'static {
  /// The plugin's in-memory representation of a payload.
  type Decoded: Send;

  async fn decode(&self, payload: Payload, data: &mut Data) -> Result<Self::Decoded, PluginError>;

  async fn process(
    &self,
    decoded: Self::Decoded,
    data: &mut Data,
  ) -> Result<Self::Decoded, PluginError>;

  async fn encode(&self, decoded: Self::Decoded, data: &mut Data) -> Result<Bytes, PluginError>;
}

/// A read-only stage. Children receive the payload it was given.
#[async_trait]
pub trait Inspector: Send + Sync + 'static {
  type Decoded: Send;

  async fn decode(&self, payload: Payload, data: &mut Data) -> Result<Self::Decoded, PluginError>;

  async fn process(&self, decoded: Self::Decoded, data: &mut Data) -> Result<(), PluginError>;
}

/// A read-write stage that encodes into a caller supplied writer.
#[async_trait]
pub trait StreamProcessor: Send + Sync + 'static {
  type Decoded: Send;

  async fn decode(&self, payload: Payload, data: &mut Data) -> Result<Self::Decoded, PluginError>;

  async fn process(
    &self,
    decoded: Self::Decoded,
    data: &mut Data,
  ) -> Result<Self::Decoded, PluginError>;

  async fn encode_stream(
    &self,
    decoded: Self::Decoded,
    data: &mut Data,
    writer: &mut (dyn AsyncWrite + Send + Unpin),
  ) -> Result<(), PluginError>;
}

/// A terminal stage delivering payloads outside the pipeline.
#[async_trait]
pub trait Output: Send + Sync + 'static {
  async fn deliver(
    &self,
    payload: Payload,
    data: &Data,
    cancel: &CancellationToken,
  ) -> Result<(), PluginError>;
}

/// Object-safe form of [`Processor`].
#[async_trait]
pub trait DynProcessor: Send + Sync {
  async fn transform(&self, payload: Payload, data: &mut Data) -> Result<Bytes, StageFailure>;
}

#[async_trait]
impl<P: Processor> DynProcessor for P {
  async fn transform(&self, payload: Payload, data: &mut Data) -> Result<Bytes, StageFailure> {
    let decoded = self
      .decode(payload, data)
      .await
      .map_err(StageFailure::at(Phase::Decode))?;
    let processed = self
      .process(decoded, data)
      .await
      .map_err(StageFailure::at(Phase::Process))?;
    self
      .encode(processed, data)
      .await
      .map_err(StageFailure::at(Phase::Encode))
  }
}

/// Object-safe form of [`Inspector`].
#[async_trait]
pub trait DynInspector: Send + Sync {
  async fn inspect(&self, payload: Payload, data: &mut Data) -> Result<(), StageFailure>;
}

#[async_trait]
impl<P: Inspector> DynInspector for P {
  async fn inspect(&self, payload: Payload, data: &mut Data) -> Result<(), StageFailure> {
    let decoded = self
      .decode(payload, data)
      .await
      .map_err(StageFailure::at(Phase::Decode))?;
    self
      .process(decoded, data)
      .await
      .map_err(StageFailure::at(Phase::Process))
  }
}

/// Object-safe form of [`StreamProcessor`].
#[async_trait]
pub trait DynStreamProcessor: Send + Sync {
  async fn transform_into(
    &self,
    payload: Payload,
    data: &mut Data,
    writer: &mut (dyn AsyncWrite + Send + Unpin),
  ) -> Result<(), StageFailure>;
}

#[async_trait]
impl<P: StreamProcessor> DynStreamProcessor for P {
  async fn transform_into(
    &self,
    payload: Payload,
    data: &mut Data,
    writer: &mut (dyn AsyncWrite + Send + Unpin),
  ) -> Result<(), StageFailure> {
    let decoded = self
      .decode(payload, data)
      .await
      .map_err(StageFailure::at(Phase::Decode))?;
    let processed = self
      .process(decoded, data)
      .await
      .map_err(StageFailure::at(Phase::Process))?;
    self
      .encode_stream(processed, data, writer)
      .await
      .map_err(StageFailure::at(Phase::Encode))
  }
}

/// The kind of stage a plugin provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
  Processor,
  Inspector,
  StreamProcessor,
  Output,
}

impl PluginKind {
  pub fn is_output(self) -> bool {
    matches!(self, PluginKind::Output)
  }
}

impl fmt::Display for PluginKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      PluginKind::Processor => "processor",
      PluginKind::Inspector => "inspector",
      PluginKind::StreamProcessor => "stream processor",
      PluginKind::Output => "output",
    };
    f.write_str(name)
  }
}

/// An instantiated plugin.
#[derive(Clone)]
pub enum Plugin {
  Processor(Arc<dyn DynProcessor>),
  Inspector(Arc<dyn DynInspector>),
  StreamProcessor(Arc<dyn DynStreamProcessor>),
  Output(Arc<dyn Output>),
}

impl Plugin {
  pub fn kind(&self) -> PluginKind {
    match self {
      Plugin::Processor(_) => PluginKind::Processor,
      Plugin::Inspector(_) => PluginKind::Inspector,
      Plugin::StreamProcessor(_) => PluginKind::StreamProcessor,
      Plugin::Output(_) => PluginKind::Output,
    }
  }
}

impl fmt::Debug for Plugin {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("Plugin").field(&self.kind()).finish()
  }
}
