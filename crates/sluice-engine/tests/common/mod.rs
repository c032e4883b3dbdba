//! Plugin fakes and pipeline helpers shared by the engine test suites.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use sluice_config::{EngineSettings, PipelineDef};
use sluice_engine::Pipeline;
use sluice_graph::Blueprint;
use sluice_plugin::{
  ByteReader, Data, Inspector, Output, Payload, PluginError, PluginRegistry, Processor,
  StreamProcessor,
};
use sluice_store::{Bucket, Database};
use tokio::io::AsyncWrite;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Appends `options.suffix` (default `!`) and marks the data with it.
///
/// Payloads `reject` and `fail` make `process` reject or fail.
pub struct Append {
  suffix: String,
}

impl Append {
  pub fn from_options(options: &serde_json::Value) -> Result<Self, PluginError> {
    let suffix = match options.get("suffix") {
      None => "!".to_string(),
      Some(serde_json::Value::String(suffix)) => suffix.clone(),
      Some(other) => return Err(PluginError::InvalidOptions(format!("bad suffix: {}", other))),
    };
    Ok(Self { suffix })
  }
}

#[async_trait]
impl Processor for Append {
  type Decoded = Vec<u8>;

  async fn decode(&self, payload: Payload, _data: &mut Data) -> Result<Vec<u8>, PluginError> {
    Ok(payload.into_bytes().await?.to_vec())
  }

  async fn process(&self, mut decoded: Vec<u8>, data: &mut Data) -> Result<Vec<u8>, PluginError> {
    match decoded.as_slice() {
      b"reject" => return Err(PluginError::rejected("rejected by append")),
      b"fail" => return Err(PluginError::failed("append failed")),
      _ => {}
    }
    decoded.extend_from_slice(self.suffix.as_bytes());
    data.insert(format!("suffix_{}", self.suffix), true.into());
    Ok(decoded)
  }

  async fn encode(&self, decoded: Vec<u8>, _data: &mut Data) -> Result<Bytes, PluginError> {
    Ok(Bytes::from(decoded))
  }
}

/// Records the payload size in `size`.
pub struct Measure;

#[async_trait]
impl Inspector for Measure {
  type Decoded = Bytes;

  async fn decode(&self, payload: Payload, _data: &mut Data) -> Result<Bytes, PluginError> {
    Ok(payload.into_bytes().await?)
  }

  async fn process(&self, decoded: Bytes, data: &mut Data) -> Result<(), PluginError> {
    data.insert("size".to_string(), decoded.len().into());
    Ok(())
  }
}

/// Copies the payload into the writer unchanged.
pub struct Echo;

#[async_trait]
impl StreamProcessor for Echo {
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
    tokio::io::copy(&mut decoded, writer).await?;
    Ok(())
  }
}

#[derive(Default)]
struct SinkState {
  reject: Option<String>,
  gate: Option<Semaphore>,
  delay: Duration,
  calls: AtomicUsize,
  in_flight: AtomicUsize,
  max_in_flight: AtomicUsize,
  delivered: Mutex<Vec<(Vec<u8>, Data)>>,
}

/// Output recording everything it is given.
#[derive(Clone, Default)]
pub struct Sink {
  state: Arc<SinkState>,
}

impl Sink {
  pub fn new() -> Self {
    Self::default()
  }

  /// Rejects every delivery with `reason`.
  pub fn rejecting(reason: &str) -> Self {
    Self::with_state(SinkState {
      reject: Some(reason.to_string()),
      ..Default::default()
    })
  }

  /// Holds every delivery until [`Sink::release`] lets it through.
  pub fn gated() -> Self {
    Self::with_state(SinkState {
      gate: Some(Semaphore::new(0)),
      ..Default::default()
    })
  }

  /// Takes `delay` per delivery.
  pub fn slow(delay: Duration) -> Self {
    Self::with_state(SinkState {
      delay,
      ..Default::default()
    })
  }

  fn with_state(state: SinkState) -> Self {
    Self {
      state: Arc::new(state),
    }
  }

  pub fn release(&self, deliveries: usize) {
    if let Some(gate) = &self.state.gate {
      gate.add_permits(deliveries);
    }
  }

  pub fn calls(&self) -> usize {
    self.state.calls.load(Ordering::SeqCst)
  }

  pub fn max_in_flight(&self) -> usize {
    self.state.max_in_flight.load(Ordering::SeqCst)
  }

  pub fn delivered(&self) -> Vec<(Vec<u8>, Data)> {
    self.state.delivered.lock().unwrap().clone()
  }

  pub fn bodies(&self) -> Vec<Vec<u8>> {
    self.delivered().into_iter().map(|(body, _)| body).collect()
  }
}

#[async_trait]
impl Output for Sink {
  async fn deliver(
    &self,
    payload: Payload,
    data: &Data,
    _cancel: &CancellationToken,
  ) -> Result<(), PluginError> {
    let state = &self.state;
    state.calls.fetch_add(1, Ordering::SeqCst);
    let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_in_flight.fetch_max(now, Ordering::SeqCst);

    if let Some(gate) = &state.gate {
      gate.acquire().await.unwrap().forget();
    }
    if !state.delay.is_zero() {
      tokio::time::sleep(state.delay).await;
    }
    let body = payload.into_bytes().await;
    state.in_flight.fetch_sub(1, Ordering::SeqCst);

    if let Some(reason) = &state.reject {
      return Err(PluginError::rejected(reason.clone()));
    }
    state.delivered.lock().unwrap().push((body?.to_vec(), data.clone()));
    Ok(())
  }
}

/// Registry with `append`, `measure` and `echo`, plus one output per sink.
pub fn registry(sinks: &[(&str, Sink)]) -> PluginRegistry {
  let mut registry = PluginRegistry::new();
  registry
    .register_processor("append", Append::from_options)
    .unwrap();
  registry.register_inspector("measure", |_| Ok(Measure)).unwrap();
  registry.register_stream_processor("echo", |_| Ok(Echo)).unwrap();
  for (name, sink) in sinks {
    let sink = sink.clone();
    registry
      .register_output(*name, move |_| Ok(sink.clone()))
      .unwrap();
  }
  registry
}

pub fn settings() -> EngineSettings {
  EngineSettings {
    default_concurrency: Some(4),
    channel_capacity: 8,
    ..Default::default()
  }
}

pub async fn database(dir: &Path) -> Database {
  Database::open(dir.join("sluice.db")).await.unwrap()
}

pub async fn bucket(db: &Database, dir: &Path, pipeline: &str) -> Bucket {
  Bucket::open(db.clone(), pipeline, dir.join("buckets").join(pipeline))
    .await
    .unwrap()
}

/// Build (without starting) a pipeline over the database in `dir`.
pub async fn build(def: &PipelineDef, registry: &PluginRegistry, db: &Database, dir: &Path) -> Pipeline {
  let blueprint = Blueprint::build(def, registry).unwrap();
  let bucket = bucket(db, dir, &def.name).await;
  Pipeline::build(&blueprint, registry, bucket, &settings()).unwrap()
}

pub fn bytes(body: &'static [u8]) -> Payload {
  Payload::from(body)
}

pub fn token() -> CancellationToken {
  CancellationToken::new()
}

/// Wait until `condition` holds, failing after a few seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
  tokio::time::timeout(Duration::from_secs(5), async {
    while !condition() {
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
  })
  .await
  .expect("condition never held");
}

/// Every record in `bucket` as `(node_id, payload)`, oldest first.
pub async fn records(bucket: &Bucket) -> Vec<(String, Vec<u8>)> {
  let mut records = Vec::new();
  for job in bucket.get_all_async_jobs().await.unwrap() {
    let body = job.payload.unwrap().into_bytes().await.unwrap();
    records.push((job.record.node_id, body.to_vec()));
  }
  records
}
