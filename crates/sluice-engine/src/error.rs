use sluice_graph::GraphError;
use sluice_plugin::{PluginError, RegistryError};
use sluice_store::StoreError;
use thiserror::Error;

/// Errors building or driving pipelines.
#[derive(Debug, Error)]
pub enum EngineError {
  #[error("invalid pipeline graph: {0}")]
  Graph(#[from] GraphError),

  #[error("store error: {0}")]
  Store(#[from] StoreError),

  #[error("failed to create plugin for node '{node}': {source}")]
  PluginInit {
    node: String,
    #[source]
    source: RegistryError,
  },

  #[error("duplicate pipeline name: {0}")]
  DuplicatePipeline(String),

  #[error("pipeline not found: {0}")]
  PipelineNotFound(String),

  #[error("pipeline '{0}' is not running")]
  NotRunning(String),

  #[error("node '{0}' does not match its plugin instance")]
  StageMismatch(String),
}

/// Why a job failed. Carried by [`Response::Error`](crate::Response::Error).
#[derive(Debug, Error)]
pub enum JobError {
  #[error("node '{node}' failed to decode: {source}")]
  Decode {
    node: String,
    #[source]
    source: PluginError,
  },

  #[error("node '{node}' failed to process: {source}")]
  Process {
    node: String,
    #[source]
    source: PluginError,
  },

  #[error("node '{node}' failed to encode: {source}")]
  Encode {
    node: String,
    #[source]
    source: PluginError,
  },

  #[error("node '{node}' failed to deliver: {source}")]
  Deliver {
    node: String,
    #[source]
    source: PluginError,
  },

  #[error("node '{node}' could not start the job: {source}")]
  Acquire {
    node: String,
    #[source]
    source: AcquireError,
  },

  #[error("node '{node}' failed to persist the job: {source}")]
  Persistence {
    node: String,
    #[source]
    source: StoreError,
  },

  #[error("node '{node}' is stopped")]
  NodeStopped { node: String },

  #[error("node '{node}' dropped the job without responding")]
  NoResponse { node: String },

  #[error("pipeline is not accepting jobs")]
  PipelineStopped,
}

/// Failure to get a slot from a [`Resource`](crate::Resource).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AcquireError {
  #[error("cancelled")]
  Cancelled,

  #[error("resource closed")]
  Closed,
}
