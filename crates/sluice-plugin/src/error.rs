use std::fmt;

use thiserror::Error;

/// Errors returned by plugin methods.
#[derive(Debug, Error)]
pub enum PluginError {
  /// The job was deliberately dropped by a business rule. Not a fault.
  #[error("rejected: {0}")]
  Rejected(String),

  /// The plugin failed to handle the job.
  #[error("{0}")]
  Failed(String),

  /// The plugin options could not be used to build an instance.
  #[error("invalid options: {0}")]
  InvalidOptions(String),

  /// The output worker is no longer accepting deliveries.
  #[error("output worker stopped")]
  Closed,

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

impl PluginError {
  pub fn rejected(reason: impl Into<String>) -> Self {
    Self::Rejected(reason.into())
  }

  pub fn failed(message: impl Into<String>) -> Self {
    Self::Failed(message.into())
  }
}

/// Errors that can occur when working with the plugin registry.
#[derive(Debug, Error)]
pub enum RegistryError {
  /// A plugin with this name is already registered.
  #[error("duplicate plugin name: {0}")]
  DuplicatePluginName(String),

  /// No plugin with this name is registered.
  #[error("plugin not found: {0}")]
  PluginNotFound(String),

  /// The plugin factory rejected the node's options.
  #[error("failed to create plugin '{name}': {source}")]
  Init {
    name: String,
    #[source]
    source: PluginError,
  },
}

/// The stage of a plugin call that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  Decode,
  Process,
  Encode,
  Deliver,
}

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Phase::Decode => "decode",
      Phase::Process => "process",
      Phase::Encode => "encode",
      Phase::Deliver => "deliver",
    };
    f.write_str(name)
  }
}

/// A plugin error tagged with the phase it happened in.
#[derive(Debug, Error)]
#[error("{phase} failed: {error}")]
pub struct StageFailure {
  pub phase: Phase,
  #[source]
  pub error: PluginError,
}

impl StageFailure {
  /// Tag errors with `phase`, for use with `map_err`.
  pub fn at(phase: Phase) -> impl FnOnce(PluginError) -> StageFailure {
    move |error| StageFailure { phase, error }
  }
}
