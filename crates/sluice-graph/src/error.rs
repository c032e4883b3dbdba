use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
  #[error("pipeline '{0}' has no entry node")]
  EmptyPipeline(String),

  #[error("invalid graph shape at node '{node}': {reason}")]
  InvalidShape { node: String, reason: String },

  #[error("node '{node}' uses unknown plugin '{plugin}'")]
  PluginNotFound { node: String, plugin: String },

  #[error("node not found: {0}")]
  NodeNotFound(String),
}
