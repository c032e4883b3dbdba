use serde::{Deserialize, Serialize};

/// Engine tuning knobs shared by every pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
  /// Buffer size of each edge's delivery channel.
  pub channel_capacity: usize,
  /// Buffer size of each pipeline's ingress channel.
  pub ingress_capacity: usize,
  /// Concurrency for nodes that don't configure one. `None` uses the host core count.
  pub default_concurrency: Option<usize>,
  /// Number of encode buffers kept per stream processor.
  pub buffer_pool_size: usize,
}

impl Default for EngineSettings {
  fn default() -> Self {
    Self {
      channel_capacity: 64,
      ingress_capacity: 128,
      default_concurrency: None,
      buffer_pool_size: 4,
    }
  }
}
