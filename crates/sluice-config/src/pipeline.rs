use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::node::NodeDef;
use crate::settings::EngineSettings;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
  /// Directory holding the database and async payload files.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data_dir: Option<PathBuf>,

  #[serde(default)]
  pub settings: EngineSettings,

  pub pipelines: Vec<PipelineDef>,
}

/// A configured pipeline.
///
/// `nodes` holds the single entry node the pipeline's root forwards to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDef {
  pub name: String,
  pub nodes: BTreeMap<String, NodeDef>,
}

impl PipelineDef {
  /// Create a pipeline with a single entry node.
  pub fn new(name: impl Into<String>, entry: impl Into<String>, node: NodeDef) -> Self {
    Self {
      name: name.into(),
      nodes: BTreeMap::from([(entry.into(), node)]),
    }
  }
}
