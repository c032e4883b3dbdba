use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One configured stage of a pipeline.
///
/// The node's name is the key it is stored under in its parent's `next`
/// map (or the pipeline's `nodes` map).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
  /// Registered plugin name. Defaults to the node's key.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub plugin: Option<String>,

  /// Acknowledge immediately and finish the work in the background.
  #[serde(default, rename = "async")]
  pub is_async: bool,

  /// Maximum number of jobs inside the stage body at once.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub concurrency: Option<usize>,

  /// Plugin specific options handed to the plugin factory.
  #[serde(default)]
  pub options: serde_json::Value,

  /// Child nodes, keyed by name.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub next: BTreeMap<String, NodeDef>,
}

impl NodeDef {
  /// Create a node definition for the given plugin with no children.
  pub fn plugin(name: impl Into<String>) -> Self {
    Self {
      plugin: Some(name.into()),
      ..Self::default()
    }
  }

  /// Add a child node.
  pub fn with_next(mut self, name: impl Into<String>, child: NodeDef) -> Self {
    self.next.insert(name.into(), child);
    self
  }

  /// Mark the node as async.
  pub fn asynchronous(mut self) -> Self {
    self.is_async = true;
    self
  }

  /// Set the node's concurrency.
  pub fn with_concurrency(mut self, concurrency: usize) -> Self {
    self.concurrency = Some(concurrency);
    self
  }

  /// Set the plugin options.
  pub fn with_options(mut self, options: serde_json::Value) -> Self {
    self.options = options;
    self
  }

  /// The plugin this node wraps, falling back to the node's key.
  pub fn plugin_name<'a>(&'a self, key: &'a str) -> &'a str {
    self.plugin.as_deref().unwrap_or(key)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_plugin_defaults_to_key() {
    let node: NodeDef = serde_json::from_str("{}").unwrap();
    assert_eq!(node.plugin_name("resize"), "resize");
    assert!(!node.is_async);
    assert!(node.next.is_empty());
  }

  #[test]
  fn test_nested_definition() {
    let node: NodeDef = serde_json::from_str(
      r#"{
        "plugin": "passthrough",
        "async": true,
        "concurrency": 2,
        "next": { "disk": { "plugin": "file", "options": { "dir": "/tmp/out" } } }
      }"#,
    )
    .unwrap();

    assert_eq!(node.plugin_name("ignored"), "passthrough");
    assert!(node.is_async);
    assert_eq!(node.concurrency, Some(2));
    assert_eq!(node.next["disk"].options["dir"], "/tmp/out");
  }
}
