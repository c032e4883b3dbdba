use std::collections::HashSet;

use sluice_config::{NodeDef, PipelineDef};
use sluice_plugin::PluginKind;
use tracing::warn;

use crate::catalog::PluginCatalog;
use crate::error::GraphError;

/// Name of the pass-through entry node every pipeline starts with.
pub const ROOT_NAME: &str = "root";

/// Position of a node in a [`Blueprint`].
pub type NodeIndex = usize;

/// The stage a node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
  /// The pipeline's transparent entry node.
  Root,
  Plugin(PluginKind),
}

/// A validated node descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSpec {
  /// Pipeline-unique node name.
  pub name: String,
  /// Registered plugin name. `None` for the root.
  pub plugin: Option<String>,
  pub kind: NodeKind,
  pub is_async: bool,
  pub concurrency: Option<usize>,
  pub options: serde_json::Value,
  pub parent: Option<NodeIndex>,
  pub children: Vec<NodeIndex>,
}

/// A validated pipeline graph.
///
/// Nodes are stored in pre-order: the root is at index 0 and every parent
/// comes before its children.
#[derive(Debug, Clone)]
pub struct Blueprint {
  pipeline: String,
  nodes: Vec<NodeSpec>,
}

impl Blueprint {
  /// Flatten and validate a pipeline definition.
  pub fn build(def: &PipelineDef, catalog: &impl PluginCatalog) -> Result<Self, GraphError> {
    let root = NodeSpec {
      name: ROOT_NAME.to_string(),
      plugin: None,
      kind: NodeKind::Root,
      is_async: false,
      concurrency: None,
      options: serde_json::Value::Null,
      parent: None,
      children: Vec::new(),
    };

    let mut builder = Builder {
      nodes: vec![root],
      taken: HashSet::from([ROOT_NAME.to_string()]),
    };
    for (key, node) in &def.nodes {
      builder.add(0, key, node, catalog)?;
    }

    let mut blueprint = Blueprint {
      pipeline: def.name.clone(),
      nodes: builder.nodes,
    };
    blueprint.validate_shape()?;
    blueprint.clear_nested_async();

    Ok(blueprint)
  }

  /// Name of the pipeline this blueprint was built from.
  pub fn pipeline(&self) -> &str {
    &self.pipeline
  }

  pub fn root(&self) -> NodeIndex {
    0
  }

  pub fn node(&self, index: NodeIndex) -> &NodeSpec {
    &self.nodes[index]
  }

  pub fn nodes(&self) -> &[NodeSpec] {
    &self.nodes
  }

  pub fn children(&self, index: NodeIndex) -> &[NodeIndex] {
    &self.nodes[index].children
  }

  /// Find a node by name.
  pub fn find(&self, name: &str) -> Option<NodeIndex> {
    self.nodes.iter().position(|node| node.name == name)
  }

  /// Indices ordered so every child comes before its parent.
  pub fn children_first(&self) -> impl Iterator<Item = NodeIndex> {
    (0..self.nodes.len()).rev()
  }

  /// The nearest ancestor of `index` marked async.
  pub fn async_ancestor(&self, index: NodeIndex) -> Option<NodeIndex> {
    let mut current = self.nodes[index].parent;
    while let Some(parent) = current {
      if self.nodes[parent].is_async {
        return Some(parent);
      }
      current = self.nodes[parent].parent;
    }
    None
  }

  fn validate_shape(&self) -> Result<(), GraphError> {
    for node in &self.nodes {
      let children = node.children.len();
      match node.kind {
        NodeKind::Root => {
          if children == 0 {
            return Err(GraphError::EmptyPipeline(self.pipeline.clone()));
          }
          if children > 1 {
            return Err(GraphError::InvalidShape {
              node: node.name.clone(),
              reason: format!("the root needs exactly one entry node, found {}", children),
            });
          }
        }
        NodeKind::Plugin(kind) if kind.is_output() => {
          if children > 0 {
            return Err(GraphError::InvalidShape {
              node: node.name.clone(),
              reason: format!("output nodes cannot have next nodes, found {}", children),
            });
          }
        }
        NodeKind::Plugin(kind) => {
          if children == 0 {
            return Err(GraphError::InvalidShape {
              node: node.name.clone(),
              reason: format!("{} nodes need at least one next node", kind),
            });
          }
        }
      }
    }
    Ok(())
  }

  /// An async boundary may appear at most once on any root-to-leaf path.
  fn clear_nested_async(&mut self) {
    for index in 0..self.nodes.len() {
      if !self.nodes[index].is_async {
        continue;
      }
      if let Some(ancestor) = self.async_ancestor(index) {
        warn!(
          pipeline = %self.pipeline,
          node = %self.nodes[index].name,
          async_ancestor = %self.nodes[ancestor].name,
          "node is below an async node, running it synchronously"
        );
        self.nodes[index].is_async = false;
      }
    }
  }
}

struct Builder {
  nodes: Vec<NodeSpec>,
  taken: HashSet<String>,
}

impl Builder {
  fn add(
    &mut self,
    parent: NodeIndex,
    key: &str,
    def: &NodeDef,
    catalog: &impl PluginCatalog,
  ) -> Result<NodeIndex, GraphError> {
    let name = self.unique_name(key);
    let plugin = def.plugin_name(key);
    let kind = catalog
      .kind(plugin)
      .ok_or_else(|| GraphError::PluginNotFound {
        node: name.clone(),
        plugin: plugin.to_string(),
      })?;

    let index = self.nodes.len();
    self.nodes.push(NodeSpec {
      name,
      plugin: Some(plugin.to_string()),
      kind: NodeKind::Plugin(kind),
      is_async: def.is_async,
      concurrency: def.concurrency,
      options: def.options.clone(),
      parent: Some(parent),
      children: Vec::new(),
    });
    self.nodes[parent].children.push(index);

    for (child_key, child) in &def.next {
      self.add(index, child_key, child, catalog)?;
    }

    Ok(index)
  }

  fn unique_name(&mut self, key: &str) -> String {
    let mut name = key.to_string();
    let mut suffix = 2;
    while self.taken.contains(&name) {
      name = format!("{}-{}", key, suffix);
      suffix += 1;
    }
    self.taken.insert(name.clone());
    name
  }
}
