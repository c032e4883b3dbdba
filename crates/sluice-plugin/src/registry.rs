use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{PluginError, RegistryError};
use crate::plugin::{Inspector, Output, Plugin, PluginKind, Processor, StreamProcessor};

type Factory = Box<dyn Fn(&serde_json::Value) -> Result<Plugin, PluginError> + Send + Sync>;

struct Entry {
  kind: PluginKind,
  factory: Factory,
}

/// Registry of the plugins available to pipelines.
///
/// Built once at startup and passed by reference to the graph builder.
/// Each entry is a factory creating a fresh plugin instance per node from
/// the node's `options`.
#[derive(Default)]
pub struct PluginRegistry {
  entries: HashMap<String, Entry>,
}

impl PluginRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a [`Processor`] factory.
  pub fn register_processor<P, F>(
    &mut self,
    name: impl Into<String>,
    factory: F,
  ) -> Result<(), RegistryError>
  where
    P: Processor,
    F: Fn(&serde_json::Value) -> Result<P, PluginError> + Send + Sync + 'static,
  {
    self.insert(
      name.into(),
      PluginKind::Processor,
      Box::new(move |options| Ok(Plugin::Processor(Arc::new(factory(options)?)))),
    )
  }

  /// Register an [`Inspector`] factory.
  pub fn register_inspector<P, F>(
    &mut self,
    name: impl Into<String>,
    factory: F,
  ) -> Result<(), RegistryError>
  where
    P: Inspector,
    F: Fn(&serde_json::Value) -> Result<P, PluginError> + Send + Sync + 'static,
  {
    self.insert(
      name.into(),
      PluginKind::Inspector,
      Box::new(move |options| Ok(Plugin::Inspector(Arc::new(factory(options)?)))),
    )
  }

  /// Register a [`StreamProcessor`] factory.
  pub fn register_stream_processor<P, F>(
    &mut self,
    name: impl Into<String>,
    factory: F,
  ) -> Result<(), RegistryError>
  where
    P: StreamProcessor,
    F: Fn(&serde_json::Value) -> Result<P, PluginError> + Send + Sync + 'static,
  {
    self.insert(
      name.into(),
      PluginKind::StreamProcessor,
      Box::new(move |options| Ok(Plugin::StreamProcessor(Arc::new(factory(options)?)))),
    )
  }

  /// Register an [`Output`] factory.
  pub fn register_output<P, F>(&mut self, name: impl Into<String>, factory: F) -> Result<(), RegistryError>
  where
    P: Output,
    F: Fn(&serde_json::Value) -> Result<P, PluginError> + Send + Sync + 'static,
  {
    self.insert(
      name.into(),
      PluginKind::Output,
      Box::new(move |options| Ok(Plugin::Output(Arc::new(factory(options)?)))),
    )
  }

  /// The kind of stage the named plugin provides.
  pub fn kind(&self, name: &str) -> Option<PluginKind> {
    self.entries.get(name).map(|entry| entry.kind)
  }

  /// Create a new instance of the named plugin.
  pub fn instantiate(
    &self,
    name: &str,
    options: &serde_json::Value,
  ) -> Result<Plugin, RegistryError> {
    let entry = self
      .entries
      .get(name)
      .ok_or_else(|| RegistryError::PluginNotFound(name.to_string()))?;

    (entry.factory)(options).map_err(|source| RegistryError::Init {
      name: name.to_string(),
      source,
    })
  }

  /// Names of all registered plugins, sorted.
  pub fn names(&self) -> Vec<&str> {
    let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
    names.sort_unstable();
    names
  }

  fn insert(&mut self, name: String, kind: PluginKind, factory: Factory) -> Result<(), RegistryError> {
    if self.entries.contains_key(&name) {
      return Err(RegistryError::DuplicatePluginName(name));
    }
    self.entries.insert(name, Entry { kind, factory });
    Ok(())
  }
}
