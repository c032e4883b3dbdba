use std::collections::HashMap;

use sluice_plugin::{PluginKind, PluginRegistry};

/// Lookup of the stage kind provided by a plugin name.
pub trait PluginCatalog {
  fn kind(&self, plugin: &str) -> Option<PluginKind>;
}

impl PluginCatalog for PluginRegistry {
  fn kind(&self, plugin: &str) -> Option<PluginKind> {
    PluginRegistry::kind(self, plugin)
  }
}

impl PluginCatalog for HashMap<&str, PluginKind> {
  fn kind(&self, plugin: &str) -> Option<PluginKind> {
    self.get(plugin).copied()
  }
}
