//! Sluice Graph
//!
//! This crate turns a [`PipelineDef`](sluice_config::PipelineDef) into a
//! [`Blueprint`]: a validated, flattened arena of node descriptors that is
//! ready to be wired into running nodes.
//!
//! Key differences from the configuration:
//! - Every node has a pipeline-unique name (reused keys get a suffix)
//! - Every node's stage kind is known (looked up in the plugin catalog)
//! - Graph shape is validated (outputs are leaves, everything else has children)
//! - Async flags below an async ancestor are cleared
//!
//! Building a blueprint never starts any work, so a validation failure
//! leaves nothing behind.

mod blueprint;
mod catalog;
mod error;

pub use blueprint::{Blueprint, NodeIndex, NodeKind, NodeSpec, ROOT_NAME};
pub use catalog::PluginCatalog;
pub use error::GraphError;
