//! Sluice Config
//!
//! This crate contains the serializable configuration types for sluice.
//! These types describe pipelines before they are validated and wired into
//! running graphs by the engine.
//!
//! Configuration is loaded from JSON files (via the CLI). A pipeline is a
//! tree of [`NodeDef`]s keyed by node name; each node names the plugin it
//! wraps and lists its children under `next`.
//!
//! The engine takes these types, validates the graph shape against the
//! plugin registry, and builds the runtime node graph from the result.

mod node;
mod pipeline;
mod settings;

pub use node::NodeDef;
pub use pipeline::{Config, PipelineDef};
pub use settings::EngineSettings;
