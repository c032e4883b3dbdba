//! Sluice Plugin
//!
//! The contract between the pipeline engine and the plugins it runs. A
//! plugin is one of four kinds:
//!
//! - [`Processor`]: decode, process and encode a new payload.
//! - [`Inspector`]: decode and process read-only; children receive the
//!   original payload.
//! - [`StreamProcessor`]: like a processor, but encodes into a writer.
//! - [`Output`]: terminal stage delivering the payload somewhere external.
//!
//! Plugins are registered by name in a [`PluginRegistry`] which is built
//! once at startup and handed to the graph builder.

mod error;
mod output;
mod payload;
mod plugin;
mod registry;

pub use error::{Phase, PluginError, RegistryError, StageFailure};
pub use output::{Delivery, OutputChannel, OutputWorker};
pub use payload::{ByteReader, Data, Payload};
pub use plugin::{
  DynInspector, DynProcessor, DynStreamProcessor, Inspector, Output, Plugin, PluginKind,
  Processor, StreamProcessor,
};
pub use registry::PluginRegistry;
