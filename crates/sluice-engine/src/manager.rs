use std::collections::BTreeMap;
use std::path::Path;

use futures::future::join_all;
use sluice_config::Config;
use sluice_graph::Blueprint;
use sluice_plugin::{Data, Payload, PluginRegistry};
use sluice_store::{Bucket, Database};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::error::EngineError;
use crate::job::Response;
use crate::pipeline::{Pipeline, RecoveryReport};

/// Database file name inside the data directory.
pub const DATABASE_FILE: &str = "sluice.db";

/// Owns every configured pipeline.
///
/// # Usage
///
/// ```ignore
/// let manager = Manager::build(&config, &registry, &data_dir).await?;
/// manager.start();
/// manager.recover().await?;
///
/// let response = manager.submit("thumbs", payload, data, cancel).await?;
///
/// manager.stop().await;
/// ```
pub struct Manager {
  pipelines: BTreeMap<String, Pipeline>,
  database: Database,
}

impl Manager {
  /// Validate and wire every pipeline in `config`.
  ///
  /// All graphs are validated before the database is opened; any invalid
  /// pipeline aborts the whole build.
  #[instrument(name = "manager_build", skip_all, fields(data_dir = %data_dir.display()))]
  pub async fn build(
    config: &Config,
    registry: &PluginRegistry,
    data_dir: &Path,
  ) -> Result<Self, EngineError> {
    let mut blueprints: BTreeMap<String, Blueprint> = BTreeMap::new();
    for def in &config.pipelines {
      if blueprints.contains_key(&def.name) {
        return Err(EngineError::DuplicatePipeline(def.name.clone()));
      }
      blueprints.insert(def.name.clone(), Blueprint::build(def, registry)?);
    }

    let database = Database::open(data_dir.join(DATABASE_FILE)).await?;

    let mut pipelines = BTreeMap::new();
    for (name, blueprint) in blueprints {
      let bucket = Bucket::open(database.clone(), &name, data_dir.join("buckets").join(&name)).await?;
      let pipeline = Pipeline::build(&blueprint, registry, bucket, &config.settings)?;
      pipelines.insert(name, pipeline);
    }

    info!(pipelines = pipelines.len(), "pipelines built");
    Ok(Self {
      pipelines,
      database,
    })
  }

  pub fn database(&self) -> &Database {
    &self.database
  }

  pub fn pipeline(&self, name: &str) -> Option<&Pipeline> {
    self.pipelines.get(name)
  }

  pub fn pipeline_names(&self) -> Vec<&str> {
    self.pipelines.keys().map(String::as_str).collect()
  }

  pub fn start(&self) {
    for pipeline in self.pipelines.values() {
      pipeline.start();
    }
  }

  /// Replay persisted async jobs in every pipeline.
  pub async fn recover(&self) -> Result<BTreeMap<String, RecoveryReport>, EngineError> {
    let mut reports = BTreeMap::new();
    for (name, pipeline) in &self.pipelines {
      reports.insert(name.clone(), pipeline.recover_async_jobs().await?);
    }
    Ok(reports)
  }

  /// Submit a job to the named pipeline and wait for its response.
  pub async fn submit(
    &self,
    pipeline: &str,
    payload: Payload,
    data: Data,
    cancel: CancellationToken,
  ) -> Result<Response, EngineError> {
    let pipeline = self
      .pipelines
      .get(pipeline)
      .ok_or_else(|| EngineError::PipelineNotFound(pipeline.to_string()))?;
    Ok(pipeline.submit(payload, data, cancel).await)
  }

  /// Stop every pipeline, then close the database.
  pub async fn stop(&self) {
    join_all(self.pipelines.values().map(Pipeline::stop)).await;
    self.database.close().await;
    info!("all pipelines stopped");
  }
}
