//! Pipeline wiring and lifecycle.
//!
//! [`Pipeline::build`] turns a validated [`Blueprint`] into live nodes:
//! it instantiates every plugin up front, then links nodes children first
//! so each parent owns the edges to its already built children. Nothing is
//! spawned until [`Pipeline::start`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sluice_config::EngineSettings;
use sluice_graph::{Blueprint, GraphError, NodeKind, NodeSpec, ROOT_NAME};
use sluice_plugin::{Data, OutputChannel, Payload, Plugin, PluginRegistry};
use sluice_store::{AsyncJob, Bucket};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{EngineError, JobError};
use crate::job::{Job, Response};
use crate::lock;
use crate::node::{AsyncState, Mode, Next, Node, Stage};
use crate::pool::BufferPool;
use crate::resource::Resource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
  Built,
  Running,
  Stopped,
}

/// Outcome of [`Pipeline::recover_async_jobs`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
  /// Records replayed to a positive response.
  pub replayed: usize,
  /// Records replayed to a negative response.
  pub failed: usize,
  /// Records dropped without replay: unknown node or missing payload file.
  pub discarded: usize,
  /// Payload files removed because no record referred to them.
  pub orphans_removed: usize,
}

/// One configured pipeline graph.
pub struct Pipeline {
  name: String,
  root: Arc<Next>,
  nodes: HashMap<String, Arc<Node>>,
  bucket: Bucket,
  ingress: mpsc::Sender<Job>,
  /// Taken by the entry loop.
  inbox: Mutex<Option<mpsc::Receiver<Job>>>,
  /// One task per submitted or replayed job.
  active: TaskTracker,
  /// The entry loop.
  services: TaskTracker,
  shutdown: CancellationToken,
  state: Mutex<State>,
}

impl Pipeline {
  /// Wire live nodes for `blueprint`.
  ///
  /// Plugin instantiation errors are returned before any node exists.
  pub fn build(
    blueprint: &Blueprint,
    registry: &PluginRegistry,
    bucket: Bucket,
    settings: &EngineSettings,
  ) -> Result<Self, EngineError> {
    let mut plugins: Vec<Option<Plugin>> = Vec::with_capacity(blueprint.nodes().len());
    for spec in blueprint.nodes() {
      let plugin = match &spec.plugin {
        Some(name) => Some(registry.instantiate(name, &spec.options).map_err(|source| {
          EngineError::PluginInit {
            node: spec.name.clone(),
            source,
          }
        })?),
        None => None,
      };
      plugins.push(plugin);
    }

    let default_concurrency = settings.default_concurrency.unwrap_or_else(num_cpus::get);
    let mut built: Vec<Option<Arc<Node>>> = vec![None; blueprint.nodes().len()];

    for index in blueprint.children_first() {
      let spec = blueprint.node(index);
      let next = blueprint
        .children(index)
        .iter()
        .filter_map(|child| built[*child].clone())
        .map(|child| Next::new(child, settings.channel_capacity))
        .collect();

      let concurrency = spec.concurrency.unwrap_or(default_concurrency);
      let stage = stage(spec, plugins[index].take(), concurrency, settings)?;
      let mode = if spec.is_async {
        Mode::Async(AsyncState::new(bucket.clone()))
      } else {
        Mode::Sync
      };

      built[index] = Some(Arc::new(Node::new(
        spec.name.clone(),
        blueprint.pipeline().to_string(),
        stage,
        mode,
        next,
      )));
    }

    let root = built[blueprint.root()]
      .clone()
      .map(|node| Arc::new(Next::new(node, settings.channel_capacity)))
      .ok_or_else(|| GraphError::NodeNotFound(ROOT_NAME.to_string()))?;
    let nodes: HashMap<String, Arc<Node>> = built
      .into_iter()
      .flatten()
      .map(|node| (node.name().to_string(), node))
      .collect();

    let (ingress, inbox) = mpsc::channel(settings.ingress_capacity.max(1));

    Ok(Self {
      name: blueprint.pipeline().to_string(),
      root,
      nodes,
      bucket,
      ingress,
      inbox: Mutex::new(Some(inbox)),
      active: TaskTracker::new(),
      services: TaskTracker::new(),
      shutdown: CancellationToken::new(),
      state: Mutex::new(State::Built),
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn bucket(&self) -> &Bucket {
    &self.bucket
  }

  /// Names of every node, root included.
  pub fn node_names(&self) -> Vec<&str> {
    let mut names: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
    names.sort_unstable();
    names
  }

  /// Whether the named node acknowledges jobs before running them.
  pub fn is_async(&self, node: &str) -> Option<bool> {
    self.nodes.get(node).map(|node| node.is_async())
  }

  /// Free concurrency slots of the named node. `None` for the root and
  /// for nodes that have stopped.
  pub fn available(&self, node: &str) -> Option<usize> {
    self
      .nodes
      .get(node)
      .and_then(|node| node.stage().resource())
      .filter(|resource| !resource.is_closed())
      .map(|resource| resource.available())
  }

  pub fn is_running(&self) -> bool {
    *lock(&self.state) == State::Running
  }

  /// A handle for submitting jobs directly into the ingress channel.
  pub fn sender(&self) -> mpsc::Sender<Job> {
    self.ingress.clone()
  }

  /// Start every node and the entry loop. Does nothing unless freshly built.
  #[instrument(name = "pipeline_start", skip(self), fields(pipeline = %self.name))]
  pub fn start(&self) {
    {
      let mut state = lock(&self.state);
      if *state != State::Built {
        warn!(pipeline = %self.name, state = ?*state, "pipeline can only be started once");
        return;
      }
      *state = State::Running;
    }

    self.root.start();

    if let Some(inbox) = lock(&self.inbox).take() {
      self.services.spawn(serve(
        self.root.clone(),
        inbox,
        self.active.clone(),
        self.shutdown.clone(),
      ));
    }

    info!(pipeline = %self.name, nodes = self.nodes.len(), "pipeline started");
  }

  /// Submit a job and wait for its response.
  pub async fn submit(&self, payload: Payload, data: Data, cancel: CancellationToken) -> Response {
    if !self.is_running() {
      return JobError::PipelineStopped.into();
    }

    let (job, mut response) = Job::new(payload, data, cancel);
    if self.ingress.send(job).await.is_err() {
      return JobError::PipelineStopped.into();
    }
    response
      .recv()
      .await
      .unwrap_or_else(|| JobError::PipelineStopped.into())
  }

  /// Replay every job a previous process left in the bucket.
  ///
  /// Each record holds the output an async node handed to one of its
  /// children, so it is run directly by that child without repeating any
  /// ancestor, then deleted. A record of an async output replays only the
  /// delivery. Records run concurrently. Payload files no record refers to
  /// are removed afterwards.
  #[instrument(name = "pipeline_recover", skip(self), fields(pipeline = %self.name))]
  pub async fn recover_async_jobs(&self) -> Result<RecoveryReport, EngineError> {
    if !self.is_running() {
      return Err(EngineError::NotRunning(self.name.clone()));
    }

    let mut report = RecoveryReport::default();
    let mut replays = Vec::new();

    for AsyncJob { record, payload } in self.bucket.get_all_async_jobs().await? {
      let node = self.nodes.get(&record.node_id);
      let (node, payload) = match (node, payload) {
        (Some(node), Some(payload)) => (node.clone(), payload),
        (None, _) => {
          warn!(pipeline = %self.name, job_id = %record.id, node = %record.node_id, "discarding async job for unknown node");
          self.discard(&record.id).await;
          report.discarded += 1;
          continue;
        }
        (Some(_), None) => {
          warn!(pipeline = %self.name, job_id = %record.id, "discarding async job without payload");
          self.discard(&record.id).await;
          report.discarded += 1;
          continue;
        }
      };

      debug!(pipeline = %self.name, job_id = %record.id, node = %record.node_id, "replaying async job");
      let data = record.data.0;
      let handle = self
        .active
        .spawn(async move { node.run(payload, data, CancellationToken::new()).await });
      replays.push((record.id, handle));
    }

    for (id, handle) in replays {
      match handle.await {
        Ok(response) if response.is_ack() => report.replayed += 1,
        Ok(response) => {
          warn!(pipeline = %self.name, job_id = %id, response = %response, "replayed async job failed");
          report.failed += 1;
        }
        Err(e) => {
          error!(pipeline = %self.name, job_id = %id, error = %e, "replayed async job panicked");
          report.failed += 1;
        }
      }
      self.discard(&id).await;
    }

    report.orphans_removed = self.bucket.cleanup_orphans().await?;

    info!(
      pipeline = %self.name,
      replayed = report.replayed,
      failed = report.failed,
      discarded = report.discarded,
      orphans_removed = report.orphans_removed,
      "async job recovery finished"
    );
    Ok(report)
  }

  /// Stop accepting jobs, wait for every active job, then stop all nodes.
  ///
  /// Async nodes finish their background work before their children stop.
  #[instrument(name = "pipeline_stop", skip(self), fields(pipeline = %self.name))]
  pub async fn stop(&self) {
    {
      let mut state = lock(&self.state);
      let was = *state;
      *state = State::Stopped;
      if was != State::Running {
        return;
      }
    }

    self.shutdown.cancel();
    self.services.close();
    self.services.wait().await;

    self.active.close();
    self.active.wait().await;

    self.root.stop().await;
    info!(pipeline = %self.name, "pipeline stopped");
  }

  async fn discard(&self, id: &str) {
    if let Err(e) = self.bucket.delete_async_job(id).await {
      error!(pipeline = %self.name, job_id = %id, error = %e, "failed to delete async job record");
    }
  }
}

/// Instantiate the stage for one node.
fn stage(
  spec: &NodeSpec,
  plugin: Option<Plugin>,
  concurrency: usize,
  settings: &EngineSettings,
) -> Result<Stage, EngineError> {
  let resource = Resource::new(concurrency);
  let stage = match (spec.kind, plugin) {
    (NodeKind::Root, None) => Stage::Root,
    (NodeKind::Root, Some(_)) | (NodeKind::Plugin(_), None) => {
      return Err(EngineError::StageMismatch(spec.name.clone()));
    }
    (NodeKind::Plugin(_), Some(Plugin::Processor(plugin))) => Stage::Processor { plugin, resource },
    (NodeKind::Plugin(_), Some(Plugin::Inspector(plugin))) => Stage::Inspector { plugin, resource },
    (NodeKind::Plugin(_), Some(Plugin::StreamProcessor(plugin))) => Stage::StreamProcessor {
      plugin,
      resource,
      pool: BufferPool::new(settings.buffer_pool_size),
    },
    (NodeKind::Plugin(_), Some(Plugin::Output(plugin))) => {
      let (channel, worker) = OutputChannel::open(plugin, settings.channel_capacity);
      Stage::Output {
        channel,
        worker: Mutex::new(Some(worker)),
        resource,
      }
    }
  };
  Ok(stage)
}

/// Entry loop: one tracked relay task per submitted job.
async fn serve(
  root: Arc<Next>,
  mut inbox: mpsc::Receiver<Job>,
  active: TaskTracker,
  shutdown: CancellationToken,
) {
  loop {
    tokio::select! {
      _ = shutdown.cancelled() => break,
      job = inbox.recv() => {
        let Some(job) = job else {
          break;
        };
        active.spawn(relay(root.clone(), job));
      }
    }
  }
}

async fn relay(root: Arc<Next>, job: Job) {
  let Job {
    payload,
    data,
    cancel,
    reply,
  } = job;
  let (job, mut response) = Job::new(payload, data, cancel);

  let response = match root.send(job).await {
    Ok(()) => response.recv().await.unwrap_or_else(|| {
      JobError::NoResponse {
        node: ROOT_NAME.to_string(),
      }
      .into()
    }),
    Err(_) => JobError::PipelineStopped.into(),
  };
  let _ = reply.send(response).await;
}

#[cfg(test)]
mod tests {
  use sluice_plugin::PluginKind;

  use super::*;

  fn spec(kind: NodeKind) -> NodeSpec {
    NodeSpec {
      name: "resize".to_string(),
      plugin: Some("resize".to_string()),
      kind,
      is_async: false,
      concurrency: None,
      options: serde_json::Value::Null,
      parent: Some(0),
      children: Vec::new(),
    }
  }

  #[test]
  fn test_plugin_node_without_instance_fails() {
    let spec = spec(NodeKind::Plugin(PluginKind::Processor));

    let result = stage(&spec, None, 1, &EngineSettings::default());
    assert!(matches!(result, Err(EngineError::StageMismatch(name)) if name == "resize"));
  }

  #[test]
  fn test_root_without_instance_is_pass_through() {
    let spec = spec(NodeKind::Root);

    let result = stage(&spec, None, 1, &EngineSettings::default());
    assert!(matches!(result, Ok(Stage::Root)));
  }
}
