//! Nodes and edges.
//!
//! A [`Node`] runs one plugin stage. It owns the [`Next`] edges to its
//! children; every edge carries its own bounded job channel which the
//! parent closes when it stops.

use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, join_all};
use sluice_mirror::{MirrorBuffer, MirrorSource};
use sluice_plugin::{
  Data, DynInspector, DynProcessor, DynStreamProcessor, OutputChannel, OutputWorker, Payload,
  PluginError,
};
use sluice_store::Bucket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tracing::{debug, error, info, warn};

use crate::error::{AcquireError, JobError};
use crate::job::{Job, Response};
use crate::lock;
use crate::pool::BufferPool;
use crate::resource::Resource;

/// What a node does with a job.
pub(crate) enum Stage {
  /// Forwards every job unchanged to its single child.
  Root,
  Processor {
    plugin: Arc<dyn DynProcessor>,
    resource: Resource,
  },
  Inspector {
    plugin: Arc<dyn DynInspector>,
    resource: Resource,
  },
  StreamProcessor {
    plugin: Arc<dyn DynStreamProcessor>,
    resource: Resource,
    pool: BufferPool,
  },
  Output {
    channel: OutputChannel,
    /// Taken when the node starts.
    worker: Mutex<Option<OutputWorker>>,
    resource: Resource,
  },
}

impl Stage {
  pub(crate) fn resource(&self) -> Option<&Resource> {
    match self {
      Stage::Root => None,
      Stage::Processor { resource, .. }
      | Stage::Inspector { resource, .. }
      | Stage::StreamProcessor { resource, .. }
      | Stage::Output { resource, .. } => Some(resource),
    }
  }
}

/// How a node answers the job's sender.
pub(crate) enum Mode {
  /// Reply once the subtree has finished.
  Sync,
  /// Reply `Ack`, then run the stage in the background and persist its
  /// output before handing it to the children.
  Async(AsyncState),
}

pub(crate) struct AsyncState {
  bucket: Bucket,
  results: mpsc::UnboundedSender<AsyncResult>,
  /// Taken when the node starts.
  collector: Mutex<Option<mpsc::UnboundedReceiver<AsyncResult>>>,
  /// One token per job between acceptance and record deletion.
  pending: TaskTracker,
}

impl AsyncState {
  pub(crate) fn new(bucket: Bucket) -> Self {
    let (results, collector) = mpsc::unbounded_channel();
    Self {
      bucket,
      results,
      collector: Mutex::new(Some(collector)),
      pending: TaskTracker::new(),
    }
  }
}

/// Outcome of one background job, handed to the collector.
struct AsyncResult {
  records: Vec<String>,
  response: Response,
  _slot: TaskTrackerToken,
}

/// Records written while an async node hands its output downstream.
///
/// Each record names the node its payload enters next, so a replay starts
/// there and never repeats the work that produced it.
struct Handoff<'a> {
  bucket: &'a Bucket,
  records: Vec<String>,
}

impl Handoff<'_> {
  async fn persist(
    &mut self,
    node: &str,
    target: &str,
    payload: Payload,
    data: &Data,
  ) -> Result<Payload, JobError> {
    let (record, payload) = self
      .bucket
      .create_async_job(target, payload, data)
      .await
      .map_err(|source| JobError::Persistence {
        node: node.to_string(),
        source,
      })?;
    self.records.push(record.id);
    Ok(payload)
  }
}

pub(crate) struct Node {
  name: String,
  pipeline: String,
  stage: Stage,
  mode: Mode,
  next: Vec<Next>,
  /// The receive loop and one task per accepted job.
  jobs: TaskTracker,
  /// The async collector and the output worker.
  services: TaskTracker,
  shutdown: CancellationToken,
}

impl Node {
  pub(crate) fn new(
    name: String,
    pipeline: String,
    stage: Stage,
    mode: Mode,
    next: Vec<Next>,
  ) -> Self {
    Self {
      name,
      pipeline,
      stage,
      mode,
      next,
      jobs: TaskTracker::new(),
      services: TaskTracker::new(),
      shutdown: CancellationToken::new(),
    }
  }

  pub(crate) fn name(&self) -> &str {
    &self.name
  }

  pub(crate) fn stage(&self) -> &Stage {
    &self.stage
  }

  pub(crate) fn is_async(&self) -> bool {
    matches!(self.mode, Mode::Async(_))
  }

  /// Start the subtree, children first, then serve `inbox`.
  pub(crate) fn start(self: &Arc<Self>, inbox: mpsc::Receiver<Job>) {
    for next in &self.next {
      next.start();
    }

    if let Mode::Async(state) = &self.mode {
      if let Some(results) = lock(&state.collector).take() {
        self.services.spawn(collect(
          self.name.clone(),
          state.bucket.clone(),
          results,
          self.shutdown.clone(),
        ));
      }
    }

    if let Stage::Output { worker, .. } = &self.stage {
      if let Some(worker) = lock(worker).take() {
        self.services.spawn(worker.run(self.shutdown.clone()));
      }
    }

    let node = self.clone();
    self.jobs.spawn(node.receive(inbox));
    debug!(pipeline = %self.pipeline, node = %self.name, "node started");
  }

  /// Stop the subtree.
  ///
  /// The parent must have closed this node's edge first so the receive
  /// loop can drain and end.
  pub(crate) fn stop(self: Arc<Self>) -> BoxFuture<'static, ()> {
    Box::pin(async move {
      self.jobs.close();
      self.jobs.wait().await;
      if let Some(resource) = self.stage.resource() {
        resource.close();
      }

      if let Mode::Async(state) = &self.mode {
        if !state.pending.is_empty() {
          info!(
            pipeline = %self.pipeline,
            node = %self.name,
            pending = state.pending.len(),
            "waiting for async jobs"
          );
        }
        state.pending.close();
        state.pending.wait().await;
      }

      self.shutdown.cancel();
      self.services.close();
      self.services.wait().await;

      join_all(self.next.iter().map(Next::stop)).await;
      debug!(pipeline = %self.pipeline, node = %self.name, "node stopped");
    })
  }

  async fn receive(self: Arc<Self>, mut inbox: mpsc::Receiver<Job>) {
    while let Some(job) = inbox.recv().await {
      let node = self.clone();
      self.jobs.spawn(node.accept(job));
    }
  }

  async fn accept(self: Arc<Self>, job: Job) {
    match &self.mode {
      Mode::Sync => {
        let Job {
          payload,
          data,
          cancel,
          reply,
        } = job;
        let response = self.run(payload, data, cancel).await;
        // The sender may have given up on the job.
        let _ = reply.send(response).await;
      }
      Mode::Async(state) => self.accept_async(state, job).await,
    }
  }

  async fn accept_async(&self, state: &AsyncState, job: Job) {
    let Job {
      payload,
      data,
      reply,
      ..
    } = job;

    let slot = state.pending.token();
    let _ = reply.send(Response::Ack).await;
    drop(reply);
    debug!(pipeline = %self.pipeline, node = %self.name, "async job accepted");

    let mut handoff = Handoff {
      bucket: &state.bucket,
      records: Vec::new(),
    };
    // Detached from the sender's cancellation.
    let response = self
      .execute(payload, data, CancellationToken::new(), Some(&mut handoff))
      .await;

    let result = AsyncResult {
      records: handoff.records,
      response,
      _slot: slot,
    };
    if state.results.send(result).is_err() {
      warn!(pipeline = %self.pipeline, node = %self.name, "async collector is gone");
    }
  }

  /// Run the stage body and the subtree below it.
  pub(crate) async fn run(&self, payload: Payload, data: Data, cancel: CancellationToken) -> Response {
    self.execute(payload, data, cancel, None).await
  }

  /// Run the stage body, persisting what leaves it when `handoff` is set.
  async fn execute(
    &self,
    payload: Payload,
    mut data: Data,
    cancel: CancellationToken,
    handoff: Option<&mut Handoff<'_>>,
  ) -> Response {
    match &self.stage {
      Stage::Root => self.fan_out(vec![payload], data, &cancel, handoff).await,

      Stage::Processor { plugin, resource } => {
        let encoded = {
          let _permit = match resource.acquire(&cancel).await {
            Ok(permit) => permit,
            Err(source) => return self.acquire_failed(source),
          };
          match plugin.transform(payload, &mut data).await {
            Ok(encoded) => encoded,
            Err(failure) => return self.failed(Response::from_failure(&self.name, failure)),
          }
        };

        let payloads = self
          .next
          .iter()
          .map(|_| Payload::Bytes(encoded.clone()))
          .collect();
        self.fan_out(payloads, data, &cancel, handoff).await
      }

      Stage::Inspector { plugin, resource } => {
        let (own, payloads) = self.clone_payload(payload);
        {
          let _permit = match resource.acquire(&cancel).await {
            Ok(permit) => permit,
            Err(source) => return self.acquire_failed(source),
          };
          if let Err(failure) = plugin.inspect(own, &mut data).await {
            return self.failed(Response::from_failure(&self.name, failure));
          }
        }

        self.fan_out(payloads, data, &cancel, handoff).await
      }

      Stage::StreamProcessor {
        plugin,
        resource,
        pool,
      } => {
        let mut mirror = MirrorBuffer::with_buffer(pool.get());
        {
          let _permit = match resource.acquire(&cancel).await {
            Ok(permit) => permit,
            Err(source) => return self.acquire_failed(source),
          };
          let encoded = plugin.transform_into(payload, &mut data, &mut mirror).await;
          mirror.close();
          if let Err(failure) = encoded {
            return self.failed(Response::from_failure(&self.name, failure));
          }
        }

        let payloads = self
          .next
          .iter()
          .map(|_| Payload::stream(mirror.reader()))
          .collect();
        let response = self.fan_out(payloads, data, &cancel, handoff).await;

        // Readers kept alive past fan-in leave the buffer to them.
        if let Some(buffer) = mirror.into_buffer() {
          pool.put(buffer);
        }
        response
      }

      Stage::Output {
        channel, resource, ..
      } => {
        // An output has no children; its record replays the delivery itself.
        let payload = match handoff {
          Some(handoff) => match handoff.persist(&self.name, &self.name, payload, &data).await {
            Ok(payload) => payload,
            Err(e) => return self.failed(e.into()),
          },
          None => payload,
        };
        let _permit = match resource.acquire(&cancel).await {
          Ok(permit) => permit,
          Err(source) => return self.acquire_failed(source),
        };
        let response = match channel.deliver(payload, data, cancel.clone()).await {
          Ok(()) => Response::Ack,
          Err(PluginError::Rejected(reason)) => Response::NoAck { reason },
          Err(source) => Response::Error(JobError::Deliver {
            node: self.name.clone(),
            source,
          }),
        };
        if response.is_negative() {
          return self.failed(response);
        }
        response
      }
    }
  }

  /// One independent copy of `payload` for the inspector and one per child.
  ///
  /// Byte payloads share their allocation. Streams are read once through a
  /// [`MirrorSource`].
  fn clone_payload(&self, payload: Payload) -> (Payload, Vec<Payload>) {
    match payload {
      Payload::Bytes(bytes) => {
        let children = self
          .next
          .iter()
          .map(|_| Payload::Bytes(bytes.clone()))
          .collect();
        (Payload::Bytes(bytes), children)
      }
      Payload::Stream(upstream) => {
        let mirror = MirrorSource::from_boxed(upstream);
        let children = self
          .next
          .iter()
          .map(|_| Payload::stream(mirror.reader()))
          .collect();
        (Payload::stream(mirror.reader()), children)
      }
    }
  }

  /// Send one job per child and fold their responses.
  ///
  /// Every dispatched job is awaited, even after a negative response. The
  /// first negative response wins; a child that could not be reached or
  /// whose payload could not be persisted counts as one.
  async fn fan_out(
    &self,
    payloads: Vec<Payload>,
    data: Data,
    cancel: &CancellationToken,
    mut handoff: Option<&mut Handoff<'_>>,
  ) -> Response {
    let child_cancel = cancel.child_token();
    let _cancel_children = child_cancel.clone().drop_guard();

    let (reply, mut responses) = mpsc::channel(self.next.len().max(1));
    let mut aggregate: Option<Response> = None;
    let mut dispatched = 0;

    for (next, payload) in self.next.iter().zip(payloads) {
      let payload = match handoff.as_deref_mut() {
        Some(handoff) => match handoff.persist(&self.name, next.name(), payload, &data).await {
          Ok(payload) => payload,
          Err(e) => {
            error!(pipeline = %self.pipeline, node = %self.name, next = %next.name(), error = %e, "failed to persist async handoff");
            aggregate.get_or_insert(e.into());
            continue;
          }
        },
        None => payload,
      };
      let job = Job {
        payload,
        data: data.clone(),
        cancel: child_cancel.clone(),
        reply: reply.clone(),
      };
      match next.send(job).await {
        Ok(()) => dispatched += 1,
        Err(e) => {
          warn!(pipeline = %self.pipeline, node = %self.name, error = %e, "failed to dispatch job");
          aggregate.get_or_insert(e.into());
        }
      }
    }
    drop(reply);

    for _ in 0..dispatched {
      let Some(response) = responses.recv().await else {
        // A child dropped its job; the remaining replies can't arrive.
        aggregate.get_or_insert(
          JobError::NoResponse {
            node: self.name.clone(),
          }
          .into(),
        );
        break;
      };
      if response.is_negative() && aggregate.is_none() {
        aggregate = Some(response);
      }
    }

    aggregate.unwrap_or(Response::Ack)
  }

  fn acquire_failed(&self, source: AcquireError) -> Response {
    self.failed(
      JobError::Acquire {
        node: self.name.clone(),
        source,
      }
      .into(),
    )
  }

  /// Log a negative response produced by this node's own stage.
  fn failed(&self, response: Response) -> Response {
    match &response {
      Response::NoAck { reason } => {
        warn!(pipeline = %self.pipeline, node = %self.name, reason = %reason, "job rejected")
      }
      Response::Error(e) => {
        error!(pipeline = %self.pipeline, node = %self.name, error = %e, "job failed")
      }
      Response::Ack => {}
    }
    response
  }
}

/// Delete finished async records. Failures are logged, never retried.
async fn collect(
  node: String,
  bucket: Bucket,
  mut results: mpsc::UnboundedReceiver<AsyncResult>,
  shutdown: CancellationToken,
) {
  loop {
    tokio::select! {
      _ = shutdown.cancelled() => break,
      result = results.recv() => {
        let Some(result) = result else {
          break;
        };
        if result.response.is_negative() {
          warn!(node = %node, records = result.records.len(), response = %result.response, "async job finished unsuccessfully");
        } else {
          debug!(node = %node, records = result.records.len(), "async job finished");
        }
        for id in &result.records {
          if let Err(e) = bucket.delete_async_job(id).await {
            error!(node = %node, job_id = %id, error = %e, "failed to delete async job record");
          }
        }
      }
    }
  }
}

/// Edge from a parent to one child, with the child's job channel.
pub(crate) struct Next {
  node: Arc<Node>,
  sender: Mutex<Option<mpsc::Sender<Job>>>,
  /// Handed to the child when it starts.
  receiver: Mutex<Option<mpsc::Receiver<Job>>>,
}

impl Next {
  pub(crate) fn new(node: Arc<Node>, capacity: usize) -> Self {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    Self {
      node,
      sender: Mutex::new(Some(sender)),
      receiver: Mutex::new(Some(receiver)),
    }
  }

  pub(crate) fn name(&self) -> &str {
    &self.node.name
  }

  /// Start the child. Later calls do nothing.
  pub(crate) fn start(&self) {
    if let Some(inbox) = lock(&self.receiver).take() {
      self.node.start(inbox);
    }
  }

  pub(crate) async fn send(&self, job: Job) -> Result<(), JobError> {
    let stopped = || JobError::NodeStopped {
      node: self.node.name.clone(),
    };
    let Some(sender) = lock(&self.sender).clone() else {
      return Err(stopped());
    };
    sender.send(job).await.map_err(|_| stopped())
  }

  /// Close the channel. Jobs already queued are still run.
  pub(crate) fn close(&self) {
    lock(&self.sender).take();
  }

  /// Close the channel and stop the child's subtree.
  pub(crate) fn stop(&self) -> BoxFuture<'static, ()> {
    self.close();
    self.node.clone().stop()
  }
}
