use std::fmt;

use sluice_plugin::{Data, Payload, StageFailure};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::JobError;

/// One unit of work travelling through a pipeline.
pub struct Job {
  pub payload: Payload,
  pub data: Data,
  pub cancel: CancellationToken,
  /// Receives exactly one [`Response`] for this job.
  pub reply: mpsc::Sender<Response>,
}

impl Job {
  /// Create a job together with the receiver its response arrives on.
  pub fn new(
    payload: Payload,
    data: Data,
    cancel: CancellationToken,
  ) -> (Job, mpsc::Receiver<Response>) {
    let (reply, response) = mpsc::channel(1);
    let job = Job {
      payload,
      data,
      cancel,
      reply,
    };
    (job, response)
  }
}

impl fmt::Debug for Job {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Job")
      .field("payload", &self.payload)
      .field("data", &self.data)
      .finish_non_exhaustive()
  }
}

/// Terminal outcome of a job.
#[derive(Debug)]
pub enum Response {
  Ack,
  /// A plugin rejected the job on purpose.
  NoAck { reason: String },
  Error(JobError),
}

impl Response {
  pub fn is_ack(&self) -> bool {
    matches!(self, Response::Ack)
  }

  pub fn is_negative(&self) -> bool {
    !self.is_ack()
  }

  /// Convert a failed plugin call at `node`.
  pub(crate) fn from_failure(node: &str, failure: StageFailure) -> Response {
    use sluice_plugin::{Phase, PluginError};

    let node = node.to_string();
    match failure.error {
      PluginError::Rejected(reason) => Response::NoAck { reason },
      source => Response::Error(match failure.phase {
        Phase::Decode => JobError::Decode { node, source },
        Phase::Process => JobError::Process { node, source },
        Phase::Encode => JobError::Encode { node, source },
        Phase::Deliver => JobError::Deliver { node, source },
      }),
    }
  }
}

impl From<JobError> for Response {
  fn from(error: JobError) -> Self {
    Response::Error(error)
  }
}

impl fmt::Display for Response {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Response::Ack => f.write_str("ack"),
      Response::NoAck { reason } => write!(f, "no ack: {}", reason),
      Response::Error(e) => write!(f, "error: {}", e),
    }
  }
}

#[cfg(test)]
mod tests {
  use sluice_plugin::{Phase, PluginError};

  use super::*;

  #[test]
  fn test_rejection_becomes_no_ack() {
    let failure = StageFailure::at(Phase::Process)(PluginError::rejected("too small"));

    let response = Response::from_failure("resize", failure);
    assert!(matches!(response, Response::NoAck { ref reason } if reason == "too small"));
    assert!(response.is_negative());
  }

  #[test]
  fn test_failure_keeps_phase_and_node() {
    let failure = StageFailure::at(Phase::Encode)(PluginError::failed("boom"));

    let response = Response::from_failure("resize", failure);
    assert!(matches!(
      response,
      Response::Error(JobError::Encode { ref node, .. }) if node == "resize"
    ));
  }

  #[tokio::test]
  async fn test_job_reply_channel() {
    let (job, mut responses) = Job::new(
      Payload::from(&b"x"[..]),
      Data::new(),
      CancellationToken::new(),
    );
    job.reply.send(Response::Ack).await.unwrap();
    drop(job);

    assert!(responses.recv().await.unwrap().is_ack());
    assert!(responses.recv().await.is_none());
  }
}
