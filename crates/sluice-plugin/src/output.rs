//! Output delivery channel.
//!
//! Output plugins receive their jobs through a channel served by an
//! [`OutputWorker`]. The engine holds the [`OutputChannel`] end, hands one
//! [`Delivery`] per job to it and awaits the single reply.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::error::PluginError;
use crate::payload::{Data, Payload};
use crate::plugin::Output;

/// One job handed to an output plugin.
pub struct Delivery {
  pub payload: Payload,
  pub data: Data,
  pub cancel: CancellationToken,
  reply: oneshot::Sender<Result<(), PluginError>>,
}

/// Sending half of an output plugin's delivery channel.
#[derive(Clone)]
pub struct OutputChannel {
  sender: mpsc::Sender<Delivery>,
}

/// Serves an output plugin's delivery channel.
pub struct OutputWorker {
  plugin: Arc<dyn Output>,
  receiver: mpsc::Receiver<Delivery>,
}

impl OutputChannel {
  /// Create the delivery channel for `plugin`.
  ///
  /// Nothing is delivered until the returned worker is running.
  pub fn open(plugin: Arc<dyn Output>, capacity: usize) -> (OutputChannel, OutputWorker) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (OutputChannel { sender }, OutputWorker { plugin, receiver })
  }

  /// Hand a payload to the output plugin and wait for its result.
  pub async fn deliver(
    &self,
    payload: Payload,
    data: Data,
    cancel: CancellationToken,
  ) -> Result<(), PluginError> {
    let (reply, response) = oneshot::channel();
    let delivery = Delivery {
      payload,
      data,
      cancel,
      reply,
    };

    self
      .sender
      .send(delivery)
      .await
      .map_err(|_| PluginError::Closed)?;

    response.await.map_err(|_| PluginError::Closed)?
  }
}

impl OutputWorker {
  /// Serve deliveries until `shutdown` fires or every channel handle is dropped.
  ///
  /// Each delivery runs on its own task; in-flight deliveries are awaited
  /// before returning.
  pub async fn run(mut self, shutdown: CancellationToken) {
    let tasks = TaskTracker::new();

    loop {
      tokio::select! {
        _ = shutdown.cancelled() => break,
        delivery = self.receiver.recv() => {
          let Some(delivery) = delivery else {
            break;
          };
          let plugin = self.plugin.clone();
          tasks.spawn(async move {
            let result = plugin
              .deliver(delivery.payload, &delivery.data, &delivery.cancel)
              .await;
            // The waiting stage may have been dropped.
            let _ = delivery.reply.send(result);
          });
        }
      }
    }

    debug!(in_flight = tasks.len(), "output worker stopping");
    tasks.close();
    tasks.wait().await;
  }
}
