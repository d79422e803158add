//! In-process backend: runs a `Model` on tokio's blocking pool.
//!
//! The worker task reports `connected` as soon as it starts, answers
//! requests one at a time in the order they were sent, and reports
//! `disconnected` when it stops (closed, cancelled, or the model panicked).

use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::Transport;
use crate::bridge::inbox::BackendSink;
use crate::bridge::protocol::{BackendEvent, BackendResult, Endpoint, Payload, Request};
use crate::error::TransportError;

/// Requests queued ahead of the worker before `send` starts rejecting.
pub const REQUEST_QUEUE_CAPACITY: usize = 256;

/// An inference backend living in the same process (a native library).
pub trait Model: Send + Sync + 'static {
    /// Answer one request. An `Err` fails the request's latent call.
    fn infer(&self, request: &Request) -> Result<Payload, String>;
}

impl<F> Model for F
where
    F: Fn(&Request) -> Result<Payload, String> + Send + Sync + 'static,
{
    fn infer(&self, request: &Request) -> Result<Payload, String> {
        self(request)
    }
}

/// Transport that hands requests to a `Model` on a worker task.
pub struct LocalTransport {
    tx: mpsc::Sender<Request>,
    cancel_token: CancellationToken,
    /// Held so the worker stays associated with this transport
    _join_handle: JoinHandle<()>,
}

impl LocalTransport {
    /// Spawn the worker. Must be called from within a tokio runtime.
    pub fn spawn<M: Model>(name: &str, model: M, sink: BackendSink) -> Self {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
        let cancel_token = CancellationToken::new();
        let join_handle = tokio::spawn(worker_loop(
            Arc::new(model),
            rx,
            sink,
            Endpoint::local(name),
            cancel_token.clone(),
        ));
        Self {
            tx,
            cancel_token,
            _join_handle: join_handle,
        }
    }
}

impl Transport for LocalTransport {
    fn send(&mut self, request: Request) -> Result<(), TransportError> {
        self.tx.try_send(request).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => {
                TransportError::Rejected("local request queue is full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    fn close(&mut self) {
        self.cancel_token.cancel();
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn worker_loop<M: Model>(
    model: Arc<M>,
    mut rx: mpsc::Receiver<Request>,
    sink: BackendSink,
    endpoint: Endpoint,
    cancel_token: CancellationToken,
) {
    if sink.connected(endpoint.clone()).is_err() {
        return;
    }

    loop {
        tokio::select! {
            biased;

            _ = cancel_token.cancelled() => {
                debug!(
                    target: "inference_bridge::transport::local",
                    "Worker for {} cancelled, shutting down",
                    endpoint
                );
                break;
            }

            request = rx.recv() => {
                let Some(request) = request else { break };
                if !answer(&model, request, &sink).await {
                    break;
                }
            }
        }
    }

    // Refuse further sends before announcing the disconnect
    drop(rx);
    let _ = sink.disconnected();
}

/// Run one request through the model and report the outcome.
///
/// Returns `false` when the worker should stop.
async fn answer<M: Model>(model: &Arc<M>, request: Request, sink: &BackendSink) -> bool {
    let token = request.token;
    let function_name = request.function_name.clone();
    let model = Arc::clone(model);

    let outcome = tokio::task::spawn_blocking(move || {
        let payload = model.infer(&request);
        (request, payload)
    })
    .await;

    let event = match outcome {
        Ok((request, Ok(payload))) => BackendEvent::Result(BackendResult::reply_to(&request, payload)),
        Ok((_, Err(message))) => BackendEvent::Failed {
            token,
            function_name,
            message,
        },
        Err(join_error) => {
            warn!(
                target: "inference_bridge::transport::local",
                "Model panicked while answering {}: {}",
                function_name,
                join_error
            );
            let _ = sink.report(BackendEvent::Failed {
                token,
                function_name,
                message: "model panicked".to_string(),
            });
            return false;
        }
    };

    sink.report(event).is_ok()
}
