//! Request queue in front of the processor
//!
//! Any number of callers may hold a [`ServiceHandle`] and submit at once.
//! One tokio task owns the [`Processor`] and drains a bounded channel, so
//! every command and query runs to completion before the next one starts.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::crypto::PartyId;
use crate::error::{AgreementError, AgreementResult};
use crate::processor::{Answer, Processor, Query, Receipt, SignedCommand};

/// Default queue depth when none is configured
pub const DEFAULT_QUEUE_DEPTH: usize = 100;

enum Request {
    Execute(SignedCommand, oneshot::Sender<AgreementResult<Receipt>>),
    Query(Query, oneshot::Sender<AgreementResult<Answer>>),
    NextNonce(PartyId, oneshot::Sender<u64>),
    Shutdown(oneshot::Sender<Processor>),
}

/// Cloneable handle to a running service
#[derive(Clone)]
pub struct ServiceHandle {
    tx: mpsc::Sender<Request>,
}

/// Spawn the processor task.
///
/// Returns the handle callers use and the task's join handle.
pub fn spawn(processor: Processor, queue_depth: usize) -> (ServiceHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(queue_depth.max(1));
    let task = tokio::spawn(run(processor, rx));
    (ServiceHandle { tx }, task)
}

async fn run(mut processor: Processor, mut rx: mpsc::Receiver<Request>) {
    info!("agreement service started");
    while let Some(request) = rx.recv().await {
        match request {
            Request::Execute(signed, reply) => {
                let _ = reply.send(processor.execute(signed));
            }
            Request::Query(query, reply) => {
                let _ = reply.send(processor.query(&query));
            }
            Request::NextNonce(caller, reply) => {
                let _ = reply.send(processor.next_nonce(&caller));
            }
            Request::Shutdown(reply) => {
                debug!("shutdown requested");
                let _ = reply.send(processor);
                info!("agreement service stopped");
                return;
            }
        }
    }
    info!("agreement service stopped: all handles dropped");
}

impl ServiceHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> AgreementResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| AgreementError::ServiceStopped)?;
        reply_rx.await.map_err(|_| AgreementError::ServiceStopped)
    }

    /// Queue a signed command and wait for its receipt
    pub async fn submit(&self, signed: SignedCommand) -> AgreementResult<Receipt> {
        self.request(|reply| Request::Execute(signed, reply)).await?
    }

    /// Queue a read-only query
    pub async fn query(&self, query: Query) -> AgreementResult<Answer> {
        self.request(|reply| Request::Query(query, reply)).await?
    }

    /// Lowest nonce `caller` may use next, as of when the request is served
    pub async fn next_nonce(&self, caller: PartyId) -> AgreementResult<u64> {
        self.request(|reply| Request::NextNonce(caller, reply)).await
    }

    /// Stop the task after queued requests and take the processor back
    pub async fn shutdown(&self) -> AgreementResult<Processor> {
        self.request(Request::Shutdown).await
    }
}
