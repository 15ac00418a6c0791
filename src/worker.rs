//! A connection wrapped in a processing loop.
//!
//! A [`PooledWorker`] owns one [`ProtocolConnection`], a private request slot
//! and a private response slot. While running it repeatedly advertises its
//! request slot on the pool's available-worker queue, waits for one request
//! (or a stop signal), processes it and publishes the [`Response`].

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::connection::ProtocolConnection;
use crate::error::{Error, Result};
use crate::model::{Article, Operation, Request, Response};
use crate::pool::PoolStats;

/// Handle to an idle worker: sending a request through `slot` hands the
/// request to that worker.
#[derive(Debug, Clone)]
pub(crate) struct WorkerHandle {
    pub(crate) id: usize,
    pub(crate) slot: mpsc::Sender<Request>,
}

/// Run `request` on `connection` using the multi-group fallback policy.
///
/// Candidate groups are tried in order. For each group the connection
/// switches to it (a failed switch is ignored; the following command reports
/// the problem) and issues the operation:
///
/// - [`Operation::CheckExistence`] stops at the first group that yields a
///   clean answer, even if the answer is "does not exist".
/// - [`Operation::FetchContent`] stops at the first group whose fetch
///   succeeds; the article's content is stored and `exists` is set.
///
/// If every group errors, the response carries the last error observed.
/// Errors from earlier groups are discarded once a group succeeds.
pub async fn process(connection: &mut ProtocolConnection, request: Request) -> Response {
    let operation = request.operation;
    let mut response = request.into_response(connection.to_string());

    let result = match operation {
        Operation::CheckExistence => check_article(connection, &mut response.article).await,
        Operation::FetchContent => fetch_article(connection, &mut response.article).await,
    };
    response.error = result.err();
    response
}

async fn check_article(connection: &mut ProtocolConnection, article: &mut Article) -> Result<()> {
    let mut last_error = Error::NoCandidateGroups;

    for group in &article.groups {
        if let Err(err) = connection.switch_group(group).await {
            debug!(connection = %connection, group = %group, error = %err, "group switch failed");
        }
        match connection.article_exists(&article.id).await {
            Ok(exists) => {
                article.exists = exists;
                return Ok(());
            }
            Err(err) => {
                debug!(connection = %connection, group = %group, error = %err, "stat failed");
                last_error = err;
            }
        }
    }

    Err(last_error)
}

async fn fetch_article(connection: &mut ProtocolConnection, article: &mut Article) -> Result<()> {
    let mut last_error = Error::NoCandidateGroups;

    for group in &article.groups {
        if let Err(err) = connection.switch_group(group).await {
            debug!(connection = %connection, group = %group, error = %err, "group switch failed");
        }
        match connection.fetch_article(&article.id).await {
            Ok(content) => {
                article.content = Some(content);
                article.exists = true;
                return Ok(());
            }
            Err(err) => {
                debug!(connection = %connection, group = %group, error = %err, "body failed");
                last_error = err;
            }
        }
    }

    Err(last_error)
}

/// One pooled connection and its processing task.
///
/// Lifecycle: created idle, [`start`](Self::start)ed once, runs until
/// [`stop`](Self::stop)ped, then closes its transport. A stopped worker is
/// never restarted.
pub(crate) struct PooledWorker {
    id: usize,
    connection: Option<ProtocolConnection>,
    available: flume::Sender<WorkerHandle>,
    stats: Arc<PoolStats>,
    responses_tx: Option<mpsc::UnboundedSender<Response>>,
    responses_rx: Option<mpsc::UnboundedReceiver<Response>>,
    stop: Option<oneshot::Sender<()>>,
}

impl PooledWorker {
    pub(crate) fn new(
        connection: ProtocolConnection,
        available: flume::Sender<WorkerHandle>,
        stats: Arc<PoolStats>,
    ) -> Self {
        let (responses_tx, responses_rx) = mpsc::unbounded_channel();
        Self {
            id: connection.id(),
            connection: Some(connection),
            available,
            stats,
            responses_tx: Some(responses_tx),
            responses_rx: Some(responses_rx),
            stop: None,
        }
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    /// Spawn the processing task. Must be called from within a tokio runtime.
    pub(crate) fn start(&mut self) {
        let (Some(connection), Some(responses)) = (self.connection.take(), self.responses_tx.take())
        else {
            warn!(worker = self.id, "worker already started");
            return;
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        self.stop = Some(stop_tx);

        let task = run(
            connection,
            self.available.clone(),
            responses,
            stop_rx,
            self.stats.clone(),
        );
        tokio::spawn(task);
    }

    /// Signal the processing task to stop and return immediately.
    ///
    /// An in-flight request, and one already handed to the request slot,
    /// complete first. The response slot closes once the task has exited and
    /// released its sender.
    pub(crate) fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            // The task may already have exited.
            let _ = stop.send(());
        }
    }

    /// Take the receiving end of the response slot. Only the first call
    /// returns it.
    pub(crate) fn take_responses(&mut self) -> Option<mpsc::UnboundedReceiver<Response>> {
        self.responses_rx.take()
    }
}

async fn run(
    mut connection: ProtocolConnection,
    available: flume::Sender<WorkerHandle>,
    responses: mpsc::UnboundedSender<Response>,
    mut stop: oneshot::Receiver<()>,
    stats: Arc<PoolStats>,
) {
    let id = connection.id();
    if let Err(err) = connection.connect().await {
        warn!(worker = id, error = %err, "connect failed, worker will report errors");
    }

    let (slot_tx, mut slot_rx) = mpsc::channel::<Request>(1);

    loop {
        let handle = WorkerHandle {
            id,
            slot: slot_tx.clone(),
        };
        if available.send_async(handle).await.is_err() {
            debug!(worker = id, "available queue closed");
            break;
        }

        // A request already in the slot wins over a pending stop.
        tokio::select! {
            biased;

            request = slot_rx.recv() => {
                let Some(request) = request else { break };
                let response = {
                    let _busy = stats.begin();
                    process(&mut connection, request).await
                };
                stats.record(&response);
                if responses.send(response).is_err() {
                    debug!(worker = id, "response slot closed, dropping response");
                }
            }
            _ = &mut stop => break,
        }
    }

    // Requests handed over before the slot closed still complete.
    slot_rx.close();
    while let Ok(request) = slot_rx.try_recv() {
        debug!(worker = id, article = %request.article, "finishing request handed over before stop");
        let response = {
            let _busy = stats.begin();
            process(&mut connection, request).await
        };
        stats.record(&response);
        if responses.send(response).is_err() {
            debug!(worker = id, "response slot closed, dropping response");
        }
    }

    connection.close().await;
    info!(worker = id, "worker stopped");
}
