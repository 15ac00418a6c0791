//! A fixed set of pooled NNTP connections fed from one request queue.
//!
//! ```text
//!  callers ──► inbound queue ──► dispatcher ──► hand-off task ──► worker slot
//!                                                  ▲                  │
//!                                 available queue ─┘ ◄── re-register ─┤
//!                                                                     ▼
//!  caller ◄── merged stream ◄── relay (one per worker) ◄── response slot
//! ```
//!
//! Each idle worker places one token (its request slot) on the bounded
//! available queue. The dispatcher pulls a request, then a hand-off task waits
//! for a token and forwards the request. A worker only re-registers after its
//! current request is done, so at most `size` requests are ever in process.
//!
//! Hand-offs run concurrently, so requests submitted close together may be
//! processed in any order. Match responses to requests by article id.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::ServerTarget;
use crate::connection::ProtocolConnection;
use crate::model::{Request, Response};
use crate::transport::{Connector, TcpConnector};
use crate::worker::{PooledWorker, WorkerHandle};

/// Capacity of the merged response stream returned by
/// [`ConnectionPool::collect`].
const COLLECT_CAPACITY: usize = 64;

/// Counters shared by the workers of one pool.
#[derive(Debug, Default)]
pub struct PoolStats {
    busy: AtomicUsize,
    peak_busy: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl PoolStats {
    /// Workers currently processing a request.
    pub fn busy(&self) -> usize {
        self.busy.load(Ordering::SeqCst)
    }

    /// Highest number of workers ever processing a request at the same time.
    pub fn peak_busy(&self) -> usize {
        self.peak_busy.load(Ordering::SeqCst)
    }

    /// Requests that produced a response, failed ones included.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Responses that carried an error.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    pub(crate) fn begin(&self) -> BusyGuard<'_> {
        let now = self.busy.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_busy.fetch_max(now, Ordering::SeqCst);
        BusyGuard { stats: self }
    }

    pub(crate) fn record(&self, response: &Response) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        if response.error.is_some() {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Marks one worker busy until dropped.
pub(crate) struct BusyGuard<'a> {
    stats: &'a PoolStats,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.stats.busy.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A fixed-size pool of NNTP connections.
///
/// # Example
///
/// ```no_run
/// use nntp_pool::{ConnectionPool, Request, ServerTarget};
///
/// # async fn example() {
/// let (requests, inbound) = flume::unbounded();
/// let mut pool = ConnectionPool::new(ServerTarget::new("news.example.com", 119), inbound, 4);
/// pool.start();
/// let mut responses = pool.collect();
///
/// requests.send(Request::check("part1@example.com", ["alt.binaries.test"])).unwrap();
/// if let Some(response) = responses.recv().await {
///     println!("{} exists: {}", response.article, response.article.exists);
/// }
/// pool.stop();
/// # }
/// ```
pub struct ConnectionPool {
    target: Arc<ServerTarget>,
    connector: Arc<dyn Connector>,
    size: usize,
    requests: Option<flume::Receiver<Request>>,
    available: Option<flume::Receiver<WorkerHandle>>,
    workers: Vec<PooledWorker>,
    dispatcher_stop: Option<oneshot::Sender<()>>,
    stats: Arc<PoolStats>,
}

impl ConnectionPool {
    /// Create a pool of `size` connections to `target`, fed from `requests`.
    ///
    /// Connections are opened over TCP (TLS if the target asks for it). A
    /// `size` of zero is treated as one.
    pub fn new(target: ServerTarget, requests: flume::Receiver<Request>, size: usize) -> Self {
        Self::with_connector(target, requests, size, Arc::new(TcpConnector::new()))
    }

    /// Like [`new`](Self::new), opening transports through `connector`.
    pub fn with_connector(
        target: ServerTarget,
        requests: flume::Receiver<Request>,
        size: usize,
        connector: Arc<dyn Connector>,
    ) -> Self {
        if size == 0 {
            warn!("pool size 0 requested, using 1");
        }
        Self {
            target: Arc::new(target),
            connector,
            size: size.max(1),
            requests: Some(requests),
            available: None,
            workers: Vec::new(),
            dispatcher_stop: None,
            stats: Arc::new(PoolStats::default()),
        }
    }

    /// Number of workers.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The server this pool connects to.
    pub fn target(&self) -> &ServerTarget {
        &self.target
    }

    /// Counters shared by this pool's workers.
    pub fn stats(&self) -> Arc<PoolStats> {
        self.stats.clone()
    }

    /// Whether [`start`](Self::start) has run and [`stop`](Self::stop) has not.
    pub fn is_running(&self) -> bool {
        self.dispatcher_stop.is_some()
    }

    /// Create and start the workers, then start the dispatcher.
    ///
    /// Workers connect in the background; a worker whose connection fails
    /// keeps running and answers its requests with [`Error::NotConnected`].
    /// Only the first call has an effect.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    ///
    /// [`Error::NotConnected`]: crate::Error::NotConnected
    pub fn start(&mut self) {
        let Some(requests) = self.requests.take() else {
            warn!(host = %self.target.host, "pool already started");
            return;
        };

        let (available_tx, available_rx) = flume::bounded(self.size);
        for id in 0..self.size {
            let connection =
                ProtocolConnection::new(id, self.target.clone(), self.connector.clone());
            let mut worker = PooledWorker::new(connection, available_tx.clone(), self.stats.clone());
            worker.start();
            self.workers.push(worker);
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        tokio::spawn(dispatch(requests, available_rx.clone(), stop_rx));
        self.available = Some(available_rx);
        self.dispatcher_stop = Some(stop_tx);

        info!(host = %self.target.host, port = self.target.port, size = self.size, "pool started");
    }

    /// Merge every worker's responses into one stream.
    ///
    /// The stream closes once every worker has stopped and released its
    /// response slot, so after [`stop`](Self::stop) it yields the remaining
    /// responses and then `None`. Slots are drained, not shared: a second
    /// call, or a call after `stop`, returns a stream that closes without
    /// yielding anything.
    pub fn collect(&mut self) -> mpsc::Receiver<Response> {
        let (merged_tx, merged_rx) = mpsc::channel(COLLECT_CAPACITY);

        for worker in &mut self.workers {
            let Some(mut responses) = worker.take_responses() else {
                continue;
            };
            let merged = merged_tx.clone();
            let id = worker.id();
            tokio::spawn(async move {
                while let Some(response) = responses.recv().await {
                    if merged.send(response).await.is_err() {
                        debug!(worker = id, "merged stream dropped");
                        break;
                    }
                }
                debug!(worker = id, "relay finished");
            });
        }

        // Each relay holds a sender clone; the stream closes once all of them
        // have finished.
        merged_rx
    }

    /// Signal every worker and the dispatcher to stop, then discard the
    /// workers.
    ///
    /// Returns immediately. Requests already handed to a worker complete, and
    /// their responses still reach a stream obtained from
    /// [`collect`](Self::collect). Requests still on the inbound queue are not
    /// processed.
    pub fn stop(&mut self) {
        for worker in &mut self.workers {
            worker.stop();
        }
        if let Some(stop) = self.dispatcher_stop.take() {
            // The dispatcher exits on its own once the inbound queue closes.
            let _ = stop.send(());
        }
        self.available = None;
        self.workers.clear();
        info!(host = %self.target.host, "pool stopped");
    }
}

async fn dispatch(
    requests: flume::Receiver<Request>,
    available: flume::Receiver<WorkerHandle>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            request = requests.recv_async() => {
                let Ok(request) = request else {
                    debug!("inbound queue closed");
                    break;
                };
                tokio::spawn(hand_off(request, available.clone()));
            }
            _ = &mut stop => break,
        }
    }
    debug!("dispatcher stopped");
}

/// Wait for an idle worker and pass it `request`.
async fn hand_off(mut request: Request, available: flume::Receiver<WorkerHandle>) {
    loop {
        let Ok(worker) = available.recv_async().await else {
            warn!(article = %request.article, "pool stopped before request was dispatched");
            return;
        };
        match worker.slot.send(request).await {
            Ok(()) => return,
            Err(mpsc::error::SendError(returned)) => {
                debug!(worker = worker.id, "worker gone, retrying with next");
                request = returned;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockServer;

    fn pool(server: &MockServer, size: usize) -> (flume::Sender<Request>, ConnectionPool) {
        let (tx, rx) = flume::unbounded();
        let pool = ConnectionPool::with_connector(
            ServerTarget::new("news.test", 119),
            rx,
            size,
            Arc::new(server.clone()),
        );
        (tx, pool)
    }

    #[test]
    fn zero_size_is_clamped() {
        let (_tx, pool) = pool(&MockServer::new(), 0);
        assert_eq!(pool.size(), 1);
        assert!(!pool.is_running());
    }

    #[test]
    fn busy_guard_tracks_peak() {
        let stats = PoolStats::default();
        {
            let _a = stats.begin();
            let _b = stats.begin();
            assert_eq!(stats.busy(), 2);
        }
        let _c = stats.begin();
        assert_eq!(stats.busy(), 1);
        assert_eq!(stats.peak_busy(), 2);
    }

    #[tokio::test]
    async fn start_opens_one_connection_per_worker() {
        let server = MockServer::new().with_article("alt.test", "a@b", "x\r\n");
        let (tx, mut pool) = pool(&server, 3);
        pool.start();
        assert!(pool.is_running());
        let mut responses = pool.collect();

        tx.send(Request::check("a@b", ["alt.test"])).unwrap();
        let response = responses.recv().await.unwrap();
        assert!(response.article.exists);

        pool.stop();
        assert!(responses.recv().await.is_none());
        assert_eq!(server.connections(), 3);
        assert!(!pool.is_running());
    }

    #[tokio::test]
    async fn collect_twice_yields_empty_stream() {
        let server = MockServer::new();
        let (_tx, mut pool) = pool(&server, 2);
        pool.start();
        let _first = pool.collect();
        let mut second = pool.collect();

        pool.stop();
        assert!(second.recv().await.is_none());
    }

    #[tokio::test]
    async fn hand_off_skips_exited_workers() {
        let (available_tx, available_rx) = flume::bounded(2);
        let (dead_tx, dead_rx) = mpsc::channel::<Request>(1);
        drop(dead_rx);
        let (live_tx, mut live_rx) = mpsc::channel::<Request>(1);
        available_tx
            .send(WorkerHandle { id: 0, slot: dead_tx })
            .unwrap();
        available_tx
            .send(WorkerHandle { id: 1, slot: live_tx })
            .unwrap();

        hand_off(Request::check("a@b", ["alt.test"]), available_rx).await;
        assert_eq!(live_rx.recv().await.unwrap().article.id, "a@b");
    }

    #[tokio::test]
    async fn dispatcher_exits_when_inbound_closes() {
        let (tx, rx) = flume::unbounded::<Request>();
        let (_available_tx, available_rx) = flume::bounded::<WorkerHandle>(1);
        let (_stop_tx, stop_rx) = oneshot::channel();
        drop(tx);

        // Completes without a stop signal.
        dispatch(rx, available_rx, stop_rx).await;
    }
}
