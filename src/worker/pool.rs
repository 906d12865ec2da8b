//! Sharded Worker Pool
//!
//! A fixed set of long-lived Tokio tasks, each draining its own bounded
//! queue. A connection is pinned to one queue for its whole life:
//!
//! ```text
//!              shard = conn_id % worker_count
//!
//!  conn 0 ──┐                 ┌──> queue 0 ──> worker 0
//!  conn 2 ──┼─ submit() ──────┤
//!  conn 1 ──┘                 └──> queue 1 ──> worker 1
//! ```
//!
//! Since each queue is FIFO and has exactly one consumer, requests from one
//! connection are handled in the order its reader produced them. Requests
//! from different connections on different shards run concurrently.
//!
//! ## Backpressure
//!
//! Queues are bounded. When a shard is full, `submit` waits, which stalls
//! the reader of every connection mapped to that shard until the worker
//! catches up.

use crate::router::{Dispatcher, Request};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace};

/// Errors from starting or feeding the pool.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkerPoolError {
    #[error("worker pool already started")]
    AlreadyStarted,

    #[error("worker pool has not been started")]
    NotStarted,

    #[error("worker pool needs at least one worker")]
    NoWorkers,

    #[error("worker queue capacity must be greater than zero")]
    ZeroCapacity,

    #[error("worker {0} is no longer accepting requests")]
    Stopped(usize),
}

/// Maps a connection id to its shard.
#[inline]
pub fn shard_index(conn_id: u32, worker_count: usize) -> usize {
    conn_id as usize % worker_count
}

/// A fixed-size pool of dispatch workers.
#[derive(Debug)]
pub struct WorkerPool {
    size: usize,
    queue_capacity: usize,
    dispatcher: Arc<Dispatcher>,
    started: AtomicBool,
    queues: OnceLock<Vec<mpsc::Sender<Request>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl WorkerPool {
    /// Creates a pool. No tasks run until [`start`](Self::start).
    pub fn new(size: usize, queue_capacity: usize, dispatcher: Arc<Dispatcher>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            size,
            queue_capacity,
            dispatcher,
            started: AtomicBool::new(false),
            queues: OnceLock::new(),
            shutdown_tx,
        }
    }

    /// Number of workers.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Capacity of each worker's queue.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn is_started(&self) -> bool {
        self.queues.get().is_some()
    }

    /// Spawns one task per worker. May be called only once.
    pub fn start(&self) -> Result<(), WorkerPoolError> {
        if self.size == 0 {
            return Err(WorkerPoolError::NoWorkers);
        }
        if self.queue_capacity == 0 {
            return Err(WorkerPoolError::ZeroCapacity);
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(WorkerPoolError::AlreadyStarted);
        }

        let mut senders = Vec::with_capacity(self.size);
        for worker_id in 0..self.size {
            let (tx, rx) = mpsc::channel(self.queue_capacity);
            senders.push(tx);
            tokio::spawn(worker_loop(
                worker_id,
                Arc::clone(&self.dispatcher),
                rx,
                self.shutdown_tx.subscribe(),
            ));
        }

        // `started` guarantees this is the only writer.
        let _ = self.queues.set(senders);

        info!(
            workers = self.size,
            queue_capacity = self.queue_capacity,
            "Worker pool started"
        );
        Ok(())
    }

    /// The shard a connection id maps to.
    pub fn shard_for(&self, conn_id: u32) -> usize {
        shard_index(conn_id, self.size)
    }

    /// Enqueues a request on its connection's shard, waiting while it is full.
    pub async fn submit(&self, request: Request) -> Result<(), WorkerPoolError> {
        let queues = self.queues.get().ok_or(WorkerPoolError::NotStarted)?;
        let shard = self.shard_for(request.connection().id());

        trace!(
            conn_id = request.connection().id(),
            type_id = request.type_id(),
            worker = shard,
            "Submitting request"
        );

        queues[shard]
            .send(request)
            .await
            .map_err(|_| WorkerPoolError::Stopped(shard))
    }

    /// Signals every worker to exit. Queued requests are abandoned.
    pub fn stop(&self) {
        self.shutdown_tx.send_replace(true);
        info!("Worker pool stopped");
    }
}

/// One worker: dequeue, dispatch, repeat.
async fn worker_loop(
    worker_id: usize,
    dispatcher: Arc<Dispatcher>,
    mut queue: mpsc::Receiver<Request>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!(worker = worker_id, "Worker started");

    loop {
        tokio::select! {
            next = queue.recv() => match next {
                // Failures and panics are contained inside dispatch_and_report
                Some(request) => dispatcher.dispatch_and_report(request).await,
                None => break,
            },
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    debug!(worker = worker_id, "Worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testutil::{connect, test_context};
    use crate::protocol::Frame;
    use crate::router::{router_fn, Router};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Records (conn_id, sequence number) pairs in handling order.
    struct Recorder {
        seen: Arc<Mutex<Vec<(u32, u32)>>>,
    }

    #[async_trait]
    impl Router for Recorder {
        async fn handle(&self, request: &Request) -> anyhow::Result<()> {
            let seq = u32::from_le_bytes(request.data()[..4].try_into()?);
            if seq == 3 {
                panic!("handler bug on message 3");
            }
            // Uneven latency to shake out ordering bugs
            if seq % 7 == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            self.seen.lock().push((request.connection().id(), seq));
            Ok(())
        }
    }

    async fn wait_for(seen: &Arc<Mutex<Vec<(u32, u32)>>>, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while seen.lock().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_shard_index_is_deterministic() {
        for conn_id in 0..100u32 {
            let shard = shard_index(conn_id, 4);
            assert_eq!(shard, conn_id as usize % 4);
            assert_eq!(shard, shard_index(conn_id, 4));
        }
        assert_eq!(shard_index(u32::MAX, 10), (u32::MAX % 10) as usize);
    }

    #[tokio::test]
    async fn test_start_twice_rejected() {
        let pool = WorkerPool::new(2, 8, Arc::new(Dispatcher::new()));
        assert!(!pool.is_started());
        pool.start().unwrap();
        assert!(pool.is_started());
        assert_eq!(pool.start(), Err(WorkerPoolError::AlreadyStarted));
        pool.stop();
    }

    #[tokio::test]
    async fn test_invalid_sizes_rejected() {
        let dispatcher = Arc::new(Dispatcher::new());
        let pool = WorkerPool::new(0, 8, Arc::clone(&dispatcher));
        assert_eq!(pool.start(), Err(WorkerPoolError::NoWorkers));

        let pool = WorkerPool::new(2, 0, dispatcher);
        assert_eq!(pool.start(), Err(WorkerPoolError::ZeroCapacity));
    }

    #[tokio::test]
    async fn test_submit_before_start() {
        let pool = WorkerPool::new(2, 8, Arc::new(Dispatcher::new()));
        let ctx = test_context();
        let (conn, _client) = connect(1, &ctx).await;

        let err = pool
            .submit(Request::new(conn, Frame::new(1, "x")))
            .await
            .unwrap_err();
        assert_eq!(err, WorkerPoolError::NotStarted);
    }

    #[tokio::test]
    async fn test_per_connection_order_and_panic_isolation() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .add_router(1, Recorder { seen: Arc::clone(&seen) })
            .unwrap();

        let pool = WorkerPool::new(2, 4, Arc::new(dispatcher));
        pool.start().unwrap();

        let ctx = test_context();
        let (conn_a, _client_a) = connect(10, &ctx).await;
        let (conn_b, _client_b) = connect(11, &ctx).await;
        assert_ne!(pool.shard_for(10), pool.shard_for(11));

        for seq in 0..50u32 {
            for conn in [&conn_a, &conn_b] {
                let frame = Frame::new(1, seq.to_le_bytes().to_vec());
                pool.submit(Request::new(Arc::clone(conn), frame))
                    .await
                    .unwrap();
            }
        }

        // Message 3 panics on both connections; the other 49 each still arrive
        wait_for(&seen, 98).await;

        let seen = seen.lock();
        for id in [10, 11] {
            let order: Vec<u32> = seen.iter().filter(|(c, _)| *c == id).map(|(_, s)| *s).collect();
            let expected: Vec<u32> = (0..50).filter(|s| *s != 3).collect();
            assert_eq!(order, expected);
        }
        pool.stop();
    }

    #[tokio::test]
    async fn test_submit_after_stop_fails() {
        let pool = WorkerPool::new(1, 1, Arc::new(Dispatcher::new()));
        pool.start().unwrap();
        pool.stop();

        // Give the worker a moment to observe the signal and drop its queue
        tokio::time::sleep(Duration::from_millis(50)).await;

        let ctx = test_context();
        let (conn, _client) = connect(1, &ctx).await;
        let err = pool
            .submit(Request::new(conn, Frame::new(1, "x")))
            .await
            .unwrap_err();
        assert_eq!(err, WorkerPoolError::Stopped(0));
    }

    #[tokio::test]
    async fn test_unroutable_does_not_kill_worker() {
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .add_router(
                1,
                router_fn(move |_conn, _frame| {
                    let counter = Arc::clone(&counter);
                    async move {
                        *counter.lock() += 1;
                        Ok(())
                    }
                }),
            )
            .unwrap();

        let pool = WorkerPool::new(1, 8, Arc::new(dispatcher));
        pool.start().unwrap();

        let ctx = test_context();
        let (conn, _client) = connect(1, &ctx).await;
        pool.submit(Request::new(Arc::clone(&conn), Frame::new(404, "?")))
            .await
            .unwrap();
        pool.submit(Request::new(conn, Frame::new(1, "ok")))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while *hits.lock() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        pool.stop();
    }
}
