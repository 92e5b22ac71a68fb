//! Sequential execution of transfer batches.
//!
//! [`TransferQueue`] owns a background worker that takes submitted batches
//! in FIFO order and runs one at a time. Within a batch, up to
//! `max_concurrent` units transfer at once. A batch that fails stops
//! starting new units; units already in flight are allowed to finish before
//! the next batch begins.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::batch::{ActiveBatch, BatchHandle, BatchOutcome, TransferBatch};
use super::unit::{TransferUnit, UnitEvent};
use crate::config::TransferConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::Transport;

/// Counters of batches seen by a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct QueueShared {
    pending: AtomicUsize,
    active: AtomicBool,
    closed: AtomicBool,
    stats: Mutex<QueueStats>,
}

impl QueueShared {
    fn record(&self, outcome: &BatchOutcome) {
        let mut stats = self.stats.lock();
        match outcome {
            BatchOutcome::Succeeded => stats.succeeded += 1,
            BatchOutcome::Failed(_) => stats.failed += 1,
            BatchOutcome::Pending => {}
        }
    }
}

/// FIFO sequencer for transfer batches.
///
/// The queue is an explicit object; hold it in an `Arc` and share it with
/// every component that submits transfers.
pub struct TransferQueue {
    sender: mpsc::UnboundedSender<Arc<ActiveBatch>>,
    shared: Arc<QueueShared>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TransferQueue {
    /// Create a queue and spawn its worker on the current Tokio runtime.
    pub fn start(transport: Arc<dyn Transport>, config: &TransferConfig) -> SyncResult<Self> {
        let runtime = Handle::try_current().map_err(|_| {
            SyncError::InvalidConfig(
                "the transfer queue must be started from within a Tokio runtime".to_string(),
            )
        })?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(QueueShared::default());
        let shutdown = CancellationToken::new();

        let worker = QueueWorker {
            transport,
            max_concurrent: config.max_concurrent.max(1),
            probe_sizes: config.probe_sizes,
            shared: Arc::clone(&shared),
        };
        let handle = runtime.spawn(worker.run(receiver, shutdown.clone()));

        info!(
            max_concurrent = config.max_concurrent.max(1),
            probe_sizes = config.probe_sizes,
            "Transfer queue started"
        );

        Ok(Self {
            sender,
            shared,
            shutdown,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Submit a batch. It starts as soon as every earlier batch is done.
    pub fn enqueue(&self, batch: TransferBatch) -> SyncResult<BatchHandle> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(SyncError::QueueClosed);
        }

        debug!(batch = %batch.name(), units = batch.len(), "Batch enqueued");
        let active = Arc::new(ActiveBatch::new(batch));
        let handle = BatchHandle::new(Arc::clone(&active));

        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(active).is_err() {
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(SyncError::QueueClosed);
        }
        self.shared.stats.lock().submitted += 1;
        Ok(handle)
    }

    /// Batches waiting behind the active one.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Whether a batch is currently running.
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> QueueStats {
        *self.shared.stats.lock()
    }

    /// Stop accepting batches and wait for the worker to exit.
    ///
    /// The active batch runs to completion; batches still waiting fail
    /// with [`SyncError::QueueClosed`].
    pub async fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shutdown.cancel();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "Transfer queue worker did not exit cleanly");
            }
        }
    }
}

impl Drop for TransferQueue {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for TransferQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferQueue")
            .field("pending", &self.pending())
            .field("active", &self.is_active())
            .field("stats", &self.stats())
            .finish()
    }
}

struct QueueWorker {
    transport: Arc<dyn Transport>,
    max_concurrent: usize,
    probe_sizes: bool,
    shared: Arc<QueueShared>,
}

impl QueueWorker {
    async fn run(
        self,
        mut receiver: mpsc::UnboundedReceiver<Arc<ActiveBatch>>,
        shutdown: CancellationToken,
    ) {
        loop {
            let batch = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = receiver.recv() => match next {
                    Some(batch) => batch,
                    None => break,
                },
            };

            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            self.shared.active.store(true, Ordering::SeqCst);
            self.run_batch(&batch).await;
            self.shared.active.store(false, Ordering::SeqCst);

            self.shared.record(&batch.outcome());
            batch.close();
        }

        receiver.close();
        while let Ok(batch) = receiver.try_recv() {
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            batch.fail(batch.name(), SyncError::QueueClosed);
            self.shared.record(&batch.outcome());
            batch.close();
        }
        debug!("Transfer queue worker stopped");
    }

    async fn run_batch(&self, batch: &ActiveBatch) {
        if batch.units().is_empty() {
            batch.succeed_empty();
            return;
        }

        debug!(batch = %batch.name(), units = batch.units().len(), "Starting batch");
        if self.probe_sizes {
            self.probe_lengths(batch).await;
        }
        batch.refresh_progress();

        stream::iter(batch.units().iter().cloned())
            .for_each_concurrent(self.max_concurrent, |unit| self.run_unit(batch, unit))
            .await;
    }

    /// Ask the transport for every unit's size so byte progress is
    /// available from the start.
    async fn probe_lengths(&self, batch: &ActiveBatch) {
        let transport = self.transport.as_ref();
        stream::iter(batch.units().iter())
            .for_each_concurrent(self.max_concurrent, |unit| async move {
                if let Some(len) = transport.probe_length(unit.source()).await {
                    unit.set_expected_total(len);
                }
            })
            .await;
    }

    async fn run_unit(&self, batch: &ActiveBatch, unit: Arc<TransferUnit>) {
        if batch.is_failed() {
            debug!(batch = %batch.name(), url = %unit.source(), "Skipping transfer after batch failure");
            return;
        }

        let mut events = unit.subscribe();
        let run = unit.run(self.transport.as_ref());
        tokio::pin!(run);

        let result = loop {
            tokio::select! {
                result = &mut run => break result,
                Some(event) = events.recv() => {
                    if let UnitEvent::Progress { .. } = event {
                        batch.refresh_progress();
                    }
                }
            }
        };

        batch.unit_finished(&unit, result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::BoxFuture;
    use crate::transfer::batch::BatchEvent;
    use crate::transfer::unit::UnitOutcome;
    use crate::transport::TransportResponse;
    use bytes::Bytes;
    use std::collections::HashMap;
    use tokio::sync::Notify;

    /// In-memory transport: known URLs return their body, anything else 404s.
    #[derive(Default)]
    struct MapTransport {
        bodies: HashMap<String, &'static [u8]>,
        requested: Mutex<Vec<String>>,
        gate: Option<Arc<Notify>>,
    }

    impl MapTransport {
        fn with(mut self, url: &str, body: &'static [u8]) -> Self {
            self.bodies.insert(url.to_string(), body);
            self
        }

        fn requested(&self) -> Vec<String> {
            self.requested.lock().clone()
        }
    }

    impl Transport for MapTransport {
        fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, SyncResult<TransportResponse>> {
            Box::pin(async move {
                self.requested.lock().push(url.to_string());
                if let Some(gate) = &self.gate {
                    gate.notified().await;
                }
                match self.bodies.get(url).copied() {
                    Some(body) => Ok(TransportResponse {
                        content_length: Some(body.len() as u64),
                        body: stream::iter(vec![Ok(Bytes::from_static(body))]).boxed(),
                    }),
                    None => Err(SyncError::HttpStatus {
                        url: url.to_string(),
                        status: 404,
                    }),
                }
            })
        }

        fn probe_length<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Option<u64>> {
            Box::pin(async move { self.bodies.get(url).map(|b| b.len() as u64) })
        }
    }

    fn sequential() -> TransferConfig {
        TransferConfig::default().with_max_concurrent(1)
    }

    fn memory_batch(name: &str, urls: &[&str]) -> TransferBatch {
        let mut batch = TransferBatch::new(name);
        for url in urls {
            batch.add(TransferUnit::to_memory(*url)).unwrap();
        }
        batch
    }

    #[tokio::test]
    async fn test_batch_succeeds_when_every_unit_does() {
        let transport = Arc::new(
            MapTransport::default()
                .with("http://h/a", b"aaaa")
                .with("http://h/b", b"bb"),
        );
        let queue = TransferQueue::start(transport, &TransferConfig::default()).unwrap();

        let mut handle = queue
            .enqueue(memory_batch("pair", &["http://h/a", "http://h/b"]))
            .unwrap();
        let summary = handle.wait().await.unwrap();

        assert_eq!(summary.units, 2);
        assert_eq!(summary.bytes, 6);
        assert_eq!(handle.outcome(), BatchOutcome::Succeeded);
        assert_eq!(handle.units()[0].buffer().as_deref(), Some(&b"aaaa"[..]));
        queue.shutdown().await;
        assert_eq!(
            queue.stats(),
            QueueStats {
                submitted: 1,
                succeeded: 1,
                failed: 0
            }
        );
    }

    #[tokio::test]
    async fn test_progress_is_byte_based_and_ends_at_100() {
        let transport = Arc::new(
            MapTransport::default()
                .with("http://h/small", b"x")
                .with("http://h/large", b"xxxxxxxxx"),
        );
        let queue = TransferQueue::start(transport, &sequential()).unwrap();

        let mut handle = queue
            .enqueue(memory_batch("sized", &["http://h/small", "http://h/large"]))
            .unwrap();
        let mut seen = Vec::new();
        handle
            .wait_with_progress(|p| seen.push((p.sizes_known, p.percent())))
            .await
            .unwrap();

        assert!(seen.iter().all(|(known, _)| *known));
        assert_eq!(seen.first().map(|(_, pct)| *pct), Some(0.0));
        assert_eq!(seen.last().map(|(_, pct)| *pct), Some(100.0));
        assert!(seen.iter().any(|(_, pct)| (*pct - 10.0).abs() < 1e-9));
        assert!(seen.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[tokio::test]
    async fn test_failure_skips_units_not_yet_started() {
        let transport = Arc::new(
            MapTransport::default()
                .with("http://h/first", b"1")
                .with("http://h/third", b"3"),
        );
        let queue = TransferQueue::start(Arc::clone(&transport) as Arc<dyn Transport>, &sequential())
            .unwrap();

        let mut handle = queue
            .enqueue(memory_batch(
                "failing",
                &["http://h/first", "http://h/missing", "http://h/third"],
            ))
            .unwrap();
        let err = handle.wait().await.unwrap_err();
        queue.shutdown().await;

        assert!(matches!(err, SyncError::HttpStatus { status: 404, .. }));
        let units = handle.units();
        assert_eq!(units[0].outcome(), UnitOutcome::Succeeded);
        assert!(matches!(units[1].outcome(), UnitOutcome::Failed(_)));
        assert_eq!(units[2].outcome(), UnitOutcome::Pending);
        assert_eq!(
            transport.requested(),
            vec!["http://h/first".to_string(), "http://h/missing".to_string()]
        );
        assert_eq!(queue.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_batches_run_in_fifo_order() {
        let transport = Arc::new(
            MapTransport::default()
                .with("http://h/1", b"1")
                .with("http://h/2", b"2")
                .with("http://h/3", b"3"),
        );
        let queue = TransferQueue::start(Arc::clone(&transport) as Arc<dyn Transport>, &sequential())
            .unwrap();

        let mut first = queue.enqueue(memory_batch("one", &["http://h/1"])).unwrap();
        let mut second = queue.enqueue(memory_batch("two", &["http://h/2"])).unwrap();
        let mut third = queue.enqueue(memory_batch("three", &["http://h/3"])).unwrap();

        third.wait().await.unwrap();
        first.wait().await.unwrap();
        second.wait().await.unwrap();

        assert_eq!(
            transport.requested(),
            vec!["http://h/1", "http://h/2", "http://h/3"]
        );
    }

    #[tokio::test]
    async fn test_next_batch_waits_for_active_one() {
        let gate = Arc::new(Notify::new());
        let transport = Arc::new(MapTransport {
            gate: Some(Arc::clone(&gate)),
            ..MapTransport::default()
        }
        .with("http://h/slow", b"s")
        .with("http://h/next", b"n"));
        let queue = TransferQueue::start(Arc::clone(&transport) as Arc<dyn Transport>, &sequential())
            .unwrap();

        let mut slow = queue.enqueue(memory_batch("slow", &["http://h/slow"])).unwrap();
        let mut next = queue.enqueue(memory_batch("next", &["http://h/next"])).unwrap();

        while transport.requested().is_empty() {
            tokio::task::yield_now().await;
        }
        assert!(queue.is_active());
        assert_eq!(queue.pending(), 1);
        assert_eq!(transport.requested(), vec!["http://h/slow"]);

        gate.notify_one();
        slow.wait().await.unwrap();
        // The gate is consumed once per request.
        while transport.requested().len() < 2 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();
        next.wait().await.unwrap();
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_empty_batch_succeeds_immediately() {
        let queue =
            TransferQueue::start(Arc::new(MapTransport::default()), &TransferConfig::default())
                .unwrap();
        let mut handle = queue.enqueue(TransferBatch::new("empty")).unwrap();

        match handle.next_event().await {
            Some(BatchEvent::Progress(progress)) => assert_eq!(progress.percent(), 100.0),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(handle.next_event().await, Some(BatchEvent::Succeeded));
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_is_rejected() {
        let queue =
            TransferQueue::start(Arc::new(MapTransport::default()), &TransferConfig::default())
                .unwrap();
        queue.shutdown().await;

        assert!(matches!(
            queue.enqueue(memory_batch("late", &["http://h/a"])),
            Err(SyncError::QueueClosed)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_fails_waiting_batches() {
        let gate = Arc::new(Notify::new());
        let transport = Arc::new(MapTransport {
            gate: Some(Arc::clone(&gate)),
            ..MapTransport::default()
        }
        .with("http://h/active", b"a")
        .with("http://h/queued", b"q"));
        let queue = Arc::new(
            TransferQueue::start(Arc::clone(&transport) as Arc<dyn Transport>, &sequential())
                .unwrap(),
        );

        let mut active = queue.enqueue(memory_batch("active", &["http://h/active"])).unwrap();
        let mut queued = queue.enqueue(memory_batch("queued", &["http://h/queued"])).unwrap();
        while transport.requested().is_empty() {
            tokio::task::yield_now().await;
        }

        let closer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.shutdown().await })
        };
        gate.notify_one();

        active.wait().await.unwrap();
        assert!(matches!(queued.wait().await, Err(SyncError::QueueClosed)));
        closer.await.unwrap();
        assert_eq!(transport.requested(), vec!["http://h/active"]);
    }

    #[test]
    fn test_start_requires_runtime() {
        let result = TransferQueue::start(Arc::new(MapTransport::default()), &TransferConfig::default());
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }
}
