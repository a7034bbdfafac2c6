use super::{BenchmarkService, Metrics};
use crate::config::BenchmarkConfig;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type Services = Arc<Vec<Arc<dyn BenchmarkService>>>;

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    dropped: AtomicU64,
    dead: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Accepted into the queue
    pub published: u64,
    /// Rejected because the queue was full or closed
    pub dropped: u64,
    /// Dequeued while no service was registered
    pub dead: u64,
    /// Successful `submit` calls
    pub delivered: u64,
    /// Failed `submit` calls
    pub failed: u64,
}

/// Fans metrics out to benchmark services on a bounded worker pool.
///
/// `publish` never blocks: it enqueues into a bounded channel and returns. A dispatcher
/// task drains the channel and runs one `submit` per service per event, with at most
/// `threads` submits in flight. Each event reaches each service at most once; there is
/// no ordering across services and no retry.
pub struct MetricsTransfer {
    sender: Mutex<Option<mpsc::Sender<Metrics>>>,
    services: Arc<RwLock<Services>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for MetricsTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsTransfer")
            .field("services", &self.service_names())
            .field("stats", &self.stats())
            .finish()
    }
}

impl MetricsTransfer {
    /// Start the dispatcher. Must be called within a tokio runtime.
    pub fn new(config: &BenchmarkConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_size);
        let services: Arc<RwLock<Services>> = Arc::new(RwLock::new(Arc::new(Vec::new())));
        let counters = Arc::new(Counters::default());

        let dispatcher = tokio::spawn(dispatch(
            receiver,
            Arc::clone(&services),
            config.threads,
            Arc::clone(&counters),
        ));

        info!(threads = config.threads, queue_size = config.queue_size, "metrics transfer started");

        Self {
            sender: Mutex::new(Some(sender)),
            services,
            dispatcher: Mutex::new(Some(dispatcher)),
            counters,
        }
    }

    /// Add a service; events published afterwards reach it
    pub fn register(&self, service: Arc<dyn BenchmarkService>) {
        let mut services = self.services.write();
        let mut next: Vec<_> = services.iter().cloned().collect();
        debug!(service = service.name(), "benchmark service registered");
        next.push(service);
        *services = Arc::new(next);
    }

    /// Remove services by name; returns whether any was removed
    pub fn unregister(&self, name: &str) -> bool {
        let mut services = self.services.write();
        let next: Vec<_> = services.iter().filter(|s| s.name() != name).cloned().collect();
        let removed = next.len() != services.len();
        *services = Arc::new(next);
        removed
    }

    /// Current services (a snapshot)
    pub fn services(&self) -> Vec<Arc<dyn BenchmarkService>> {
        self.services.read().iter().cloned().collect()
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.read().iter().map(|s| s.name().to_string()).collect()
    }

    /// Queue metrics for delivery. Drops them with a warning if the queue is full.
    pub fn publish(&self, metrics: Metrics) {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(query = %metrics.name, "metrics transfer is shut down, dropping metrics");
            return;
        };

        match sender.try_send(metrics) {
            Ok(()) => {
                self.counters.published.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(metrics)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(query = %metrics.name, "metrics queue is full, dropping metrics");
            }
            Err(TrySendError::Closed(metrics)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(query = %metrics.name, "metrics dispatcher stopped, dropping metrics");
            }
        }
    }

    pub fn stats(&self) -> TransferStats {
        TransferStats {
            published: self.counters.published.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            dead: self.counters.dead.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting metrics and wait until everything queued has been delivered.
    /// Idempotent.
    pub async fn shutdown(&self) {
        self.sender.lock().take();
        let dispatcher = self.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            if let Err(e) = dispatcher.await {
                error!(error = %e, "metrics dispatcher terminated abnormally");
            }
            info!(stats = ?self.stats(), "metrics transfer stopped");
        }
    }
}

async fn dispatch(
    mut receiver: mpsc::Receiver<Metrics>,
    services: Arc<RwLock<Services>>,
    threads: usize,
    counters: Arc<Counters>,
) {
    let semaphore = Arc::new(Semaphore::new(threads));

    while let Some(metrics) = receiver.recv().await {
        let current = Arc::clone(&*services.read());
        if current.is_empty() {
            counters.dead.fetch_add(1, Ordering::Relaxed);
            warn!(query = %metrics.name, "dead event: no benchmark service registered");
            continue;
        }

        let metrics = Arc::new(metrics);
        for service in current.iter() {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                return;
            };
            let service = Arc::clone(service);
            let metrics = Arc::clone(&metrics);
            let counters = Arc::clone(&counters);
            tokio::spawn(async move {
                let _permit = permit;
                match service.submit(&metrics).await {
                    Ok(()) => {
                        counters.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        error!(
                            service = service.name(),
                            query = %metrics.name,
                            error = %e,
                            "benchmark service failed"
                        );
                    }
                }
            });
        }
    }

    // Wait for in-flight submits
    let all = u32::try_from(threads).unwrap_or(u32::MAX);
    let _ = semaphore.acquire_many(all).await;
}
