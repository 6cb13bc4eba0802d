use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};

use confmount_core::{ChangeKind, ResourceRef, Snapshot, WatchEvent};
use confmount_writer::{AtomicWriter, PublishOutcome};

use crate::config::ControllerConfig;
use crate::detector::{self, SnapshotCache};
use crate::error::{io_err, ControllerError};
use crate::hook::HookRunner;
use crate::queue::{ExponentialBackoff, WorkQueue};
use crate::source::SnapshotSource;
use crate::stats::{ControllerStats, StatsSnapshot};

/// Keeps one directory in sync with one remote resource.
///
/// Cheap to clone; clones share the cache, the queue and the counters.
#[derive(Clone)]
pub struct Controller {
    resource: ResourceRef,
    key: String,
    source: Arc<dyn SnapshotSource>,
    writer: AtomicWriter,
    hook: Option<HookRunner>,
    config: ControllerConfig,
    cache: SnapshotCache,
    queue: WorkQueue<String>,
    stats: Arc<ControllerStats>,
    /// Keys whose last written content has not been followed by a
    /// successful hook run yet.
    hook_pending: Arc<Mutex<HashSet<String>>>,
}

impl Controller {
    pub fn new(
        resource: ResourceRef,
        source: Arc<dyn SnapshotSource>,
        writer: AtomicWriter,
        config: ControllerConfig,
    ) -> Self {
        let queue = WorkQueue::new(config.retry_base_delay, config.retry_max_delay);
        Self {
            key: resource.key(),
            resource,
            source,
            writer,
            hook: None,
            config,
            cache: SnapshotCache::default(),
            queue,
            stats: Arc::new(ControllerStats::default()),
            hook_pending: Arc::default(),
        }
    }

    /// Run `hook` after every publish that changed the mount.
    pub fn with_hook(mut self, hook: HookRunner) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn resource(&self) -> &ResourceRef {
        &self.resource
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn queue(&self) -> &WorkQueue<String> {
        &self.queue
    }

    /// Snapshot currently cached for the watched resource.
    pub fn cached(&self) -> Option<Snapshot> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&self.key)
            .cloned()
    }

    /// Feed one change-stream event through the detector. Returns whether the
    /// key was enqueued.
    pub fn dispatch(&self, event: WatchEvent) -> bool {
        detector::dispatch(&self.cache, &self.queue, &self.stats, &self.key, event)
    }

    // -----------------------------------------------------------------------
    // Startup
    // -----------------------------------------------------------------------

    /// Fetch once and publish unconditionally; seeds the cache.
    ///
    /// Every error here is fatal to the caller.
    pub async fn initial_sync(&self) -> Result<PublishOutcome, ControllerError> {
        let snapshot = self.source.fetch(&self.resource).await?;
        let projections = snapshot.projections(self.config.file_mode);
        let writer = self.writer.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let pruned = writer.prune_orphans()?;
            if pruned > 0 {
                tracing::info!(pruned, "removed orphaned staging directories");
            }
            writer.publish(&projections)
        })
        .await
        .map_err(|err| ControllerError::Join {
            task: "initial_sync",
            reason: err.to_string(),
        })??;

        self.count(outcome);
        tracing::info!(
            resource = %self.resource,
            target = %self.writer.target_dir().display(),
            resource_version = %snapshot.resource_version,
            keys = snapshot.data.len(),
            ?outcome,
            "initial sync complete",
        );
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(self.key.clone(), snapshot);
        Ok(outcome)
    }

    // -----------------------------------------------------------------------
    // Steady state
    // -----------------------------------------------------------------------

    /// Run the watcher and the workers until `shutdown` fires.
    pub async fn run(
        &self,
        shutdown: broadcast::Sender<()>,
    ) -> Result<StatsSnapshot, ControllerError> {
        let watcher_handle = {
            let controller = self.clone();
            let shutdown_rx = shutdown.subscribe();
            tokio::spawn(async move {
                let result = controller.watch(shutdown_rx).await;
                controller.queue.shut_down();
                result
            })
        };

        let worker_handles: Vec<_> = (0..self.config.workers.max(1))
            .map(|worker| {
                let controller = self.clone();
                tokio::spawn(async move {
                    tracing::debug!(worker, "worker started");
                    while controller.process_next_item().await {}
                    tracing::debug!(worker, "worker stopped");
                    Ok::<(), ControllerError>(())
                })
            })
            .collect();

        let watcher_result = watcher_handle.await;
        let mut worker_results = Vec::with_capacity(worker_handles.len());
        for handle in worker_handles {
            worker_results.push(handle.await);
        }

        handle_join("watcher", watcher_result)?;
        for result in worker_results {
            handle_join("worker", result)?;
        }

        let stats = self.stats.snapshot();
        tracing::info!(
            acknowledged = stats.acknowledged,
            performed = stats.performed,
            unchanged = stats.unchanged,
            hook_runs = stats.hook_runs,
            failures = stats.failures,
            dropped = stats.dropped,
            "controller stopped",
        );
        Ok(stats)
    }

    /// [`Controller::run`] until SIGINT or SIGTERM.
    pub async fn run_until_signal(&self) -> Result<StatsSnapshot, ControllerError> {
        let (shutdown_tx, _) = broadcast::channel::<()>(16);

        let signal_handle = {
            let shutdown = shutdown_tx.clone();
            let mut shutdown_rx = shutdown.subscribe();
            tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown_rx.recv() => Ok::<(), ControllerError>(()),
                    signal = wait_for_signal() => match signal {
                        Ok(name) => {
                            tracing::info!(signal = name, "received signal, shutting down");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(io_err("signal handler", err)),
                    }
                }
            })
        };

        let result = self.run(shutdown_tx.clone()).await;
        let _ = shutdown_tx.send(());
        handle_join("signal_handler", signal_handle.await)?;
        result
    }

    async fn watch(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), ControllerError> {
        let period = self.config.resync_interval;
        let mut resync = tokio::time::interval_at(Instant::now() + period, period);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut backoff = ExponentialBackoff::new(
            self.config.resubscribe_base_delay,
            self.config.resubscribe_max_delay,
        );

        loop {
            match self.source.subscribe(&self.resource).await {
                Ok(mut stream) => {
                    tracing::info!(resource = %self.resource, "watching for changes");
                    loop {
                        tokio::select! {
                            _ = shutdown_rx.recv() => return Ok(()),
                            _ = resync.tick() => self.resync().await,
                            event = stream.recv() => match event {
                                Some(event) => {
                                    backoff.forget(&());
                                    self.dispatch(event);
                                }
                                None => break,
                            },
                        }
                    }
                    tracing::warn!(resource = %self.resource, "change stream closed");
                }
                Err(err) => {
                    tracing::warn!(resource = %self.resource, error = %err, "subscribe failed");
                }
            }

            let delay = backoff.when(&());
            tracing::info!(delay_ms = delay.as_millis() as u64, "resubscribing");
            tokio::select! {
                _ = shutdown_rx.recv() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Re-read the resource and feed it through the detector.
    async fn resync(&self) {
        let event = match self.source.fetch(&self.resource).await {
            Ok(snapshot) => WatchEvent::new(ChangeKind::Modified, snapshot),
            Err(err) if err.is_not_found() => {
                if self.cached().is_none() {
                    return;
                }
                WatchEvent::new(ChangeKind::Deleted, Snapshot::default())
            }
            Err(err) => {
                tracing::warn!(resource = %self.resource, error = %err, "resync fetch failed");
                return;
            }
        };
        tracing::debug!(resource = %self.resource, "periodic resync");
        self.dispatch(event);
    }

    // -----------------------------------------------------------------------
    // Worker
    // -----------------------------------------------------------------------

    /// Take one key off the queue and reconcile it. Returns `false` once the
    /// queue has shut down.
    pub async fn process_next_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        match self.process_item(&key).await {
            Ok(()) => self.queue.forget(&key),
            Err(err) => {
                self.stats.fail();
                let requeues = self.queue.num_requeues(&key);
                if requeues < self.config.max_retries {
                    tracing::warn!(key = %key, requeues, error = %err, "processing failed, will retry");
                    self.queue.add_rate_limited(key.clone());
                } else {
                    tracing::error!(key = %key, requeues, error = %err, "processing failed, giving up");
                    self.stats.drop_key();
                    self.queue.forget(&key);
                }
            }
        }
        self.queue.done(&key);
        true
    }

    /// Publish the latest cached snapshot of `key`. The hook runs when the
    /// publish wrote new content, or when an earlier hook run for `key`
    /// failed.
    pub async fn process_item(&self, key: &str) -> Result<(), ControllerError> {
        let snapshot = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned();
        let Some(snapshot) = snapshot else {
            tracing::info!(key, "no cached object, nothing to do");
            return Ok(());
        };

        let projections = snapshot.projections(self.config.file_mode);
        let writer = self.writer.clone();
        let outcome = tokio::task::spawn_blocking(move || writer.publish(&projections))
            .await
            .map_err(|err| ControllerError::Join {
                task: "publish",
                reason: err.to_string(),
            })??;

        let count = self.count(outcome);
        tracing::info!(
            key,
            resource_version = %snapshot.resource_version,
            ?outcome,
            count,
            "update performed",
        );

        let Some(hook) = &self.hook else {
            return Ok(());
        };
        {
            let mut pending = self.hook_pending.lock().unwrap_or_else(PoisonError::into_inner);
            if outcome == PublishOutcome::Written {
                pending.insert(key.to_string());
            } else if !pending.contains(key) {
                tracing::debug!(key, "content unchanged, hook skipped");
                return Ok(());
            }
        }
        self.stats.hook_ran();
        hook.run().await?;
        self.hook_pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }

    fn count(&self, outcome: PublishOutcome) -> u64 {
        match outcome {
            PublishOutcome::Written => self.stats.perform(),
            PublishOutcome::Unchanged => self.stats.skip(),
        }
    }
}

async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

fn handle_join(
    task: &'static str,
    result: Result<Result<(), ControllerError>, tokio::task::JoinError>,
) -> Result<(), ControllerError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(ControllerError::Join {
            task,
            reason: err.to_string(),
        }),
    }
}

/// Install the global `tracing` subscriber on stderr. `RUST_LOG` overrides
/// the default `info` filter.
pub fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Build a multi-threaded runtime, sync once, then run until a signal.
pub fn start_blocking(controller: Controller) -> Result<StatsSnapshot, ControllerError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(async {
        controller.initial_sync().await?;
        controller.run_until_signal().await
    })
}
