//! Owned background loops that drive the workers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use transport::Transport;

use crate::{DeliveryError, DeliveryWorker, Result, TickReport, WorkSource, WorkerStats};

/// Shortest accepted tick interval.
const MIN_TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Object-safe view of a worker, so one scheduler can drive both pipelines.
#[async_trait]
pub trait Pipeline: Send + Sync {
    fn name(&self) -> &str;

    async fn run_tick(&self) -> Result<TickReport>;

    async fn stats(&self) -> WorkerStats;
}

#[async_trait]
impl<S, T> Pipeline for DeliveryWorker<S, T>
where
    S: WorkSource + 'static,
    T: Transport + 'static,
{
    fn name(&self) -> &str {
        self.pipeline()
    }

    async fn run_tick(&self) -> Result<TickReport> {
        self.tick().await
    }

    async fn stats(&self) -> WorkerStats {
        DeliveryWorker::stats(self).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    /// How long `shutdown` waits for in-flight ticks.
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

struct Registered {
    pipeline: Arc<dyn Pipeline>,
    kick: Arc<Notify>,
}

/// Cheap, cloneable access to a scheduler's pipelines for the HTTP layer.
#[derive(Clone)]
pub struct SchedulerHandle {
    pipelines: Arc<Vec<Registered>>,
}

impl SchedulerHandle {
    fn find(&self, name: &str) -> Option<&Registered> {
        self.pipelines.iter().find(|r| r.pipeline.name() == name)
    }

    /// Requests an immediate tick of `name`. Returns false for unknown pipelines.
    ///
    /// A kick that arrives mid-tick runs one more tick right after.
    pub fn kick(&self, name: &str) -> bool {
        match self.find(name) {
            Some(registered) => {
                registered.kick.notify_one();
                true
            }
            None => false,
        }
    }

    pub fn pipeline_names(&self) -> Vec<String> {
        self.pipelines
            .iter()
            .map(|r| r.pipeline.name().to_string())
            .collect()
    }

    /// Accumulated counters of every pipeline, keyed by name.
    pub async fn stats(&self) -> BTreeMap<String, WorkerStats> {
        let mut stats = BTreeMap::new();
        for registered in self.pipelines.iter() {
            stats.insert(
                registered.pipeline.name().to_string(),
                registered.pipeline.stats().await,
            );
        }
        stats
    }
}

/// Runs one loop per pipeline, each ticking on an interval or when kicked.
///
/// Nothing runs until [`start`](Self::start); [`shutdown`](Self::shutdown)
/// lets in-flight ticks finish. Tests can skip the scheduler and call
/// [`DeliveryWorker::tick`] directly.
pub struct Scheduler {
    handle: SchedulerHandle,
    config: SchedulerConfig,
    token: CancellationToken,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, pipelines: Vec<Arc<dyn Pipeline>>) -> Self {
        let registered = pipelines
            .into_iter()
            .map(|pipeline| Registered {
                pipeline,
                kick: Arc::new(Notify::new()),
            })
            .collect();

        Self {
            handle: SchedulerHandle {
                pipelines: Arc::new(registered),
            },
            config,
            token: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Spawns the pipeline loops. The first tick of each runs immediately.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(DeliveryError::AlreadyStarted);
        }

        let tick_interval = self.config.tick_interval.max(MIN_TICK_INTERVAL);
        for registered in self.handle.pipelines.iter() {
            let name = registered.pipeline.name().to_string();
            let task = tokio::spawn(run_pipeline(
                registered.pipeline.clone(),
                registered.kick.clone(),
                tick_interval,
                self.token.clone(),
            ));
            self.tasks.push((name, task));
        }

        tracing::info!(
            pipelines = ?self.handle.pipeline_names(),
            tick_interval_ms = tick_interval.as_millis() as u64,
            "Scheduler started"
        );
        Ok(())
    }

    /// Stops the loops and waits for in-flight ticks to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        self.token.cancel();
        let tasks = std::mem::take(&mut self.tasks);
        let timeout = self.config.shutdown_timeout;

        let joined = tokio::time::timeout(timeout, async move {
            let mut first_panic = None;
            for (pipeline, task) in tasks {
                if let Err(join_error) = task.await {
                    tracing::error!(pipeline, error = %join_error, "Pipeline loop panicked");
                    first_panic.get_or_insert(DeliveryError::PipelinePanic {
                        pipeline,
                        error: join_error.to_string(),
                    });
                }
            }
            first_panic
        })
        .await;

        match joined {
            Ok(None) => {
                tracing::info!("Scheduler stopped");
                Ok(())
            }
            Ok(Some(panic)) => Err(panic),
            Err(_) => {
                tracing::error!(timeout_secs = timeout.as_secs(), "Scheduler shutdown timed out");
                Err(DeliveryError::ShutdownTimeout { timeout })
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if !self.tasks.is_empty() {
            tracing::warn!("Scheduler dropped while running, cancelling pipeline loops");
            self.token.cancel();
        }
    }
}

async fn run_pipeline(
    pipeline: Arc<dyn Pipeline>,
    kick: Arc<Notify>,
    tick_interval: Duration,
    token: CancellationToken,
) {
    let mut interval = tokio::time::interval(tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = interval.tick() => {}
            () = kick.notified() => {}
        }

        if let Err(e) = pipeline.run_tick().await {
            tracing::error!(pipeline = pipeline.name(), error = %e, "Tick failed");
        }
    }

    tracing::debug!(pipeline = pipeline.name(), "Pipeline loop stopped");
}
