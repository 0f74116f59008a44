//! The generic delivery loop body.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::RwLock;
use transport::{Transport, TransportError};

use crate::{DeliveryError, DeliveryUnit, Result, WorkSource};

/// Tuning for one worker.
///
/// `claim_ttl` must match the lease the work source grants. Each claimed unit
/// is abandoned `lease_margin` before its lease runs out, so a unit is never
/// still being sent once another worker may claim it.
#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// Maximum units claimed per tick.
    pub claim_limit: usize,
    /// Upper bound on one send, on top of the transport's own timeout.
    pub send_timeout: Duration,
    /// Lease length granted by the work source.
    pub claim_ttl: Duration,
    /// Slack kept between the unit deadline and the end of the lease.
    pub lease_margin: Duration,
}

impl WorkerConfig {
    /// Shortest lease that still fits one send plus the margin on both sides.
    pub fn min_claim_ttl(send_timeout: Duration, lease_margin: Duration) -> Duration {
        send_timeout + lease_margin * 2
    }

    /// Wall-clock budget for one unit: prepare, send and record.
    pub fn unit_deadline(&self) -> Duration {
        self.claim_ttl.saturating_sub(self.lease_margin)
    }

    /// Rejects settings under which a send could outlive its lease.
    pub fn validate(&self) -> Result<()> {
        if self.claim_limit == 0 {
            return Err(DeliveryError::InvalidConfig(
                "claim limit must be greater than zero".to_string(),
            ));
        }
        let min_ttl = Self::min_claim_ttl(self.send_timeout, self.lease_margin);
        if self.claim_ttl < min_ttl {
            return Err(DeliveryError::InvalidConfig(format!(
                "claim ttl {:?} is shorter than send timeout {:?} plus twice the lease margin {:?}",
                self.claim_ttl, self.send_timeout, self.lease_margin
            )));
        }
        Ok(())
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            claim_limit: 10,
            send_timeout: Duration::from_secs(15),
            claim_ttl: Duration::from_secs(60),
            lease_margin: Duration::from_secs(5),
        }
    }
}

/// What happened to one claimed unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    /// The receiver accepted the unit and the outcome was recorded.
    Delivered { events: usize },
    /// Nothing to send; the claim was released.
    Idle,
    /// The send failed and the retry was scheduled.
    Failed,
    /// A local error (store read or write) aborted this unit only.
    Fault,
}

impl UnitOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitOutcome::Delivered { .. } => "delivered",
            UnitOutcome::Idle => "idle",
            UnitOutcome::Failed => "failed",
            UnitOutcome::Fault => "fault",
        }
    }
}

/// Summary of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub claimed: usize,
    pub delivered: usize,
    pub idle: usize,
    pub failed: usize,
    pub faults: usize,
    pub events_delivered: usize,
}

impl TickReport {
    fn record(&mut self, outcome: UnitOutcome) {
        match outcome {
            UnitOutcome::Delivered { events } => {
                self.delivered += 1;
                self.events_delivered += events;
            }
            UnitOutcome::Idle => self.idle += 1,
            UnitOutcome::Failed => self.failed += 1,
            UnitOutcome::Fault => self.faults += 1,
        }
    }

    /// True when the tick did nothing but release idle claims.
    pub fn is_quiet(&self) -> bool {
        self.delivered == 0 && self.failed == 0 && self.faults == 0
    }
}

/// Counters accumulated across ticks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub ticks: u64,
    pub claimed: u64,
    pub delivered: u64,
    pub idle: u64,
    pub failed: u64,
    pub faults: u64,
    pub events_delivered: u64,
    pub last_report: Option<TickReport>,
}

impl WorkerStats {
    fn absorb(&mut self, report: TickReport) {
        self.ticks += 1;
        self.claimed += report.claimed as u64;
        self.delivered += report.delivered as u64;
        self.idle += report.idle as u64;
        self.failed += report.failed as u64;
        self.faults += report.faults as u64;
        self.events_delivered += report.events_delivered as u64;
        self.last_report = Some(report);
    }
}

/// Claims, sends and records units from one [`WorkSource`] through one [`Transport`].
///
/// `tick` is the whole algorithm; the [`Scheduler`](crate::Scheduler) only
/// decides when to call it.
pub struct DeliveryWorker<S, T> {
    source: S,
    transport: T,
    config: WorkerConfig,
    stats: Arc<RwLock<WorkerStats>>,
}

impl<S: WorkSource, T: Transport> DeliveryWorker<S, T> {
    pub fn new(source: S, transport: T, config: WorkerConfig) -> Self {
        Self {
            source,
            transport,
            config,
            stats: Arc::new(RwLock::new(WorkerStats::default())),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn pipeline(&self) -> &str {
        self.source.pipeline()
    }

    /// Snapshot of the accumulated counters.
    pub async fn stats(&self) -> WorkerStats {
        self.stats.read().await.clone()
    }

    /// Runs one pass: claim due units and process them concurrently.
    ///
    /// Only a failure to claim is returned as an error; per-unit problems are
    /// reported in the [`TickReport`].
    #[tracing::instrument(skip(self), fields(pipeline = %self.source.pipeline()))]
    pub async fn tick(&self) -> Result<TickReport> {
        metrics::counter!("delivery_ticks_total", "pipeline" => self.pipeline().to_string())
            .increment(1);

        let claims = match self.source.claim_due(self.config.claim_limit).await {
            Ok(claims) => claims,
            Err(e) => {
                tracing::error!(error = %e, "Failed to claim due units");
                let mut stats = self.stats.write().await;
                stats.ticks += 1;
                stats.faults += 1;
                return Err(e);
            }
        };

        let mut report = TickReport {
            claimed: claims.len(),
            ..TickReport::default()
        };

        let outcomes = join_all(claims.iter().map(|claim| self.process(claim))).await;
        for outcome in outcomes {
            metrics::counter!(
                "delivery_units_total",
                "pipeline" => self.pipeline().to_string(),
                "outcome" => outcome.as_str()
            )
            .increment(1);
            report.record(outcome);
        }
        metrics::counter!("delivery_events_total", "pipeline" => self.pipeline().to_string())
            .increment(report.events_delivered as u64);

        self.stats.write().await.absorb(report);

        if !report.is_quiet() {
            tracing::info!(
                claimed = report.claimed,
                delivered = report.delivered,
                failed = report.failed,
                faults = report.faults,
                events = report.events_delivered,
                "Tick complete"
            );
        }
        Ok(report)
    }

    /// Processes one claim under the unit deadline. A unit that overruns is
    /// dropped mid-flight and its claim released while the lease still holds.
    async fn process(&self, claim: &S::Claim) -> UnitOutcome {
        let deadline = self.config.unit_deadline();
        match tokio::time::timeout(deadline, self.process_claim(claim)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let unit_id = self.source.unit_id(claim);
                tracing::error!(unit_id = %unit_id, ?deadline, "Unit overran its lease deadline");
                if let Err(e) = self.source.release(claim).await {
                    tracing::warn!(unit_id = %unit_id, error = %e, "Failed to release overrun claim");
                }
                UnitOutcome::Fault
            }
        }
    }

    async fn process_claim(&self, claim: &S::Claim) -> UnitOutcome {
        let unit_id = self.source.unit_id(claim);

        let unit = match self.source.prepare(claim).await {
            Ok(Some(unit)) => unit,
            Ok(None) => {
                if let Err(e) = self.source.release(claim).await {
                    tracing::warn!(unit_id = %unit_id, error = %e, "Failed to release idle claim");
                }
                return UnitOutcome::Idle;
            }
            Err(e) => {
                tracing::error!(unit_id = %unit_id, error = %e, "Failed to prepare unit");
                if let Err(e) = self.source.release(claim).await {
                    tracing::warn!(unit_id = %unit_id, error = %e, "Failed to release claim after fault");
                }
                return UnitOutcome::Fault;
            }
        };

        let started = Instant::now();
        let sent = match tokio::time::timeout(self.config.send_timeout, self.transport.send(&unit.request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.config.send_timeout)),
        };
        metrics::histogram!(
            "delivery_send_seconds",
            "pipeline" => self.pipeline().to_string(),
            "transport" => self.transport.name()
        )
        .record(started.elapsed().as_secs_f64());

        match sent {
            Ok(receipt) => match self.source.on_success(claim, &unit, receipt).await {
                Ok(()) => UnitOutcome::Delivered {
                    events: unit.event_count,
                },
                Err(e) => {
                    // Accepted by the receiver but not recorded: it will be resent.
                    tracing::error!(unit_id = %unit_id, error = %e, "Failed to record delivery");
                    UnitOutcome::Fault
                }
            },
            Err(error) => {
                metrics::counter!(
                    "delivery_send_failures_total",
                    "pipeline" => self.pipeline().to_string(),
                    "error_kind" => error.kind()
                )
                .increment(1);
                self.record_failure(claim, &unit, &unit_id, &error).await
            }
        }
    }

    async fn record_failure(
        &self,
        claim: &S::Claim,
        unit: &DeliveryUnit,
        unit_id: &str,
        error: &TransportError,
    ) -> UnitOutcome {
        match self.source.on_failure(claim, unit, error).await {
            Ok(()) => UnitOutcome::Failed,
            Err(e) => {
                tracing::error!(unit_id = %unit_id, error = %e, send_error = %error, "Failed to record failure");
                UnitOutcome::Fault
            }
        }
    }
}
