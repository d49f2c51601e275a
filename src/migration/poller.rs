//! Status polling loop.
//!
//! Queries every outstanding import on a fixed interval and emits a progress
//! snapshot per iteration. The first iteration runs immediately. Polling
//! continues while any job reports `InProgress`; an optional deadline, an
//! iteration cap and the cancellation token can stop it earlier.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::azure::OperationHandle;
use crate::error::AppError;
use crate::migration::ledger::{JobId, JobLedger};
use crate::migration::model::StatusObservation;
use crate::migration::ops::{ImportService, ProgressSink};
use crate::migration::scheduler::RequestScheduler;

/// Default interval between polling iterations.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    /// Stop once this much time has passed since polling began.
    pub max_wait: Option<Duration>,
    /// Stop after this many iterations.
    pub max_iterations: Option<u32>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_wait: None,
            max_iterations: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No job reports `InProgress`.
    Completed,
    Cancelled,
    DeadlineReached,
    IterationCapReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOutcome {
    pub iterations: u32,
    pub stop_reason: StopReason,
}

pub struct StatusPoller<S: ImportService> {
    service: S,
    sink: Arc<dyn ProgressSink>,
    scheduler: RequestScheduler,
    cancel: CancellationToken,
    settings: PollSettings,
}

impl<S: ImportService> StatusPoller<S> {
    pub fn new(
        service: S,
        sink: Arc<dyn ProgressSink>,
        scheduler: RequestScheduler,
        cancel: CancellationToken,
        settings: PollSettings,
    ) -> Self {
        Self {
            service,
            sink,
            scheduler,
            cancel,
            settings,
        }
    }

    /// Polls until a stop condition holds. Updates `ledger` in place.
    pub async fn poll(&self, ledger: &mut JobLedger) -> PollOutcome {
        if ledger.pollable().is_empty() {
            info!("[POLL] No started imports to poll");
            return PollOutcome {
                iterations: 0,
                stop_reason: StopReason::Completed,
            };
        }

        let deadline = self.settings.max_wait.map(|wait| Instant::now() + wait);
        let mut iterations = 0u32;

        let stop_reason = loop {
            if self.cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            iterations += 1;
            self.query_round(ledger).await;

            let snapshot = ledger.snapshot(iterations);
            info!(
                "[POLL] Iteration {}: {} of {} import(s) not yet succeeded",
                iterations, snapshot.not_succeeded, snapshot.total_jobs
            );
            self.sink.emit_progress(&snapshot);

            if !ledger.any_in_progress() {
                break StopReason::Completed;
            }
            if self
                .settings
                .max_iterations
                .is_some_and(|cap| iterations >= cap)
            {
                break StopReason::IterationCapReached;
            }
            if let Some(reason) = self.wait_interval(deadline).await {
                break reason;
            }
        };

        match stop_reason {
            StopReason::Completed => {
                info!("[POLL] No imports in progress after {} iteration(s)", iterations)
            }
            other => warn!(
                "[POLL] Stopped after {} iteration(s): {:?}",
                iterations, other
            ),
        }

        PollOutcome {
            iterations,
            stop_reason,
        }
    }

    /// Sleeps for one interval. Returns a stop reason if the wait was cut short.
    async fn wait_interval(&self, deadline: Option<Instant>) -> Option<StopReason> {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(StopReason::DeadlineReached);
        }

        let until_deadline = async {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Some(StopReason::Cancelled),
            _ = until_deadline => Some(StopReason::DeadlineReached),
            _ = tokio::time::sleep(self.settings.interval) => None,
        }
    }

    /// Queries every pollable job once and applies the answers in job order.
    async fn query_round(&self, ledger: &mut JobLedger) {
        let targets = ledger.pollable();
        let mut join_set: JoinSet<(JobId, OperationHandle, Result<StatusObservation, AppError>)> =
            JoinSet::new();

        for (id, handle) in targets {
            let service = self.service.clone();
            let scheduler = self.scheduler.clone();
            join_set.spawn(async move {
                let result = async {
                    let _permit = scheduler.acquire().await?;
                    service.get_status(&handle).await
                }
                .await;
                (id, handle, result)
            });
        }

        let mut answers = Vec::with_capacity(join_set.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(answer) => answers.push(answer),
                Err(e) => warn!("[POLL] Status task failed: {:?}", e),
            }
        }
        answers.sort_by_key(|(id, _, _)| *id);

        for (id, handle, result) in answers {
            let result = result.map_err(|e| {
                let err = AppError::StatusQueryFailed {
                    handle: handle.to_string(),
                    message: e.to_string(),
                };
                warn!("[POLL] {}", err);
                err
            });
            ledger.apply(id, result);
        }
    }
}
