use crate::config::{CheckerId, ConfigError, EndPoint, validate_schedule};
use crate::probe::{Check, Prober};
use crate::storage::StoreError;
use crossbeam_channel::{Receiver, Sender, TryRecvError, select};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CheckerError {
    #[error("checker is already started")]
    AlreadyStarted,
    #[error("checker is already stopped")]
    AlreadyStopped,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckerState {
    Inactive,
    Active,
}

/// Receives every check a running checker produces.
pub trait CheckSink: Send + Sync {
    fn record(&self, checker_id: CheckerId, check: &Check) -> Result<(), StoreError>;
}

/// Serialized form of a checker definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckerRecord {
    pub id: CheckerId,
    pub end_point: EndPoint,
    pub active: bool,
    pub timeout_ms: u64,
    pub interval_ms: u64,
}

struct WorkerHandle {
    stop_tx: Sender<()>,
    join: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Schedule {
    active: bool,
    worker: Option<WorkerHandle>,
    /// Loops that were told to stop and may still be finishing a probe.
    retired: Vec<JoinHandle<()>>,
}

pub struct Checker {
    id: CheckerId,
    endpoint: Arc<EndPoint>,
    timeout: Duration,
    interval: Duration,
    schedule: Mutex<Schedule>,
}

impl Checker {
    pub fn new(endpoint: EndPoint, timeout: Duration, interval: Duration) -> Result<Self, ConfigError> {
        Self::with_id(Uuid::new_v4(), endpoint, timeout, interval)
    }

    pub fn with_id(
        id: CheckerId,
        endpoint: EndPoint,
        timeout: Duration,
        interval: Duration,
    ) -> Result<Self, ConfigError> {
        validate_schedule(timeout, interval)?;
        Ok(Self {
            id,
            endpoint: Arc::new(endpoint),
            timeout,
            interval,
            schedule: Mutex::new(Schedule::default()),
        })
    }

    /// Rebuilds an inactive checker from its record. The schedule is checked
    /// again since the record comes from disk.
    pub fn from_record(record: &CheckerRecord) -> Result<Self, ConfigError> {
        Self::with_id(
            record.id,
            record.end_point.clone(),
            Duration::from_millis(record.timeout_ms),
            Duration::from_millis(record.interval_ms),
        )
    }

    pub fn id(&self) -> CheckerId {
        self.id
    }

    pub fn endpoint(&self) -> &EndPoint {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> CheckerState {
        if self.lock_schedule().active {
            CheckerState::Active
        } else {
            CheckerState::Inactive
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == CheckerState::Active
    }

    pub fn record(&self) -> CheckerRecord {
        CheckerRecord {
            id: self.id,
            end_point: (*self.endpoint).clone(),
            active: self.is_active(),
            timeout_ms: self.timeout.as_millis() as u64,
            interval_ms: self.interval.as_millis() as u64,
        }
    }

    /// Arms a fresh ticker and spawns the scheduling loop. The first probe
    /// runs one interval after this returns.
    pub fn start(
        &self,
        prober: Box<dyn Prober>,
        sink: Arc<dyn CheckSink>,
    ) -> Result<(), CheckerError> {
        let mut schedule = self.lock_schedule();
        if schedule.active {
            return Err(CheckerError::AlreadyStarted);
        }
        schedule.retired.retain(|join| !join.is_finished());

        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let ticker = crossbeam_channel::tick(self.interval);
        let ctx = LoopContext {
            id: self.id,
            endpoint: Arc::clone(&self.endpoint),
            timeout: self.timeout,
        };
        let join = thread::spawn(move || run_loop(ctx, prober, sink, ticker, stop_rx));

        schedule.active = true;
        schedule.worker = Some(WorkerHandle {
            stop_tx,
            join: Some(join),
        });
        info!(
            checker_id = %self.id,
            endpoint = %self.endpoint,
            interval_ms = self.interval.as_millis() as u64,
            "checker started"
        );
        Ok(())
    }

    /// Signals the loop and returns without waiting for it. A probe already
    /// in flight finishes and is recorded; no further probe starts.
    pub fn stop(&self) -> Result<(), CheckerError> {
        let mut schedule = self.lock_schedule();
        if !schedule.active {
            return Err(CheckerError::AlreadyStopped);
        }
        schedule.active = false;

        if let Some(mut worker) = schedule.worker.take() {
            // Capacity 1 and a fresh channel per start: never blocks.
            let _ = worker.stop_tx.try_send(());
            if let Some(join) = worker.join.take() {
                schedule.retired.push(join);
            }
        }
        info!(checker_id = %self.id, "checker stop requested");
        Ok(())
    }

    /// Joins every stopped loop. Must not be called from a sink.
    pub fn wait_stopped(&self) {
        let retired = std::mem::take(&mut self.lock_schedule().retired);
        for join in retired {
            if join.join().is_err() {
                warn!(checker_id = %self.id, "checker loop panicked");
            }
        }
    }

    fn lock_schedule(&self) -> MutexGuard<'_, Schedule> {
        self.schedule
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct LoopContext {
    id: CheckerId,
    endpoint: Arc<EndPoint>,
    timeout: Duration,
}

fn run_loop(
    ctx: LoopContext,
    mut prober: Box<dyn Prober>,
    sink: Arc<dyn CheckSink>,
    ticker: Receiver<Instant>,
    stop_rx: Receiver<()>,
) {
    loop {
        select! {
            recv(stop_rx) -> _ => break,
            recv(ticker) -> _ => {
                // select! picks randomly among ready arms; stop wins over a pending tick.
                if stop_requested(&stop_rx) {
                    break;
                }
                let check = prober.probe(&ctx.endpoint, ctx.timeout);
                if let Some(error) = &check.error {
                    debug!(checker_id = %ctx.id, endpoint = %ctx.endpoint, %error, "probe failed");
                }
                if let Err(err) = sink.record(ctx.id, &check) {
                    warn!(checker_id = %ctx.id, error = %err, "failed to record check");
                }
            }
        }
    }
    info!(checker_id = %ctx.id, "checker stopped");
}

fn stop_requested(stop_rx: &Receiver<()>) -> bool {
    !matches!(stop_rx.try_recv(), Err(TryRecvError::Empty))
}
