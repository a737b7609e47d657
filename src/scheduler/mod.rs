//! # Daily Scheduler
//!
//! Turns a declarative list of [`ScheduleEntry`] values into one-shot timers
//! for today and re-arms itself every day at the reset time (03:00 by
//! default). No entry is natively recurring: each day's timers exist only
//! because the reset timer called [`Scheduler::activate_schedules`] again,
//! which also picks up any change made to the entry list in the meantime.
//!
//! Per timer the lifecycle is `Idle → Armed → Fired`. There is no
//! per-timer cancellation and no de-duplication: adding the same slot twice
//! fires twice. Timers that expire at the same instant run in no particular
//! order. Each firing runs on its own task, so a slow or failing callback
//! never delays other timers; failures and panics are logged.

pub mod clock;
pub mod entry;

pub use clock::{Clock, SystemClock, TokioClock};
pub use entry::{callback, PastDuePolicy, ScheduleCallback, ScheduleEntry, SchedulerError};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use chrono::{NaiveDateTime, TimeDelta};
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;

const LOG_FORMAT: &str = "%d-%m-%Y @ %H:%M";

/// State of one armed (or skipped) timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// Not armed: the slot was past due and skipped.
    Idle,
    Armed,
    Fired,
}

/// Observer for a timer created by [`Scheduler::add_schedule`].
#[derive(Debug, Clone)]
pub struct ScheduleHandle {
    description: String,
    fire_at: NaiveDateTime,
    state: watch::Receiver<TimerState>,
}

impl ScheduleHandle {
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn fire_at(&self) -> NaiveDateTime {
        self.fire_at
    }

    pub fn state(&self) -> TimerState {
        *self.state.borrow()
    }

    /// Resolves once the timer has fired. Never resolves for an idle handle
    /// or a timer cancelled by [`Scheduler::shutdown`].
    pub async fn fired(&mut self) {
        if self.state.wait_for(|state| *state == TimerState::Fired).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Self re-arming daily scheduler.
pub struct Scheduler {
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    entries: RwLock<Vec<ScheduleEntry>>,
    next_reset: RwLock<Option<NaiveDateTime>>,
    activations: AtomicUsize,
    cancel: CancellationToken,
}

impl Scheduler {
    /// Scheduler on the local system clock.
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            config,
            entries: RwLock::new(Vec::new()),
            next_reset: RwLock::new(None),
            activations: AtomicUsize::new(0),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Replace the declarative list; takes effect at the next activation.
    pub fn set_schedules(&self, entries: Vec<ScheduleEntry>) {
        *self.entries.write().unwrap_or_else(|e| e.into_inner()) = entries;
    }

    /// Append to the declarative list; takes effect at the next activation.
    pub fn push_schedule(&self, entry: ScheduleEntry) {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).push(entry);
    }

    pub fn schedule_count(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Number of times [`activate_schedules`](Self::activate_schedules) has run.
    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }

    /// When the armed reset timer will next call `activate_schedules`.
    pub fn next_reset(&self) -> Option<NaiveDateTime> {
        *self.next_reset.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Cancel every pending timer, including the daily reset.
    pub fn shutdown(&self) {
        debug!("Cancelling pending schedules");
        self.cancel.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Arm a one-shot timer for today's `hour:minute`.
    ///
    /// A slot is past due only once its minute has fully elapsed, so a slot
    /// registered during its own minute still fires. Past-due slots follow
    /// the configured [`PastDuePolicy`]; a skipped slot returns an
    /// [`TimerState::Idle`] handle.
    pub fn add_schedule(
        &self,
        hour: u32,
        minute: u32,
        description: &str,
        callback: ScheduleCallback,
        args: Vec<Value>,
    ) -> Result<ScheduleHandle, SchedulerError> {
        entry::validate_time(hour, minute)?;

        let now = self.clock.now();
        let fire_at = now
            .date()
            .and_hms_opt(hour, minute, 0)
            .ok_or(SchedulerError::InvalidTime { hour, minute })?;

        let past_due = fire_at + TimeDelta::minutes(1) <= now;
        let (state_tx, state_rx) = watch::channel(TimerState::Idle);
        let handle =
            ScheduleHandle { description: description.to_string(), fire_at, state: state_rx };

        if past_due && self.config.past_due == PastDuePolicy::Skip {
            info!(
                at = %fire_at.format(LOG_FORMAT),
                description = %description,
                "Schedule already passed today, waiting for next activation"
            );
            return Ok(handle);
        }

        let delay = (fire_at - now).to_std().unwrap_or(Duration::ZERO);
        info!(at = %fire_at.format(LOG_FORMAT), description = %description, "Adding schedule");

        state_tx.send_replace(TimerState::Armed);
        let cancel = self.cancel.clone();
        let description = description.to_string();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(description = %description, "Schedule cancelled before firing");
                }
                _ = tokio::time::sleep(delay) => {
                    state_tx.send_replace(TimerState::Fired);
                    run_callback(description, callback, args).await;
                }
            }
        });

        Ok(handle)
    }

    /// [`add_schedule`](Self::add_schedule) for a declarative entry.
    pub fn add_entry(&self, entry: &ScheduleEntry) -> Result<ScheduleHandle, SchedulerError> {
        self.add_schedule(
            entry.hour,
            entry.minute,
            &entry.description,
            entry.callback.clone(),
            entry.args.clone(),
        )
    }

    /// Arm today's timer for every entry, then arm the reset timer for the
    /// next day. An entry that fails to register is logged and skipped.
    pub fn activate_schedules(self: &Arc<Self>) -> Vec<ScheduleHandle> {
        if self.is_shut_down() {
            warn!("Scheduler is shut down, not activating schedules");
            return Vec::new();
        }

        let activation = self.activations.fetch_add(1, Ordering::SeqCst) + 1;
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner()).clone();
        debug!(activation, entries = entries.len(), "Activating schedules");

        let handles = entries
            .iter()
            .filter_map(|entry| match self.add_entry(entry) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    error!(description = %entry.description, error = %e, "Failed to add schedule");
                    None
                }
            })
            .collect();

        self.arm_reset();
        handles
    }

    fn arm_reset(self: &Arc<Self>) {
        let now = self.clock.now();
        let next = now
            .date()
            .succ_opt()
            .and_then(|tomorrow| {
                tomorrow.and_hms_opt(self.config.reset_hour, self.config.reset_minute, 0)
            });
        let Some(next) = next else {
            error!(
                hour = self.config.reset_hour,
                minute = self.config.reset_minute,
                "Cannot compute next schedule reset, daily re-arm disabled"
            );
            return;
        };

        *self.next_reset.write().unwrap_or_else(|e| e.into_inner()) = Some(next);
        info!(at = %next.format(LOG_FORMAT), "Next schedule reset");

        let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
        let scheduler: Weak<Self> = Arc::downgrade(self);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Some(scheduler) = scheduler.upgrade() {
                        scheduler.activate_schedules();
                    }
                }
            }
        });
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_callback(description: String, callback: ScheduleCallback, args: Vec<Value>) {
    debug!(description = %description, "Running schedule");
    match tokio::spawn(callback(args)).await {
        Ok(Ok(())) => debug!(description = %description, "Schedule completed"),
        Ok(Err(e)) => error!(description = %description, error = %e, "Schedule failed"),
        Err(e) => error!(description = %description, error = %e, "Schedule task panicked"),
    }
}
