use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Work performed when a schedule fires. Receives the entry's arguments.
pub type ScheduleCallback =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async function as a [`ScheduleCallback`].
pub fn callback<F, Fut>(f: F) -> ScheduleCallback
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |args: Vec<Value>| -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(f(args))
    })
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Invalid time of day {hour:02}:{minute:02}")]
    InvalidTime { hour: u32, minute: u32 },
}

/// What to do with a slot whose minute has already gone by today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PastDuePolicy {
    /// Wait for the next daily activation.
    #[default]
    Skip,
    /// Run the callback right away.
    FireImmediately,
}

impl FromStr for PastDuePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "skip" => Ok(PastDuePolicy::Skip),
            "fire" | "fire_immediately" | "immediate" => Ok(PastDuePolicy::FireImmediately),
            other => {
                Err(format!("Unknown past-due policy '{}' (expected 'skip' or 'fire')", other))
            }
        }
    }
}

/// One daily job: run `callback(args)` at `hour:minute` local time.
#[derive(Clone)]
pub struct ScheduleEntry {
    pub hour: u32,
    pub minute: u32,
    pub description: String,
    pub callback: ScheduleCallback,
    pub args: Vec<Value>,
}

impl ScheduleEntry {
    pub fn new(
        hour: u32,
        minute: u32,
        description: impl Into<String>,
        callback: ScheduleCallback,
    ) -> Self {
        Self { hour, minute, description: description.into(), callback, args: Vec::new() }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }
}

impl fmt::Debug for ScheduleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleEntry")
            .field("hour", &self.hour)
            .field("minute", &self.minute)
            .field("description", &self.description)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

pub(crate) fn validate_time(hour: u32, minute: u32) -> Result<(), SchedulerError> {
    if hour < 24 && minute < 60 {
        Ok(())
    } else {
        Err(SchedulerError::InvalidTime { hour, minute })
    }
}
