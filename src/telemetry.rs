use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Install the global `tracing` subscriber. `RUST_LOG` takes precedence over the
/// configured level. Calling this twice is harmless; the second call is ignored.
pub fn init_tracing(cfg: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match cfg.format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub kind: String,
    pub timestamp: SystemTime,
    pub detail: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub context: String,
    pub error: String,
    pub attempt: u64,
}

/// Records kept per kind when no capacity is configured.
pub const DEFAULT_CAPACITY: usize = 256;

/// In-process ledger of notable events and failures, drained by callers that
/// want to inspect what a supervised loop went through. Each list keeps at most
/// `capacity` entries; the oldest are evicted first.
#[derive(Clone)]
pub struct TelemetryCollector {
    events: Arc<Mutex<VecDeque<TelemetryEvent>>>,
    failures: Arc<Mutex<VecDeque<FailureRecord>>>,
    capacity: usize,
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

fn push_bounded<T>(list: &Mutex<VecDeque<T>>, item: T, capacity: usize) {
    if let Ok(mut list) = list.lock() {
        while list.len() >= capacity {
            list.pop_front();
        }
        list.push_back(item);
    }
}

fn take_all<T>(list: &Mutex<VecDeque<T>>) -> Vec<T> {
    list.lock()
        .map(|mut guard| guard.drain(..).collect())
        .unwrap_or_default()
}

impl TelemetryCollector {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::default(),
            failures: Arc::default(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record(&self, kind: impl Into<String>, detail: serde_json::Value) {
        let event = TelemetryEvent {
            kind: kind.into(),
            timestamp: SystemTime::now(),
            detail,
        };
        push_bounded(&self.events, event, self.capacity);
    }

    pub fn record_failure(
        &self,
        context: impl Into<String>,
        error: impl Into<String>,
        attempt: u64,
    ) {
        let record = FailureRecord {
            context: context.into(),
            error: error.into(),
            attempt,
        };
        push_bounded(&self.failures, record, self.capacity);
    }

    pub fn drain(&self) -> (Vec<TelemetryEvent>, Vec<FailureRecord>) {
        (take_all(&self.events), take_all(&self.failures))
    }
}
