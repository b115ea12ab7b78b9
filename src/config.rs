//! Tunables for a datastore instance
//!
//! Defaults match the stock firmware build. [`DatastoreConfig::from_env`]
//! lets a deployment override them without recompiling.

use std::{env, time::Duration};

use tracing::warn;

use crate::value::FAMILY_COUNT;

/// Default subscription slots per family
pub const DEFAULT_MAX_SUBSCRIPTIONS: usize = 8;
/// Default wait for a payload block
pub const DEFAULT_ALLOC_TIMEOUT: Duration = Duration::from_millis(4);
/// Default number of payload blocks
pub const DEFAULT_BUFFER_COUNT: usize = 10;
/// Default wait for a service reply
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(5);
/// Default depth of the service request queue
pub const DEFAULT_QUEUE_DEPTH: usize = 10;

/// Which ids of a write trigger deliveries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChangeDetection {
    /// If any value in the write changed, every written id notifies
    #[default]
    WriteWide,
    /// Only ids whose own value changed notify
    PerDatapoint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatastoreConfig {
    /// Registry capacity, indexed by [`crate::Family::index`]
    pub max_subscriptions: [usize; FAMILY_COUNT],
    pub alloc_timeout: Duration,
    pub buffer_count: usize,
    pub change_detection: ChangeDetection,
    pub response_timeout: Duration,
    pub queue_depth: usize,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        DatastoreConfig {
            max_subscriptions: [DEFAULT_MAX_SUBSCRIPTIONS; FAMILY_COUNT],
            alloc_timeout: DEFAULT_ALLOC_TIMEOUT,
            buffer_count: DEFAULT_BUFFER_COUNT,
            change_detection: ChangeDetection::default(),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

impl DatastoreConfig {
    /// Defaults, overridden from `DATASTORE_*` environment variables
    pub fn from_env() -> Self {
        let mut config = DatastoreConfig::default();
        if let Ok(value) = env::var("DATASTORE_MAX_SUBS") {
            match parse_max_subscriptions(&value) {
                Some(max) => config.max_subscriptions = max,
                None => warn!("Ignoring unparseable DATASTORE_MAX_SUBS={value:?}"),
            }
        }
        if let Some(ms) = env_number("DATASTORE_ALLOC_TIMEOUT_MS") {
            config.alloc_timeout = Duration::from_millis(ms);
        }
        if let Some(count) = env_number("DATASTORE_BUFFER_COUNT") {
            config.buffer_count = (count as usize).max(1);
        }
        if let Some(ms) = env_number("DATASTORE_RESPONSE_TIMEOUT_MS") {
            config.response_timeout = Duration::from_millis(ms);
        }
        if let Some(depth) = env_number("DATASTORE_QUEUE_DEPTH") {
            config.queue_depth = (depth as usize).max(1);
        }
        config
    }

    pub fn with_max_subscriptions(mut self, max: usize) -> Self {
        self.max_subscriptions = [max; FAMILY_COUNT];
        self
    }

    pub fn with_change_detection(mut self, change_detection: ChangeDetection) -> Self {
        self.change_detection = change_detection;
        self
    }
}

fn env_number(name: &str) -> Option<u64> {
    let value = env::var(name).ok()?;
    let parsed = value.trim().parse::<u64>().ok();
    if parsed.is_none() {
        warn!("Ignoring unparseable {name}={value:?}");
    }
    parsed
}

/// Either one count for every family, or six comma-separated counts in
/// family order
fn parse_max_subscriptions(value: &str) -> Option<[usize; FAMILY_COUNT]> {
    let counts = value
        .split(',')
        .map(|part| part.trim().parse::<usize>().ok())
        .collect::<Option<Vec<_>>>()?;
    match counts.as_slice() {
        [single] => Some([*single; FAMILY_COUNT]),
        many => many.try_into().ok(),
    }
}
