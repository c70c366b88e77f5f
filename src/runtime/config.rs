//! Runtime configuration.
//!
//! Values come from code, from serialized settings, or from the environment:
//!
//! | variable              | field              |
//! |-----------------------|--------------------|
//! | `MULTIPATCH_WORKERS`  | `worker_threads`   |
//! | `MULTIPATCH_POLL_US`  | `poll_interval_us` |
//! | `MULTIPATCH_TRACE`    | `trace_messages`   |

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables shared by every component attached to a runtime context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Size of the worker pool used for parallel patch allocation.
    pub worker_threads: usize,
    /// Upper bound, in microseconds, on one sleep between traffic checks.
    pub poll_interval_us: u64,
    /// Log every message at `trace` level.
    pub trace_messages: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            poll_interval_us: 500,
            trace_messages: false,
        }
    }
}

static ENV_CONFIG: Lazy<RuntimeConfig> = Lazy::new(RuntimeConfig::read_env);

impl RuntimeConfig {
    /// Configuration from the process environment (read once, then cached).
    pub fn from_env() -> Self {
        ENV_CONFIG.clone()
    }

    fn read_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = parse_var::<usize>("MULTIPATCH_WORKERS") {
            cfg.worker_threads = v.max(1);
        }
        if let Some(v) = parse_var::<u64>("MULTIPATCH_POLL_US") {
            cfg.poll_interval_us = v;
        }
        if let Some(v) = parse_var::<bool>("MULTIPATCH_TRACE") {
            cfg.trace_messages = v;
        }
        cfg
    }

    pub fn with_workers(mut self, n: usize) -> Self {
        self.worker_threads = n.max(1);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us.max(1))
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("ignoring {name}={raw:?}: not a valid value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn environment_overrides_and_bad_values() {
        // SAFETY: serialized with every other test touching the environment
        unsafe {
            std::env::set_var("MULTIPATCH_WORKERS", "3");
            std::env::set_var("MULTIPATCH_POLL_US", "not-a-number");
        }
        let cfg = RuntimeConfig::read_env();
        unsafe {
            std::env::remove_var("MULTIPATCH_WORKERS");
            std::env::remove_var("MULTIPATCH_POLL_US");
        }
        assert_eq!(cfg.worker_threads, 3);
        assert_eq!(cfg.poll_interval_us, RuntimeConfig::default().poll_interval_us);
        assert!(!cfg.trace_messages);
    }

    #[test]
    fn partial_settings_fill_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str(r#"{"trace_messages": true}"#).unwrap();
        assert!(cfg.trace_messages);
        assert_eq!(cfg.poll_interval_us, RuntimeConfig::default().poll_interval_us);
        assert!(cfg.worker_threads >= 1);
    }

    #[test]
    fn workers_never_zero() {
        assert_eq!(RuntimeConfig::default().with_workers(0).worker_threads, 1);
    }

    #[test]
    fn poll_interval_is_positive() {
        let cfg = RuntimeConfig {
            poll_interval_us: 0,
            ..RuntimeConfig::default()
        };
        assert!(cfg.poll_interval() > Duration::ZERO);
    }
}
