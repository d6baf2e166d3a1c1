//! # Application State Management
//!
//! Shared state available to every HTTP request handler and stream
//! connection:
//! - the runtime configuration (readable by many, updatable by one),
//! - request/error/call metrics fed by the middleware and the stream layer,
//! - the process-wide call registry (the only table shared across calls),
//! - the external service adapter set, wired once at startup.
//!
//! ## Arc<RwLock<T>> Pattern:
//! - **Arc**: many handlers hold references to the same state
//! - **RwLock**: many concurrent readers OR one writer at a time
//! - Locks are held only long enough to copy data out; never across awaits

use crate::adapters::ServiceAdapters;
use crate::call::CallRegistry;
use crate::config::AppConfig;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The main application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Performance metrics (constantly updated by requests and calls)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Process-wide table of live call sessions
    pub registry: Arc<CallRegistry>,

    /// External speech/language service backends
    pub adapters: ServiceAdapters,

    /// When the server started (immutable, Instant is Copy)
    pub start_time: Instant,
}

/// Metrics collected across all HTTP requests and call sessions.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of errors encountered since server start
    pub error_count: u64,

    /// Current number of connected call streams
    pub active_calls: u32,

    /// Per-endpoint statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    /// Number of requests to this specific endpoint
    pub request_count: u64,

    /// Total time spent processing all requests to this endpoint (milliseconds)
    pub total_duration_ms: u64,

    /// Number of errors that occurred for this endpoint
    pub error_count: u64,
}

impl AppState {
    /// Create the shared state: wrap the config, wire the adapter set, and
    /// size the registry from the configured call limit.
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let adapters = ServiceAdapters::from_config(&config)?;
        let registry = Arc::new(CallRegistry::new(config.performance.max_concurrent_calls));

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            registry,
            adapters,
            start_time: Instant::now(),
        })
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the read lock immediately so other threads are
    /// never blocked on a handler's work.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Update the configuration with validation.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    /// Increment the total error counter (called when any request fails).
    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Increment the connected-call counter (stream connected).
    pub fn increment_active_calls(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.active_calls += 1;
    }

    /// Decrement the connected-call counter (stream closed).
    ///
    /// Guarded against underflow so an unmatched decrement can't wrap.
    pub fn decrement_active_calls(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_calls > 0 {
            metrics.active_calls -= 1;
        }
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    ///
    /// Clones under a read lock so serialization happens with no lock held.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_calls: metrics.active_calls,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    /// Get server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time for this endpoint in milliseconds.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate for this endpoint (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_counters() {
        let state = AppState::new(AppConfig::default()).unwrap();
        state.increment_request_count();
        state.increment_request_count();
        state.increment_error_count();
        state.increment_active_calls();

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.request_count, 2);
        assert_eq!(snapshot.error_count, 1);
        assert_eq!(snapshot.active_calls, 1);

        state.decrement_active_calls();
        // Extra decrements must not underflow
        state.decrement_active_calls();
        assert_eq!(state.get_metrics_snapshot().active_calls, 0);
    }

    #[test]
    fn test_endpoint_metrics() {
        let state = AppState::new(AppConfig::default()).unwrap();
        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["GET /health"];
        assert_eq!(metric.request_count, 2);
        assert!((metric.average_duration_ms() - 20.0).abs() < f64::EPSILON);
        assert!((metric.error_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_config_update_validation() {
        let state = AppState::new(AppConfig::default()).unwrap();

        let mut bad = state.get_config();
        bad.server.port = 0;
        assert!(state.update_config(bad).is_err());

        let mut good = state.get_config();
        good.server.port = 9000;
        assert!(state.update_config(good).is_ok());
        assert_eq!(state.get_config().server.port, 9000);
    }
}
