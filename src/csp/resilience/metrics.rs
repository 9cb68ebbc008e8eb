//! Aggregated provisioning metrics
//!
//! Counts outcomes per provider operation and per environment, including
//! which taxonomy kinds were hit, so operators can see where a rollout is
//! failing without reading logs.

use super::config::MonitoringConfig;
use super::logging::OperationMetrics;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<Collected>>,
    config: MonitoringConfig,
}

#[derive(Debug, Default)]
struct Collected {
    operations: BTreeMap<String, OperationTypeMetrics>,
    environments: BTreeMap<String, EnvironmentMetrics>,
    global: GlobalMetrics,
}

/// Metrics for one provider operation (create_environment, suspend_user, ...)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationTypeMetrics {
    pub operation: String,
    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    pub total_retries: u64,
    pub total_duration: Duration,
    pub max_duration: Duration,
    /// Failures keyed by taxonomy label
    pub errors: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentMetrics {
    pub environment: String,
    pub total_operations: u64,
    pub failed_operations: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalMetrics {
    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    pub total_retries: u64,
    pub total_rate_limit_wait: Duration,
    /// Failure percentage, 0.0..=100.0
    pub error_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub global: GlobalMetrics,
    pub operations: Vec<OperationTypeMetrics>,
    pub environments: Vec<EnvironmentMetrics>,
    pub timestamp: String,
}

impl MetricsCollector {
    pub fn new(config: MonitoringConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Collected::default())),
            config,
        }
    }

    pub fn record_operation(&self, operation: &str, environment: &str, metrics: &OperationMetrics) {
        if !self.config.performance_metrics {
            return;
        }

        let mut inner = self.collected();

        inner
            .operations
            .entry(operation.to_string())
            .or_insert_with(|| OperationTypeMetrics {
                operation: operation.to_string(),
                ..Default::default()
            })
            .record(metrics);

        let env = inner
            .environments
            .entry(environment.to_string())
            .or_insert_with(|| EnvironmentMetrics {
                environment: environment.to_string(),
                ..Default::default()
            });
        env.total_operations += 1;
        if !metrics.success {
            env.failed_operations += 1;
            env.last_error = metrics.error_message.clone();
        }

        inner.global.record(metrics);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.collected();
        MetricsSnapshot {
            global: inner.global.clone(),
            operations: inner.operations.values().cloned().collect(),
            environments: inner.environments.values().cloned().collect(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn operation_metrics(&self, operation: &str) -> Option<OperationTypeMetrics> {
        self.collected().operations.get(operation).cloned()
    }

    pub fn environment_metrics(&self, environment: &str) -> Option<EnvironmentMetrics> {
        self.collected().environments.get(environment).cloned()
    }

    pub fn reset(&self) {
        *self.collected() = Collected::default();
    }

    fn collected(&self) -> MutexGuard<'_, Collected> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl OperationTypeMetrics {
    fn record(&mut self, metrics: &OperationMetrics) {
        self.total_operations += 1;
        self.total_retries += u64::from(metrics.retries());
        self.total_duration += metrics.duration;
        self.max_duration = self.max_duration.max(metrics.duration);

        if metrics.success {
            self.successful_operations += 1;
        } else {
            self.failed_operations += 1;
            let kind = metrics.error_kind.unwrap_or("unknown");
            *self.errors.entry(kind.to_string()).or_insert(0) += 1;
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_operations == 0 {
            return 0.0;
        }
        self.successful_operations as f64 / self.total_operations as f64 * 100.0
    }

    pub fn average_duration(&self) -> Duration {
        if self.total_operations == 0 {
            return Duration::ZERO;
        }
        self.total_duration / self.total_operations as u32
    }
}

impl GlobalMetrics {
    fn record(&mut self, metrics: &OperationMetrics) {
        self.total_operations += 1;
        self.total_retries += u64::from(metrics.retries());
        self.total_rate_limit_wait += metrics.rate_limit_wait;
        if metrics.success {
            self.successful_operations += 1;
        } else {
            self.failed_operations += 1;
        }
        self.error_rate = self.failed_operations as f64 / self.total_operations as f64 * 100.0;
    }
}
