//! Structured provisioning logs with correlation tracking
//!
//! Every provider call gets an [`OperationContext`]; events are emitted as
//! single-line JSON through the `log` facade so they can be shipped as-is.

use super::config::{LogLevel, MonitoringConfig};
use crate::csp::error::CspError;
use crate::csp::models::AuthCredentials;
use log::{debug, error, info, warn};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ProvisioningLogger {
    config: MonitoringConfig,
}

/// Context for a single provider operation
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub correlation_id: String,
    /// Provider operation, e.g. `create_environment`
    pub operation: String,
    /// Portal environment id the operation belongs to
    pub environment: String,
    pub metadata: BTreeMap<String, Value>,
    pub start_time: Instant,
}

/// Outcome of one provider operation
#[derive(Debug, Clone)]
pub struct OperationMetrics {
    pub duration: Duration,
    pub attempts: u32,
    pub success: bool,
    /// Taxonomy label of the final error
    pub error_kind: Option<&'static str>,
    pub error_message: Option<String>,
    pub rate_limit_wait: Duration,
}

impl ProvisioningLogger {
    pub fn new(config: MonitoringConfig) -> Self {
        Self { config }
    }

    pub fn start_operation(&self, operation: &str, environment: &str) -> OperationContext {
        let correlation_id = if self.config.correlation_ids {
            uuid::Uuid::new_v4().to_string()
        } else {
            String::new()
        };

        let context = OperationContext {
            correlation_id,
            operation: operation.to_string(),
            environment: environment.to_string(),
            metadata: BTreeMap::new(),
            start_time: Instant::now(),
        };

        if self.config.request_logging && self.should_log(LogLevel::Debug) {
            debug!("Provisioning Operation Started: {}", self.event("operation_started", &context, json!({})));
        }

        context
    }

    pub fn log_retry(&self, context: &OperationContext, attempt: u32, error: &CspError) {
        if !self.should_log(LogLevel::Warn) {
            return;
        }

        let log_data = self.event(
            "retry_attempt",
            context,
            json!({
                "attempt": attempt,
                "error_kind": error.label(),
                "error": error.message(),
            }),
        );
        warn!("Retry Attempt: {}", log_data);
    }

    /// Log the credential set a call runs with, values redacted
    pub fn log_credentials(&self, context: &OperationContext, credentials: &AuthCredentials) {
        if !self.config.request_logging || !self.should_log(LogLevel::Debug) {
            return;
        }

        let keys: BTreeMap<&str, &str> = credentials.keys().map(|key| (key, "[REDACTED]")).collect();
        debug!(
            "Provisioning Credentials: {}",
            self.event("credentials", context, json!({ "credentials": keys }))
        );
    }

    pub fn complete_operation(&self, context: &OperationContext, metrics: &OperationMetrics) {
        let level = if metrics.success { LogLevel::Info } else { LogLevel::Error };
        if !self.config.performance_metrics || !self.should_log(level) {
            return;
        }

        let log_data = self.event(
            if metrics.success { "operation_completed" } else { "operation_failed" },
            context,
            json!({
                "duration_ms": metrics.duration.as_millis(),
                "attempts": metrics.attempts,
                "success": metrics.success,
                "error_kind": metrics.error_kind,
                "error": metrics.error_message,
                "rate_limit_wait_ms": metrics.rate_limit_wait.as_millis(),
            }),
        );

        if metrics.success {
            info!("Provisioning Operation Completed: {}", log_data);
        } else {
            error!("Provisioning Operation Failed: {}", log_data);
        }
    }

    pub fn log_performance_warning(&self, context: &OperationContext, threshold: Duration) {
        let elapsed = context.elapsed();
        if elapsed <= threshold || !self.config.performance_metrics || !self.should_log(LogLevel::Warn) {
            return;
        }

        let log_data = self.event(
            "performance_warning",
            context,
            json!({ "duration_ms": elapsed.as_millis(), "threshold_ms": threshold.as_millis() }),
        );
        warn!("Slow Provisioning Operation: {}", log_data);
    }

    fn event(&self, event: &str, context: &OperationContext, extra: Value) -> Value {
        let mut data = json!({
            "event": event,
            "operation": context.operation,
            "environment": context.environment,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        if self.config.correlation_ids {
            data["correlation_id"] = Value::from(context.correlation_id.clone());
        }
        if !context.metadata.is_empty() {
            data["metadata"] = json!(sanitize(&context.metadata));
        }
        if let (Value::Object(target), Value::Object(source)) = (&mut data, extra) {
            target.extend(source);
        }
        data
    }

    fn should_log(&self, level: LogLevel) -> bool {
        level <= self.config.log_level
    }
}

impl OperationContext {
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Close the context with the final outcome of the call
    pub fn finish(&self, attempts: u32, error: Option<&CspError>, rate_limit_wait: Duration) -> OperationMetrics {
        OperationMetrics {
            duration: self.elapsed(),
            attempts,
            success: error.is_none(),
            error_kind: error.map(|e| e.label()),
            error_message: error.map(|e| e.message()),
            rate_limit_wait,
        }
    }
}

impl OperationMetrics {
    /// Attempts beyond the first
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Mask values whose key looks like a secret
fn sanitize(metadata: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    metadata
        .iter()
        .map(|(key, value)| {
            let lower = key.to_lowercase();
            let secret = ["secret", "token", "password", "pass", "key", "credential"]
                .iter()
                .any(|marker| lower.contains(marker));
            let value = if secret { Value::from("[REDACTED]") } else { value.clone() };
            (key.clone(), value)
        })
        .collect()
}
