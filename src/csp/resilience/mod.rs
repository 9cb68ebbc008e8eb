//! Retry policies, call timeouts, rate limiting and monitoring for
//! provider calls.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod rate_limiter;
pub mod retry;

pub use config::{LogLevel, MonitoringConfig, RateLimitConfig, ResilienceConfig, ResilienceConfigBuilder};
pub use logging::{OperationContext, OperationMetrics, ProvisioningLogger};
pub use metrics::{EnvironmentMetrics, GlobalMetrics, MetricsCollector, MetricsSnapshot, OperationTypeMetrics};
pub use rate_limiter::{RateLimiter, RateLimiterStats};
pub use retry::{Retried, RetryConfig, RetryPolicy};
