/*!
 * Tracing
 * Structured logging setup and timed spans for lifecycle operations
 *
 * Features:
 * - Trace IDs for correlating an operation's log lines
 * - JSON-formatted logs for structured parsing
 * - Slow-operation warnings
 */

use crate::core::limits::SLOW_OPERATION_THRESHOLD;
use std::time::Instant;
use tracing::{debug, info, span, warn, Level};
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};
use uuid::Uuid;

/// Environment variable enabling JSON output
pub const TRACE_JSON_ENV: &str = "LIFECYCLE_TRACE_JSON";

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - LIFECYCLE_TRACE_JSON: Enable JSON output (default: false)
///
/// Calling this more than once is harmless; later calls leave the first
/// subscriber in place.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var(TRACE_JSON_ENV)
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
            .is_ok()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_line_number(true)
                    .compact(),
            )
            .try_init()
            .is_ok()
    };

    if installed {
        info!(json = use_json, "Structured tracing initialized");
    }
}

/// Generate a unique trace ID for correlating an operation's log lines
pub fn generate_trace_id() -> String {
    Uuid::new_v4().to_string()
}

/// Timed span around a named lifecycle operation
pub struct OperationSpan {
    span: tracing::Span,
    start: Instant,
    operation: String,
    trace_id: String,
}

impl OperationSpan {
    pub fn new(operation: &str) -> Self {
        let trace_id = generate_trace_id();

        let span = span!(
            Level::DEBUG,
            "operation",
            trace_id = %trace_id,
            operation = operation,
            duration_us = tracing::field::Empty,
            result = tracing::field::Empty,
            error = tracing::field::Empty,
        );

        span.in_scope(|| debug!(operation, trace_id = %trace_id, "operation started"));

        Self {
            span,
            start: Instant::now(),
            operation: operation.to_string(),
            trace_id,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn record_result(&self, success: bool) {
        self.span
            .record("result", if success { "success" } else { "error" });
    }

    pub fn record_error(&self, error: &str) {
        self.span.record("error", error);
        self.span.record("result", "error");
    }

    /// Record the outcome of a fallible operation and pass it through
    pub fn finish<T, E: std::fmt::Display>(&self, result: Result<T, E>) -> Result<T, E> {
        match &result {
            Ok(_) => self.record_result(true),
            Err(e) => self.record_error(&e.to_string()),
        }
        result
    }
}

impl Drop for OperationSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        self.span.record("duration_us", duration.as_micros() as u64);
        let _entered = self.span.enter();

        if duration > SLOW_OPERATION_THRESHOLD {
            warn!(
                trace_id = %self.trace_id,
                operation = %self.operation,
                duration_ms = duration.as_millis() as u64,
                slow = true,
                "slow operation detected"
            );
        } else {
            debug!(
                trace_id = %self.trace_id,
                operation = %self.operation,
                duration_us = duration.as_micros() as u64,
                "operation completed"
            );
        }
    }
}

/// Helper to create an operation span
#[inline]
pub fn span_operation(name: &str) -> OperationSpan {
    OperationSpan::new(name)
}
