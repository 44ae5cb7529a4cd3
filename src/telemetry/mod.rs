//! Pluggable telemetry sink
//!
//! The routing core only opens contexts and bumps counters. When telemetry
//! is disabled the null implementations below do nothing and cost nothing.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::Span;

use crate::config::{ConfigError, TelemetrySettings};

/// A unit of traced work
pub trait TelemetryContext: Send + Sync {
    fn set_attribute(&self, key: &str, value: &str);
    fn set_success(&self, success: bool);
    fn set_error(&self, error: &str);
    fn close(&self);
}

pub trait TelemetryCounter: Send + Sync {
    fn name(&self) -> &str;
    fn inc(&self);
}

pub trait TelemetryGauge: Send + Sync {
    fn name(&self) -> &str;
    fn set(&self, value: i64);
}

/// Creates contexts, counters and gauges
pub trait TelemetryFactory: Send + Sync {
    fn open_context(&self, name: &str) -> Box<dyn TelemetryContext>;
    fn create_counter(&self, name: &str) -> Arc<dyn TelemetryCounter>;
    fn create_gauge(&self, name: &str, value: i64) -> Arc<dyn TelemetryGauge>;
}

/// Build the factory selected by configuration
pub fn factory_from_settings(
    settings: &TelemetrySettings,
) -> Result<Arc<dyn TelemetryFactory>, ConfigError> {
    if !settings.enabled {
        return Ok(Arc::new(NullTelemetryFactory));
    }

    match settings.backend.as_str() {
        "none" => Ok(Arc::new(NullTelemetryFactory)),
        "tracing" => Ok(Arc::new(TracingTelemetryFactory)),
        other => Err(ConfigError::ValidationError(format!(
            "Unknown telemetry backend: {}",
            other
        ))),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullTelemetryFactory;

struct NullContext;

impl TelemetryContext for NullContext {
    fn set_attribute(&self, _key: &str, _value: &str) {}
    fn set_success(&self, _success: bool) {}
    fn set_error(&self, _error: &str) {}
    fn close(&self) {}
}

struct NullCounter(String);

impl TelemetryCounter for NullCounter {
    fn name(&self) -> &str {
        &self.0
    }

    fn inc(&self) {}
}

struct NullGauge(String);

impl TelemetryGauge for NullGauge {
    fn name(&self) -> &str {
        &self.0
    }

    fn set(&self, _value: i64) {}
}

impl TelemetryFactory for NullTelemetryFactory {
    fn open_context(&self, _name: &str) -> Box<dyn TelemetryContext> {
        Box::new(NullContext)
    }

    fn create_counter(&self, name: &str) -> Arc<dyn TelemetryCounter> {
        Arc::new(NullCounter(name.to_string()))
    }

    fn create_gauge(&self, name: &str, _value: i64) -> Arc<dyn TelemetryGauge> {
        Arc::new(NullGauge(name.to_string()))
    }
}

/// Records contexts as spans and metric updates as events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetryFactory;

struct SpanContext {
    span: Span,
}

impl TelemetryContext for SpanContext {
    fn set_attribute(&self, key: &str, value: &str) {
        self.span
            .in_scope(|| tracing::trace!(attribute = key, value, "telemetry attribute"));
    }

    fn set_success(&self, success: bool) {
        self.span.record("success", success);
    }

    fn set_error(&self, error: &str) {
        self.span.record("success", false);
        self.span.in_scope(|| tracing::debug!(error, "telemetry context failed"));
    }

    fn close(&self) {
        self.span.in_scope(|| tracing::trace!("telemetry context closed"));
    }
}

struct EventCounter {
    name: String,
    value: AtomicU64,
}

impl TelemetryCounter for EventCounter {
    fn name(&self) -> &str {
        &self.name
    }

    fn inc(&self) {
        let value = self.value.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(counter = %self.name, value, "counter incremented");
    }
}

struct EventGauge {
    name: String,
    value: AtomicI64,
}

impl TelemetryGauge for EventGauge {
    fn name(&self) -> &str {
        &self.name
    }

    fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
        tracing::trace!(gauge = %self.name, value, "gauge updated");
    }
}

impl TelemetryFactory for TracingTelemetryFactory {
    fn open_context(&self, name: &str) -> Box<dyn TelemetryContext> {
        let span = tracing::debug_span!(
            "switchyard",
            context = name,
            success = tracing::field::Empty
        );
        Box::new(SpanContext { span })
    }

    fn create_counter(&self, name: &str) -> Arc<dyn TelemetryCounter> {
        Arc::new(EventCounter {
            name: name.to_string(),
            value: AtomicU64::new(0),
        })
    }

    fn create_gauge(&self, name: &str, value: i64) -> Arc<dyn TelemetryGauge> {
        Arc::new(EventGauge {
            name: name.to_string(),
            value: AtomicI64::new(value),
        })
    }
}
