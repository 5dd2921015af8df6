//! Telemetry sink contract.
//!
//! The engine core only declares the sink interface; transports (HTTP,
//! files, editor channels) live outside this crate. The default sink
//! forwards events to `tracing`.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// One telemetry event.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    /// Event kind: `analysisStart`, `ruleMatch`, `analysisComplete`.
    pub event_type: String,
    pub execution_id: String,
    pub archetype: String,
    pub repo_path: String,
    /// Event-specific payload.
    pub data: Value,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

/// Receiver for engine telemetry.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: TelemetryEvent);
}

/// Default sink: events become structured debug logs.
#[derive(Debug, Default)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn record(&self, event: TelemetryEvent) {
        debug!(
            event_type = %event.event_type,
            execution_id = %event.execution_id,
            archetype = %event.archetype,
            "telemetry: {}",
            serde_json::to_string(&event.data).unwrap_or_default()
        );
    }
}
