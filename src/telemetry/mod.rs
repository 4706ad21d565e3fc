//! Telemetry Module
//!
//! Structured events for request start/success/failure, model loads,
//! feature engineering and calibration. The core only emits; sinks decide
//! where events go.
//!
//! ## Structure
//! - `event.rs` - PredictionEvent (immutable, timestamped)
//! - `sink.rs` - EventSink trait, tracing / JSONL / fan-out sinks

pub mod event;
pub mod sink;

pub use event::{EventType, PredictionEvent};
pub use sink::{EventSink, FanoutSink, JsonlSink, JsonlWriter, TracingSink};

#[cfg(test)]
pub use sink::MemorySink;
