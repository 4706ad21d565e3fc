//! Event sinks
//!
//! `emit` is synchronous and must never block or fail the caller.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;

use super::event::PredictionEvent;

/// Maximum file size before rotation (50 MB)
const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

const LOG_EXT: &str = ".jsonl";

/// Fire-and-forget receiver of serving events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PredictionEvent);
}

// ============================================================================
// TRACING
// ============================================================================

/// Forwards events to the `telemetry` tracing target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: PredictionEvent) {
        tracing::info!(
            target: "telemetry",
            event_type = event.event_type.as_str(),
            request_id = %event.request_id,
            details = %event.details,
        );
    }
}

// ============================================================================
// FANOUT
// ============================================================================

/// Delivers each event to every inner sink
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: PredictionEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

// ============================================================================
// JSONL
// ============================================================================

/// Append-only JSONL writer with size-based rotation
pub struct JsonlWriter {
    writer: BufWriter<File>,
    current_file: PathBuf,
    current_size: u64,
    base_dir: PathBuf,
}

impl JsonlWriter {
    pub fn new(base_dir: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&base_dir)?;
        let (current_file, file) = Self::open_new_file(&base_dir)?;

        Ok(Self {
            writer: BufWriter::new(file),
            current_file,
            current_size: 0,
            base_dir,
        })
    }

    fn open_new_file(base_dir: &Path) -> std::io::Result<(PathBuf, File)> {
        let filename = format!(
            "predictions_{}_{}{}",
            Utc::now().format("%Y_%m_%d_%H%M%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..8],
            LOG_EXT
        );
        let file_path = base_dir.join(filename);
        let file = OpenOptions::new().create(true).append(true).open(&file_path)?;

        tracing::info!(path = %file_path.display(), "Opened telemetry log");
        Ok((file_path, file))
    }

    pub fn write(&mut self, event: &PredictionEvent) -> std::io::Result<()> {
        let line = event.to_jsonl();
        let bytes = line.as_bytes();

        if self.current_size + bytes.len() as u64 > MAX_FILE_SIZE {
            self.rotate()?;
        }

        self.writer.write_all(bytes)?;
        self.writer.write_all(b"\n")?;
        self.current_size += bytes.len() as u64 + 1;
        self.writer.flush()
    }

    fn rotate(&mut self) -> std::io::Result<()> {
        self.writer.flush()?;
        let (new_path, new_file) = Self::open_new_file(&self.base_dir)?;
        self.writer = BufWriter::new(new_file);

        tracing::info!(from = %self.current_file.display(), to = %new_path.display(), "Rotated telemetry log");
        self.current_file = new_path;
        self.current_size = 0;
        Ok(())
    }

    pub fn current_file(&self) -> &Path {
        &self.current_file
    }
}

/// Hands events to a background task that owns a [`JsonlWriter`]
#[derive(Clone)]
pub struct JsonlSink {
    tx: mpsc::UnboundedSender<PredictionEvent>,
}

impl JsonlSink {
    /// Spawn the writer task; must be called inside a Tokio runtime
    pub fn spawn(base_dir: PathBuf) -> std::io::Result<Self> {
        let mut writer = JsonlWriter::new(base_dir)?;
        let (tx, mut rx) = mpsc::unbounded_channel::<PredictionEvent>();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = writer.write(&event) {
                    tracing::error!(error = %e, "Failed to record telemetry event");
                }
            }
        });

        Ok(Self { tx })
    }
}

impl EventSink for JsonlSink {
    fn emit(&self, event: PredictionEvent) {
        if self.tx.send(event).is_err() {
            tracing::warn!("Telemetry writer stopped, event dropped");
        }
    }
}

// ============================================================================
// TEST DOUBLE
// ============================================================================

/// Collects events in memory
#[cfg(test)]
#[derive(Default)]
pub struct MemorySink {
    events: parking_lot::Mutex<Vec<PredictionEvent>>,
}

#[cfg(test)]
impl MemorySink {
    pub fn events(&self) -> Vec<PredictionEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, event_type: super::EventType) -> usize {
        self.events.lock().iter().filter(|e| e.event_type == event_type).count()
    }
}

#[cfg(test)]
impl EventSink for MemorySink {
    fn emit(&self, event: PredictionEvent) {
        self.events.lock().push(event);
    }
}
