//! Progress reporting contract consumed by external front-ends.
//!
//! Progress is an explicit handle threaded through every import/merge call,
//! scoped to one operation. There is no process-wide progress state.

/// Stage of a long-running import operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStage {
    Detecting,
    Parsing,
    Saving,
    Importing,
    Done,
    Error,
}

impl ImportStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStage::Detecting => "detecting",
            ImportStage::Parsing => "parsing",
            ImportStage::Saving => "saving",
            ImportStage::Importing => "importing",
            ImportStage::Done => "done",
            ImportStage::Error => "error",
        }
    }
}

/// One progress update.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub stage: ImportStage,
    pub bytes_read: u64,
    pub total_bytes: u64,
    pub messages_processed: u64,
    /// 0.0..=100.0, best effort
    pub percentage: f64,
    /// Human-readable status line
    pub message: Option<String>,
}

impl ProgressEvent {
    pub fn stage(stage: ImportStage) -> Self {
        Self {
            stage,
            bytes_read: 0,
            total_bytes: 0,
            messages_processed: 0,
            percentage: 0.0,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Sink for progress updates. Implementations must be cheap; they are called
/// from inside the ingestion hot loop.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

/// Discards all progress updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&self, _event: &ProgressEvent) {}
}

/// Collects progress events in memory, for tests.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    events: std::sync::Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stages(&self) -> Vec<ImportStage> {
        self.events.lock().unwrap().iter().map(|e| e.stage).collect()
    }
}

impl ProgressSink for RecordingProgress {
    fn report(&self, event: &ProgressEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
