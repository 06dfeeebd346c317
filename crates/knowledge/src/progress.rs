//! Structured progress reporting for ingestion.
//!
//! Long batches (OCR, embedding) report incremental progress through an
//! optional callback; every event is also logged at debug level.

use std::sync::Arc;
use std::time::Instant;

/// Progress event emitted during knowledge operations.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// "extract", "ocr", "chunk", "embed", "index" or "persist"
    pub phase: &'static str,

    /// Work done so far (files, chunks...)
    pub current: u64,

    pub total: Option<u64>,

    pub message: String,

    /// Seconds since the reporter was created
    pub elapsed_secs: f64,
}

impl ProgressEvent {
    /// Percentage complete, when the total is known.
    pub fn percentage(&self) -> Option<f64> {
        self.total.map(|t| {
            if t > 0 {
                (self.current as f64 / t as f64) * 100.0
            } else {
                100.0
            }
        })
    }

    /// Format as a simple user-facing line.
    pub fn format_simple(&self) -> String {
        let progress = match self.total {
            Some(total) => format!("{}/{}", self.current, total),
            None => self.current.to_string(),
        };
        let pct = self
            .percentage()
            .map(|p| format!(" ({:.0}%)", p))
            .unwrap_or_default();

        format!("[{}] {}{} - {}", self.phase, progress, pct, self.message)
    }
}

/// Callback for progress events.
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Emits events through an optional callback.
#[derive(Clone)]
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    start_time: Instant,
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("enabled", &self.callback.is_some())
            .finish()
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::noop()
    }
}

impl ProgressReporter {
    pub fn new(callback: ProgressCallback) -> Self {
        Self {
            callback: Some(callback),
            start_time: Instant::now(),
        }
    }

    /// A reporter that only logs.
    pub fn noop() -> Self {
        Self {
            callback: None,
            start_time: Instant::now(),
        }
    }

    fn emit(&self, phase: &'static str, current: u64, total: Option<u64>, message: String) {
        let event = ProgressEvent {
            phase,
            current,
            total,
            message,
            elapsed_secs: self.start_time.elapsed().as_secs_f64(),
        };

        tracing::debug!(
            phase = event.phase,
            current = event.current,
            total = ?event.total,
            elapsed_secs = event.elapsed_secs,
            "{}",
            event.message
        );

        if let Some(callback) = &self.callback {
            callback(event);
        }
    }

    pub fn extract(&self, current: u64, total: u64, file: &str) {
        self.emit("extract", current, Some(total), format!("read {}", file));
    }

    pub fn ocr(&self, file: &str, found: usize, recognized: usize) {
        self.emit(
            "ocr",
            recognized as u64,
            Some(found as u64),
            format!("{}: {} of {} image(s) recognized", file, recognized, found),
        );
    }

    pub fn chunk(&self, documents: u64, chunks: usize, chunk_size: Option<usize>) {
        let message = match chunk_size {
            Some(size) => format!("{} chunks created (size {})", chunks, size),
            None => format!("{} chunks created (sized per document)", chunks),
        };
        self.emit("chunk", documents, Some(documents), message);
    }

    pub fn embed(&self, current: u64, total: u64, model: &str) {
        self.emit("embed", current, Some(total), format!("model={}", model));
    }

    pub fn index(&self, rows: u64) {
        self.emit("index", rows, None, "index updated".to_string());
    }

    pub fn persist(&self, generation: u64) {
        self.emit("persist", generation, None, format!("snapshot gen-{} written", generation));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_progress_event_format() {
        let event = ProgressEvent {
            phase: "embed",
            current: 5,
            total: Some(10),
            message: "model=trigram-v1".to_string(),
            elapsed_secs: 0.0,
        };
        let formatted = event.format_simple();
        assert_eq!(formatted, "[embed] 5/10 (50%) - model=trigram-v1");
    }

    #[test]
    fn test_reporter_invokes_callback() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();

        let reporter = ProgressReporter::new(Arc::new(move |event| {
            sink.lock().unwrap().push(event);
        }));

        reporter.extract(1, 3, "a.pdf");
        reporter.ocr("a.pdf", 2, 1);

        let captured = events.lock().unwrap();
        assert_eq!(captured.len(), 2);
        assert_eq!(captured[0].phase, "extract");
        assert_eq!(captured[1].phase, "ocr");
        assert_eq!(captured[1].percentage(), Some(50.0));
    }

    #[test]
    fn test_noop_reporter() {
        let reporter = ProgressReporter::noop();
        reporter.persist(3);
    }
}
