//! In-memory capture of recent log output.
//!
//! The worker serves `GET /logs` from inside its container, where there is
//! no log file to read. A [`BufferLayer`] hooked into the tracing
//! subscriber keeps the most recent formatted lines in a capped ring.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Shared ring of formatted log lines.
#[derive(Clone)]
pub struct LogBuffer {
    lines: Arc<Mutex<VecDeque<String>>>,
    max_lines: usize,
}

impl LogBuffer {
    pub fn new(max_lines: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(max_lines.min(256)))),
            max_lines,
        }
    }

    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap();
        if lines.len() == self.max_lines {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// All buffered lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().unwrap().is_empty()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(2000)
    }
}

/// Tracing layer that mirrors every event into a [`LogBuffer`].
pub struct BufferLayer {
    buffer: LogBuffer,
}

impl BufferLayer {
    pub fn new(buffer: LogBuffer) -> Self {
        Self { buffer }
    }
}

impl<S: Subscriber> Layer<S> for BufferLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);

        let meta = event.metadata();
        let line = format!(
            "{} {:>5} {}: {}",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S"),
            meta.level(),
            meta.target(),
            visitor.line,
        );
        self.buffer.push(line);
    }
}

#[derive(Default)]
struct LineVisitor {
    line: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.prepend_message(value);
        } else {
            let _ = write!(self.line, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.prepend_message(&format!("{:?}", value));
        } else {
            let _ = write!(self.line, " {}={:?}", field.name(), value);
        }
    }
}

impl LineVisitor {
    fn prepend_message(&mut self, message: &str) {
        if self.line.is_empty() {
            self.line.push_str(message);
        } else {
            self.line = format!("{}{}", message, self.line);
        }
    }
}
