//! Human-readable diagnostics of the tracker.
//!
//! Output never goes to a process-global stream: callers pass a sink.

use parking_lot::Mutex;

/// Receives one formatted diagnostic line at a time.
pub trait DiagnosticSink {
    fn emit(&self, line: &str);
}

/// Forwards every line to `log::info!`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn emit(&self, line: &str) {
        log::info!("{line}");
    }
}

/// Keeps every line in memory.
#[derive(Debug, Default)]
pub struct BufferSink {
    lines: Mutex<Vec<String>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn contents(&self) -> String {
        self.lines.lock().join("\n")
    }
}

impl DiagnosticSink for BufferSink {
    fn emit(&self, line: &str) {
        self.lines.lock().push(line.to_owned());
    }
}

impl<S: DiagnosticSink + ?Sized> DiagnosticSink for &S {
    fn emit(&self, line: &str) {
        (**self).emit(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_keeps_order() {
        let sink = BufferSink::new();
        sink.emit("a");
        (&sink).emit("b");
        assert_eq!(sink.lines(), vec!["a", "b"]);
        assert_eq!(sink.contents(), "a\nb");
    }
}
