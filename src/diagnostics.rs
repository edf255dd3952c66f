use std::fmt;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// One low-level message reported by the asset-service client.
#[derive(Debug, Clone)]
pub struct DiagnosticRecord {
    pub severity: Severity,
    pub component: String,
    pub message: String,
}

/// Caller-owned buffer for collaborator diagnostics. The service
/// implementations push low-level detail here instead of logging into
/// ambient global state; `main` drains and prints it when a run fails.
/// Clones share the same buffer.
#[derive(Clone, Default)]
pub struct DiagnosticSink {
    records: Arc<Mutex<Vec<DiagnosticRecord>>>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, severity: Severity, component: &str, message: impl Into<String>) {
        let rec = DiagnosticRecord {
            severity,
            component: component.to_string(),
            message: message.into(),
        };
        self.records
            .lock()
            .expect("diagnostic sink lock poisoned")
            .push(rec);
    }

    /// Removes and returns everything recorded so far.
    pub fn drain(&self) -> Vec<DiagnosticRecord> {
        let mut records = self.records.lock().expect("diagnostic sink lock poisoned");
        std::mem::take(&mut *records)
    }

    pub fn is_empty(&self) -> bool {
        self.records
            .lock()
            .expect("diagnostic sink lock poisoned")
            .is_empty()
    }
}
