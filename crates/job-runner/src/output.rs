use std::fmt;

use chrono::{DateTime, Utc};

/// Bytes read from a container's standard streams once it has exited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput(Vec<u8>);

impl CapturedOutput {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.0.extend_from_slice(bytes);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for CapturedOutput {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&str> for CapturedOutput {
    fn from(text: &str) -> Self {
        Self(text.as_bytes().to_vec())
    }
}

impl fmt::Display for CapturedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// Everything the caller learns about a finished run.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub name: String,
    /// Exit code reported by the runtime. Not interpreted unless the
    /// supervisor runs with [`ExitPolicy::FailOnNonZero`](crate::ExitPolicy).
    pub exit_code: i64,
    pub output: CapturedOutput,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JobOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}
