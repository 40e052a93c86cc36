//! Uniform result shape shared by every backend.
//!
//! Whatever the backend, a request ends in exactly one [`ResponseEnvelope`]:
//! either the located [`OutputArtifact`] or a [`Failure`] tagged with one of
//! four [`FailureKind`]s. The wire encoding lives in [`crate::wire`].

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::invoker::InvocationResult;

/// Error taxonomy. Every kind is terminal for the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Missing or malformed field, or a referenced file is absent.
    #[serde(rename = "validation_error")]
    Validation,
    /// A remote backend service could not be reached.
    #[serde(rename = "backend_unavailable")]
    BackendUnavailable,
    /// The external process exited non-zero, timed out, or could not start.
    #[serde(rename = "invocation_error")]
    Invocation,
    /// The process reported success but produced nothing we recognise.
    #[serde(rename = "resolution_error")]
    Resolution,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Validation => "validation_error",
            FailureKind::BackendUnavailable => "backend_unavailable",
            FailureKind::Invocation => "invocation_error",
            FailureKind::Resolution => "resolution_error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Debugging context attached to a failure. Empty fields are omitted on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempted_patterns: Vec<String>,
}

impl Diagnostics {
    /// Diagnostics carrying the full captured output of an invocation.
    ///
    /// `stderr` is never empty: a process that failed silently still gets a
    /// line naming its exit status.
    pub fn from_invocation(result: &InvocationResult) -> Self {
        let stderr = if result.stderr.trim().is_empty() {
            if result.timed_out {
                format!("<no stderr output; killed after {}ms>", result.duration_ms)
            } else {
                format!("<no stderr output; exit code {}>", result.exit_code)
            }
        } else {
            result.stderr.clone()
        };
        Self {
            exit_code: Some(result.exit_code),
            stdout: Some(result.stdout.clone()),
            stderr: Some(stderr),
            duration_ms: Some(result.duration_ms),
            timed_out: result.timed_out,
            ..Self::default()
        }
    }
}

/// A terminal failure for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default)]
    pub diagnostics: Diagnostics,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        let mut failure = Self::new(FailureKind::Validation, message);
        failure.diagnostics.field = Some(field.to_string());
        failure
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(FailureKind::BackendUnavailable, message)
    }

    pub fn invocation(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Invocation, message)
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }
}

/// Files produced by a successful run. All paths are absolute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputArtifact {
    pub main_result: PathBuf,
    #[serde(default)]
    pub related_files: Vec<PathBuf>,
    /// Only face-restoration backends produce crops.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cropped_faces: Option<Vec<PathBuf>>,
}

/// Outcome of a single request.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEnvelope {
    Success { artifact: OutputArtifact },
    Failure(Failure),
}

impl ResponseEnvelope {
    pub fn is_success(&self) -> bool {
        matches!(self, ResponseEnvelope::Success { .. })
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            ResponseEnvelope::Failure(failure) => Some(failure),
            ResponseEnvelope::Success { .. } => None,
        }
    }

    pub fn artifact(&self) -> Option<&OutputArtifact> {
        match self {
            ResponseEnvelope::Success { artifact } => Some(artifact),
            ResponseEnvelope::Failure(_) => None,
        }
    }
}

impl From<Failure> for ResponseEnvelope {
    fn from(failure: Failure) -> Self {
        ResponseEnvelope::Failure(failure)
    }
}
