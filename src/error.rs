//! Error types for script loading.
//!
//! Only loading can fail. Conversation turns never return an error: the
//! dialogue engine answers with a sentinel string instead (see the `ERR_*`
//! constants in the crate root).

use std::path::PathBuf;

use thiserror::Error;

/// A problem found while parsing script text.
///
/// Every variant carries the source label (file path or `(streamed)`) and the
/// 1-based line number. All of them are non-fatal except
/// [`ParseError::UnsupportedVersion`], which aborts the whole document.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("{source_label}:{line}: cannot parse script version {version} (supported up to {supported})")]
    UnsupportedVersion { source_label: String, line: usize, version: f64, supported: f64 },

    #[error("{source_label}:{line}: script version {value:?} is not a number")]
    InvalidVersion { source_label: String, line: usize, value: String },

    #[error("{source_label}:{line}: missing a {kind} variable name")]
    MissingName { source_label: String, line: usize, kind: String },

    #[error("{source_label}:{line}: missing a {kind} value")]
    MissingValue { source_label: String, line: usize, kind: String },

    #[error("{source_label}:{line}: unknown definition type {kind:?}")]
    UnknownDefinition { source_label: String, line: usize, kind: String },

    #[error("{source_label}:{line}: {directive} found before any trigger")]
    OutsideTrigger { source_label: String, line: usize, directive: &'static str },

    #[error("{source_label}:{line}: unknown label type {label:?}")]
    UnknownLabel { source_label: String, line: usize, label: String },

    #[error("{source_label}:{line}: unknown end label type {label:?}")]
    UnknownEndLabel { source_label: String, line: usize, label: String },

    #[error("{source_label}:{line}: unrecognized command {command:?}")]
    UnknownCommand { source_label: String, line: usize, command: char },

    #[error("{source_label}:{line}: object {name:?} is never closed")]
    UnterminatedObject { source_label: String, line: usize, name: String },
}

impl ParseError {
    /// Whether this error aborts the document it was found in.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ParseError::UnsupportedVersion { .. })
    }
}

/// Failure to load scripts or to rebuild the trigger ordering.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("topic {topic:?} reaches itself through includes/inherits: {}", path.join(" -> "))]
    InheritanceCycle { topic: String, path: Vec<String> },
}

pub type Result<T, E = LoadError> = std::result::Result<T, E>;
