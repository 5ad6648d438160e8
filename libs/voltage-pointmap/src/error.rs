//! Error types for voltage-pointmap

use thiserror::Error;

use crate::catalog::RegisterKind;
use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum PointMapError {
    #[error("Point not found: {0}")]
    PointNotFound(String),

    #[error("Unsupported shape for {field}: {reason}")]
    UnsupportedShape { field: String, reason: String },

    #[error("Short data for {context}: expected {expected} bytes, got {actual}")]
    ShortData {
        context: String,
        expected: usize,
        actual: usize,
    },

    #[error("Length mismatch for {context}: expected {expected} bytes, got {actual}")]
    LengthMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    #[error("Configuration conflict on {key}: {reason}")]
    ConfigConflict { key: String, reason: String },

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Transport failure during {context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: TransportError,
    },

    #[error("Point {point} is not writable ({kind})")]
    ReadOnly { point: String, kind: RegisterKind },

    #[error("Invalid point {point}: {reason}")]
    InvalidPoint { point: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PointMapError>;

impl PointMapError {
    pub fn short_data(expected: usize, actual: usize) -> Self {
        Self::ShortData {
            context: String::new(),
            expected,
            actual,
        }
    }

    pub fn length_mismatch(expected: usize, actual: usize) -> Self {
        Self::LengthMismatch {
            context: String::new(),
            expected,
            actual,
        }
    }

    pub fn unsupported(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedShape {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn transport(context: impl Into<String>, source: TransportError) -> Self {
        Self::Transport {
            context: context.into(),
            source,
        }
    }

    /// Attach the point name to errors raised below the facade without one.
    pub fn at_point(self, point: &str) -> Self {
        match self {
            Self::ShortData {
                context,
                expected,
                actual,
            } if context.is_empty() => Self::ShortData {
                context: format!("point {point}"),
                expected,
                actual,
            },
            Self::LengthMismatch {
                context,
                expected,
                actual,
            } if context.is_empty() => Self::LengthMismatch {
                context: format!("point {point}"),
                expected,
                actual,
            },
            Self::UnsupportedShape { field, reason } if field.is_empty() => {
                Self::UnsupportedShape {
                    field: point.to_string(),
                    reason,
                }
            },
            Self::ReadOnly { point: p, kind } if p.is_empty() => Self::ReadOnly {
                point: point.to_string(),
                kind,
            },
            Self::Transport { context, source } => Self::Transport {
                context: format!("{context} (point {point})"),
                source,
            },
            other => other,
        }
    }
}
