//! # Pipeline Error Handling
//!
//! Hierarchical error types for the smart-crop pipeline, with classification
//! traits and rich context.
//!
//! ## Taxonomy
//!
//! | Variant | Fatal for the image? | Counts toward AI disable? |
//! |---------|----------------------|---------------------------|
//! | `Load` | yes | no |
//! | `ModelLoad` | no, fallback handle is synthesized | yes |
//! | `Inference` | no, cascade degrades | yes |
//! | `InferenceTimeout` | no, cascade degrades | yes |
//! | `MemoryPressure` | no, cascade degrades | yes |
//! | `Encode` | yes | no |
//!
//! `MemoryPressure` is split out from `Inference` by matching the error text
//! against GPU/texture fault patterns, so operators can tell capacity
//! exhaustion apart from plain bugs.
//!
//! ## Propagation
//!
//! Nothing in this module escapes a batch call: the orchestrator converts
//! every per-image error into a `ProcessedImageResult` with `error` set.
//!
//! ## Usage
//!
//! ```rust
//! use smart_crop::error::{PipelineError, Recoverable, classify};
//!
//! let error = PipelineError::inference(4, "WebGL: CONTEXT_LOST_WEBGL")
//!     .with_context("upscaling 1024x768 by 4");
//! assert!(classify::counts_toward_ai_disable(&error));
//! assert!(error.is_recoverable());
//! ```

use std::{error::Error as StdError, fmt, time::SystemTime};

/// Severity levels for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Debug,
    Info,
    /// Degradations the caller never sees (AI path failed, fallback used)
    Warning,
    Error,
    Critical,
    Fatal,
}

/// Metadata about when and where an error occurred
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub timestamp: SystemTime,
    pub context: Option<String>,
    pub recovery_suggestion: Option<String>,
    pub severity: ErrorSeverity,
    pub recoverable: bool,
    pub metadata: std::collections::HashMap<String, String>,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            timestamp: SystemTime::now(),
            context: None,
            recovery_suggestion: None,
            severity: ErrorSeverity::Error,
            recoverable: false,
            metadata: std::collections::HashMap::new(),
        }
    }
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    fn recoverable(mut self) -> Self {
        self.recoverable = true;
        self
    }
}

/// Base error type for the pipeline
#[derive(Debug)]
pub enum PipelineError {
    /// Source image failed to decode
    Load {
        label: String,
        reason: String,
        context: ErrorContext,
    },
    /// Super-resolution model instantiation failed
    ModelLoad {
        scale: u32,
        reason: String,
        context: ErrorContext,
    },
    /// Super-resolution inference returned an error
    Inference {
        scale: u32,
        reason: String,
        context: ErrorContext,
    },
    /// Inference lost the race against its timer
    InferenceTimeout {
        scale: u32,
        duration_ms: u64,
        context: ErrorContext,
    },
    /// GPU or texture fault, i.e. capacity exhaustion
    MemoryPressure {
        operation: String,
        reason: String,
        context: ErrorContext,
    },
    /// Final buffer could not be serialized
    Encode {
        format: String,
        reason: String,
        context: ErrorContext,
    },
    /// Configuration validation errors
    Config {
        field: String,
        value: String,
        reason: String,
        context: ErrorContext,
    },
    /// Request validation errors
    Validation {
        field: String,
        constraint: String,
        value: String,
        context: ErrorContext,
    },
    /// Resource allocation or pixel-kernel failures
    Resource {
        resource: String,
        reason: String,
        context: ErrorContext,
    },
    Io {
        operation: String,
        path: Option<String>,
        source: std::io::Error,
        context: ErrorContext,
    },
    External {
        library: String,
        source: Box<dyn StdError + Send + Sync>,
        context: ErrorContext,
    },
}

impl PipelineError {
    pub fn load(label: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Load {
            label: label.into(),
            reason: reason.into(),
            context: ErrorContext::new().with_severity(ErrorSeverity::Error),
        }
    }

    pub fn model_load(scale: u32, reason: impl Into<String>) -> Self {
        Self::ModelLoad {
            scale,
            reason: reason.into(),
            context: ErrorContext::new()
                .with_severity(ErrorSeverity::Warning)
                .recoverable(),
        }
    }

    pub fn inference(scale: u32, reason: impl Into<String>) -> Self {
        Self::Inference {
            scale,
            reason: reason.into(),
            context: ErrorContext::new()
                .with_severity(ErrorSeverity::Warning)
                .recoverable(),
        }
    }

    pub fn inference_timeout(scale: u32, duration_ms: u64) -> Self {
        Self::InferenceTimeout {
            scale,
            duration_ms,
            context: ErrorContext::new()
                .with_severity(ErrorSeverity::Warning)
                .recoverable(),
        }
    }

    pub fn memory_pressure(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MemoryPressure {
            operation: operation.into(),
            reason: reason.into(),
            context: ErrorContext::new()
                .with_severity(ErrorSeverity::Critical)
                .recoverable(),
        }
    }

    pub fn encode(format: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Encode {
            format: format.into(),
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn config(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Config {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
            context: ErrorContext::new().with_severity(ErrorSeverity::Fatal),
        }
    }

    pub fn validation(
        field: impl Into<String>,
        constraint: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::Validation {
            field: field.into(),
            constraint: constraint.into(),
            value: value.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn resource(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resource {
            resource: resource.into(),
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path: None,
            source,
            context: ErrorContext::new(),
        }
    }

    pub fn external(
        library: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            library: library.into(),
            source: Box::new(source),
            context: ErrorContext::new(),
        }
    }

    /// Attach a path to an I/O error; no-op for other variants.
    pub fn with_path(mut self, p: impl Into<String>) -> Self {
        if let Self::Io { path, .. } = &mut self {
            *path = Some(p.into());
        }
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context_mut().context = Some(context.into());
        self
    }

    pub fn with_recovery_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.context_mut().recovery_suggestion = Some(suggestion.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context_mut().metadata.insert(key.into(), value.into());
        self
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::Load { context, .. } => context,
            Self::ModelLoad { context, .. } => context,
            Self::Inference { context, .. } => context,
            Self::InferenceTimeout { context, .. } => context,
            Self::MemoryPressure { context, .. } => context,
            Self::Encode { context, .. } => context,
            Self::Config { context, .. } => context,
            Self::Validation { context, .. } => context,
            Self::Resource { context, .. } => context,
            Self::Io { context, .. } => context,
            Self::External { context, .. } => context,
        }
    }

    fn context_mut(&mut self) -> &mut ErrorContext {
        match self {
            Self::Load { context, .. } => context,
            Self::ModelLoad { context, .. } => context,
            Self::Inference { context, .. } => context,
            Self::InferenceTimeout { context, .. } => context,
            Self::MemoryPressure { context, .. } => context,
            Self::Encode { context, .. } => context,
            Self::Config { context, .. } => context,
            Self::Validation { context, .. } => context,
            Self::Resource { context, .. } => context,
            Self::Io { context, .. } => context,
            Self::External { context, .. } => context,
        }
    }

    /// Stable category name, used as a structured log field
    pub fn category(&self) -> &'static str {
        match self {
            Self::Load { .. } => "load",
            Self::ModelLoad { .. } => "model_load",
            Self::Inference { .. } => "inference",
            Self::InferenceTimeout { .. } => "inference_timeout",
            Self::MemoryPressure { .. } => "memory_pressure",
            Self::Encode { .. } => "encode",
            Self::Config { .. } => "config",
            Self::Validation { .. } => "validation",
            Self::Resource { .. } => "resource",
            Self::Io { .. } => "io",
            Self::External { .. } => "external",
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Load { label, reason, .. } => {
                write!(f, "Failed to load image '{}': {}", label, reason)
            }
            PipelineError::ModelLoad { scale, reason, .. } => {
                write!(f, "Failed to load x{} super-resolution model: {}", scale, reason)
            }
            PipelineError::Inference { scale, reason, .. } => {
                write!(f, "x{} inference failed: {}", scale, reason)
            }
            PipelineError::InferenceTimeout {
                scale, duration_ms, ..
            } => {
                write!(f, "x{} inference timed out after {}ms", scale, duration_ms)
            }
            PipelineError::MemoryPressure {
                operation, reason, ..
            } => {
                write!(f, "GPU memory pressure during {}: {}", operation, reason)
            }
            PipelineError::Encode { format, reason, .. } => {
                write!(f, "Failed to encode {} output: {}", format, reason)
            }
            PipelineError::Config {
                field,
                value,
                reason,
                ..
            } => {
                write!(
                    f,
                    "Configuration error in '{}': {} (value: {})",
                    field, reason, value
                )
            }
            PipelineError::Validation {
                field,
                constraint,
                value,
                ..
            } => {
                write!(
                    f,
                    "Validation failed for '{}': {} (value: {})",
                    field, constraint, value
                )
            }
            PipelineError::Resource {
                resource, reason, ..
            } => {
                write!(f, "Resource failure for {}: {}", resource, reason)
            }
            PipelineError::Io {
                operation,
                path,
                source,
                ..
            } => {
                if let Some(path) = path {
                    write!(f, "I/O error during {} on '{}': {}", operation, path, source)
                } else {
                    write!(f, "I/O error during {}: {}", operation, source)
                }
            }
            PipelineError::External {
                library, source, ..
            } => {
                write!(f, "External library error in {}: {}", library, source)
            }
        }
    }
}

impl StdError for PipelineError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::External { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Trait for errors that can be recovered from
pub trait Recoverable {
    fn is_recoverable(&self) -> bool;
}

impl Recoverable for PipelineError {
    fn is_recoverable(&self) -> bool {
        self.context().recoverable
            || matches!(
                self,
                Self::ModelLoad { .. }
                    | Self::Inference { .. }
                    | Self::InferenceTimeout { .. }
                    | Self::MemoryPressure { .. }
            )
    }
}

pub trait HasSeverity {
    fn severity(&self) -> ErrorSeverity;
}

impl HasSeverity for PipelineError {
    fn severity(&self) -> ErrorSeverity {
        self.context().severity
    }
}

pub trait HasRecoverySuggestion {
    fn recovery_suggestion(&self) -> Option<&str>;
}

impl HasRecoverySuggestion for PipelineError {
    fn recovery_suggestion(&self) -> Option<&str> {
        self.context().recovery_suggestion.as_deref()
    }
}

/// Error classification utilities
pub mod classify {
    use super::*;

    /// Substrings that mark a GPU or texture fault.
    const MEMORY_PRESSURE_PATTERNS: [&str; 8] = [
        "out of memory",
        "gpu",
        "webgl",
        "texture",
        "context lost",
        "context_lost",
        "allocation failed",
        "cuda",
    ];

    /// Abbreviations that only count as a whole word.
    const MEMORY_PRESSURE_WORDS: [&str; 1] = ["oom"];

    /// Whether an error message looks like capacity exhaustion.
    pub fn is_memory_pressure_message(message: &str) -> bool {
        let lower = message.to_ascii_lowercase();
        MEMORY_PRESSURE_PATTERNS.iter().any(|p| lower.contains(p))
            || lower
                .split(|c: char| !c.is_ascii_alphanumeric())
                .any(|word| MEMORY_PRESSURE_WORDS.contains(&word))
    }

    /// Turn a raw inference failure into `MemoryPressure` or `Inference`.
    pub fn inference_failure(scale: u32, message: impl Into<String>) -> PipelineError {
        let message = message.into();
        if is_memory_pressure_message(&message) {
            PipelineError::memory_pressure(format!("x{} inference", scale), message)
                .with_metadata("scale", scale.to_string())
        } else {
            PipelineError::inference(scale, message)
        }
    }

    /// Errors that increment the governor's consecutive failure counter
    pub fn counts_toward_ai_disable(error: &PipelineError) -> bool {
        matches!(
            error,
            PipelineError::ModelLoad { .. }
                | PipelineError::Inference { .. }
                | PipelineError::InferenceTimeout { .. }
                | PipelineError::MemoryPressure { .. }
        )
    }

    pub fn is_memory_pressure(error: &PipelineError) -> bool {
        matches!(error, PipelineError::MemoryPressure { .. })
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(error: std::io::Error) -> Self {
        Self::io("unknown", error)
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(error: serde_json::Error) -> Self {
        Self::external("serde_json", error)
    }
}

impl From<crop_scale::cpu::ScaleError> for PipelineError {
    fn from(error: crop_scale::cpu::ScaleError) -> Self {
        Self::resource("resampler", error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = PipelineError::load("cat.png", "unexpected EOF");
        assert_eq!(error.category(), "load");
        assert!(!error.is_recoverable());
        assert!(!classify::counts_toward_ai_disable(&error));
        assert_eq!(error.to_string(), "Failed to load image 'cat.png': unexpected EOF");
    }

    #[test]
    fn test_error_with_context() {
        let error = PipelineError::encode("jpeg", "quality out of range")
            .with_context("encoding 800x450 result")
            .with_recovery_suggestion("use a quality between 1 and 100");
        assert_eq!(error.category(), "encode");
        assert_eq!(
            error.recovery_suggestion(),
            Some("use a quality between 1 and 100")
        );
        assert_eq!(
            error.context().context.as_deref(),
            Some("encoding 800x450 result")
        );
    }

    #[test]
    fn test_memory_pressure_is_pattern_matched() {
        let pressure = classify::inference_failure(4, "Failed to allocate TEXTURE of 16384x16384");
        assert!(classify::is_memory_pressure(&pressure));
        assert_eq!(pressure.severity(), ErrorSeverity::Critical);

        assert!(classify::is_memory_pressure_message("worker killed: OOM"));
        assert!(classify::is_memory_pressure_message("oom-killer invoked"));

        let plain = classify::inference_failure(4, "index out of bounds");
        assert_eq!(plain.category(), "inference");
        assert!(classify::counts_toward_ai_disable(&plain));
    }

    #[test]
    fn test_oom_only_matches_as_a_word() {
        for message in ["zoom level invalid", "no room left in tile queue", "bloom filter rejected"] {
            assert!(!classify::is_memory_pressure_message(message), "{message}");
            assert_eq!(classify::inference_failure(2, message).category(), "inference");
        }
    }

    #[test]
    fn test_error_classification() {
        let timeout = PipelineError::inference_timeout(2, 30_000);
        assert!(timeout.is_recoverable());
        assert!(classify::counts_toward_ai_disable(&timeout));
        assert_eq!(timeout.severity(), ErrorSeverity::Warning);

        let config = PipelineError::config("tile_size", "0", "must be positive");
        assert!(!config.is_recoverable());
        assert_eq!(config.severity(), ErrorSeverity::Fatal);
    }
}
