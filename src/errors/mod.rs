//! Error taxonomy for cache construction and per-call marshaling
//!
//! Every error is attributable to one argument slot; the Invoker attaches the
//! callable name and argument name before an error reaches the binding layer.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// No marshaler family handles the type (cache-build time)
    UnsupportedType { ty: String },
    /// Metadata is inconsistent, e.g. a child link points out of range
    InvalidArgumentConfig { reason: String },
    MissingArgument { name: String },
    TooManyArguments { expected: usize, found: usize },
    /// Wrong kind of script value
    Type { expected: String, found: String },
    /// Right kind, unacceptable value (array length, enum member)
    Value { reason: String },
    Overflow { value: String, min: String, max: String },
    NativeCall { domain: String, code: i32, message: String },
    NotImplemented { what: String },
    NotFound { symbol: String },
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedType { ty } => write!(f, "Unsupported type: {}", ty),
            Self::InvalidArgumentConfig { reason } => {
                write!(f, "Invalid argument configuration: {}", reason)
            }
            Self::MissingArgument { name } => {
                write!(f, "Missing required argument '{}'", name)
            }
            Self::TooManyArguments { expected, found } => {
                write!(f, "Takes at most {} arguments ({} given)", expected, found)
            }
            Self::Type { expected, found } => {
                write!(f, "Must be {}, not {}", expected, found)
            }
            Self::Value { reason } => f.write_str(reason),
            Self::Overflow { value, min, max } => {
                write!(f, "{} not in range {} to {}", value, min, max)
            }
            Self::NativeCall { domain, code, message } => {
                write!(f, "{}: {} ({})", domain, message, code)
            }
            Self::NotImplemented { what } => write!(f, "{} is not supported", what),
            Self::NotFound { symbol } => write!(f, "No metadata found for '{}'", symbol),
        }
    }
}

/// Marshaling failure with optional call-site attribution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarshalError {
    pub kind: ErrorKind,
    pub callable: Option<String>,
    pub argument: Option<String>,
    pub index: Option<usize>,
}

impl MarshalError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            callable: None,
            argument: None,
            index: None,
        }
    }

    pub fn unsupported(ty: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedType { ty: ty.into() })
    }

    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgumentConfig {
            reason: reason.into(),
        })
    }

    pub fn missing(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::MissingArgument { name: name.into() })
    }

    pub fn type_error(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type {
            expected: expected.into(),
            found: found.into(),
        })
    }

    pub fn value(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::Value {
            reason: reason.into(),
        })
    }

    pub fn overflow(value: impl fmt::Display, min: impl fmt::Display, max: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Overflow {
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        })
    }

    pub fn native(domain: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NativeCall {
            domain: domain.into(),
            code,
            message: message.into(),
        })
    }

    pub fn not_implemented(what: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotImplemented { what: what.into() })
    }

    pub fn not_found(symbol: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound {
            symbol: symbol.into(),
        })
    }

    /// Attach the callable name unless one is already set
    pub fn with_callable(mut self, callable: impl Into<String>) -> Self {
        if self.callable.is_none() {
            self.callable = Some(callable.into());
        }
        self
    }

    /// Attach the argument name and native index unless already attributed
    pub fn with_argument(mut self, argument: impl Into<String>, index: impl Into<Option<usize>>) -> Self {
        if self.argument.is_none() {
            self.argument = Some(argument.into());
            self.index = index.into();
        }
        self
    }

    pub fn is_overflow(&self) -> bool {
        matches!(self.kind, ErrorKind::Overflow { .. })
    }

    pub fn is_type_error(&self) -> bool {
        matches!(self.kind, ErrorKind::Type { .. })
    }
}

impl fmt::Display for MarshalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.callable, &self.argument, self.index) {
            (Some(callable), Some(arg), Some(index)) => {
                write!(f, "{}() argument '{}' (#{}): {}", callable, arg, index, self.kind)
            }
            (Some(callable), Some(arg), None) => {
                write!(f, "{}() argument '{}': {}", callable, arg, self.kind)
            }
            (Some(callable), None, _) => write!(f, "{}(): {}", callable, self.kind),
            (None, Some(arg), _) => write!(f, "argument '{}': {}", arg, self.kind),
            (None, None, _) => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for MarshalError {}

pub type Result<T> = std::result::Result<T, MarshalError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// A closure can never be released (destroy-notify without user data)
    ResourceLeak,
}

/// Advisory, non-fatal diagnostic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    pub fn resource_leak(callable: &str) -> Self {
        Self {
            kind: WarningKind::ResourceLeak,
            message: format!(
                "Callables passed to {} will leak references because the method \
                 does not support a user_data argument",
                callable
            ),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Destination for advisory warnings
pub trait WarningSink: Send + Sync {
    fn warn(&self, warning: &Warning);
}

/// Logs warnings through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl WarningSink for TracingSink {
    fn warn(&self, warning: &Warning) {
        tracing::warn!(target: "marshal", kind = ?warning.kind, "{}", warning.message);
    }
}

/// Records every warning it receives
#[derive(Debug, Default)]
pub struct CollectingSink {
    warnings: Mutex<Vec<Warning>>,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn warnings(&self) -> Vec<Warning> {
        self.warnings.lock().clone()
    }

    pub fn count(&self, kind: WarningKind) -> usize {
        self.warnings.lock().iter().filter(|w| w.kind == kind).count()
    }

    pub fn clear(&self) {
        self.warnings.lock().clear();
    }
}

impl WarningSink for CollectingSink {
    fn warn(&self, warning: &Warning) {
        self.warnings.lock().push(warning.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribution_is_kept_from_innermost_site() {
        let err = MarshalError::overflow(300, 0, 255)
            .with_argument("value", 2usize)
            .with_argument("outer", 0usize)
            .with_callable("Test.set")
            .with_callable("Other.set");
        assert_eq!(err.argument.as_deref(), Some("value"));
        assert_eq!(err.index, Some(2));
        assert_eq!(err.to_string(), "Test.set() argument 'value' (#2): 300 not in range 0 to 255");
        assert!(err.is_overflow());
    }

    #[test]
    fn test_display_without_attribution() {
        let err = MarshalError::type_error("int", "str");
        assert_eq!(err.to_string(), "Must be int, not str");
        assert!(err.is_type_error());

        let err = MarshalError::native("test-error", 3, "boom").with_callable("Test.fail");
        assert_eq!(err.to_string(), "Test.fail(): test-error: boom (3)");
    }

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingSink::new();
        sink.warn(&Warning::resource_leak("Test.connect"));
        assert_eq!(sink.count(WarningKind::ResourceLeak), 1);
        assert!(sink.warnings()[0].message.contains("Test.connect"));

        sink.clear();
        assert!(sink.warnings().is_empty());
    }
}
