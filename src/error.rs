//! Engine errors.
//!
//! Per spec.md §7, in-query evaluation errors never abort a query:
//! a scalar expression that fails reduces to `Value::Null` and logs
//! a diagnostic; a plugin `Call` that fails closes its channel early
//! and logs. `EngineError` below is therefore *not* how those
//! failures are surfaced — it exists for the narrower set of
//! construction-time failures (registering a malformed argument
//! record, a duplicate protocol registration) that happen before a
//! query runs and can fail loudly without violating that "best
//! effort, keep going" policy. See SPEC_FULL.md §1 and §7.

use log::{debug, error as log_error, warn as log_warn, Level};

pub type EngineResult<T> = Result<T, EngineError>;

/// The runtime error kinds named in spec.md §7. These are carried
/// inside diagnostics (logged, not propagated) except where noted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing required argument, unknown key, coercion failure.
    ParseArg,
    /// Unknown plugin/function/variable.
    Resolve,
    /// Protocol-dispatch fallback produced an incoherent result.
    Type,
    /// Context cancellation.
    Cancelled,
    /// A destructor exceeded its bounded wait.
    Resource,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ParseArg => "ParseArg",
            ErrorKind::Resolve => "Resolve",
            ErrorKind::Type => "Type",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Resource => "Resource",
        }
    }
}

/// Construction-time engine error: returned by registration APIs
/// (`Scope::register_plugin`, `register_function`,
/// `register_protocol_impl`, `ArgSchema::compile`) only.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum EngineError {
    #[error("missing required argument `{field}`")]
    MissingRequiredArgument { field: String },

    #[error("unknown argument `{field}`")]
    UnknownArgument { field: String },

    #[error("argument `{field}` could not be coerced to the declared type: {detail}")]
    ArgumentTypeMismatch { field: String, detail: String },

    #[error("plugin `{name}` is already registered")]
    DuplicatePlugin { name: String },

    #[error("function `{name}` is already registered")]
    DuplicateFunction { name: String },

    #[error("unknown plugin `{name}`")]
    UnknownPlugin { name: String },

    #[error("unknown function `{name}`")]
    UnknownFunction { name: String },

    #[error("unknown variable `{name}`")]
    UnknownVariable { name: String },

    #[error("scope nesting exceeded the configured stack depth ({limit})")]
    StackOverflow { limit: usize },
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::MissingRequiredArgument { .. }
            | EngineError::UnknownArgument { .. }
            | EngineError::ArgumentTypeMismatch { .. } => ErrorKind::ParseArg,
            EngineError::DuplicatePlugin { .. }
            | EngineError::DuplicateFunction { .. }
            | EngineError::UnknownPlugin { .. }
            | EngineError::UnknownFunction { .. }
            | EngineError::UnknownVariable { .. } => ErrorKind::Resolve,
            EngineError::StackOverflow { .. } => ErrorKind::Resource,
        }
    }

    fn default_level(&self) -> Level {
        match self.kind() {
            ErrorKind::ParseArg | ErrorKind::Resolve => Level::Warn,
            ErrorKind::Type => Level::Error,
            ErrorKind::Cancelled => Level::Debug,
            ErrorKind::Resource => Level::Error,
        }
    }

    /// Logs this error at its default severity under the `vql`
    /// target (SPEC_FULL.md §6).
    pub fn log(&self) {
        self.log_with_level(self.default_level());
    }

    pub fn log_with_level(&self, level: Level) {
        match level {
            Level::Error => log_error!(target: "vql", "[{}] {}", self.kind().as_str(), self),
            Level::Warn => log_warn!(target: "vql", "[{}] {}", self.kind().as_str(), self),
            Level::Info => log::info!(target: "vql", "[{}] {}", self.kind().as_str(), self),
            Level::Debug | Level::Trace => {
                debug!(target: "vql", "[{}] {}", self.kind().as_str(), self)
            }
        }
    }
}

/// Logs a scalar/plugin-evaluation diagnostic without constructing an
/// `EngineError` (spec.md §7's "log and keep going" path for runtime
/// failures, as opposed to the construction-time `EngineError`
/// above).
pub fn log_runtime(kind: ErrorKind, message: impl std::fmt::Display) {
    let level = match kind {
        ErrorKind::ParseArg | ErrorKind::Resolve => Level::Warn,
        ErrorKind::Type => Level::Error,
        ErrorKind::Cancelled => Level::Debug,
        ErrorKind::Resource => Level::Error,
    };
    match level {
        Level::Error => log_error!(target: "vql", "[{}] {}", kind.as_str(), message),
        Level::Warn => log_warn!(target: "vql", "[{}] {}", kind.as_str(), message),
        Level::Debug | Level::Trace => debug!(target: "vql", "[{}] {}", kind.as_str(), message),
        Level::Info => log::info!(target: "vql", "[{}] {}", kind.as_str(), message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_required_argument_kind_is_parse_arg() {
        let err = EngineError::MissingRequiredArgument {
            field: "x".into(),
        };
        assert_eq!(err.kind(), ErrorKind::ParseArg);
    }

    #[test]
    fn unknown_plugin_kind_is_resolve() {
        let err = EngineError::UnknownPlugin { name: "foo".into() };
        assert_eq!(err.kind(), ErrorKind::Resolve);
        assert_eq!(err.to_string(), "unknown plugin `foo`");
    }

    #[test]
    fn stack_overflow_kind_is_resource() {
        let err = EngineError::StackOverflow { limit: 1000 };
        assert_eq!(err.kind(), ErrorKind::Resource);
    }
}
