/// Category of a backend error. Lets callers decide between retry,
/// rollback and fail-fast without string matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid configuration. Permanent, fail at startup.
    Config,
    /// I/O or network error. Transient, may retry or reconnect.
    Io,
    /// Encoding, schema or parse error: the payload itself is bad.
    Format,
    /// Constraint violation or serialization failure inside a transaction.
    Constraint,
    /// Referenced row/node does not exist.
    NotFound,
    /// Logical error (invalid state, generic).
    Logic,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Config => f.write_str("config"),
            ErrorKind::Io => f.write_str("io"),
            ErrorKind::Format => f.write_str("format"),
            ErrorKind::Constraint => f.write_str("constraint"),
            ErrorKind::NotFound => f.write_str("not_found"),
            ErrorKind::Logic => f.write_str("logic"),
        }
    }
}

/// Unified error type for every collaborator trait (store, graph, broker,
/// schema registry).
///
/// Carries an `ErrorKind` for categorization and a human-readable message.
/// `From` impls assign the kind automatically so adapters can use `?`.
#[derive(Clone, PartialEq, Eq)]
pub struct BackendError {
    kind: ErrorKind,
    message: String,
}

impl BackendError {
    /// Generic logic error (default kind).
    pub fn new(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Logic, message: msg.into() }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: msg.into() }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Io, message: msg.into() }
    }

    pub fn format_err(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Format, message: msg.into() }
    }

    pub fn constraint(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Constraint, message: msg.into() }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::NotFound, message: msg.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Transient errors are worth another attempt.
    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Io
    }

    /// Prefix the message with context, keeping the kind.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        Self { kind: self.kind, message: format!("{ctx}: {}", self.message) }
    }
}

impl std::fmt::Debug for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for BackendError {}

impl From<String> for BackendError {
    fn from(s: String) -> Self { Self { kind: ErrorKind::Logic, message: s } }
}

impl From<&str> for BackendError {
    fn from(s: &str) -> Self { Self { kind: ErrorKind::Logic, message: s.to_string() } }
}

impl From<std::io::Error> for BackendError {
    fn from(e: std::io::Error) -> Self { Self { kind: ErrorKind::Io, message: e.to_string() } }
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self { Self { kind: ErrorKind::Format, message: e.to_string() } }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_kind() {
        let err = BackendError::io("leader not available").with_context("send app_events_PostLiked");
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.message(), "send app_events_PostLiked: leader not available");
        assert!(err.is_transient());
    }

    #[test]
    fn json_errors_are_format() {
        let err: BackendError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(!err.is_transient());
    }

    #[test]
    fn kind_display_is_header_friendly() {
        assert_eq!(ErrorKind::NotFound.to_string(), "not_found");
        assert_eq!(format!("{:?}", BackendError::constraint("dup")), "[constraint] dup");
    }
}
