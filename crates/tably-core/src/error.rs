use std::fmt;

/// Classification of every error the engine can surface to a caller.
///
/// The set mirrors the gRPC status codes the platform's transport layer
/// speaks. Raw database driver errors never cross a component boundary:
/// they are translated into one of these kinds exactly once, at the
/// driver seam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No matching row, or an unknown table / field slug.
    NotFound,
    /// Unique constraint violation, or an exhausted uniqueness probe.
    AlreadyExists,
    /// Check / not-null / type violations and malformed filters.
    InvalidArgument,
    /// Foreign-key violation or a missing active transaction.
    FailedPrecondition,
    /// Connection failure or an unprovisioned tenant.
    Unavailable,
    /// Credential errors reported by the database.
    Unauthenticated,
    /// Deadlock or serialization failure.
    Aborted,
    /// Unclassified database or engine errors.
    Internal,
}

impl ErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::FailedPrecondition => "failed precondition",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::Aborted => "aborted",
            ErrorKind::Internal => "internal",
        }
    }
}

/// An error produced by the Tably engine.
pub struct Error {
    kind: ErrorKind,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

macro_rules! constructors {
    ( $( ($ctor:ident, $is:ident, $kind:ident) ),* $(,)? ) => {
        $(
            pub fn $ctor(message: impl Into<String>) -> Self {
                Self::new(ErrorKind::$kind, message)
            }

            pub fn $is(&self) -> bool {
                self.kind == ErrorKind::$kind
            }
        )*
    };
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    constructors! {
        (not_found, is_not_found, NotFound),
        (already_exists, is_already_exists, AlreadyExists),
        (invalid_argument, is_invalid_argument, InvalidArgument),
        (failed_precondition, is_failed_precondition, FailedPrecondition),
        (unavailable, is_unavailable, Unavailable),
        (unauthenticated, is_unauthenticated, Unauthenticated),
        (aborted, is_aborted, Aborted),
        (internal, is_internal, Internal),
    }

    /// Attaches the underlying error that caused this one.
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Wraps this error with an additional message, keeping the kind.
    pub fn context(self, message: impl Into<String>) -> Self {
        Self {
            kind: self.kind,
            message: format!("{}: {}", message.into(), self.message),
            source: self.source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str(self.kind.as_str())
        } else {
            write!(f, "{}: {}", self.kind.as_str(), self.message)
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("Error");
        dbg.field("kind", &self.kind).field("message", &self.message);
        if let Some(source) = &self.source {
            dbg.field("source", source);
        }
        dbg.finish()
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}
