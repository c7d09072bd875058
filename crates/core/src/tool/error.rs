use std::borrow::Cow;
use std::fmt::{self, Display};

/// The kind of error that occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A required field was absent from the command block.
    MissingField,
    /// Error occurred while executing the tool.
    ExecutionError,
    /// The routing target does not exist.
    UnknownTarget,
    /// The routing target is already handling a run.
    TargetBusy,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::MissingField => write!(f, "Missing field"),
            ErrorKind::ExecutionError => write!(f, "Execution error"),
            ErrorKind::UnknownTarget => write!(f, "Unknown target"),
            ErrorKind::TargetBusy => write!(f, "Target busy"),
        }
    }
}

/// Describes a tool call error.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Error {
    kind: ErrorKind,
    reason: Option<String>,
}

impl Error {
    /// Creates a new error naming a required field that was absent from
    /// the command block.
    #[inline]
    pub fn missing_field(field: &str) -> Self {
        Self {
            kind: ErrorKind::MissingField,
            reason: Some(format!("missing required field <{field}>")),
        }
    }

    /// Creates a new error with the `ExecutionError` kind.
    #[inline]
    pub fn execution_error() -> Self {
        Self {
            kind: ErrorKind::ExecutionError,
            reason: None,
        }
    }

    /// Creates a new error with the `UnknownTarget` kind.
    #[inline]
    pub fn unknown_target() -> Self {
        Self {
            kind: ErrorKind::UnknownTarget,
            reason: None,
        }
    }

    /// Creates a new error with the `TargetBusy` kind.
    #[inline]
    pub fn target_busy() -> Self {
        Self {
            kind: ErrorKind::TargetBusy,
            reason: None,
        }
    }

    /// Attaches a reason to the error.
    #[inline]
    pub fn with_reason<S: Into<String>>(self, reason: S) -> Self {
        Self {
            kind: self.kind,
            reason: Some(reason.into()),
        }
    }

    /// Returns the kind of this error.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the reason for the error.
    #[inline]
    pub fn reason(&self) -> Cow<'_, str> {
        match self.reason.as_deref() {
            Some(reason) => Cow::Borrowed(reason),
            None => Cow::Owned(format!("{}", self.kind)),
        }
    }
}
