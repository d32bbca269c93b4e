use std::borrow::Cow;
use std::fmt::{self, Display};

use serde_json::json;

/// The kind of error that occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The input provided to the tool was invalid.
    InvalidInput,
    /// Error occurred while executing the tool.
    ExecutionError,
    /// The downstream service couldn't be reached.
    Network,
    /// The downstream service answered with an error status.
    UpstreamStatus,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::InvalidInput => write!(f, "Invalid input"),
            ErrorKind::ExecutionError => write!(f, "Execution error"),
            ErrorKind::Network => write!(f, "Network error"),
            ErrorKind::UpstreamStatus => write!(f, "Upstream error status"),
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
    /// Creates a new error with the `InvalidInput` kind.
    #[inline]
    pub fn invalid_input() -> Self {
        Self::new(ErrorKind::InvalidInput)
    }

    /// Creates a new error with the `ExecutionError` kind.
    #[inline]
    pub fn execution_error() -> Self {
        Self::new(ErrorKind::ExecutionError)
    }

    /// Creates a new error with the `Network` kind.
    #[inline]
    pub fn network() -> Self {
        Self::new(ErrorKind::Network)
    }

    /// Creates a new error with the `UpstreamStatus` kind.
    #[inline]
    pub fn upstream_status(status: u16) -> Self {
        Self::new(ErrorKind::UpstreamStatus)
            .with_reason(format!("upstream responded with status {status}"))
    }

    #[inline]
    fn new(kind: ErrorKind) -> Self {
        Self { kind, reason: None }
    }

    /// Attaches a reason to the error.
    #[inline]
    pub fn with_reason<S: Into<String>>(self, reason: S) -> Self {
        Self {
            kind: self.kind,
            reason: Some(reason.into()),
        }
    }

    /// Returns the kind of the error.
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

    /// Renders the failure envelope the model receives as the tool result.
    pub fn to_envelope(&self, tool_name: &str) -> String {
        json!({
            "success": false,
            "error": self.reason(),
            "tool_name": tool_name,
        })
        .to_string()
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason())
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    #[test]
    fn test_envelope() {
        let err = Error::upstream_status(502);
        let envelope: Value =
            serde_json::from_str(&err.to_envelope("search_equipment")).unwrap();
        assert_eq!(
            envelope,
            json!({
                "success": false,
                "error": "upstream responded with status 502",
                "tool_name": "search_equipment"
            })
        );
        assert_eq!(Error::network().reason(), "Network error");
    }
}
