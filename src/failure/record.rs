use serde::{Deserialize, Serialize};

/// Structured error surfaced by caller-supplied operations.
///
/// The core never inspects raw exceptions or strings to decide policy; every
/// leaf failure arrives as an `ErrorRecord` with a machine-matchable `kind`,
/// a human message, an optional protocol status code, an optional cause
/// chain, and free-form details.
///
/// Kinds are dotted lowercase paths by convention (`network.timeout`,
/// `browser.crash`, `auth.denied`); classifiers match on substrings of the
/// kind and message.
///
/// # Examples
///
/// ```
/// use crawlweave::failure::ErrorRecord;
/// use serde_json::json;
///
/// let err = ErrorRecord::new("network.timeout", "page load exceeded 30s")
///     .with_status(504)
///     .with_details(json!({"url": "https://example.com/p/7"}));
/// assert_eq!(err.kind, "network.timeout");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorRecord {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<ErrorRecord>>,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl Default for ErrorRecord {
    fn default() -> Self {
        ErrorRecord {
            kind: String::new(),
            message: String::new(),
            status: None,
            cause: None,
            details: serde_json::Value::Null,
        }
    }
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "[{} status={}] {}", self.kind, status, self.message),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ErrorRecord {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_ref().map(|c| c as &dyn std::error::Error)
    }
}

impl ErrorRecord {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        ErrorRecord {
            kind: kind.into(),
            message: message.into(),
            status: None,
            cause: None,
            details: serde_json::Value::Null,
        }
    }

    /// Record for a panic caught inside a caller operation.
    pub fn panic(message: impl Into<String>) -> Self {
        Self::new("panic", message)
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    #[must_use]
    pub fn with_cause(mut self, cause: ErrorRecord) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}
