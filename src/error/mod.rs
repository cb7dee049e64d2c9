//! Uniform error shape for the public adapter contract.
//!
//! Every failure - local validation, provider errors, decode failures - is
//! normalized into a single `{msg, status?}` value before it crosses the
//! public boundary. Credential-class provider failures are collapsed into a
//! fixed 500 with a fixed message so operators get a distinct signal for auth
//! rot instead of raw provider text.

use std::fmt;

use tracing::warn;

use crate::s3::ClientError;

/// Fallback message when a failure carries no usable signal.
pub const GENERIC_ERROR: &str = "An error occurred";

/// Fixed message for credential-class failures.
pub const CREDENTIALS_INVALID: &str = "AWS credentials are invalid";

/// Provider error codes that indicate broken, expired, or mismatched
/// credentials. Matched as substrings against the normalized error text.
const CREDENTIAL_ERROR_TOKENS: &[&str] = &[
    "InvalidAccessKeyId",
    "ExpiredToken",
    "InvalidToken",
    "TokenRefreshRequired",
    "SignatureDoesNotMatch",
    "AuthFailure",
    "MissingAuthenticationToken",
    "UnrecognizedClientException",
];

/// Normalized error returned by every public adapter operation.
///
/// `status` is set for the locally-produced taxonomy (404 not found, 409
/// conflict, 500 credentials) and absent for validation failures and
/// passed-through provider errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageError {
    pub msg: String,
    pub status: Option<u16>,
}

impl StorageError {
    pub fn new(msg: impl Into<String>, status: Option<u16>) -> Self {
        Self { msg: msg.into(), status }
    }

    pub fn invalid_name(msg: impl Into<String>) -> Self {
        Self::new(msg, None)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(msg, Some(404))
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(msg, Some(409))
    }

    pub fn credentials_invalid() -> Self {
        Self::new(CREDENTIALS_INVALID, Some(500))
    }

    /// Flatten a sequence of failure messages into one error, comma-joined.
    /// An empty sequence yields the generic message.
    pub fn from_messages<I>(parts: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let joined = parts
            .into_iter()
            .map(Into::into)
            .filter(|m| !m.is_empty())
            .collect::<Vec<_>>()
            .join(", ");

        if joined.is_empty() {
            Self::new(GENERIC_ERROR, None)
        } else {
            Self::new(joined, None)
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.msg)
    }
}

impl std::error::Error for StorageError {}

impl From<&str> for StorageError {
    fn from(msg: &str) -> Self {
        Self::new(msg, None)
    }
}

impl From<String> for StorageError {
    fn from(msg: String) -> Self {
        Self::new(msg, None)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string(), None)
    }
}

impl From<ClientError> for StorageError {
    fn from(err: ClientError) -> Self {
        if is_credential_error(&err) {
            warn!(error = %err, "credential-class storage failure");
            return Self::credentials_invalid();
        }
        Self::new(err.to_string(), None)
    }
}

/// A failure is credential-class when the provider answers with an
/// unauthorized-class status or a known auth error code.
fn is_credential_error(err: &ClientError) -> bool {
    if matches!(err.status(), Some(401) | Some(403)) {
        return true;
    }
    let text = err.to_string();
    CREDENTIAL_ERROR_TOKENS.iter().any(|t| text.contains(t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_used_as_is() {
        let err = StorageError::from("foobar");
        assert_eq!(err.msg, "foobar");
        assert_eq!(err.status, None);
    }

    #[test]
    fn test_io_error_uses_its_message() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "foobar");
        let err = StorageError::from(io);
        assert_eq!(err.msg, "foobar");
    }

    #[test]
    fn test_messages_are_comma_joined() {
        let err = StorageError::from_messages(["name cannot contain '..'", "too long"]);
        assert_eq!(err.msg, "name cannot contain '..', too long");
    }

    #[test]
    fn test_no_signal_yields_generic_message() {
        let err = StorageError::from_messages(Vec::<String>::new());
        assert_eq!(err.msg, GENERIC_ERROR);
    }

    #[test]
    fn test_credential_code_is_elevated() {
        let err = StorageError::from(ClientError::Response {
            status: 400,
            code: "InvalidAccessKeyId".to_string(),
            message: "The AWS Access Key Id you provided does not exist".to_string(),
        });
        assert_eq!(err.msg, CREDENTIALS_INVALID);
        assert_eq!(err.status, Some(500));
    }

    #[test]
    fn test_forbidden_status_is_elevated() {
        let err = StorageError::from(ClientError::Response {
            status: 403,
            code: "AccessDenied".to_string(),
            message: "Access Denied".to_string(),
        });
        assert_eq!(err.msg, CREDENTIALS_INVALID);
        assert_eq!(err.status, Some(500));
    }

    #[test]
    fn test_other_provider_errors_keep_their_text() {
        let err = StorageError::from(ClientError::Response {
            status: 500,
            code: "InternalError".to_string(),
            message: "We encountered an internal error".to_string(),
        });
        assert!(err.msg.contains("InternalError"));
        assert_eq!(err.status, None);
    }
}
