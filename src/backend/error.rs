//! Typed errors returned by the backend.
//!
//! Classification uses the machine-readable codes the backend sends
//! (auth `error_code`, SQLSTATE, PostgREST `PGRST*`), never the
//! human-readable message text.

/// Auth failures the gateway reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorCode {
    /// Wrong email or password.
    InvalidCredentials,
    /// Email already registered.
    UserAlreadyExists,
    /// Password rejected by the auth policy.
    WeakPassword,
    /// Email not yet confirmed.
    EmailNotConfirmed,
    /// Access token missing, expired or revoked.
    SessionInvalid,
    /// Anything else.
    Other,
}

impl AuthErrorCode {
    /// Maps an auth `error_code` / OAuth `error` string.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code {
            "invalid_credentials" | "invalid_grant" => Self::InvalidCredentials,
            "user_already_exists" | "email_exists" => Self::UserAlreadyExists,
            "weak_password" => Self::WeakPassword,
            "email_not_confirmed" => Self::EmailNotConfirmed,
            "session_not_found" | "bad_jwt" | "session_expired" | "no_authorization" => {
                Self::SessionInvalid
            }
            _ => Self::Other,
        }
    }
}

/// Class of a row/RPC failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Missing table, column or function: the schema is not what the
    /// gateway expects.
    Schema,
    /// Unique, foreign-key or check constraint violated.
    Constraint,
    /// Row-level security or privilege denial.
    PermissionDenied,
    /// Requested row or endpoint does not exist.
    NotFound,
    /// Anything else.
    Other,
}

impl ApiErrorKind {
    /// Classifies a SQLSTATE or PostgREST error code plus HTTP status.
    #[must_use]
    pub fn classify(code: Option<&str>, status: u16) -> Self {
        match code {
            Some("42P01" | "42703" | "42883" | "PGRST200" | "PGRST202" | "PGRST204" | "PGRST205") => {
                Self::Schema
            }
            Some(c) if c.starts_with("23") => Self::Constraint,
            Some("42501" | "PGRST301" | "PGRST302") => Self::PermissionDenied,
            Some("PGRST116") => Self::NotFound,
            _ => match status {
                401 | 403 => Self::PermissionDenied,
                404 => Self::NotFound,
                409 => Self::Constraint,
                _ => Self::Other,
            },
        }
    }
}

/// Error returned by every [`super::Backend`] call.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The request never produced a response.
    #[error("backend unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    /// The auth service rejected the request.
    #[error("auth error ({code:?}): {message}")]
    Auth {
        /// Typed reason.
        code: AuthErrorCode,
        /// Message from the auth service.
        message: String,
    },

    /// A row or RPC call failed.
    #[error("backend api error ({kind:?}, status {status}): {message}")]
    Api {
        /// Typed class.
        kind: ApiErrorKind,
        /// HTTP status.
        status: u16,
        /// Raw backend code, if any.
        code: Option<String>,
        /// Message from the backend.
        message: String,
    },

    /// The response did not have the expected shape.
    #[error("unexpected backend response: {0}")]
    Decode(String),

    /// A serverless function failed.
    #[error("function {function} failed: {message}")]
    Function {
        /// Function name.
        function: String,
        /// Failure description.
        message: String,
    },
}

impl BackendError {
    /// Shorthand for an API error.
    #[must_use]
    pub fn api(kind: ApiErrorKind, status: u16, code: Option<&str>, message: impl Into<String>) -> Self {
        Self::Api {
            kind,
            status,
            code: code.map(str::to_string),
            message: message.into(),
        }
    }

    /// Shorthand for an auth error.
    #[must_use]
    pub fn auth(code: AuthErrorCode, message: impl Into<String>) -> Self {
        Self::Auth {
            code,
            message: message.into(),
        }
    }

    /// Returns the API error class, if this is an API error.
    #[must_use]
    pub const fn api_kind(&self) -> Option<ApiErrorKind> {
        match self {
            Self::Api { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns the auth error code, if this is an auth error.
    #[must_use]
    pub const fn auth_code(&self) -> Option<AuthErrorCode> {
        match self {
            Self::Auth { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_codes_classified() {
        assert_eq!(ApiErrorKind::classify(Some("42P01"), 404), ApiErrorKind::Schema);
        assert_eq!(ApiErrorKind::classify(Some("PGRST202"), 404), ApiErrorKind::Schema);
    }

    #[test]
    fn constraint_codes_classified() {
        assert_eq!(ApiErrorKind::classify(Some("23505"), 409), ApiErrorKind::Constraint);
        assert_eq!(ApiErrorKind::classify(None, 409), ApiErrorKind::Constraint);
    }

    #[test]
    fn falls_back_to_status() {
        assert_eq!(ApiErrorKind::classify(None, 403), ApiErrorKind::PermissionDenied);
        assert_eq!(ApiErrorKind::classify(Some("P0001"), 400), ApiErrorKind::Other);
    }

    #[test]
    fn auth_codes_mapped() {
        assert_eq!(AuthErrorCode::from_code("invalid_grant"), AuthErrorCode::InvalidCredentials);
        assert_eq!(AuthErrorCode::from_code("bad_jwt"), AuthErrorCode::SessionInvalid);
        assert_eq!(AuthErrorCode::from_code("teapot"), AuthErrorCode::Other);
    }
}
