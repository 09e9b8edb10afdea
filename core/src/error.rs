use thiserror::Error as ThisError;

/// Machine-readable classification of a failure.
///
/// The kind decides the HTTP status code at the server boundary, and admin
/// clients reconstruct it from the status code on the way back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Conflict,
    Invalid,
    NotFound,
    NotImplemented,
    Unauthorized,
    Forbidden,
    Internal,
    BadGateway,
}

impl ErrorKind {
    /// All defined kinds, in mapping-table order.
    pub const ALL: [ErrorKind; 8] = [
        ErrorKind::Conflict,
        ErrorKind::Invalid,
        ErrorKind::NotFound,
        ErrorKind::NotImplemented,
        ErrorKind::Unauthorized,
        ErrorKind::Forbidden,
        ErrorKind::Internal,
        ErrorKind::BadGateway,
    ];

    /// The HTTP status code this kind maps to.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::Conflict => 409,
            ErrorKind::Invalid => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::NotImplemented => 501,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::Internal => 500,
            ErrorKind::BadGateway => 502,
        }
    }

    /// Reconstruct a kind from an HTTP status code. Unknown statuses come
    /// back as [`ErrorKind::Internal`].
    pub fn from_http_status(status: u16) -> Self {
        match status {
            409 => ErrorKind::Conflict,
            400 => ErrorKind::Invalid,
            404 => ErrorKind::NotFound,
            501 => ErrorKind::NotImplemented,
            401 => ErrorKind::Unauthorized,
            403 => ErrorKind::Forbidden,
            502 => ErrorKind::BadGateway,
            _ => ErrorKind::Internal,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Conflict => "conflict",
            ErrorKind::Invalid => "invalid",
            ErrorKind::NotFound => "not_found",
            ErrorKind::NotImplemented => "not_implemented",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Internal => "internal",
            ErrorKind::BadGateway => "bad_gateway",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain error: a kind plus a human-readable message.
///
/// `Clone` is deliberate; all waiters of a single-flight build receive the
/// same error value.
#[derive(Debug, Clone, ThisError)]
#[error("{message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Invalid, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotImplemented, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadGateway, message)
    }
}

/// Result type alias using the domain [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::internal(format!("sql: {err}"))
    }
}

impl From<russh::Error> for Error {
    fn from(err: russh::Error) -> Self {
        Error::internal(format!("ssh: {err}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::internal(format!("io: {err}"))
    }
}
