//! Error types and classification of database failures
//!
//! Every public operation fails with one of four outcomes:
//!
//! - [`Error::Configuration`]: malformed mapping metadata, never retried
//! - [`Error::TransientDatabase`]: connection, timeout or protocol level failures
//! - [`Error::FatalDatabase`]: constraint, syntax, permission and conversion failures
//! - [`Error::Cancelled`]: caller cancellation or an expired per-call timeout
//!
//! Driver errors are classified exactly once, when they are converted into a
//! [`DatabaseError`]. The kind chosen there decides whether the retry pipeline
//! tries again and which [`Error`] variant the caller finally sees.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Driver stage that was running when the error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseOperation {
    /// Opening (acquiring) a connection
    Connect,
    /// Executing a statement that returns a single value
    Scalar,
    /// Executing a statement that returns an affected-row count
    NonQuery,
    /// Reading rows from a result set
    Reader,
    /// Converting a database value into a record field
    Decode,
}

impl fmt::Display for DatabaseOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Scalar => write!(f, "scalar"),
            Self::NonQuery => write!(f, "non_query"),
            Self::Reader => write!(f, "reader"),
            Self::Decode => write!(f, "decode"),
        }
    }
}

/// Category of database error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseErrorKind {
    /// Failed to establish or keep a connection
    ConnectionFailed,
    /// Operation timed out inside the driver or the server
    Timeout,
    /// Connection pool had no connection available
    PoolExhausted,
    /// Wire protocol violation, typically reported by a pooling proxy
    ProtocolViolation,
    /// Low-level socket failure
    Socket,
    /// Server is shutting down, starting up or out of resources
    ServerUnavailable,
    /// Serialization failure or deadlock; the statement can be replayed
    SerializationFailure,
    /// Constraint violation (unique, foreign key, check, not null)
    ConstraintViolation,
    /// Statement was rejected (syntax, undefined column, ...)
    QueryFailed,
    /// Permission denied
    PermissionDenied,
    /// Value could not be converted between database and record
    TypeConversion,
    /// Driver configuration error
    Configuration,
    /// Other/unknown error
    Other,
}

impl DatabaseErrorKind {
    /// Whether failures of this kind may succeed when retried
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed
                | Self::Timeout
                | Self::PoolExhausted
                | Self::ProtocolViolation
                | Self::Socket
                | Self::ServerUnavailable
                | Self::SerializationFailure
        )
    }
}

impl fmt::Display for DatabaseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed => write!(f, "connection_failed"),
            Self::Timeout => write!(f, "timeout"),
            Self::PoolExhausted => write!(f, "pool_exhausted"),
            Self::ProtocolViolation => write!(f, "protocol_violation"),
            Self::Socket => write!(f, "socket"),
            Self::ServerUnavailable => write!(f, "server_unavailable"),
            Self::SerializationFailure => write!(f, "serialization_failure"),
            Self::ConstraintViolation => write!(f, "constraint_violation"),
            Self::QueryFailed => write!(f, "query_failed"),
            Self::PermissionDenied => write!(f, "permission_denied"),
            Self::TypeConversion => write!(f, "type_conversion"),
            Self::Configuration => write!(f, "configuration"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Structured database error with operation context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseError {
    /// The driver stage running when the error occurred
    pub operation: DatabaseOperation,
    /// The category of error
    pub kind: DatabaseErrorKind,
    /// Human-readable error message
    pub message: String,
    /// SQLSTATE reported by the server, if any
    pub code: Option<String>,
    /// Additional context (e.g., repository operation, entity type)
    pub context: Option<String>,
}

impl DatabaseError {
    /// Create a new database error
    pub fn new(
        operation: DatabaseOperation,
        kind: DatabaseErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            kind,
            message: message.into(),
            code: None,
            context: None,
        }
    }

    /// Connection-level failure while opening or acquiring
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(
            DatabaseOperation::Connect,
            DatabaseErrorKind::ConnectionFailed,
            message,
        )
    }

    /// Create a type conversion error
    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::new(
            DatabaseOperation::Decode,
            DatabaseErrorKind::TypeConversion,
            message,
        )
    }

    /// Create an error from a server-reported SQLSTATE
    pub fn from_sqlstate(
        operation: DatabaseOperation,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let code = code.into();
        Self {
            operation,
            kind: classify_sqlstate(&code),
            message: message.into(),
            code: Some(code),
            context: None,
        }
    }

    /// Whether the kind is transient, so a retry may succeed
    pub fn is_retriable(&self) -> bool {
        self.kind.is_transient()
    }

    /// Attribute the error to a different driver stage
    #[must_use]
    pub fn during(mut self, operation: DatabaseOperation) -> Self {
        self.operation = operation;
        self
    }

    /// Add context to an existing error
    #[must_use]
    pub fn add_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Database {} error during {}: {}",
            self.kind, self.operation, self.message
        )?;
        if let Some(ref code) = self.code {
            write!(f, " (SQLSTATE {})", code)?;
        }
        if let Some(ref ctx) = self.context {
            write!(f, " [context: {}]", ctx)?;
        }
        Ok(())
    }
}

impl std::error::Error for DatabaseError {}

/// Map a PostgreSQL SQLSTATE onto an error kind
///
/// Connection exceptions (class 08), insufficient resources (class 53),
/// operator intervention (57P01..57P03, 57014), serialization failures and
/// deadlocks are transient; everything else is fatal.
pub fn classify_sqlstate(code: &str) -> DatabaseErrorKind {
    match code {
        "08P01" => DatabaseErrorKind::ProtocolViolation,
        "40001" | "40P01" => DatabaseErrorKind::SerializationFailure,
        "57014" => DatabaseErrorKind::Timeout,
        "57P01" | "57P02" | "57P03" => DatabaseErrorKind::ServerUnavailable,
        "42501" => DatabaseErrorKind::PermissionDenied,
        _ if code.starts_with("08") => DatabaseErrorKind::ConnectionFailed,
        _ if code.starts_with("53") => DatabaseErrorKind::ServerUnavailable,
        _ if code.starts_with("23") => DatabaseErrorKind::ConstraintViolation,
        _ if code.starts_with("22") => DatabaseErrorKind::TypeConversion,
        _ => DatabaseErrorKind::QueryFailed,
    }
}

/// Why an operation stopped before completing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller-supplied cancellation token fired
    Caller,
    /// The per-call timeout elapsed
    Timeout(Duration),
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Caller => write!(f, "cancelled by caller"),
            Self::Timeout(after) => write!(f, "timed out after {:?}", after),
        }
    }
}

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    /// Bad or missing mapping metadata
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Transient database failure that exhausted its retries
    #[error("Transient failure: {0}")]
    TransientDatabase(DatabaseError),

    /// Non-retryable database failure
    #[error("{0}")]
    FatalDatabase(DatabaseError),

    /// Operation was cancelled or timed out
    #[error("Operation {0}")]
    Cancelled(CancelReason),

    /// Settings could not be loaded
    #[error("Settings error: {0}")]
    Settings(Box<figment::Error>),
}

impl Error {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether the retry pipeline should try again
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientDatabase(_))
    }

    /// Whether this is a cancellation outcome rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// The underlying database error, if any
    pub fn database_error(&self) -> Option<&DatabaseError> {
        match self {
            Self::TransientDatabase(e) | Self::FatalDatabase(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DatabaseError> for Error {
    fn from(err: DatabaseError) -> Self {
        if err.is_retriable() {
            Error::TransientDatabase(err)
        } else {
            Error::FatalDatabase(err)
        }
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Settings(Box::new(err))
    }
}

// Single classification point for driver errors
impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::Error as E;
        match err {
            E::PoolTimedOut => Self::new(
                DatabaseOperation::Connect,
                DatabaseErrorKind::PoolExhausted,
                "Connection pool timed out",
            ),
            E::PoolClosed => Self::new(
                DatabaseOperation::Connect,
                DatabaseErrorKind::Configuration,
                "Connection pool is closed",
            ),
            E::WorkerCrashed => Self::connection_failed("Database worker crashed"),
            // Client-side protocol errors are deterministic; a server-reported
            // 08P01 arrives as E::Database and stays transient.
            E::Protocol(msg) => Self::new(
                DatabaseOperation::Reader,
                DatabaseErrorKind::QueryFailed,
                msg,
            ),
            E::Io(e) => {
                let kind = if e.kind() == std::io::ErrorKind::TimedOut {
                    DatabaseErrorKind::Timeout
                } else {
                    DatabaseErrorKind::Socket
                };
                Self::new(DatabaseOperation::Connect, kind, e.to_string())
            }
            E::Tls(e) => Self::new(
                DatabaseOperation::Connect,
                DatabaseErrorKind::Configuration,
                format!("TLS error: {}", e),
            ),
            E::Configuration(e) => Self::new(
                DatabaseOperation::Connect,
                DatabaseErrorKind::Configuration,
                e.to_string(),
            ),
            E::TypeNotFound { type_name } => {
                Self::type_conversion(format!("Type not found: {}", type_name))
            }
            E::ColumnDecode { index, source } => {
                Self::type_conversion(format!("Failed to decode column {}: {}", index, source))
            }
            E::Decode(e) => Self::type_conversion(e.to_string()),
            E::Database(db_err) => match db_err.code() {
                Some(code) => Self::from_sqlstate(
                    DatabaseOperation::Reader,
                    code.into_owned(),
                    db_err.message(),
                ),
                None => Self::new(
                    DatabaseOperation::Reader,
                    DatabaseErrorKind::QueryFailed,
                    db_err.to_string(),
                ),
            },
            other => Self::new(
                DatabaseOperation::Reader,
                DatabaseErrorKind::Other,
                other.to_string(),
            ),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::from(DatabaseError::from(err))
    }
}

/// Replace the credentials of a connection URL with `<redacted>`
pub fn sanitize_url(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(scheme_end) = url.find("://") {
            if scheme_end < at_pos {
                let scheme = &url[..scheme_end + 3];
                let after_at = &url[at_pos + 1..];
                return format!("{}<redacted>@{}", scheme, after_at);
            }
        }
    }
    url.to_string()
}
