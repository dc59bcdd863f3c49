//! Error types for Tenantry operations.

use std::fmt;

/// The primary error type for all Tenantry operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors reported by the store collaborator
    Connection(ConnectionError),
    /// Query execution errors
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Transaction errors
    Transaction(TransactionError),
    /// Record declaration errors
    Config(ConfigError),
    /// Required-field validation errors, aggregated per batch
    Validation(ValidationError),
    /// Column encode/decode errors
    Codec(CodecError),
    /// A record addressed by primary key does not exist
    NotFound(NotFoundError),
    /// A store error wrapped with the table and stage that produced it
    Operation(OperationError),
    /// Serialization/deserialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connection lost during operation
    Disconnected,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub sqlstate: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Serialization failure
    Serialization,
    /// The store returned a result the engine cannot use
    UnexpectedResult,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
    pub rust_type: Option<&'static str>,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// Could not open a transaction
    Begin,
    /// Commit failed
    Commit,
    /// Rollback failed
    Rollback,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }
}

/// Validation errors collected across a whole batch.
#[derive(Debug, Clone, Default)]
pub struct ValidationError {
    /// Distinct failures in first-seen order
    pub errors: Vec<FieldValidationError>,
}

/// A single validation error for a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldValidationError {
    /// Qualified field name (`Type.field`)
    pub field: String,
    /// The kind of validation that failed
    pub kind: ValidationErrorKind,
    /// Human-readable error message
    pub message: String,
}

/// The type of validation constraint that was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// Required field is missing or empty
    Required,
    /// Custom validation failed
    Custom,
}

impl ValidationError {
    /// Create a new empty validation error container.
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Check if there are any validation errors.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add a field validation error. Exact duplicates are dropped.
    pub fn add(
        &mut self,
        field: impl Into<String>,
        kind: ValidationErrorKind,
        message: impl Into<String>,
    ) {
        let error = FieldValidationError {
            field: field.into(),
            kind,
            message: message.into(),
        };
        if !self.errors.contains(&error) {
            self.errors.push(error);
        }
    }

    /// Add a required field error.
    pub fn add_required(&mut self, field: impl Into<String>) {
        self.add(field, ValidationErrorKind::Required, "is required");
    }
}

/// Column codec failure with the table and column it happened on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecError {
    pub table: String,
    pub column: String,
    pub kind: CodecErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecErrorKind {
    /// Encryption key has the wrong length
    KeySize { expected: usize, actual: usize },
    /// An encrypted column was used without a configured key
    MissingKey,
    /// Ciphertext is shorter than its nonce
    Truncated { len: usize },
    /// The cipher refused to encrypt
    Encrypt,
    /// Authentication or decryption failed
    Decrypt,
    /// Encrypted columns must be stored as text
    NotText { actual: &'static str },
    /// Stored ciphertext is not valid base64
    Base64(String),
    /// JSON (de)serialization failed
    Json(String),
    /// Decrypted bytes are not UTF-8 text
    Utf8,
    /// The field value cannot be encrypted
    Unsupported { actual: &'static str },
}

/// A primary-key addressed record that does not exist under the tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotFoundError {
    pub table: String,
    pub primary_key: String,
}

/// Pipeline stage that was talking to the store when an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Begin,
    Resolve,
    Insert,
    Update,
    FindOrphans,
    DeleteOrphans,
    Delete,
    Commit,
}

#[derive(Debug)]
pub struct OperationError {
    pub table: String,
    pub operation: Operation,
    pub source: Box<Error>,
}

impl Error {
    /// Wrap a store error with the table and stage that produced it.
    ///
    /// Errors raised by the engine itself (validation, codec, config,
    /// not-found, already wrapped) pass through unchanged.
    pub fn in_operation(self, table: &str, operation: Operation) -> Self {
        match self {
            Error::Connection(_) | Error::Query(_) | Error::Transaction(_) | Error::Type(_) => {
                Error::Operation(OperationError {
                    table: table.to_string(),
                    operation,
                    source: Box::new(self),
                })
            }
            other => other,
        }
    }

    /// Is this a `ModelNotFound` error?
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Get SQLSTATE if available (e.g., "23505" for unique violation)
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sqlstate.as_deref(),
            Error::Operation(op) => op.source.sqlstate(),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            Error::Operation(op) => op.source.sql(),
            _ => None,
        }
    }
}

impl QueryError {
    /// Error for a result shape the engine cannot use.
    pub fn unexpected(message: impl Into<String>, sql: &str) -> Self {
        Self {
            kind: QueryErrorKind::UnexpectedResult,
            sql: Some(sql.to_string()),
            sqlstate: None,
            message: message.into(),
            source: None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => {
                if let Some(sqlstate) = &e.sqlstate {
                    write!(f, "Query error (SQLSTATE {}): {}", sqlstate, e.message)
                } else {
                    write!(f, "Query error: {}", e.message)
                }
            }
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Validation(e) => write!(f, "Validation error: {}", e),
            Error::Codec(e) => write!(f, "Codec error: {}", e),
            Error::NotFound(e) => write!(f, "{}", e),
            Error::Operation(e) => write!(f, "{}", e),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Operation(e) => Some(e.source.as_ref()),
            _ => None,
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            write!(f, "validation passed")
        } else if self.errors.len() == 1 {
            let err = &self.errors[0];
            write!(f, "validation error on '{}': {}", err.field, err.message)
        } else {
            writeln!(f, "validation errors:")?;
            for err in &self.errors {
                writeln!(f, "  - {}: {}", err.field, err.message)?;
            }
            Ok(())
        }
    }
}

impl std::error::Error for ValidationError {}

impl fmt::Display for CodecErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecErrorKind::KeySize { expected, actual } => {
                write!(f, "encryption key must be {} bytes, got {}", expected, actual)
            }
            CodecErrorKind::MissingKey => write!(f, "no encryption key configured"),
            CodecErrorKind::Truncated { len } => {
                write!(f, "ciphertext too small ({} bytes)", len)
            }
            CodecErrorKind::Encrypt => write!(f, "encryption failed"),
            CodecErrorKind::Decrypt => write!(f, "decryption failed"),
            CodecErrorKind::NotText { actual } => {
                write!(f, "encrypted value must be stored as text, found {}", actual)
            }
            CodecErrorKind::Base64(msg) => write!(f, "invalid base64: {}", msg),
            CodecErrorKind::Json(msg) => write!(f, "invalid JSON: {}", msg),
            CodecErrorKind::Utf8 => write!(f, "decrypted value is not valid UTF-8"),
            CodecErrorKind::Unsupported { actual } => {
                write!(f, "cannot encrypt a {} value", actual)
            }
        }
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: {}", self.table, self.column, self.kind)
    }
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "model not found: no row in '{}' with primary key {}",
            self.table, self.primary_key
        )
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} on '{}' failed: {}",
            self.operation, self.table, self.source
        )
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Validation(err)
    }
}

impl From<CodecError> for Error {
    fn from(err: CodecError) -> Self {
        Error::Codec(err)
    }
}

impl From<NotFoundError> for Error {
    fn from(err: NotFoundError) -> Self {
        Error::NotFound(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for Tenantry operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_violation() -> Error {
        Error::Query(QueryError {
            kind: QueryErrorKind::Constraint,
            sql: Some("INSERT INTO \"items\" DEFAULT VALUES".to_string()),
            sqlstate: Some("23505".to_string()),
            message: "unique violation".to_string(),
            source: None,
        })
    }

    #[test]
    fn test_store_errors_are_wrapped_with_context() {
        let err = unique_violation().in_operation("items", Operation::Insert);
        match &err {
            Error::Operation(op) => {
                assert_eq!(op.table, "items");
                assert_eq!(op.operation, Operation::Insert);
            }
            other => std::panic::panic_any(format!("unexpected: {other:?}")),
        }
        assert_eq!(err.sqlstate(), Some("23505"));
        assert!(err.sql().is_some());
        assert!(err.to_string().contains("Insert on 'items'"));
    }

    #[test]
    fn test_engine_errors_pass_through_unwrapped() {
        let err = Error::NotFound(NotFoundError {
            table: "items".to_string(),
            primary_key: "7".to_string(),
        })
        .in_operation("items", Operation::Update);
        assert!(err.is_not_found());
    }

    #[test]
    fn test_validation_errors_deduplicate() {
        let mut errors = ValidationError::new();
        errors.add_required("Item.name");
        errors.add_required("Item.name");
        errors.add_required("Item.code");

        assert_eq!(errors.errors.len(), 2);
        assert!(errors.to_string().contains("Item.code"));
        assert!(ValidationError::new().is_empty());
    }

    #[test]
    fn test_codec_error_names_column() {
        let err = Error::Codec(CodecError {
            table: "secrets".to_string(),
            column: "token".to_string(),
            kind: CodecErrorKind::Truncated { len: 3 },
        });
        assert_eq!(
            err.to_string(),
            "Codec error: secrets.token: ciphertext too small (3 bytes)"
        );
    }
}
