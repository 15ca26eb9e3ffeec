//! Error types for the inbound router.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Ticketing error: {0}")]
    Ticketing(#[from] TicketingError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Malware scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Consistency error: {0}")]
    Consistency(#[from] ConsistencyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Address {address} is claimed by both {first} and {second}")]
    DuplicateAddress {
        address: String,
        first: String,
        second: String,
    },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Template {path}: {reason}")]
    Template { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Failures talking to a ticketing installation.
#[derive(Debug, thiserror::Error)]
pub enum TicketingError {
    #[error("HTTP request to {endpoint} failed: {reason}")]
    Http { endpoint: String, reason: String },

    #[error("{endpoint} answered {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },

    #[error("{what} not found: {name}")]
    NotFound { what: String, name: String },
}

/// Outbound mail errors.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("Failed to send via {host}: {reason}")]
    SendFailed { host: String, reason: String },

    #[error("Template {name} has no value for {{{{{placeholder}}}}}")]
    Render { name: String, placeholder: String },
}

/// Malformed inbound payloads.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Missing field {0}")]
    MissingField(&'static str),

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Unreadable MIME message")]
    Mime,

    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Malware scanner errors.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Cannot reach scanner at {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("Scanner protocol error: {0}")]
    Protocol(String),
}

/// The ticketing system broke one of its own contracts.
#[derive(Debug, thiserror::Error)]
pub enum ConsistencyError {
    #[error("Customer {address} was created but cannot be found afterwards")]
    UserVanished { address: String },
}

/// Result type alias for the router.
pub type Result<T> = std::result::Result<T, Error>;
