//! Error types for query loading and execution
//!
//! Every layer of the pipeline returns [`QueryError`]. Recognized kinds pass
//! through middlewares untouched so callers can match on them; only
//! [`QueryError::Other`] is treated as unrecognized and gets wrapped into
//! [`QueryError::Runtime`] by the query executor.

use thiserror::Error;

/// Boxed error used as the low-level cause of driver failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type for query operations
#[derive(Error, Debug)]
pub enum QueryError {
    /// A single-result accessor found nothing
    #[error("No result: {0}")]
    NoResult(String),

    /// A single-result accessor found more than one row or scalar
    #[error("Non-unique result: {0}")]
    NonUniqueResult(String),

    /// The underlying driver failed to execute a statement
    #[error("{message}")]
    Execution {
        message: String,
        #[source]
        source: DriverError,
    },

    /// Begin, commit or rollback failed at the driver level
    #[error("{message}")]
    Transaction {
        message: String,
        #[source]
        source: DriverError,
    },

    /// Reading rows from a driver cursor failed
    #[error("{message}")]
    Driver {
        message: String,
        #[source]
        source: DriverError,
    },

    /// A query source could not be located by any loader
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    /// A query source was found but could not be compiled
    #[error("Syntax error: {0}")]
    Syntax(String),

    /// The requested executor is not registered
    #[error("Executor \"{0}\" does not exist.")]
    ExecutorNotFound(String),

    /// Invalid argument supplied by the caller
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The API was used in a way that can never succeed
    #[error("Logic error: {0}")]
    Logic(String),

    /// Configuration could not be read or is invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Catch-all for unrecognized failures surfacing through the pipeline
    #[error("{message}")]
    Runtime {
        message: String,
        #[source]
        source: BoxError,
    },

    /// Unrecognized failure raised by a custom middleware or collaborator
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;

impl QueryError {
    /// Create a no-result error
    pub fn no_result<S: Into<String>>(msg: S) -> Self {
        Self::NoResult(msg.into())
    }

    /// Create a non-unique-result error
    pub fn non_unique_result<S: Into<String>>(msg: S) -> Self {
        Self::NonUniqueResult(msg.into())
    }

    /// Create an execution error wrapping a driver failure
    pub fn execution<S: Into<String>>(msg: S, source: DriverError) -> Self {
        Self::Execution {
            message: msg.into(),
            source,
        }
    }

    /// Create a transaction error wrapping a driver failure
    pub fn transaction<S: Into<String>>(msg: S, source: DriverError) -> Self {
        Self::Transaction {
            message: msg.into(),
            source,
        }
    }

    /// Create a driver error raised while reading results
    pub fn driver<S: Into<String>>(msg: S, source: DriverError) -> Self {
        Self::Driver {
            message: msg.into(),
            source,
        }
    }

    /// Create a runtime error
    pub fn runtime<S: Into<String>>(msg: S, source: impl Into<BoxError>) -> Self {
        Self::Runtime {
            message: msg.into(),
            source: source.into(),
        }
    }

    /// Create a source-not-found error
    pub fn source_not_found<S: Into<String>>(msg: S) -> Self {
        Self::SourceNotFound(msg.into())
    }

    /// Create an invalid-argument error
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a logic error
    pub fn logic<S: Into<String>>(msg: S) -> Self {
        Self::Logic(msg.into())
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Check if the error reports an empty result
    pub fn is_no_result(&self) -> bool {
        matches!(self, Self::NoResult(_))
    }

    /// Check if the error reports more results than expected
    pub fn is_non_unique_result(&self) -> bool {
        matches!(self, Self::NonUniqueResult(_))
    }

    /// Check if the error is one of the known kinds
    ///
    /// Known kinds are propagated unchanged by the middleware chain.
    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

/// Failure reported by a [`Connection`](crate::executor::Connection) or a row cursor
#[derive(Error, Debug)]
#[error("{message}")]
pub struct DriverError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

/// Result type for driver operations
pub type DriverResult<T> = Result<T, DriverError>;

impl DriverError {
    /// Create a driver error from a message
    pub fn new<S: Into<String>>(msg: S) -> Self {
        Self {
            message: msg.into(),
            source: None,
        }
    }

    /// Wrap a lower-level error, reusing its message
    pub fn wrap<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// Create a driver error with a message and a lower-level cause
    pub fn with_source<S, E>(msg: S, err: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: msg.into(),
            source: Some(Box::new(err)),
        }
    }

    /// The driver-level message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<std::io::Error> for DriverError {
    fn from(err: std::io::Error) -> Self {
        Self::wrap(err)
    }
}
