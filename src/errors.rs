use std::fmt;

/// Pipeline-specific error types.
#[derive(Debug)]
pub enum PipelineError {
    /// Database-related errors.
    DatabaseError(sqlx::Error),
    /// Error reading or writing a blob artifact.
    StorageError(object_store::Error),
    /// Error talking to the World Bank source API.
    ExternalApiError(String),
    /// Malformed payload, artifact or cell value.
    DataError(String),
    /// Invalid configuration detected at runtime.
    ConfigError(String),
    /// Another run currently holds the refresh lock for the destination table.
    RefreshInProgress(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<PipelineError>,
        /// Additional context message.
        context: String,
    },
}

impl fmt::Display for PipelineError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::DatabaseError(e) => write!(f, "Database error: {}", e),
            PipelineError::StorageError(e) => write!(f, "Storage error: {}", e),
            PipelineError::ExternalApiError(msg) => write!(f, "External API error: {}", msg),
            PipelineError::DataError(msg) => write!(f, "Data error: {}", msg),
            PipelineError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            PipelineError::RefreshInProgress(table) => {
                write!(f, "Refresh of {} already in progress", table)
            }
            PipelineError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::DatabaseError(e) => Some(e),
            PipelineError::StorageError(e) => Some(e),
            PipelineError::WithContext { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl PipelineError {
    /// Returns true when the root cause is a blob that does not exist.
    ///
    /// A missing artifact usually means the previous step never ran.
    pub fn is_missing_artifact(&self) -> bool {
        match self {
            PipelineError::StorageError(object_store::Error::NotFound { .. }) => true,
            PipelineError::WithContext { source, .. } => source.is_missing_artifact(),
            _ => false,
        }
    }
}

impl From<sqlx::Error> for PipelineError {
    /// Converts a `sqlx::Error` into a `PipelineError`.
    fn from(err: sqlx::Error) -> Self {
        PipelineError::DatabaseError(err)
    }
}

impl From<reqwest::Error> for PipelineError {
    /// Converts a `reqwest::Error` into a `PipelineError`.
    fn from(err: reqwest::Error) -> Self {
        PipelineError::ExternalApiError(err.to_string())
    }
}

impl From<object_store::Error> for PipelineError {
    fn from(err: object_store::Error) -> Self {
        PipelineError::StorageError(err)
    }
}

impl From<csv::Error> for PipelineError {
    fn from(err: csv::Error) -> Self {
        PipelineError::DataError(format!("CSV error: {}", err))
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `PipelineError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    ///
    /// # Arguments
    ///
    /// * `context` - The context message to add.
    fn context(self, context: impl Into<String>) -> Result<T, PipelineError>;

    /// Add context lazily (only evaluated on error).
    ///
    /// # Arguments
    ///
    /// * `f` - A closure that produces the context message.
    fn with_context<F>(self, f: F) -> Result<T, PipelineError>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<PipelineError>,
{
    fn context(self, context: impl Into<String>) -> Result<T, PipelineError> {
        self.map_err(|e| PipelineError::WithContext {
            source: Box::new(e.into()),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, PipelineError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| PipelineError::WithContext {
            source: Box::new(e.into()),
            context: f(),
        })
    }
}
