use thiserror::Error;

/// Request-level failures raised while assembling reports.
///
/// Missing data for a single field is not an error here: it is reported as
/// `Rank::NotAvailable` on the affected value instead.
#[derive(Debug, Error)]
pub enum ReportError {
    /// The Result Store could not execute a query.
    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),

    /// The entity the request is about does not exist.
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    /// The request itself is malformed.
    #[error("invalid input: {0}")]
    Invalid(String),
}

impl ReportError {
    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        ReportError::NotFound {
            what,
            id: id.into(),
        }
    }

    /// IPC error code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            ReportError::Storage(_) => "db_query_failed",
            ReportError::NotFound { .. } => "not_found",
            ReportError::Invalid(_) => "bad_params",
        }
    }

    /// Storage failures may succeed on retry; everything else will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReportError::Storage(_))
    }
}
