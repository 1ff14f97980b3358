use datafusion::{arrow::error::ArrowError, error::DataFusionError};
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("DataFusion: {0}")]
    DataFusion(#[from] DataFusionError),

    #[error("Arrow: {0}")]
    Arrow(#[from] ArrowError),

    #[error("API responded with error: {0}")]
    ApiFailure(#[from] reqwest::Error),

    #[error("Failed to parse URL: {0}")]
    UrlParsingFailed(#[from] url::ParseError),

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("'The date supplied {date} is invalid'")]
    InvalidDate { date: String },

    #[error("The start date: '{start_date}' is greater than the end date: '{end_date}'")]
    InvalidDateRange {
        start_date: String,
        end_date: String,
    },

    #[error("Unknown report type '{report_type}'")]
    UnknownReportType { report_type: String },

    #[error("Invalid configuration for report '{report_type}': {reason}")]
    InvalidConfiguration { report_type: String, reason: String },

    #[error("No report types selected")]
    EmptyReportSelection,

    #[error("Invalid trigger payload: {reason}")]
    InvalidTrigger { reason: String },

    #[error("Reporting API returned {status} during {operation}")]
    TransientStatus {
        operation: &'static str,
        status: StatusCode,
    },

    #[error("Report job {job_id} failed on the reporting side")]
    ReportJobFailed { job_id: String },

    #[error("Report job {job_id} was not ready after {waited:?}")]
    ReportTimeout { job_id: String, waited: Duration },

    #[error("Failed to {phase} report after {attempts} attempt(s): {source}")]
    ReportFetchError {
        phase: &'static str,
        attempts: u32,
        source: Box<Error>,
    },

    #[error("Malformed row {index}: {reason}")]
    MalformedRow { index: usize, reason: String },

    #[error("Schema mismatch on table {table}: {reason}")]
    SchemaMismatch { table: String, reason: String },

    #[error("Failed to load into table {table}: {reason}")]
    LoadError { table: String, reason: String },

    #[error("Credentials unavailable: {reason}")]
    CredentialError { reason: String },
}

impl Error {
    /// Whether retrying the same call may succeed: connection problems,
    /// timeouts, rate limiting and server-side errors.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::TransientStatus { .. } => true,
            Error::ApiFailure(err) => {
                err.is_timeout()
                    || err.is_connect()
                    || err
                        .status()
                        .is_some_and(|s| s == StatusCode::TOO_MANY_REQUESTS || s.is_server_error())
            }
            _ => false,
        }
    }
}
