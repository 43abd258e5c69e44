use tap_data::{DataError, Phase};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TapError>;

#[derive(Debug, Error)]
pub enum TapError {
    #[error("client version {found} is older than the required {required}")]
    Incompatible { found: String, required: String },

    /// the service refused the query or its parameters
    #[error("query rejected by the service: {0}")]
    Validation(String),

    #[error(
        "could not rerun {job_url}: please check that the SQL query is valid, \
         and that the SQL language is correct ({message})"
    )]
    InvalidRerun { job_url: String, message: String },

    #[error("not authorized, check the API token ({0})")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("service error ({status}): {body}")]
    Service { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid service url: {0}")]
    InvalidUrl(String),

    #[error("not a job url: {0}")]
    InvalidJobUrl(String),

    #[error("job {job_url} does not belong to the service at {base_url}")]
    ForeignJobUrl { job_url: String, base_url: String },

    #[error("malformed job document: {0}")]
    Malformed(String),

    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("job {job_id} ended in phase {phase}: {message}")]
    JobFailed {
        job_id: String,
        phase: Phase,
        message: String,
    },

    #[error("job {job_id} is not finished yet (phase {phase})")]
    NotReady { job_id: String, phase: Phase },

    #[error("job {job_id} is archived, its results were discarded")]
    ResultsDiscarded { job_id: String },

    #[error("gave up waiting after {attempts} checks, job is still {phase}")]
    GaveUp { phase: Phase, attempts: u32 },

    #[error("waiting was cancelled")]
    Cancelled,

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TapError {
    pub fn is_validation(&self) -> bool {
        matches!(self, TapError::Validation(_))
    }
}
