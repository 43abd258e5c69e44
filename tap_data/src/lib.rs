//! Data types shared between the TAP job driver and its command line client.

use thiserror::Error;

pub mod job;
pub mod phase;
pub mod query;

pub use job::{JobDescription, JobFilter, JobInfo, JobParameters, JobSpec, TapResult};
pub use phase::Phase;
pub use query::{Language, Queue, WaitStrategy};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataError {
    #[error("unknown job phase: {0}")]
    UnknownPhase(String),

    #[error("unknown query language: {0} (expected PostgreSQL or ADQL)")]
    UnknownLanguage(String),

    #[error("unknown queue: {0} (expected 1m, 1h or 5h)")]
    UnknownQueue(String),

    #[error("job parameter `{0}` is missing")]
    MissingParameter(String),

    #[error("job parameter `{name}` has conflicting values `{first}` and `{second}`")]
    ConflictingParameter {
        name: String,
        first: String,
        second: String,
    },
}
