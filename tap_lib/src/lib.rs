//! Driver for the asynchronous job lifecycle of a TAP service.
//!
//! A job is created PENDING with [`AsyncJob::submit`], queued with
//! [`AsyncJob::run`], waited on, and its result fetched once it is
//! COMPLETED. Handles can be rebuilt from a job url, which is what the
//! deferred submit/retrieve split stores in a [`JobUrlFile`].

pub mod archive;
pub mod error;
pub mod http;
pub mod job;
pub mod job_url;
pub mod memory;
pub mod poll;
pub mod service;
pub mod session;
pub mod sql_file;
pub mod uws;
pub mod version;

pub use archive::{archive_jobs, rerun_jobs, Rerun, RERUN_RUN_ID};
pub use error::{Result, TapError};
pub use http::HttpTapService;
pub use job::{retrieve, AsyncJob, Retrieval};
pub use job_url::JobUrlFile;
pub use memory::{Execution, MemoryTapService};
pub use poll::{poll, Backoff, PollOutcome, PollPolicy};
pub use service::TapService;
pub use session::{job_id_from_url, job_url, TapSession, DEFAULT_TIMEOUT};
pub use sql_file::{discover, submit_files, BatchReport, QueryFile, Submitted};
pub use version::{ensure_compatible, CLIENT_VERSION};
