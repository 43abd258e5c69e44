use tap_data::{JobDescription, JobFilter, JobInfo, JobSpec, Language, Phase, TapResult};

use crate::{error::Result, session};

/// The remote TAP service as seen by the job driver.
///
/// Implemented over HTTP by [`crate::HttpTapService`] and in process by
/// [`crate::MemoryTapService`]. Every method is a single request: nothing
/// here retries.
#[allow(async_fn_in_trait)]
pub trait TapService {
    /// base url without trailing slash, e.g. `https://www.cosmosim.org/tap`
    fn base_url(&self) -> &str;

    fn job_url(&self, job_id: &str) -> String {
        session::job_url(self.base_url(), job_id)
    }

    /// runs a short query and returns its result directly
    async fn run_sync(&self, query: &str, language: Language) -> Result<TapResult>;

    /// creates a job in PENDING and returns its id
    async fn create_job(&self, spec: &JobSpec) -> Result<String>;

    /// moves a PENDING job into the execution queue
    async fn start_job(&self, job_id: &str) -> Result<()>;

    async fn phase(&self, job_id: &str) -> Result<Phase>;

    async fn job_info(&self, job_id: &str) -> Result<JobInfo>;

    /// the stored result of a COMPLETED job
    async fn fetch_result(&self, job_id: &str) -> Result<TapResult>;

    /// archives the job: results are discarded, the query is kept
    async fn delete_job(&self, job_id: &str) -> Result<()>;

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobDescription>>;
}
