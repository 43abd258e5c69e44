use tap_data::{JobFilter, JobSpec, Language, Queue};
use tracing::{info, instrument};

use crate::{
    error::{Result, TapError},
    job::AsyncJob,
    service::TapService,
};

pub const RERUN_RUN_ID: &str = "rerun";

/// Archives every job matching `filter`, returning their urls.
#[instrument(skip(service))]
pub async fn archive_jobs<S: TapService>(service: &S, filter: &JobFilter) -> Result<Vec<String>> {
    let mut archived = Vec::new();
    for description in service.list_jobs(filter).await? {
        let url = service.job_url(&description.job_id);
        let job = AsyncJob::from_url(service, &url)?;
        info!("archiving {}", url);
        job.delete().await?;
        archived.push(url);
    }
    Ok(archived)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rerun {
    /// the job whose query was resubmitted
    pub source_url: String,
    pub job_url: String,
    pub query: String,
    pub language: Language,
}

/// Resubmits the query of every job matching `filter` as a new running job.
///
/// Stops at the first job the service refuses to run; a refusal caused by
/// the query itself is reported as [`TapError::InvalidRerun`].
#[instrument(skip(service))]
pub async fn rerun_jobs<S: TapService>(
    service: &S,
    filter: &JobFilter,
    queue: Queue,
    run_id: &str,
) -> Result<Vec<Rerun>> {
    let mut reruns = Vec::new();
    for description in service.list_jobs(filter).await? {
        let source_url = service.job_url(&description.job_id);
        let source = AsyncJob::from_url(service, &source_url)?;
        let parameters = source.info().await?;
        let query = parameters.query()?.to_string();
        let language = parameters.language()?;

        let spec = JobSpec::new(&query, language, run_id, queue);
        let job = AsyncJob::submit(service, &spec)
            .await
            .map_err(|err| invalid_rerun(&source_url, err))?;
        job.run()
            .await
            .map_err(|err| invalid_rerun(&source_url, err))?;
        info!("reran {} as {}", source_url, job.url());
        reruns.push(Rerun {
            source_url,
            job_url: job.url().to_string(),
            query,
            language,
        });
    }
    Ok(reruns)
}

fn invalid_rerun(job_url: &str, err: TapError) -> TapError {
    match err {
        TapError::Validation(message) => TapError::InvalidRerun {
            job_url: job_url.to_string(),
            message,
        },
        other => other,
    }
}
