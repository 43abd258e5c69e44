use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tap_data::{JobFilter, JobSpec, Language, Phase, Queue, TapResult, WaitStrategy};
use tap_lib::{
    archive_jobs, discover, rerun_jobs, retrieve as retrieve_job, submit_files as submit_batch,
    AsyncJob, JobUrlFile, PollPolicy, QueryFile, Retrieval, TapService,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub const DEFAULT_RUN_ID: &str = "tap-client";

/// Where a query comes from and how it should be run.
#[derive(Debug, Default)]
pub struct QueryInput {
    pub query: Option<String>,
    pub file: Option<PathBuf>,
    pub language: Option<Language>,
    pub queue: Option<Queue>,
    pub run_id: Option<String>,
}

impl QueryInput {
    /// Builds the job spec, letting explicit values win over the
    /// `-- LANGUAGE` / `-- QUEUE` comments of a query file.
    pub async fn into_spec(self) -> Result<JobSpec> {
        let file = match (&self.query, &self.file) {
            (Some(_), Some(_)) => bail!("give either a query or a query file, not both"),
            (Some(query), None) => QueryFile::parse(Path::new(DEFAULT_RUN_ID), query),
            (None, Some(path)) => QueryFile::load(path)
                .await
                .with_context(|| format!("could not read query file {}", path.display()))?,
            (None, None) => bail!("no query given"),
        };
        Ok(JobSpec::new(
            &file.query,
            self.language.unwrap_or(file.language),
            self.run_id.as_deref().unwrap_or(&file.run_id),
            self.queue.unwrap_or(file.queue),
        ))
    }
}

/// How `submit` should wait for its job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitMode {
    /// pick from the queue
    Auto,
    /// wait at most this many seconds
    Bounded(u64),
    Poll,
    Detach,
}

impl WaitMode {
    pub fn strategy(self, queue: Queue) -> WaitStrategy {
        match self {
            WaitMode::Auto => queue.wait_strategy(),
            WaitMode::Bounded(_) => WaitStrategy::Bounded,
            WaitMode::Poll => WaitStrategy::SleepPoll,
            WaitMode::Detach => WaitStrategy::Deferred,
        }
    }
}

pub async fn sync<S: TapService>(
    service: &S,
    input: QueryInput,
    output: Option<&Path>,
) -> Result<String> {
    let spec = input.into_spec().await?;
    let result = service.run_sync(&spec.query, spec.language).await?;
    write_output(&result, output).await
}

pub async fn submit<S: TapService>(
    service: &S,
    input: QueryInput,
    mode: WaitMode,
    job_url_file: &JobUrlFile,
    output: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<String> {
    let spec = input.into_spec().await?;
    let job = AsyncJob::submit(service, &spec).await?;
    job.run().await?;
    info!("submitted {} to queue {}", job.url(), spec.queue);

    let phase = match mode.strategy(spec.queue) {
        WaitStrategy::Bounded => {
            let timeout = match mode {
                WaitMode::Bounded(secs) => std::time::Duration::from_secs(secs),
                _ => spec.queue.expected_duration(),
            };
            job.wait_with(&Phase::FINISHED, timeout, cancel).await?
        }
        WaitStrategy::SleepPoll => {
            let policy = PollPolicy::for_queue(spec.queue);
            job.poll_until(&Phase::FINISHED, &policy, cancel).await?
        }
        WaitStrategy::Deferred => return detach(&job, job_url_file).await,
    };

    if !phase.is_terminal() {
        let mut message = format!("job {} is still {}\n", job.url(), phase);
        message.push_str(&detach(&job, job_url_file).await?);
        return Ok(message);
    }
    let result = job.fetch_result().await?;
    let written = write_output(&result, output).await?;
    Ok(format!("job {} is {}\n{}", job.url(), phase, written))
}

async fn detach<S: TapService>(job: &AsyncJob<'_, S>, job_url_file: &JobUrlFile) -> Result<String> {
    job_url_file.write(job.url()).await.with_context(|| {
        format!(
            "could not store job url in {}",
            job_url_file.path().display()
        )
    })?;
    Ok(format!(
        "job url stored in {}, fetch the result later with `tap-client retrieve`",
        job_url_file.path().display()
    ))
}

pub async fn retrieve<S: TapService>(
    service: &S,
    job_url: Option<&str>,
    job_url_file: &JobUrlFile,
    output: Option<&Path>,
) -> Result<String> {
    let url = match job_url {
        Some(url) => url.to_string(),
        None => job_url_file.read().await.with_context(|| {
            format!(
                "could not read job url from {}",
                job_url_file.path().display()
            )
        })?,
    };
    match retrieve_job(service, &url).await? {
        Retrieval::Pending(phase) => Ok(format!("job {} is still {}", url, phase)),
        Retrieval::Ready(result) => write_output(&result, output).await,
    }
}

pub async fn status<S: TapService>(service: &S, job_url: &str) -> Result<String> {
    let job = AsyncJob::from_url(service, job_url)?;
    let info = job.info().await?;
    let mut lines = vec![
        format!("job:      {}", job.url()),
        format!("phase:    {}", info.phase),
        format!("run id:   {}", info.run_id.as_deref().unwrap_or("-")),
    ];
    // parameters are informational here, a job without them is still shown
    if let Ok(language) = info.language() {
        lines.push(format!("language: {}", language));
    }
    if let Some(error) = &info.error_summary {
        lines.push(format!("error:    {}", error));
    }
    if let Ok(query) = info.query() {
        lines.push(String::new());
        lines.push(query.trim().to_string());
    }
    Ok(lines.join("\n"))
}

pub async fn list<S: TapService>(service: &S, filter: &JobFilter, json: bool) -> Result<String> {
    let jobs = service.list_jobs(filter).await?;
    if json {
        return Ok(serde_json::to_string_pretty(&jobs)?);
    }
    if jobs.is_empty() {
        return Ok("no jobs".to_string());
    }
    let lines: Vec<String> = jobs
        .iter()
        .map(|job| {
            format!(
                "{:<12} {:<10} {:<30} {}",
                job.job_id,
                job.phase,
                job.run_id.as_deref().unwrap_or("-"),
                job.creation_time.as_deref().unwrap_or("")
            )
            .trim_end()
            .to_string()
        })
        .collect();
    Ok(lines.join("\n"))
}

pub async fn archive<S: TapService>(service: &S, filter: &JobFilter) -> Result<String> {
    let archived = archive_jobs(service, filter).await?;
    if archived.is_empty() {
        return Ok("no jobs to archive".to_string());
    }
    let lines: Vec<String> = archived
        .iter()
        .map(|url| format!("archived {}", url))
        .collect();
    Ok(lines.join("\n"))
}

pub async fn rerun<S: TapService>(
    service: &S,
    filter: &JobFilter,
    queue: Queue,
    run_id: &str,
) -> Result<String> {
    let reruns = rerun_jobs(service, filter, queue, run_id).await?;
    if reruns.is_empty() {
        return Ok("no jobs to rerun".to_string());
    }
    let blocks: Vec<String> = reruns
        .iter()
        .map(|rerun| {
            format!(
                "{} -> {} ({}):\n{}\n",
                rerun.source_url,
                rerun.job_url,
                rerun.language,
                rerun.query.trim()
            )
        })
        .collect();
    Ok(blocks.join("\n"))
}

/// Submits every `.sql` file of `dir`; with `wait`, waits on each job in turn.
pub async fn submit_files<S: TapService>(
    service: &S,
    dir: &Path,
    wait: Option<u64>,
    cancel: &CancellationToken,
) -> Result<String> {
    let paths = discover(dir)
        .await
        .with_context(|| format!("could not list {}", dir.display()))?;
    let mut lines = vec![format!("sending {} queries", paths.len())];
    let report = submit_batch(service, &paths).await;
    for submitted in &report.submitted {
        let mut line = format!(
            "{} ({}): {}",
            submitted.run_id, submitted.queue, submitted.job_url
        );
        if let Some(secs) = wait {
            let job = AsyncJob::from_url(service, &submitted.job_url)?;
            let phase = job
                .wait_with(
                    &Phase::FINISHED,
                    std::time::Duration::from_secs(secs),
                    cancel,
                )
                .await?;
            line.push_str(&format!(" {}", phase));
        }
        lines.push(line);
    }
    for (path, err) in &report.failures {
        lines.push(format!("failed {}: {}", path.display(), err));
    }
    if !report.is_success() {
        bail!("{}\n{} of {} queries failed", lines.join("\n"), report.failures.len(), paths.len());
    }
    Ok(lines.join("\n"))
}

/// Writes the payload to `output`, or returns it as text when there is none.
pub async fn write_output(result: &TapResult, output: Option<&Path>) -> Result<String> {
    match output {
        Some(path) => {
            tokio::fs::write(path, result.body())
                .await
                .with_context(|| format!("could not write {}", path.display()))?;
            Ok(format!("wrote {} bytes to {}", result.len(), path.display()))
        }
        None => Ok(result.text()),
    }
}
