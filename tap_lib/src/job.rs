use std::{ops::ControlFlow, time::Duration};

use tap_data::{JobInfo, JobSpec, Language, Phase, TapResult};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::{
    error::{Result, TapError},
    poll::{poll, PollOutcome, PollPolicy},
    service::TapService,
    session,
};

/// Handle on one asynchronous job of a [`TapService`].
///
/// The handle only holds the job id and url; every accessor asks the
/// service, so a handle rebuilt from a persisted url behaves exactly like
/// the one returned by [`AsyncJob::submit`].
#[derive(Debug)]
pub struct AsyncJob<'s, S: TapService> {
    service: &'s S,
    job_id: String,
    url: String,
}

impl<'s, S: TapService> AsyncJob<'s, S> {
    /// creates the job, it stays PENDING until [`AsyncJob::run`]
    pub async fn submit(service: &'s S, spec: &JobSpec) -> Result<AsyncJob<'s, S>> {
        let job_id = service.create_job(spec).await?;
        let url = service.job_url(&job_id);
        Ok(AsyncJob {
            service,
            job_id,
            url,
        })
    }

    /// Rebuilds the handle of a job created earlier on `service`.
    ///
    /// A url naming a job of another service is refused, since the job id
    /// alone would be looked up on the wrong host.
    pub fn from_url(service: &'s S, url: &str) -> Result<AsyncJob<'s, S>> {
        let url = url.trim();
        let job_id = session::job_id_from_url(url)?;
        if url.trim_end_matches('/') != service.job_url(&job_id) {
            return Err(TapError::ForeignJobUrl {
                job_url: url.to_string(),
                base_url: service.base_url().to_string(),
            });
        }
        Ok(AsyncJob {
            service,
            job_id,
            url: url.to_string(),
        })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn run(&self) -> Result<()> {
        self.service.start_job(&self.job_id).await
    }

    pub async fn phase(&self) -> Result<Phase> {
        self.service.phase(&self.job_id).await
    }

    pub async fn info(&self) -> Result<JobInfo> {
        self.service.job_info(&self.job_id).await
    }

    /// query text exactly as submitted
    pub async fn query(&self) -> Result<String> {
        Ok(self.info().await?.query()?.to_string())
    }

    pub async fn language(&self) -> Result<Language> {
        Ok(self.info().await?.language()?)
    }

    pub async fn run_id(&self) -> Result<Option<String>> {
        Ok(self.info().await?.run_id)
    }

    /// Waits up to `timeout` for the job to reach one of `phases`.
    ///
    /// Returns the phase observed last, which is not in `phases` when the
    /// timeout expired. A terminal phase also ends the wait.
    pub async fn wait(&self, phases: &[Phase], timeout: Duration) -> Result<Phase> {
        self.wait_with(phases, timeout, &CancellationToken::new())
            .await
    }

    pub async fn wait_with(
        &self,
        phases: &[Phase],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Phase> {
        let outcome = self
            .watch(phases, &PollPolicy::bounded(timeout), cancel)
            .await?;
        if !outcome.is_ready() {
            debug!("job {} not done after {:?}", self.job_id, timeout);
        }
        Ok(outcome.into_inner())
    }

    /// Polls until the job reaches one of `phases`, giving up with
    /// [`TapError::GaveUp`] when `policy` runs out of attempts or time.
    pub async fn poll_until(
        &self,
        phases: &[Phase],
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<Phase> {
        match self.watch(phases, policy, cancel).await? {
            PollOutcome::Ready(phase) => Ok(phase),
            PollOutcome::TimedOut {
                value: phase,
                attempts,
            }
            | PollOutcome::Exhausted {
                value: phase,
                attempts,
            } => Err(TapError::GaveUp { phase, attempts }),
        }
    }

    async fn watch(
        &self,
        phases: &[Phase],
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<PollOutcome<Phase>> {
        poll(policy, cancel, || async {
            let phase = self.phase().await?;
            // terminal phases only ever move on to ARCHIVED
            Ok(if phases.contains(&phase) || phase.is_terminal() {
                ControlFlow::Break(phase)
            } else {
                ControlFlow::Continue(phase)
            })
        })
        .await
    }

    /// fails with the stored error summary if the job ended in ERROR or ABORTED
    pub async fn raise_if_error(&self) -> Result<()> {
        let info = self.info().await?;
        if info.phase.is_error() {
            return Err(failure(info));
        }
        Ok(())
    }

    /// Result of a COMPLETED job. Can be called any number of times.
    #[instrument(skip(self), fields(job_id = %self.job_id))]
    pub async fn fetch_result(&self) -> Result<TapResult> {
        let info = self.info().await?;
        match info.phase {
            Phase::Completed => self.service.fetch_result(&self.job_id).await,
            Phase::Archived => Err(TapError::ResultsDiscarded {
                job_id: info.job_id,
            }),
            phase if phase.is_error() => Err(failure(info)),
            phase => Err(TapError::NotReady {
                job_id: info.job_id,
                phase,
            }),
        }
    }

    /// archives the job, the service drops its results
    pub async fn delete(self) -> Result<()> {
        self.service.delete_job(&self.job_id).await?;
        info!("archived {}", self.url);
        Ok(())
    }
}

fn failure(info: JobInfo) -> TapError {
    TapError::JobFailed {
        job_id: info.job_id,
        phase: info.phase,
        message: info
            .error_summary
            .unwrap_or_else(|| "the service gave no error summary".to_string()),
    }
}

/// What a deferred retrieval found.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Retrieval {
    /// the job has not finished, try again later
    Pending(Phase),
    Ready(TapResult),
}

/// Looks up a job submitted earlier and fetches its result if it is done.
///
/// Jobs that ended in ERROR or ABORTED report [`TapError::JobFailed`].
pub async fn retrieve<S: TapService>(service: &S, url: &str) -> Result<Retrieval> {
    let job = AsyncJob::from_url(service, url)?;
    let phase = job.phase().await?;
    if !phase.is_terminal() {
        info!("job {} is still {}", job.job_id(), phase);
        return Ok(Retrieval::Pending(phase));
    }
    Ok(Retrieval::Ready(job.fetch_result().await?))
}

#[cfg(test)]
mod test {
    use std::{sync::Once, time::Duration};

    use lazy_static::lazy_static;
    use tap_data::{JobSpec, Language, Phase, Queue};
    use tokio::runtime::Runtime;
    use tokio_util::sync::CancellationToken;

    use super::{retrieve, AsyncJob, Retrieval};
    use crate::{
        error::TapError,
        memory::{Execution, MemoryTapService},
        poll::PollPolicy,
    };

    lazy_static! {
        static ref RUNTIME: Runtime = Runtime::new().unwrap();
    }
    static INIT: Once = Once::new();

    pub fn setup() {
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt::try_init();
        });
    }

    fn spec(query: &str) -> JobSpec {
        JobSpec::new(query, Language::PostgreSql, "test", Queue::OneMinute)
    }

    #[test]
    fn test_submit_stays_pending() {
        setup();
        let service = MemoryTapService::default();
        RUNTIME.block_on(async {
            let job = AsyncJob::submit(&service, &spec("SELECT 1")).await.unwrap();
            assert_eq!("memory://tap/async/1", job.url());
            assert_eq!(Phase::Pending, job.phase().await.unwrap());
            assert_eq!("SELECT 1", job.query().await.unwrap());
            assert_eq!(Language::PostgreSql, job.language().await.unwrap());
            assert_eq!(Some("test".to_string()), job.run_id().await.unwrap());
        });
    }

    #[test]
    fn test_wait_returns_phase_on_timeout() {
        setup();
        let service = MemoryTapService::default().with_executor(|_| Execution::Hang);
        RUNTIME.block_on(async {
            let job = AsyncJob::submit(&service, &spec("SELECT 1")).await.unwrap();
            job.run().await.unwrap();
            let phase = job
                .wait(&Phase::FINISHED, Duration::from_millis(300))
                .await
                .unwrap();
            assert_eq!(Phase::Executing, phase);
        });
    }

    #[test]
    fn test_poll_until_gives_up() {
        setup();
        let service = MemoryTapService::default().with_executor(|_| Execution::Hang);
        RUNTIME.block_on(async {
            let job = AsyncJob::submit(&service, &spec("SELECT 1")).await.unwrap();
            job.run().await.unwrap();
            let policy = PollPolicy::fixed(Duration::from_millis(1)).with_max_attempts(5);
            let outcome = job
                .poll_until(&Phase::FINISHED, &policy, &CancellationToken::new())
                .await;
            match outcome {
                Err(TapError::GaveUp { phase, attempts }) => {
                    assert_eq!(Phase::Executing, phase);
                    assert_eq!(5, attempts);
                }
                other => panic!("expected to give up, got: {:?}", other),
            }
        });
    }

    #[test]
    fn test_fetch_failed_job() {
        setup();
        let service = MemoryTapService::default()
            .with_executor(|_| Execution::Fail("division by zero".to_string()));
        RUNTIME.block_on(async {
            let job = AsyncJob::submit(&service, &spec("SELECT 1/0")).await.unwrap();
            job.run().await.unwrap();
            let phase = job.wait(&Phase::FINISHED, Duration::from_secs(5)).await.unwrap();
            assert_eq!(Phase::Error, phase);
            match job.fetch_result().await {
                Err(TapError::JobFailed { message, .. }) => {
                    assert_eq!("division by zero", message)
                }
                other => panic!("expected job failure, got: {:?}", other),
            }
            assert!(job.raise_if_error().await.is_err());
        });
    }

    #[test]
    fn test_fetch_archived_job() {
        setup();
        let service = MemoryTapService::default();
        RUNTIME.block_on(async {
            let job = AsyncJob::submit(&service, &spec("SELECT 1")).await.unwrap();
            job.run().await.unwrap();
            job.wait(&Phase::FINISHED, Duration::from_secs(5)).await.unwrap();
            let url = job.url().to_string();
            job.delete().await.unwrap();
            let job = AsyncJob::from_url(&service, &url).unwrap();
            assert!(matches!(
                job.fetch_result().await,
                Err(TapError::ResultsDiscarded { .. })
            ));
        });
    }

    #[test]
    fn test_retrieve_pending_then_ready() {
        setup();
        let service = MemoryTapService::default().with_execution_steps(1);
        RUNTIME.block_on(async {
            let job = AsyncJob::submit(&service, &spec("SELECT 1")).await.unwrap();
            job.run().await.unwrap();
            let url = job.url().to_string();
            // QUEUED -> EXECUTING
            assert_eq!(
                Retrieval::Pending(Phase::Executing),
                retrieve(&service, &url).await.unwrap()
            );
            // one more step spent executing
            assert_eq!(
                Retrieval::Pending(Phase::Executing),
                retrieve(&service, &url).await.unwrap()
            );
            match retrieve(&service, &url).await.unwrap() {
                Retrieval::Ready(result) => assert_eq!("run_id\ntest\n", result.text()),
                other => panic!("expected a result, got: {:?}", other),
            }
        });
    }

    #[test]
    fn test_from_url_rejects_other_urls() {
        let service = MemoryTapService::default();
        assert!(matches!(
            AsyncJob::from_url(&service, "https://www.cosmosim.org/tap/sync"),
            Err(TapError::InvalidJobUrl(_))
        ));
    }

    #[test]
    fn test_from_url_refuses_other_service() {
        setup();
        let service = MemoryTapService::new("https://www.cosmosim.org/tap");
        RUNTIME.block_on(async {
            let job = AsyncJob::submit(&service, &spec("SELECT 1")).await.unwrap();
            assert_eq!("https://www.cosmosim.org/tap/async/1", job.url());
            assert!(AsyncJob::from_url(&service, "https://www.cosmosim.org/tap/async/1/\n").is_ok());
            for url in &[
                "https://tap.other-archive.org/tap/async/1",
                "https://www.cosmosim.org/other/async/1",
            ] {
                match AsyncJob::from_url(&service, url) {
                    Err(TapError::ForeignJobUrl { job_url, base_url }) => {
                        assert_eq!(*url, job_url);
                        assert_eq!("https://www.cosmosim.org/tap", base_url);
                    }
                    other => panic!("expected a foreign url error for {}, got: {:?}", url, other),
                }
            }
            assert!(matches!(
                retrieve(&service, "https://tap.other-archive.org/tap/async/1").await,
                Err(TapError::ForeignJobUrl { .. })
            ));
        });
    }
}
