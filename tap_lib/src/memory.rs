use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use tap_data::{JobDescription, JobFilter, JobInfo, JobParameters, JobSpec, Language, Phase, TapResult};
use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::{
    error::{Result, TapError},
    service::TapService,
};

/// What the in-memory service does with a query once it is started.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Execution {
    /// finish in COMPLETED with this payload
    Complete(Vec<u8>),
    /// finish in ERROR with this message
    Fail(String),
    /// stay EXECUTING forever
    Hang,
    /// refuse to start, the way a service rejects invalid SQL
    Reject(String),
}

type Executor = Arc<dyn Fn(&JobSpec) -> Execution + Send + Sync>;

struct Job {
    id: String,
    // creation order, used by LAST
    sequence: u64,
    spec: JobSpec,
    phase: Phase,
    history: Vec<Phase>,
    execution: Option<Execution>,
    steps_left: u32,
    result: Option<Vec<u8>>,
    error: Option<String>,
}

impl Job {
    fn set_phase(&mut self, next: Phase) -> Result<()> {
        if !self.phase.can_advance_to(next) {
            return Err(TapError::Service {
                status: 409,
                body: format!("job {} cannot move from {} to {}", self.id, self.phase, next),
            });
        }
        if self.phase != next {
            info!("job {}: {} -> {}", self.id, self.phase, next);
            self.phase = next;
            self.history.push(next);
        }
        Ok(())
    }

    /// every observation moves a running job one step along
    fn advance(&mut self) -> Result<()> {
        match self.phase {
            Phase::Queued => self.set_phase(Phase::Executing),
            Phase::Executing if self.steps_left > 0 => {
                self.steps_left -= 1;
                Ok(())
            }
            Phase::Executing => match self.execution.clone() {
                Some(Execution::Complete(body)) => {
                    self.result = Some(body);
                    self.set_phase(Phase::Completed)
                }
                Some(Execution::Fail(msg)) | Some(Execution::Reject(msg)) => {
                    self.error = Some(msg);
                    self.set_phase(Phase::Error)
                }
                Some(Execution::Hang) | None => Ok(()),
            },
            _ => Ok(()),
        }
    }

    fn description(&self) -> JobDescription {
        JobDescription {
            job_id: self.id.clone(),
            run_id: Some(self.spec.run_id.clone()).filter(|run_id| !run_id.is_empty()),
            phase: self.phase,
            creation_time: None,
        }
    }

    fn info(&self) -> Result<JobInfo> {
        let parameters = JobParameters::from_pairs(vec![
            (JobInfo::QUERY, self.spec.query.clone()),
            (
                JobInfo::QUERY_LANGUAGE,
                self.spec.language.as_str().to_ascii_lowercase(),
            ),
            ("queue", self.spec.queue.as_str().to_string()),
        ])?;
        Ok(JobInfo {
            job_id: self.id.clone(),
            run_id: Some(self.spec.run_id.clone()).filter(|run_id| !run_id.is_empty()),
            phase: self.phase,
            parameters,
            error_summary: self.error.clone(),
        })
    }
}

/// An in-process TAP service.
///
/// Jobs advance one phase step each time they are observed (`phase` or
/// `job_info`), so a caller polling the service sees the same
/// PENDING -> QUEUED -> EXECUTING -> terminal progression as against a real
/// service. Phase changes are checked for monotonicity and recorded.
pub struct MemoryTapService {
    base_url: String,
    // counter instead of uuid, ids only need to be unique per service
    next_job_id: AtomicU64,
    jobs: Arc<Mutex<HashMap<String, Job>>>,
    executor: Executor,
    execution_steps: u32,
}

impl MemoryTapService {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            next_job_id: AtomicU64::new(1),
            jobs: Arc::new(Mutex::new(HashMap::new())),
            executor: Arc::new(|spec: &JobSpec| {
                Execution::Complete(format!("run_id\n{}\n", spec.run_id).into_bytes())
            }),
            execution_steps: 0,
        }
    }

    /// decides the outcome of every job when it is started
    pub fn with_executor<F>(mut self, executor: F) -> Self
    where
        F: Fn(&JobSpec) -> Execution + Send + Sync + 'static,
    {
        self.executor = Arc::new(executor);
        self
    }

    /// extra observations a job stays EXECUTING before it finishes
    pub fn with_execution_steps(mut self, steps: u32) -> Self {
        self.execution_steps = steps;
        self
    }

    /// every phase a job went through, oldest first
    pub async fn phase_history(&self, job_id: &str) -> Option<Vec<Phase>> {
        let jobs = self.jobs.lock().await;
        jobs.get(job_id).map(|job| job.history.clone())
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.lock().await.len()
    }

    fn not_found(&self, job_id: &str) -> TapError {
        TapError::NotFound(self.job_url(job_id))
    }
}

impl TapService for MemoryTapService {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    #[instrument(skip(self, query))]
    async fn run_sync(&self, query: &str, language: Language) -> Result<TapResult> {
        let spec = JobSpec::new(query, language, "", Default::default());
        match (self.executor)(&spec) {
            Execution::Complete(body) => Ok(TapResult::new(Some("text/csv".to_string()), body)),
            Execution::Fail(msg) | Execution::Reject(msg) => Err(TapError::Validation(msg)),
            Execution::Hang => Err(TapError::Service {
                status: 504,
                body: "synchronous query timed out".to_string(),
            }),
        }
    }

    #[instrument(skip(self, spec), fields(run_id = %spec.run_id))]
    async fn create_job(&self, spec: &JobSpec) -> Result<String> {
        if spec.query.trim().is_empty() {
            return Err(TapError::Validation("query text is empty".to_string()));
        }
        let sequence = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        let id = sequence.to_string();
        info!("created job {}", id);
        let job = Job {
            id: id.clone(),
            sequence,
            spec: spec.clone(),
            phase: Phase::Pending,
            history: vec![Phase::Pending],
            execution: None,
            steps_left: 0,
            result: None,
            error: None,
        };
        self.jobs.lock().await.insert(id.clone(), job);
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn start_job(&self, job_id: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(job_id).ok_or_else(|| self.not_found(job_id))?;
        if job.phase != Phase::Pending {
            return Err(TapError::Service {
                status: 409,
                body: format!("job {} is {}, only PENDING jobs can be run", job_id, job.phase),
            });
        }
        let execution = (self.executor)(&job.spec);
        if let Execution::Reject(msg) = &execution {
            info!("rejected job: {}", msg);
            job.error = Some(msg.clone());
            job.set_phase(Phase::Error)?;
            return Err(TapError::Validation(msg.clone()));
        }
        job.execution = Some(execution);
        job.steps_left = self.execution_steps;
        job.set_phase(Phase::Queued)
    }

    #[instrument(skip(self))]
    async fn phase(&self, job_id: &str) -> Result<Phase> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(job_id).ok_or_else(|| self.not_found(job_id))?;
        job.advance()?;
        Ok(job.phase)
    }

    #[instrument(skip(self))]
    async fn job_info(&self, job_id: &str) -> Result<JobInfo> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(job_id).ok_or_else(|| self.not_found(job_id))?;
        job.advance()?;
        job.info()
    }

    #[instrument(skip(self))]
    async fn fetch_result(&self, job_id: &str) -> Result<TapResult> {
        let jobs = self.jobs.lock().await;
        let job = jobs.get(job_id).ok_or_else(|| self.not_found(job_id))?;
        match (&job.phase, &job.result) {
            (Phase::Completed, Some(body)) => {
                Ok(TapResult::new(Some("text/csv".to_string()), body.clone()))
            }
            _ => Err(TapError::NotFound(format!(
                "{}/results/result",
                self.job_url(job_id)
            ))),
        }
    }

    #[instrument(skip(self))]
    async fn delete_job(&self, job_id: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(job_id).ok_or_else(|| self.not_found(job_id))?;
        job.result = None;
        job.execution = None;
        job.set_phase(Phase::Archived)
    }

    #[instrument(skip(self))]
    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobDescription>> {
        let jobs = self.jobs.lock().await;
        let mut listed: Vec<&Job> = jobs
            .values()
            .filter(|job| filter.phases.is_empty() || filter.phases.contains(&job.phase))
            .collect();
        listed.sort_by_key(|job| job.sequence);
        if let Some(last) = filter.last {
            let skip = listed.len().saturating_sub(last as usize);
            listed.drain(..skip);
        }
        Ok(listed
            .into_iter()
            .map(Job::description)
            .filter(|description| filter.matches(description))
            .collect())
    }
}

impl Default for MemoryTapService {
    fn default() -> Self {
        Self::new("memory://tap")
    }
}

impl std::fmt::Debug for MemoryTapService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTapService")
            .field("base_url", &self.base_url)
            .field("execution_steps", &self.execution_steps)
            .finish()
    }
}
