use reqwest::{header::CONTENT_TYPE, RequestBuilder, Response};
use tap_data::{JobDescription, JobFilter, JobInfo, JobSpec, Language, Phase, TapResult};
use tracing::{debug, info, instrument, warn};

use crate::{
    error::{Result, TapError},
    service::TapService,
    session::{self, TapSession},
    uws,
};

/// [`TapService`] speaking the TAP/UWS HTTP interface.
#[derive(Clone, Debug)]
pub struct HttpTapService {
    session: TapSession,
}

impl HttpTapService {
    pub fn new(session: TapSession) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &TapSession {
        &self.session
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        check_response(response).await
    }

    /// best effort: a missing error document leaves the summary empty
    async fn fetch_error_message(&self, job_id: &str) -> Option<String> {
        let url = format!("{}/error", self.session.job_url(job_id));
        let fetched = match self.send(self.session.http().get(&url)).await {
            Ok(response) => response.text().await.map_err(TapError::from),
            Err(err) => Err(err),
        };
        match fetched {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(_) => None,
            Err(err) => {
                warn!("could not fetch error document of job {}: {}", job_id, err);
                None
            }
        }
    }
}

impl TapService for HttpTapService {
    fn base_url(&self) -> &str {
        self.session.base_url()
    }

    #[instrument(skip(self, query))]
    async fn run_sync(&self, query: &str, language: Language) -> Result<TapResult> {
        let request = self.session.http().post(self.session.endpoint("sync")).form(&[
            ("REQUEST", "doQuery"),
            ("LANG", language.as_str()),
            ("QUERY", query),
        ]);
        let response = self.send(request).await?;
        into_result(response).await
    }

    #[instrument(skip(self, spec), fields(run_id = %spec.run_id, queue = %spec.queue))]
    async fn create_job(&self, spec: &JobSpec) -> Result<String> {
        if spec.query.trim().is_empty() {
            return Err(TapError::Validation("query text is empty".to_string()));
        }
        let mut form = vec![
            ("REQUEST", "doQuery"),
            ("LANG", spec.language.as_str()),
            ("QUERY", spec.query.as_str()),
            ("QUEUE", spec.queue.as_str()),
        ];
        if !spec.run_id.is_empty() {
            form.push(("RUNID", spec.run_id.as_str()));
        }
        let request = self
            .session
            .http()
            .post(self.session.endpoint("async"))
            .form(&form);
        let response = self.send(request).await?;
        // the service redirects to the new job, so the final url names it
        let job_id = match session::job_id_from_url(response.url().as_str()) {
            Ok(job_id) => job_id,
            Err(_) => {
                let body = response.text().await?;
                uws::parse_job(&body)?.job_id
            }
        };
        info!("created job {}", job_id);
        Ok(job_id)
    }

    #[instrument(skip(self))]
    async fn start_job(&self, job_id: &str) -> Result<()> {
        let url = format!("{}/phase", self.session.job_url(job_id));
        let request = self.session.http().post(url).form(&[("PHASE", "RUN")]);
        self.send(request).await?;
        info!("started job");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn phase(&self, job_id: &str) -> Result<Phase> {
        let url = format!("{}/phase", self.session.job_url(job_id));
        let response = self.send(self.session.http().get(url)).await?;
        let phase = response.text().await?.parse::<Phase>()?;
        debug!("job is {}", phase);
        Ok(phase)
    }

    #[instrument(skip(self))]
    async fn job_info(&self, job_id: &str) -> Result<JobInfo> {
        let url = self.session.job_url(job_id);
        let response = self.send(self.session.http().get(url)).await?;
        let mut info = uws::parse_job(&response.text().await?)?;
        if info.phase.is_error() && info.error_summary.is_none() {
            info.error_summary = self.fetch_error_message(job_id).await;
        }
        Ok(info)
    }

    #[instrument(skip(self))]
    async fn fetch_result(&self, job_id: &str) -> Result<TapResult> {
        let url = format!("{}/results/result", self.session.job_url(job_id));
        let response = self.send(self.session.http().get(url)).await?;
        let result = into_result(response).await?;
        info!("fetched {} bytes", result.len());
        Ok(result)
    }

    #[instrument(skip(self))]
    async fn delete_job(&self, job_id: &str) -> Result<()> {
        let url = self.session.job_url(job_id);
        self.send(self.session.http().delete(url)).await?;
        info!("archived job");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobDescription>> {
        let mut params: Vec<(&str, String)> = filter
            .phases
            .iter()
            .map(|phase| ("PHASE", phase.to_string()))
            .collect();
        if let Some(last) = filter.last {
            params.push(("LAST", last.to_string()));
        }
        let request = self
            .session
            .http()
            .get(self.session.endpoint("async"))
            .query(&params);
        let response = self.send(request).await?;
        let jobs: Vec<JobDescription> = uws::parse_job_list(&response.text().await?)?
            .into_iter()
            .filter(|description| filter.matches(description))
            .collect();
        debug!("listed {} jobs", jobs.len());
        Ok(jobs)
    }
}

async fn check_response(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    let body = if body.trim().is_empty() {
        status.to_string()
    } else {
        body.trim().to_string()
    };
    Err(match status.as_u16() {
        400 => TapError::Validation(body),
        401 | 403 => TapError::Unauthorized(body),
        404 => TapError::NotFound(url),
        code => TapError::Service { status: code, body },
    })
}

async fn into_result(response: Response) -> Result<TapResult> {
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());
    let body = response.bytes().await?.to_vec();
    Ok(TapResult::new(content_type, body))
}
