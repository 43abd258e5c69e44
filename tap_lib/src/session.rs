use std::time::Duration;

use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION},
    Client, Url,
};

use crate::error::{Result, TapError};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// An authenticated connection to one TAP service.
///
/// The token is attached to every request as `Authorization: Token <token>`.
/// Sessions are plain values: several of them, for different services or
/// accounts, can live side by side in one process.
#[derive(Clone, Debug)]
pub struct TapSession {
    base_url: String,
    http: Client,
    authenticated: bool,
}

impl TapSession {
    pub fn new(base_url: &str, token: Option<&str>, timeout: Duration) -> Result<Self> {
        let base_url = normalize_base_url(base_url)?;
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            headers.insert(AUTHORIZATION, authorization_value(token)?);
        }
        let http = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .user_agent(concat!("tap-client/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            base_url,
            http,
            authenticated: token.is_some(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn job_url(&self, job_id: &str) -> String {
        job_url(&self.base_url, job_id)
    }
}

pub(crate) fn normalize_base_url(base_url: &str) -> Result<String> {
    let trimmed = base_url.trim().trim_end_matches('/');
    let url = Url::parse(trimmed).map_err(|e| TapError::InvalidUrl(format!("{}: {}", trimmed, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(TapError::InvalidUrl(format!(
            "{}: only http and https are supported",
            trimmed
        )));
    }
    Ok(trimmed.to_string())
}

/// accepts both the bare token and the `Token <token>` form shown on the account page
fn authorization_value(token: &str) -> Result<HeaderValue> {
    let token = token.trim();
    let value = if token.starts_with("Token ") {
        token.to_string()
    } else {
        format!("Token {}", token)
    };
    let mut value = HeaderValue::from_str(&value)
        .map_err(|_| TapError::Unauthorized("token contains invalid characters".to_string()))?;
    value.set_sensitive(true);
    Ok(value)
}

pub fn job_url(base_url: &str, job_id: &str) -> String {
    format!("{}/async/{}", base_url.trim_end_matches('/'), job_id)
}

/// Extracts the job id from `<base>/async/<jobid>`.
pub fn job_id_from_url(job_url: &str) -> Result<String> {
    let invalid = || TapError::InvalidJobUrl(job_url.to_string());
    let url = Url::parse(job_url.trim()).map_err(|_| invalid())?;
    let segments: Vec<&str> = url
        .path_segments()
        .ok_or_else(invalid)?
        .filter(|segment| !segment.is_empty())
        .collect();
    match segments.as_slice() {
        [.., "async", job_id] => Ok(job_id.to_string()),
        _ => Err(invalid()),
    }
}
