use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tap_lib::TapSession;

pub const DEFAULT_URL: &str = "https://www.cosmosim.org/tap";
pub const DEFAULT_JOB_URL_FILE: &str = "job_url.txt";
pub const URL_VAR: &str = "TAP_URL";
pub const TOKEN_VAR: &str = "TAP_TOKEN";

/// Client settings, layered as defaults < config file < environment < flags.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub url: String,
    pub token: Option<String>,
    /// http timeout in seconds
    pub timeout: u64,
    pub job_url_file: PathBuf,
    /// refuse to run when this client is older
    pub min_version: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            token: None,
            timeout: tap_lib::DEFAULT_TIMEOUT.as_secs(),
            job_url_file: PathBuf::from(DEFAULT_JOB_URL_FILE),
            min_version: None,
        }
    }
}

// keeps the token out of debug logs
impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("timeout", &self.timeout)
            .field("job_url_file", &self.job_url_file)
            .field("min_version", &self.min_version)
            .finish()
    }
}

impl ClientConfig {
    /// defaults, overlaid with the TOML file at `path` if one is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => expand_home(path),
            None => return Ok(Self::default()),
        };
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("could not read config file {}", path.display()))?;
        let mut config: ClientConfig = toml::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        config.job_url_file = expand_home(&config.job_url_file);
        Ok(config)
    }

    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = var(URL_VAR).filter(|url| !url.trim().is_empty()) {
            self.url = url;
        }
        if let Some(token) = var(TOKEN_VAR).filter(|token| !token.trim().is_empty()) {
            self.token = Some(token);
        }
    }

    pub fn apply_flags(&mut self, url: Option<&str>, token: Option<&str>) {
        if let Some(url) = url {
            self.url = url.to_string();
        }
        if let Some(token) = token {
            self.token = Some(token.to_string());
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn session(&self) -> Result<TapSession> {
        TapSession::new(&self.url, self.token.as_deref(), self.timeout())
            .with_context(|| format!("could not set up a session for {}", self.url))
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
