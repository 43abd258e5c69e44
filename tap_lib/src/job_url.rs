use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::error::{Result, TapError};

/// One-line file carrying a job url from a submitting run to a later
/// retrieving run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobUrlFile {
    path: PathBuf,
}

impl JobUrlFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// replaces the file with `url` followed by a newline
    pub async fn write(&self, url: &str) -> Result<()> {
        fs::write(&self.path, format!("{}\n", url.trim())).await?;
        debug!("stored job url in {}", self.path.display());
        Ok(())
    }

    pub async fn read(&self) -> Result<String> {
        let content = fs::read_to_string(&self.path).await?;
        match content.lines().next().map(str::trim) {
            Some(url) if !url.is_empty() => Ok(url.to_string()),
            _ => Err(TapError::InvalidJobUrl(format!(
                "{} does not contain a job url",
                self.path.display()
            ))),
        }
    }
}
