use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{DataError, Language, Phase, Queue};

/// everything needed to create a job on the service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub query: String,
    pub language: Language,
    pub run_id: String,
    pub queue: Queue,
}

impl JobSpec {
    pub fn new(query: &str, language: Language, run_id: &str, queue: Queue) -> Self {
        Self {
            query: query.to_string(),
            language,
            run_id: run_id.to_string(),
            queue,
        }
    }
}

/// Summary row returned when listing jobs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescription {
    pub job_id: String,
    pub run_id: Option<String>,
    pub phase: Phase,
    pub creation_time: Option<String>,
}

/// Which jobs a listing should return.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JobFilter {
    /// empty means every phase
    pub phases: Vec<Phase>,
    /// only the `n` most recently created jobs
    pub last: Option<u32>,
    /// exact match, applied after the service answered
    pub run_id: Option<String>,
}

impl JobFilter {
    pub fn phase(phase: Phase) -> Self {
        Self {
            phases: vec![phase],
            ..Default::default()
        }
    }

    pub fn with_last(mut self, last: u32) -> Self {
        self.last = Some(last);
        self
    }

    pub fn with_run_id(mut self, run_id: &str) -> Self {
        self.run_id = Some(run_id.to_string());
        self
    }

    pub fn matches(&self, description: &JobDescription) -> bool {
        let phase_ok = self.phases.is_empty() || self.phases.contains(&description.phase);
        let run_id_ok = match &self.run_id {
            Some(wanted) => description.run_id.as_deref() == Some(wanted.as_str()),
            None => true,
        };
        phase_ok && run_id_ok
    }
}

/// Named job parameters as reported by the service.
///
/// Names are case insensitive on the wire and are stored lower case.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParameters {
    values: BTreeMap<String, String>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repeated names are accepted only when they carry the same value.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, DataError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut parameters = Self::new();
        for (name, value) in pairs {
            parameters.insert(name.as_ref(), value)?;
        }
        Ok(parameters)
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) -> Result<(), DataError> {
        let name = name.to_ascii_lowercase();
        let value = value.into();
        match self.values.get(&name) {
            Some(existing) if *existing != value => Err(DataError::ConflictingParameter {
                name,
                first: existing.clone(),
                second: value,
            }),
            Some(_) => Ok(()),
            None => {
                self.values.insert(name, value);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(&name.to_ascii_lowercase())
            .map(|value| value.as_str())
    }

    pub fn require(&self, name: &str) -> Result<&str, DataError> {
        self.get(name)
            .ok_or_else(|| DataError::MissingParameter(name.to_ascii_lowercase()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// The full job document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    pub job_id: String,
    pub run_id: Option<String>,
    pub phase: Phase,
    pub parameters: JobParameters,
    pub error_summary: Option<String>,
}

impl JobInfo {
    pub const QUERY: &'static str = "query";
    pub const QUERY_LANGUAGE: &'static str = "query_language";
    pub const LANG: &'static str = "lang";

    pub fn query(&self) -> Result<&str, DataError> {
        self.parameters.require(Self::QUERY)
    }

    /// `query_language` is what the service records, `lang` is the
    /// standard TAP name used by other services
    pub fn language(&self) -> Result<Language, DataError> {
        let raw = match self.parameters.get(Self::QUERY_LANGUAGE) {
            Some(raw) => raw,
            None => self
                .parameters
                .get(Self::LANG)
                .ok_or_else(|| DataError::MissingParameter(Self::QUERY_LANGUAGE.to_string()))?,
        };
        raw.parse()
    }
}

/// Result payload of a finished query, kept as the service sent it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TapResult {
    content_type: Option<String>,
    body: Vec<u8>,
}

impl TapResult {
    pub fn new(content_type: Option<String>, body: Vec<u8>) -> Self {
        Self { content_type, body }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}
