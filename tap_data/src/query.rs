use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::DataError;

/// SQL dialect a query is written in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[default]
    #[serde(rename = "PostgreSQL")]
    PostgreSql,
    #[serde(rename = "ADQL")]
    Adql,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::PostgreSql => "PostgreSQL",
            Language::Adql => "ADQL",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Language {
    type Err = DataError;

    // services echo the language back with a version suffix, e.g. `adql-2.0`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let name = trimmed.split('-').next().unwrap_or_default();
        if name.eq_ignore_ascii_case("postgresql") {
            Ok(Language::PostgreSql)
        } else if name.eq_ignore_ascii_case("adql") {
            Ok(Language::Adql)
        } else {
            Err(DataError::UnknownLanguage(trimmed.to_string()))
        }
    }
}

/// Server side bucket bounding how long a job may execute.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Queue {
    #[default]
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "5h")]
    FiveHours,
}

/// How a caller should wait for a job submitted to a given queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitStrategy {
    /// block on the job with a timeout
    Bounded,
    /// sleep coarsely between phase checks
    SleepPoll,
    /// persist the job url and retrieve in a later invocation
    Deferred,
}

impl Queue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Queue::OneMinute => "1m",
            Queue::OneHour => "1h",
            Queue::FiveHours => "5h",
        }
    }

    pub fn expected_duration(&self) -> Duration {
        match self {
            Queue::OneMinute => Duration::from_secs(60),
            Queue::OneHour => Duration::from_secs(60 * 60),
            Queue::FiveHours => Duration::from_secs(5 * 60 * 60),
        }
    }

    /// Long queues must not hold a polling connection open for hours, so
    /// only the short queue is waited on directly.
    pub fn wait_strategy(&self) -> WaitStrategy {
        match self {
            Queue::OneMinute => WaitStrategy::Bounded,
            Queue::OneHour => WaitStrategy::SleepPoll,
            Queue::FiveHours => WaitStrategy::Deferred,
        }
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Queue {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1m" => Ok(Queue::OneMinute),
            "1h" => Ok(Queue::OneHour),
            "5h" => Ok(Queue::FiveHours),
            other => Err(DataError::UnknownQueue(other.to_string())),
        }
    }
}
