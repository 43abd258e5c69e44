//! Submitting `.sql` files whose comments carry the job parameters.
//!
//! ```sql
//! -- Radial profile of most massive BDMV (z=0)
//! -- LANGUAGE = PostgreSQL
//! -- QUEUE = 1h
//! SELECT * FROM bolshoi.bdmvprof ...
//! ```
//!
//! The file stem becomes the run id. Missing directives default to
//! PostgreSQL and the `1m` queue.

use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use tap_data::{JobSpec, Language, Queue};
use tokio::fs;
use tracing::{info, warn};

use crate::{
    error::{Result, TapError},
    job::AsyncJob,
    service::TapService,
};

lazy_static! {
    static ref COMMENT: Regex = Regex::new(r"(?s)--[^\n]*|/\*.*?\*/").unwrap();
    static ref DIRECTIVE: Regex =
        Regex::new(r"(?i)\b(LANGUAGE|QUEUE)\s*=\s*([\w.-]+)").unwrap();
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryFile {
    pub path: PathBuf,
    pub run_id: String,
    pub language: Language,
    pub queue: Queue,
    pub query: String,
}

impl QueryFile {
    pub fn parse(path: &Path, text: &str) -> Self {
        let (language, queue) = parse_directives(text);
        let run_id = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path: path.to_path_buf(),
            run_id,
            language,
            queue,
            query: text.to_string(),
        }
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).await?;
        Ok(Self::parse(path, &text))
    }

    pub fn spec(&self) -> JobSpec {
        JobSpec::new(&self.query, self.language, &self.run_id, self.queue)
    }
}

/// Language and queue named as `KEY = value` inside `--` or `/* */`
/// comments, first one wins.
pub fn parse_directives(text: &str) -> (Language, Queue) {
    let mut language: Option<Language> = None;
    let mut queue: Option<Queue> = None;
    let directives = COMMENT
        .find_iter(text)
        .flat_map(|comment| DIRECTIVE.captures_iter(comment.as_str()));
    for captures in directives {
        let value = &captures[2];
        if captures[1].eq_ignore_ascii_case("language") {
            if language.is_none() {
                language = Some(value.parse().unwrap_or_else(|err| {
                    warn!("{}, using {}", err, Language::default());
                    Language::default()
                }));
            }
        } else if queue.is_none() {
            queue = Some(value.parse().unwrap_or_else(|err| {
                warn!("{}, using {}", err, Queue::default());
                Queue::default()
            }));
        }
    }
    (language.unwrap_or_default(), queue.unwrap_or_default())
}

/// every `*.sql` file directly in `dir`, sorted by name
pub async fn discover(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_sql = path
            .extension()
            .map_or(false, |extension| extension.eq_ignore_ascii_case("sql"));
        if is_sql && entry.file_type().await?.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submitted {
    pub path: PathBuf,
    pub run_id: String,
    pub queue: Queue,
    pub job_url: String,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub submitted: Vec<Submitted>,
    pub failures: Vec<(PathBuf, TapError)>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Submits and starts one job per file.
///
/// A file that cannot be read or whose job is refused is recorded in the
/// report and the remaining files are still submitted.
pub async fn submit_files<S: TapService>(service: &S, paths: &[PathBuf]) -> BatchReport {
    let mut report = BatchReport::default();
    for path in paths {
        match submit_file(service, path).await {
            Ok(submitted) => {
                info!("submitted {} as {}", path.display(), submitted.job_url);
                report.submitted.push(submitted);
            }
            Err(err) => {
                warn!("could not submit {}: {}", path.display(), err);
                report.failures.push((path.clone(), err));
            }
        }
    }
    report
}

async fn submit_file<S: TapService>(service: &S, path: &Path) -> Result<Submitted> {
    let file = QueryFile::load(path).await?;
    let job = AsyncJob::submit(service, &file.spec()).await?;
    job.run().await?;
    Ok(Submitted {
        path: file.path,
        run_id: file.run_id,
        queue: file.queue,
        job_url: job.url().to_string(),
    })
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use lazy_static::lazy_static;
    use tap_data::{Language, Queue};
    use tokio::runtime::Runtime;

    use super::{discover, parse_directives, submit_files, QueryFile};
    use crate::memory::{Execution, MemoryTapService};

    lazy_static! {
        static ref RUNTIME: Runtime = Runtime::new().unwrap();
    }

    const RADIAL_PROFILE: &str = "-- Radial profile of most massive BDMV (z=0)

-- LANGUAGE = PostgreSQL
-- QUEUE = 1h

SELECT * FROM bolshoi.bdmvprof
 WHERE bdmid =
       (SELECT bdmid FROM bolshoi.bdmv
         WHERE snapnum=416 ORDER BY mvir DESC LIMIT 1)
 ORDER BY rbin
";

    #[test]
    fn test_parse_file() {
        let file = QueryFile::parse(Path::new("queries/radial_prof_massive_bdmv.sql"), RADIAL_PROFILE);
        assert_eq!("radial_prof_massive_bdmv", file.run_id);
        assert_eq!(Language::PostgreSql, file.language);
        assert_eq!(Queue::OneHour, file.queue);
        assert_eq!(RADIAL_PROFILE, file.query);
    }

    #[test]
    fn test_directive_defaults() {
        assert_eq!(
            (Language::PostgreSql, Queue::OneMinute),
            parse_directives("SELECT 1")
        );
        assert_eq!(
            (Language::Adql, Queue::FiveHours),
            parse_directives("--LANGUAGE=ADQL\n  --  queue = 5h\nSELECT TOP 1 * FROM t")
        );
    }

    #[test]
    fn test_inline_and_block_comment_directives() {
        let file = QueryFile::parse(
            Path::new("halos.sql"),
            "SELECT TOP 10 * FROM MDR1.FOF -- LANGUAGE = ADQL\n/* QUEUE=1h*/\n",
        );
        assert_eq!(Language::Adql, file.language);
        assert_eq!(Queue::OneHour, file.queue);
        assert_eq!(
            (Language::PostgreSql, Queue::FiveHours),
            parse_directives("/*\n * Halo mass function\n * queue = 5h\n */\nSELECT 1")
        );
    }

    #[test]
    fn test_directives_outside_comments_ignored() {
        assert_eq!(
            (Language::PostgreSql, Queue::OneMinute),
            parse_directives("SELECT 'QUEUE = 5h' AS queue, 'LANGUAGE=ADQL' AS language")
        );
    }

    #[test]
    fn test_unknown_directive_values_fall_back() {
        assert_eq!(
            (Language::PostgreSql, Queue::OneMinute),
            parse_directives("-- LANGUAGE = SPARQL\n-- QUEUE = 2d\nSELECT 1")
        );
    }

    #[test]
    fn test_discover_sorted_sql_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.sql", "a.sql", "notes.txt", "c.SQL"] {
            std::fs::write(dir.path().join(name), "SELECT 1").unwrap();
        }
        std::fs::create_dir(dir.path().join("d.sql")).unwrap();
        let found = RUNTIME.block_on(discover(dir.path())).unwrap();
        let names: Vec<String> = found
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(vec!["a.sql", "b.sql", "c.SQL"], names);
    }

    #[test]
    fn test_batch_keeps_going_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good.sql"), "-- QUEUE = 1h\nSELECT 1").unwrap();
        std::fs::write(dir.path().join("bad.sql"), "SELEC 1").unwrap();
        let service = MemoryTapService::default().with_executor(|spec| {
            if spec.query.starts_with("SELEC ") {
                Execution::Reject("syntax error at or near \"SELEC\"".to_string())
            } else {
                Execution::Complete(Vec::new())
            }
        });
        let report = RUNTIME.block_on(async {
            let paths = discover(dir.path()).await.unwrap();
            submit_files(&service, &paths).await
        });
        assert!(!report.is_success());
        assert_eq!(1, report.failures.len());
        assert!(report.failures[0].0.ends_with("bad.sql"));
        assert!(report.failures[0].1.is_validation());
        assert_eq!(1, report.submitted.len());
        assert_eq!("good", report.submitted[0].run_id);
        assert_eq!(Queue::OneHour, report.submitted[0].queue);
    }
}
