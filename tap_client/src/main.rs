use std::path::PathBuf;

use anyhow::{Context, Result};
use structopt::StructOpt;
use tap_data::{JobFilter, Language, Phase, Queue};
use tap_lib::{ensure_compatible, HttpTapService, JobUrlFile};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::ClientConfig;
use operations::{QueryInput, WaitMode};

mod config;
mod operations;

/// Submit and manage queries on a TAP service
#[derive(StructOpt, Debug)]
#[structopt(name = "tap-client")]
struct Opt {
    /// TOML configuration file
    #[structopt(short = "c", long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// base url of the TAP service [env: TAP_URL]
    #[structopt(long)]
    url: Option<String>,

    /// API token [env: TAP_TOKEN]
    #[structopt(long)]
    token: Option<String>,

    /// log debug output
    #[structopt(short = "d", long)]
    debug: bool,

    #[structopt(subcommand)]
    operation: Operation,
}

#[derive(Debug, StructOpt)]
enum Operation {
    /// Run a short query and print its result
    Sync(SyncOperation),
    /// Submit a query as an asynchronous job
    Submit(SubmitOperation),
    /// Fetch the result of a job submitted earlier
    Retrieve(RetrieveOperation),
    /// Show a job
    Status(StatusOperation),
    /// List jobs
    List(ListOperation),
    /// Archive jobs, discarding their results
    Archive(ArchiveOperation),
    /// Resubmit the queries of archived jobs
    Rerun(RerunOperation),
    /// Submit every .sql file of a directory
    SubmitFiles(SubmitFilesOperation),
}

#[derive(Debug, StructOpt)]
struct QueryArgs {
    #[structopt(name = "QUERY", required_unless = "file")]
    query: Option<String>,

    /// read the query from a file, honouring its `-- LANGUAGE =` and `-- QUEUE =` comments
    #[structopt(short = "f", long, parse(from_os_str), conflicts_with = "QUERY")]
    file: Option<PathBuf>,

    /// PostgreSQL or ADQL
    #[structopt(short = "l", long)]
    language: Option<Language>,
}

#[derive(Debug, StructOpt)]
struct SyncOperation {
    #[structopt(flatten)]
    query: QueryArgs,

    /// write the result here instead of printing it
    #[structopt(short = "o", long, parse(from_os_str))]
    output: Option<PathBuf>,
}

#[derive(Debug, StructOpt)]
struct SubmitOperation {
    #[structopt(flatten)]
    query: QueryArgs,

    /// 1m, 1h or 5h
    #[structopt(short = "q", long)]
    queue: Option<Queue>,

    #[structopt(short = "r", long)]
    run_id: Option<String>,

    /// wait at most this many seconds for the job
    #[structopt(long, conflicts_with_all = &["poll", "detach"])]
    wait: Option<u64>,

    /// check coarsely until the job is done
    #[structopt(long, conflicts_with = "detach")]
    poll: bool,

    /// store the job url and return immediately
    #[structopt(long)]
    detach: bool,

    #[structopt(long, parse(from_os_str))]
    job_url_file: Option<PathBuf>,

    #[structopt(short = "o", long, parse(from_os_str))]
    output: Option<PathBuf>,
}

impl SubmitOperation {
    fn wait_mode(&self) -> WaitMode {
        match (self.wait, self.poll, self.detach) {
            (Some(secs), _, _) => WaitMode::Bounded(secs),
            (None, true, _) => WaitMode::Poll,
            (None, false, true) => WaitMode::Detach,
            (None, false, false) => WaitMode::Auto,
        }
    }
}

#[derive(Debug, StructOpt)]
struct RetrieveOperation {
    #[structopt(long, parse(from_os_str), conflicts_with = "job-url")]
    job_url_file: Option<PathBuf>,

    #[structopt(long)]
    job_url: Option<String>,

    #[structopt(short = "o", long, parse(from_os_str))]
    output: Option<PathBuf>,
}

#[derive(Debug, StructOpt)]
struct StatusOperation {
    #[structopt(name = "JOB_URL")]
    job_url: String,
}

#[derive(Debug, StructOpt)]
struct FilterArgs {
    /// only the `n` most recent jobs
    #[structopt(long)]
    last: Option<u32>,

    #[structopt(short = "r", long)]
    run_id: Option<String>,
}

impl FilterArgs {
    fn into_filter(self, phases: Vec<Phase>) -> JobFilter {
        JobFilter {
            phases,
            last: self.last,
            run_id: self.run_id,
        }
    }
}

#[derive(Debug, StructOpt)]
struct ListOperation {
    #[structopt(short = "p", long = "phase")]
    phases: Vec<Phase>,

    #[structopt(flatten)]
    filter: FilterArgs,

    #[structopt(long)]
    json: bool,
}

#[derive(Debug, StructOpt)]
struct ArchiveOperation {
    /// phases to archive [default: COMPLETED]
    #[structopt(short = "p", long = "phase")]
    phases: Vec<Phase>,

    #[structopt(flatten)]
    filter: FilterArgs,
}

#[derive(Debug, StructOpt)]
struct RerunOperation {
    #[structopt(flatten)]
    filter: FilterArgs,

    #[structopt(short = "q", long, default_value = "1m")]
    queue: Queue,

    #[structopt(long, default_value = "rerun")]
    new_run_id: String,
}

#[derive(Debug, StructOpt)]
struct SubmitFilesOperation {
    #[structopt(name = "DIR", parse(from_os_str), default_value = ".")]
    dir: PathBuf,

    /// wait at most this many seconds for each job
    #[structopt(long)]
    wait: Option<u64>,
}

fn main() -> Result<()> {
    let opt = Opt::from_args();
    let default_level = if opt.debug { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let mut config = ClientConfig::load(opt.config.as_deref())?;
    config.apply_env(|name| std::env::var(name).ok());
    config.apply_flags(opt.url.as_deref(), opt.token.as_deref());
    debug!("{:?}", config);
    if let Some(required) = &config.min_version {
        ensure_compatible(required)?;
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("could not start the runtime")?;
    let output = runtime.block_on(execute(opt.operation, &config))?;
    if !output.is_empty() {
        println!("{}", output.trim_end());
    }
    Ok(())
}

async fn execute(operation: Operation, config: &ClientConfig) -> Result<String> {
    let service = HttpTapService::new(config.session()?);
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });
    let job_url_file = |path: Option<PathBuf>| {
        JobUrlFile::new(path.unwrap_or_else(|| config.job_url_file.clone()))
    };

    match operation {
        Operation::Sync(op) => {
            let input = query_input(op.query, None, None);
            operations::sync(&service, input, op.output.as_deref()).await
        }
        Operation::Submit(op) => {
            let mode = op.wait_mode();
            let file = job_url_file(op.job_url_file);
            let input = query_input(op.query, op.queue, op.run_id);
            operations::submit(&service, input, mode, &file, op.output.as_deref(), &cancel).await
        }
        Operation::Retrieve(op) => {
            let file = job_url_file(op.job_url_file);
            operations::retrieve(&service, op.job_url.as_deref(), &file, op.output.as_deref())
                .await
        }
        Operation::Status(op) => operations::status(&service, &op.job_url).await,
        Operation::List(op) => {
            let filter = op.filter.into_filter(op.phases);
            operations::list(&service, &filter, op.json).await
        }
        Operation::Archive(op) => {
            let phases = if op.phases.is_empty() {
                vec![Phase::Completed]
            } else {
                op.phases
            };
            operations::archive(&service, &op.filter.into_filter(phases)).await
        }
        Operation::Rerun(op) => {
            let filter = op.filter.into_filter(vec![Phase::Archived]);
            operations::rerun(&service, &filter, op.queue, &op.new_run_id).await
        }
        Operation::SubmitFiles(op) => {
            operations::submit_files(&service, &op.dir, op.wait, &cancel).await
        }
    }
}

fn query_input(args: QueryArgs, queue: Option<Queue>, run_id: Option<String>) -> QueryInput {
    QueryInput {
        query: args.query,
        file: args.file,
        language: args.language,
        queue,
        run_id,
    }
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use structopt::StructOpt;
    use tap_data::{Language, Phase, Queue};

    use super::{Operation, Opt};
    use crate::operations::WaitMode;

    fn parse(args: &[&str]) -> Opt {
        Opt::from_iter_safe(std::iter::once("tap-client").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_parse_submit() {
        let opt = parse(&[
            "--url",
            "https://tap.example.org/tap",
            "submit",
            "-l",
            "adql",
            "-q",
            "1h",
            "-r",
            "halos",
            "--poll",
            "SELECT TOP 1 * FROM t",
        ]);
        assert_eq!(Some("https://tap.example.org/tap".to_string()), opt.url);
        match opt.operation {
            Operation::Submit(op) => {
                assert_eq!(Some("SELECT TOP 1 * FROM t".to_string()), op.query.query);
                assert_eq!(Some(Language::Adql), op.query.language);
                assert_eq!(Some(Queue::OneHour), op.queue);
                assert_eq!(Some("halos".to_string()), op.run_id);
                assert_eq!(WaitMode::Poll, op.wait_mode());
            }
            other => panic!("unexpected operation: {:?}", other),
        }
    }

    #[test]
    fn test_submit_from_file() {
        let opt = parse(&["-d", "submit", "-f", "query.sql", "--wait", "30"]);
        assert!(opt.debug);
        match opt.operation {
            Operation::Submit(op) => {
                assert_eq!(None, op.query.query);
                assert_eq!(Some(PathBuf::from("query.sql")), op.query.file);
                assert_eq!(WaitMode::Bounded(30), op.wait_mode());
            }
            other => panic!("unexpected operation: {:?}", other),
        }
    }

    #[test]
    fn test_submit_rejects_bad_arguments() {
        let args = |rest: &[&'static str]| std::iter::once("tap-client").chain(rest.to_vec());
        assert!(Opt::from_iter_safe(args(&["submit"])).is_err());
        assert!(Opt::from_iter_safe(args(&["submit", "-q", "2d", "SELECT 1"])).is_err());
        assert!(Opt::from_iter_safe(args(&["submit", "--wait", "5", "--detach", "SELECT 1"])).is_err());
        assert!(Opt::from_iter_safe(args(&["submit", "-f", "a.sql", "SELECT 1"])).is_err());
    }

    #[test]
    fn test_parse_list_phases() {
        let opt = parse(&["list", "-p", "completed", "-p", "ERROR", "--last", "5", "--json"]);
        match opt.operation {
            Operation::List(op) => {
                assert_eq!(vec![Phase::Completed, Phase::Error], op.phases);
                assert_eq!(Some(5), op.filter.last);
                assert!(op.json);
            }
            other => panic!("unexpected operation: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rerun_defaults() {
        let opt = parse(&["rerun", "--last", "2"]);
        match opt.operation {
            Operation::Rerun(op) => {
                assert_eq!(Queue::OneMinute, op.queue);
                assert_eq!("rerun", op.new_run_id);
                assert_eq!(Some(2), op.filter.last);
            }
            other => panic!("unexpected operation: {:?}", other),
        }
    }

    #[test]
    fn test_parse_submit_files() {
        let opt = parse(&["submit-files"]);
        match opt.operation {
            Operation::SubmitFiles(op) => {
                assert_eq!(PathBuf::from("."), op.dir);
                assert_eq!(None, op.wait);
            }
            other => panic!("unexpected operation: {:?}", other),
        }
    }
}
