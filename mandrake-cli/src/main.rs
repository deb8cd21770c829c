//! Mandrake CLI
//!
//! Runs a command in a container on a remote Mandrake server, using the
//! current directory as the build context.

mod config;
mod session;
mod sync;

use clap::Parser;
use colored::*;
use mandrake_client::{DEFAULT_REQUEST_TIMEOUT, MandrakeClient, RetryPolicy};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use session::{Outcome, Project, Session, Settings};
use sync::Rsync;

const EXIT_FAILED: u8 = 1;
const EXIT_FATAL: u8 = 2;

#[derive(Parser)]
#[command(name = "mandrake")]
#[command(about = "Run a command in a container on a remote build host", long_about = None)]
struct Cli {
    /// Project configuration file
    #[arg(short, long, default_value = "Mandrake.toml")]
    mandrakefile: PathBuf,

    /// rsync exclude list used when sending the context
    #[arg(short, long, default_value = ".mandrakeignore")]
    ignorefile: PathBuf,

    /// Remote to run on (defaults to the one marked default, else the first)
    #[arg(short, long)]
    remote: Option<String>,

    /// Do not wait for a job that is already in progress
    #[arg(short, long)]
    force: bool,

    /// Create a new job even if one is cached for the remote
    #[arg(short, long)]
    create: bool,

    /// Job status polling interval
    #[arg(long, default_value_t = 1000)]
    poll_interval_ms: u64,

    /// Give up waiting on the job after this long
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Attempts per request when the server is unreachable
    #[arg(long, default_value_t = 5)]
    retries: u32,

    /// Abandon a single request to the server after this long
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT.as_secs())]
    request_timeout_secs: u64,

    /// Command to run inside the container
    #[arg(required = true, trailing_var_arg = true)]
    command: Vec<String>,
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            timeout: self.timeout_secs.map(Duration::from_secs),
            retry: RetryPolicy::with_attempts(self.retries),
            force: self.force,
            create: self.create,
        }
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mandrake=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    tokio::select! {
        code = run(cli) => code,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("{}", "Interrupted".yellow());
            ExitCode::SUCCESS
        }
    }
}

async fn run(cli: Cli) -> ExitCode {
    let opened = Project::open(&cli.mandrakefile, cli.remote.as_deref(), &cli.ignorefile);
    let mut project = match opened {
        Ok(project) => project,
        Err(e) => return fatal(&anyhow::Error::new(e)),
    };

    let remote = project.remote();
    tracing::info!("Using remote {} ({})", remote.name, remote.host);

    let client = match MandrakeClient::with_timeout(remote.host.clone(), cli.request_timeout()) {
        Ok(client) => client,
        Err(e) => return fatal(&anyhow::Error::new(e).context("Failed to build HTTP client")),
    };
    let rsync = Rsync::default();
    let session = Session::new(&client, &rsync, cli.settings());

    match session.run(&mut project, &cli.command).await {
        Ok(Outcome::Finished(job)) => {
            tracing::info!("Job {} finished", job.id);
            ExitCode::SUCCESS
        }
        Ok(Outcome::Failed(job)) => {
            tracing::info!("Job {} ended in {}", job.id, job.state);
            ExitCode::from(EXIT_FAILED)
        }
        Err(e) => fatal(&e),
    }
}

fn fatal(err: &anyhow::Error) -> ExitCode {
    eprintln!("{} {:#}", "Error:".red().bold(), err);
    ExitCode::from(EXIT_FATAL)
}
