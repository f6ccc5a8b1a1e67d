#![allow(clippy::result_large_err)]

use std::process::ExitCode;
use std::sync::Arc;

use assay::executor::ExecutorError;
use assay::executor::HttpTransport;
use assay::model::Environment;
use assay::model::SuiteDefinition;
use assay::model::SuiteResult;
use assay::model::SuiteStatus;
use assay::parser::Assay;
use assay::runner::RunEvent;
use assay::runner::Runner;
use assay::store::MemoryStore;
use assay::store::ResultStore;
use assay::store::StoreError;
use assay::validator::ValidationError;
use assay::validator::Validator;
use assay::validator::Workspace;
use clap::Parser;
use miette::Diagnostic;
use miette::Result;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::outputter::OutPutter;
use crate::outputter::print_statistics;

mod cli;
mod outputter;

#[derive(Error, Debug, Diagnostic)]
pub enum AssayError {
    #[error("Failed to read workspace file")]
    FileError(#[from] std::io::Error),

    #[error("Failed to parse toml file")]
    TomlParsing(#[from] toml::de::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    ValidationError(#[from] ValidationError),

    #[error("No environment named `{0}`")]
    UnknownEnvironment(String),

    #[error("No suite named `{0}`")]
    UnknownSuite(String),

    #[error("No request named `{0}`")]
    UnknownRequest(String),

    #[error("Failed to set up the HTTP client")]
    Transport(#[from] ExecutorError),

    #[error("Failed to read stored results")]
    Store(#[from] StoreError),

    #[error("Failed to serialize results")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write report to {path}")]
    ReportWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Reads the workspace file named on the command line and validates it into
/// runnable definitions.
fn load_and_validate_config(cli: &Cli) -> Result<Workspace, AssayError> {
    let contents = std::fs::read_to_string(&cli.path).map_err(AssayError::FileError)?;
    let assay: Assay = toml::from_str(&contents).map_err(AssayError::TomlParsing)?;

    let workspace = Validator::new(&assay, contents.as_str(), cli.path.as_str())
        .validate()
        .map_err(AssayError::ValidationError)?;

    info!(
        requests = workspace.requests.len(),
        tests = workspace.tests.len(),
        suites = workspace.suites.len(),
        "workspace loaded"
    );

    Ok(workspace)
}

/// `--env` by name, else the environment marked default, else none.
fn select_environment<'a>(
    workspace: &'a Workspace,
    name: Option<&str>,
) -> Result<Option<&'a Environment>, AssayError> {
    match name {
        Some(name) => workspace
            .environment(name)
            .map(Some)
            .ok_or_else(|| AssayError::UnknownEnvironment(name.into())),
        None => Ok(workspace.default_environment()),
    }
}

fn select_suites<'a>(
    workspace: &'a Workspace,
    name: Option<&str>,
) -> Result<Vec<&'a SuiteDefinition>, AssayError> {
    match name {
        Some(name) => workspace
            .suite(name)
            .map(|suite| vec![suite])
            .ok_or_else(|| AssayError::UnknownSuite(name.into())),
        None => Ok(workspace.suites.iter().collect()),
    }
}

/// Spawns the outputter task that renders runner events as they arrive. It
/// finishes once every sender has been dropped.
fn spawn_outputter(path: &str) -> (flume::Sender<RunEvent>, JoinHandle<()>) {
    let (runner_tx, outputter_rx) = flume::unbounded::<RunEvent>();
    let outputter_path = path.to_owned();

    let outputter_handle = tokio::spawn(async move {
        OutPutter::start(outputter_rx, &outputter_path).await;
    });

    (runner_tx, outputter_handle)
}

/// Waits for the outputter to drain. A panicked or cancelled outputter is
/// logged and reported as `false`; the run itself still stands.
async fn join_outputter(handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, "outputter task failed");
            false
        }
    }
}

fn write_report(path: &str, results: &[SuiteResult]) -> Result<(), AssayError> {
    let json = serde_json::to_string_pretty(results)?;
    std::fs::write(path, json).map_err(|source| AssayError::ReportWrite {
        path: path.into(),
        source,
    })
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let workspace = load_and_validate_config(&cli)?;
    let environment = select_environment(&workspace, cli.env.as_deref())?;

    let transport = Arc::new(
        HttpTransport::new(&workspace.settings.client_options()).map_err(AssayError::Transport)?,
    );
    let store = Arc::new(MemoryStore::new());
    let concurrency = cli
        .concurrency
        .map(usize::from)
        .unwrap_or(workspace.settings.concurrency);

    let runner = Runner::new(transport, store.clone())
        .with_environment(environment)
        .with_concurrency(concurrency);

    // Single request mode: print the envelope and stop.
    if let Some(name) = &cli.request {
        let template = workspace
            .request(name)
            .ok_or_else(|| AssayError::UnknownRequest(name.clone()))?;
        let envelope = runner.execute_request(template).await;
        println!(
            "{}",
            serde_json::to_string_pretty(&envelope).map_err(AssayError::Serialize)?
        );

        return Ok(if envelope.error.is_none() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    let suites = select_suites(&workspace, cli.suite.as_deref())?;
    let (runner_tx, outputter_handle) = spawn_outputter(&cli.path);
    let runner = runner.with_events(runner_tx);

    let mut results = Vec::with_capacity(suites.len());
    for suite in suites {
        results.push(runner.run_suite(suite).await);
    }

    // Closes the event channel so the outputter can print its summary.
    drop(runner);
    join_outputter(outputter_handle).await;

    let stats = store.statistics().await.map_err(AssayError::Store)?;
    print_statistics(&stats);

    if let Some(path) = &cli.report {
        write_report(path, &results)?;
        info!(path, "report written");
    }

    let all_completed = results
        .iter()
        .all(|suite| suite.status == SuiteStatus::Completed);

    Ok(if all_completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
