//! CLI entry point for ytgrab.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{debug, error, info, warn};
use ytgrab_core::catalog::format_size;
use ytgrab_core::collision::now_unix_secs;
use ytgrab_core::extractor::DEFAULT_PROGRAM;
use ytgrab_core::web::{self, AppState, DEFAULT_BIND, FormState};
use ytgrab_core::{
    CollisionDecision, CollisionEngine, DEFAULT_CONCURRENT_FRAGMENTS, DownloadOutcome, DownloadPlan, Extractor,
    FetchError, FormatSelector, Step, TransferOptions, UserChoice, YtDlp, ensure_directory,
    execute, fetch_catalog, parse_selection_input, resolve_selection,
};

mod app_config;
mod cli;
mod terminal;

use app_config::{FileConfig, load_default_file_config};
use cli::{Cli, Command, DownloadArgs, ServeArgs};

/// Process exit outcome derived from per-URL results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    Success,
    Partial,
    Failure,
}

impl From<ProcessExit> for ExitCode {
    fn from(exit: ProcessExit) -> Self {
        match exit {
            ProcessExit::Success => ExitCode::SUCCESS,
            ProcessExit::Partial => ExitCode::from(2),
            ProcessExit::Failure => ExitCode::FAILURE,
        }
    }
}

/// Maps succeeded (downloaded or skipped) and failed URL counts to an exit outcome.
pub(crate) fn determine_exit_outcome(succeeded: usize, failed: usize) -> ProcessExit {
    if failed == 0 {
        ProcessExit::Success
    } else if succeeded > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();
    match run(cli).await {
        Ok(exit) => exit.into(),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ProcessExit> {
    let loaded = load_default_file_config()?;
    let file_config = loaded.config.unwrap_or_default();

    match cli.command {
        Some(Command::Serve(args)) => {
            start_tracing(args.verbose, args.quiet, args.no_color, &file_config);
            debug!(config = ?loaded.path, "Configuration resolved");
            run_server(args, &file_config).await
        }
        None => {
            let args = cli.download;
            start_tracing(args.verbose, args.quiet, args.no_color, &file_config);
            debug!(config = ?loaded.path, ?args, "Configuration resolved");
            run_downloads(args, &file_config).await
        }
    }
}

/// Priority: `RUST_LOG` > `--quiet` > `-v`/`-vv` > config `verbosity` > info.
fn resolve_default_log_level(verbose: u8, quiet: bool, file_config: &FileConfig) -> &'static str {
    if quiet {
        "error"
    } else {
        match verbose {
            0 => file_config
                .verbosity
                .map_or("info", app_config::VerbositySetting::log_level),
            1 => "debug",
            _ => "trace",
        }
    }
}

fn start_tracing(verbose: u8, quiet: bool, no_color: bool, file_config: &FileConfig) {
    let level = resolve_default_log_level(verbose, quiet, file_config);
    terminal::init_tracing(level, terminal::is_no_color_requested(no_color));
}

fn default_output_dir() -> PathBuf {
    dirs::home_dir().map_or_else(|| PathBuf::from("."), |home| home.join("Downloads"))
}

fn build_extractor(cli_path: Option<PathBuf>, file_config: &FileConfig) -> YtDlp {
    let program = cli_path
        .or_else(|| file_config.ytdlp_path.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PROGRAM));
    YtDlp::new(program)
}

/// Creates the requested directory, falling back to the default one when it
/// cannot be created.
async fn prepare_output_dir(requested: Option<PathBuf>) -> Result<PathBuf> {
    let default_dir = default_output_dir();
    let requested = requested.unwrap_or_else(|| default_dir.clone());

    match ensure_directory(&requested).await {
        Ok(created) => {
            if created {
                println!("Created output directory: {}", requested.display());
            }
            Ok(requested)
        }
        Err(err) if requested != default_dir => {
            error!(error = %err, "Could not use requested output directory");
            warn!(path = %default_dir.display(), "Falling back to default output directory");
            ensure_directory(&default_dir)
                .await
                .context("Default output directory is not usable either")?;
            Ok(default_dir)
        }
        Err(err) => Err(err.into()),
    }
}

async fn run_server(args: ServeArgs, file_config: &FileConfig) -> Result<ProcessExit> {
    let bind: SocketAddr = match args.bind.or(file_config.bind) {
        Some(addr) => addr,
        None => DEFAULT_BIND
            .parse()
            .context("Invalid built-in bind address")?,
    };
    let directory = args
        .output_dir
        .or_else(|| file_config.output_dir.clone())
        .unwrap_or_else(default_output_dir);
    let options = TransferOptions {
        concurrent_fragments: file_config
            .concurrent_fragments
            .unwrap_or(DEFAULT_CONCURRENT_FRAGMENTS),
        audio_quality: file_config.audio_quality.unwrap_or_default(),
    };
    let extractor: Arc<dyn Extractor> = Arc::new(build_extractor(args.ytdlp_path, file_config));
    let state = AppState::new(extractor, FormState::with_defaults(directory, options));

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    println!("Serving the download form on http://{bind}");

    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("Could not install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
        info!("Shutting down");
    };
    web::serve(listener, state, shutdown)
        .await
        .context("Server stopped unexpectedly")?;
    Ok(ProcessExit::Success)
}

async fn run_downloads(args: DownloadArgs, file_config: &FileConfig) -> Result<ProcessExit> {
    let output_dir = prepare_output_dir(
        args.output_dir
            .clone()
            .or_else(|| file_config.output_dir.clone()),
    )
    .await?;
    println!("Files will be saved to: {}", output_dir.display());

    let mut urls = args.urls.clone();
    if urls.is_empty() {
        let answer = terminal::prompt_line("Enter video URL: ")?.unwrap_or_default();
        if !answer.is_empty() {
            urls.push(answer);
        }
    }
    if urls.is_empty() {
        println!("No URLs provided. Exiting.");
        return Ok(ProcessExit::Success);
    }

    let extractor = build_extractor(args.ytdlp_path.clone(), file_config);
    let options = TransferOptions {
        concurrent_fragments: args
            .concurrent_fragments
            .or(file_config.concurrent_fragments)
            .unwrap_or(DEFAULT_CONCURRENT_FRAGMENTS),
        audio_quality: args
            .audio_quality
            .or(file_config.audio_quality)
            .unwrap_or_default(),
    };
    let show_bar = terminal::should_show_progress_bar(
        terminal::stderr_is_terminal(),
        args.quiet,
        terminal::is_dumb_terminal(),
    );

    let mut succeeded = 0usize;
    let mut failed = 0usize;
    for url in &urls {
        println!("\nProcessing: {url}");
        match download_one(&extractor, url, &output_dir, &args, options, show_bar).await {
            Ok(outcome) => {
                report_outcome(&outcome);
                succeeded += 1;
            }
            Err(err) => {
                error!(url = %url, error = %err, "Download failed");
                println!("Error: {err}");
                failed += 1;
            }
        }
    }

    if urls.len() > 1 {
        println!("\nDownloaded {succeeded} of {} videos", urls.len());
    }
    info!(succeeded, failed, total = urls.len(), "Run complete");
    Ok(determine_exit_outcome(succeeded, failed))
}

/// Chooses the selector for one URL and builds its plan.
async fn plan_download<E: Extractor + ?Sized>(
    extractor: &E,
    url: &str,
    output_dir: &Path,
    args: &DownloadArgs,
    options: TransferOptions,
) -> Result<DownloadPlan, FetchError> {
    let catalog = fetch_catalog(extractor, url).await?;
    println!("\n{}", terminal::render_catalog_header(&catalog));

    let selector = if args.best {
        FormatSelector::BestCombined
    } else if let Some(expression) = &args.format {
        FormatSelector::from_expression(expression)
    } else {
        println!("\nAvailable formats:");
        print!("{}", terminal::render_catalog_table(&catalog));
        let answer = terminal::prompt_line(
            "\nSelect format number (or press Enter for best quality): ",
        )
        .ok()
        .flatten()
        .unwrap_or_default();
        let index = parse_selection_input(&answer);
        if !answer.is_empty() && index.is_none_or(|i| i >= catalog.len()) {
            println!("Invalid selection, using best quality");
        }
        resolve_selection(&catalog, index)
    };

    if let FormatSelector::Stream { id, .. } = &selector {
        println!("Selected format ID: {id}");
        if let Some(size) = catalog
            .find_stream(id)
            .and_then(|stream| stream.approximate_size_bytes)
        {
            println!("Estimated size: {}", format_size(Some(size)));
        }
    }

    Ok(DownloadPlan::new(
        url,
        output_dir,
        catalog.title(),
        selector,
        options,
    ))
}

async fn download_one<E: Extractor + ?Sized>(
    extractor: &E,
    url: &str,
    output_dir: &Path,
    args: &DownloadArgs,
    options: TransferOptions,
    show_bar: bool,
) -> Result<DownloadOutcome> {
    let plan = plan_download(extractor, url, output_dir, args, options).await?;
    println!("\nDownloading with format: {}", plan.selector.expression());

    let mut engine = CollisionEngine::new();
    if let Step::AwaitingUserDecision { existing } = engine.evaluate(&plan.target, args.force) {
        for path in &existing {
            println!("\nFile already exists: {}", path.display());
        }
        let answer = terminal::prompt_line("Do you want to re-download? (y/n, or 'r' to rename): ")?
            .unwrap_or_default();
        let choice = UserChoice::from_line_answer(&answer);
        engine
            .decide(&plan.target, choice, now_unix_secs())
            .context("Collision decision was not pending")?;
    }
    let Some(decision) = engine.commit() else {
        bail!("No collision decision was reached for {url}");
    };
    if let CollisionDecision::RenameWithSuffix { suffix } = &decision {
        println!("Will download with new filename including timestamp: {suffix}");
    }

    let progress = terminal::TerminalProgress::new(show_bar);
    Ok(execute(extractor, &plan, &decision, progress).await?)
}

fn report_outcome(outcome: &DownloadOutcome) {
    match outcome {
        DownloadOutcome::Completed { path, size_bytes } => {
            println!(
                "Downloaded successfully: {} ({})",
                path.display(),
                format_size(Some(*size_bytes))
            );
        }
        DownloadOutcome::Unverified(warning) => {
            warn!(%warning, "Post-download verification failed");
            println!("Warning: {warning}");
            if let Some(reported) = &warning.reported {
                println!("yt-dlp reported: {}", reported.display());
            }
        }
        DownloadOutcome::Skipped { .. } => println!("Download skipped."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_outcome_success_when_no_failures() {
        assert_eq!(determine_exit_outcome(3, 0), ProcessExit::Success);
        assert_eq!(determine_exit_outcome(0, 0), ProcessExit::Success);
    }

    #[test]
    fn test_exit_outcome_partial_when_mixed() {
        assert_eq!(determine_exit_outcome(2, 1), ProcessExit::Partial);
    }

    #[test]
    fn test_exit_outcome_failure_when_all_failed() {
        assert_eq!(determine_exit_outcome(0, 2), ProcessExit::Failure);
    }

    #[test]
    fn test_log_level_priority() {
        let quiet_config = FileConfig {
            verbosity: Some(app_config::VerbositySetting::Quiet),
            ..FileConfig::default()
        };
        assert_eq!(resolve_default_log_level(0, false, &FileConfig::default()), "info");
        assert_eq!(resolve_default_log_level(0, false, &quiet_config), "error");
        assert_eq!(resolve_default_log_level(1, false, &quiet_config), "debug");
        assert_eq!(resolve_default_log_level(2, false, &FileConfig::default()), "trace");
        assert_eq!(resolve_default_log_level(2, true, &FileConfig::default()), "error");
    }

    #[tokio::test]
    async fn test_prepare_output_dir_creates_requested_directory() {
        let temp = tempfile::TempDir::new().unwrap();
        let requested = temp.path().join("videos");
        let dir = prepare_output_dir(Some(requested.clone())).await.unwrap();
        assert_eq!(dir, requested);
        assert!(requested.is_dir());
    }
}
