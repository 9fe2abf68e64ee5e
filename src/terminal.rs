//! Terminal concerns: tracing setup, colour policy, the progress bar, and
//! line-mode prompts.

use std::fmt::Write as _;
use std::io::{self, BufRead, IsTerminal, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use ytgrab_core::catalog::format_duration;
use ytgrab_core::{FormatCatalog, ProgressReport, ProgressSink, ReportPhase};

pub(crate) fn no_color_env_requested() -> bool {
    std::env::var_os("NO_COLOR").is_some_and(|value| !value.is_empty())
}

pub(crate) fn is_dumb_terminal() -> bool {
    std::env::var("TERM")
        .map(|value| value.eq_ignore_ascii_case("dumb"))
        .unwrap_or(false)
}

pub(crate) fn should_disable_color(
    no_color_flag: bool,
    no_color_env: bool,
    dumb_terminal: bool,
) -> bool {
    no_color_flag || no_color_env || dumb_terminal
}

pub(crate) fn is_no_color_requested(no_color_flag: bool) -> bool {
    should_disable_color(no_color_flag, no_color_env_requested(), is_dumb_terminal())
}

pub(crate) fn should_show_progress_bar(
    stderr_is_terminal: bool,
    quiet: bool,
    dumb_terminal: bool,
) -> bool {
    stderr_is_terminal && !quiet && !dumb_terminal
}

/// Installs the stderr subscriber. `RUST_LOG` wins over `default_level`.
pub(crate) fn init_tracing(default_level: &str, no_color: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(!no_color)
        .with_env_filter(filter)
        .try_init();
}

/// indicatif-backed [`ProgressSink`] for one transfer.
pub(crate) struct TerminalProgress {
    bar: ProgressBar,
    sized: bool,
}

impl TerminalProgress {
    pub(crate) fn new(visible: bool) -> Self {
        let bar = if visible {
            let bar = ProgressBar::new_spinner();
            bar.set_style(spinner_style());
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        } else {
            ProgressBar::hidden()
        };
        Self { bar, sized: false }
    }
}

impl Drop for TerminalProgress {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner} {bytes} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner} [{bar:40}] {bytes}/{total_bytes} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

impl ProgressSink for TerminalProgress {
    fn update(&mut self, report: &ProgressReport) {
        match report.phase {
            ReportPhase::Downloading => {
                if let Some(total) = report.total_bytes
                    && report.fraction.is_some()
                {
                    if !self.sized {
                        self.bar.set_style(bar_style());
                        self.sized = true;
                    }
                    self.bar.set_length(total);
                }
                self.bar.set_position(report.downloaded_bytes);
                self.bar.set_message(progress_message(report));
            }
            ReportPhase::Processing => {
                let end = report
                    .total_bytes
                    .unwrap_or(report.downloaded_bytes)
                    .max(1);
                if !self.sized {
                    self.bar.set_style(bar_style());
                    self.sized = true;
                }
                self.bar.set_length(end);
                self.bar.set_position(end);
                self.bar.set_message("100.0% processing");
                self.bar.println(report.status_text());
            }
        }
    }
}

/// `50.0% at 1.50 MB/s, ETA 0m 3s`; the percentage is dropped while the total
/// is unknown.
pub(crate) fn progress_message(report: &ProgressReport) -> String {
    match report.percent_text() {
        Some(percent) => format!("{percent} at {}, ETA {}", report.speed, report.eta),
        None => format!("at {}, ETA {}", report.speed, report.eta),
    }
}

/// Prints `prompt` and reads one line. `None` on end of input.
pub(crate) fn prompt_line(prompt: &str) -> Result<Option<String>> {
    let mut stdout = io::stdout();
    write!(stdout, "{prompt}").context("Failed to write prompt")?;
    stdout.flush().context("Failed to flush prompt")?;

    let mut line = String::new();
    let read = io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

pub(crate) fn stderr_is_terminal() -> bool {
    io::stderr().is_terminal()
}

/// Title, duration, and view count block shown before the table.
pub(crate) fn render_catalog_header(catalog: &FormatCatalog) -> String {
    let views = catalog
        .view_count()
        .map_or_else(|| "Unknown".to_string(), |views| views.to_string());
    format!(
        "Video: {}\nDuration: {}\nViews: {views}",
        catalog.title(),
        format_duration(catalog.duration_secs())
    )
}

/// Fixed-width formats table, one row per display index.
pub(crate) fn render_catalog_table(catalog: &FormatCatalog) -> String {
    let rule = "-".repeat(80);
    let mut out = String::new();
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(
        out,
        "{:<5} {:<10} {:<12} {:<6} {:<10} {:<6} {:<12}",
        "ID", "Format ID", "Resolution", "FPS", "Size", "Type", "Audio/Video"
    );
    let _ = writeln!(out, "{rule}");
    for row in catalog.rows() {
        let _ = writeln!(
            out,
            "{:<5} {:<10} {:<12} {:<6} {:<10} {:<6} {:<12}",
            row.index, row.format_id, row.resolution, row.fps, row.size, row.container, row.content
        );
    }
    out
}
