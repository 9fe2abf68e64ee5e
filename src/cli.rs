//! CLI argument definitions using clap derive macros.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use ytgrab_core::AudioQuality;
use ytgrab_core::pipeline::{MAX_CONCURRENT_FRAGMENTS, MIN_CONCURRENT_FRAGMENTS};

/// Download a video or its audio in the encoding of your choice.
///
/// ytgrab lists every format the source offers, lets you pick one (or takes
/// the best combined stream), asks before touching a file that already
/// exists, and shows progress while yt-dlp does the transfer.
#[derive(Parser, Debug)]
#[command(name = "ytgrab")]
#[command(author, version, about)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub download: DownloadArgs,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the interactive download form as a local JSON service
    Serve(ServeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to listen on [default: 127.0.0.1:8501]
    #[arg(long)]
    pub bind: Option<SocketAddr>,

    /// Default download directory offered by the form
    #[arg(short = 'o', long = "output", value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Path to the yt-dlp executable
    #[arg(long = "ytdlp", value_name = "PATH")]
    pub ytdlp_path: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Disable colored log output
    #[arg(long)]
    pub no_color: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct DownloadArgs {
    /// Video URLs (prompted for when omitted)
    pub urls: Vec<String>,

    /// Directory to save downloads in [default: ~/Downloads]
    #[arg(short = 'o', long = "output", value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Format expression passed to yt-dlp instead of prompting
    #[arg(short = 'f', long, value_name = "EXPR", conflicts_with = "best")]
    pub format: Option<String>,

    /// Download the best combined format without prompting
    #[arg(short = 'b', long)]
    pub best: bool,

    /// Re-download over existing files without asking
    #[arg(long)]
    pub force: bool,

    /// Fragments downloaded concurrently (1-16) [default: 5]
    #[arg(
        short = 'N',
        long,
        value_parser = clap::value_parser!(u8).range(i64::from(MIN_CONCURRENT_FRAGMENTS)..=i64::from(MAX_CONCURRENT_FRAGMENTS))
    )]
    pub concurrent_fragments: Option<u8>,

    /// mp3 bitrate in kbps when extracting audio (192, 256, 320) [default: 192]
    #[arg(long, value_name = "KBPS")]
    pub audio_quality: Option<AudioQuality>,

    /// Path to the yt-dlp executable
    #[arg(long = "ytdlp", value_name = "PATH")]
    pub ytdlp_path: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Disable colored log output
    #[arg(long)]
    pub no_color: bool,
}
