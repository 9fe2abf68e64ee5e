//! Application configuration loading for CLI defaults.

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use ytgrab_core::AudioQuality;
use ytgrab_core::pipeline::{MAX_CONCURRENT_FRAGMENTS, MIN_CONCURRENT_FRAGMENTS};

/// File configuration for ytgrab defaults.
#[derive(Debug, Clone, Default)]
pub struct FileConfig {
    /// Default output directory for downloads.
    pub output_dir: Option<PathBuf>,
    /// Fragments fetched concurrently (same range as CLI).
    pub concurrent_fragments: Option<u8>,
    /// mp3 bitrate used for audio extraction.
    pub audio_quality: Option<AudioQuality>,
    /// yt-dlp executable.
    pub ytdlp_path: Option<PathBuf>,
    /// Listen address of the interactive surface.
    pub bind: Option<SocketAddr>,
    /// Default verbosity mode.
    pub verbosity: Option<VerbositySetting>,
}

impl FileConfig {
    /// Validates config values against CLI constraints.
    pub fn validate(&self) -> Result<()> {
        if let Some(fragments) = self.concurrent_fragments
            && !(MIN_CONCURRENT_FRAGMENTS..=MAX_CONCURRENT_FRAGMENTS).contains(&fragments)
        {
            bail!(
                "Invalid config value for `concurrent_fragments`: {fragments}. Expected range: {MIN_CONCURRENT_FRAGMENTS}..={MAX_CONCURRENT_FRAGMENTS}"
            );
        }
        if let Some(path) = &self.ytdlp_path
            && path.as_os_str().is_empty()
        {
            bail!("Invalid config value for `ytdlp_path`: must not be empty");
        }
        Ok(())
    }
}

/// Supported config verbosity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbositySetting {
    Default,
    Verbose,
    Quiet,
    Debug,
}

impl VerbositySetting {
    /// Default tracing level for this setting.
    #[must_use]
    pub fn log_level(self) -> &'static str {
        match self {
            Self::Default => "info",
            Self::Verbose => "debug",
            Self::Quiet => "error",
            Self::Debug => "trace",
        }
    }
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed file config when a config file exists and was valid.
    pub config: Option<FileConfig>,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/ytgrab/config.toml`
/// 2. `$HOME/.config/ytgrab/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("ytgrab")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("ytgrab")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from default path if present.
pub fn load_default_file_config() -> Result<LoadedConfig> {
    let path = resolve_default_config_path();
    let config = match path.as_deref() {
        Some(path_ref) if path_ref.exists() => Some(load_file_config(path_ref)?),
        _ => None,
    };
    Ok(LoadedConfig { path, config })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_no = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };

        let key = raw_key.trim();
        let value = raw_value.trim();

        match key {
            "output_dir" => {
                let parsed = parse_string_literal(value)
                    .with_context(|| format!("Invalid `output_dir` value on line {line_no}"))?;
                cfg.output_dir = Some(PathBuf::from(parsed));
            }
            "concurrent_fragments" => {
                let parsed = parse_integer_u8(value).with_context(|| {
                    format!("Invalid `concurrent_fragments` value on line {line_no}")
                })?;
                cfg.concurrent_fragments = Some(parsed);
            }
            "audio_quality" => {
                let parsed = parse_string_literal(value)
                    .with_context(|| format!("Invalid `audio_quality` value on line {line_no}"))?;
                let quality = parsed.parse::<AudioQuality>().map_err(|err| {
                    anyhow::anyhow!("Invalid `audio_quality` value on line {line_no}: {err}")
                })?;
                cfg.audio_quality = Some(quality);
            }
            "ytdlp_path" => {
                let parsed = parse_string_literal(value)
                    .with_context(|| format!("Invalid `ytdlp_path` value on line {line_no}"))?;
                cfg.ytdlp_path = Some(PathBuf::from(parsed));
            }
            "bind" => {
                let parsed = parse_string_literal(value)
                    .with_context(|| format!("Invalid `bind` value on line {line_no}"))?;
                let addr = parsed.parse::<SocketAddr>().with_context(|| {
                    format!("Invalid `bind` address '{parsed}' on line {line_no}")
                })?;
                cfg.bind = Some(addr);
            }
            "verbosity" => {
                let parsed = parse_string_literal(value)
                    .with_context(|| format!("Invalid `verbosity` value on line {line_no}"))?;
                cfg.verbosity = Some(parse_verbosity(&parsed).with_context(|| {
                    format!("Invalid `verbosity` value '{parsed}' on line {line_no}")
                })?);
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u8(raw_value: &str) -> Result<u8> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<u16>()?;
    u8::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u8"))
}

fn parse_verbosity(value: &str) -> Result<VerbositySetting> {
    match value {
        "default" => Ok(VerbositySetting::Default),
        "verbose" => Ok(VerbositySetting::Verbose),
        "quiet" => Ok(VerbositySetting::Quiet),
        "debug" => Ok(VerbositySetting::Debug),
        _ => bail!("Expected one of: default, verbose, quiet, debug"),
    }
}
