//! Pipeline configuration (`[pipeline]` section of restyle.toml)
//!
//! Every key has a compiled default, so an absent section yields a usable
//! configuration pointing at executables on `PATH`.

use restyle_common::config::read_toml_file;
use restyle_common::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// How `fetch` resolves a source reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    /// Delegate to an external downloader executable
    #[default]
    Command,
    /// Plain HTTP(S) GET via reqwest
    Http,
}

/// Which file the style-transfer stage re-renders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StyleTransferInput {
    #[default]
    Vocals,
    /// Single-track mode: the raw fetched audio
    Source,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptionFormat {
    #[default]
    Lrc,
    Srt,
}

impl CaptionFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            CaptionFormat::Lrc => "lrc",
            CaptionFormat::Srt => "srt",
        }
    }
}

/// External executable settings of one stage
#[derive(Debug, Clone, Deserialize)]
pub struct ToolConfig {
    pub executable: PathBuf,
    /// Inserted before the positional arguments
    #[serde(default)]
    pub extra_args: Vec<String>,
    pub timeout_secs: u64,
}

impl ToolConfig {
    pub fn new(executable: impl Into<PathBuf>, timeout_secs: u64) -> Self {
        Self {
            executable: executable.into(),
            extra_args: Vec::new(),
            timeout_secs,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// `[pipeline.fetch]`
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(default)]
    pub mode: FetchMode,
    #[serde(default = "default_fetch_executable")]
    pub executable: PathBuf,
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            mode: FetchMode::default(),
            executable: default_fetch_executable(),
            extra_args: Vec::new(),
            timeout_secs: default_fetch_timeout(),
        }
    }
}

impl FetchConfig {
    pub fn tool(&self) -> ToolConfig {
        ToolConfig {
            executable: self.executable.clone(),
            extra_args: self.extra_args.clone(),
            timeout_secs: self.timeout_secs,
        }
    }
}

/// `[pipeline]`
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSettings {
    /// Permits shared by `separate` and `style-transfer`
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Fetch attempts including the first one
    #[serde(default = "default_fetch_max_attempts")]
    pub fetch_max_attempts: u32,

    /// Initial fetch backoff, doubled per attempt
    #[serde(default = "default_fetch_backoff_ms")]
    pub fetch_backoff_ms: u64,

    #[serde(default = "default_fetch_max_backoff_ms")]
    pub fetch_max_backoff_ms: u64,

    /// Finished jobs kept queryable before the oldest are evicted
    #[serde(default = "default_retained_jobs")]
    pub retained_jobs: usize,

    #[serde(default)]
    pub style_transfer_input: StyleTransferInput,

    #[serde(default)]
    pub caption_format: CaptionFormat,

    /// Extension of audio files the separation and style-transfer tools write
    #[serde(default = "default_audio_extension")]
    pub audio_extension: String,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default = "default_separate")]
    pub separate: ToolConfig,

    #[serde(default = "default_style_transfer")]
    pub style_transfer: ToolConfig,

    #[serde(default = "default_transcribe")]
    pub transcribe: ToolConfig,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            fetch_max_attempts: default_fetch_max_attempts(),
            fetch_backoff_ms: default_fetch_backoff_ms(),
            fetch_max_backoff_ms: default_fetch_max_backoff_ms(),
            retained_jobs: default_retained_jobs(),
            style_transfer_input: StyleTransferInput::default(),
            caption_format: CaptionFormat::default(),
            audio_extension: default_audio_extension(),
            fetch: FetchConfig::default(),
            separate: default_separate(),
            style_transfer: default_style_transfer(),
            transcribe: default_transcribe(),
        }
    }
}

fn default_worker_pool_size() -> usize {
    2
}

fn default_fetch_max_attempts() -> u32 {
    3
}

fn default_fetch_backoff_ms() -> u64 {
    500
}

fn default_fetch_max_backoff_ms() -> u64 {
    8000
}

fn default_retained_jobs() -> usize {
    1000
}

fn default_audio_extension() -> String {
    "wav".to_string()
}

fn default_fetch_executable() -> PathBuf {
    PathBuf::from("yt-dlp-audio")
}

fn default_fetch_timeout() -> u64 {
    300
}

fn default_separate() -> ToolConfig {
    ToolConfig::new("separate-stems", 900)
}

fn default_style_transfer() -> ToolConfig {
    ToolConfig::new("style-transfer", 1200)
}

fn default_transcribe() -> ToolConfig {
    ToolConfig::new("transcribe", 600)
}

/// Wrapper used to pull `[pipeline]` out of the shared config file
#[derive(Debug, Default, Deserialize)]
struct PipelineFile {
    #[serde(default)]
    pipeline: PipelineSettings,
}

impl PipelineSettings {
    /// Load `[pipeline]` from the config file, defaults when absent
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            Some(path) => read_toml_file::<PipelineFile>(path)?
                .map(|file| file.pipeline)
                .unwrap_or_default(),
            None => PipelineSettings::default(),
        };
        settings.validate()?;
        info!(
            worker_pool_size = settings.worker_pool_size,
            fetch_mode = ?settings.fetch.mode,
            caption_format = ?settings.caption_format,
            "Pipeline settings loaded"
        );
        Ok(settings)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.worker_pool_size == 0 {
            return Err(Error::Config(
                "pipeline.worker_pool_size must be at least 1".to_string(),
            ));
        }
        if self.fetch_max_attempts == 0 {
            return Err(Error::Config(
                "pipeline.fetch_max_attempts must be at least 1".to_string(),
            ));
        }
        let ext = self.audio_extension.trim();
        if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::Config(format!(
                "pipeline.audio_extension is invalid: {:?}",
                self.audio_extension
            )));
        }
        for (name, tool) in [
            ("separate", &self.separate),
            ("style_transfer", &self.style_transfer),
            ("transcribe", &self.transcribe),
        ] {
            if tool.timeout_secs == 0 {
                return Err(Error::Config(format!(
                    "pipeline.{}.timeout_secs must be at least 1",
                    name
                )));
            }
        }
        if self.fetch.timeout_secs == 0 {
            return Err(Error::Config(
                "pipeline.fetch.timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn fetch_backoff(&self) -> Duration {
        Duration::from_millis(self.fetch_backoff_ms)
    }

    pub fn fetch_max_backoff(&self) -> Duration {
        Duration::from_millis(self.fetch_max_backoff_ms.max(self.fetch_backoff_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.worker_pool_size, 2);
        assert_eq!(settings.fetch_max_attempts, 3);
        assert_eq!(settings.fetch.mode, FetchMode::Command);
        assert_eq!(settings.caption_format, CaptionFormat::Lrc);
        assert_eq!(settings.separate.timeout_secs, 900);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let file: PipelineFile = toml::from_str(
            r#"
            root_folder = "/ignored/here"

            [pipeline]
            worker_pool_size = 1
            caption_format = "srt"

            [pipeline.separate]
            executable = "/opt/demucs-wrapper"
            extra_args = ["--two-stems", "vocals"]
            timeout_secs = 60

            [pipeline.fetch]
            mode = "http"
            "#,
        )
        .unwrap();

        let settings = file.pipeline;
        assert_eq!(settings.worker_pool_size, 1);
        assert_eq!(settings.caption_format, CaptionFormat::Srt);
        assert_eq!(settings.separate.executable, PathBuf::from("/opt/demucs-wrapper"));
        assert_eq!(settings.separate.extra_args, vec!["--two-stems", "vocals"]);
        assert_eq!(settings.fetch.mode, FetchMode::Http);
        assert_eq!(settings.fetch.timeout_secs, 300);
        assert_eq!(settings.style_transfer.timeout_secs, 1200);
    }

    #[test]
    fn test_unknown_enum_value_rejected() {
        let result: std::result::Result<PipelineFile, _> = toml::from_str(
            r#"
            [pipeline]
            caption_format = "vtt"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut settings = PipelineSettings::default();
        settings.worker_pool_size = 0;
        assert!(matches!(settings.validate(), Err(Error::Config(_))));

        let mut settings = PipelineSettings::default();
        settings.fetch_max_attempts = 0;
        assert!(settings.validate().is_err());

        let mut settings = PipelineSettings::default();
        settings.audio_extension = "../wav".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = PipelineSettings::load(Some(&dir.path().join("none.toml"))).unwrap();
        assert_eq!(settings.worker_pool_size, 2);
    }
}
