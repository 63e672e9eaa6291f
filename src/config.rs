//! Configuration document.
//!
//! Loaded from `<data_dir>/config/config.json`. Values under `download` can
//! be overridden with `TGDL_*` environment variables; env wins over the file,
//! the file wins over built-in defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const MB: u64 = 1024 * 1024;

/// Media families accepted by the allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    Audio,
    Document,
}

impl MediaKind {
    /// Whether a mime type belongs to this family.
    pub fn matches(&self, mime: &str) -> bool {
        match self {
            Self::Video => mime.contains("video"),
            Self::Audio => mime.contains("audio"),
            Self::Document => mime.contains("application"),
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
            Self::Document => write!(f, "document"),
        }
    }
}

/// Where the transfer semaphore lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyScope {
    /// Each channel gets its own budget.
    #[default]
    PerChannel,
    /// All channels share one budget.
    Global,
}

/// Fetch/execute/retry tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    pub batch_size: usize,
    pub max_concurrent_downloads: usize,
    pub concurrency_scope: ConcurrencyScope,
    pub wait_interval_seconds: u64,
    pub initial_retry_delay: u64,
    pub max_retry_delay: u64,
    /// 0 means retry forever.
    pub max_retries: u32,
    pub max_file_size_mb: u64,
    pub min_file_size_mb: u64,
    pub dedup_capacity: usize,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            batch_size: 15,
            max_concurrent_downloads: 3,
            concurrency_scope: ConcurrencyScope::PerChannel,
            wait_interval_seconds: 300,
            initial_retry_delay: 1,
            max_retry_delay: 1800,
            max_retries: 0,
            max_file_size_mb: 500,
            min_file_size_mb: 0,
            dedup_capacity: 500,
        }
    }
}

impl DownloadSettings {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(MB)
    }

    pub fn min_file_size_bytes(&self) -> u64 {
        self.min_file_size_mb.saturating_mul(MB)
    }

    pub fn wait_interval(&self) -> Duration {
        Duration::from_secs(self.wait_interval_seconds)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_retry_delay)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_retry_delay)
    }

    /// Apply `TGDL_*` overrides from the given lookup.
    fn apply_env(&mut self, lookup: &dyn Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        fn parse<T: std::str::FromStr>(
            lookup: &dyn Fn(&str) -> Option<String>,
            var: &str,
            slot: &mut T,
        ) -> Result<(), ConfigError> {
            if let Some(raw) = lookup(var) {
                *slot = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    key: var.to_string(),
                    message: format!("cannot parse '{raw}'"),
                })?;
            }
            Ok(())
        }

        parse(lookup, "TGDL_BATCH_SIZE", &mut self.batch_size)?;
        parse(
            lookup,
            "TGDL_MAX_CONCURRENT_DOWNLOADS",
            &mut self.max_concurrent_downloads,
        )?;
        parse(lookup, "TGDL_WAIT_INTERVAL_SECONDS", &mut self.wait_interval_seconds)?;
        parse(lookup, "TGDL_INITIAL_RETRY_DELAY", &mut self.initial_retry_delay)?;
        parse(lookup, "TGDL_MAX_RETRY_DELAY", &mut self.max_retry_delay)?;
        parse(lookup, "TGDL_MAX_RETRIES", &mut self.max_retries)?;
        parse(lookup, "TGDL_MAX_FILE_SIZE_MB", &mut self.max_file_size_mb)?;
        parse(lookup, "TGDL_MIN_FILE_SIZE_MB", &mut self.min_file_size_mb)?;
        parse(lookup, "TGDL_DEDUP_CAPACITY", &mut self.dedup_capacity)?;
        if let Some(scope) = lookup("TGDL_CONCURRENCY_SCOPE") {
            self.concurrency_scope = match scope.trim() {
                "global" => ConcurrencyScope::Global,
                "per_channel" => ConcurrencyScope::PerChannel,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: "TGDL_CONCURRENCY_SCOPE".to_string(),
                        message: format!("expected 'global' or 'per_channel', got '{other}'"),
                    });
                }
            };
        }
        Ok(())
    }
}

/// Pre-classification filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    /// Case-insensitive regexes matched against the document filename.
    pub exclude_patterns: Vec<String>,
    /// Empty means every language is accepted.
    pub allowed_languages: Vec<String>,
    /// Minimum detector confidence for a language verdict to count.
    pub language_threshold: f32,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            exclude_patterns: Vec::new(),
            allowed_languages: Vec::new(),
            language_threshold: 0.6,
        }
    }
}

/// How the audio quality oracle compares files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityCheckType {
    #[default]
    Size,
    Bitrate,
    Both,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityCheckSettings {
    pub enabled: bool,
    pub check_type: QualityCheckType,
    pub min_size_mb: f64,
    pub min_bitrate_kbps: u32,
}

impl Default for QualityCheckSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            check_type: QualityCheckType::Size,
            min_size_mb: 1.0,
            min_bitrate_kbps: 128,
        }
    }
}

/// A sharing-service link recognizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderPattern {
    pub name: String,
    /// Regex matching the share URL.
    pub pattern: String,
    /// Regex whose first capture group is the access code.
    #[serde(default)]
    pub access_code_pattern: Option<String>,
    /// Words that hint a relay message points at this provider.
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl ProviderPattern {
    fn new(name: &str, pattern: &str, code: Option<&str>, keywords: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_string(),
            access_code_pattern: code.map(str::to_string),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }

    /// Built-in recognizers for common sharing services.
    pub fn defaults() -> Vec<Self> {
        const CODE: &str = r"(?:提取码|访问码|密码|pwd|code)\s*[:：=]?\s*([A-Za-z0-9]{4})";
        vec![
            Self::new(
                "baidu",
                r"https?://pan\.baidu\.com/s/[A-Za-z0-9_\-]+(?:\?pwd=[A-Za-z0-9]+)?",
                Some(CODE),
                &["baidu", "百度"],
            ),
            Self::new(
                "aliyun",
                r"https?://(?:www\.)?(?:aliyundrive|alipan)\.com/s/[A-Za-z0-9]+",
                Some(CODE),
                &["aliyun", "阿里"],
            ),
            Self::new(
                "quark",
                r"https?://pan\.quark\.cn/s/[A-Za-z0-9]+",
                Some(CODE),
                &["quark", "夸克"],
            ),
            Self::new(
                "115",
                r"https?://(?:115|115cdn)\.com/s/[A-Za-z0-9]+(?:\?password=[A-Za-z0-9]+)?",
                Some(CODE),
                &["115"],
            ),
        ]
    }
}

/// Downstream endpoint receiving recognized links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitEndpoint {
    pub url: String,
    /// HMAC-SHA256 key for the signature header.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_submit_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_submit_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    pub providers: Vec<ProviderPattern>,
    pub submit: Option<SubmitEndpoint>,
    /// Provider name to bot username used for bot-mediated relays.
    pub relay_bots: HashMap<String, String>,
    pub relay_timeout_seconds: u64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            providers: ProviderPattern::defaults(),
            submit: None,
            relay_bots: HashMap::new(),
            relay_timeout_seconds: 30,
        }
    }
}

/// Connection to the message-source bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub base_url: String,
    pub token: Option<String>,
    pub connect_timeout_seconds: u64,
    pub request_timeout_seconds: u64,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8700".to_string(),
            token: None,
            connect_timeout_seconds: 30,
            request_timeout_seconds: 60,
        }
    }
}

/// The full configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub media_types: Vec<MediaKind>,
    pub selected_channels: Vec<String>,
    pub download: DownloadSettings,
    pub filters: FilterSettings,
    pub audio_quality_check: QualityCheckSettings,
    pub links: LinkSettings,
    pub source: SourceSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            media_types: vec![MediaKind::Video, MediaKind::Audio, MediaKind::Document],
            selected_channels: Vec::new(),
            download: DownloadSettings::default(),
            filters: FilterSettings::default(),
            audio_quality_check: QualityCheckSettings::default(),
            links: LinkSettings::default(),
            source: SourceSettings::default(),
        }
    }
}

impl Config {
    /// Load from `path`, falling back to defaults when the file is missing,
    /// then apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_file(path)?;
        config
            .download
            .apply_env(&|var| std::env::var(var).ok())?;
        if let Ok(token) = std::env::var("TGDL_SOURCE_TOKEN") {
            config.source.token = Some(token);
        }
        if let Ok(url) = std::env::var("TGDL_SOURCE_URL") {
            config.source.base_url = url;
        }
        config.validate()?;
        Ok(config)
    }

    /// Read the document without env overrides or validation.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
    }

    /// Write the document as pretty JSON, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Apply overrides from an arbitrary lookup (used by tests).
    pub fn apply_env_with(
        &mut self,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        self.download.apply_env(lookup)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: &str| ConfigError::InvalidValue {
            key: key.to_string(),
            message: message.to_string(),
        };
        let d = &self.download;
        if d.batch_size == 0 {
            return Err(invalid("download.batch_size", "must be at least 1"));
        }
        if d.max_concurrent_downloads == 0 {
            return Err(invalid(
                "download.max_concurrent_downloads",
                "must be at least 1",
            ));
        }
        if d.dedup_capacity == 0 {
            return Err(invalid("download.dedup_capacity", "must be at least 1"));
        }
        if d.min_file_size_mb > d.max_file_size_mb {
            return Err(invalid(
                "download.min_file_size_mb",
                "must not exceed max_file_size_mb",
            ));
        }
        if d.initial_retry_delay > d.max_retry_delay {
            return Err(invalid(
                "download.initial_retry_delay",
                "must not exceed max_retry_delay",
            ));
        }
        if !(0.0..=1.0).contains(&self.filters.language_threshold) {
            return Err(invalid("filters.language_threshold", "must be within 0..=1"));
        }
        for pattern in &self.filters.exclude_patterns {
            Regex::new(pattern)
                .map_err(|e| invalid("filters.exclude_patterns", &e.to_string()))?;
        }
        for provider in &self.links.providers {
            Regex::new(&provider.pattern)
                .map_err(|e| invalid(&format!("links.providers.{}", provider.name), &e.to_string()))?;
            if let Some(code) = &provider.access_code_pattern {
                Regex::new(code).map_err(|e| {
                    invalid(
                        &format!("links.providers.{}.access_code_pattern", provider.name),
                        &e.to_string(),
                    )
                })?;
            }
        }
        Ok(())
    }
}

/// Filesystem layout rooted at the data directory.
#[derive(Debug, Clone)]
pub struct Paths {
    pub data_dir: PathBuf,
}

impl Paths {
    /// `explicit`, else `TGDL_DATA_DIR`, else `./data`.
    pub fn resolve(explicit: Option<PathBuf>) -> Self {
        let data_dir = explicit
            .or_else(|| std::env::var("TGDL_DATA_DIR").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("./data"));
        Self { data_dir }
    }

    pub fn config_dir(&self) -> PathBuf {
        self.data_dir.join("config")
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir().join("config.json")
    }

    pub fn checkpoint_file(&self) -> PathBuf {
        self.config_dir().join("checkpoints.json")
    }

    pub fn media_dir(&self) -> PathBuf {
        self.data_dir.join("downloads")
    }
}
