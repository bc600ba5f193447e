use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::tts::EngineId;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid environment value {name}={value}")]
    Env { name: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub engines: EnginesConfig,
    pub staged: StagedConfig,
    pub cache: CacheConfig,
    pub text: TextConfig,
    pub audio: AudioConfig,
    pub stt: Option<SttConfig>,
    /// Voice name -> engine -> engine-local voice name
    pub aliases: HashMap<String, HashMap<EngineId, String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EnginesConfig {
    pub piper: PiperConfig,
    pub zonos: Option<HttpEngineConfig>,
    pub kokoro: Option<HttpEngineConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PiperConfig {
    pub enabled: bool,
    pub voices_dir: PathBuf,
}

impl Default for PiperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            voices_dir: PathBuf::from("./voices"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpEngineConfig {
    pub url: String,
    #[serde(default)]
    pub voices: Vec<String>,
    #[serde(default = "default_health_timeout_ms")]
    pub health_timeout_ms: u64,
}

fn default_health_timeout_ms() -> u64 {
    3_000
}

/// Staged synthesis policy: which engines render the intro and the main text,
/// how the text is cut, and how long each stage may take.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StagedConfig {
    pub intro_engine: Option<EngineId>,
    pub main_engine: Option<EngineId>,
    pub fallback_engine: Option<EngineId>,
    pub max_intro_len: usize,
    pub min_chunk_len: usize,
    pub max_chunk_len: usize,
    pub intro_timeout_ms: u64,
    pub chunk_timeout_ms: u64,
    pub total_timeout_ms: u64,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    pub allow_partial: bool,
}

impl Default for StagedConfig {
    fn default() -> Self {
        Self {
            intro_engine: Some(EngineId::Piper),
            main_engine: Some(EngineId::Zonos),
            fallback_engine: Some(EngineId::Zonos),
            max_intro_len: 120,
            min_chunk_len: 80,
            max_chunk_len: 400,
            intro_timeout_ms: 6_000,
            chunk_timeout_ms: 30_000,
            total_timeout_ms: 90_000,
            retry_count: 1,
            retry_delay_ms: 300,
            allow_partial: true,
        }
    }
}

impl StagedConfig {
    pub fn intro_timeout(&self) -> Duration {
        Duration::from_millis(self.intro_timeout_ms)
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }

    pub fn total_timeout(&self) -> Duration {
        Duration::from_millis(self.total_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 256,
            ttl_secs: 3_600,
            sweep_interval_secs: 60,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TextConfig {
    /// Strip markdown-like markup (headers, bullets, emphasis, links)
    pub sanitize: bool,
    /// Restrict output to the ASCII safe set, transliterating where possible
    pub strict_ascii: bool,
    pub remove_diacritics: bool,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            sanitize: true,
            strict_ascii: false,
            remove_diacritics: false,
        }
    }
}

/// Amplitude bounds for inbound microphone frames, as a fraction of full scale.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub min_rms: f32,
    pub max_rms: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            min_rms: 0.0,
            max_rms: 0.99,
        }
    }
}

/// Speech-to-text backend that receives finished utterances.
#[derive(Debug, Clone, Deserialize)]
pub struct SttConfig {
    pub url: String,
    #[serde(default = "default_stt_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_stt_timeout_ms() -> u64 {
    30_000
}

impl Config {
    /// Load from `TTS_CONFIG` (if set), then apply `HOST`, `PORT`, `VOICES_DIR`,
    /// `INTRO_ENGINE` and `MAIN_ENGINE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("TTS_CONFIG") {
            Ok(path) => Self::load(Path::new(&path))?,
            Err(_) => Self::default(),
        };

        if let Ok(host) = std::env::var("HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("PORT") {
            config.server.port = port.parse().map_err(|_| ConfigError::Env {
                name: "PORT",
                value: port,
            })?;
        }
        if let Ok(dir) = std::env::var("VOICES_DIR") {
            config.engines.piper.voices_dir = dir.into();
        }
        if let Ok(engine) = std::env::var("INTRO_ENGINE") {
            config.staged.intro_engine = Some(parse_engine("INTRO_ENGINE", engine)?);
        }
        if let Ok(engine) = std::env::var("MAIN_ENGINE") {
            config.staged.main_engine = Some(parse_engine("MAIN_ENGINE", engine)?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let staged = &self.staged;
        if staged.max_intro_len == 0 || staged.min_chunk_len == 0 || staged.max_chunk_len == 0 {
            return Err(ConfigError::Invalid(
                "intro and chunk lengths must be positive".into(),
            ));
        }
        if staged.min_chunk_len > staged.max_chunk_len {
            return Err(ConfigError::Invalid(format!(
                "min_chunk_len ({}) exceeds max_chunk_len ({})",
                staged.min_chunk_len, staged.max_chunk_len
            )));
        }
        if staged.intro_timeout_ms >= staged.total_timeout_ms
            || staged.chunk_timeout_ms >= staged.total_timeout_ms
        {
            return Err(ConfigError::Invalid(
                "per-task timeouts must be shorter than total_timeout_ms".into(),
            ));
        }
        if staged.intro_engine.is_none() && staged.main_engine.is_none() {
            return Err(ConfigError::Invalid(
                "at least one of intro_engine and main_engine must be set".into(),
            ));
        }
        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err(ConfigError::Invalid("cache.max_entries must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.audio.min_rms)
            || !(0.0..=1.0).contains(&self.audio.max_rms)
            || self.audio.min_rms >= self.audio.max_rms
        {
            return Err(ConfigError::Invalid(
                "audio rms bounds must satisfy 0 <= min_rms < max_rms <= 1".into(),
            ));
        }
        Ok(())
    }
}

fn parse_engine(name: &'static str, value: String) -> Result<EngineId, ConfigError> {
    value.parse().map_err(|_| ConfigError::Env { name, value })
}
