use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use super::EngineError;

/// Piper's `<voice>.onnx.json` sidecar.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceConfig {
    pub audio: VoiceAudio,
    pub espeak: Option<EspeakConfig>,
    #[serde(default)]
    pub phoneme_id_map: HashMap<String, Vec<i64>>,
    #[serde(default)]
    pub inference: Option<InferenceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoiceAudio {
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EspeakConfig {
    pub voice: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_noise_scale")]
    pub noise_scale: f32,
    #[serde(default = "default_length_scale")]
    pub length_scale: f32,
    #[serde(default = "default_noise_w")]
    pub noise_w: f32,
}

fn default_noise_scale() -> f32 {
    0.667
}

fn default_length_scale() -> f32 {
    1.0
}

fn default_noise_w() -> f32 {
    0.8
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            noise_scale: default_noise_scale(),
            length_scale: default_length_scale(),
            noise_w: default_noise_w(),
        }
    }
}

#[derive(Debug)]
pub struct PiperVoice {
    pub config: VoiceConfig,
    pub model_path: PathBuf,
}

impl PiperVoice {
    pub fn load(voices_dir: &Path, voice_id: &str) -> Result<Self, EngineError> {
        let model_path = voices_dir.join(format!("{}.onnx", voice_id));
        let config_path = voices_dir.join(format!("{}.onnx.json", voice_id));

        if !model_path.exists() {
            return Err(EngineError::VoiceNotSupported(voice_id.to_string()));
        }

        if !config_path.exists() {
            return Err(EngineError::VoiceNotSupported(format!(
                "{} (missing config file)",
                voice_id
            )));
        }

        let file = File::open(&config_path)
            .map_err(|e| EngineError::Backend(format!("Failed to open voice config: {}", e)))?;
        let config: VoiceConfig = serde_json::from_reader(file)
            .map_err(|e| EngineError::Backend(format!("Invalid voice config: {}", e)))?;

        Ok(Self { config, model_path })
    }

    pub fn espeak_voice(&self) -> &str {
        self.config
            .espeak
            .as_ref()
            .map(|e| e.voice.as_str())
            .unwrap_or("en")
    }
}

/// Ids of every voice in `voices_dir` that has both a model and a config.
pub fn scan_voices(voices_dir: &Path) -> Vec<String> {
    let entries = match std::fs::read_dir(voices_dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut voices: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().map(|e| e == "onnx").unwrap_or(false))
        .filter_map(|path| {
            let id = path.file_stem()?.to_string_lossy().to_string();
            voices_dir
                .join(format!("{}.onnx.json", id))
                .exists()
                .then_some(id)
        })
        .collect();
    voices.sort();
    voices
}
