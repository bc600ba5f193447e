use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use async_trait::async_trait;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use parking_lot::{Mutex, RwLock};

use super::voice::{scan_voices, PiperVoice};
use super::{Engine, EngineError, EngineId, SynthesisResult};

/// Local Piper voices run through ONNX Runtime. Each voice model is loaded
/// on first use and kept for the lifetime of the engine.
pub struct PiperEngine {
    inner: Arc<PiperInner>,
}

struct PiperInner {
    voices_dir: PathBuf,
    voices: Vec<String>,
    models: RwLock<HashMap<String, Arc<PiperModel>>>,
}

struct PiperModel {
    session: Mutex<Session>,
    sample_rate: u32,
    espeak_voice: String,
    phoneme_id_map: HashMap<String, Vec<i64>>,
    noise_scale: f32,
    length_scale: f32,
    noise_w: f32,
}

impl PiperEngine {
    pub fn new(voices_dir: PathBuf) -> Self {
        let voices = scan_voices(&voices_dir);
        Self {
            inner: Arc::new(PiperInner {
                voices_dir,
                voices,
                models: RwLock::new(HashMap::new()),
            }),
        }
    }
}

impl PiperInner {
    fn model(&self, voice_id: &str) -> Result<Arc<PiperModel>, EngineError> {
        if let Some(model) = self.models.read().get(voice_id) {
            return Ok(Arc::clone(model));
        }

        let voice = PiperVoice::load(&self.voices_dir, voice_id)?;
        let model = Arc::new(PiperModel::load(&voice)?);

        self.models
            .write()
            .insert(voice_id.to_string(), Arc::clone(&model));
        tracing::debug!("Loaded Piper voice {}", voice_id);

        Ok(model)
    }

    fn synthesize(&self, text: &str, voice_id: &str) -> Result<SynthesisResult, EngineError> {
        let model = self.model(voice_id)?;
        let phonemes = phonemize(text, &model.espeak_voice)?;
        let ids = phonemes_to_ids(&phonemes, &model.phoneme_id_map);
        let samples = model.infer(&ids)?;

        Ok(SynthesisResult::from_samples(
            &samples_to_pcm(&samples),
            model.sample_rate,
            1,
        ))
    }
}

impl PiperModel {
    fn load(voice: &PiperVoice) -> Result<Self, EngineError> {
        let session = Session::builder()
            .map_err(|e| EngineError::Backend(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| EngineError::Backend(format!("Failed to set optimization level: {}", e)))?
            .with_intra_threads(4)
            .map_err(|e| EngineError::Backend(format!("Failed to set threads: {}", e)))?
            .commit_from_file(&voice.model_path)
            .map_err(|e| EngineError::Backend(format!("Failed to load model: {}", e)))?;

        let inference = voice.config.inference.clone().unwrap_or_default();

        Ok(Self {
            session: Mutex::new(session),
            sample_rate: voice.config.audio.sample_rate,
            espeak_voice: voice.espeak_voice().to_string(),
            phoneme_id_map: voice.config.phoneme_id_map.clone(),
            noise_scale: inference.noise_scale,
            length_scale: inference.length_scale,
            noise_w: inference.noise_w,
        })
    }

    fn infer(&self, phoneme_ids: &[i64]) -> Result<Vec<f32>, EngineError> {
        if phoneme_ids.is_empty() {
            return Ok(Vec::new());
        }

        let input_len = phoneme_ids.len();

        // input: [batch, sequence] = [1, phoneme_count]
        let input_value = Value::from_array((vec![1, input_len], phoneme_ids.to_vec()))
            .map_err(|e| EngineError::Backend(format!("Failed to create input tensor: {}", e)))?;

        let lengths_value = Value::from_array((vec![1], vec![input_len as i64]))
            .map_err(|e| EngineError::Backend(format!("Failed to create lengths tensor: {}", e)))?;

        // scales: [noise_scale, length_scale, noise_w]
        let scales_value = Value::from_array((
            vec![3],
            vec![self.noise_scale, self.length_scale, self.noise_w],
        ))
        .map_err(|e| EngineError::Backend(format!("Failed to create scales tensor: {}", e)))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![input_value, lengths_value, scales_value])
            .map_err(|e| EngineError::Backend(format!("Inference failed: {}", e)))?;

        let output = outputs
            .get("output")
            .or_else(|| outputs.get("audio"))
            .ok_or_else(|| EngineError::Backend("Missing output tensor".to_string()))?;

        let output_view = output
            .try_extract_tensor::<f32>()
            .map_err(|e| EngineError::Backend(format!("Failed to extract output tensor: {}", e)))?;

        Ok(output_view.1.to_vec())
    }
}

#[async_trait]
impl Engine for PiperEngine {
    fn id(&self) -> EngineId {
        EngineId::Piper
    }

    fn voices(&self) -> Vec<String> {
        self.inner.voices.clone()
    }

    async fn health_check(&self) -> Result<(), EngineError> {
        if self.inner.voices.is_empty() {
            return Err(EngineError::Unavailable(format!(
                "no voices in {}",
                self.inner.voices_dir.display()
            )));
        }

        let status = tokio::process::Command::new("espeak-ng")
            .arg("--version")
            .output()
            .await
            .map_err(|e| {
                EngineError::Unavailable(format!("espeak-ng not runnable (is it installed?): {}", e))
            })?
            .status;

        if !status.success() {
            return Err(EngineError::Unavailable(format!(
                "espeak-ng exited with {}",
                status
            )));
        }
        Ok(())
    }

    async fn synthesize(&self, text: &str, voice: &str) -> Result<SynthesisResult, EngineError> {
        if !self.inner.voices.iter().any(|v| v == voice) {
            return Err(EngineError::VoiceNotSupported(voice.to_string()));
        }

        let inner = Arc::clone(&self.inner);
        let text = text.to_string();
        let voice = voice.to_string();

        tokio::task::spawn_blocking(move || inner.synthesize(&text, &voice))
            .await
            .map_err(|e| EngineError::Backend(format!("Piper worker failed: {}", e)))?
    }
}

/// Convert text to phonemes using espeak-ng
pub fn phonemize(text: &str, voice: &str) -> Result<String, EngineError> {
    if text.is_empty() {
        return Ok(String::new());
    }

    let output = Command::new("espeak-ng")
        .args(["--ipa", "-q", "-v", voice, text])
        .output()
        .map_err(|e| {
            EngineError::Backend(format!("Failed to run espeak-ng (is it installed?): {}", e))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(EngineError::Backend(format!("espeak-ng failed: {}", stderr)));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Map phonemes to model ids, framed by BOS/EOS and padded between symbols.
pub fn phonemes_to_ids(phonemes: &str, id_map: &HashMap<String, Vec<i64>>) -> Vec<i64> {
    let mut ids = Vec::new();

    match id_map.get("^") {
        Some(bos) => ids.extend(bos),
        None => ids.push(0),
    }

    let pad = id_map.get("_");
    let mut buf = [0u8; 4];
    for ch in phonemes.chars() {
        if let Some(mapped) = id_map.get(&*ch.encode_utf8(&mut buf)) {
            ids.extend(mapped);
        }
        if let Some(pad) = pad {
            ids.extend(pad);
        }
    }

    match id_map.get("$") {
        Some(eos) => ids.extend(eos),
        None => ids.push(0),
    }

    ids
}

/// f32 model output in [-1.0, 1.0] to 16-bit samples, with Piper's 2x gain.
pub fn samples_to_pcm(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|s| (s * 2.0 * 32767.0).clamp(-32768.0, 32767.0) as i16)
        .collect()
}
