//! HTTP-backed engines (Zonos, Kokoro)
//!
//! Both backends speak the same small protocol:
//! - `POST {url}/synthesize` with `{"text", "voice"}`, answering with a WAV body
//! - `GET {url}/health`, answering 2xx when the model is loaded

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use hound::{SampleFormat, WavReader};
use serde::Serialize;

use super::{Engine, EngineError, EngineId, SynthesisResult};
use crate::config::HttpEngineConfig;

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    voice: &'a str,
}

pub struct HttpEngine {
    id: EngineId,
    base_url: String,
    voices: Vec<String>,
    health_timeout: Duration,
    client: reqwest::Client,
}

impl HttpEngine {
    pub fn new(id: EngineId, config: &HttpEngineConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("staged-tts-server/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            id,
            base_url: config.url.trim_end_matches('/').to_string(),
            voices: config.voices.clone(),
            health_timeout: Duration::from_millis(config.health_timeout_ms),
            client,
        }
    }
}

#[async_trait]
impl Engine for HttpEngine {
    fn id(&self) -> EngineId {
        self.id
    }

    fn voices(&self) -> Vec<String> {
        self.voices.clone()
    }

    async fn health_check(&self) -> Result<(), EngineError> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(self.health_timeout)
            .send()
            .await
            .map_err(|e| EngineError::Unavailable(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(EngineError::Unavailable(format!(
                "{} answered {}",
                url,
                response.status()
            )));
        }
        Ok(())
    }

    async fn synthesize(&self, text: &str, voice: &str) -> Result<SynthesisResult, EngineError> {
        let url = format!("{}/synthesize", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&SynthesizeRequest { text, voice })
            .send()
            .await
            .map_err(|e| EngineError::Backend(format!("{} request failed: {}", self.id, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Backend(format!(
                "{} answered {}: {}",
                self.id,
                status,
                body.trim()
            )));
        }

        let wav = response
            .bytes()
            .await
            .map_err(|e| EngineError::Backend(format!("{} body read failed: {}", self.id, e)))?;

        decode_wav(&wav)
    }
}

/// Decode a WAV body into 16-bit PCM, converting float or wider integer samples.
pub fn decode_wav(data: &[u8]) -> Result<SynthesisResult, EngineError> {
    let reader = WavReader::new(Cursor::new(data))
        .map_err(|e| EngineError::Backend(format!("Invalid WAV response: {}", e)))?;
    let spec = reader.spec();

    let samples: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => reader
            .into_samples::<i16>()
            .collect::<Result<_, _>>()
            .map_err(|e| EngineError::Backend(format!("Invalid WAV samples: {}", e)))?,
        (SampleFormat::Int, bits) if bits <= 32 => {
            let shift = bits.saturating_sub(16);
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| (v >> shift) as i16))
                .collect::<Result<_, _>>()
                .map_err(|e| EngineError::Backend(format!("Invalid WAV samples: {}", e)))?
        }
        (SampleFormat::Float, 32) => reader
            .into_samples::<f32>()
            .map(|s| s.map(|v| (v * 32767.0).clamp(-32768.0, 32767.0) as i16))
            .collect::<Result<_, _>>()
            .map_err(|e| EngineError::Backend(format!("Invalid WAV samples: {}", e)))?,
        (format, bits) => {
            return Err(EngineError::Backend(format!(
                "Unsupported WAV encoding: {:?} {}-bit",
                format, bits
            )))
        }
    };

    Ok(SynthesisResult::from_samples(
        &samples,
        spec.sample_rate,
        spec.channels,
    ))
}
