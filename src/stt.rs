//! Speech-to-text collaborator
//!
//! Transcription itself happens elsewhere; the server only hands over
//! validated utterances.

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use hound::{SampleFormat, WavSpec, WavWriter};
use serde::Deserialize;

use crate::config::SttConfig;
use crate::protocol::Utterance;

#[derive(thiserror::Error, Debug)]
pub enum TranscribeError {
    #[error("Failed to encode utterance: {0}")]
    Encode(#[from] hound::Error),

    #[error("Transcription backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, utterance: &Utterance) -> Result<String, TranscribeError>;
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    text: String,
}

/// Posts the utterance as a WAV body to `{url}/transcribe`, expecting
/// `{"text": ...}` back.
pub struct HttpTranscriber {
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpTranscriber {
    pub fn new(config: &SttConfig) -> Self {
        Self {
            url: format!("{}/transcribe", config.url.trim_end_matches('/')),
            timeout: Duration::from_millis(config.timeout_ms),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, utterance: &Utterance) -> Result<String, TranscribeError> {
        let wav = encode_wav(utterance)?;

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "audio/wav")
            .timeout(self.timeout)
            .body(wav)
            .send()
            .await
            .map_err(|e| TranscribeError::Backend(format!("{}: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TranscribeError::Backend(format!(
                "{} answered {}",
                self.url, status
            )));
        }

        let body: TranscribeResponse = response
            .json()
            .await
            .map_err(|e| TranscribeError::Backend(format!("Invalid transcription response: {}", e)))?;
        Ok(body.text)
    }
}

pub fn encode_wav(utterance: &Utterance) -> Result<Vec<u8>, TranscribeError> {
    let spec = WavSpec {
        channels: utterance.format.channels,
        sample_rate: utterance.format.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut buffer = Vec::new();
    {
        let mut writer = WavWriter::new(Cursor::new(&mut buffer), spec)?;
        for pair in utterance.pcm.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
        }
        writer.finalize()?;
    }
    Ok(buffer)
}
