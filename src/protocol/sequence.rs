//! Outbound chunk framing
//!
//! One [`ChunkSequence`] per synthesis request:
//! `AwaitingChunks -> (chunk)* -> SequenceEnd`. Nothing may follow the end
//! marker, and the end marker is sent exactly once.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use super::{ChunkHeader, ServerEvent};
use crate::staged::{Chunk, SynthesisError, SynthesisReport, SynthesisState};

const PCM_FORMAT: &str = "s16le";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// JSON text with base64 audio
    Json,
    /// `u32 BE header length | JSON header | PCM`
    Binary,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(String),
    Binary(Bytes),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceStatus {
    Completed,
    Partial,
    Idle,
    Failed,
}

impl SequenceStatus {
    pub fn from_outcome(outcome: &Result<SynthesisReport, SynthesisError>) -> Self {
        match outcome {
            Ok(report) if report.state == SynthesisState::Idle => Self::Idle,
            Ok(report) if report.partial => Self::Partial,
            Ok(_) => Self::Completed,
            Err(_) => Self::Failed,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SequenceError {
    #[error("Sequence already ended")]
    Ended,

    #[error("Chunk {index} already sent")]
    Duplicate { index: usize },

    #[error("Chunk index {index} out of range for total {total}")]
    OutOfRange { index: usize, total: usize },

    #[error("Chunk total changed from {expected} to {got}")]
    TotalMismatch { expected: usize, got: usize },

    #[error("Failed to encode chunk header: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingChunks,
    SequenceEnd,
}

#[derive(Debug)]
pub struct ChunkSequence {
    encoding: Encoding,
    state: State,
    total: Option<usize>,
    sent: Vec<bool>,
    succeeded: usize,
}

impl ChunkSequence {
    pub fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            state: State::AwaitingChunks,
            total: None,
            sent: Vec::new(),
            succeeded: 0,
        }
    }

    pub fn is_ended(&self) -> bool {
        self.state == State::SequenceEnd
    }

    pub fn delivered(&self) -> usize {
        self.sent.iter().filter(|s| **s).count()
    }

    /// Frame a chunk for the wire. Consumes the chunk: its PCM moves into the
    /// outbound message.
    pub fn push(&mut self, chunk: Chunk) -> Result<Outbound, SequenceError> {
        let (header, pcm) = self.accept(chunk)?;

        match self.encoding {
            Encoding::Json => {
                let header = ChunkHeader {
                    audio: pcm.map(|pcm| BASE64.encode(&pcm)),
                    ..header
                };
                Ok(Outbound::Text(ServerEvent::AudioChunk(header).to_json()?))
            }
            Encoding::Binary => {
                let json = serde_json::to_vec(&ServerEvent::AudioChunk(header))?;
                let pcm = pcm.unwrap_or_default();
                let mut buf = BytesMut::with_capacity(4 + json.len() + pcm.len());
                buf.put_u32(json.len() as u32);
                buf.put_slice(&json);
                buf.put_slice(&pcm);
                Ok(Outbound::Binary(buf.freeze()))
            }
        }
    }

    /// Frame a chunk as a typed event with base64 audio, whatever the
    /// sequence's encoding.
    pub fn push_event(&mut self, chunk: Chunk) -> Result<ServerEvent, SequenceError> {
        let (header, pcm) = self.accept(chunk)?;
        Ok(ServerEvent::AudioChunk(ChunkHeader {
            audio: pcm.map(|pcm| BASE64.encode(&pcm)),
            ..header
        }))
    }

    /// Close the sequence. Callable once; the marker goes out even when no
    /// chunk was produced.
    pub fn finish(
        &mut self,
        status: SequenceStatus,
        reason: Option<String>,
    ) -> Result<ServerEvent, SequenceError> {
        if self.is_ended() {
            return Err(SequenceError::Ended);
        }
        self.state = State::SequenceEnd;

        let total = self.total.unwrap_or(0);
        let delivered = self.delivered();
        if delivered < total {
            tracing::warn!("Sequence ended with {} of {} chunks delivered", delivered, total);
        }

        Ok(ServerEvent::SequenceEnd {
            total,
            delivered,
            succeeded: self.succeeded,
            status,
            reason,
        })
    }

    fn accept(&mut self, chunk: Chunk) -> Result<(ChunkHeader, Option<Bytes>), SequenceError> {
        if self.is_ended() {
            return Err(SequenceError::Ended);
        }

        let total = *self.total.get_or_insert(chunk.total);
        if chunk.total != total {
            return Err(SequenceError::TotalMismatch {
                expected: total,
                got: chunk.total,
            });
        }
        if chunk.index >= total {
            return Err(SequenceError::OutOfRange {
                index: chunk.index,
                total,
            });
        }

        self.sent.resize(total, false);
        if self.sent[chunk.index] {
            return Err(SequenceError::Duplicate { index: chunk.index });
        }
        self.sent[chunk.index] = true;

        let success = chunk.is_success();
        if success {
            self.succeeded += 1;
        }

        let (sample_rate, channels, duration_ms, pcm) = match chunk.audio {
            Some(audio) => {
                let duration_ms = audio.duration_ms();
                (audio.sample_rate, audio.channels, duration_ms, Some(audio.pcm))
            }
            None => (0, 0, 0, None),
        };

        let header = ChunkHeader {
            index: chunk.index,
            total,
            stage: chunk.stage,
            engine_used: chunk.engine_used,
            success,
            error: chunk.error,
            text: chunk.text,
            sample_rate,
            channels,
            format: PCM_FORMAT,
            duration_ms,
            from_cache: chunk.from_cache,
            audio: None,
        };
        Ok((header, pcm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staged::{Stage, UnitInfo};
    use crate::tts::{EngineId, SynthesisResult};
    use serde_json::Value;

    fn unit(index: usize, total: usize) -> UnitInfo {
        UnitInfo {
            index,
            total,
            stage: if index == 0 { Stage::Intro } else { Stage::Main },
            text: format!("Teil {}", index),
            engine: EngineId::Piper,
        }
    }

    fn ok_chunk(index: usize, total: usize) -> Chunk {
        let audio = SynthesisResult::from_samples(&[1, -1, 2, -2], 22050, 1);
        Chunk::succeeded(&unit(index, total), EngineId::Piper, audio, false)
    }

    fn failed_chunk(index: usize, total: usize) -> Chunk {
        Chunk::failed(&unit(index, total), EngineId::Zonos, "zonos: timed out")
    }

    fn text(outbound: Outbound) -> Value {
        match outbound {
            Outbound::Text(text) => serde_json::from_str(&text).unwrap(),
            Outbound::Binary(_) => panic!("expected a text frame"),
        }
    }

    #[test]
    fn json_chunk_carries_metadata_and_audio() {
        let mut seq = ChunkSequence::new(Encoding::Json);
        let value = text(seq.push(ok_chunk(0, 2)).unwrap());

        assert_eq!(value["type"], "audio_chunk");
        assert_eq!(value["index"], 0);
        assert_eq!(value["total"], 2);
        assert_eq!(value["engine_used"], "piper");
        assert_eq!(value["stage"], "intro");
        assert_eq!(value["sample_rate"], 22050);
        assert_eq!(value["format"], "s16le");
        assert_eq!(value["success"], true);

        let pcm = BASE64.decode(value["audio"].as_str().unwrap()).unwrap();
        assert_eq!(pcm, vec![1, 0, 255, 255, 2, 0, 254, 255]);
    }

    #[test]
    fn binary_chunk_prefixes_header_length() {
        let mut seq = ChunkSequence::new(Encoding::Binary);
        let Outbound::Binary(frame) = seq.push(ok_chunk(1, 2)).unwrap() else {
            panic!("expected a binary frame");
        };

        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        let header: Value = serde_json::from_slice(&frame[4..4 + len]).unwrap();
        assert_eq!(header["index"], 1);
        assert!(header.get("audio").is_none());
        assert_eq!(&frame[4 + len..], &[1, 0, 255, 255, 2, 0, 254, 255]);
    }

    #[test]
    fn failed_chunk_keeps_its_slot() {
        let mut seq = ChunkSequence::new(Encoding::Json);
        seq.push(ok_chunk(1, 2)).unwrap();
        let value = text(seq.push(failed_chunk(0, 2)).unwrap());

        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "zonos: timed out");
        assert!(value.get("audio").is_none());

        let end = seq.finish(SequenceStatus::Partial, None).unwrap();
        assert_eq!(
            end,
            ServerEvent::SequenceEnd {
                total: 2,
                delivered: 2,
                succeeded: 1,
                status: SequenceStatus::Partial,
                reason: None,
            }
        );
    }

    #[test]
    fn nothing_follows_the_end_marker() {
        let mut seq = ChunkSequence::new(Encoding::Json);
        seq.push(ok_chunk(0, 1)).unwrap();
        seq.finish(SequenceStatus::Completed, None).unwrap();

        assert!(matches!(seq.push(ok_chunk(0, 1)), Err(SequenceError::Ended)));
        assert!(matches!(
            seq.finish(SequenceStatus::Completed, None),
            Err(SequenceError::Ended)
        ));
    }

    #[test]
    fn rejects_duplicates_and_inconsistent_totals() {
        let mut seq = ChunkSequence::new(Encoding::Json);
        seq.push(ok_chunk(0, 3)).unwrap();

        assert!(matches!(
            seq.push(ok_chunk(0, 3)),
            Err(SequenceError::Duplicate { index: 0 })
        ));
        assert!(matches!(
            seq.push(ok_chunk(1, 4)),
            Err(SequenceError::TotalMismatch { expected: 3, got: 4 })
        ));
        assert!(matches!(
            seq.push(ok_chunk(3, 3)),
            Err(SequenceError::OutOfRange { index: 3, total: 3 })
        ));
    }

    #[test]
    fn empty_sequence_still_ends() {
        let mut seq = ChunkSequence::new(Encoding::Binary);
        let end = seq.finish(SequenceStatus::Idle, None).unwrap();
        assert!(matches!(
            end,
            ServerEvent::SequenceEnd {
                total: 0,
                delivered: 0,
                ..
            }
        ));
    }
}
