use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::convert::{downmix, pcm16_bytes_to_f32};
use crate::error::DecodeError;

/// Encoding of an inbound audio fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentFormat {
    Mp3,
    Wav,
    /// Headerless little-endian PCM16 mono
    #[serde(skip)]
    Pcm16 { sample_rate: u32 },
}

impl FragmentFormat {
    fn extension(&self) -> Option<&'static str> {
        match self {
            FragmentFormat::Mp3 => Some("mp3"),
            FragmentFormat::Wav => Some("wav"),
            FragmentFormat::Pcm16 { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum FragmentData {
    /// Still base64 text, as it arrived in an `audio_chunk` message
    Base64(String),
    Bytes(Bytes),
}

/// One inbound unit of assistant speech
#[derive(Debug, Clone)]
pub struct AudioFragment {
    pub data: FragmentData,
    pub format: FragmentFormat,
}

impl AudioFragment {
    pub fn from_base64(audio: String, format: FragmentFormat) -> Self {
        Self {
            data: FragmentData::Base64(audio),
            format,
        }
    }

    pub fn from_bytes(bytes: impl Into<Bytes>, format: FragmentFormat) -> Self {
        Self {
            data: FragmentData::Bytes(bytes.into()),
            format,
        }
    }

    /// Encoded bytes; base64 is decoded lazily so a bad payload fails
    /// here, inside the playback queue, and nowhere else.
    pub fn bytes(&self) -> Result<Cow<'_, [u8]>, DecodeError> {
        let bytes: Cow<'_, [u8]> = match &self.data {
            FragmentData::Base64(text) => {
                Cow::Owned(base64::engine::general_purpose::STANDARD.decode(text)?)
            }
            FragmentData::Bytes(bytes) => Cow::Borrowed(bytes.as_ref()),
        };

        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        Ok(bytes)
    }
}

/// Decoded mono audio
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration_ms(&self) -> u64 {
        self.samples.len() as u64 * 1000 / self.sample_rate.max(1) as u64
    }
}

/// Turns fragments into playable samples
#[async_trait::async_trait]
pub trait FragmentDecoder: Send + Sync {
    async fn decode(&self, fragment: &AudioFragment) -> Result<DecodedAudio, DecodeError>;
}

/// symphonia for compressed / containerized fragments, direct conversion
/// for raw PCM16
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoder;

#[async_trait::async_trait]
impl FragmentDecoder for SymphoniaDecoder {
    async fn decode(&self, fragment: &AudioFragment) -> Result<DecodedAudio, DecodeError> {
        let bytes = fragment.bytes()?.into_owned();
        let format = fragment.format;

        if let FragmentFormat::Pcm16 { sample_rate } = format {
            return decode_pcm16(&bytes, sample_rate);
        }

        tokio::task::spawn_blocking(move || decode_container(bytes, format))
            .await
            .map_err(|e| DecodeError::Unsupported(format!("decoder task failed: {}", e)))?
    }
}

pub fn decode_pcm16(bytes: &[u8], sample_rate: u32) -> Result<DecodedAudio, DecodeError> {
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::OddPcmLength(bytes.len()));
    }

    Ok(DecodedAudio {
        samples: pcm16_bytes_to_f32(bytes),
        sample_rate,
    })
}

/// Probe and decode a whole mp3 / wav blob
pub fn decode_container(bytes: Vec<u8>, format: FragmentFormat) -> Result<DecodedAudio, DecodeError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = format.extension() {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut reader = probed.format;

    let (track_id, codec_params) = {
        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DecodeError::Unsupported("no audio track".to_string()))?;
        (track.id, track.codec_params.clone())
    };

    let mut decoder =
        symphonia::default::get_codecs().make(&codec_params, &DecoderOptions::default())?;

    let mut sample_rate = codec_params.sample_rate.unwrap_or(0);
    let mut samples = Vec::new();

    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref err))
                if err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(err) => return Err(err.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(buffer) => {
                let spec = *buffer.spec();
                sample_rate = spec.rate;
                let mut interleaved = SampleBuffer::<f32>::new(buffer.capacity() as u64, spec);
                interleaved.copy_interleaved_ref(buffer);
                samples.extend(downmix(interleaved.samples(), spec.channels.count()));
            }
            // A corrupt frame inside an otherwise good fragment is skipped
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(err) => return Err(err.into()),
        }
    }

    if samples.is_empty() || sample_rate == 0 {
        return Err(DecodeError::Empty);
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}
