//! Audio decoding via Symphonia.
//!
//! Raw file bytes go in, a planar [`PcmBuffer`] plus the file's descriptive
//! metadata come out. Anything Symphonia cannot probe or decode surfaces as
//! [`StudioError::Decode`].

use std::io::Cursor;
use std::path::Path;

use serde::{Deserialize, Serialize};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use crate::{PcmBuffer, Result, StudioError};

/// Descriptive metadata of a decoded input file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub size_bytes: u64,
    pub duration_seconds: f64,
    pub channels: usize,
    pub sample_rate: u32,
}

impl FileInfo {
    /// Describes a buffer that did not come from a file on disk.
    pub fn for_buffer(name: impl Into<String>, buffer: &PcmBuffer) -> Self {
        Self {
            name: name.into(),
            size_bytes: 0,
            duration_seconds: buffer.duration_seconds(),
            channels: buffer.channel_count(),
            sample_rate: buffer.sample_rate(),
        }
    }
}

/// Result of decoding one input file.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub buffer: PcmBuffer,
    pub info: FileInfo,
}

/// Decodes an in-memory audio file. `name` is only used as a format hint and
/// for the returned [`FileInfo`].
pub fn decode_bytes(name: &str, bytes: &[u8]) -> Result<DecodedAudio> {
    if bytes.is_empty() {
        return Err(StudioError::Decode(format!("`{name}` is empty")));
    }

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = Path::new(name).extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| StudioError::Decode(format!("unsupported format: {e}")))?;
    let mut reader = probed.format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| StudioError::Decode("no audio track".to_string()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| StudioError::Decode(format!("codec init failed: {e}")))?;

    let mut interleaved: Vec<f32> = Vec::new();
    let mut format: Option<(u32, usize)> = None;

    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(StudioError::Decode(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(msg)) => {
                warn!(error = %msg, "skipping corrupted audio packet");
                continue;
            }
            Err(e) => return Err(StudioError::Decode(e.to_string())),
        };

        let spec = *decoded.spec();
        if decoded.frames() == 0 {
            continue;
        }
        format.get_or_insert((spec.rate, spec.channels.count()));

        let mut samples = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        samples.copy_interleaved_ref(decoded);
        interleaved.extend_from_slice(samples.samples());
    }

    let (sample_rate, channels) =
        format.ok_or_else(|| StudioError::Decode(format!("`{name}` contains no audio frames")))?;
    let buffer = PcmBuffer::from_interleaved(sample_rate, channels, &interleaved)
        .map_err(|e| StudioError::Decode(e.to_string()))?;

    let info = FileInfo {
        name: name.to_string(),
        size_bytes: bytes.len() as u64,
        duration_seconds: buffer.duration_seconds(),
        channels,
        sample_rate,
    };
    debug!(
        name,
        sample_rate,
        channels,
        duration = info.duration_seconds,
        "decoded audio file"
    );

    Ok(DecodedAudio { buffer, info })
}

/// Runs [`decode_bytes`] on the blocking pool so callers on an async runtime
/// stay responsive.
pub async fn decode_async(name: String, bytes: Vec<u8>) -> Result<DecodedAudio> {
    tokio::task::spawn_blocking(move || decode_bytes(&name, &bytes))
        .await
        .map_err(|e| StudioError::Decode(format!("decoder task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::test_signals;
    use crate::export::encode::encode_wav;

    #[test]
    fn decodes_wav_bytes() {
        let source = test_signals::tone(8_000, 0.25, 440.0, 0.5);
        let bytes = encode_wav(&source).unwrap();

        let decoded = decode_bytes("sermon.wav", &bytes).unwrap();
        assert_eq!(decoded.info.sample_rate, 8_000);
        assert_eq!(decoded.info.channels, 1);
        assert_eq!(decoded.buffer.frames(), source.frames());
        assert_eq!(decoded.info.size_bytes, bytes.len() as u64);
    }

    #[test]
    fn malformed_input_is_a_decode_error() {
        let err = decode_bytes("notes.mp3", b"definitely not audio").unwrap_err();
        assert!(matches!(err, StudioError::Decode(_)));

        let err = decode_bytes("empty.wav", &[]).unwrap_err();
        assert!(matches!(err, StudioError::Decode(_)));
    }
}
