use std::io::Cursor;

use hound::{SampleFormat, WavSpec, WavWriter};
use mp3lame_encoder::{Bitrate, Builder, DualPcm, FlushNoGap, MonoPcm, Quality};

use crate::{PcmBuffer, Result, StudioError};

use super::tags;

/// Frames written between two progress callbacks.
const PROGRESS_INTERVAL_FRAMES: usize = 48_000;

/// Sample rates an MPEG-1/2/2.5 layer III stream can carry.
const MP3_SAMPLE_RATES: [u32; 9] = [
    8_000, 11_025, 12_000, 16_000, 22_050, 24_000, 32_000, 44_100, 48_000,
];

/// Constant bitrates LAME accepts, in kbps.
const MP3_BITRATES: [u32; 16] = [
    8, 16, 24, 32, 40, 48, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320,
];

/// Turns a rendered buffer into container bytes.
pub trait AudioEncoder: Send + Sync {
    /// File extension without the dot.
    fn extension(&self) -> &'static str;

    fn mime_type(&self) -> &'static str;

    /// Encodes `buffer`, calling `progress` with the completed fraction.
    fn encode(&self, buffer: &PcmBuffer, progress: &mut dyn FnMut(f32)) -> Result<Vec<u8>>;

    /// Stores a serialised ID3v2 tag in the encoded file.
    fn embed_tag(&self, encoded: &[u8], tag: &[u8]) -> Result<Vec<u8>>;
}

/// Constant-bitrate MPEG layer III encoder backed by LAME.
///
/// Buffers with more than two channels keep their first two, and sample
/// rates MPEG cannot carry are resampled to 48 kHz before encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mp3Encoder {
    bitrate_kbps: u32,
}

impl Mp3Encoder {
    /// Uses the closest bitrate LAME supports.
    pub fn new(bitrate_kbps: u32) -> Self {
        Self { bitrate_kbps }
    }

    pub fn bitrate_kbps(&self) -> u32 {
        nearest_bitrate(self.bitrate_kbps)
    }

    fn prepare(&self, buffer: &PcmBuffer) -> Result<PcmBuffer> {
        let channels = buffer.channel_count().min(2);
        let rate = if MP3_SAMPLE_RATES.contains(&buffer.sample_rate()) {
            buffer.sample_rate()
        } else {
            48_000
        };
        buffer.conform(rate, channels)
    }
}

impl Default for Mp3Encoder {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_EXPORT_BITRATE_KBPS)
    }
}

impl AudioEncoder for Mp3Encoder {
    fn extension(&self) -> &'static str {
        "mp3"
    }

    fn mime_type(&self) -> &'static str {
        "audio/mpeg"
    }

    fn encode(&self, buffer: &PcmBuffer, progress: &mut dyn FnMut(f32)) -> Result<Vec<u8>> {
        let buffer = self.prepare(buffer)?;
        let kbps = self.bitrate_kbps();

        let mut builder =
            Builder::new().ok_or_else(|| StudioError::Encode("LAME is unavailable".to_string()))?;
        builder
            .set_num_channels(buffer.channel_count() as u8)
            .map_err(lame_error)?;
        builder.set_sample_rate(buffer.sample_rate()).map_err(lame_error)?;
        builder.set_brate(lame_bitrate(kbps)).map_err(lame_error)?;
        builder.set_quality(Quality::Good).map_err(lame_error)?;
        let mut lame = builder.build().map_err(lame_error)?;
        tracing::debug!(
            kbps,
            sample_rate = buffer.sample_rate(),
            channels = buffer.channel_count(),
            "mp3 encoder ready"
        );

        let channels: Vec<Vec<i16>> = buffer
            .channels()
            .map(|channel| channel.iter().copied().map(to_i16).collect())
            .collect();
        let frames = buffer.frames();
        let estimate = buffer.duration_seconds() * kbps as f64 * 125.0;
        let mut out = Vec::with_capacity(estimate as usize + 8_192);

        let mut start = 0;
        while start < frames {
            let end = (start + PROGRESS_INTERVAL_FRAMES).min(frames);
            out.reserve(mp3lame_encoder::max_required_buffer_size(end - start));
            let written = match channels.as_slice() {
                [mono] => lame.encode_to_vec(MonoPcm(&mono[start..end]), &mut out),
                [left, right] => lame.encode_to_vec(
                    DualPcm {
                        left: &left[start..end],
                        right: &right[start..end],
                    },
                    &mut out,
                ),
                _ => return Err(StudioError::Encode("unsupported channel layout".to_string())),
            };
            written.map_err(lame_error)?;
            progress(start as f32 / frames as f32);
            start = end;
        }
        out.reserve(mp3lame_encoder::max_required_buffer_size(0));
        lame.flush_to_vec::<FlushNoGap>(&mut out).map_err(lame_error)?;
        progress(1.0);
        Ok(out)
    }

    fn embed_tag(&self, encoded: &[u8], tag: &[u8]) -> Result<Vec<u8>> {
        tags::prepend_id3_tag(encoded, tag)
    }
}

fn nearest_bitrate(kbps: u32) -> u32 {
    MP3_BITRATES
        .into_iter()
        .min_by_key(|candidate| candidate.abs_diff(kbps))
        .unwrap_or(128)
}

fn lame_bitrate(kbps: u32) -> Bitrate {
    match kbps {
        8 => Bitrate::Kbps8,
        16 => Bitrate::Kbps16,
        24 => Bitrate::Kbps24,
        32 => Bitrate::Kbps32,
        40 => Bitrate::Kbps40,
        48 => Bitrate::Kbps48,
        64 => Bitrate::Kbps64,
        80 => Bitrate::Kbps80,
        96 => Bitrate::Kbps96,
        112 => Bitrate::Kbps112,
        128 => Bitrate::Kbps128,
        160 => Bitrate::Kbps160,
        192 => Bitrate::Kbps192,
        224 => Bitrate::Kbps224,
        256 => Bitrate::Kbps256,
        _ => Bitrate::Kbps320,
    }
}

fn lame_error(err: impl std::fmt::Debug) -> StudioError {
    StudioError::Encode(format!("mp3 encoding failed: {err:?}"))
}

/// 16-bit PCM RIFF/WAVE encoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavEncoder;

impl AudioEncoder for WavEncoder {
    fn extension(&self) -> &'static str {
        "wav"
    }

    fn mime_type(&self) -> &'static str {
        "audio/wav"
    }

    fn encode(&self, buffer: &PcmBuffer, progress: &mut dyn FnMut(f32)) -> Result<Vec<u8>> {
        let channels = u16::try_from(buffer.channel_count())
            .map_err(|_| StudioError::Encode("too many channels for WAV".to_string()))?;
        let spec = WavSpec {
            channels,
            sample_rate: buffer.sample_rate(),
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let frames = buffer.frames();
        let mut cursor = Cursor::new(Vec::with_capacity(44 + frames * channels as usize * 2));
        {
            let mut writer = WavWriter::new(&mut cursor, spec)?;
            let interleaved = buffer.to_interleaved();
            for (index, frame) in interleaved.chunks(channels as usize).enumerate() {
                for sample in frame {
                    writer.write_sample(to_i16(*sample))?;
                }
                if index % PROGRESS_INTERVAL_FRAMES == 0 && frames > 0 {
                    progress(index as f32 / frames as f32);
                }
            }
            writer.finalize()?;
        }
        progress(1.0);
        Ok(cursor.into_inner())
    }

    fn embed_tag(&self, encoded: &[u8], tag: &[u8]) -> Result<Vec<u8>> {
        tags::append_id3_chunk(encoded, tag)
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

/// Encodes `buffer` as a 16-bit WAV file.
pub fn encode_wav(buffer: &PcmBuffer) -> Result<Vec<u8>> {
    WavEncoder.encode(buffer, &mut |_| {})
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::test_signals;

    #[test]
    fn writes_a_readable_wav() {
        let buffer = test_signals::tone(8_000, 0.25, 440.0, 0.5);
        let bytes = encode_wav(&buffer).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");

        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 8_000);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.duration(), 2_000);
    }

    #[test]
    fn clamps_out_of_range_samples() {
        assert_eq!(to_i16(2.0), i16::MAX);
        assert_eq!(to_i16(-2.0), -i16::MAX);
        assert_eq!(to_i16(0.0), 0);
    }

    #[test]
    fn reports_completion() {
        let buffer = PcmBuffer::silent(8_000, 2, 100_000);
        let mut reported = Vec::new();
        WavEncoder.encode(&buffer, &mut |fraction| reported.push(fraction)).unwrap();
        assert_eq!(reported.first(), Some(&0.0));
        assert_eq!(reported.last(), Some(&1.0));
        assert!(reported.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    fn stereo_speech(seconds: f64) -> PcmBuffer {
        let left = test_signals::tone(44_100, seconds, 180.0, 0.4);
        let right = test_signals::tone(44_100, seconds, 260.0, 0.3);
        PcmBuffer::new(44_100, vec![left.channel(0).to_vec(), right.channel(0).to_vec()]).unwrap()
    }

    #[test]
    fn mp3_size_follows_the_bitrate() {
        let buffer = stereo_speech(10.0);
        for kbps in [64_u32, 192] {
            let bytes = Mp3Encoder::new(kbps).encode(&buffer, &mut |_| {}).unwrap();
            let expected = (kbps * 1_000 / 8 * 10) as f64;
            let ratio = bytes.len() as f64 / expected;
            assert!((0.85..1.15).contains(&ratio), "{kbps} kbps gave {} bytes", bytes.len());
        }
    }

    #[test]
    fn mp3_output_decodes_to_the_same_length() {
        let buffer = test_signals::tone(8_000, 3.0, 220.0, 0.5);
        let bytes = Mp3Encoder::default().encode(&buffer, &mut |_| {}).unwrap();
        let decoded = crate::decode::decode_bytes("take.mp3", &bytes).unwrap();
        let seconds = decoded.buffer.duration_seconds();
        assert!((2.95..3.5).contains(&seconds), "decoded {seconds} s");
    }

    #[test]
    fn odd_formats_are_folded_before_encoding() {
        let buffer = PcmBuffer::silent(37_000, 4, 3_700);
        let prepared = Mp3Encoder::default().prepare(&buffer).unwrap();
        assert_eq!(prepared.channel_count(), 2);
        assert_eq!(prepared.sample_rate(), 48_000);
        assert_eq!(Mp3Encoder::new(100).bitrate_kbps(), 96);
        assert_eq!(Mp3Encoder::new(1_000).bitrate_kbps(), 320);
    }
}
