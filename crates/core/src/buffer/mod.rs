//! Immutable PCM buffers.
//!
//! Every transform in the pipeline consumes a [`PcmBuffer`] by reference and
//! returns a new one. Samples live behind an `Arc`, so clones are cheap and a
//! buffer handed to the renderer can never be changed underneath a segment.

use std::{fmt, ops::Range, sync::Arc};

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::{Result, StudioError};

/// Planar floating point audio with a fixed sample rate.
#[derive(Clone, PartialEq)]
pub struct PcmBuffer {
    sample_rate: u32,
    channels: Arc<[Vec<f32>]>,
}

impl PcmBuffer {
    /// Builds a buffer from planar channel data. All channels must have the
    /// same length.
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Result<Self> {
        if sample_rate == 0 {
            return Err(StudioError::invalid("sample rate must be positive"));
        }
        if channels.is_empty() {
            return Err(StudioError::invalid("a buffer needs at least one channel"));
        }
        let frames = channels[0].len();
        if channels.iter().any(|channel| channel.len() != frames) {
            return Err(StudioError::invalid("channels have mismatched lengths"));
        }

        Ok(Self::from_planar(sample_rate, channels))
    }

    /// Builds a buffer of digital silence.
    pub fn silent(sample_rate: u32, channel_count: usize, frames: usize) -> Self {
        let channel_count = channel_count.max(1);
        Self::from_planar(sample_rate.max(1), vec![vec![0.0; frames]; channel_count])
    }

    /// De-interleaves `samples` into a planar buffer. Trailing samples that
    /// do not fill a whole frame are dropped.
    pub fn from_interleaved(sample_rate: u32, channel_count: usize, samples: &[f32]) -> Result<Self> {
        if channel_count == 0 {
            return Err(StudioError::invalid("a buffer needs at least one channel"));
        }
        let frames = samples.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in samples.chunks_exact(channel_count) {
            for (channel, sample) in channels.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        }
        Self::new(sample_rate, channels)
    }

    /// Caller guarantees the invariants checked by [`PcmBuffer::new`].
    pub(crate) fn from_planar(sample_rate: u32, channels: Vec<Vec<f32>>) -> Self {
        Self {
            sample_rate,
            channels: Arc::from(channels),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    pub fn duration_seconds(&self) -> f64 {
        self.frames_to_secs(self.frames())
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn channels(&self) -> impl Iterator<Item = &[f32]> {
        self.channels.iter().map(Vec::as_slice)
    }

    /// Converts a position in seconds to the nearest frame index, clamped to
    /// the buffer length.
    pub fn secs_to_frame(&self, seconds: f64) -> usize {
        secs_to_frames(seconds, self.sample_rate).min(self.frames())
    }

    pub fn frames_to_secs(&self, frames: usize) -> f64 {
        frames as f64 / self.sample_rate as f64
    }

    /// Copies a frame range into a new buffer. The range is clamped.
    pub fn slice(&self, range: Range<usize>) -> Self {
        let end = range.end.min(self.frames());
        let start = range.start.min(end);
        let channels = self
            .channels
            .iter()
            .map(|channel| channel[start..end].to_vec())
            .collect();
        Self::from_planar(self.sample_rate, channels)
    }

    /// Applies `f` to every channel, producing a buffer of the same shape.
    pub fn map_channels<F>(&self, mut f: F) -> Self
    where
        F: FnMut(usize, &[f32]) -> Vec<f32>,
    {
        let channels = self
            .channels
            .iter()
            .enumerate()
            .map(|(index, channel)| f(index, channel))
            .collect();
        Self::from_planar(self.sample_rate, channels)
    }

    pub fn to_interleaved(&self) -> Vec<f32> {
        let channel_count = self.channel_count();
        let mut out = Vec::with_capacity(self.frames() * channel_count);
        for frame in 0..self.frames() {
            for channel in self.channels.iter() {
                out.push(channel[frame]);
            }
        }
        out
    }

    /// Averages all channels into a single mono track.
    pub fn mixdown_mono(&self) -> Vec<f32> {
        if self.channel_count() == 1 {
            return self.channels[0].clone();
        }
        let scale = 1.0 / self.channel_count() as f32;
        (0..self.frames())
            .map(|frame| self.channels.iter().map(|channel| channel[frame]).sum::<f32>() * scale)
            .collect()
    }

    /// Returns a buffer with the requested channel layout and sample rate.
    ///
    /// Mono sources are duplicated, mono targets receive a downmix, and any
    /// other layout change copies the overlapping channels. Rate changes go
    /// through a windowed sinc resampler.
    pub fn conform(&self, sample_rate: u32, channel_count: usize) -> Result<Self> {
        if sample_rate == 0 || channel_count == 0 {
            return Err(StudioError::invalid("target format must be non-empty"));
        }
        if self.sample_rate == sample_rate && self.channel_count() == channel_count {
            return Ok(self.clone());
        }

        let remapped = self.remap_channels(channel_count);
        if self.sample_rate == sample_rate || remapped.first().map_or(true, Vec::is_empty) {
            return Ok(Self::from_planar(sample_rate, remapped));
        }

        let frames = remapped[0].len();
        let ratio = sample_rate as f64 / self.sample_rate as f64;
        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        };
        let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, frames, channel_count)
            .map_err(|e| StudioError::Render(format!("resampler setup failed: {e}")))?;
        let resample_err =
            |e: rubato::ResampleError| StudioError::Render(format!("resampling failed: {e}"));
        let mut resampled = resampler.process(&remapped, None).map_err(resample_err)?;

        // The filter delays its output; flush the tail and drop the lead-in.
        let delay = resampler.output_delay();
        let expected = (frames as f64 * ratio).round() as usize;
        while resampled[0].len() < delay + expected {
            let tail = resampler
                .process_partial(None::<&[Vec<f32>]>, None)
                .map_err(resample_err)?;
            if tail.first().map_or(true, Vec::is_empty) {
                break;
            }
            for (channel, rest) in resampled.iter_mut().zip(tail) {
                channel.extend(rest);
            }
        }
        for channel in resampled.iter_mut() {
            channel.drain(..delay.min(channel.len()));
            channel.resize(expected, 0.0);
        }
        tracing::debug!(
            from = self.sample_rate,
            to = sample_rate,
            channels = channel_count,
            frames = expected,
            "conformed buffer"
        );
        Ok(Self::from_planar(sample_rate, resampled))
    }

    fn remap_channels(&self, channel_count: usize) -> Vec<Vec<f32>> {
        let source = self.channel_count();
        if source == channel_count {
            return self.channels.to_vec();
        }
        if channel_count == 1 {
            return vec![self.mixdown_mono()];
        }
        (0..channel_count)
            .map(|index| self.channels[index.min(source - 1)].clone())
            .collect()
    }
}

impl fmt::Debug for PcmBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcmBuffer")
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channel_count())
            .field("frames", &self.frames())
            .finish()
    }
}

/// Converts seconds to a frame count, rounding to the nearest frame.
pub fn secs_to_frames(seconds: f64, sample_rate: u32) -> usize {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    (seconds * sample_rate as f64).round() as usize
}
