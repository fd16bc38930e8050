//! Joining buffers end to end, with optional crossfades, and framing the
//! result with intro/outro music.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{buffer::secs_to_frames, PcmBuffer, Result, StudioError};

/// How a segment attaches to the one after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinMode {
    #[default]
    Crossfade,
    Cut,
}

/// Gain curves used across a crossfade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    /// Gains sum to exactly one at every offset.
    #[default]
    Linear,
    /// Squared gains sum to one (constant power for uncorrelated material).
    EqualPower,
}

impl FadeCurve {
    /// Returns `(fade_out, fade_in)` gains at position `t` in `[0, 1]`.
    pub fn gains(self, t: f32) -> (f32, f32) {
        let t = t.clamp(0.0, 1.0);
        match self {
            Self::Linear => (1.0 - t, t),
            Self::EqualPower => {
                let angle = std::f32::consts::FRAC_PI_2 * t;
                (angle.cos(), angle.sin())
            }
        }
    }
}

/// One input to [`Concatenator::join`]: a buffer and the way it attaches to
/// the following piece. The join mode of the last piece is ignored.
#[derive(Debug, Clone)]
pub struct JoinPiece {
    pub buffer: PcmBuffer,
    pub join: JoinMode,
}

impl JoinPiece {
    pub fn new(buffer: PcmBuffer, join: JoinMode) -> Self {
        Self { buffer, join }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Concatenator {
    crossfade_seconds: f64,
    curve: FadeCurve,
}

impl Default for Concatenator {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_CROSSFADE_SECONDS, FadeCurve::default())
    }
}

impl Concatenator {
    pub fn new(crossfade_seconds: f64, curve: FadeCurve) -> Self {
        Self {
            crossfade_seconds: crossfade_seconds.max(0.0),
            curve,
        }
    }

    pub fn crossfade_seconds(&self) -> f64 {
        self.crossfade_seconds
    }

    /// Overlap in frames for a crossfade between pieces of the given lengths.
    /// Never more than half of either side; zero when either side is empty.
    pub fn overlap_frames(&self, left: usize, right: usize, sample_rate: u32) -> usize {
        secs_to_frames(self.crossfade_seconds, sample_rate)
            .min(left / 2)
            .min(right / 2)
    }

    /// Joins the pieces in order. Every piece is conformed to the sample rate
    /// of the first piece and the widest channel layout among them.
    pub fn join(&self, pieces: &[JoinPiece]) -> Result<PcmBuffer> {
        let first = pieces
            .first()
            .ok_or_else(|| StudioError::Render("nothing to join".to_string()))?;
        let sample_rate = first.buffer.sample_rate();
        let channel_count = pieces
            .iter()
            .map(|piece| piece.buffer.channel_count())
            .max()
            .unwrap_or(1);

        let conformed: Vec<PcmBuffer> = pieces
            .iter()
            .map(|piece| piece.buffer.conform(sample_rate, channel_count))
            .collect::<Result<_>>()?;

        let mut splice = Splice::start(&conformed[0]);
        for (index, buffer) in conformed.iter().enumerate().skip(1) {
            let left = &conformed[index - 1];
            let overlap = match pieces[index - 1].join {
                JoinMode::Crossfade => self.overlap_frames(left.frames(), buffer.frames(), sample_rate),
                JoinMode::Cut => 0,
            };
            splice.append(buffer, overlap, self.curve);
        }

        let joined = splice.finish(sample_rate);
        debug!(
            pieces = pieces.len(),
            duration = joined.duration_seconds(),
            "joined segments"
        );
        Ok(joined)
    }

    /// Crossfades `intro` into the start of `body` and `body` into `outro`.
    pub fn frame_with_music(
        &self,
        body: &PcmBuffer,
        intro: Option<&PcmBuffer>,
        outro: Option<&PcmBuffer>,
    ) -> Result<PcmBuffer> {
        if intro.is_none() && outro.is_none() {
            return Ok(body.clone());
        }

        let mut pieces = Vec::with_capacity(3);
        if let Some(intro) = intro {
            pieces.push(JoinPiece::new(intro.clone(), JoinMode::Crossfade));
        }
        pieces.push(JoinPiece::new(body.clone(), JoinMode::Crossfade));
        if let Some(outro) = outro {
            pieces.push(JoinPiece::new(outro.clone(), JoinMode::Crossfade));
        }

        // The body's format wins over whatever the music was mastered at.
        let pieces: Vec<JoinPiece> = pieces
            .into_iter()
            .map(|piece| {
                piece
                    .buffer
                    .conform(body.sample_rate(), body.channel_count())
                    .map(|buffer| JoinPiece::new(buffer, piece.join))
            })
            .collect::<Result<_>>()?;
        self.join(&pieces)
    }
}

/// Growing planar output of a join.
struct Splice {
    channels: Vec<Vec<f32>>,
}

impl Splice {
    fn start(buffer: &PcmBuffer) -> Self {
        Self {
            channels: buffer.channels().map(<[f32]>::to_vec).collect(),
        }
    }

    /// Appends `next`, mixing its first `overlap` frames into the last
    /// `overlap` frames already written.
    fn append(&mut self, next: &PcmBuffer, overlap: usize, curve: FadeCurve) {
        for (out, incoming) in self.channels.iter_mut().zip(next.channels()) {
            let tail_start = out.len() - overlap;
            for i in 0..overlap {
                let (fade_out, fade_in) = curve.gains(i as f32 / overlap as f32);
                out[tail_start + i] = out[tail_start + i] * fade_out + incoming[i] * fade_in;
            }
            out.extend_from_slice(&incoming[overlap..]);
        }
    }

    fn finish(self, sample_rate: u32) -> PcmBuffer {
        PcmBuffer::from_planar(sample_rate, self.channels)
    }
}
