//! Format normalization stage: channel remix, resample, s16 conversion.
//!
//! The resampler is Rubato's streaming sinc resampler fed fixed-size input chunks.
//! Its latency is trimmed from the head of the output. At end of stream the partial
//! last chunk goes through Rubato's `partial_len` indexing and the delay line is
//! flushed with silence, so `N` input frames always become `ceil(N * dst / src)`
//! output frames.

use std::f32::consts::FRAC_1_SQRT_2;

use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::error::GraphInitError;
use crate::format::{ChannelLayout, SourceFormat, TARGET};
use crate::frame::FilteredFrame;

use super::node::{PadSpec, Signal};

const OUT_CHANNELS: usize = 2;

pub(crate) struct NormalizeNode {
    input: PadSpec,
    matrix: Vec<[f32; OUT_CHANNELS]>,
    resampler: Option<StreamResampler>,
}

impl NormalizeNode {
    pub fn new(source: &SourceFormat, chunk_frames: usize) -> Result<Self, GraphInitError> {
        let matrix = remix_matrix(source.channel_layout);
        let resampler = if source.sample_rate == TARGET.sample_rate {
            tracing::info!(rate_hz = TARGET.sample_rate, "resample skipped");
            None
        } else {
            let r = StreamResampler::new(source.sample_rate, TARGET.sample_rate, chunk_frames)
                .map_err(|reason| GraphInitError::Node {
                    node: "normalize",
                    reason,
                })?;
            tracing::info!(
                from_hz = source.sample_rate,
                to_hz = TARGET.sample_rate,
                "resampling"
            );
            Some(r)
        };
        Ok(Self {
            input: PadSpec::planar(source),
            matrix,
            resampler,
        })
    }

    pub fn input(&self) -> PadSpec {
        self.input
    }

    pub fn process(&mut self, signal: Signal) -> Result<Vec<Signal>, String> {
        match signal {
            Signal::Planar(planes) => {
                if planes.len() != self.matrix.len() {
                    return Err(format!(
                        "expected {} planes, got {}",
                        self.matrix.len(),
                        planes.len()
                    ));
                }
                let stereo = remix(&planes, &self.matrix);
                let out = match self.resampler.as_mut() {
                    Some(r) => r.process(&stereo)?,
                    None => stereo,
                };
                Ok(pcm_signal(&out).into_iter().collect())
            }
            Signal::Eof => {
                let mut out = Vec::new();
                if let Some(r) = self.resampler.as_mut() {
                    let tail = r.flush()?;
                    out.extend(pcm_signal(&tail));
                }
                out.push(Signal::Eof);
                Ok(out)
            }
            Signal::Pcm(_) => Err("normalize expects planar input".into()),
        }
    }
}

fn pcm_signal(interleaved: &[f32]) -> Option<Signal> {
    if interleaved.is_empty() {
        return None;
    }
    Some(Signal::Pcm(FilteredFrame::new(to_s16(interleaved))))
}

/// Per-source-channel `[left, right]` weights.
///
/// Mono is duplicated, stereo passes through, anything else is folded down with
/// centre and surround channels at -3 dB. LFE is dropped.
pub(crate) fn remix_matrix(layout: ChannelLayout) -> Vec<[f32; OUT_CHANNELS]> {
    // Any single channel is treated as mono, whichever position it is tagged with.
    if layout.channels() == 1 {
        return vec![[1.0, 1.0]];
    }
    layout
        .iter()
        .map(|bit| match bit {
            ChannelLayout::FRONT_LEFT => [1.0, 0.0],
            ChannelLayout::FRONT_RIGHT => [0.0, 1.0],
            ChannelLayout::FRONT_CENTER => [FRAC_1_SQRT_2, FRAC_1_SQRT_2],
            ChannelLayout::LOW_FREQUENCY => [0.0, 0.0],
            ChannelLayout::BACK_LEFT
            | ChannelLayout::SIDE_LEFT
            | ChannelLayout::FRONT_LEFT_OF_CENTER => [FRAC_1_SQRT_2, 0.0],
            ChannelLayout::BACK_RIGHT
            | ChannelLayout::SIDE_RIGHT
            | ChannelLayout::FRONT_RIGHT_OF_CENTER => [0.0, FRAC_1_SQRT_2],
            _ => [0.5, 0.5],
        })
        .collect()
}

/// Mix planar input down to interleaved stereo.
pub(crate) fn remix(planes: &[Vec<f32>], matrix: &[[f32; OUT_CHANNELS]]) -> Vec<f32> {
    let frames = planes.first().map_or(0, Vec::len);
    let mut out = vec![0.0f32; frames * OUT_CHANNELS];
    for (plane, weights) in planes.iter().zip(matrix) {
        for (i, &s) in plane.iter().enumerate() {
            out[i * OUT_CHANNELS] += s * weights[0];
            out[i * OUT_CHANNELS + 1] += s * weights[1];
        }
    }
    out
}

/// Clip and quantize to signed 16-bit.
pub(crate) fn to_s16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * 32_768.0).round().clamp(-32_768.0, 32_767.0) as i16)
        .collect()
}

/// Synchronous streaming wrapper around a Rubato sinc resampler (stereo, interleaved).
struct StreamResampler {
    resampler: Box<dyn Resampler<f32>>,
    ratio: f64,
    chunk_frames: usize,
    pending: Vec<f32>,
    silence: Vec<f32>,
    out_interleaved: Vec<f32>,
    skip_frames: usize,
    frames_in: u64,
    frames_out: u64,
}

impl StreamResampler {
    fn new(src_rate: u32, dst_rate: u32, chunk_frames: usize) -> Result<Self, String> {
        let chunk_frames = chunk_frames.max(1);
        let ratio = dst_rate as f64 / src_rate as f64;

        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };

        let resampler: Box<dyn Resampler<f32>> = Box::new(
            Async::<f32>::new_sinc(
                ratio,
                1.1,
                &params,
                chunk_frames,
                OUT_CHANNELS,
                FixedAsync::Input,
            )
            .map_err(|e| format!("resampler init error: {e}"))?,
        );

        let out_interleaved = vec![0.0f32; resampler.output_frames_max() * OUT_CHANNELS];
        let skip_frames = resampler.output_delay();

        Ok(Self {
            resampler,
            ratio,
            chunk_frames,
            pending: Vec::new(),
            silence: vec![0.0f32; chunk_frames * OUT_CHANNELS],
            out_interleaved,
            skip_frames,
            frames_in: 0,
            frames_out: 0,
        })
    }

    /// Resample as many whole chunks as are buffered; the remainder waits for more input.
    fn process(&mut self, interleaved: &[f32]) -> Result<Vec<f32>, String> {
        self.frames_in += (interleaved.len() / OUT_CHANNELS) as u64;
        self.pending.extend_from_slice(interleaved);

        let chunk_samples = self.chunk_frames * OUT_CHANNELS;
        let mut out = Vec::new();
        let mut start = 0;
        while self.pending.len() - start >= chunk_samples {
            let produced = run_chunk(
                &mut *self.resampler,
                &self.pending[start..start + chunk_samples],
                self.chunk_frames,
                None,
                &mut self.out_interleaved,
            )?;
            self.emit(produced, &mut out);
            start += chunk_samples;
        }
        self.pending.drain(..start);
        Ok(out)
    }

    /// Push out the buffered remainder and the resampler's delay line.
    fn flush(&mut self) -> Result<Vec<f32>, String> {
        let expected = (self.frames_in as f64 * self.ratio).ceil() as u64;
        let mut out = Vec::new();

        let tail = std::mem::take(&mut self.pending);
        let tail_frames = tail.len() / OUT_CHANNELS;
        if tail_frames > 0 {
            let indexing = Indexing {
                input_offset: 0,
                output_offset: 0,
                active_channels_mask: None,
                partial_len: Some(tail_frames),
            };
            let produced = run_chunk(
                &mut *self.resampler,
                &tail,
                tail_frames,
                Some(&indexing),
                &mut self.out_interleaved,
            )?;
            self.emit(produced, &mut out);
        }

        // Bounded: each silent chunk yields roughly `chunk_frames * ratio` frames.
        let max_rounds = 8 + self.resampler.output_delay() / self.chunk_frames;
        let mut rounds = 0;
        while self.frames_out < expected && rounds < max_rounds {
            let produced = run_chunk(
                &mut *self.resampler,
                &self.silence,
                self.chunk_frames,
                None,
                &mut self.out_interleaved,
            )?;
            self.emit(produced, &mut out);
            rounds += 1;
        }

        if self.frames_out > expected {
            let extra = (self.frames_out - expected) as usize * OUT_CHANNELS;
            out.truncate(out.len().saturating_sub(extra));
            self.frames_out = expected;
        }
        Ok(out)
    }

    /// Append `produced` output frames, dropping the leading latency first.
    fn emit(&mut self, produced: usize, out: &mut Vec<f32>) {
        let skip = self.skip_frames.min(produced);
        self.skip_frames -= skip;
        let kept = produced - skip;
        if kept == 0 {
            return;
        }
        out.extend_from_slice(
            &self.out_interleaved[skip * OUT_CHANNELS..produced * OUT_CHANNELS],
        );
        self.frames_out += kept as u64;
    }
}

fn run_chunk(
    resampler: &mut dyn Resampler<f32>,
    input: &[f32],
    frames: usize,
    indexing: Option<&Indexing>,
    out_interleaved: &mut [f32],
) -> Result<usize, String> {
    let input_adapter = InterleavedSlice::new(input, OUT_CHANNELS, frames)
        .map_err(|e| format!("interleaved slice (input) error: {e}"))?;

    let out_capacity_frames = out_interleaved.len() / OUT_CHANNELS;
    let mut output_adapter =
        InterleavedSlice::new_mut(out_interleaved, OUT_CHANNELS, out_capacity_frames)
            .map_err(|e| format!("interleaved slice (output) error: {e}"))?;

    let (_nbr_in, nbr_out) = resampler
        .process_into_buffer(&input_adapter, &mut output_adapter, indexing)
        .map_err(|e| format!("resampler process error: {e}"))?;
    Ok(nbr_out)
}
