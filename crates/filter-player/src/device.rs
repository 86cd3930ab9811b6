//! Output device and stream config selection.
//!
//! Thin wrappers around CPAL: pick the default output device and the supported
//! config closest to the fixed playback format.

use std::cmp::Reverse;

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// The host's default output device, or the first one it lists.
pub fn default_device(host: &cpal::Host) -> Result<cpal::Device> {
    if let Some(device) = host.default_output_device() {
        return Ok(device);
    }
    host.output_devices()
        .context("No output devices")?
        .next()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Choose the supported output config that best fits `target_rate` and `channels`.
///
/// Preference order: exact rate, requested channel count, a rate at or below the
/// target (highest first), then sample format (16-bit first).
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: u32,
    channels: u16,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> =
        device.supported_output_configs()?.collect();

    ranges
        .into_iter()
        .map(|range| {
            let rate = pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
            let score = candidate_score(
                rate,
                target_rate,
                range.channels(),
                channels,
                sample_format_rank(range.sample_format()),
            );
            (score, range.with_sample_rate(rate))
        })
        .max_by_key(|(score, _)| *score)
        .map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

fn pick_rate_for_range(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::I16 => 0,
        cpal::SampleFormat::F32 => 1,
        cpal::SampleFormat::I32 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

type Score = (bool, bool, bool, u32, Reverse<u8>);

fn candidate_score(
    rate: u32,
    target_rate: u32,
    channels: u16,
    want_channels: u16,
    format_rank: u8,
) -> Score {
    (
        rate == target_rate,
        channels == want_channels,
        rate <= target_rate,
        rate,
        Reverse(format_rank),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_rate_for_range_prefers_target_when_in_range() {
        assert_eq!(pick_rate_for_range(8_000, 96_000, 44_100), 44_100);
    }

    #[test]
    fn pick_rate_for_range_clamps_below_min() {
        assert_eq!(pick_rate_for_range(48_000, 96_000, 44_100), 48_000);
    }

    #[test]
    fn pick_rate_for_range_clamps_above_max() {
        assert_eq!(pick_rate_for_range(8_000, 32_000, 44_100), 32_000);
    }

    #[test]
    fn exact_rate_beats_channel_match() {
        let exact = candidate_score(44_100, 44_100, 6, 2, 1);
        let stereo = candidate_score(48_000, 44_100, 2, 2, 0);
        assert!(exact > stereo);
    }

    #[test]
    fn stereo_preferred_at_same_rate() {
        let stereo = candidate_score(44_100, 44_100, 2, 2, 3);
        let surround = candidate_score(44_100, 44_100, 8, 2, 0);
        assert!(stereo > surround);
    }

    #[test]
    fn sixteen_bit_preferred_when_otherwise_equal() {
        let s16 = candidate_score(44_100, 44_100, 2, 2, sample_format_rank(cpal::SampleFormat::I16));
        let f32 = candidate_score(44_100, 44_100, 2, 2, sample_format_rank(cpal::SampleFormat::F32));
        assert!(s16 > f32);
    }

    #[test]
    fn below_target_preferred_over_above() {
        let below = candidate_score(32_000, 44_100, 2, 2, 0);
        let above = candidate_score(48_000, 44_100, 2, 2, 0);
        assert!(below > above);
    }
}
