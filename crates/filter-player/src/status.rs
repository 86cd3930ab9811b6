//! Run counters reported when playback ends.

/// Totals accumulated by the pipeline over one run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    /// Packets read from the container (all streams).
    pub packets_read: u64,
    /// Packets dropped because they belong to another stream.
    pub packets_discarded: u64,
    pub frames_decoded: u64,
    /// Packets abandoned after a decoder error.
    pub decode_errors: u64,
    /// Frames the filter graph refused.
    pub frames_rejected: u64,
    /// Synthetic empty packets sent while draining the decoder.
    pub flush_calls: u64,
    /// Buffers handed to the playback sink.
    pub filtered_frames: u64,
    /// Stereo sample frames handed to the playback sink.
    pub output_frames: u64,
}

impl PlaybackStats {
    /// Seconds of audio written at the given output rate.
    pub fn output_seconds(&self, rate_hz: u32) -> f64 {
        if rate_hz == 0 {
            return 0.0;
        }
        self.output_frames as f64 / rate_hz as f64
    }

    pub fn log_summary(&self, rate_hz: u32) {
        tracing::info!(
            packets_read = self.packets_read,
            packets_discarded = self.packets_discarded,
            frames_decoded = self.frames_decoded,
            decode_errors = self.decode_errors,
            frames_rejected = self.frames_rejected,
            flush_calls = self.flush_calls,
            filtered_frames = self.filtered_frames,
            output_frames = self.output_frames,
            seconds = self.output_seconds(rate_hz),
            "playback finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_seconds_handles_zero_rate() {
        let stats = PlaybackStats {
            output_frames: 44_100,
            ..Default::default()
        };
        assert_eq!(stats.output_seconds(0), 0.0);
        assert_eq!(stats.output_seconds(44_100), 1.0);
    }
}
