/// Gain applied to every sample before format conversion.
pub const VOLUME: f64 = 0.90;

/// Resampler input chunk size in frames.
pub const RESAMPLE_CHUNK_FRAMES: usize = 1024;

/// Tuning for the device-facing playback stage.
#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    /// Audio held between `play` and the device callback, in seconds.
    ///
    /// `play` blocks once this much is queued, which paces decoding to real time.
    pub buffer_seconds: f32,
    /// Max frames pulled per output callback refill.
    pub refill_max_frames: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            buffer_seconds: 0.5,
            refill_max_frames: 2048,
        }
    }
}
