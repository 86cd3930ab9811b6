//! Playback stage (CPAL output stream).
//!
//! [`PlaybackSink::play`] is the pipeline's only blocking point: the CPAL sink pushes
//! each filtered buffer into a bounded [`SharedAudio`] queue and waits for room, so
//! decoding advances at exactly the rate the device consumes audio.
//!
//! The real-time callback:
//! - refills a small local buffer from the queue without blocking
//! - maps stereo onto the device channel count
//! - converts `i16` samples to the device sample format

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::config::PlaybackConfig;
use crate::device;
use crate::error::{PlayerError, SinkError};
use crate::format::TARGET;
use crate::frame::FilteredFrame;
use crate::queue::{SharedAudio, calc_max_buffered_samples};

/// Accepts fixed-format PCM and blocks until the device side has taken it.
pub trait PlaybackSink {
    fn play(&mut self, frame: &FilteredFrame) -> Result<(), SinkError>;

    /// Block until everything written so far has been played.
    fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<S: PlaybackSink + ?Sized> PlaybackSink for &mut S {
    fn play(&mut self, frame: &FilteredFrame) -> Result<(), SinkError> {
        (**self).play(frame)
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        (**self).finish()
    }
}

type ErrorSlot = Arc<Mutex<Option<String>>>;

/// Callbacks that must complete after the queue drains before the stream is stopped.
///
/// The callback that took the last samples may still be running when the queue
/// empties; two more complete only once the buffer it filled has been played.
const DRAIN_CALLBACKS: u64 = 3;

/// Upper bound on the drain wait, for devices that stop calling back.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Live output device opened at 44.1 kHz.
///
/// Dropping the sink stops the stream and discards unplayed audio; call
/// [`PlaybackSink::finish`] first to let it drain.
pub struct CpalSink {
    stream: Option<cpal::Stream>,
    queue: Arc<SharedAudio>,
    stream_error: ErrorSlot,
    callbacks: Arc<AtomicU64>,
    finished: bool,
}

impl CpalSink {
    /// Open the default output device.
    pub fn open(cfg: &PlaybackConfig) -> Result<Self, PlayerError> {
        let host = cpal::default_host();
        let device = device::default_device(&host).map_err(device_error)?;
        Self::open_device(&device, cfg)
    }

    pub fn open_device(device: &cpal::Device, cfg: &PlaybackConfig) -> Result<Self, PlayerError> {
        let supported =
            device::pick_output_config(device, TARGET.sample_rate, TARGET.channels() as u16)
                .map_err(device_error)?;
        if supported.sample_rate() != TARGET.sample_rate {
            return Err(PlayerError::DeviceOpen(format!(
                "device does not support {} Hz output",
                TARGET.sample_rate
            )));
        }

        let stream_config = cpal::StreamConfig {
            channels: supported.channels(),
            sample_rate: TARGET.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let queue = Arc::new(SharedAudio::new(
            TARGET.channels(),
            calc_max_buffered_samples(TARGET.sample_rate, TARGET.channels(), cfg.buffer_seconds),
        ));
        let stream_error: ErrorSlot = Arc::new(Mutex::new(None));
        let callbacks = Arc::new(AtomicU64::new(0));

        let stream = build_output_stream(
            device,
            &stream_config,
            supported.sample_format(),
            &queue,
            cfg.refill_max_frames,
            StreamShared {
                stream_error: stream_error.clone(),
                callbacks: callbacks.clone(),
            },
        )
        .map_err(device_error)?;
        stream
            .play()
            .map_err(|e| PlayerError::DeviceOpen(e.to_string()))?;

        tracing::info!(
            device = %device
                .description()
                .map(|d| d.to_string())
                .unwrap_or_else(|_| "unknown".into()),
            channels = stream_config.channels,
            sample_format = ?supported.sample_format(),
            rate_hz = TARGET.sample_rate,
            "output stream started"
        );

        Ok(Self {
            stream: Some(stream),
            queue,
            stream_error,
            callbacks,
            finished: false,
        })
    }

    fn take_stream_error(&self) -> Option<String> {
        self.stream_error.lock().ok().and_then(|mut e| e.take())
    }
}

fn device_error(e: anyhow::Error) -> PlayerError {
    PlayerError::DeviceOpen(format!("{e:#}"))
}

impl PlaybackSink for CpalSink {
    fn play(&mut self, frame: &FilteredFrame) -> Result<(), SinkError> {
        if let Some(e) = self.take_stream_error() {
            return Err(SinkError::Stream(e));
        }
        if !self.queue.push_interleaved_blocking(frame.samples()) {
            return Err(self
                .take_stream_error()
                .map(SinkError::Stream)
                .unwrap_or(SinkError::Closed));
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.queue.close();
        self.queue.wait_until_done_and_empty();

        if !wait_for_callbacks(&self.callbacks, DRAIN_CALLBACKS, DRAIN_TIMEOUT) {
            tracing::debug!("output stream stopped calling back while draining");
        }
        self.stream.take();

        match self.take_stream_error() {
            Some(e) => Err(SinkError::Stream(e)),
            None => Ok(()),
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.queue.abort();
        self.stream.take();
    }
}

/// Block until `counter` has advanced by `n`, or `timeout` passes. Returns whether it did.
fn wait_for_callbacks(counter: &AtomicU64, n: u64, timeout: Duration) -> bool {
    let target = counter.load(Ordering::Acquire).saturating_add(n);
    let deadline = Instant::now() + timeout;
    while counter.load(Ordering::Acquire) < target {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
    true
}

/// State shared between the sink and its stream callbacks.
struct StreamShared {
    stream_error: ErrorSlot,
    callbacks: Arc<AtomicU64>,
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: &Arc<SharedAudio>,
    refill_max_frames: usize,
    shared: StreamShared,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, queue, refill_max_frames, shared),
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, queue, refill_max_frames, shared),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, queue, refill_max_frames, shared),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, queue, refill_max_frames, shared),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

/// Type-specialized stream builder for CPAL sample formats.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<SharedAudio>,
    refill_max_frames: usize,
    shared: StreamShared,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + cpal::FromSample<i16>,
{
    let channels_out = config.channels as usize;
    let refill_max_frames = refill_max_frames.max(1);
    let src_channels = queue.channels();

    let queue_cb = queue.clone();
    let queue_err = queue.clone();
    let StreamShared {
        stream_error,
        callbacks,
    } = shared;
    let mut st = CallbackState {
        pos: 0,
        src: Vec::new(),
    };

    let err_fn = move |err: cpal::StreamError| {
        tracing::warn!("stream error: {err}");
        if let Ok(mut slot) = stream_error.lock() {
            slot.get_or_insert_with(|| err.to_string());
        }
        // Unblock a writer waiting on a device that no longer pulls.
        queue_err.abort();
    };

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            fill_output(data, channels_out, src_channels, &mut st, &queue_cb, refill_max_frames);
            callbacks.fetch_add(1, Ordering::Release);
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Samples fetched from the queue but not yet written to the device.
struct CallbackState {
    pos: usize,
    src: Vec<i16>,
}

/// Fill one device buffer from the queue, padding with silence on underrun.
fn fill_output<T>(
    data: &mut [T],
    channels_out: usize,
    src_channels: usize,
    st: &mut CallbackState,
    queue: &SharedAudio,
    refill_max_frames: usize,
) where
    T: cpal::SizedSample + cpal::FromSample<i16>,
{
    let frames = data.len() / channels_out;
    for frame in 0..frames {
        if st.pos >= st.src.len() {
            st.pos = 0;
            match queue.pop_nonblocking(refill_max_frames) {
                Some(v) => st.src = v,
                None => {
                    st.src.clear();
                    data[frame * channels_out..].fill(<T as cpal::Sample>::EQUILIBRIUM);
                    return;
                }
            }
        }
        let src = &st.src[st.pos..st.pos + src_channels];
        for ch in 0..channels_out {
            data[frame * channels_out + ch] =
                <T as cpal::Sample>::from_sample::<i16>(map_channel(src, channels_out, ch));
        }
        st.pos += src_channels;
    }
}

/// One output sample for `dst_ch` from an interleaved stereo frame.
///
/// Mono devices get the L/R average; channels beyond the first two are silent.
fn map_channel(stereo: &[i16], dst_channels: usize, dst_ch: usize) -> i16 {
    let left = stereo.first().copied().unwrap_or(0);
    let right = stereo.get(1).copied().unwrap_or(left);
    match (dst_channels, dst_ch) {
        (1, _) => ((i32::from(left) + i32::from(right)) / 2) as i16,
        (_, 0) => left,
        (_, 1) => right,
        _ => 0,
    }
}
