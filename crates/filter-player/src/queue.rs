//! Bounded blocking queue between the pipeline thread and the device callback.
//!
//! The pipeline pushes interleaved `i16` samples and blocks while the queue is full;
//! the CPAL callback drains it without ever waiting. That blocking push is the only
//! throttle on decoding, so the whole pipeline runs at the device's pace.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

/// Thread-safe bounded queue for interleaved `i16` audio samples.
///
/// A `done` flag is stored under the same mutex as the samples to keep close and
/// drain free of races.
pub struct SharedAudio {
    channels: usize,
    inner: Mutex<SharedInner>,
    cv: Condvar,
    max_buffered_samples: usize,
}

struct SharedInner {
    queue: VecDeque<i16>,
    done: bool,
}

/// Compute a queue capacity in **samples** for a `(rate, channels, seconds)` target.
///
/// Non-finite or non-positive `buffer_seconds` falls back to half a second.
pub fn calc_max_buffered_samples(rate_hz: u32, channels: usize, buffer_seconds: f32) -> usize {
    let secs = if buffer_seconds.is_finite() && buffer_seconds > 0.0 {
        buffer_seconds
    } else {
        0.5
    };

    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames.saturating_mul(channels).max(channels)
}

impl SharedAudio {
    pub fn new(channels: usize, max_buffered_samples: usize) -> Self {
        Self {
            channels,
            inner: Mutex::new(SharedInner {
                queue: VecDeque::new(),
                done: false,
            }),
            cv: Condvar::new(),
            max_buffered_samples: max_buffered_samples.max(channels),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SharedInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Current buffered frames (snapshot).
    pub fn len_frames(&self) -> usize {
        self.lock().queue.len() / self.channels
    }

    pub fn is_done(&self) -> bool {
        self.lock().done
    }

    /// Mark the queue as finished and wake all waiters. Idempotent.
    pub fn close(&self) {
        self.lock().done = true;
        self.cv.notify_all();
    }

    /// Close the queue and discard anything still buffered.
    ///
    /// Used when the consumer is gone, so nobody is left waiting on a drain.
    pub fn abort(&self) {
        let mut g = self.lock();
        g.done = true;
        g.queue.clear();
        drop(g);
        self.cv.notify_all();
    }

    /// Push interleaved samples, blocking while the queue is full.
    ///
    /// Returns `false` if the queue was closed before every sample was accepted.
    pub fn push_interleaved_blocking(&self, samples: &[i16]) -> bool {
        let mut offset = 0;

        while offset < samples.len() {
            let mut g = self.lock();

            while g.queue.len() >= self.max_buffered_samples && !g.done {
                g = self.cv.wait(g).unwrap_or_else(|poisoned| poisoned.into_inner());
            }
            if g.done {
                return false;
            }

            let room = self.max_buffered_samples - g.queue.len();
            let take = room.min(samples.len() - offset);
            g.queue.extend(&samples[offset..offset + take]);
            offset += take;

            drop(g);
            self.cv.notify_all();
        }
        true
    }

    /// Pop up to `max_frames` whole frames without waiting.
    ///
    /// Returns `None` when no complete frame is buffered.
    pub fn pop_nonblocking(&self, max_frames: usize) -> Option<Vec<i16>> {
        let mut g = self.lock();

        let available_frames = g.queue.len() / self.channels;
        let take_samples = available_frames.min(max_frames) * self.channels;
        if take_samples == 0 {
            return None;
        }

        let out: Vec<i16> = g.queue.drain(..take_samples).collect();
        drop(g);
        self.cv.notify_all();
        Some(out)
    }

    /// Block until the queue is closed and fully drained by the consumer.
    pub fn wait_until_done_and_empty(&self) {
        let mut g = self.lock();
        while !(g.done && g.queue.is_empty()) {
            g = self.cv.wait(g).unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}
