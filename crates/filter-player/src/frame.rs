//! Units of data flowing through the pipeline.
//!
//! A [`Packet`] is read from the demuxer, decoded into a [`DecodedFrame`], and filtered
//! into one or more [`FilteredFrame`]s. None of these outlive a single loop iteration.

use crate::format::{ChannelLayout, SampleFormat, TARGET, TargetFormat};

/// Compressed unit of media data tagged with its stream.
///
/// A packet without payload is the synthetic flush packet used while draining.
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    stream_index: u32,
    pts: u64,
    duration: u64,
    data: Option<Vec<u8>>,
}

impl Packet {
    pub fn new(stream_index: u32, data: Vec<u8>) -> Self {
        Self {
            stream_index,
            pts: 0,
            duration: 0,
            data: Some(data),
        }
    }

    /// Empty packet that asks a decoder to release any frames it is holding back.
    pub fn flush(stream_index: u32) -> Self {
        Self {
            stream_index,
            pts: 0,
            duration: 0,
            data: None,
        }
    }

    pub fn with_timing(mut self, pts: u64, duration: u64) -> Self {
        self.pts = pts;
        self.duration = duration;
        self
    }

    pub fn stream_index(&self) -> u32 {
        self.stream_index
    }

    pub fn pts(&self) -> u64 {
        self.pts
    }

    pub fn duration(&self) -> u64 {
        self.duration
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    pub fn size(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }

    pub fn is_flush(&self) -> bool {
        self.data.is_none()
    }
}

/// Planar PCM samples in the source format, as handed out by a decoder.
///
/// Samples are held as `f32` regardless of `sample_format`; the tag records what the
/// decoder produced so the filter graph can reject frames that drift from the
/// configured source format.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedFrame {
    pub sample_rate: u32,
    pub sample_format: SampleFormat,
    pub channel_layout: ChannelLayout,
    pub pts: u64,
    planes: Vec<Vec<f32>>,
}

impl DecodedFrame {
    /// Build a frame from one sample plane per channel.
    pub fn new(
        sample_rate: u32,
        sample_format: SampleFormat,
        channel_layout: ChannelLayout,
        planes: Vec<Vec<f32>>,
    ) -> Self {
        Self {
            sample_rate,
            sample_format,
            channel_layout,
            pts: 0,
            planes,
        }
    }

    pub fn with_pts(mut self, pts: u64) -> Self {
        self.pts = pts;
        self
    }

    pub fn planes(&self) -> &[Vec<f32>] {
        &self.planes
    }

    pub fn into_planes(self) -> Vec<Vec<f32>> {
        self.planes
    }

    pub fn channels(&self) -> usize {
        self.planes.len()
    }

    /// Samples per channel (0 for a frame without planes).
    pub fn frames(&self) -> usize {
        self.planes.first().map_or(0, Vec::len)
    }
}

/// Interleaved PCM in the fixed playback format.
#[derive(Clone, Debug, PartialEq)]
pub struct FilteredFrame {
    samples: Vec<i16>,
}

impl FilteredFrame {
    pub(crate) fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    pub fn format(&self) -> TargetFormat {
        TARGET
    }

    /// Interleaved `L, R, L, R, ...` samples.
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / TARGET.channels()
    }

    /// Native-endian byte view, as a raw device write expects.
    pub fn to_ne_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_packet_has_no_payload() {
        let pkt = Packet::flush(3);
        assert!(pkt.is_flush());
        assert_eq!(pkt.size(), 0);
        assert_eq!(pkt.stream_index(), 3);
        assert!(pkt.data().is_none());
    }

    #[test]
    fn packet_size_tracks_payload() {
        let pkt = Packet::new(0, vec![1, 2, 3]).with_timing(10, 3);
        assert_eq!(pkt.size(), 3);
        assert_eq!(pkt.pts(), 10);
        assert!(!pkt.is_flush());
    }

    #[test]
    fn filtered_frame_byte_view_is_two_bytes_per_sample() {
        let frame = FilteredFrame::new(vec![1, -1, 300, -300]);
        assert_eq!(frame.frames(), 2);
        let bytes = frame.to_ne_bytes();
        assert_eq!(bytes.len(), 8);
        assert_eq!(i16::from_ne_bytes([bytes[2], bytes[3]]), -1);
    }
}
