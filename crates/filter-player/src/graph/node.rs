//! Graph nodes and the signals passed between them.

use std::collections::VecDeque;

use crate::error::{FilterWriteError, GraphInitError};
use crate::format::{ChannelLayout, SourceFormat, TARGET};
use crate::frame::{DecodedFrame, FilteredFrame};

use super::normalize::NormalizeNode;

/// What travels along a link.
#[derive(Debug)]
pub(crate) enum Signal {
    /// One plane per channel, `f32` samples.
    Planar(Vec<Vec<f32>>),
    /// Interleaved samples in the playback format.
    Pcm(FilteredFrame),
    Eof,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PadKind {
    PlanarF32,
    PackedS16,
}

/// Format carried by one side of a link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct PadSpec {
    pub kind: PadKind,
    pub rate: u32,
    pub layout: ChannelLayout,
}

impl PadSpec {
    pub fn planar(source: &SourceFormat) -> Self {
        Self {
            kind: PadKind::PlanarF32,
            rate: source.sample_rate,
            layout: source.channel_layout,
        }
    }

    pub fn target() -> Self {
        Self {
            kind: PadKind::PackedS16,
            rate: TARGET.sample_rate,
            layout: TARGET.channel_layout,
        }
    }
}

/// The four stages a frame passes through, in chain order.
pub(crate) enum Node {
    Source(SourceNode),
    Gain(GainNode),
    Normalize(NormalizeNode),
    Sink(SinkNode),
}

impl Node {
    pub fn name(&self) -> &'static str {
        match self {
            Node::Source(_) => "source",
            Node::Gain(_) => "gain",
            Node::Normalize(_) => "normalize",
            Node::Sink(_) => "sink",
        }
    }

    /// Format accepted on the input pad, `None` for the source.
    pub fn input(&self) -> Option<PadSpec> {
        match self {
            Node::Source(_) => None,
            Node::Gain(n) => Some(n.pad),
            Node::Normalize(n) => Some(n.input()),
            Node::Sink(_) => Some(PadSpec::target()),
        }
    }

    /// Format produced on the output pad, `None` for the sink.
    pub fn output(&self) -> Option<PadSpec> {
        match self {
            Node::Source(n) => Some(PadSpec::planar(&n.format)),
            Node::Gain(n) => Some(n.pad),
            Node::Normalize(_) => Some(PadSpec::target()),
            Node::Sink(_) => None,
        }
    }

    /// Feed one signal in and collect whatever the node emits downstream.
    pub fn process(&mut self, signal: Signal) -> Result<Vec<Signal>, String> {
        match self {
            Node::Source(_) => Ok(vec![signal]),
            Node::Gain(n) => n.process(signal),
            Node::Normalize(n) => n.process(signal),
            Node::Sink(n) => {
                n.process(signal)?;
                Ok(Vec::new())
            }
        }
    }
}

/// Entry point: checks incoming frames against the configured source format.
pub(crate) struct SourceNode {
    pub format: SourceFormat,
    finished: bool,
}

impl SourceNode {
    pub fn new(format: SourceFormat) -> Result<Self, GraphInitError> {
        let fail = |reason: String| GraphInitError::Node {
            node: "source",
            reason,
        };
        if format.sample_rate == 0 {
            return Err(fail("sample rate must be non-zero".into()));
        }
        if format.channel_layout.is_empty() {
            return Err(fail("channel layout is empty".into()));
        }
        if !format.time_base.is_valid() {
            return Err(fail(format!("invalid time base {}", format.time_base)));
        }
        Ok(Self {
            format,
            finished: false,
        })
    }

    pub fn accept(&mut self, frame: DecodedFrame) -> Result<Signal, FilterWriteError> {
        if self.finished {
            return Err(FilterWriteError::Finished);
        }
        if frame.sample_rate != self.format.sample_rate
            || frame.sample_format != self.format.sample_format
            || frame.channel_layout != self.format.channel_layout
        {
            return Err(FilterWriteError::FormatMismatch {
                expected: format!(
                    "{} Hz {} {}",
                    self.format.sample_rate, self.format.sample_format, self.format.channel_layout
                ),
                actual: format!(
                    "{} Hz {} {}",
                    frame.sample_rate, frame.sample_format, frame.channel_layout
                ),
            });
        }
        if frame.channels() != self.format.channel_layout.channels() {
            return Err(FilterWriteError::Malformed(format!(
                "{} planes for a {}-channel layout",
                frame.channels(),
                self.format.channel_layout.channels()
            )));
        }
        let frames = frame.frames();
        if frame.planes().iter().any(|p| p.len() != frames) {
            return Err(FilterWriteError::Malformed("planes differ in length".into()));
        }
        Ok(Signal::Planar(frame.into_planes()))
    }

    pub fn finish(&mut self) -> Result<Signal, FilterWriteError> {
        if self.finished {
            return Err(FilterWriteError::Finished);
        }
        self.finished = true;
        Ok(Signal::Eof)
    }
}

/// Fixed amplitude multiplier.
pub(crate) struct GainNode {
    gain: f32,
    pad: PadSpec,
}

impl GainNode {
    pub fn new(volume: f64, source: &SourceFormat) -> Result<Self, GraphInitError> {
        if !volume.is_finite() || volume < 0.0 {
            return Err(GraphInitError::Node {
                node: "gain",
                reason: format!("invalid volume {volume}"),
            });
        }
        Ok(Self {
            gain: volume as f32,
            pad: PadSpec::planar(source),
        })
    }

    pub fn scale(&self, planes: &mut [Vec<f32>]) {
        if self.gain == 1.0 {
            return;
        }
        for plane in planes.iter_mut() {
            for s in plane.iter_mut() {
                *s *= self.gain;
            }
        }
    }

    fn process(&mut self, signal: Signal) -> Result<Vec<Signal>, String> {
        match signal {
            Signal::Planar(mut planes) => {
                self.scale(&mut planes);
                Ok(vec![Signal::Planar(planes)])
            }
            Signal::Eof => Ok(vec![Signal::Eof]),
            Signal::Pcm(_) => Err("gain expects planar input".into()),
        }
    }
}

/// Result of a single pull from the sink.
#[derive(Debug, PartialEq)]
pub enum SinkPoll {
    Frame(FilteredFrame),
    /// Nothing buffered; push more input.
    Again,
    /// Everything has been delivered.
    Eof,
}

/// Output buffer the caller pulls from.
#[derive(Default)]
pub(crate) struct SinkNode {
    queue: VecDeque<FilteredFrame>,
    eof: bool,
}

impl SinkNode {
    fn process(&mut self, signal: Signal) -> Result<(), String> {
        match signal {
            Signal::Pcm(frame) => {
                self.queue.push_back(frame);
                Ok(())
            }
            Signal::Eof => {
                self.eof = true;
                Ok(())
            }
            Signal::Planar(_) => Err("sink expects packed s16 input".into()),
        }
    }

    pub fn poll(&mut self) -> SinkPoll {
        match self.queue.pop_front() {
            Some(frame) => SinkPoll::Frame(frame),
            None if self.eof => SinkPoll::Eof,
            None => SinkPoll::Again,
        }
    }

    pub fn is_eof(&self) -> bool {
        self.eof && self.queue.is_empty()
    }
}
