//! Playback pipeline: read → decode → filter → play, with end-of-stream draining.
//!
//! [`Pipeline`] owns every stage for the lifetime of one run. It is driven by a small
//! state machine ([`DrainState`]):
//! - `Streaming`: read packets, decode the selected stream, forward filtered audio
//! - `Flushing`: feed empty packets to a decoder that holds frames back, until it runs dry
//! - `Done`: terminal
//!
//! After `Done` the filter graph is finished so its internal tail reaches the sink too.

mod cursor;

pub use cursor::PacketFrames;

use crate::decode::{PacketDecoder, PacketReader, ReadError};
use crate::error::{DecodeError, PlayerError};
use crate::format::TARGET;
use crate::frame::Packet;
use crate::graph::FilterGraph;
use crate::playback::PlaybackSink;
use crate::status::PlaybackStats;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainState {
    Streaming,
    Flushing,
    Done,
}

/// What a single [`Pipeline::decode_frame`] call achieved.
#[derive(Debug, PartialEq)]
pub enum DecodeOutcome {
    /// A frame was decoded, filtered and played.
    Produced,
    /// The decoder produced nothing for this packet.
    NoFrame,
    /// The packet or its frame was dropped; playback continues.
    Skipped(DecodeError),
}

impl DecodeOutcome {
    /// Whether the decoder handed out a frame (even one the graph then refused).
    pub fn frames_produced(&self) -> bool {
        matches!(
            self,
            DecodeOutcome::Produced | DecodeOutcome::Skipped(DecodeError::Filter(_))
        )
    }
}

pub struct Pipeline<R, D, S> {
    reader: R,
    decoder: D,
    graph: FilterGraph,
    sink: S,
    stream_index: u32,
    state: DrainState,
    stats: PlaybackStats,
}

impl<R, D, S> Pipeline<R, D, S>
where
    R: PacketReader,
    D: PacketDecoder,
    S: PlaybackSink,
{
    pub fn new(reader: R, decoder: D, graph: FilterGraph, sink: S, stream_index: u32) -> Self {
        Self {
            reader,
            decoder,
            graph,
            sink,
            stream_index,
            state: DrainState::Streaming,
            stats: PlaybackStats::default(),
        }
    }

    pub fn state(&self) -> DrainState {
        self.state
    }

    pub fn stats(&self) -> &PlaybackStats {
        &self.stats
    }

    /// Decode at most one frame from `packet` and push everything it yields to the sink.
    ///
    /// Decoder errors and rejected frames are logged and reported as
    /// [`DecodeOutcome::Skipped`]; only filter read and sink failures are fatal.
    pub fn decode_frame(&mut self, packet: &Packet) -> Result<DecodeOutcome, PlayerError> {
        let next = PacketFrames::new(&mut self.decoder, packet).next();

        let frame = match next {
            None => return Ok(DecodeOutcome::NoFrame),
            Some(Err(e)) => {
                self.stats.decode_errors += 1;
                tracing::warn!(
                    stream = packet.stream_index(),
                    size = packet.size(),
                    "skipping packet: {e}"
                );
                return Ok(DecodeOutcome::Skipped(e));
            }
            Some(Ok(frame)) => frame,
        };
        self.stats.frames_decoded += 1;
        tracing::trace!(pts = frame.pts, frames = frame.frames(), "decoded frame");

        if let Err(e) = self.graph.push(frame) {
            self.stats.frames_rejected += 1;
            tracing::warn!("error writing frame to filter graph: {e}");
            return Ok(DecodeOutcome::Skipped(e.into()));
        }
        self.play_filtered()?;
        Ok(DecodeOutcome::Produced)
    }

    /// Pull every frame the graph has ready and write it to the sink.
    fn play_filtered(&mut self) -> Result<(), PlayerError> {
        for frame in self.graph.pull_all() {
            let frame = frame?;
            self.sink.play(&frame)?;
            self.stats.filtered_frames += 1;
            self.stats.output_frames += frame.frames() as u64;
        }
        Ok(())
    }

    /// Advance the state machine by one packet (or one flush call).
    pub fn step(&mut self) -> Result<DrainState, PlayerError> {
        match self.state {
            DrainState::Streaming => match self.reader.read_packet() {
                Ok(packet) => {
                    self.stats.packets_read += 1;
                    if packet.stream_index() != self.stream_index {
                        self.stats.packets_discarded += 1;
                        tracing::trace!(stream = packet.stream_index(), "discarding packet");
                    } else {
                        self.decode_frame(&packet)?;
                    }
                }
                Err(ReadError::EndOfStream) => {
                    tracing::debug!("end of input");
                    self.state = DrainState::Flushing;
                }
                Err(ReadError::Failed(e)) => {
                    tracing::warn!("error reading frames: {e}");
                    self.state = DrainState::Flushing;
                }
            },
            DrainState::Flushing => {
                if !self.decoder.buffers_frames() {
                    self.state = DrainState::Done;
                } else {
                    self.stats.flush_calls += 1;
                    let outcome = self.decode_frame(&Packet::flush(self.stream_index))?;
                    if !outcome.frames_produced() {
                        tracing::debug!(flush_calls = self.stats.flush_calls, "decoder drained");
                        self.state = DrainState::Done;
                    }
                }
            }
            DrainState::Done => {}
        }
        Ok(self.state)
    }

    /// Run to completion: stream, drain the decoder, flush the graph, close the sink.
    pub fn run(mut self) -> Result<PlaybackStats, PlayerError> {
        while self.step()? != DrainState::Done {}

        if let Err(e) = self.graph.finish() {
            tracing::warn!("error flushing filter graph: {e}");
        }
        self.play_filtered()?;
        self.sink.finish()?;

        self.stats.log_summary(TARGET.sample_rate);
        Ok(self.stats)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::decode::DecodeStep;
    use crate::error::SinkError;
    use crate::format::{ChannelLayout, Rational, SampleFormat, SourceFormat};
    use crate::frame::{DecodedFrame, FilteredFrame};

    const FRAME_LEN: usize = 256;

    fn source() -> SourceFormat {
        SourceFormat {
            time_base: Rational::new(1, 44_100),
            sample_rate: 44_100,
            sample_format: SampleFormat::S16,
            channel_layout: ChannelLayout::STEREO,
        }
    }

    fn stereo_frame() -> DecodedFrame {
        DecodedFrame::new(
            44_100,
            SampleFormat::S16,
            ChannelLayout::STEREO,
            vec![vec![0.25; FRAME_LEN]; 2],
        )
    }

    struct ScriptedReader(VecDeque<Result<Packet, ReadError>>);

    impl PacketReader for ScriptedReader {
        fn read_packet(&mut self) -> Result<Packet, ReadError> {
            self.0.pop_front().unwrap_or(Err(ReadError::EndOfStream))
        }
    }

    /// Emits one frame per packet, lagging `delay` packets behind like a codec with a
    /// lookahead; the lagged frames come out on flush packets.
    struct DelayDecoder {
        delay: usize,
        held: usize,
        calls: usize,
        flush_calls: usize,
    }

    impl PacketDecoder for DelayDecoder {
        fn buffers_frames(&self) -> bool {
            self.delay > 0
        }

        fn decode(&mut self, packet: &Packet, _offset: usize) -> Result<DecodeStep, DecodeError> {
            self.calls += 1;
            match packet.data() {
                Some(data) => {
                    if data.first() == Some(&0xFF) {
                        return Err(DecodeError::Corrupt("bad sync word".into()));
                    }
                    self.held += 1;
                    let frame = (self.held > self.delay).then(|| {
                        self.held -= 1;
                        stereo_frame()
                    });
                    Ok(DecodeStep {
                        consumed: data.len(),
                        frame,
                    })
                }
                None => {
                    self.flush_calls += 1;
                    let frame = (self.held > 0).then(|| {
                        self.held -= 1;
                        stereo_frame()
                    });
                    Ok(DecodeStep { consumed: 0, frame })
                }
            }
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        frames: Vec<FilteredFrame>,
        finished: bool,
    }

    impl PlaybackSink for RecordingSink {
        fn play(&mut self, frame: &FilteredFrame) -> Result<(), SinkError> {
            self.frames.push(frame.clone());
            Ok(())
        }

        fn finish(&mut self) -> Result<(), SinkError> {
            self.finished = true;
            Ok(())
        }
    }

    fn packets(payloads: &[&[u8]]) -> ScriptedReader {
        ScriptedReader(
            payloads
                .iter()
                .map(|p| Ok(Packet::new(0, p.to_vec())))
                .collect(),
        )
    }

    #[test]
    fn buffered_frames_are_drained_before_done() {
        let reader = packets(&[&[1], &[2], &[3], &[4], &[5]]);
        let mut decoder = DelayDecoder {
            delay: 3,
            held: 0,
            calls: 0,
            flush_calls: 0,
        };
        let mut sink = RecordingSink::default();
        let graph = FilterGraph::configure(source()).unwrap();

        let mut pipeline = Pipeline::new(reader, &mut decoder, graph, &mut sink, 0);
        while pipeline.state() == DrainState::Streaming {
            pipeline.step().unwrap();
        }
        assert_eq!(pipeline.stats().frames_decoded, 2);

        while pipeline.step().unwrap() != DrainState::Done {}
        let stats = pipeline.run().unwrap();

        // three productive flush calls plus the one that comes back empty
        assert_eq!(stats.flush_calls, 4);
        assert_eq!(stats.frames_decoded, 5);
        assert_eq!(decoder.flush_calls, 4);
        assert_eq!(sink.frames.len(), 5);
        assert!(sink.finished);
    }

    #[test]
    fn decoder_without_delay_skips_flushing() {
        let reader = packets(&[&[1], &[2]]);
        let mut decoder = DelayDecoder {
            delay: 0,
            held: 0,
            calls: 0,
            flush_calls: 0,
        };
        let mut sink = RecordingSink::default();
        let graph = FilterGraph::configure(source()).unwrap();
        let stats = Pipeline::new(reader, &mut decoder, graph, &mut sink, 0)
            .run()
            .unwrap();
        assert_eq!(stats.flush_calls, 0);
        assert_eq!(decoder.flush_calls, 0);
        assert_eq!(sink.frames.len(), 2);
    }

    #[test]
    fn corrupt_packet_is_skipped_and_stream_continues() {
        let reader = packets(&[&[1], &[0xFF, 1, 2], &[2], &[3]]);
        let mut decoder = DelayDecoder {
            delay: 0,
            held: 0,
            calls: 0,
            flush_calls: 0,
        };
        let mut sink = RecordingSink::default();
        let graph = FilterGraph::configure(source()).unwrap();
        let stats = Pipeline::new(reader, &mut decoder, graph, &mut sink, 0)
            .run()
            .unwrap();
        assert_eq!(stats.decode_errors, 1);
        assert_eq!(stats.frames_decoded, 3);
        assert_eq!(sink.frames.len(), 3);
        assert_eq!(decoder.calls, 4);
        for f in &sink.frames {
            assert_eq!(f.frames(), FRAME_LEN);
        }
    }

    #[test]
    fn other_streams_and_read_failures() {
        let reader = ScriptedReader(VecDeque::from(vec![
            Ok(Packet::new(1, vec![9])),
            Ok(Packet::new(0, vec![1])),
            Err(ReadError::Failed("io error".into())),
            Ok(Packet::new(0, vec![2])),
        ]));
        let mut decoder = DelayDecoder {
            delay: 0,
            held: 0,
            calls: 0,
            flush_calls: 0,
        };
        let mut sink = RecordingSink::default();
        let graph = FilterGraph::configure(source()).unwrap();
        let stats = Pipeline::new(reader, &mut decoder, graph, &mut sink, 0)
            .run()
            .unwrap();
        assert_eq!(stats.packets_read, 2);
        assert_eq!(stats.packets_discarded, 1);
        assert_eq!(decoder.calls, 1);
        assert_eq!(sink.frames.len(), 1);
    }

    #[test]
    fn rejected_frame_is_reported_but_not_fatal() {
        struct WrongRate;
        impl PacketDecoder for WrongRate {
            fn buffers_frames(&self) -> bool {
                false
            }
            fn decode(&mut self, packet: &Packet, _: usize) -> Result<DecodeStep, DecodeError> {
                let mut frame = stereo_frame();
                frame.sample_rate = 48_000;
                Ok(DecodeStep {
                    consumed: packet.size(),
                    frame: Some(frame),
                })
            }
        }

        let mut sink = RecordingSink::default();
        let graph = FilterGraph::configure(source()).unwrap();
        let mut pipeline = Pipeline::new(packets(&[]), WrongRate, graph, &mut sink, 0);
        let outcome = pipeline.decode_frame(&Packet::new(0, vec![1])).unwrap();
        assert!(matches!(
            outcome,
            DecodeOutcome::Skipped(DecodeError::Filter(_))
        ));
        assert!(outcome.frames_produced());
        assert_eq!(pipeline.stats().frames_rejected, 1);
    }

    #[test]
    fn done_is_terminal() {
        let mut sink = RecordingSink::default();
        let graph = FilterGraph::configure(source()).unwrap();
        let mut decoder = DelayDecoder {
            delay: 0,
            held: 0,
            calls: 0,
            flush_calls: 0,
        };
        let mut pipeline = Pipeline::new(packets(&[]), &mut decoder, graph, &mut sink, 0);
        assert_eq!(pipeline.step().unwrap(), DrainState::Flushing);
        assert_eq!(pipeline.step().unwrap(), DrainState::Done);
        assert_eq!(pipeline.step().unwrap(), DrainState::Done);
    }
}
