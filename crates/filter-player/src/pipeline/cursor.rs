//! Iteration over the frames contained in one packet.

use crate::decode::PacketDecoder;
use crate::error::DecodeError;
use crate::frame::{DecodedFrame, Packet};

/// Walks a packet's payload, invoking the decoder on the remaining bytes until a frame
/// comes out or the payload is used up.
///
/// A flush packet gets exactly one decoder call. A decoder error ends the iteration:
/// the rest of the packet is abandoned.
pub struct PacketFrames<'a, D: PacketDecoder> {
    decoder: &'a mut D,
    packet: &'a Packet,
    offset: usize,
    started: bool,
    done: bool,
}

impl<'a, D: PacketDecoder> PacketFrames<'a, D> {
    pub fn new(decoder: &'a mut D, packet: &'a Packet) -> Self {
        Self {
            decoder,
            packet,
            offset: 0,
            started: false,
            done: false,
        }
    }

    /// Bytes of the payload not yet handed to the decoder.
    pub fn remaining(&self) -> usize {
        self.packet.size().saturating_sub(self.offset)
    }
}

impl<D: PacketDecoder> Iterator for PacketFrames<'_, D> {
    type Item = Result<DecodedFrame, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            let flush = self.packet.is_flush();
            let has_input = if flush { !self.started } else { self.remaining() > 0 };
            if !has_input {
                self.done = true;
                return None;
            }
            self.started = true;

            let step = match self.decoder.decode(self.packet, self.offset) {
                Ok(step) => step,
                Err(e) => {
                    self.offset = self.packet.size();
                    self.done = true;
                    return Some(Err(e));
                }
            };

            let consumed = step.consumed.min(self.remaining());
            self.offset += consumed;

            match step.frame {
                Some(frame) => return Some(Ok(frame)),
                None if flush => {
                    self.done = true;
                    return None;
                }
                None if !flush && consumed == 0 => {
                    // Cursor cannot move; abandon the packet rather than spin.
                    self.done = true;
                    return None;
                }
                None => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::DecodeStep;
    use crate::format::{ChannelLayout, SampleFormat};

    /// Decodes one frame per `frame_bytes` of payload; `0xFF` marks a corrupt byte.
    struct ByteDecoder {
        frame_bytes: usize,
        calls: usize,
    }

    impl PacketDecoder for ByteDecoder {
        fn buffers_frames(&self) -> bool {
            false
        }

        fn decode(&mut self, packet: &Packet, offset: usize) -> Result<DecodeStep, DecodeError> {
            self.calls += 1;
            let Some(data) = packet.data() else {
                return Ok(DecodeStep::default());
            };
            let rest = &data[offset..];
            if rest.first() == Some(&0xFF) {
                return Err(DecodeError::Corrupt("bad byte".into()));
            }
            let consumed = rest.len().min(self.frame_bytes);
            let frame = DecodedFrame::new(
                44_100,
                SampleFormat::S16,
                ChannelLayout::MONO,
                vec![vec![0.0; consumed]],
            );
            Ok(DecodeStep {
                consumed,
                frame: Some(frame),
            })
        }
    }

    #[test]
    fn yields_one_frame_per_decoder_call_and_advances() {
        let mut dec = ByteDecoder {
            frame_bytes: 4,
            calls: 0,
        };
        let pkt = Packet::new(0, vec![0; 10]);
        let mut frames = PacketFrames::new(&mut dec, &pkt);
        assert_eq!(frames.next().unwrap().unwrap().frames(), 4);
        assert_eq!(frames.remaining(), 6);
        assert_eq!(frames.next().unwrap().unwrap().frames(), 4);
        assert_eq!(frames.next().unwrap().unwrap().frames(), 2);
        assert!(frames.next().is_none());
        assert_eq!(dec.calls, 3);
    }

    #[test]
    fn error_abandons_rest_of_packet() {
        let mut dec = ByteDecoder {
            frame_bytes: 2,
            calls: 0,
        };
        let pkt = Packet::new(0, vec![0, 0, 0xFF, 0, 0, 0]);
        let mut frames = PacketFrames::new(&mut dec, &pkt);
        assert!(frames.next().unwrap().is_ok());
        assert!(frames.next().unwrap().is_err());
        assert_eq!(frames.remaining(), 0);
        assert!(frames.next().is_none());
    }

    #[test]
    fn flush_packet_calls_decoder_once() {
        let mut dec = ByteDecoder {
            frame_bytes: 2,
            calls: 0,
        };
        let pkt = Packet::flush(0);
        let mut frames = PacketFrames::new(&mut dec, &pkt);
        assert!(frames.next().is_none());
        assert!(frames.next().is_none());
        assert_eq!(dec.calls, 1);
    }
}
