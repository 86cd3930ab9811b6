//! Demux and decode seams, plus their Symphonia implementations.
//!
//! The pipeline only sees two traits:
//! - [`PacketReader`]: yields compressed packets until end of input
//! - [`PacketDecoder`]: turns bytes into zero or one [`DecodedFrame`] per call
//!
//! [`open_input`] probes a file with Symphonia, picks the best audio track, and
//! derives the [`SourceFormat`] the filter graph is configured from.

use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;

use symphonia::core::audio::{AudioBufferRef, SampleBuffer, SignalSpec};
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Track};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{DecodeError, PlayerError};
use crate::format::{ChannelLayout, Rational, SampleFormat, SourceFormat};
use crate::frame::{DecodedFrame, Packet};

/// Packets of the selected track decoded up front to discover the real output format.
const PROBE_PACKET_LIMIT: usize = 64;

/// Cap on packets (all tracks) held back while probing.
const PREFETCH_LIMIT: usize = 1024;

/// Result of one decoder invocation.
#[derive(Debug, Default)]
pub struct DecodeStep {
    /// Bytes of the remaining payload the decoder used.
    pub consumed: usize,
    pub frame: Option<DecodedFrame>,
}

/// Pull-style audio decoder.
pub trait PacketDecoder {
    /// Whether the decoder holds frames back until fed empty flush packets.
    fn buffers_frames(&self) -> bool;

    /// Decode the payload of `packet` starting at byte `offset`.
    ///
    /// For a flush packet the decoder is called once with `offset == 0` and no payload.
    fn decode(&mut self, packet: &Packet, offset: usize) -> Result<DecodeStep, DecodeError>;
}

impl<D: PacketDecoder + ?Sized> PacketDecoder for &mut D {
    fn buffers_frames(&self) -> bool {
        (**self).buffers_frames()
    }

    fn decode(&mut self, packet: &Packet, offset: usize) -> Result<DecodeStep, DecodeError> {
        (**self).decode(packet, offset)
    }
}

/// Why a reader stopped producing packets.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadError {
    EndOfStream,
    Failed(String),
}

/// Source of compressed packets.
pub trait PacketReader {
    fn read_packet(&mut self) -> Result<Packet, ReadError>;
}

impl<R: PacketReader + ?Sized> PacketReader for &mut R {
    fn read_packet(&mut self) -> Result<Packet, ReadError> {
        (**self).read_packet()
    }
}

/// Metadata captured while probing the source.
#[derive(Clone, Debug, Default)]
pub struct SourceInfo {
    pub codec: Option<String>,
    pub duration_ms: Option<u64>,
}

/// An opened input: reader and decoder bound to the selected audio track.
pub struct MediaInput {
    pub reader: SymphoniaReader,
    pub decoder: SymphoniaDecoder,
    pub source: SourceFormat,
    pub stream_index: u32,
    pub info: SourceInfo,
}

/// Open `path` and prepare decoding of its best audio track.
pub fn open_input(path: &Path) -> Result<MediaInput, PlayerError> {
    let file = File::open(path).map_err(|source| PlayerError::FileOpen {
        path: path.display().to_string(),
        source,
    })?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    open_media_source(Box::new(file), hint)
}

/// Open any Symphonia [`MediaSource`] (file, in-memory cursor, ...).
pub fn open_media_source(
    source: Box<dyn MediaSource>,
    hint: Hint,
) -> Result<MediaInput, PlayerError> {
    let mss = MediaSourceStream::new(source, Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| PlayerError::Probe(e.to_string()))?;
    open_format(probed.format, make_decoder)
}

/// Select the audio track of an already probed container and prepare its decoder.
///
/// `make_decoder` is only called once an audio track has been found.
fn open_format<F>(
    mut format: Box<dyn FormatReader>,
    mut make_decoder: F,
) -> Result<MediaInput, PlayerError>
where
    F: FnMut(&CodecParameters) -> Result<Box<dyn Decoder>, PlayerError>,
{
    let track = select_audio_track(format.tracks(), format.default_track())
        .ok_or(PlayerError::NoAudioStream)?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let info = SourceInfo {
        codec: codec_name_from_params(&codec_params),
        duration_ms: duration_ms_from_codec_params(&codec_params),
    };

    // Decode the first packets with a throwaway decoder: Symphonia only reveals the
    // sample format of its output once it has produced a buffer.
    let mut probe_decoder = make_decoder(&codec_params)?;
    let mut prefetched = VecDeque::new();
    let mut decoded_spec = None;
    let mut pending_error = None;
    let mut audio_packets = 0;
    while decoded_spec.is_none() {
        if audio_packets >= PROBE_PACKET_LIMIT || prefetched.len() >= PREFETCH_LIMIT {
            return Err(PlayerError::Probe(format!(
                "no decodable audio in the first {audio_packets} packets"
            )));
        }
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(e) => {
                pending_error = Some(read_error(e));
                break;
            }
        };
        if packet.track_id() == track_id {
            audio_packets += 1;
            match probe_decoder.decode(&packet) {
                Ok(decoded) if decoded.frames() > 0 => {
                    decoded_spec = Some((*decoded.spec(), sample_format_of(&decoded)));
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("probe decode failed: {e}"),
            }
        }
        prefetched.push_back(packet_from_symphonia(&packet));
    }
    drop(probe_decoder);

    let source = source_format(&codec_params, decoded_spec)?;
    let decoder = SymphoniaDecoder {
        inner: make_decoder(&codec_params)?,
        track_id,
    };

    tracing::info!(
        track = track_id,
        codec = info.codec.as_deref().unwrap_or("unknown"),
        duration_ms = info.duration_ms,
        "audio stream selected"
    );

    Ok(MediaInput {
        reader: SymphoniaReader {
            format,
            prefetched,
            pending_error,
        },
        decoder,
        source,
        stream_index: track_id,
        info,
    })
}

/// Pick the default track when it carries audio, otherwise the first decodable track
/// with a sample rate.
pub fn select_audio_track<'a>(tracks: &'a [Track], default: Option<&'a Track>) -> Option<&'a Track> {
    let is_audio =
        |t: &Track| t.codec_params.codec != CODEC_TYPE_NULL && t.codec_params.sample_rate.is_some();
    default
        .filter(|t| is_audio(t))
        .or_else(|| tracks.iter().find(|t| is_audio(t)))
}

fn make_decoder(params: &CodecParameters) -> Result<Box<dyn Decoder>, PlayerError> {
    symphonia::default::get_codecs()
        .make(params, &DecoderOptions::default())
        .map_err(|e| match e {
            SymphoniaError::Unsupported(what) => PlayerError::NoDecoder(what.to_string()),
            other => PlayerError::DecoderOpen(other.to_string()),
        })
}

/// Combine declared codec parameters with what the probe decode observed.
///
/// Without an observed buffer the input ended before any audio decoded, so no frame
/// will ever be checked against the declared fallback.
fn source_format(
    params: &CodecParameters,
    decoded: Option<(SignalSpec, SampleFormat)>,
) -> Result<SourceFormat, PlayerError> {
    let sample_rate = decoded
        .map(|(spec, _)| spec.rate)
        .or(params.sample_rate)
        .ok_or_else(|| PlayerError::Probe("unknown sample rate".into()))?;

    let channel_layout = decoded
        .map(|(spec, _)| spec.channels)
        .or_else(|| params.channels)
        .or_else(|| params.channel_layout.map(|l| l.into_channels()))
        .map(|c| ChannelLayout::from_bits(u64::from(c.bits())))
        .filter(|layout| !layout.is_empty())
        .ok_or(PlayerError::ChannelLayout)?;

    let sample_format = decoded
        .map(|(_, fmt)| fmt)
        .or_else(|| {
            params
                .bits_per_sample
                .and_then(SampleFormat::from_bits_per_sample)
        })
        .unwrap_or(SampleFormat::F32);

    let time_base = params
        .time_base
        .map(|tb| Rational::new(tb.numer, tb.denom))
        .filter(Rational::is_valid)
        .unwrap_or(Rational::new(1, sample_rate));

    Ok(SourceFormat {
        time_base,
        sample_rate,
        sample_format,
        channel_layout,
    })
}

fn sample_format_of(buf: &AudioBufferRef<'_>) -> SampleFormat {
    match buf {
        AudioBufferRef::U8(_) => SampleFormat::U8,
        AudioBufferRef::U16(_) => SampleFormat::U16,
        AudioBufferRef::U24(_) => SampleFormat::U24,
        AudioBufferRef::U32(_) => SampleFormat::U32,
        AudioBufferRef::S8(_) => SampleFormat::S8,
        AudioBufferRef::S16(_) => SampleFormat::S16,
        AudioBufferRef::S24(_) => SampleFormat::S24,
        AudioBufferRef::S32(_) => SampleFormat::S32,
        AudioBufferRef::F32(_) => SampleFormat::F32,
        AudioBufferRef::F64(_) => SampleFormat::F64,
    }
}

fn packet_from_symphonia(packet: &symphonia::core::formats::Packet) -> Packet {
    Packet::new(packet.track_id(), packet.buf().to_vec()).with_timing(packet.ts(), packet.dur())
}

fn read_error(e: SymphoniaError) -> ReadError {
    match e {
        SymphoniaError::IoError(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
            ReadError::EndOfStream
        }
        other => ReadError::Failed(other.to_string()),
    }
}

/// Packet reader over a probed Symphonia container.
///
/// Packets consumed while probing the output format are replayed first.
pub struct SymphoniaReader {
    format: Box<dyn FormatReader>,
    prefetched: VecDeque<Packet>,
    pending_error: Option<ReadError>,
}

impl PacketReader for SymphoniaReader {
    fn read_packet(&mut self) -> Result<Packet, ReadError> {
        if let Some(packet) = self.prefetched.pop_front() {
            return Ok(packet);
        }
        if let Some(err) = self.pending_error.take() {
            return Err(err);
        }
        self.format
            .next_packet()
            .map(|p| packet_from_symphonia(&p))
            .map_err(read_error)
    }
}

/// Symphonia decoder bound to one track.
///
/// Symphonia decodes a whole packet per call and never holds frames back.
pub struct SymphoniaDecoder {
    inner: Box<dyn Decoder>,
    track_id: u32,
}

impl PacketDecoder for SymphoniaDecoder {
    fn buffers_frames(&self) -> bool {
        false
    }

    fn decode(&mut self, packet: &Packet, offset: usize) -> Result<DecodeStep, DecodeError> {
        let Some(data) = packet.data() else {
            return Ok(DecodeStep::default());
        };
        let remaining = data.get(offset..).unwrap_or_default();
        let sym_packet = symphonia::core::formats::Packet::new_from_slice(
            self.track_id,
            packet.pts(),
            packet.duration(),
            remaining,
        );

        let decoded = match self.inner.decode(&sym_packet) {
            Ok(d) => d,
            Err(SymphoniaError::ResetRequired) => {
                self.inner.reset();
                return Err(DecodeError::Corrupt("decoder reset required".into()));
            }
            Err(e) => return Err(DecodeError::Corrupt(e.to_string())),
        };

        let frame = (decoded.frames() > 0).then(|| decoded_to_frame(decoded, packet.pts()));
        Ok(DecodeStep {
            consumed: remaining.len(),
            frame,
        })
    }
}

fn decoded_to_frame(decoded: AudioBufferRef<'_>, pts: u64) -> DecodedFrame {
    let spec = *decoded.spec();
    let sample_format = sample_format_of(&decoded);
    let frames = decoded.frames();
    let channels = spec.channels.count();

    let mut sample_buf = SampleBuffer::<f32>::new(frames as u64, spec);
    sample_buf.copy_planar_ref(decoded);
    let planes = sample_buf
        .samples()
        .chunks(frames)
        .take(channels)
        .map(<[f32]>::to_vec)
        .collect();

    DecodedFrame::new(
        spec.rate,
        sample_format,
        ChannelLayout::from_bits(u64::from(spec.channels.bits())),
        planes,
    )
    .with_pts(pts)
}

/// Best-effort duration in milliseconds from codec metadata.
fn duration_ms_from_codec_params(codec_params: &CodecParameters) -> Option<u64> {
    let frames = codec_params.n_frames?;
    let rate = codec_params.sample_rate? as u64;
    if rate == 0 {
        return None;
    }
    Some(frames.saturating_mul(1000) / rate)
}

/// Best-effort codec label for logging.
fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}
