use std::io::Cursor;

use filter_player::decode::{MediaInput, open_media_source};
use filter_player::error::{PlayerError, SinkError};
use filter_player::format::{ChannelLayout, SampleFormat, TARGET};
use filter_player::frame::{DecodedFrame, FilteredFrame};
use filter_player::graph::FilterGraph;
use filter_player::pipeline::Pipeline;
use filter_player::playback::PlaybackSink;
use hound::{WavSpec, WavWriter};
use symphonia::core::probe::Hint;

#[derive(Default)]
struct RecordingSink {
    frames: Vec<FilteredFrame>,
    finished: bool,
}

impl RecordingSink {
    fn total_frames(&self) -> usize {
        self.frames.iter().map(FilteredFrame::frames).sum()
    }

    fn samples(&self) -> Vec<i16> {
        self.frames
            .iter()
            .flat_map(|f| f.samples().iter().copied())
            .collect()
    }
}

impl PlaybackSink for RecordingSink {
    fn play(&mut self, frame: &FilteredFrame) -> Result<(), SinkError> {
        assert!(!self.finished, "play after finish");
        self.frames.push(frame.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.finished = true;
        Ok(())
    }
}

fn ramp(frames: usize) -> Vec<i16> {
    (0..frames)
        .map(|i| ((i % 200) as i16 - 100) * 80)
        .collect()
}

fn wav_bytes(rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
    let spec = WavSpec {
        channels,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
    for &s in samples {
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
    cursor.into_inner()
}

fn open_wav(bytes: Vec<u8>) -> Result<MediaInput, PlayerError> {
    let mut hint = Hint::new();
    hint.with_extension("wav");
    open_media_source(Box::new(Cursor::new(bytes)), hint)
}

fn play_wav(bytes: Vec<u8>) -> RecordingSink {
    let input = open_wav(bytes).unwrap();
    let graph = FilterGraph::configure(input.source).unwrap();
    let mut sink = RecordingSink::default();
    Pipeline::new(
        input.reader,
        input.decoder,
        graph,
        &mut sink,
        input.stream_index,
    )
    .run()
    .unwrap();
    sink
}

#[test]
fn wav_source_format_is_probed() {
    let input = open_wav(wav_bytes(22_050, 1, &ramp(1_000))).unwrap();
    assert_eq!(input.source.sample_rate, 22_050);
    assert_eq!(input.source.sample_format, SampleFormat::S16);
    assert_eq!(input.source.channel_layout.channels(), 1);
    assert_eq!(input.source.channel_layout.bits(), ChannelLayout::FRONT_LEFT);
    assert_eq!(input.info.codec.as_deref(), Some("PCM_S16"));
}

#[test]
fn mono_22k_plays_as_stereo_44k_with_double_frame_count() {
    let frames = 5_000;
    let sink = play_wav(wav_bytes(22_050, 1, &ramp(frames)));

    assert!(sink.finished);
    assert!(!sink.frames.is_empty());
    for frame in &sink.frames {
        assert_eq!(frame.format(), TARGET);
        assert_eq!(frame.samples().len() % 2, 0);
    }
    assert_eq!(sink.total_frames(), frames * 2);
}

#[test]
fn uneven_rates_play_ceil_of_ratio_frames() {
    for (rate, channels, frames) in [(48_000u32, 2u16, 4_801usize), (11_025, 1, 3_001), (8_000, 2, 37)] {
        let samples = ramp(frames * channels as usize);
        let sink = play_wav(wav_bytes(rate, channels, &samples));
        let expected = (frames as u64 * 44_100).div_ceil(u64::from(rate)) as usize;
        assert_eq!(sink.total_frames(), expected, "rate {rate}");
    }
}

#[test]
fn stereo_44k_passes_through_at_ninety_percent() {
    let frames = 3_000;
    let samples: Vec<i16> = ramp(frames * 2);
    let sink = play_wav(wav_bytes(44_100, 2, &samples));

    let played = sink.samples();
    assert_eq!(played.len(), samples.len());
    for (&out, &inp) in played.iter().zip(&samples) {
        let expected = (f32::from(inp) / 32_768.0 * 0.9 * 32_768.0).round();
        assert!((f32::from(out) - expected).abs() <= 1.0, "{out} vs {expected}");
    }
}

#[test]
fn decoded_output_matches_graph_fed_directly() {
    let frames = 7_777;
    let samples = ramp(frames);
    let sink = play_wav(wav_bytes(22_050, 1, &samples));

    let input = open_wav(wav_bytes(22_050, 1, &samples)).unwrap();
    let mut reference = FilterGraph::configure(input.source).unwrap();
    let plane: Vec<f32> = samples.iter().map(|&s| f32::from(s) / 32_768.0).collect();
    reference
        .push(DecodedFrame::new(
            22_050,
            SampleFormat::S16,
            input.source.channel_layout,
            vec![plane],
        ))
        .unwrap();
    reference.finish().unwrap();
    let expected: Vec<i16> = reference
        .pull_all()
        .map(|f| f.unwrap())
        .flat_map(|f| f.samples().to_vec())
        .collect();

    let played = sink.samples();
    assert_eq!(played.len(), expected.len());
    let worst = played
        .iter()
        .zip(&expected)
        .map(|(a, b)| (i32::from(*a) - i32::from(*b)).abs())
        .max()
        .unwrap_or(0);
    assert!(worst <= 1, "max deviation {worst}");
}

#[test]
fn empty_wav_plays_nothing_and_finishes() {
    let bytes = wav_bytes(44_100, 2, &[]);
    match open_wav(bytes) {
        Ok(input) => {
            let graph = FilterGraph::configure(input.source).unwrap();
            let mut sink = RecordingSink::default();
            let stats = Pipeline::new(
                input.reader,
                input.decoder,
                graph,
                &mut sink,
                input.stream_index,
            )
            .run()
            .unwrap();
            assert_eq!(stats.output_frames, 0);
            assert!(sink.finished);
            assert_eq!(sink.total_frames(), 0);
        }
        // A zero-length data chunk may be refused before playback starts.
        Err(e) => assert!(matches!(e, PlayerError::Probe(_) | PlayerError::ChannelLayout)),
    }
}

#[test]
fn garbage_input_fails_to_probe() {
    let err = open_wav(vec![0x5a; 512]).err().unwrap();
    assert!(matches!(err, PlayerError::Probe(_)), "{err:?}");
}

#[test]
fn mismatched_frame_is_rejected_by_graph() {
    let input = open_wav(wav_bytes(22_050, 1, &ramp(100))).unwrap();
    let mut graph = FilterGraph::configure(input.source).unwrap();
    let wrong = DecodedFrame::new(
        48_000,
        SampleFormat::S16,
        ChannelLayout::STEREO,
        vec![vec![0.0; 10], vec![0.0; 10]],
    );
    assert!(graph.push(wrong).is_err());
    assert_eq!(graph.pull_all().count(), 0);
}
