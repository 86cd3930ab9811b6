//! fplay: play the audio track of a media file on the default output device.
//!
//! ## Pipeline
//! 1. **Decode**: Symphonia demuxes the file and decodes the best audio stream.
//! 2. **Filter**: a fixed graph applies 0.90 gain and converts to s16 stereo 44.1 kHz.
//! 3. **Playback**: filtered buffers are queued for the CPAL output callback.
//!
//! Everything runs on the main thread; the bounded playback queue paces decoding.

mod cli;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use filter_player::config::PlaybackConfig;
use filter_player::decode;
use filter_player::graph::FilterGraph;
use filter_player::pipeline::Pipeline;
use filter_player::playback::CpalSink;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,fplay=info,filter_player=info")
        }))
        .with_writer(std::io::stderr)
        .init();

    let args = match cli::Args::try_parse() {
        Ok(args) => args,
        Err(e) if !e.use_stderr() => {
            // --help / --version
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };

    match play(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fplay: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn play(args: &cli::Args) -> Result<()> {
    let sink = CpalSink::open(&PlaybackConfig::default()).context("open audio output")?;

    let input = decode::open_input(&args.path)
        .with_context(|| format!("open {}", args.path.display()))?;
    tracing::info!(path = %args.path.display(), format = %input.source, "playing");

    let graph = FilterGraph::configure(input.source).context("configure filter graph")?;

    let stats = Pipeline::new(
        input.reader,
        input.decoder,
        graph,
        sink,
        input.stream_index,
    )
    .run()
    .context("playback")?;

    tracing::debug!(output_frames = stats.output_frames, "finished");
    Ok(())
}
