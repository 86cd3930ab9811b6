//! Error types for the playback pipeline.
//!
//! Graph errors are split by direction (`GraphInitError`, `FilterWriteError`,
//! `FilterReadError`) so the decode loop can tell a skippable frame rejection apart
//! from a broken pipeline. [`PlayerError`] is the fatal taxonomy surfaced to `main`.

use thiserror::Error;

/// Failure while creating, linking or validating the filter graph.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphInitError {
    #[error("error initializing {node} filter: {reason}")]
    Node { node: &'static str, reason: String },

    #[error("error connecting filters {from} -> {to}: {reason}")]
    Link {
        from: &'static str,
        to: &'static str,
        reason: String,
    },

    #[error("error configuring the filter graph: {0}")]
    Config(String),
}

/// The graph refused a frame pushed into its source node.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterWriteError {
    #[error("frame format mismatch: expected {expected}, got {actual}")]
    FormatMismatch { expected: String, actual: String },

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("filter graph already reached end of stream")]
    Finished,
}

/// The graph failed while producing output.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("error reading buffer from sink: {0}")]
pub struct FilterReadError(pub String);

/// Recoverable decode failure: the current packet is abandoned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("corrupt packet: {0}")]
    Corrupt(String),

    #[error("error writing frame to source: {0}")]
    Filter(#[from] FilterWriteError),
}

/// Playback device failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    #[error("output stream error: {0}")]
    Stream(String),

    #[error("output queue closed")]
    Closed,
}

/// Fatal errors: any of these ends the process with a non-zero status.
#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("opening audio device: {0}")]
    DeviceOpen(String),

    #[error("error opening {path}: {source}")]
    FileOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not find codec parameters: {0}")]
    Probe(String),

    #[error("no audio stream found")]
    NoAudioStream,

    #[error("no decoder found: {0}")]
    NoDecoder(String),

    #[error("unable to open decoder: {0}")]
    DecoderOpen(String),

    #[error("unable to guess channel layout")]
    ChannelLayout,

    #[error("unable to init filter graph: {0}")]
    GraphInit(#[from] GraphInitError),

    #[error(transparent)]
    FilterRead(#[from] FilterReadError),

    #[error("audio output failed: {0}")]
    Sink(#[from] SinkError),
}

pub type Result<T> = std::result::Result<T, PlayerError>;
