use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "fplay", version, about = "Play the audio track of a media file")]
pub struct Args {
    /// Path to the media file
    pub path: PathBuf,
}
