pub mod config;
pub mod decode;
pub mod device;
pub mod error;
pub mod format;
pub mod frame;
pub mod graph;
pub mod pipeline;
pub mod playback;
pub mod queue;
pub mod status;
