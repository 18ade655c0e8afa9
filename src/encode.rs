pub mod archive;
pub mod ffmpeg;
pub mod sink;
