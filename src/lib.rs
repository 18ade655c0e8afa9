//! Wiggle renders a seamlessly looping procedural-noise displacement effect
//! over a source image and exports it as a video or a still-image archive.
//!
//! The public API is engine-oriented:
//!
//! - Build a [`DisplacementConfig`] and an [`Engine`]
//! - Load a decoded [`Bitmap`]
//! - Read live preview frames, or stream a deterministic export into a
//!   [`FrameSink`]
//!
//! Live preview and export share one phase derivation and one pure render
//! path, so an exported frame is pixel-identical to what the preview shows
//! at the matching moment.
#![forbid(unsafe_code)]

pub mod clock;
pub mod encode;
pub mod engine;
pub mod field;
pub mod foundation;
pub mod noise;
pub mod surface;

pub use crate::clock::{time_vector, PhaseClock};
pub use crate::encode::archive::PngSequenceSink;
pub use crate::encode::ffmpeg::{FfmpegSink, FfmpegSinkOpts};
pub use crate::encode::sink::{FrameSink, InMemorySink, SinkConfig};
pub use crate::engine::{Engine, EngineOpts, ExportStats};
pub use crate::field::{Background, ConfigUpdate, DisplacementConfig};
pub use crate::foundation::core::{Bitmap, FrameIndex, FrameRGBA, Rgba8};
pub use crate::foundation::error::{WiggleError, WiggleResult};
pub use crate::surface::RenderSurface;
