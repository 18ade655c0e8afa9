use crate::foundation::core::{FrameIndex, FrameRGBA};
use crate::foundation::error::WiggleResult;

/// Configuration provided to a [`FrameSink`] before any frames are pushed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SinkConfig {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Playback frame rate in frames per second.
    pub fps: f64,
    /// Whether the caller wants the output to carry the frames' alpha
    /// channel. Sinks that cannot honor this fall back and report it through
    /// [`FrameSink::alpha_degraded`] instead of failing.
    pub alpha: bool,
}

/// Sink contract for consuming rendered frames in export order.
///
/// Ordering contract: `push_frame` is called with strictly increasing frame
/// indices starting at 0. `push_frame` is also the backpressure point: a sink
/// that needs pacing (e.g. a streaming encoder) blocks here until it is ready
/// for the next frame, rather than having the caller sleep.
pub trait FrameSink {
    /// Called once before any frames are pushed.
    fn begin(&mut self, cfg: SinkConfig) -> WiggleResult<()>;
    /// Push one frame in strictly increasing index order.
    fn push_frame(&mut self, idx: FrameIndex, frame: &FrameRGBA) -> WiggleResult<()>;
    /// Called once after the last frame is pushed.
    fn end(&mut self) -> WiggleResult<()>;
    /// `true` when the sink had to drop the requested alpha support.
    fn alpha_degraded(&self) -> bool {
        false
    }
}

/// In-memory sink for tests and debugging.
#[derive(Debug, Default)]
pub struct InMemorySink {
    cfg: Option<SinkConfig>,
    /// Frames in push order.
    pub frames: Vec<(FrameIndex, FrameRGBA)>,
}

impl InMemorySink {
    /// Create a new in-memory sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the configuration captured in `begin`, if any.
    pub fn config(&self) -> Option<SinkConfig> {
        self.cfg
    }
}

impl FrameSink for InMemorySink {
    fn begin(&mut self, cfg: SinkConfig) -> WiggleResult<()> {
        self.cfg = Some(cfg);
        self.frames.clear();
        Ok(())
    }

    fn push_frame(&mut self, idx: FrameIndex, frame: &FrameRGBA) -> WiggleResult<()> {
        self.frames.push((idx, frame.clone()));
        Ok(())
    }

    fn end(&mut self) -> WiggleResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_sink_captures_config_and_frames() {
        let mut sink = InMemorySink::new();
        sink.begin(SinkConfig {
            width: 2,
            height: 1,
            fps: 24.0,
            alpha: true,
        })
        .unwrap();
        let frame = FrameRGBA {
            width: 2,
            height: 1,
            data: vec![0u8; 8],
        };
        sink.push_frame(FrameIndex(0), &frame).unwrap();
        sink.end().unwrap();
        assert_eq!(sink.config().unwrap().fps, 24.0);
        assert_eq!(sink.frames.len(), 1);
        assert!(!sink.alpha_degraded());
    }
}
