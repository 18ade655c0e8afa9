pub type WiggleResult<T> = Result<T, WiggleError>;

#[derive(thiserror::Error, Debug)]
pub enum WiggleError {
    #[error("validation error: {0}")]
    Validation(String),

    /// No usable rasterization surface could be created. Fatal to the engine
    /// instance that reported it.
    #[error("render unavailable: {0}")]
    RenderUnavailable(String),

    /// An export was requested while another export is still running.
    #[error("export busy: an export is already in flight")]
    ExportBusy,

    /// A single still-image extraction failed mid-export. The export is
    /// aborted; `frames_completed` frames were produced before the failure.
    #[error("frame extraction failed after {frames_completed} frames: {source}")]
    FrameExtractionFailed {
        frames_completed: u64,
        #[source]
        source: Box<WiggleError>,
    },

    /// The requested encoder/codec profile is not usable at all (as opposed
    /// to the reported alpha-profile degradation, which is not an error).
    #[error("encoder unavailable: {0}")]
    EncoderUnavailable(String),

    /// Any call made after `Engine::teardown`. Fatal to that call only.
    #[error("engine destroyed: {0}")]
    EngineDestroyed(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WiggleError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn render_unavailable(msg: impl Into<String>) -> Self {
        Self::RenderUnavailable(msg.into())
    }

    pub fn encoder_unavailable(msg: impl Into<String>) -> Self {
        Self::EncoderUnavailable(msg.into())
    }

    pub fn engine_destroyed(msg: impl Into<String>) -> Self {
        Self::EngineDestroyed(msg.into())
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            WiggleError::validation("x")
                .to_string()
                .contains("validation error:")
        );
        assert!(
            WiggleError::render_unavailable("x")
                .to_string()
                .contains("render unavailable:")
        );
        assert!(
            WiggleError::encoder_unavailable("x")
                .to_string()
                .contains("encoder unavailable:")
        );
        assert!(
            WiggleError::engine_destroyed("x")
                .to_string()
                .contains("engine destroyed:")
        );
    }

    #[test]
    fn frame_extraction_failed_reports_partial_count() {
        let err = WiggleError::FrameExtractionFailed {
            frames_completed: 17,
            source: Box::new(WiggleError::encoding("pipe closed")),
        };
        let msg = err.to_string();
        assert!(msg.contains("17"));
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = WiggleError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
