//! Still-sequence sink: PNG-per-frame packed into a store-only zip archive.
//!
//! The PNGs are already compressed, so the archive uses `Stored` entries;
//! deflating them again would burn time for no size benefit.

use crate::encode::sink::{FrameSink, SinkConfig};
use crate::foundation::core::{FrameIndex, FrameRGBA};
use crate::foundation::error::{WiggleError, WiggleResult};
use image::ImageEncoder as _;
use std::io::{Cursor, Seek, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Sink that encodes each frame as a PNG named `frame_NNNN.png` (4-digit
/// zero-padded index, starting at 0) and packs the set into one zip archive
/// written to the wrapped writer.
pub struct PngSequenceSink<W: Write + Seek> {
    writer: Option<W>,
    zip: Option<ZipWriter<W>>,
    cfg: Option<SinkConfig>,
    last_idx: Option<FrameIndex>,
    frames_written: u64,
    finished: Option<W>,
}

impl<W: Write + Seek> PngSequenceSink<W> {
    /// Create a sink writing the archive into `writer`.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Some(writer),
            zip: None,
            cfg: None,
            last_idx: None,
            frames_written: 0,
            finished: None,
        }
    }

    /// Number of frames written so far.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Recover the writer after `end` has finalized the archive.
    pub fn into_inner(mut self) -> WiggleResult<W> {
        self.finished
            .take()
            .ok_or_else(|| WiggleError::encoding("archive sink was not finalized"))
    }
}

impl PngSequenceSink<Cursor<Vec<u8>>> {
    /// Convenience constructor building the archive in memory.
    pub fn in_memory() -> Self {
        Self::new(Cursor::new(Vec::new()))
    }

    /// Recover the archive bytes after `end`.
    pub fn into_bytes(self) -> WiggleResult<Vec<u8>> {
        Ok(self.into_inner()?.into_inner())
    }
}

impl<W: Write + Seek> FrameSink for PngSequenceSink<W> {
    fn begin(&mut self, cfg: SinkConfig) -> WiggleResult<()> {
        if cfg.width == 0 || cfg.height == 0 {
            return Err(WiggleError::validation(
                "archive sink width/height must be non-zero",
            ));
        }
        let writer = self
            .writer
            .take()
            .ok_or_else(|| WiggleError::encoding("archive sink already started"))?;
        self.zip = Some(ZipWriter::new(writer));
        self.cfg = Some(cfg);
        self.last_idx = None;
        self.frames_written = 0;
        Ok(())
    }

    fn push_frame(&mut self, idx: FrameIndex, frame: &FrameRGBA) -> WiggleResult<()> {
        let cfg = self
            .cfg
            .as_ref()
            .ok_or_else(|| WiggleError::encoding("archive sink not started"))?;
        if let Some(last) = self.last_idx {
            if idx.0 <= last.0 {
                return Err(WiggleError::encoding(
                    "archive sink received out-of-order frame index",
                ));
            }
        }
        self.last_idx = Some(idx);

        if frame.width != cfg.width || frame.height != cfg.height {
            return Err(WiggleError::validation(format!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                frame.width, frame.height, cfg.width, cfg.height
            )));
        }

        let mut png = Vec::new();
        image::codecs::png::PngEncoder::new(&mut png)
            .write_image(
                &frame.data,
                frame.width,
                frame.height,
                image::ExtendedColorType::Rgba8,
            )
            .map_err(|e| WiggleError::encoding(format!("png encode failed: {e}")))?;

        let zip = self
            .zip
            .as_mut()
            .ok_or_else(|| WiggleError::encoding("archive sink is already finalized"))?;
        let name = format!("frame_{:04}.png", idx.0);
        zip.start_file(
            name,
            SimpleFileOptions::default().compression_method(CompressionMethod::Stored),
        )
        .map_err(|e| WiggleError::encoding(format!("zip entry failed: {e}")))?;
        zip.write_all(&png)
            .map_err(|e| WiggleError::encoding(format!("zip write failed: {e}")))?;
        self.frames_written += 1;
        Ok(())
    }

    fn end(&mut self) -> WiggleResult<()> {
        let zip = self
            .zip
            .take()
            .ok_or_else(|| WiggleError::encoding("archive sink not started"))?;
        let writer = zip
            .finish()
            .map_err(|e| WiggleError::encoding(format!("zip finalize failed: {e}")))?;
        self.finished = Some(writer);
        Ok(())
    }
}
