//! Streaming video sink backed by the system `ffmpeg`.
//!
//! Frames are piped to ffmpeg stdin as raw RGBA at the configured input
//! frame rate, so the encoder's timestamp model follows the requested
//! playback rate and pacing is enforced by pipe backpressure inside
//! `push_frame` rather than by caller-side sleeping.

use crate::encode::sink::{FrameSink, SinkConfig};
use crate::foundation::core::{FrameIndex, FrameRGBA};
use crate::foundation::error::{WiggleError, WiggleResult};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

/// Options for [`FfmpegSink`] output.
#[derive(Clone, Debug)]
pub struct FfmpegSinkOpts {
    /// Output container path. `.webm` for the alpha profile, `.mp4`
    /// otherwise; on alpha degradation a `.webm` extension is remapped to
    /// `.mp4` so the fallback codec still has a valid container.
    pub out_path: PathBuf,
    /// Overwrite the output file if it already exists.
    pub overwrite: bool,
    /// Background color used to flatten alpha on non-alpha output paths
    /// (straight RGBA8).
    pub bg_rgba: [u8; 4],
}

impl FfmpegSinkOpts {
    /// Create options for writing to `out_path`.
    pub fn new(out_path: impl Into<PathBuf>) -> Self {
        Self {
            out_path: out_path.into(),
            overwrite: true,
            bg_rgba: [0, 0, 0, 255],
        }
    }
}

/// Sink that spawns `ffmpeg` and streams raw frames to its stdin.
///
/// The alpha-capable profile is VP9 with `yuva420p` in WebM. When the
/// `libvpx-vp9` encoder is unavailable the sink falls back to H.264 with
/// flattened alpha and reports the degradation through
/// [`FrameSink::alpha_degraded`]; it never silently drops alpha.
pub struct FfmpegSink {
    opts: FfmpegSinkOpts,

    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr_drain: Option<std::thread::JoinHandle<std::io::Result<Vec<u8>>>>,

    scratch: Vec<u8>,
    cfg: Option<SinkConfig>,
    last_idx: Option<FrameIndex>,
    with_alpha: bool,
    degraded: bool,
    final_path: PathBuf,
}

impl FfmpegSink {
    /// Create a new sink that streams into `ffmpeg`.
    pub fn new(opts: FfmpegSinkOpts) -> Self {
        let final_path = opts.out_path.clone();
        Self {
            opts,
            child: None,
            stdin: None,
            stderr_drain: None,
            scratch: Vec::new(),
            cfg: None,
            last_idx: None,
            with_alpha: false,
            degraded: false,
            final_path,
        }
    }

    /// The path the container is actually written to (differs from the
    /// requested path only after alpha degradation remaps the extension).
    pub fn out_path(&self) -> &Path {
        &self.final_path
    }
}

impl FrameSink for FfmpegSink {
    fn begin(&mut self, cfg: SinkConfig) -> WiggleResult<()> {
        if !cfg.fps.is_finite() || cfg.fps <= 0.0 {
            return Err(WiggleError::validation("fps must be finite and > 0"));
        }
        if cfg.width == 0 || cfg.height == 0 {
            return Err(WiggleError::validation(
                "ffmpeg sink width/height must be non-zero",
            ));
        }
        if cfg.width % 2 != 0 || cfg.height % 2 != 0 {
            return Err(WiggleError::validation(
                "ffmpeg sink width/height must be even (4:2:0 chroma subsampling)",
            ));
        }

        ensure_parent_dir(&self.opts.out_path)?;
        if !self.opts.overwrite && self.opts.out_path.exists() {
            return Err(WiggleError::validation(format!(
                "output file '{}' already exists",
                self.opts.out_path.display()
            )));
        }

        if !is_ffmpeg_on_path() {
            return Err(WiggleError::encoder_unavailable(
                "ffmpeg was not found on PATH",
            ));
        }

        self.with_alpha = cfg.alpha;
        self.degraded = false;
        self.final_path = self.opts.out_path.clone();
        if cfg.alpha && !encoder_available("libvpx-vp9") {
            self.with_alpha = false;
            self.degraded = true;
            if self.final_path.extension().is_some_and(|e| e == "webm") {
                self.final_path.set_extension("mp4");
            }
            tracing::warn!(
                path = %self.final_path.display(),
                "libvpx-vp9 unavailable; falling back to H.264 without alpha"
            );
        }

        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        if self.opts.overwrite {
            cmd.arg("-y");
        } else {
            cmd.arg("-n");
        }

        cmd.args([
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &format!("{}x{}", cfg.width, cfg.height),
            "-r",
            &format!("{}", cfg.fps),
            "-i",
            "pipe:0",
            "-an",
        ]);

        if self.with_alpha {
            cmd.args([
                "-c:v",
                "libvpx-vp9",
                "-pix_fmt",
                "yuva420p",
                "-auto-alt-ref",
                "0",
                "-b:v",
                "0",
                "-crf",
                "30",
            ]);
        } else {
            cmd.args([
                "-c:v",
                "libx264",
                "-pix_fmt",
                "yuv420p",
                "-movflags",
                "+faststart",
            ]);
        }
        cmd.arg(&self.final_path);

        let mut child = cmd.spawn().map_err(|e| {
            WiggleError::encoder_unavailable(format!("failed to spawn ffmpeg: {e}"))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WiggleError::encoding("failed to open ffmpeg stdin"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| WiggleError::encoding("failed to open ffmpeg stderr"))?;
        let stderr_drain = std::thread::spawn(move || {
            let mut bytes = Vec::new();
            stderr.read_to_end(&mut bytes)?;
            Ok(bytes)
        });

        self.scratch = vec![0u8; (cfg.width * cfg.height * 4) as usize];
        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stderr_drain = Some(stderr_drain);
        self.cfg = Some(cfg);
        self.last_idx = None;
        Ok(())
    }

    fn push_frame(&mut self, idx: FrameIndex, frame: &FrameRGBA) -> WiggleResult<()> {
        let cfg = self
            .cfg
            .as_ref()
            .ok_or_else(|| WiggleError::encoding("ffmpeg sink not started"))?;
        if let Some(last) = self.last_idx {
            if idx.0 <= last.0 {
                return Err(WiggleError::encoding(
                    "ffmpeg sink received out-of-order frame index",
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
        if frame.data.len() != self.scratch.len() {
            return Err(WiggleError::validation(
                "frame.data size mismatch with width*height*4",
            ));
        }

        let bytes: &[u8] = if self.with_alpha {
            &frame.data
        } else {
            flatten_over_bg_rgba8(&mut self.scratch, &frame.data, self.opts.bg_rgba);
            &self.scratch
        };

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(WiggleError::encoding("ffmpeg sink is already finalized"));
        };

        use std::io::Write as _;
        stdin.write_all(bytes).map_err(|e| {
            WiggleError::encoding(format!("failed to write frame to ffmpeg stdin: {e}"))
        })?;
        Ok(())
    }

    fn end(&mut self) -> WiggleResult<()> {
        drop(self.stdin.take());
        let mut child = self
            .child
            .take()
            .ok_or_else(|| WiggleError::encoding("ffmpeg sink not started"))?;

        let status = child
            .wait()
            .map_err(|e| WiggleError::encoding(format!("failed to wait for ffmpeg: {e}")))?;
        let stderr_bytes = match self.stderr_drain.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| WiggleError::encoding("ffmpeg stderr drain thread panicked"))?
                .map_err(|e| WiggleError::encoding(format!("ffmpeg stderr read failed: {e}")))?,
            None => Vec::new(),
        };

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr_bytes);
            return Err(WiggleError::encoding(format!(
                "ffmpeg exited with status {}: {}",
                status,
                stderr.trim()
            )));
        }

        self.cfg = None;
        Ok(())
    }

    fn alpha_degraded(&self) -> bool {
        self.degraded
    }
}

/// Flatten straight-alpha RGBA8 over an opaque background color.
fn flatten_over_bg_rgba8(dst: &mut [u8], src: &[u8], bg_rgba: [u8; 4]) {
    debug_assert_eq!(dst.len(), src.len());
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let a = u16::from(s[3]);
        if a == 255 {
            d.copy_from_slice(s);
            continue;
        }
        let inv = 255 - a;
        for c in 0..3 {
            let v = u16::from(s[c]) * a + u16::from(bg_rgba[c]) * inv;
            d[c] = ((v + 127) / 255) as u8;
        }
        d[3] = 255;
    }
}

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Path) -> WiggleResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            use anyhow::Context as _;
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create output directory '{}'", parent.display())
            })?;
        }
    }
    Ok(())
}

/// Return `true` when `ffmpeg` can be invoked from `PATH`.
pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Return `true` when the given encoder is listed by `ffmpeg -encoders`.
fn encoder_available(name: &str) -> bool {
    let Ok(out) = Command::new("ffmpeg")
        .args(["-hide_banner", "-encoders"])
        .stderr(Stdio::null())
        .output()
    else {
        return false;
    };
    if !out.status.success() {
        return false;
    }
    String::from_utf8_lossy(&out.stdout)
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_alpha_0_returns_bg() {
        let src = vec![200u8, 100, 50, 0];
        let mut dst = vec![0u8; 4];
        flatten_over_bg_rgba8(&mut dst, &src, [10, 20, 30, 255]);
        assert_eq!(dst, vec![10, 20, 30, 255]);
    }

    #[test]
    fn flatten_alpha_255_is_identity() {
        let src = vec![1u8, 2, 3, 255];
        let mut dst = vec![0u8; 4];
        flatten_over_bg_rgba8(&mut dst, &src, [10, 20, 30, 255]);
        assert_eq!(dst, src);
    }

    #[test]
    fn flatten_blends_partial_alpha() {
        let src = vec![255u8, 0, 0, 128];
        let mut dst = vec![0u8; 4];
        flatten_over_bg_rgba8(&mut dst, &src, [0, 0, 255, 255]);
        assert!(dst[0] > 120 && dst[0] < 136);
        assert!(dst[2] > 120 && dst[2] < 136);
        assert_eq!(dst[3], 255);
    }

    #[test]
    fn push_before_begin_fails() {
        let mut sink = FfmpegSink::new(FfmpegSinkOpts::new("/tmp/never-written.mp4"));
        let frame = FrameRGBA {
            width: 2,
            height: 2,
            data: vec![0u8; 16],
        };
        assert!(sink.push_frame(FrameIndex(0), &frame).is_err());
    }

    #[test]
    fn begin_rejects_odd_dimensions() {
        let mut sink = FfmpegSink::new(FfmpegSinkOpts::new("/tmp/never-written.mp4"));
        let err = sink
            .begin(SinkConfig {
                width: 3,
                height: 2,
                fps: 24.0,
                alpha: false,
            })
            .unwrap_err();
        assert!(matches!(err, WiggleError::Validation(_)));
    }
}
