//! Software render surface.
//!
//! Owns the single bound source bitmap (as a transparent-padded texture plus
//! a precomputed alpha plane for edge detection) and evaluates the
//! displacement field per pixel. `render_at` is synchronous and
//! deterministic: rows are rendered in parallel but every pixel is a pure
//! function of (config, phase, coordinate), so the output is byte-identical
//! to a sequential pass.

use rayon::prelude::*;

use crate::clock::time_vector;
use crate::field::{self, Background, ConfigUpdate, DisplacementConfig};
use crate::foundation::core::{Bitmap, FrameRGBA};
use crate::foundation::error::{WiggleError, WiggleResult};

/// Largest accepted source dimension. Anything bigger is treated as an
/// unusable rasterization target.
const MAX_DIM: u32 = 16_384;

#[derive(Debug)]
pub struct RenderSurface {
    width: u32,
    height: u32,
    /// Padding in texels around the source texture, sized at load time so
    /// displaced samples at the canvas boundary read transparent padding
    /// instead of clamped edge pixels.
    pad: u32,
    padded_width: u32,
    padded_height: u32,
    /// Padded straight-alpha RGBA8 texture.
    texture: Vec<u8>,
    /// Source alpha plane normalized to [0, 1], unpadded, for edge-gradient
    /// sampling with clamp-to-edge semantics.
    alpha: Vec<f32>,
    cfg: DisplacementConfig,
}

impl RenderSurface {
    /// Create a surface bound to `bitmap` under `cfg`.
    pub fn new(bitmap: &Bitmap, cfg: &DisplacementConfig) -> WiggleResult<Self> {
        cfg.validate()?;
        let mut surface = Self {
            width: 0,
            height: 0,
            pad: 0,
            padded_width: 0,
            padded_height: 0,
            texture: Vec::new(),
            alpha: Vec::new(),
            cfg: cfg.clone(),
        };
        surface.load_bitmap(bitmap)?;
        Ok(surface)
    }

    /// Replace the bound texture with a new source bitmap.
    ///
    /// Resizes the output surface to the bitmap's dimensions and rebuilds the
    /// displacement padding at `ceil(amount_px) + 2` texels. All state
    /// derived from the previous bitmap is discarded.
    pub fn load_bitmap(&mut self, bitmap: &Bitmap) -> WiggleResult<()> {
        let (w, h) = (bitmap.width(), bitmap.height());
        if w > MAX_DIM || h > MAX_DIM {
            return Err(WiggleError::render_unavailable(format!(
                "source bitmap {w}x{h} exceeds the {MAX_DIM}px surface limit"
            )));
        }

        let pad = self.cfg.amount_px.ceil() as u32 + 2;
        let pw = w + 2 * pad;
        let ph = h + 2 * pad;
        let texture_len = (pw as usize)
            .checked_mul(ph as usize)
            .and_then(|v| v.checked_mul(4))
            .ok_or_else(|| {
                WiggleError::render_unavailable("padded surface allocation overflows")
            })?;

        let mut texture = vec![0u8; texture_len];
        let src = bitmap.data();
        for y in 0..h as usize {
            let src_row = &src[y * w as usize * 4..(y + 1) * w as usize * 4];
            let dst_start = ((y + pad as usize) * pw as usize + pad as usize) * 4;
            texture[dst_start..dst_start + src_row.len()].copy_from_slice(src_row);
        }

        let alpha = src
            .chunks_exact(4)
            .map(|px| f32::from(px[3]) / 255.0)
            .collect();

        self.width = w;
        self.height = h;
        self.pad = pad;
        self.padded_width = pw;
        self.padded_height = ph;
        self.texture = texture;
        self.alpha = alpha;
        Ok(())
    }

    /// Push changed scalar parameters without reallocating the texture.
    ///
    /// The displacement padding keeps the size it had at load time; a larger
    /// `amount_px` takes full effect on the next `load_bitmap`.
    pub fn update_config(&mut self, update: &ConfigUpdate) -> WiggleResult<()> {
        self.cfg = update.apply(&self.cfg)?;
        Ok(())
    }

    /// Switch the background compositing mode.
    pub fn set_background(&mut self, background: Background) {
        self.cfg.background = background;
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> &DisplacementConfig {
        &self.cfg
    }

    /// Output width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Output height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Render one frame at the given loop phase.
    pub fn render_at(&self, phase: f64) -> WiggleResult<FrameRGBA> {
        if self.texture.is_empty() {
            return Err(WiggleError::render_unavailable("no bound texture"));
        }

        let time = time_vector(phase);
        let w = self.width as usize;
        let mut data = vec![0u8; w * self.height as usize * 4];

        data.par_chunks_exact_mut(w * 4)
            .enumerate()
            .for_each(|(y, row)| self.render_row(y as u32, time, row));

        Ok(FrameRGBA {
            width: self.width,
            height: self.height,
            data,
        })
    }

    fn render_row(&self, y: u32, time: (f64, f64), row: &mut [u8]) {
        for x in 0..self.width {
            let (mut dx, mut dy) = field::raw_displacement(&self.cfg, time, f64::from(x), f64::from(y));

            if self.cfg.edge_strength > 0.0 {
                let gradient = self.alpha_gradient(x, y);
                let mask = field::edge_mask(gradient, self.cfg.edge_threshold);
                let scale = field::lerp(1.0, mask, self.cfg.edge_strength);
                dx *= scale;
                dy *= scale;
            }

            let sample = self.sample_bilinear(f64::from(x) + dx, f64::from(y) + dy);
            let out = match self.cfg.background {
                Background::Transparent => sample,
                Background::Opaque { color } => composite_over(sample, color),
            };
            let o = x as usize * 4;
            row[o..o + 4].copy_from_slice(&out);
        }
    }

    /// Magnitude of the source alpha gradient at (x, y), sampled one texel
    /// out in each cardinal direction with clamp-to-edge semantics.
    fn alpha_gradient(&self, x: u32, y: u32) -> f64 {
        let a = |x: i64, y: i64| -> f64 {
            let xc = x.clamp(0, i64::from(self.width) - 1) as usize;
            let yc = y.clamp(0, i64::from(self.height) - 1) as usize;
            f64::from(self.alpha[yc * self.width as usize + xc])
        };
        let x = i64::from(x);
        let y = i64::from(y);
        let gx = a(x + 1, y) - a(x - 1, y);
        let gy = a(x, y + 1) - a(x, y - 1);
        (gx * gx + gy * gy).sqrt()
    }

    /// Bilinear sample of the padded texture at a source-space coordinate.
    /// Coordinates beyond the padding resolve to transparent texels.
    fn sample_bilinear(&self, sx: f64, sy: f64) -> [u8; 4] {
        let px = sx + f64::from(self.pad);
        let py = sy + f64::from(self.pad);
        let x0 = px.floor();
        let y0 = py.floor();
        let fx = px - x0;
        let fy = py - y0;

        let fetch = |ix: i64, iy: i64| -> [f64; 4] {
            if ix < 0
                || iy < 0
                || ix >= i64::from(self.padded_width)
                || iy >= i64::from(self.padded_height)
            {
                return [0.0; 4];
            }
            let idx = (iy as usize * self.padded_width as usize + ix as usize) * 4;
            let px = &self.texture[idx..idx + 4];
            [
                f64::from(px[0]),
                f64::from(px[1]),
                f64::from(px[2]),
                f64::from(px[3]),
            ]
        };

        let ix = x0 as i64;
        let iy = y0 as i64;
        let c00 = fetch(ix, iy);
        let c10 = fetch(ix + 1, iy);
        let c01 = fetch(ix, iy + 1);
        let c11 = fetch(ix + 1, iy + 1);

        let mut out = [0u8; 4];
        for c in 0..4 {
            let top = field::lerp(c00[c], c10[c], fx);
            let bottom = field::lerp(c01[c], c11[c], fx);
            out[c] = field::lerp(top, bottom, fy).round().clamp(0.0, 255.0) as u8;
        }
        out
    }
}

/// Straight-alpha "source over" of a sampled pixel onto a solid background.
fn composite_over(src: [u8; 4], bg: crate::foundation::core::Rgba8) -> [u8; 4] {
    let sa = f64::from(src[3]) / 255.0;
    let ba = f64::from(bg.a) / 255.0;
    let out_a = sa + ba * (1.0 - sa);
    let blend = |s: u8, b: u8| -> u8 {
        if out_a <= 0.0 {
            return 0;
        }
        let s = f64::from(s) / 255.0;
        let b = f64::from(b) / 255.0;
        let v = (s * sa + b * ba * (1.0 - sa)) / out_a;
        (v * 255.0).round().clamp(0.0, 255.0) as u8
    };
    [
        blend(src[0], bg.r),
        blend(src[1], bg.g),
        blend(src[2], bg.b),
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ]
}
