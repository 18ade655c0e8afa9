//! Displacement field: parameter bundle and the per-pixel vector math.
//!
//! [`raw_displacement`] is a pure function of (config, time vector, pixel);
//! the render surface applies it per pixel and attenuates by the alpha-edge
//! mask. Nothing in here touches pixels or clocks.

use crate::clock::PhaseClock;
use crate::foundation::core::Rgba8;
use crate::foundation::error::{WiggleError, WiggleResult};
use crate::noise::{self, MAX_OCTAVES};

/// Width of the smoothstep transition band above the edge threshold. Fixed by
/// the output contract, not configurable.
pub(crate) const EDGE_BAND: f64 = 0.15;

/// Background compositing mode for rendered frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Background {
    /// Clear to zero alpha; output keeps the displaced layer's alpha.
    Transparent,
    /// Composite the displaced layer over a solid color.
    Opaque {
        /// Background fill color.
        color: Rgba8,
    },
}

/// Immutable-per-frame parameter bundle for the displacement effect.
///
/// The engine holds its own copy and mutates only that copy through
/// [`ConfigUpdate`]; callers keep ownership of theirs.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DisplacementConfig {
    /// Displacement magnitude in pixels, 0–12.
    pub amount_px: f64,
    /// Noise feature size in pixels, 2–80.
    pub size: f64,
    /// Fractal octave count, 1–6.
    pub octaves: u32,
    /// Time-path radius in noise space, 0–3.
    pub speed: f64,
    /// Offset into the noise domain; any finite value.
    pub seed: f64,
    /// Edge-mask strength: 0 = uniform displacement, 1 = edge-only, 0–1.
    pub edge_strength: f64,
    /// Alpha-gradient cutoff for edge detection, 0–1.
    pub edge_threshold: f64,
    /// Loop length in seconds, 2–6.
    pub loop_duration_secs: f64,
    /// Output frame rate, frames per second.
    pub fps: f64,
    /// Posterize steps per second, 0–24; 0 disables time quantization.
    pub posterize: f64,
    /// Background compositing mode.
    pub background: Background,
}

impl Default for DisplacementConfig {
    fn default() -> Self {
        Self {
            amount_px: 4.0,
            size: 20.0,
            octaves: 3,
            speed: 1.0,
            seed: 0.0,
            edge_strength: 0.0,
            edge_threshold: 0.1,
            loop_duration_secs: 3.0,
            fps: 24.0,
            posterize: 0.0,
            background: Background::Transparent,
        }
    }
}

impl DisplacementConfig {
    /// Validate every parameter against its documented range.
    pub fn validate(&self) -> WiggleResult<()> {
        check_range("amount_px", self.amount_px, 0.0, 12.0)?;
        check_range("size", self.size, 2.0, 80.0)?;
        if self.octaves < 1 || self.octaves > 6 {
            return Err(WiggleError::validation(format!(
                "octaves must be in 1..=6, got {}",
                self.octaves
            )));
        }
        // The fractal evaluator tops out at MAX_OCTAVES; if the accepted
        // range ever widens past it, this must stay a hard rejection rather
        // than a silent cap.
        if self.octaves > MAX_OCTAVES {
            return Err(WiggleError::validation(format!(
                "octaves {} exceeds the implementation ceiling of {MAX_OCTAVES}",
                self.octaves
            )));
        }
        check_range("speed", self.speed, 0.0, 3.0)?;
        if !self.seed.is_finite() {
            return Err(WiggleError::validation("seed must be finite"));
        }
        check_range("edge_strength", self.edge_strength, 0.0, 1.0)?;
        check_range("edge_threshold", self.edge_threshold, 0.0, 1.0)?;
        check_range("loop_duration_secs", self.loop_duration_secs, 2.0, 6.0)?;
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(WiggleError::validation("fps must be finite and > 0"));
        }
        check_range("posterize", self.posterize, 0.0, 24.0)?;
        Ok(())
    }

    /// The phase clock this config describes.
    pub fn phase_clock(&self) -> WiggleResult<PhaseClock> {
        PhaseClock::new(self.loop_duration_secs, self.posterize)
    }

    /// Total export frame count: `round(loop_duration * fps)`.
    pub fn export_frame_count(&self) -> u64 {
        (self.loop_duration_secs * self.fps).round().max(1.0) as u64
    }
}

fn check_range(name: &str, v: f64, lo: f64, hi: f64) -> WiggleResult<()> {
    if !v.is_finite() || v < lo || v > hi {
        return Err(WiggleError::validation(format!(
            "{name} must be in {lo}..={hi}, got {v}"
        )));
    }
    Ok(())
}

/// Partial config update: only set fields are applied.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ConfigUpdate {
    /// New displacement magnitude, if set.
    pub amount_px: Option<f64>,
    /// New noise feature size, if set.
    pub size: Option<f64>,
    /// New octave count, if set.
    pub octaves: Option<u32>,
    /// New time-path radius, if set.
    pub speed: Option<f64>,
    /// New noise-domain offset, if set.
    pub seed: Option<f64>,
    /// New edge-mask strength, if set.
    pub edge_strength: Option<f64>,
    /// New edge threshold, if set.
    pub edge_threshold: Option<f64>,
    /// New loop duration, if set.
    pub loop_duration_secs: Option<f64>,
    /// New frame rate, if set.
    pub fps: Option<f64>,
    /// New posterize rate, if set.
    pub posterize: Option<f64>,
    /// New background mode, if set.
    pub background: Option<Background>,
}

impl ConfigUpdate {
    /// Apply the set fields onto `base`, returning the validated result.
    pub fn apply(&self, base: &DisplacementConfig) -> WiggleResult<DisplacementConfig> {
        let mut cfg = base.clone();
        if let Some(v) = self.amount_px {
            cfg.amount_px = v;
        }
        if let Some(v) = self.size {
            cfg.size = v;
        }
        if let Some(v) = self.octaves {
            cfg.octaves = v;
        }
        if let Some(v) = self.speed {
            cfg.speed = v;
        }
        if let Some(v) = self.seed {
            cfg.seed = v;
        }
        if let Some(v) = self.edge_strength {
            cfg.edge_strength = v;
        }
        if let Some(v) = self.edge_threshold {
            cfg.edge_threshold = v;
        }
        if let Some(v) = self.loop_duration_secs {
            cfg.loop_duration_secs = v;
        }
        if let Some(v) = self.fps {
            cfg.fps = v;
        }
        if let Some(v) = self.posterize {
            cfg.posterize = v;
        }
        if let Some(v) = self.background {
            cfg.background = v;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Displacement vector in pixels for one output pixel, before edge-mask
/// attenuation.
///
/// `time` is the unit-circle time vector for the current phase; `px`/`py` is
/// the pixel coordinate in source space.
pub(crate) fn raw_displacement(
    cfg: &DisplacementConfig,
    time: (f64, f64),
    px: f64,
    py: f64,
) -> (f64, f64) {
    let tx = time.0 * cfg.speed;
    let ty = time.1 * cfg.speed;
    let nx = px / cfg.size + tx + cfg.seed;
    let ny = py / cfg.size + ty + cfg.seed;
    let dx = noise::fbm(nx, ny, cfg.octaves);
    let dy = noise::fbm(
        nx + noise::CHANNEL_OFFSET.0,
        ny + noise::CHANNEL_OFFSET.1,
        cfg.octaves,
    );
    (dx * cfg.amount_px, dy * cfg.amount_px)
}

/// Edge-mask weight for an alpha-gradient magnitude: 0 well inside flat alpha
/// regions, 1 on strong transparency boundaries.
pub(crate) fn edge_mask(gradient: f64, threshold: f64) -> f64 {
    smoothstep(threshold, threshold + EDGE_BAND, gradient)
}

pub(crate) fn smoothstep(edge0: f64, edge1: f64, x: f64) -> f64 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

pub(crate) fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::time_vector;

    #[test]
    fn default_config_is_valid() {
        DisplacementConfig::default().validate().unwrap();
    }

    #[test]
    fn out_of_range_parameters_are_rejected() {
        let cases: &[fn(&mut DisplacementConfig)] = &[
            |c| c.amount_px = 12.5,
            |c| c.amount_px = -0.1,
            |c| c.size = 1.0,
            |c| c.size = 81.0,
            |c| c.octaves = 0,
            |c| c.octaves = 7,
            |c| c.speed = 3.5,
            |c| c.seed = f64::NAN,
            |c| c.edge_strength = 1.2,
            |c| c.edge_threshold = -0.5,
            |c| c.loop_duration_secs = 1.0,
            |c| c.loop_duration_secs = 7.0,
            |c| c.fps = 0.0,
            |c| c.posterize = 25.0,
        ];
        for mutate in cases {
            let mut cfg = DisplacementConfig::default();
            mutate(&mut cfg);
            assert!(cfg.validate().is_err(), "accepted invalid {cfg:?}");
        }
    }

    #[test]
    fn export_frame_count_rounds() {
        let mut cfg = DisplacementConfig {
            loop_duration_secs: 3.0,
            fps: 24.0,
            ..Default::default()
        };
        assert_eq!(cfg.export_frame_count(), 72);
        cfg.fps = 29.97;
        assert_eq!(cfg.export_frame_count(), 90);
    }

    #[test]
    fn update_applies_only_set_fields() {
        let base = DisplacementConfig::default();
        let update = ConfigUpdate {
            amount_px: Some(8.0),
            posterize: Some(6.0),
            ..Default::default()
        };
        let next = update.apply(&base).unwrap();
        assert_eq!(next.amount_px, 8.0);
        assert_eq!(next.posterize, 6.0);
        assert_eq!(next.size, base.size);
        assert_eq!(next.octaves, base.octaves);
    }

    #[test]
    fn update_rejects_invalid_result() {
        let update = ConfigUpdate {
            octaves: Some(9),
            ..Default::default()
        };
        assert!(update.apply(&DisplacementConfig::default()).is_err());
    }

    #[test]
    fn displacement_is_seamless_across_the_loop_boundary() {
        let cfg = DisplacementConfig::default();
        for &(px, py) in &[(0.0, 0.0), (17.0, 33.0), (99.0, 1.0)] {
            let a = raw_displacement(&cfg, time_vector(0.0), px, py);
            let b = raw_displacement(&cfg, time_vector(1.0), px, py);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn zero_amount_displaces_nothing() {
        let cfg = DisplacementConfig {
            amount_px: 0.0,
            ..Default::default()
        };
        let (dx, dy) = raw_displacement(&cfg, time_vector(0.37), 12.0, 44.0);
        assert_eq!((dx, dy), (0.0, 0.0));
    }

    #[test]
    fn seed_shifts_the_field() {
        let a = DisplacementConfig::default();
        let b = DisplacementConfig {
            seed: 11.0,
            ..Default::default()
        };
        let t = time_vector(0.2);
        assert_ne!(raw_displacement(&a, t, 5.0, 5.0), raw_displacement(&b, t, 5.0, 5.0));
    }

    #[test]
    fn edge_mask_endpoints() {
        assert_eq!(edge_mask(0.0, 0.2), 0.0);
        assert_eq!(edge_mask(0.2, 0.2), 0.0);
        assert_eq!(edge_mask(0.2 + EDGE_BAND, 0.2), 1.0);
        assert_eq!(edge_mask(1.0, 0.2), 1.0);
        let mid = edge_mask(0.2 + EDGE_BAND / 2.0, 0.2);
        assert!((mid - 0.5).abs() < 1e-12);
    }
}
