//! Hash-gradient 2D noise and fractal summation.
//!
//! Everything here is a pure function of its inputs. Live preview and offline
//! export both funnel through these, so the math must stay bit-stable: no
//! lookup tables seeded at runtime, no platform-dependent intrinsics.

/// Implementation ceiling for fractal octave evaluation. Configured octave
/// counts above this are rejected at validation time, never silently capped.
pub const MAX_OCTAVES: u32 = 8;

/// Fixed lattice offset separating the X and Y displacement channels.
///
/// Two `fbm` evaluations offset by this constant are decorrelated enough to
/// act as independent displacement axes. The value is part of the output
/// contract: changing it changes every rendered frame.
pub const CHANNEL_OFFSET: (f64, f64) = (43.0, 17.0);

/// SplitMix64 finalizer. Same mixing constants as the engine's seeded RNG
/// lineage; avalanches single-bit input changes across the whole word.
fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn lattice_hash(ix: i64, iy: i64) -> u64 {
    let x = (ix as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let y = (iy as u64).wrapping_mul(0xD6E8_FEB8_6659_FD93);
    mix64(x ^ y.rotate_left(31))
}

/// Unit gradient at an integer lattice point, derived from the hash as a
/// continuous angle rather than one of a small direction set, which keeps the
/// field visually isotropic.
fn gradient(ix: i64, iy: i64) -> (f64, f64) {
    let h = lattice_hash(ix, iy);
    // 53 high bits -> [0, 1) -> angle in [0, tau).
    let unit = ((h >> 11) as f64) * (1.0 / ((1u64 << 53) as f64));
    let angle = unit * std::f64::consts::TAU;
    (angle.cos(), angle.sin())
}

/// Quintic fade with zero first and second derivatives at the cell borders.
fn fade(t: f64) -> f64 {
    t * t * t * (t * (t * 6.0 - 15.0) + 10.0)
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// 2D gradient noise.
///
/// Deterministic and continuous; returns approximately [-1, 1] and exactly
/// 0.0 at integer lattice points.
pub fn noise2(x: f64, y: f64) -> f64 {
    let x0 = x.floor();
    let y0 = y.floor();
    let ix = x0 as i64;
    let iy = y0 as i64;
    let fx = x - x0;
    let fy = y - y0;

    let dot = |gx: i64, gy: i64, dx: f64, dy: f64| -> f64 {
        let (gvx, gvy) = gradient(gx, gy);
        gvx * dx + gvy * dy
    };

    let n00 = dot(ix, iy, fx, fy);
    let n10 = dot(ix + 1, iy, fx - 1.0, fy);
    let n01 = dot(ix, iy + 1, fx, fy - 1.0);
    let n11 = dot(ix + 1, iy + 1, fx - 1.0, fy - 1.0);

    let u = fade(fx);
    let v = fade(fy);
    let nx0 = lerp(n00, n10, u);
    let nx1 = lerp(n01, n11, u);

    // Unit-gradient Perlin peaks at sqrt(2)/2; rescale to roughly [-1, 1].
    lerp(nx0, nx1, v) * std::f64::consts::SQRT_2
}

/// Fractal Brownian motion: `octaves` layers of [`noise2`] at doubling
/// frequency and halving amplitude, starting at amplitude 0.5 and frequency
/// 1.0.
///
/// Octave counts above [`MAX_OCTAVES`] evaluate as `MAX_OCTAVES`; counts
/// below the ceiling are honored exactly. `octaves == 0` sums nothing and
/// returns 0.0.
pub fn fbm(x: f64, y: f64, octaves: u32) -> f64 {
    let octaves = octaves.min(MAX_OCTAVES);
    let mut sum = 0.0;
    let mut amp = 0.5;
    let mut freq = 1.0;
    for _ in 0..octaves {
        sum += amp * noise2(x * freq, y * freq);
        freq *= 2.0;
        amp *= 0.5;
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noise_is_deterministic() {
        for &(x, y) in &[(0.3, 0.7), (12.25, -4.75), (1000.5, 1000.5)] {
            assert_eq!(noise2(x, y), noise2(x, y));
        }
    }

    #[test]
    fn noise_is_zero_at_lattice_points() {
        for ix in -3i64..3 {
            for iy in -3i64..3 {
                assert_eq!(noise2(ix as f64, iy as f64), 0.0);
            }
        }
    }

    #[test]
    fn noise_stays_roughly_bounded() {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for i in 0..200 {
            for j in 0..200 {
                let v = noise2(i as f64 * 0.173 + 0.05, j as f64 * 0.131 + 0.05);
                min = min.min(v);
                max = max.max(v);
            }
        }
        assert!(min >= -1.0 - 1e-9, "min {min}");
        assert!(max <= 1.0 + 1e-9, "max {max}");
        // The field should actually use its range, not collapse near zero.
        assert!(max > 0.3 && min < -0.3);
    }

    #[test]
    fn noise_is_continuous() {
        let eps = 1e-6;
        for &(x, y) in &[(0.5, 0.5), (3.9999, 7.2), (-2.3, 4.8)] {
            let d = (noise2(x + eps, y) - noise2(x, y)).abs();
            assert!(d < 1e-4, "jump of {d} at ({x}, {y})");
        }
    }

    #[test]
    fn fbm_zero_octaves_is_zero() {
        assert_eq!(fbm(0.37, 5.11, 0), 0.0);
        assert_eq!(fbm(-41.0, 13.5, 0), 0.0);
    }

    #[test]
    fn fbm_octaves_layer_without_disturbing_the_base() {
        // Adding octave k contributes exactly amp_k * noise2(p * 2^k) on top
        // of the lower-octave sum.
        let (x, y) = (1.37, -0.42);
        for k in 1u32..MAX_OCTAVES {
            let base = fbm(x, y, k);
            let more = fbm(x, y, k + 1);
            let scale = 2f64.powi(k as i32);
            let expected = 0.5 * 0.5f64.powi(k as i32) * noise2(x * scale, y * scale);
            assert!((more - base - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn fbm_clamps_at_the_octave_ceiling() {
        let (x, y) = (0.91, 2.13);
        assert_eq!(fbm(x, y, MAX_OCTAVES), fbm(x, y, MAX_OCTAVES + 5));
    }

    #[test]
    fn channel_offset_decorrelates() {
        // Offset evaluations must not track the base channel.
        let mut same_sign = 0u32;
        let total = 500u32;
        for i in 0..total {
            let x = i as f64 * 0.217;
            let y = i as f64 * 0.193;
            let a = fbm(x, y, 3);
            let b = fbm(x + CHANNEL_OFFSET.0, y + CHANNEL_OFFSET.1, 3);
            if (a >= 0.0) == (b >= 0.0) {
                same_sign += 1;
            }
        }
        let ratio = same_sign as f64 / total as f64;
        assert!(ratio > 0.3 && ratio < 0.7, "sign agreement {ratio}");
    }
}
