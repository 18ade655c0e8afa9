//! Phase derivation for both rendering modes.
//!
//! The live loop and the export scheduler disagree about where time comes
//! from (wall clock vs. frame index) but must land on identical phase values
//! for matching moments. Both derivations live here so the posterize
//! quantization can never drift between them.

use crate::foundation::error::{WiggleError, WiggleResult};

/// Converts elapsed wall time or a frame index into the unit loop phase.
///
/// Phase is a scalar in [0, 1). Downstream noise math only ever consumes it
/// through [`time_vector`], which is what makes the loop boundary seamless.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhaseClock {
    loop_duration_secs: f64,
    /// Posterize steps per second; 0.0 disables quantization.
    posterize: f64,
}

impl PhaseClock {
    /// Create a clock for one loop duration and posterize setting.
    pub fn new(loop_duration_secs: f64, posterize: f64) -> WiggleResult<Self> {
        if !loop_duration_secs.is_finite() || loop_duration_secs <= 0.0 {
            return Err(WiggleError::validation(
                "loop duration must be finite and > 0",
            ));
        }
        if !posterize.is_finite() || posterize < 0.0 {
            return Err(WiggleError::validation("posterize must be finite and >= 0"));
        }
        Ok(Self {
            loop_duration_secs,
            posterize,
        })
    }

    /// Phase for live mode: elapsed wall time modulo the loop duration.
    pub fn live(&self, elapsed_secs: f64) -> f64 {
        let raw = (elapsed_secs / self.loop_duration_secs).rem_euclid(1.0);
        self.quantize(raw)
    }

    /// Phase for export mode: `frame_index / total_frames`.
    pub fn export(&self, frame_index: u64, total_frames: u64) -> f64 {
        let total = total_frames.max(1);
        let raw = (frame_index % total) as f64 / total as f64;
        self.quantize(raw)
    }

    fn quantize(&self, raw: f64) -> f64 {
        if self.posterize <= 0.0 {
            return raw;
        }
        let steps = self.posterize * self.loop_duration_secs;
        (raw * steps).floor() / steps
    }
}

/// The point on the unit circle at `2π * phase`: the only form of time the
/// noise math consumes.
///
/// The phase is wrapped into [0, 1) before the trig, so phase 0.0 and phase
/// 1.0 produce bit-identical vectors and the loop has no seam.
pub fn time_vector(phase: f64) -> (f64, f64) {
    let p = phase.rem_euclid(1.0);
    let angle = std::f64::consts::TAU * p;
    (angle.cos(), angle.sin())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_vector_wraps_exactly() {
        assert_eq!(time_vector(0.0), time_vector(1.0));
        assert_eq!(time_vector(0.25), time_vector(1.25));
        assert_eq!(time_vector(0.0), (1.0, 0.0));
    }

    #[test]
    fn live_phase_wraps_negative_and_large_times() {
        let clock = PhaseClock::new(3.0, 0.0).unwrap();
        let p = clock.live(7.5); // 2.5 loops
        assert!((p - 0.5).abs() < 1e-12);
        let p = clock.live(-1.5);
        assert!((0.0..1.0).contains(&p));
    }

    #[test]
    fn export_phase_is_index_over_total() {
        let clock = PhaseClock::new(3.0, 0.0).unwrap();
        assert_eq!(clock.export(0, 72), 0.0);
        assert_eq!(clock.export(18, 72), 0.25);
        // A hypothetical frame N wraps back to phase 0.
        assert_eq!(clock.export(72, 72), 0.0);
    }

    #[test]
    fn posterize_zero_passes_phase_through() {
        let clock = PhaseClock::new(4.0, 0.0).unwrap();
        assert_eq!(clock.export(7, 96), 7.0 / 96.0);
    }

    #[test]
    fn posterize_collapses_phases_into_steps() {
        // posterize 4 steps/s over a 3 s loop = 12 steps per loop.
        let clock = PhaseClock::new(3.0, 4.0).unwrap();
        let mut distinct = std::collections::BTreeSet::new();
        for i in 0..72 {
            let p = clock.export(i, 72);
            distinct.insert(p.to_bits());
        }
        assert_eq!(distinct.len(), 12);
    }

    #[test]
    fn live_and_export_posterized_phases_agree_within_one_step() {
        let loop_duration = 3.0;
        let fps = 24.0;
        let posterize = 4.0;
        let clock = PhaseClock::new(loop_duration, posterize).unwrap();
        let n = (loop_duration * fps).round() as u64;
        let step = 1.0 / (posterize * loop_duration);
        for i in 0..n {
            let export = clock.export(i, n);
            let live = clock.live(i as f64 / fps);
            assert!(
                (export - live).abs() <= step + 1e-12,
                "frame {i}: export {export} vs live {live}"
            );
        }
    }

    #[test]
    fn live_and_export_unposterized_phases_agree_closely() {
        let clock = PhaseClock::new(3.0, 0.0).unwrap();
        for i in 0..72u64 {
            let export = clock.export(i, 72);
            let live = clock.live(i as f64 / 24.0);
            assert!((export - live).abs() < 1e-12);
        }
    }
}
