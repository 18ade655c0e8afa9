//! Engine context: owns the render surface, runs the live preview loop, and
//! schedules deterministic exports.
//!
//! There is no process-wide singleton: callers construct an [`Engine`], pass
//! it around explicitly, and tear it down when done. The live loop and the
//! export scheduler are mutually exclusive by construction — exports pause
//! the loop on entry and a drop guard resumes it on every exit path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::encode::sink::{FrameSink, SinkConfig};
use crate::field::{Background, ConfigUpdate, DisplacementConfig};
use crate::foundation::core::{Bitmap, FrameIndex, FrameRGBA};
use crate::foundation::error::{WiggleError, WiggleResult};
use crate::surface::RenderSurface;

/// Engine construction options.
#[derive(Clone, Copy, Debug)]
pub struct EngineOpts {
    /// Live loop tick rate, renders per second.
    pub refresh_hz: f64,
    /// Run the live preview loop at all. Disable for batch-only use.
    pub live_preview: bool,
}

impl Default for EngineOpts {
    fn default() -> Self {
        Self {
            refresh_hz: 60.0,
            live_preview: true,
        }
    }
}

/// Result of one export run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExportStats {
    /// Frames requested.
    pub frames_total: u64,
    /// Frames rendered and accepted by the sink.
    pub frames_encoded: u64,
    /// Whether the sink had to drop the requested alpha support.
    pub alpha_degraded: bool,
}

struct State {
    surface: Option<RenderSurface>,
    config: DisplacementConfig,
    latest: Option<FrameRGBA>,
}

struct Shared {
    state: Mutex<State>,
    paused: AtomicBool,
    shutdown: AtomicBool,
    exporting: AtomicBool,
    destroyed: AtomicBool,
}

/// Displacement rendering engine with a live preview loop and a frame-exact
/// export scheduler. See the module docs for the concurrency contract.
pub struct Engine {
    shared: Arc<Shared>,
    live: Option<JoinHandle<()>>,
    epoch: Instant,
}

impl Engine {
    /// Create an engine with default options.
    pub fn new(config: DisplacementConfig) -> WiggleResult<Self> {
        Self::with_opts(config, EngineOpts::default())
    }

    /// Create an engine with explicit options.
    pub fn with_opts(config: DisplacementConfig, opts: EngineOpts) -> WiggleResult<Self> {
        config.validate()?;
        if !opts.refresh_hz.is_finite() || opts.refresh_hz <= 0.0 {
            return Err(WiggleError::validation("refresh_hz must be finite and > 0"));
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                surface: None,
                config,
                latest: None,
            }),
            paused: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            exporting: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        });
        let epoch = Instant::now();

        let live = if opts.live_preview {
            let shared = Arc::clone(&shared);
            let tick = Duration::from_secs_f64(1.0 / opts.refresh_hz);
            Some(std::thread::spawn(move || {
                live_loop(&shared, epoch, tick);
            }))
        } else {
            None
        };

        Ok(Self {
            shared,
            live,
            epoch,
        })
    }

    fn check_alive(&self) -> WiggleResult<()> {
        if self.shared.destroyed.load(Ordering::SeqCst) {
            return Err(WiggleError::engine_destroyed(
                "engine has been torn down; create a new one",
            ));
        }
        Ok(())
    }

    fn lock_state(&self) -> WiggleResult<MutexGuard<'_, State>> {
        self.shared
            .state
            .lock()
            .map_err(|_| WiggleError::render_unavailable("engine state lock poisoned"))
    }

    /// Load a decoded source bitmap, replacing any previously bound one.
    ///
    /// All render state derived from the previous bitmap is destroyed.
    pub fn load_bitmap(&self, bitmap: &Bitmap) -> WiggleResult<()> {
        self.check_alive()?;
        let mut state = self.lock_state()?;
        match state.surface.as_mut() {
            Some(surface) => surface.load_bitmap(bitmap)?,
            None => {
                let surface = RenderSurface::new(bitmap, &state.config)?;
                state.surface = Some(surface);
            }
        }
        state.latest = None;
        Ok(())
    }

    /// Apply a partial configuration update to the engine's own copy.
    pub fn update_config(&self, update: &ConfigUpdate) -> WiggleResult<()> {
        self.check_alive()?;
        let mut state = self.lock_state()?;
        state.config = update.apply(&state.config)?;
        if let Some(surface) = state.surface.as_mut() {
            surface.update_config(update)?;
        }
        Ok(())
    }

    /// Switch the background compositing mode.
    pub fn set_background(&self, background: Background) -> WiggleResult<()> {
        self.check_alive()?;
        let mut state = self.lock_state()?;
        state.config.background = background;
        if let Some(surface) = state.surface.as_mut() {
            surface.set_background(background);
        }
        Ok(())
    }

    /// Snapshot of the engine's current configuration.
    pub fn config(&self) -> WiggleResult<DisplacementConfig> {
        self.check_alive()?;
        Ok(self.lock_state()?.config.clone())
    }

    /// Render one frame at an explicit loop phase.
    pub fn render_at(&self, phase: f64) -> WiggleResult<FrameRGBA> {
        self.check_alive()?;
        let state = self.lock_state()?;
        let surface = state
            .surface
            .as_ref()
            .ok_or_else(|| WiggleError::validation("no bitmap loaded"))?;
        surface.render_at(phase)
    }

    /// The most recent frame produced by the live loop, if any.
    pub fn latest_frame(&self) -> WiggleResult<Option<FrameRGBA>> {
        self.check_alive()?;
        Ok(self.lock_state()?.latest.clone())
    }

    /// Diagnostic: whether the live loop is currently suspended.
    pub fn live_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Export `total_frames` frames in order into `sink`.
    ///
    /// Frame `i` is rendered at the export phase `i / total_frames`, so the
    /// output is independent of wall time and identical across runs. The
    /// live loop is suspended on entry and resumed unconditionally on exit,
    /// success or failure. Only one export may run at a time; a concurrent
    /// request fails with [`WiggleError::ExportBusy`].
    pub fn export_frames(
        &self,
        total_frames: u64,
        sink: &mut dyn FrameSink,
    ) -> WiggleResult<ExportStats> {
        self.check_alive()?;
        if total_frames == 0 {
            return Err(WiggleError::validation("total_frames must be >= 1"));
        }
        if self
            .shared
            .exporting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(WiggleError::ExportBusy);
        }
        // Resumes the live loop and clears the exporting flag on every exit
        // path, including early returns and panics in the sink.
        let _guard = ExportGuard::engage(&self.shared);

        // Taking the state lock synchronizes with any in-flight live tick.
        let state = self.lock_state()?;
        let surface = state
            .surface
            .as_ref()
            .ok_or_else(|| WiggleError::validation("no bitmap loaded"))?;
        let config = surface.config();
        let clock = config.phase_clock()?;
        let alpha = matches!(config.background, Background::Transparent);

        tracing::info!(
            total_frames,
            fps = config.fps,
            loop_secs = config.loop_duration_secs,
            "export start"
        );

        sink.begin(SinkConfig {
            width: surface.width(),
            height: surface.height(),
            fps: config.fps,
            alpha,
        })?;

        for i in 0..total_frames {
            let phase = clock.export(i, total_frames);
            let frame = surface.render_at(phase).map_err(|e| extraction_failed(i, e))?;
            sink.push_frame(FrameIndex(i), &frame)
                .map_err(|e| extraction_failed(i, e))?;
        }

        sink.end()?;

        let stats = ExportStats {
            frames_total: total_frames,
            frames_encoded: total_frames,
            alpha_degraded: sink.alpha_degraded(),
        };
        tracing::info!(?stats, "export done");
        Ok(stats)
    }

    /// Tear the engine down: stop the live loop, release the surface, and
    /// make every subsequent call fail with `EngineDestroyed`.
    pub fn teardown(&mut self) {
        if self.shared.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.live.take() {
            let _ = handle.join();
        }
        if let Ok(mut state) = self.shared.state.lock() {
            state.surface = None;
            state.latest = None;
        }
        tracing::debug!("engine torn down");
    }

    /// Seconds since the engine was created; drives the live phase.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn extraction_failed(frames_completed: u64, source: WiggleError) -> WiggleError {
    WiggleError::FrameExtractionFailed {
        frames_completed,
        source: Box::new(source),
    }
}

fn live_loop(shared: &Shared, epoch: Instant, tick: Duration) {
    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            return;
        }
        if !shared.paused.load(Ordering::SeqCst) {
            let Ok(mut state) = shared.state.lock() else {
                return;
            };
            if let Some(surface) = state.surface.as_ref() {
                if let Ok(clock) = surface.config().phase_clock() {
                    let phase = clock.live(epoch.elapsed().as_secs_f64());
                    if let Ok(frame) = surface.render_at(phase) {
                        state.latest = Some(frame);
                    }
                }
            }
        }
        std::thread::sleep(tick);
    }
}

struct ExportGuard<'a> {
    shared: &'a Shared,
}

impl<'a> ExportGuard<'a> {
    fn engage(shared: &'a Shared) -> Self {
        shared.paused.store(true, Ordering::SeqCst);
        Self { shared }
    }
}

impl Drop for ExportGuard<'_> {
    fn drop(&mut self) {
        self.shared.paused.store(false, Ordering::SeqCst);
        self.shared.exporting.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::sink::InMemorySink;
    use crate::foundation::core::Rgba8;

    fn test_engine() -> Engine {
        let engine = Engine::with_opts(
            DisplacementConfig::default(),
            EngineOpts {
                refresh_hz: 120.0,
                live_preview: false,
            },
        )
        .unwrap();
        let bmp = Bitmap::solid(16, 16, Rgba8 { r: 90, g: 60, b: 30, a: 255 }).unwrap();
        engine.load_bitmap(&bmp).unwrap();
        engine
    }

    #[test]
    fn render_without_bitmap_fails_validation() {
        let engine = Engine::with_opts(
            DisplacementConfig::default(),
            EngineOpts {
                refresh_hz: 60.0,
                live_preview: false,
            },
        )
        .unwrap();
        assert!(matches!(
            engine.render_at(0.0).unwrap_err(),
            WiggleError::Validation(_)
        ));
    }

    #[test]
    fn export_pushes_every_frame_in_order() {
        let engine = test_engine();
        let mut sink = InMemorySink::new();
        let stats = engine.export_frames(5, &mut sink).unwrap();
        assert_eq!(stats.frames_total, 5);
        assert_eq!(stats.frames_encoded, 5);
        assert_eq!(sink.frames.len(), 5);
        for (i, (idx, _)) in sink.frames.iter().enumerate() {
            assert_eq!(idx.0, i as u64);
        }
    }

    #[test]
    fn export_zero_frames_is_rejected() {
        let engine = test_engine();
        let mut sink = InMemorySink::new();
        assert!(engine.export_frames(0, &mut sink).is_err());
    }

    #[test]
    fn export_resumes_live_after_sink_failure() {
        struct FailingSink {
            fail_at: u64,
        }
        impl FrameSink for FailingSink {
            fn begin(&mut self, _cfg: SinkConfig) -> WiggleResult<()> {
                Ok(())
            }
            fn push_frame(&mut self, idx: FrameIndex, _frame: &FrameRGBA) -> WiggleResult<()> {
                if idx.0 >= self.fail_at {
                    return Err(WiggleError::encoding("simulated sink failure"));
                }
                Ok(())
            }
            fn end(&mut self) -> WiggleResult<()> {
                Ok(())
            }
        }

        let engine = test_engine();
        let mut sink = FailingSink { fail_at: 3 };
        let err = engine.export_frames(10, &mut sink).unwrap_err();
        match err {
            WiggleError::FrameExtractionFailed {
                frames_completed, ..
            } => assert_eq!(frames_completed, 3),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!engine.live_paused());
    }

    #[test]
    fn concurrent_export_is_busy() {
        struct SlowSink;
        impl FrameSink for SlowSink {
            fn begin(&mut self, _cfg: SinkConfig) -> WiggleResult<()> {
                Ok(())
            }
            fn push_frame(&mut self, _idx: FrameIndex, _frame: &FrameRGBA) -> WiggleResult<()> {
                std::thread::sleep(Duration::from_millis(30));
                Ok(())
            }
            fn end(&mut self) -> WiggleResult<()> {
                Ok(())
            }
        }

        let engine = test_engine();
        std::thread::scope(|scope| {
            let first = scope.spawn(|| {
                let mut sink = SlowSink;
                engine.export_frames(20, &mut sink)
            });

            // Wait until the first export has actually claimed the slot.
            let deadline = Instant::now() + Duration::from_secs(2);
            while !engine.live_paused() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(1));
            }
            assert!(engine.live_paused(), "first export never started");

            let mut sink = InMemorySink::new();
            let second = engine.export_frames(5, &mut sink);
            assert!(matches!(second.unwrap_err(), WiggleError::ExportBusy));

            first.join().unwrap().unwrap();
        });
        assert!(!engine.live_paused());
    }

    #[test]
    fn torn_down_engine_rejects_all_calls() {
        let mut engine = test_engine();
        engine.teardown();
        assert!(matches!(
            engine.render_at(0.0).unwrap_err(),
            WiggleError::EngineDestroyed(_)
        ));
        assert!(matches!(
            engine.config().unwrap_err(),
            WiggleError::EngineDestroyed(_)
        ));
        let mut sink = InMemorySink::new();
        assert!(matches!(
            engine.export_frames(1, &mut sink).unwrap_err(),
            WiggleError::EngineDestroyed(_)
        ));
        let bmp = Bitmap::solid(4, 4, Rgba8::WHITE).unwrap();
        assert!(matches!(
            engine.load_bitmap(&bmp).unwrap_err(),
            WiggleError::EngineDestroyed(_)
        ));
    }

    #[test]
    fn live_loop_populates_latest_frame() {
        let engine = Engine::with_opts(
            DisplacementConfig::default(),
            EngineOpts {
                refresh_hz: 200.0,
                live_preview: true,
            },
        )
        .unwrap();
        let bmp = Bitmap::solid(8, 8, Rgba8::WHITE).unwrap();
        engine.load_bitmap(&bmp).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if engine.latest_frame().unwrap().is_some() {
                break;
            }
            assert!(Instant::now() < deadline, "live loop produced no frame");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn update_config_changes_subsequent_renders() {
        let engine = test_engine();
        let a = engine.render_at(0.25).unwrap();
        engine
            .update_config(&ConfigUpdate {
                seed: Some(99.0),
                ..Default::default()
            })
            .unwrap();
        let b = engine.render_at(0.25).unwrap();
        assert_ne!(a.data, b.data);
    }
}
