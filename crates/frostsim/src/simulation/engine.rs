//! Simulation facade: lifecycle, backend selection and the per-frame driver.

#[cfg(feature = "wgpu")]
use std::sync::Arc;

use super::backend::{BackendKind, Capabilities, FrostBackend, TextureRef};
use super::clock::ActivityClock;
use super::cpu::CpuBackend;
use super::height::GridSize;
use super::kernel::WaveParams;
use super::raster::StimulusEvent;
use super::texture::NormalHeightTexture;
use crate::config::FrostConfig;
use crate::error::{FrostError, Result};
use crate::gestures::{ScreenMapping, ScreenStimulus};

#[cfg(feature = "wgpu")]
use super::wgpu_backend::{AccumulationBackend, GpuContext};

/// Lifecycle of a [`FrostSimulation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Created, never reset.
    Uninitialized,
    /// Sized by a reset, no tick run yet.
    Sized,
    /// At least one tick ran.
    Running,
    /// Accumulation path failed; running on the CPU for good.
    Degraded,
    /// Last reset failed; no field exists and every call is a no-op.
    Inert,
    /// Released by [`FrostSimulation::teardown`].
    TornDown,
}

impl LifecycleState {
    /// Whether a field exists.
    pub fn has_field(self) -> bool {
        matches!(
            self,
            LifecycleState::Sized | LifecycleState::Running | LifecycleState::Degraded
        )
    }
}

/// One frost surface covering a screen.
pub struct FrostSimulation {
    config: FrostConfig,
    state: LifecycleState,
    backend: Option<Box<dyn FrostBackend>>,
    clock: ActivityClock,
    mapping: Option<ScreenMapping>,
    /// Set on the first accumulation failure, never cleared.
    accumulation_disabled: bool,
    /// Handed out while no backend exists.
    placeholder: NormalHeightTexture,
    ticks: u64,
    #[cfg(feature = "wgpu")]
    gpu: Option<Arc<GpuContext>>,
}

impl FrostSimulation {
    /// Create an unsized simulation that runs on the CPU.
    pub fn new(config: FrostConfig) -> Result<Self> {
        config.validate()?;
        let clock = ActivityClock::new(config.activity.clone());

        Ok(Self {
            config,
            state: LifecycleState::Uninitialized,
            backend: None,
            clock,
            mapping: None,
            accumulation_disabled: false,
            placeholder: NormalHeightTexture::empty(),
            ticks: 0,
            #[cfg(feature = "wgpu")]
            gpu: None,
        })
    }

    /// Create an unsized simulation that may use the accumulation path.
    #[cfg(feature = "wgpu")]
    pub fn with_gpu(config: FrostConfig, gpu: Arc<GpuContext>) -> Result<Self> {
        let mut sim = Self::new(config)?;
        sim.gpu = Some(gpu);
        Ok(sim)
    }

    /// Discard any field and size a new one for the screen.
    ///
    /// On failure the simulation is left [`LifecycleState::Inert`].
    pub fn reset(
        &mut self,
        screen_width: u32,
        screen_height: u32,
        capabilities: Capabilities,
    ) -> Result<()> {
        self.release();
        self.clock.reset();
        self.mapping = None;
        self.ticks = 0;

        let created = GridSize::for_screen(screen_width, screen_height, self.config.grid.short_edge)
            .and_then(|size| Ok((size, self.create_backend(size, capabilities)?)));

        match created {
            Ok((size, backend)) => {
                tracing::info!(
                    "Frost simulation {}x{} for {}x{} screen on {}",
                    size.width,
                    size.height,
                    screen_width,
                    screen_height,
                    backend.kind()
                );
                self.mapping = Some(ScreenMapping::new(screen_width, screen_height, size));
                self.backend = Some(backend);
                self.state = if self.accumulation_disabled {
                    LifecycleState::Degraded
                } else {
                    LifecycleState::Sized
                };
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Frost simulation inert: {}", e);
                self.state = LifecycleState::Inert;
                Err(e)
            }
        }
    }

    /// Apply a stimulus in simulation coordinates.
    ///
    /// Visible stimuli keep the simulation awake. No-op without a field.
    pub fn inject(&mut self, event: &StimulusEvent) {
        let Some(backend) = self.backend.as_mut() else {
            tracing::trace!("Dropping {} stimulus: no field", event.primitive());
            return;
        };

        if let Err(e) = backend.rasterize(event) {
            self.handle_backend_failure(e);
            if let Some(fallback) = self.backend.as_mut() {
                if let Err(e) = fallback.rasterize(event) {
                    tracing::error!(
                        "Dropping {} stimulus after fallback: {}",
                        event.primitive(),
                        e
                    );
                }
            }
        }

        if event.is_visible() {
            self.clock.bump();
        }
    }

    /// Apply a stimulus in screen coordinates.
    pub fn inject_screen(&mut self, stimulus: &ScreenStimulus) -> Result<()> {
        let Some(mapping) = self.mapping else {
            return Ok(());
        };
        let event = mapping.to_event(stimulus)?;
        self.inject(&event);
        Ok(())
    }

    /// Run one tick if active. Returns whether a step ran.
    pub fn advance(&mut self, delta_ms: f32) -> bool {
        if !self.state.has_field() {
            return false;
        }
        let Some(fade) = self.clock.tick() else {
            return false;
        };

        let dt = self.config.wave.dt_for_frame(delta_ms);
        let params = WaveParams::new(&self.config, dt, fade);

        let Some(backend) = self.backend.as_mut() else {
            return false;
        };
        let result = backend.step(&params).and_then(|()| backend.encode());

        match result {
            Ok(()) => {
                self.ticks += 1;
                if self.state == LifecycleState::Sized {
                    self.state = LifecycleState::Running;
                }
                if !self.clock.is_active() {
                    tracing::debug!("Frost simulation idle after {} ticks", self.ticks);
                }
                true
            }
            Err(e) => {
                self.handle_backend_failure(e);
                false
            }
        }
    }

    /// Latest encoded texture, or an empty placeholder without a field.
    pub fn current_texture(&self) -> TextureRef<'_> {
        match &self.backend {
            Some(backend) => backend.texture(),
            None => TextureRef::Host(&self.placeholder),
        }
    }

    /// Host copy of the latest encoded texture.
    pub fn snapshot(&mut self) -> Option<NormalHeightTexture> {
        let result = self.backend.as_mut()?.read_texture();
        match result {
            Ok(texture) => Some(texture),
            Err(e) => {
                self.handle_backend_failure(e);
                self.backend.as_mut()?.read_texture().ok()
            }
        }
    }

    /// Interior heights, row-major.
    pub fn heights(&mut self) -> Option<Vec<f32>> {
        let result = self.backend.as_mut()?.read_heights();
        match result {
            Ok(heights) => Some(heights),
            Err(e) => {
                self.handle_backend_failure(e);
                self.backend.as_mut()?.read_heights().ok()
            }
        }
    }

    /// Whether ticks still have work to do.
    pub fn is_active(&self) -> bool {
        self.state.has_field() && self.clock.is_active()
    }

    /// Ticks left before the simulation idles, without further stimuli.
    pub fn ticks_to_rest(&self) -> u32 {
        if self.state.has_field() {
            self.clock.ticks_to_rest()
        } else {
            0
        }
    }

    /// Activity level.
    pub fn activity(&self) -> i32 {
        self.clock.level()
    }

    /// Lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Strategy in use.
    pub fn backend_kind(&self) -> Option<BackendKind> {
        self.backend.as_ref().map(|b| b.kind())
    }

    /// Grid dimensions.
    pub fn grid_size(&self) -> Option<GridSize> {
        self.backend.as_ref().map(|b| b.size())
    }

    /// Screen to grid scaling of the last reset.
    pub fn screen_mapping(&self) -> Option<ScreenMapping> {
        self.mapping
    }

    /// Ticks run since the last reset.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Configuration.
    pub fn config(&self) -> &FrostConfig {
        &self.config
    }

    /// Release the field and every backend resource.
    pub fn teardown(&mut self) {
        self.release();
        self.clock.reset();
        self.mapping = None;
        self.state = LifecycleState::TornDown;
        tracing::info!("Frost simulation torn down after {} ticks", self.ticks);
    }

    fn release(&mut self) {
        if let Some(backend) = self.backend.take() {
            tracing::debug!("Releasing {} backend", backend.kind());
        }
    }

    fn create_backend(
        &mut self,
        size: GridSize,
        capabilities: Capabilities,
    ) -> Result<Box<dyn FrostBackend>> {
        #[cfg(feature = "wgpu")]
        if let Some(gpu) = self.gpu.clone() {
            if capabilities.supports_accumulation() && !self.accumulation_disabled {
                let gain = self.config.encode.normal_gain;
                match AccumulationBackend::new(gpu, size, gain) {
                    Ok(backend) => return Ok(Box::new(backend)),
                    Err(e) if e.is_capability_failure() => self.disable_accumulation(&e),
                    Err(e) => return Err(e),
                }
            }
        }

        if !capabilities.supports_accumulation() {
            tracing::debug!("Accumulation targets unsupported: {:?}", capabilities);
        }
        self.cpu_backend(size)
    }

    fn cpu_backend(&self, size: GridSize) -> Result<Box<dyn FrostBackend>> {
        let backend = CpuBackend::new(size, self.config.encode.normal_gain)?;

        #[cfg(feature = "wgpu")]
        if let Some(gpu) = &self.gpu {
            return Ok(Box::new(backend.with_upload(Arc::clone(gpu))));
        }

        Ok(Box::new(backend))
    }

    fn disable_accumulation(&mut self, cause: &FrostError) {
        self.accumulation_disabled = true;
        tracing::warn!(
            "Accumulation target disabled, switching to explicit arrays: {}",
            cause
        );
    }

    /// Swap a failed accumulation backend for a fresh CPU one, or go inert.
    fn handle_backend_failure(&mut self, error: FrostError) {
        let failed = self.backend.take();
        let size = failed.as_ref().map(|b| b.size());
        let kind = failed.as_ref().map(|b| b.kind());
        drop(failed);

        match (kind, size) {
            (Some(BackendKind::Accumulation), Some(size)) if error.is_capability_failure() => {
                self.disable_accumulation(&error);
                match self.cpu_backend(size) {
                    Ok(backend) => {
                        self.backend = Some(backend);
                        self.state = LifecycleState::Degraded;
                    }
                    Err(e) => {
                        tracing::error!("CPU fallback failed, frost simulation inert: {}", e);
                        self.state = LifecycleState::Inert;
                    }
                }
            }
            _ => {
                tracing::error!("Frost backend failed, simulation inert: {}", error);
                self.state = LifecycleState::Inert;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::raster::Point;

    /// Accumulation stand-in that fails on demand.
    struct FlakyBackend {
        inner: CpuBackend,
        fail_step: bool,
        fail_rasterize: bool,
    }

    impl FrostBackend for FlakyBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Accumulation
        }

        fn size(&self) -> GridSize {
            self.inner.size()
        }

        fn rasterize(&mut self, event: &StimulusEvent) -> Result<()> {
            if self.fail_rasterize {
                return Err(FrostError::capability("stamp pipeline rejected"));
            }
            self.inner.rasterize(event)
        }

        fn step(&mut self, params: &WaveParams) -> Result<()> {
            if self.fail_step {
                return Err(FrostError::capability("render target incomplete"));
            }
            self.inner.step(params)
        }

        fn encode(&mut self) -> Result<()> {
            self.inner.encode()
        }

        fn texture(&self) -> TextureRef<'_> {
            self.inner.texture()
        }

        fn read_texture(&mut self) -> Result<NormalHeightTexture> {
            self.inner.read_texture()
        }

        fn read_heights(&mut self) -> Result<Vec<f32>> {
            self.inner.read_heights()
        }
    }

    fn sized(width: u32, height: u32) -> FrostSimulation {
        let mut sim = FrostSimulation::new(FrostConfig::default().with_short_edge(16)).unwrap();
        sim.reset(width, height, Capabilities::none()).unwrap();
        sim
    }

    fn install_flaky(sim: &mut FrostSimulation, fail_step: bool, fail_rasterize: bool) {
        let size = sim.grid_size().unwrap();
        sim.backend = Some(Box::new(FlakyBackend {
            inner: CpuBackend::new(size, 1.5).unwrap(),
            fail_step,
            fail_rasterize,
        }));
    }

    #[test]
    fn test_uninitialized_is_inert() {
        let mut sim = FrostSimulation::new(FrostConfig::default()).unwrap();
        assert_eq!(sim.state(), LifecycleState::Uninitialized);
        assert!(!sim.advance(16.0));
        assert!(!sim.is_active());
        assert_eq!(sim.current_texture().dimensions(), (0, 0));
        assert!(sim.snapshot().is_none());
    }

    #[test]
    fn test_reset_sizes_grid() {
        let sim = sized(32, 16);
        assert_eq!(sim.state(), LifecycleState::Sized);
        assert_eq!(sim.grid_size(), Some(GridSize::new(32, 16).unwrap()));
        assert_eq!(sim.backend_kind(), Some(BackendKind::Cpu));
        assert_eq!(sim.current_texture().dimensions(), (32, 16));
    }

    #[test]
    fn test_zero_screen_goes_inert() {
        let mut sim = sized(32, 16);
        assert!(sim.reset(0, 100, Capabilities::all()).is_err());
        assert_eq!(sim.state(), LifecycleState::Inert);
        assert!(sim.grid_size().is_none());

        sim.inject(&StimulusEvent::point(Point::new(1, 1), 0.5).unwrap());
        assert!(!sim.is_active());
        assert!(!sim.advance(16.0));
    }

    #[test]
    fn test_tick_runs_and_decays() {
        let mut sim = sized(32, 16);
        sim.inject(&StimulusEvent::point(Point::new(10, 8), 0.8).unwrap());
        assert_eq!(sim.activity(), 3000);

        assert!(sim.advance(16.0));
        assert_eq!(sim.state(), LifecycleState::Running);
        assert_eq!(sim.activity(), 2990);
        assert_eq!(sim.ticks(), 1);
    }

    #[test]
    fn test_invisible_stimulus_keeps_idle() {
        let mut sim = sized(32, 16);
        sim.inject(&StimulusEvent::point(Point::new(10, 8), 0.0).unwrap());
        assert!(!sim.is_active());
        assert!(!sim.advance(16.0));
    }

    #[test]
    fn test_step_failure_falls_back_permanently() {
        let mut sim = sized(32, 16);
        install_flaky(&mut sim, true, false);
        sim.inject(&StimulusEvent::point(Point::new(10, 8), 0.8).unwrap());

        // The failing tick is dropped
        assert!(!sim.advance(16.0));
        assert_eq!(sim.state(), LifecycleState::Degraded);
        assert_eq!(sim.backend_kind(), Some(BackendKind::Cpu));
        // Activity survives, the fresh field starts flat
        assert!(sim.is_active());
        assert!(sim.heights().unwrap().iter().all(|h| *h == 0.0));

        assert!(sim.advance(16.0));
        assert_eq!(sim.state(), LifecycleState::Degraded);

        // Later resets stay on the CPU even when capabilities look fine
        sim.reset(32, 16, Capabilities::all()).unwrap();
        assert_eq!(sim.state(), LifecycleState::Degraded);
        assert_eq!(sim.backend_kind(), Some(BackendKind::Cpu));
    }

    #[test]
    fn test_rasterize_failure_replays_on_cpu() {
        let mut sim = sized(32, 16);
        install_flaky(&mut sim, false, true);
        sim.inject(&StimulusEvent::point(Point::new(10, 8), 0.8).unwrap());

        assert_eq!(sim.state(), LifecycleState::Degraded);
        assert_eq!(sim.backend_kind(), Some(BackendKind::Cpu));
        // The stimulus that hit the failure lands in the fresh field
        let heights = sim.heights().unwrap();
        assert_eq!(heights[8 * 32 + 10], 0.8);
        assert!(sim.is_active());
    }

    #[test]
    fn test_field_presence_per_state() {
        assert!(!LifecycleState::Uninitialized.has_field());
        assert!(LifecycleState::Sized.has_field());
        assert!(LifecycleState::Running.has_field());
        assert!(LifecycleState::Degraded.has_field());
        assert!(!LifecycleState::Inert.has_field());
        assert!(!LifecycleState::TornDown.has_field());
    }

    #[test]
    fn test_ticks_to_rest() {
        let mut sim = FrostSimulation::new(FrostConfig::default()).unwrap();
        assert_eq!(sim.ticks_to_rest(), 0);

        sim.reset(32, 16, Capabilities::none()).unwrap();
        sim.inject(&StimulusEvent::point(Point::new(10, 8), 0.8).unwrap());
        assert_eq!(sim.ticks_to_rest(), 300);
        sim.advance(16.0);
        assert_eq!(sim.ticks_to_rest(), 299);

        sim.teardown();
        assert_eq!(sim.ticks_to_rest(), 0);
    }

    #[test]
    fn test_healthy_accumulation_stand_in() {
        let mut sim = sized(32, 16);
        install_flaky(&mut sim, false, false);
        sim.inject(&StimulusEvent::point(Point::new(10, 8), 0.8).unwrap());
        assert!(sim.advance(16.0));
        assert_eq!(sim.backend_kind(), Some(BackendKind::Accumulation));
        assert_eq!(sim.state(), LifecycleState::Running);
    }

    #[test]
    fn test_teardown_and_reinit() {
        let mut sim = sized(32, 16);
        sim.inject(&StimulusEvent::point(Point::new(10, 8), 0.8).unwrap());
        sim.teardown();

        assert_eq!(sim.state(), LifecycleState::TornDown);
        assert!(!sim.is_active());
        assert!(sim.grid_size().is_none());
        assert!(!sim.advance(16.0));

        sim.reset(64, 32, Capabilities::none()).unwrap();
        assert_eq!(sim.state(), LifecycleState::Sized);
        assert_eq!(sim.activity(), 0);
        assert_eq!(sim.grid_size(), Some(GridSize::new(32, 16).unwrap()));
    }

    #[test]
    fn test_inject_screen_scales() {
        let mut sim = sized(64, 32);
        sim.inject_screen(&ScreenStimulus::point(Point::new(40, 20), 0.5)).unwrap();

        let size = sim.grid_size().unwrap();
        let heights = sim.heights().unwrap();
        assert_eq!(heights[10 * size.width as usize + 20], 0.5);

        let bad = ScreenStimulus {
            primitive: crate::simulation::Primitive::Line,
            points: vec![Point::new(0, 0)],
            magnitude: 0.5,
        };
        assert!(sim.inject_screen(&bad).is_err());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = FrostConfig::default().with_tick_dt(10.0);
        assert!(FrostSimulation::new(config).is_err());
    }
}
