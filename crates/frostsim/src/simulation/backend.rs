//! Execution strategy abstraction.
//!
//! Two interchangeable implementations advance the same field:
//!
//! - [`CpuBackend`](super::cpu::CpuBackend): explicit arrays in host memory.
//! - `AccumulationBackend` (feature `wgpu`): render targets rotated through
//!   a [`BufferRing`](super::ring::BufferRing), stimuli drawn as geometry,
//!   step and encode as full-screen passes.
//!
//! The simulation picks one at reset and only ever switches from the
//! accumulation path to the CPU path, never back.

use super::height::GridSize;
use super::kernel::WaveParams;
use super::raster::StimulusEvent;
use super::texture::NormalHeightTexture;
use crate::error::Result;

/// Which strategy a backend implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Explicit-array CPU path.
    Cpu,
    /// GPU render-target accumulation path.
    Accumulation,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Cpu => write!(f, "explicit-array (CPU)"),
            BackendKind::Accumulation => write!(f, "accumulation-target (GPU)"),
        }
    }
}

/// Platform features the accumulation path depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Off-screen render targets in the formats the ring needs.
    pub render_targets: bool,
    /// Custom per-fragment programs.
    pub fragment_programs: bool,
}

impl Capabilities {
    /// Nothing available: always the CPU path.
    pub const fn none() -> Self {
        Self {
            render_targets: false,
            fragment_programs: false,
        }
    }

    /// Everything available.
    pub const fn all() -> Self {
        Self {
            render_targets: true,
            fragment_programs: true,
        }
    }

    /// Whether the accumulation path may be attempted.
    pub fn supports_accumulation(&self) -> bool {
        self.render_targets && self.fragment_programs
    }
}

/// Borrowed view of the most recently encoded texture.
#[derive(Debug, Clone, Copy)]
pub enum TextureRef<'a> {
    /// Host-resident RGBA8 bytes.
    Host(&'a NormalHeightTexture),
    /// Device-resident `Rgba8Unorm` texture.
    #[cfg(feature = "wgpu")]
    Device(&'a wgpu::Texture),
}

impl TextureRef<'_> {
    /// Width and height of the texture.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            TextureRef::Host(texture) => (texture.width(), texture.height()),
            #[cfg(feature = "wgpu")]
            TextureRef::Device(texture) => (texture.width(), texture.height()),
        }
    }
}

/// One execution strategy for rasterize / step / encode.
pub trait FrostBackend: Send {
    /// Strategy implemented.
    fn kind(&self) -> BackendKind;

    /// Grid dimensions.
    fn size(&self) -> GridSize;

    /// Apply a stimulus to the current field.
    ///
    /// Stimuli are applied in call order and are all visible to the next step.
    fn rasterize(&mut self, event: &StimulusEvent) -> Result<()>;

    /// Advance the field by one tick.
    fn step(&mut self, params: &WaveParams) -> Result<()>;

    /// Regenerate the normal/height texture from the current field.
    fn encode(&mut self) -> Result<()>;

    /// Latest encoded texture.
    fn texture(&self) -> TextureRef<'_>;

    /// Host copy of the latest encoded texture.
    fn read_texture(&mut self) -> Result<NormalHeightTexture>;

    /// Interior heights of the current field, row-major, stimuli included.
    fn read_heights(&mut self) -> Result<Vec<f32>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities() {
        assert!(Capabilities::all().supports_accumulation());
        assert!(!Capabilities::none().supports_accumulation());
        assert!(!Capabilities {
            render_targets: true,
            fragment_programs: false,
        }
        .supports_accumulation());
    }

    #[test]
    fn test_texture_ref_dimensions() {
        let texture = NormalHeightTexture::new(GridSize::new(5, 3).unwrap()).unwrap();
        assert_eq!(TextureRef::Host(&texture).dimensions(), (5, 3));
    }
}
