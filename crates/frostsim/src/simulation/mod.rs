//! Simulation core: damped-wave frost field and its two backends.

mod clock;
mod height;
mod kernel;
mod raster;
mod ring;
mod texture;

// Backend abstraction and implementations
pub mod backend;
pub mod cpu;

#[cfg(feature = "wgpu")]
pub mod wgpu_backend;

mod engine;

pub use clock::ActivityClock;
pub use height::{GridSize, HeightBuffer};
pub use kernel::{
    encode_texel, fade_for_activity, laplacian, quantize, wave_update, Texel, WaveParams,
};
pub use raster::{
    line_cells, rasterize, splat_cells, triangle_cells, Point, Primitive, StimulusEvent,
    COORD_LIMIT,
};
pub use ring::{BufferRing, RING_SLOTS};
pub use texture::{NormalHeightTexture, TEXEL_BYTES};

pub use backend::{BackendKind, Capabilities, FrostBackend, TextureRef};
pub use cpu::CpuBackend;
pub use engine::{FrostSimulation, LifecycleState};

#[cfg(feature = "wgpu")]
pub use wgpu_backend::{AccumulationBackend, DeviceTexture, GpuContext};
