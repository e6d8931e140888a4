//! # Frostsim
//!
//! Frost spreading over a screen, modelled as a damped 2D wave equation on
//! a height field and rendered through a normal/height texture.
//!
//! ## Features
//!
//! - Leapfrog integration with activity-driven fading and idling
//! - Point, line and triangle stimuli with fixed rasterization rules
//! - GPU accumulation-target backend (wgpu) with a permanent CPU fallback
//! - Pointer strokes, rain and a windscreen wiper as ready-made gestures
//! - TOML configuration
//!
//! ## Usage
//!
//! ```
//! use frostsim::{Capabilities, FrostConfig, FrostSimulation, Point, StimulusEvent};
//!
//! let mut sim = FrostSimulation::new(FrostConfig::default()).unwrap();
//! sim.reset(1920, 1080, Capabilities::none()).unwrap();
//!
//! sim.inject(&StimulusEvent::point(Point::new(200, 100), 0.8).unwrap());
//! while sim.advance(16.0) {}
//!
//! assert!(!sim.is_active());
//! ```
//!
//! ## Run
//!
//! ```bash
//! cargo run -p frostsim --bin frostsim -- --cpu
//! ```

pub mod config;
pub mod error;
pub mod gestures;
pub mod simulation;

pub use config::FrostConfig;
pub use error::{FrostError, Result};
pub use gestures::{PointerStroke, Rain, ScreenMapping, ScreenStimulus, WindowFrame, Wiper};
pub use simulation::{
    BackendKind, Capabilities, FrostBackend, FrostSimulation, GridSize, LifecycleState,
    NormalHeightTexture, Point, Primitive, StimulusEvent, TextureRef,
};

#[cfg(feature = "wgpu")]
pub use simulation::GpuContext;
