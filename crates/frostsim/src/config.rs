//! Simulation configuration.
//!
//! Every tunable constant of the simulation lives here so that both
//! backends read the same values. The defaults reproduce the classic
//! frost effect; hosts may override them from a TOML file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FrostError, Result};
use crate::simulation::WaveParams;

/// Upper bound on the effective Courant factor (`dt · K · gain`) of the
/// 5-point leapfrog stencil.
pub const STABILITY_LIMIT: f32 = 0.5;

/// Complete simulation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FrostConfig {
    /// Grid sizing.
    pub grid: GridConfig,
    /// Wave equation constants.
    pub wave: WaveConfig,
    /// Activity decay and fade curve.
    pub activity: ActivityConfig,
    /// Normal/height encoding.
    pub encode: EncodeConfig,
    /// Default gesture magnitudes and timings.
    pub stimulus: StimulusConfig,
}

/// Grid sizing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Simulation cells along the screen height; the width follows the aspect ratio.
    pub short_edge: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self { short_edge: 256 }
    }
}

/// Wave equation constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveConfig {
    /// Wave-speed² analogue (K).
    pub wave_constant: f32,
    /// Additional gain applied on top of K.
    pub step_gain: f32,
    /// Constant damping multiplied into the fade factor every step.
    pub fade_damping: f32,
    /// Time increment of one tick.
    pub tick_dt: f32,
    /// When set, dt scales with the frame delta relative to this frame time.
    pub nominal_frame_ms: Option<f32>,
}

impl Default for WaveConfig {
    fn default() -> Self {
        Self {
            wave_constant: 0.1964,
            step_gain: 2.0,
            fade_damping: 0.99,
            tick_dt: 0.8,
            nominal_frame_ms: None,
        }
    }
}

impl WaveConfig {
    /// Largest dt that keeps the stencil inside [`STABILITY_LIMIT`].
    pub fn max_stable_dt(&self) -> f32 {
        STABILITY_LIMIT / (self.wave_constant * self.step_gain)
    }

    /// dt for a tick that followed a frame of `delta_ms`.
    pub fn dt_for_frame(&self, delta_ms: f32) -> f32 {
        match self.nominal_frame_ms {
            Some(nominal) if nominal > 0.0 && delta_ms.is_finite() => {
                (self.tick_dt * delta_ms / nominal).clamp(0.0, self.max_stable_dt())
            }
            _ => self.tick_dt,
        }
    }
}

/// Activity level bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    /// Decrement applied on every tick.
    pub decay_per_tick: i32,
    /// Level that any visible stimulus raises activity to.
    pub floor: i32,
    /// At or above this level the field does not fade.
    pub fade_band: i32,
    /// Fade at the bottom of the band.
    pub fade_base: f32,
    /// Divisor of the level inside the band.
    pub fade_divisor: f32,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            decay_per_tick: 10,
            floor: 3000,
            fade_band: 1000,
            fade_base: 0.90,
            fade_divisor: 10000.0,
        }
    }
}

/// Normal map encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeConfig {
    /// Gain applied to the central differences (visual steepness).
    pub normal_gain: f32,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self { normal_gain: 1.5 }
    }
}

/// Default magnitudes and timings of the built-in gestures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StimulusConfig {
    /// Pointer press splat.
    pub press: f32,
    /// Pointer drag stroke.
    pub drag: f32,
    /// Scripted point.
    pub point: f32,
    /// Scripted line.
    pub line: f32,
    /// Line along a window's title bar.
    pub title: f32,
    /// Upper bound of a rain drop.
    pub rain_max: f32,
    /// Delay between rain drops.
    pub rain_interval_ms: u32,
    /// Wiper wedge magnitude (0 erases).
    pub wipe: f32,
    /// Wiper angular speed, degrees per 20 ms.
    pub wiper_speed: f32,
    /// Period between wiper kicks.
    pub wiper_interval_ms: u32,
}

impl Default for StimulusConfig {
    fn default() -> Self {
        Self {
            press: 0.8,
            drag: 0.2,
            point: 0.5,
            line: 0.25,
            title: 0.15,
            rain_max: 0.8,
            rain_interval_ms: 250,
            wipe: 0.0,
            wiper_speed: 2.5,
            wiper_interval_ms: 2000,
        }
    }
}

impl FrostConfig {
    /// Parse a configuration from TOML. Missing keys take their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Serialize to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Set the simulation short-edge resolution.
    pub fn with_short_edge(mut self, short_edge: u32) -> Self {
        self.grid.short_edge = short_edge;
        self
    }

    /// Set the per-tick dt.
    pub fn with_tick_dt(mut self, dt: f32) -> Self {
        self.wave.tick_dt = dt;
        self
    }

    /// Scale dt with the frame delta.
    pub fn with_nominal_frame_ms(mut self, ms: f32) -> Self {
        self.wave.nominal_frame_ms = Some(ms);
        self
    }

    /// Check that the configuration describes a stable simulation.
    pub fn validate(&self) -> Result<()> {
        if self.grid.short_edge == 0 {
            return Err(FrostError::config("grid.short_edge must be positive"));
        }

        let wave = &self.wave;
        if !(wave.wave_constant > 0.0 && wave.step_gain > 0.0) {
            return Err(FrostError::config(
                "wave.wave_constant and wave.step_gain must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&wave.fade_damping) {
            return Err(FrostError::config("wave.fade_damping must lie in [0, 1]"));
        }
        if !WaveParams::new(self, wave.tick_dt, 1.0).is_stable() {
            return Err(FrostError::config(format!(
                "wave.tick_dt {} outside stable range [0, {:.4}]",
                wave.tick_dt,
                wave.max_stable_dt()
            )));
        }

        let activity = &self.activity;
        if activity.decay_per_tick <= 0 {
            return Err(FrostError::config("activity.decay_per_tick must be positive"));
        }
        if activity.floor < 0 || activity.fade_band < 0 {
            return Err(FrostError::config("activity levels must be non-negative"));
        }
        if activity.fade_divisor <= 0.0 {
            return Err(FrostError::config("activity.fade_divisor must be positive"));
        }

        let stimulus = &self.stimulus;
        for (name, value) in [
            ("press", stimulus.press),
            ("drag", stimulus.drag),
            ("point", stimulus.point),
            ("line", stimulus.line),
            ("title", stimulus.title),
            ("rain_max", stimulus.rain_max),
            ("wipe", stimulus.wipe),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(FrostError::config(format!(
                    "stimulus.{} = {} outside [-1, 1]",
                    name, value
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = FrostConfig::default();
        config.validate().unwrap();
        assert_eq!(config.grid.short_edge, 256);
        assert_eq!(config.activity.floor, 3000);
    }

    #[test]
    fn test_default_dt_is_stable() {
        let wave = WaveConfig::default();
        assert!(wave.tick_dt * wave.wave_constant * wave.step_gain <= STABILITY_LIMIT);
        assert!(wave.max_stable_dt() > 1.2);
    }

    #[test]
    fn test_dt_for_frame() {
        let wave = WaveConfig::default();
        assert_eq!(wave.dt_for_frame(33.0), 0.8);

        let scaled = WaveConfig {
            nominal_frame_ms: Some(16.0),
            ..WaveConfig::default()
        };
        assert!((scaled.dt_for_frame(8.0) - 0.4).abs() < 1e-6);
        // A long frame is clamped to the stability bound
        assert_eq!(scaled.dt_for_frame(1000.0), scaled.max_stable_dt());
    }

    #[test]
    fn test_toml_partial_override() {
        let config = FrostConfig::from_toml_str(
            r#"
            [grid]
            short_edge = 128

            [activity]
            floor = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.grid.short_edge, 128);
        assert_eq!(config.activity.floor, 500);
        assert_eq!(config.activity.decay_per_tick, 10);
        assert_eq!(config.encode.normal_gain, 1.5);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = FrostConfig::default().with_short_edge(64).with_nominal_frame_ms(16.0);
        let text = config.to_toml_string().unwrap();
        assert_eq!(FrostConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_rejects_unstable_dt() {
        for dt in [4.0, -0.1, f32::NAN] {
            let config = FrostConfig::default().with_tick_dt(dt);
            assert!(matches!(config.validate(), Err(FrostError::Config(_))));
        }
        FrostConfig::default().with_tick_dt(0.0).validate().unwrap();
    }

    #[test]
    fn test_rejects_zero_short_edge() {
        let err = FrostConfig::from_toml_str("[grid]\nshort_edge = 0\n").unwrap_err();
        assert!(matches!(err, FrostError::Config(_)));
    }
}
