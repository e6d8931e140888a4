//! Backend-agnostic description of the frost update.
//!
//! The explicit-array backend calls these functions cell by cell. The
//! accumulation-target backend implements the same formulas in WGSL
//! (`wgpu_backend.rs`), and the parity tests compare both paths.
//!
//! Update rule (leapfrog integrator for the damped 2D wave equation):
//!
//! ```text
//! lap = N + S + E + W - 4·C
//! h'  = clamp((2·C - O + dt·lap) · fade, -1, 1)
//! ```
//!
//! where `C` is the current height, `O` the height one step older and
//! `dt` already includes the wave constant.

use crate::config::{ActivityConfig, FrostConfig};

/// Per-tick parameters shared by both backends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveParams {
    /// dt multiplied by the wave constant and step gain.
    pub dt_scaled: f32,
    /// Final fade factor (activity fade times constant damping).
    pub fade: f32,
}

impl WaveParams {
    /// Build the parameters of one tick.
    pub fn new(config: &FrostConfig, dt: f32, activity_fade: f32) -> Self {
        Self {
            dt_scaled: dt * config.wave.wave_constant * config.wave.step_gain,
            fade: activity_fade * config.wave.fade_damping,
        }
    }

    /// Whether the stencil is inside its stability bound.
    pub fn is_stable(&self) -> bool {
        self.dt_scaled >= 0.0 && self.dt_scaled <= crate::config::STABILITY_LIMIT
    }
}

/// Discrete 5-point Laplacian.
#[inline(always)]
pub fn laplacian(center: f32, north: f32, south: f32, west: f32, east: f32) -> f32 {
    north + south + west + east - 4.0 * center
}

/// Advance one cell.
#[inline(always)]
pub fn wave_update(center: f32, older: f32, laplacian: f32, params: &WaveParams) -> f32 {
    let accel = params.dt_scaled * laplacian;
    ((2.0 * center - older + accel) * params.fade).clamp(-1.0, 1.0)
}

/// Fade factor for an activity level.
///
/// Below the band the field fades quicker the lower the activity gets, and
/// it is wiped completely once activity drops to one or less.
pub fn fade_for_activity(level: i32, config: &ActivityConfig) -> f32 {
    if level >= config.fade_band {
        1.0
    } else if level > 1 {
        (config.fade_base + level as f32 / config.fade_divisor).min(1.0)
    } else {
        0.0
    }
}

/// Channel values of one encoded texel before quantisation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Texel {
    /// Inverse-length scale, biased.
    pub r: f32,
    /// Biased y-gradient.
    pub g: f32,
    /// Biased x-gradient.
    pub b: f32,
    /// Height.
    pub a: f32,
}

impl Texel {
    /// Quantise to 8 bits per channel.
    pub fn to_rgba8(self) -> [u8; 4] {
        [
            quantize(self.r),
            quantize(self.g),
            quantize(self.b),
            quantize(self.a),
        ]
    }
}

/// Derive a texel from a height and its central differences.
///
/// `dx = h(x+1) - h(x-1)`, `dy = h(y+1) - h(y-1)`.
#[inline]
pub fn encode_texel(height: f32, dx: f32, dy: f32, gain: f32) -> Texel {
    let nx = dx * gain;
    let ny = dy * gain;
    let inv = 0.5 / (nx * nx + ny * ny + 1.0).sqrt();

    Texel {
        r: inv + 0.5,
        g: ny * inv + 0.5,
        b: nx * inv + 0.5,
        a: height,
    }
}

/// Map `[0, 1]` to a byte, clamping and rounding like a unorm render target.
#[inline(always)]
pub fn quantize(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Decode a biased gradient byte back to `[-0.5, 0.5]`.
#[inline]
pub fn unbias(byte: u8) -> f32 {
    byte as f32 / 255.0 - 0.5
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_flat_field_stays_flat() {
        let params = WaveParams {
            dt_scaled: 0.3,
            fade: 0.99,
        };
        let lap = laplacian(0.0, 0.0, 0.0, 0.0, 0.0);
        assert_eq!(wave_update(0.0, 0.0, lap, &params), 0.0);
    }

    #[test]
    fn test_update_matches_formula() {
        let params = WaveParams {
            dt_scaled: 0.25,
            fade: 0.9,
        };
        let lap = laplacian(0.2, 0.1, 0.0, 0.3, 0.0);
        assert_relative_eq!(lap, 0.4 - 0.8);
        let expected = (2.0 * 0.2 - 0.05 + 0.25 * lap) * 0.9;
        assert_relative_eq!(wave_update(0.2, 0.05, lap, &params), expected);
    }

    #[test]
    fn test_update_clamps() {
        let params = WaveParams {
            dt_scaled: 0.4,
            fade: 1.0,
        };
        assert_eq!(wave_update(1.0, -1.0, 0.0, &params), 1.0);
        assert_eq!(wave_update(-1.0, 1.0, 0.0, &params), -1.0);
    }

    #[test]
    fn test_fade_curve() {
        let config = ActivityConfig::default();
        assert_eq!(fade_for_activity(3000, &config), 1.0);
        assert_eq!(fade_for_activity(1000, &config), 1.0);
        assert_relative_eq!(fade_for_activity(500, &config), 0.95);
        assert_relative_eq!(fade_for_activity(2, &config), 0.9002);
        assert_eq!(fade_for_activity(1, &config), 0.0);
        assert_eq!(fade_for_activity(0, &config), 0.0);
    }

    #[test]
    fn test_wave_params_from_config() {
        let config = FrostConfig::default();
        let params = WaveParams::new(&config, 0.8, 1.0);
        assert_relative_eq!(params.dt_scaled, 0.8 * 0.1964 * 2.0);
        assert_relative_eq!(params.fade, 0.99);
        assert!(params.is_stable());
    }

    #[test]
    fn test_flat_texel() {
        let texel = encode_texel(0.0, 0.0, 0.0, 1.5);
        assert_eq!(texel.to_rgba8(), [255, 128, 128, 0]);
    }

    #[test]
    fn test_slope_texel() {
        // Rising towards +x: blue above the bias, green at the bias
        let texel = encode_texel(0.5, 0.4, 0.0, 1.5);
        let [r, g, b, a] = texel.to_rgba8();
        assert!(b > 128);
        assert_eq!(g, 128);
        assert!(r < 255);
        assert_eq!(a, 128);
    }

    #[test]
    fn test_negative_height_quantizes_to_zero() {
        assert_eq!(quantize(-0.7), 0);
        assert_eq!(quantize(2.0), 255);
        assert_relative_eq!(unbias(128), 0.00196, epsilon = 1e-4);
    }
}
