//! Activity level: governs fading and idling.

use super::kernel::fade_for_activity;
use crate::config::ActivityConfig;

/// Decaying activity counter.
///
/// Stimuli raise the level to a floor, every tick lowers it by a fixed step,
/// and the engine idles once it reaches zero.
#[derive(Debug, Clone)]
pub struct ActivityClock {
    level: i32,
    config: ActivityConfig,
}

impl ActivityClock {
    /// Create an idle clock.
    pub fn new(config: ActivityConfig) -> Self {
        Self { level: 0, config }
    }

    /// Current level.
    pub fn level(&self) -> i32 {
        self.level
    }

    /// Whether the engine has work to do.
    pub fn is_active(&self) -> bool {
        self.level > 0
    }

    /// Raise the level to at least the floor.
    pub fn bump(&mut self) {
        self.level = self.level.max(self.config.floor);
    }

    /// Decay by one tick and return the fade factor to step with, or `None`
    /// when already idle.
    pub fn tick(&mut self) -> Option<f32> {
        if self.level == 0 {
            return None;
        }
        self.level = (self.level - self.config.decay_per_tick).max(0);
        Some(fade_for_activity(self.level, &self.config))
    }

    /// Ticks left until the engine idles.
    pub fn ticks_to_rest(&self) -> u32 {
        let step = self.config.decay_per_tick.max(1);
        ((self.level + step - 1) / step) as u32
    }

    /// Drop straight to idle.
    pub fn reset(&mut self) {
        self.level = 0;
    }
}
