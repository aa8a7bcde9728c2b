//! Motion core configuration keys.

use serde::Deserialize;

/// Configuration of the pulse generator and trapezoid controller.
///
/// Every key has a firmware default, so an empty configuration is valid.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Rate of the trapezoid controller cadence, in ticks per second.
    pub acceleration_ticks_per_second: u32,

    /// Floor for the commanded step rate, in steps per minute.
    pub minimum_steps_per_minute: f32,

    /// Pulse-decision rate of the step ticker, in Hz.
    pub base_stepping_frequency: f32,

    /// Width of a step pulse (high to low edge), in seconds.
    pub pulse_width_seconds: f32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            acceleration_ticks_per_second: 100,
            minimum_steps_per_minute: 3000.0,
            base_stepping_frequency: 100_000.0,
            pulse_width_seconds: 5e-6,
        }
    }
}

impl MotionConfig {
    /// The configured step-rate floor converted to steps per second.
    #[inline]
    pub fn minimum_steps_per_second(&self) -> f32 {
        self.minimum_steps_per_minute / 60.0
    }

    /// One base tick in seconds.
    #[inline]
    pub fn base_period_seconds(&self) -> f32 {
        1.0 / self.base_stepping_frequency
    }
}
