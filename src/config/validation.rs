//! Configuration validation.

use crate::error::{ConfigError, Error, Result};

use super::MotionConfig;

/// Validate a motion configuration.
///
/// Checks:
/// - Base stepping frequency and acceleration tick rate are positive
/// - The step-rate floor is positive
/// - The pulse width is positive and fits inside one base period
pub fn validate_config(config: &MotionConfig) -> Result<()> {
    if !(config.base_stepping_frequency > 0.0) {
        return Err(Error::Config(ConfigError::InvalidBaseFrequency(
            config.base_stepping_frequency,
        )));
    }

    if config.acceleration_ticks_per_second == 0 {
        return Err(Error::Config(ConfigError::InvalidAccelerationTicks(
            config.acceleration_ticks_per_second,
        )));
    }

    if !(config.minimum_steps_per_minute > 0.0) {
        return Err(Error::Config(ConfigError::InvalidMinimumRate(
            config.minimum_steps_per_minute,
        )));
    }

    let base_period = config.base_period_seconds();
    if !(config.pulse_width_seconds > 0.0) || config.pulse_width_seconds >= base_period {
        return Err(Error::Config(ConfigError::InvalidPulseWidth {
            pulse_width: config.pulse_width_seconds,
            base_period,
        }));
    }

    Ok(())
}
