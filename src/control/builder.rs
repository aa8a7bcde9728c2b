//! Builder pattern for the motion core.

use embedded_hal::digital::OutputPin;

use crate::config::{validate_config, MotionConfig};
use crate::error::{BuildError, Result};
use crate::motor::{StepTicker, StepperMotor};
use crate::timer::{AccelTimer, StepTimer};

use super::system::MotionCore;
use super::trapezoid::TrapezoidController;

/// Builder for assembling a [`MotionCore`] from its hardware resources.
///
/// Motors are registered in axis order: the first call to
/// [`MotionCoreBuilder::motor`] becomes axis 0.
pub struct MotionCoreBuilder<T, A, STEP, DIR, EN, const N: usize, const CAP: usize>
where
    T: StepTimer,
    A: AccelTimer,
    STEP: OutputPin,
    DIR: OutputPin,
    EN: OutputPin,
{
    step_timer: T,
    accel_timer: A,
    config: MotionConfig,
    motors: heapless::Vec<StepperMotor<STEP, DIR, EN>, N>,
    overflowed: bool,
}

impl<T, A, STEP, DIR, EN, const N: usize, const CAP: usize>
    MotionCoreBuilder<T, A, STEP, DIR, EN, N, CAP>
where
    T: StepTimer,
    A: AccelTimer,
    STEP: OutputPin,
    DIR: OutputPin,
    EN: OutputPin,
{
    /// Start a builder around the two hardware timers.
    pub fn new(step_timer: T, accel_timer: A) -> Self {
        Self {
            step_timer,
            accel_timer,
            config: MotionConfig::default(),
            motors: heapless::Vec::new(),
            overflowed: false,
        }
    }

    /// Use this configuration instead of the defaults.
    pub fn config(mut self, config: MotionConfig) -> Self {
        self.config = config;
        self
    }

    /// Register the next axis's motor.
    pub fn motor(mut self, motor: StepperMotor<STEP, DIR, EN>) -> Self {
        if self.motors.push(motor).is_err() {
            self.overflowed = true;
        }
        self
    }

    /// Validate the configuration and assemble the core.
    ///
    /// The ticker timers are programmed from the configuration and the
    /// drivers start disabled.
    pub fn build(self) -> Result<MotionCore<T, A, STEP, DIR, EN, N, CAP>> {
        validate_config(&self.config)?;

        if self.overflowed {
            return Err(BuildError::MotorSlotsExhausted { slots: N }.into());
        }
        if self.motors.is_empty() {
            return Err(BuildError::NoMotors.into());
        }

        let mut ticker = StepTicker::new(self.step_timer);
        ticker.set_frequency(self.config.base_stepping_frequency);
        ticker.set_reset_delay(self.config.pulse_width_seconds);

        for motor in self.motors {
            // Cannot fail: the vec never holds more motors than slots.
            let _ = ticker.register_motor(motor);
        }

        let mut accel_timer = self.accel_timer;
        accel_timer.set_frequency(self.config.acceleration_ticks_per_second);

        let mut controller = TrapezoidController::new(&self.config);
        controller.turn_enable_pins_off(&mut ticker);

        Ok(MotionCore::from_parts(
            ticker,
            accel_timer,
            controller,
            self.config,
        ))
    }
}
