//! Trapezoid rate controller.
//!
//! Runs at the acceleration-tick cadence, reads the current block's profile
//! and the lead motor's progress, and pushes the adjusted rate down to the
//! ticker. The accelerate / cruise / decelerate decisions are made against
//! lead-axis step counts; non-lead axes follow through their rate ratios.

use embedded_hal::digital::OutputPin;

use crate::block::AXES;
use crate::config::MotionConfig;
use crate::conveyor::{BlockId, Conveyor};
use crate::gcode::Gcode;
use crate::motor::StepTicker;
use crate::timer::{AccelTimer, StepTimer};

/// What one trapezoid tick did, reported to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TrapezoidOutcome {
    /// The rate pushed to the motors this tick, after the configured floor.
    pub published_rate: Option<f32>,
    /// The current block was released and its refcount reached zero
    /// (flush termination).
    pub block_released: bool,
}

/// The trapezoid generator: block-scoped acceleration state plus the
/// enable-pin status shared with the M17/M18/M84 handling.
pub struct TrapezoidController {
    current_block: Option<BlockId>,
    main_stepper: Option<usize>,
    trapezoid_adjusted_rate: f32,
    acceleration_ticks_per_second: u32,
    minimum_steps_per_second: f32,
    paused: bool,
    force_speed_update: bool,
    enable_pins_status: bool,
}

impl TrapezoidController {
    /// Create a controller from configuration.
    pub fn new(config: &MotionConfig) -> Self {
        Self {
            current_block: None,
            main_stepper: None,
            trapezoid_adjusted_rate: 0.0,
            acceleration_ticks_per_second: config.acceleration_ticks_per_second,
            minimum_steps_per_second: config.minimum_steps_per_second(),
            paused: false,
            force_speed_update: false,
            enable_pins_status: false,
        }
    }

    /// Re-read configuration. Steppers start disabled after a reload.
    pub fn on_config_reload<T, STEP, DIR, EN, const N: usize>(
        &mut self,
        config: &MotionConfig,
        ticker: &mut StepTicker<T, STEP, DIR, EN, N>,
    ) where
        T: StepTimer,
        STEP: OutputPin,
        DIR: OutputPin,
        EN: OutputPin,
    {
        self.acceleration_ticks_per_second = config.acceleration_ticks_per_second;
        self.minimum_steps_per_second = config.minimum_steps_per_second();
        self.turn_enable_pins_off(ticker);
    }

    /// A block became current: program the motors and prime the trapezoid.
    ///
    /// Zero-length blocks and blocks without cartesian steps are ignored
    /// (their refcount is untouched, so the conveyor skips past them).
    /// Returns the initially published rate, if the block was accepted.
    pub fn on_block_begin<T, STEP, DIR, EN, A, const N: usize, const CAP: usize>(
        &mut self,
        id: BlockId,
        conveyor: &Conveyor<CAP>,
        ticker: &mut StepTicker<T, STEP, DIR, EN, N>,
        accel: &mut A,
    ) -> Option<f32>
    where
        T: StepTimer,
        STEP: OutputPin,
        DIR: OutputPin,
        EN: OutputPin,
        A: AccelTimer,
    {
        let block = *conveyor.block(id);

        if block.millimeters == 0.0 {
            return None;
        }
        if !block.has_steps() {
            return None;
        }
        conveyor.take(id);

        if !self.enable_pins_status {
            self.turn_enable_pins_on(ticker);
        }

        self.current_block = Some(id);
        self.trapezoid_adjusted_rate = block.initial_rate;
        self.force_speed_update = true;

        // The axis with the most steps drives the trapezoid state; its
        // progress is what accelerate_until / decelerate_after refer to.
        self.main_stepper = Some(block.lead_axis());

        for axis in 0..AXES {
            if block.steps[axis] > 0 {
                ticker.move_motor(axis, block.direction(axis), block.steps[axis]);
                if let Some(motor) = ticker.motor_mut(axis) {
                    motor.set_rate_ratio(
                        block.steps[axis] as f32 / block.steps_event_count as f32,
                    );
                }
            }
        }

        // Apply the entry rate now; the pending acceleration interrupt then
        // takes over right after the current step interrupt exits.
        let outcome = self.trapezoid_generator_tick(conveyor, ticker);
        self.synchronize_acceleration(conveyor, ticker, accel);

        outcome.published_rate
    }

    /// The current block left the conveyor.
    pub fn on_block_end(&mut self) {
        self.current_block = None;
    }

    /// An axis finished its move. Releases the current block once every
    /// axis has stopped; returns `true` when the refcount reached zero.
    pub fn stepper_motor_finished_move<T, STEP, DIR, EN, const N: usize, const CAP: usize>(
        &mut self,
        conveyor: &Conveyor<CAP>,
        ticker: &StepTicker<T, STEP, DIR, EN, N>,
    ) -> bool
    where
        T: StepTimer,
        STEP: OutputPin,
        DIR: OutputPin,
        EN: OutputPin,
    {
        if ticker.any_moving() {
            return false;
        }

        match self.current_block {
            Some(id) => conveyor.release(id),
            None => false,
        }
    }

    /// Gate pulse emission on every motor without losing state.
    pub fn on_pause<T, STEP, DIR, EN, const N: usize>(
        &mut self,
        ticker: &mut StepTicker<T, STEP, DIR, EN, N>,
    ) where
        T: StepTimer,
        STEP: OutputPin,
        DIR: OutputPin,
        EN: OutputPin,
    {
        self.paused = true;
        ticker.pause_all();
    }

    /// Resume the profile from where it paused.
    pub fn on_play<T, STEP, DIR, EN, const N: usize>(
        &mut self,
        ticker: &mut StepTicker<T, STEP, DIR, EN, N>,
    ) where
        T: StepTimer,
        STEP: OutputPin,
        DIR: OutputPin,
        EN: OutputPin,
    {
        self.paused = false;
        ticker.unpause_all();
    }

    /// One acceleration tick: walk the trapezoid state machine and push the
    /// resulting rate to the motors.
    pub fn trapezoid_generator_tick<T, STEP, DIR, EN, const N: usize, const CAP: usize>(
        &mut self,
        conveyor: &Conveyor<CAP>,
        ticker: &mut StepTicker<T, STEP, DIR, EN, N>,
    ) -> TrapezoidOutcome
    where
        T: StepTimer,
        STEP: OutputPin,
        DIR: OutputPin,
        EN: OutputPin,
    {
        let mut outcome = TrapezoidOutcome::default();

        let Some(id) = self.current_block else {
            return outcome;
        };
        if self.paused || !ticker.has_active_motors() {
            return outcome;
        }

        let block = *conveyor.block(id);
        let current_steps_completed = self
            .main_stepper
            .and_then(|main| ticker.motor(main))
            .map(|motor| motor.stepped())
            .unwrap_or(0);

        if self.force_speed_update {
            // The rate was just reset by a block begin; publish it as-is.
            self.force_speed_update = false;
        } else if conveyor.flushing() {
            // Drain request: decelerate to the half-delta floor, then abort
            // the block.
            if self.trapezoid_adjusted_rate > block.rate_delta * 1.5 {
                self.trapezoid_adjusted_rate -= block.rate_delta;
            } else if self.trapezoid_adjusted_rate == block.rate_delta * 0.5 {
                for axis in 0..AXES {
                    let direction = ticker
                        .motor(axis)
                        .map(|motor| motor.direction())
                        .unwrap_or(false);
                    ticker.move_motor(axis, direction, 0);
                }
                outcome.block_released = conveyor.release(id);
                return outcome;
            } else {
                self.trapezoid_adjusted_rate = block.rate_delta * 0.5;
            }
        } else if current_steps_completed <= block.accelerate_until + 1 {
            self.trapezoid_adjusted_rate += block.rate_delta;
            if self.trapezoid_adjusted_rate > block.nominal_rate {
                self.trapezoid_adjusted_rate = block.nominal_rate;
            }
        } else if current_steps_completed > block.decelerate_after {
            // Only reduce while the result stays above the half-delta
            // floor; that floor absorbs end-of-move rounding.
            if self.trapezoid_adjusted_rate > block.rate_delta * 1.5 {
                self.trapezoid_adjusted_rate -= block.rate_delta;
            } else {
                self.trapezoid_adjusted_rate = block.rate_delta * 0.5;
            }
            if self.trapezoid_adjusted_rate < block.final_rate {
                self.trapezoid_adjusted_rate = block.final_rate;
            }
        } else if self.trapezoid_adjusted_rate != block.nominal_rate {
            self.trapezoid_adjusted_rate = block.nominal_rate;
        }

        outcome.published_rate =
            Some(self.set_step_events_per_second(self.trapezoid_adjusted_rate, ticker));
        outcome
    }

    /// Phase-align the acceleration timer with the step timer.
    ///
    /// Forces the acceleration interrupt to pend and copies the step-timer
    /// counter over. At a block begin this also arms a one-shot step signal
    /// at the deceleration boundary so the same alignment happens there.
    pub fn synchronize_acceleration<T, STEP, DIR, EN, A, const N: usize, const CAP: usize>(
        &mut self,
        conveyor: &Conveyor<CAP>,
        ticker: &mut StepTicker<T, STEP, DIR, EN, N>,
        accel: &mut A,
    ) where
        T: StepTimer,
        STEP: OutputPin,
        DIR: OutputPin,
        EN: OutputPin,
        A: AccelTimer,
    {
        let Some(main) = self.main_stepper else {
            return;
        };

        accel.force_pending();
        accel.set_counter(ticker.timer_counter());

        let stepped = ticker.motor(main).map(|motor| motor.stepped()).unwrap_or(0);
        if stepped == 0 {
            if let Some(id) = self.current_block {
                let block = conveyor.block(id);
                let steps_to_move = ticker
                    .motor(main)
                    .map(|motor| motor.steps_to_move())
                    .unwrap_or(0);
                if block.decelerate_after > 0 && block.decelerate_after < steps_to_move {
                    let at = block.decelerate_after;
                    if let Some(motor) = ticker.motor_mut(main) {
                        motor.arm_step_signal(at);
                    }
                }
            }
        }
    }

    /// Append driver enable/disable commands to the tail block so they are
    /// sequenced with motion; execute immediately when the queue is empty.
    pub fn on_gcode_received<T, STEP, DIR, EN, const N: usize, const CAP: usize>(
        &mut self,
        gcode: Gcode,
        conveyor: &mut Conveyor<CAP>,
        ticker: &mut StepTicker<T, STEP, DIR, EN, N>,
    ) where
        T: StepTimer,
        STEP: OutputPin,
        DIR: OutputPin,
        EN: OutputPin,
    {
        if !gcode.is_enable_command() {
            return;
        }
        // Only a block that has not begun yet can still carry the command;
        // otherwise it takes effect right away.
        let tail = conveyor.tail();
        if tail.is_some() && tail != self.current_block {
            if conveyor.attach_gcode(gcode).is_ok() {
                return;
            }
        }
        self.on_gcode_execute(&gcode, ticker);
    }

    /// React to M17 (enable) and M18/M84 (disable, unless restricted to the
    /// extruder with 'E').
    pub fn on_gcode_execute<T, STEP, DIR, EN, const N: usize>(
        &mut self,
        gcode: &Gcode,
        ticker: &mut StepTicker<T, STEP, DIR, EN, N>,
    ) where
        T: StepTimer,
        STEP: OutputPin,
        DIR: OutputPin,
        EN: OutputPin,
    {
        match gcode.m {
            Some(17) => self.turn_enable_pins_on(ticker),
            Some(18) | Some(84) if !gcode.has_letter('E') => {
                self.turn_enable_pins_off(ticker)
            }
            _ => {}
        }
    }

    /// Clamp a rate to the configured floor and push it to every moving
    /// motor, scaled by each motor's rate ratio. Returns the clamped rate.
    fn set_step_events_per_second<T, STEP, DIR, EN, const N: usize>(
        &mut self,
        steps_per_second: f32,
        ticker: &mut StepTicker<T, STEP, DIR, EN, N>,
    ) -> f32
    where
        T: StepTimer,
        STEP: OutputPin,
        DIR: OutputPin,
        EN: OutputPin,
    {
        let steps_per_second = if steps_per_second < self.minimum_steps_per_second {
            self.minimum_steps_per_second
        } else {
            steps_per_second
        };

        ticker.apply_rate(steps_per_second);
        steps_per_second
    }

    /// Energise every driver.
    pub fn turn_enable_pins_on<T, STEP, DIR, EN, const N: usize>(
        &mut self,
        ticker: &mut StepTicker<T, STEP, DIR, EN, N>,
    ) where
        T: StepTimer,
        STEP: OutputPin,
        DIR: OutputPin,
        EN: OutputPin,
    {
        ticker.enable_all(true);
        self.enable_pins_status = true;
    }

    /// De-energise every driver.
    pub fn turn_enable_pins_off<T, STEP, DIR, EN, const N: usize>(
        &mut self,
        ticker: &mut StepTicker<T, STEP, DIR, EN, N>,
    ) where
        T: StepTimer,
        STEP: OutputPin,
        DIR: OutputPin,
        EN: OutputPin,
    {
        ticker.enable_all(false);
        self.enable_pins_status = false;
    }

    /// The block currently executing, if any.
    #[inline]
    pub fn current_block(&self) -> Option<BlockId> {
        self.current_block
    }

    /// Slot index of the lead axis of the current block.
    #[inline]
    pub fn main_stepper(&self) -> Option<usize> {
        self.main_stepper
    }

    /// Current commanded lead-axis rate in steps per second.
    #[inline]
    pub fn trapezoid_adjusted_rate(&self) -> f32 {
        self.trapezoid_adjusted_rate
    }

    /// Configured trapezoid cadence in ticks per second.
    #[inline]
    pub fn acceleration_ticks_per_second(&self) -> u32 {
        self.acceleration_ticks_per_second
    }

    /// Configured step-rate floor in steps per second.
    #[inline]
    pub fn minimum_steps_per_second(&self) -> f32 {
        self.minimum_steps_per_second
    }

    /// Whether the controller is paused.
    #[inline]
    pub fn paused(&self) -> bool {
        self.paused
    }

    /// Whether the drivers are currently energised.
    #[inline]
    pub fn drivers_enabled(&self) -> bool {
        self.enable_pins_status
    }
}
