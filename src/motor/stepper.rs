//! Per-axis stepper motor state and pulse emission.
//!
//! Each motor carries a 32.32 fixed-point phase accumulator: the inverse
//! step rate lives in `fx_ticks_per_step`, the accumulator gains one whole
//! tick (`1 << 32`) per base tick, and a pulse is emitted each time the
//! accumulator reaches the threshold. The pulse decision is a 64-bit add
//! and a compare, with no division on the tick path.

use embedded_hal::digital::OutputPin;

/// Fixed-point representation of one base tick (32.32).
const FX_ONE_TICK: u64 = 1 << 32;

/// Hard floor for the commanded step rate, in steps per second.
///
/// Below this the fixed-point inverse rate would grow without bound; the
/// trapezoid controller applies the configured floor separately.
const MINIMUM_STEPS_PER_SECOND: f32 = 20.0;

/// What a single base tick did on one motor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StepEvent {
    /// A step pulse was raised; the ticker must schedule the pulse-low edge.
    pub pulsed: bool,
    /// The move's final step was emitted this tick.
    pub finished: bool,
    /// The armed one-shot step signal was reached this tick.
    pub signalled: bool,
}

/// One axis of the machine: direction, remaining steps and the fixed-point
/// phase accumulator, driving a step/dir/enable pin triplet.
pub struct StepperMotor<STEP, DIR, EN>
where
    STEP: OutputPin,
    DIR: OutputPin,
    EN: OutputPin,
{
    step_pin: STEP,
    dir_pin: DIR,
    enable_pin: EN,

    invert_direction: bool,
    invert_enable: bool,

    moving: bool,
    paused: bool,
    direction: bool,

    steps_to_move: u32,
    stepped: u32,

    fx_counter: u64,
    fx_ticks_per_step: u64,

    steps_per_second: f32,
    rate_ratio: f32,

    is_move_finished: bool,
    step_signal_at: Option<u32>,
}

impl<STEP, DIR, EN> StepperMotor<STEP, DIR, EN>
where
    STEP: OutputPin,
    DIR: OutputPin,
    EN: OutputPin,
{
    /// Create a motor from its output pins.
    pub fn new(step_pin: STEP, dir_pin: DIR, enable_pin: EN) -> Self {
        Self {
            step_pin,
            dir_pin,
            enable_pin,
            invert_direction: false,
            invert_enable: false,
            moving: false,
            paused: false,
            direction: false,
            steps_to_move: 0,
            stepped: 0,
            fx_counter: 0,
            // An idle motor reports unbounded headroom to the catch-up scan.
            fx_ticks_per_step: u64::MAX,
            steps_per_second: 0.0,
            rate_ratio: 1.0,
            is_move_finished: false,
            step_signal_at: None,
        }
    }

    /// Invert the direction pin polarity (builder-style).
    pub fn with_inverted_direction(mut self) -> Self {
        self.invert_direction = true;
        self
    }

    /// Invert the enable pin polarity, for active-low driver boards
    /// (builder-style).
    pub fn with_inverted_enable(mut self) -> Self {
        self.invert_enable = true;
        self
    }

    /// Arm the motor for a move.
    ///
    /// Latches the direction output and resets the step and phase counters.
    /// A zero-step move clears any active state; the ticker removes the
    /// motor from its active set in that case.
    pub fn begin_move(&mut self, direction: bool, steps: u32) {
        debug_assert!(!self.moving || steps == 0);

        let high = direction != self.invert_direction;
        let _ = if high {
            self.dir_pin.set_high()
        } else {
            self.dir_pin.set_low()
        };

        self.direction = direction;
        self.steps_to_move = steps;
        self.stepped = 0;
        self.fx_counter = 0;
        self.is_move_finished = false;
        self.step_signal_at = None;
        self.moving = steps > 0;
    }

    /// Set the step rate, recomputing the fixed-point inverse rate.
    ///
    /// The rate saturates at a small hard floor so `fx_ticks_per_step`
    /// stays bounded.
    pub fn set_speed(&mut self, base_frequency: f32, steps_per_second: f32) {
        let steps_per_second = if steps_per_second < MINIMUM_STEPS_PER_SECOND {
            MINIMUM_STEPS_PER_SECOND
        } else {
            steps_per_second
        };
        self.steps_per_second = steps_per_second;
        self.fx_ticks_per_step =
            libm::floorf((base_frequency / steps_per_second) * 4_294_967_296.0) as u64;
    }

    /// Advance the phase accumulator by one base tick, emitting a pulse on
    /// threshold crossing. ISR context.
    pub fn tick(&mut self) -> StepEvent {
        let mut event = StepEvent::default();

        if self.paused || !self.moving {
            return event;
        }

        self.fx_counter += FX_ONE_TICK;
        if self.fx_counter >= self.fx_ticks_per_step {
            self.fx_counter -= self.fx_ticks_per_step;

            let _ = self.step_pin.set_high();
            self.stepped += 1;
            event.pulsed = true;

            debug_assert!(self.stepped <= self.steps_to_move);

            if let Some(at) = self.step_signal_at {
                if self.stepped == at {
                    self.step_signal_at = None;
                    event.signalled = true;
                }
            }

            if self.stepped == self.steps_to_move {
                self.moving = false;
                self.is_move_finished = true;
                event.finished = true;
            }
        }

        event
    }

    /// Drive the step output low. Called from the pulse-low timer path.
    #[inline]
    pub fn unstep(&mut self) {
        let _ = self.step_pin.set_low();
    }

    /// Arm a one-shot signal for when `stepped` reaches `at`.
    pub fn arm_step_signal(&mut self, at: u32) {
        self.step_signal_at = Some(at);
    }

    /// Consume the finished-move flag. Called by the ticker's drain.
    pub(crate) fn acknowledge_finished(&mut self) -> bool {
        let was = self.is_move_finished;
        self.is_move_finished = false;
        was
    }

    /// Gate pulse emission without losing accumulator state.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resume pulse emission.
    pub fn unpause(&mut self) {
        self.paused = false;
    }

    /// Drive the enable output.
    pub fn enable(&mut self, on: bool) {
        let high = on != self.invert_enable;
        let _ = if high {
            self.enable_pin.set_high()
        } else {
            self.enable_pin.set_low()
        };
    }

    /// Whole base ticks this motor can absorb without reaching its pulse
    /// threshold. Bounds the overrun catch-up's phantom advancement.
    #[inline]
    pub fn ticks_to_next_step(&self) -> u32 {
        let headroom = self.fx_ticks_per_step.saturating_sub(self.fx_counter) >> 32;
        headroom.min(u32::MAX as u64) as u32
    }

    /// Advance the phase accumulator by whole skipped ticks without pulsing.
    #[inline]
    pub(crate) fn phantom_advance(&mut self, ticks: u32) {
        self.fx_counter += (ticks as u64) << 32;
    }

    /// Whether a move is in progress.
    #[inline]
    pub fn moving(&self) -> bool {
        self.moving
    }

    /// Whether emission is currently gated by pause.
    #[inline]
    pub fn paused(&self) -> bool {
        self.paused
    }

    /// Latched direction of the current move.
    #[inline]
    pub fn direction(&self) -> bool {
        self.direction
    }

    /// Steps emitted so far in the current move.
    #[inline]
    pub fn stepped(&self) -> u32 {
        self.stepped
    }

    /// Step count of the current move.
    #[inline]
    pub fn steps_to_move(&self) -> u32 {
        self.steps_to_move
    }

    /// Whether the move completed and has not yet been drained.
    #[inline]
    pub fn is_move_finished(&self) -> bool {
        self.is_move_finished
    }

    /// Most recently commanded step rate, after the hard floor.
    #[inline]
    pub fn steps_per_second(&self) -> f32 {
        self.steps_per_second
    }

    /// This axis's steps per lead-axis step.
    #[inline]
    pub fn rate_ratio(&self) -> f32 {
        self.rate_ratio
    }

    /// Set this axis's steps per lead-axis step.
    pub fn set_rate_ratio(&mut self, ratio: f32) {
        self.rate_ratio = ratio;
    }
}
