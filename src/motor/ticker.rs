//! Base-frequency step ticker.
//!
//! The ticker owns the base match timer and up to `N` motor slots. On every
//! tick-compare match it advances each active motor's phase accumulator,
//! schedules the pulse-low edge when any motor pulsed, drains finished
//! moves, and compensates for handler overruns by phantom-advancing the
//! accumulators over ticks that provably cannot pulse. Missing a pulse
//! would lose machine position; skipping non-pulsing ticks is safe.

use embedded_hal::digital::OutputPin;

use crate::timer::{MatchEvents, StepTimer};

use super::stepper::StepperMotor;

/// Value the tick compare is parked at while finish handling runs.
const PARK: u32 = u32::MAX;

/// What a base tick amounted to, reported to the caller so it can run the
/// finished-move and rate-synchronisation handling at the right points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TickPhase {
    /// No motor pulsed (or the invocation was pulse-low only). The tick
    /// compare was restored; nothing further to do.
    Quiet,
    /// Pulses were emitted but no move completed.
    Pulsed {
        /// Bitmap of motors whose one-shot step signal fired.
        signalled: u32,
    },
    /// At least one motor emitted its final step. The tick compare is
    /// parked; the caller must walk the active set, service every motor
    /// whose move finished, and then call [`StepTicker::finish_tick`].
    Finishing {
        /// Bitmap of motors whose one-shot step signal fired.
        signalled: u32,
    },
}

/// Fixed-capacity pulse dispatcher over `N` motor slots (`N` at most 32).
pub struct StepTicker<T, STEP, DIR, EN, const N: usize>
where
    T: StepTimer,
    STEP: OutputPin,
    DIR: OutputPin,
    EN: OutputPin,
{
    timer: T,
    motors: [Option<StepperMotor<STEP, DIR, EN>>; N],
    active_motor_bm: u32,

    frequency: f32,
    period: u32,
    reset_delay: u32,

    reset_step_pins: bool,
    moves_finished: bool,

    last_duration: u32,
    overrun_count: u32,
}

impl<T, STEP, DIR, EN, const N: usize> StepTicker<T, STEP, DIR, EN, N>
where
    T: StepTimer,
    STEP: OutputPin,
    DIR: OutputPin,
    EN: OutputPin,
{
    /// Create a ticker owning the base timer. The timer stays idle until
    /// the first motor enters the active set.
    pub fn new(mut timer: T) -> Self {
        debug_assert!(N > 0 && N <= 32);
        timer.set_tick_compare(PARK);
        Self {
            timer,
            motors: core::array::from_fn(|_| None),
            active_motor_bm: 0,
            frequency: 0.0,
            period: 0,
            reset_delay: 0,
            reset_step_pins: false,
            moves_finished: false,
            last_duration: 0,
            overrun_count: 0,
        }
    }

    /// Set the base stepping frequency.
    ///
    /// If the timer already passed the new compare value, it is restarted
    /// so the next match fires promptly.
    pub fn set_frequency(&mut self, frequency: f32) {
        self.frequency = frequency;
        self.period = libm::floorf(self.timer.ticks_per_second() as f32 / frequency) as u32;
        debug_assert!(self.period > 0);
        self.timer.set_tick_compare(self.period);
        if self.timer.counter() > self.period {
            self.timer.restart();
        }
    }

    /// Set the pulse width (delay from pulse-high to pulse-low).
    pub fn set_reset_delay(&mut self, seconds: f32) {
        self.reset_delay = libm::floorf(self.timer.ticks_per_second() as f32 * seconds) as u32;
        self.timer.set_unstep_compare(self.reset_delay);
    }

    /// Put a motor into the first free slot.
    ///
    /// Returns the slot index, or the motor back when every slot is taken.
    pub fn register_motor(
        &mut self,
        motor: StepperMotor<STEP, DIR, EN>,
    ) -> Result<usize, StepperMotor<STEP, DIR, EN>> {
        match self.motors.iter().position(|slot| slot.is_none()) {
            Some(i) => {
                self.motors[i] = Some(motor);
                Ok(i)
            }
            None => Err(motor),
        }
    }

    /// Take a motor out of its slot, dropping it from the active set.
    pub fn unregister_motor(&mut self, index: usize) -> Option<StepperMotor<STEP, DIR, EN>> {
        self.remove_motor_from_active_list(index);
        self.motors.get_mut(index).and_then(|slot| slot.take())
    }

    /// Borrow a registered motor.
    #[inline]
    pub fn motor(&self, index: usize) -> Option<&StepperMotor<STEP, DIR, EN>> {
        self.motors.get(index).and_then(|slot| slot.as_ref())
    }

    /// Mutably borrow a registered motor.
    #[inline]
    pub fn motor_mut(&mut self, index: usize) -> Option<&mut StepperMotor<STEP, DIR, EN>> {
        self.motors.get_mut(index).and_then(|slot| slot.as_mut())
    }

    /// Arm a motor for a move and maintain the active set.
    ///
    /// A zero-step move deactivates the motor instead.
    pub fn move_motor(&mut self, index: usize, direction: bool, steps: u32) {
        if let Some(motor) = self.motors.get_mut(index).and_then(|slot| slot.as_mut()) {
            motor.begin_move(direction, steps);
            if steps > 0 {
                self.add_motor_to_active_list(index);
            } else {
                self.remove_motor_from_active_list(index);
            }
        }
    }

    /// Set one motor's step rate against the base frequency.
    pub fn set_motor_speed(&mut self, index: usize, steps_per_second: f32) {
        let frequency = self.frequency;
        if let Some(motor) = self.motors.get_mut(index).and_then(|slot| slot.as_mut()) {
            motor.set_speed(frequency, steps_per_second);
        }
    }

    /// Whether any registered motor is mid-move.
    pub fn any_moving(&self) -> bool {
        self.motors.iter().flatten().any(|motor| motor.moving())
    }

    /// Push a lead-axis rate down to every moving motor, scaled by its
    /// rate ratio.
    pub fn apply_rate(&mut self, steps_per_second: f32) {
        let frequency = self.frequency;
        for motor in self.motors.iter_mut().flatten() {
            if motor.moving() {
                let scaled = steps_per_second * motor.rate_ratio();
                motor.set_speed(frequency, scaled);
            }
        }
    }

    /// Add a motor to the active set. The first activation resumes the
    /// base timer from zero.
    pub fn add_motor_to_active_list(&mut self, index: usize) {
        let was_empty = self.active_motor_bm == 0;
        self.active_motor_bm |= 1 << index;
        if was_empty {
            self.timer.set_tick_compare(self.period);
            self.timer.resume();
        }
    }

    /// Remove a motor from the active set. Removing the last motor halts
    /// the timer after the pending pulse-low edge lands.
    pub fn remove_motor_from_active_list(&mut self, index: usize) {
        self.active_motor_bm &= !(1 << index);
        if self.active_motor_bm == 0 {
            self.timer.halt_after_unstep();
        }
    }

    /// Whether any motor is in the active set.
    #[inline]
    pub fn has_active_motors(&self) -> bool {
        self.active_motor_bm != 0
    }

    /// Bitmap of active motors.
    #[inline]
    pub fn active_motor_bm(&self) -> u32 {
        self.active_motor_bm
    }

    /// Base stepping frequency in Hz.
    #[inline]
    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    /// Timer ticks per base tick.
    #[inline]
    pub fn period(&self) -> u32 {
        self.period
    }

    /// Pulse width in timer ticks.
    #[inline]
    pub fn reset_delay(&self) -> u32 {
        self.reset_delay
    }

    /// Current base timer counter, for phase-aligning the acceleration
    /// timer.
    #[inline]
    pub fn timer_counter(&self) -> u32 {
        self.timer.counter()
    }

    /// Wall time the previous overrun handling took, in timer ticks.
    #[inline]
    pub fn last_duration(&self) -> u32 {
        self.last_duration
    }

    /// Number of base ticks that overran one period.
    #[inline]
    pub fn overrun_count(&self) -> u32 {
        self.overrun_count
    }

    /// Pause every registered motor.
    pub fn pause_all(&mut self) {
        for slot in self.motors.iter_mut().flatten() {
            slot.pause();
        }
    }

    /// Resume every registered motor.
    pub fn unpause_all(&mut self) {
        for slot in self.motors.iter_mut().flatten() {
            slot.unpause();
        }
    }

    /// Drive every registered motor's enable output.
    pub fn enable_all(&mut self, on: bool) {
        for slot in self.motors.iter_mut().flatten() {
            slot.enable(on);
        }
    }

    /// The base timer match handler, first half.
    ///
    /// Services a late pulse-low edge before anything else so the low edge
    /// always precedes the next high edge, ticks every active motor, and
    /// arms the pulse-low interrupt when any motor pulsed. When a move
    /// finished this tick, the tick compare is parked and the finished
    /// motors are drained; the caller must run its finished-move handling
    /// and then [`StepTicker::finish_tick`].
    pub fn pre_tick(&mut self, events: MatchEvents) -> TickPhase {
        if events.unstep {
            self.timer.set_unstep_interrupt(false);
            self.reset_tick();
        }

        if !events.tick {
            return TickPhase::Quiet;
        }

        let mut signalled = 0u32;
        let mut bm = self.active_motor_bm;
        while bm != 0 {
            let i = bm.trailing_zeros() as usize;
            bm &= bm - 1;
            if let Some(motor) = self.motors[i].as_mut() {
                let event = motor.tick();
                if event.pulsed {
                    self.reset_step_pins = true;
                }
                if event.finished {
                    self.moves_finished = true;
                }
                if event.signalled {
                    signalled |= 1 << i;
                }
            }
        }

        if self.reset_step_pins {
            self.timer.set_unstep_interrupt(true);
            self.reset_step_pins = false;
        } else {
            // Nothing pulsed, so nothing can have finished either.
            self.timer.set_tick_compare(self.period);
            return TickPhase::Quiet;
        }

        if self.moves_finished {
            self.timer.set_tick_compare(PARK);
            TickPhase::Finishing { signalled }
        } else {
            TickPhase::Pulsed { signalled }
        }
    }

    /// Clear the finished-moves latch once the active set has been walked.
    pub(crate) fn clear_moves_finished(&mut self) {
        self.moves_finished = false;
    }

    /// The base timer match handler, second half; run after finished-move
    /// handling so its cost is included in the overrun measurement.
    ///
    /// If the handler ran past one period, computes how many ticks to skip,
    /// caps it to the number of whole ticks every active motor can absorb
    /// without pulsing, phantom-advances the accumulators by that amount
    /// and schedules the next match past the skipped span.
    pub fn finish_tick(&mut self) {
        if self.timer.counter() > self.period {
            self.overrun_count = self.overrun_count.wrapping_add(1);
            let start_tc = self.timer.counter();

            // The current tick does not count, but the time the previous
            // catch-up computation took does.
            let ticks_to_skip = (start_tc + self.last_duration) / self.period;

            let mut ticks_we_actually_can_skip = ticks_to_skip;
            let mut bm = self.active_motor_bm;
            while bm != 0 {
                let i = bm.trailing_zeros() as usize;
                bm &= bm - 1;
                if let Some(motor) = self.motors[i].as_ref() {
                    ticks_we_actually_can_skip =
                        ticks_we_actually_can_skip.min(motor.ticks_to_next_step());
                }
            }

            let mut bm = self.active_motor_bm;
            while bm != 0 {
                let i = bm.trailing_zeros() as usize;
                bm &= bm - 1;
                if let Some(motor) = self.motors[i].as_mut() {
                    motor.phantom_advance(ticks_we_actually_can_skip);
                }
            }

            self.timer
                .set_tick_compare((ticks_to_skip + 1) * self.period);

            let elapsed = self.timer.counter().saturating_sub(start_tc);
            if elapsed > 0 {
                self.last_duration = elapsed;
            }
        } else {
            self.timer.set_tick_compare(self.period);
        }

        while self.timer.counter() > self.timer.tick_compare() {
            let compare = self.timer.tick_compare();
            self.timer.set_tick_compare(compare + self.period);
        }
    }

    /// Lower every active motor's step output (the pulse-low edge).
    pub fn reset_tick(&mut self) {
        let mut bm = self.active_motor_bm;
        while bm != 0 {
            let i = bm.trailing_zeros() as usize;
            bm &= bm - 1;
            if let Some(motor) = self.motors[i].as_mut() {
                motor.unstep();
            }
        }
    }
}
