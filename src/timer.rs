//! Hardware timer abstractions.
//!
//! The pulse generator consumes two match timers: a base timer with a tick
//! compare (pulse-high cadence) and an unstep compare (pulse-low delay), and
//! a slower acceleration timer with a software-pendable interrupt. These
//! traits are the seam between the core and the platform; the platform's
//! interrupt handlers read and clear their own match flags, then forward
//! them as [`MatchEvents`].

/// Which match registers of the base timer fired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MatchEvents {
    /// The tick compare (pulse-high cadence) matched.
    pub tick: bool,
    /// The unstep compare (pulse-low delay) matched.
    pub unstep: bool,
}

/// The base step timer.
///
/// The hardware must reset its counter to zero on every tick-compare match,
/// so that within the handler the counter reads as time elapsed since the
/// start of the current tick.
pub trait StepTimer {
    /// Timer counting rate in ticks per second.
    fn ticks_per_second(&self) -> u32;

    /// Current counter value (ticks since the last tick-compare match).
    fn counter(&self) -> u32;

    /// Program the tick compare register.
    fn set_tick_compare(&mut self, ticks: u32);

    /// Read back the tick compare register.
    fn tick_compare(&self) -> u32;

    /// Program the unstep compare register (pulse-low delay from tick start).
    fn set_unstep_compare(&mut self, ticks: u32);

    /// Enable or disable the unstep-compare interrupt.
    fn set_unstep_interrupt(&mut self, enabled: bool);

    /// Reset the counter and (re)start counting.
    fn restart(&mut self);

    /// Arm the timer to halt at the next unstep-compare match.
    ///
    /// Used when the last motor leaves the active set: the final pulse-low
    /// edge must still land before the timer idles.
    fn halt_after_unstep(&mut self);

    /// Cancel a pending halt and resume counting from zero.
    fn resume(&mut self);
}

/// The acceleration timer driving the trapezoid controller cadence.
pub trait AccelTimer {
    /// Program the interrupt rate in ticks per second.
    fn set_frequency(&mut self, hz: u32);

    /// Force the interrupt to pend so the handler runs as soon as the
    /// current (higher-priority) interrupt exits.
    fn force_pending(&mut self);

    /// Overwrite the counter, phase-aligning this timer with the step timer.
    fn set_counter(&mut self, ticks: u32);
}
