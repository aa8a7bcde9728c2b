//! Step-level simulation harness.
//!
//! Emulates the two match timers and the axis output pins in software and
//! drives a [`MotionCore`] event by event: advance the clocks to the next
//! match, dispatch the interrupt handlers the way the hardware would, and
//! record every pin edge with its timestamp for later assertions.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use embedded_hal::digital::{ErrorType, OutputPin};
use step_pulse::{
    AccelTimer, MatchEvents, MotionConfig, MotionCore, MotionCoreBuilder, StepTimer, StepperMotor,
};

/// Timer clock shared by both sim timers, in ticks per second.
pub const TIMER_HZ: u32 = 1_000_000;

/// The core type under test: three axes, eight block slots.
pub type TestCore = MotionCore<SimStepTimer, SimAccelTimer, SimPin, SimPin, SimPin, 3, 8>;

// ---------------------------------------------------------------------------
// Pins
// ---------------------------------------------------------------------------

/// An output pin recording level transitions with sim timestamps.
#[derive(Clone)]
pub struct SimPin {
    clock: Rc<Cell<u64>>,
    level: Rc<Cell<bool>>,
    edges: Rc<RefCell<Vec<(u64, bool)>>>,
}

impl SimPin {
    fn new(clock: Rc<Cell<u64>>) -> Self {
        Self {
            clock,
            level: Rc::new(Cell::new(false)),
            edges: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Current output level.
    pub fn level(&self) -> bool {
        self.level.get()
    }

    /// All recorded transitions as `(timestamp, new_level)`.
    pub fn edges(&self) -> Vec<(u64, bool)> {
        self.edges.borrow().clone()
    }

    /// Number of low-to-high transitions.
    pub fn rising_edges(&self) -> usize {
        self.edges.borrow().iter().filter(|&&(_, level)| level).count()
    }

    fn write(&mut self, level: bool) {
        if self.level.get() != level {
            self.level.set(level);
            self.edges.borrow_mut().push((self.clock.get(), level));
        }
    }
}

impl ErrorType for SimPin {
    type Error = core::convert::Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write(true);
        Ok(())
    }
}

/// The three output pins of one axis.
#[derive(Clone)]
pub struct AxisPins {
    pub step: SimPin,
    pub dir: SimPin,
    pub enable: SimPin,
}

// ---------------------------------------------------------------------------
// Timers
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StepTimerState {
    tc: u32,
    tick_cmp: u32,
    unstep_cmp: u32,
    unstep_irq: bool,
    running: bool,
    halt_armed: bool,
}

/// Sim model of the base match timer: counter resets on tick match, can be
/// armed to halt at the next unstep match.
#[derive(Clone)]
pub struct SimStepTimer(Rc<RefCell<StepTimerState>>);

impl SimStepTimer {
    fn new() -> Self {
        Self(Rc::new(RefCell::new(StepTimerState::default())))
    }

    /// Programmed tick compare value.
    pub fn tick_compare_value(&self) -> u32 {
        self.0.borrow().tick_cmp
    }
}

impl StepTimer for SimStepTimer {
    fn ticks_per_second(&self) -> u32 {
        TIMER_HZ
    }
    fn counter(&self) -> u32 {
        self.0.borrow().tc
    }
    fn set_tick_compare(&mut self, ticks: u32) {
        self.0.borrow_mut().tick_cmp = ticks;
    }
    fn tick_compare(&self) -> u32 {
        self.0.borrow().tick_cmp
    }
    fn set_unstep_compare(&mut self, ticks: u32) {
        self.0.borrow_mut().unstep_cmp = ticks;
    }
    fn set_unstep_interrupt(&mut self, enabled: bool) {
        self.0.borrow_mut().unstep_irq = enabled;
    }
    fn restart(&mut self) {
        let mut state = self.0.borrow_mut();
        state.tc = 0;
        state.running = true;
    }
    fn halt_after_unstep(&mut self) {
        self.0.borrow_mut().halt_armed = true;
    }
    fn resume(&mut self) {
        let mut state = self.0.borrow_mut();
        state.halt_armed = false;
        state.tc = 0;
        state.running = true;
    }
}

#[derive(Default)]
struct AccelTimerState {
    tc: u32,
    period: u32,
    pending: bool,
}

/// Sim model of the acceleration timer: free running with a software
/// pending bit.
#[derive(Clone)]
pub struct SimAccelTimer(Rc<RefCell<AccelTimerState>>);

impl SimAccelTimer {
    fn new() -> Self {
        Self(Rc::new(RefCell::new(AccelTimerState::default())))
    }
}

impl AccelTimer for SimAccelTimer {
    fn set_frequency(&mut self, hz: u32) {
        self.0.borrow_mut().period = TIMER_HZ / hz;
    }
    fn force_pending(&mut self) {
        self.0.borrow_mut().pending = true;
    }
    fn set_counter(&mut self, ticks: u32) {
        self.0.borrow_mut().tc = ticks;
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Latency to inject into upcoming base timer handler invocations.
pub type CostHook = Box<dyn FnMut(&TestCore) -> Option<u32>>;

/// The simulated machine: core plus handles to every emulated resource.
pub struct Sim {
    pub core: TestCore,
    pub clock: Rc<Cell<u64>>,
    pub step_timer: SimStepTimer,
    pub accel_timer: SimAccelTimer,
    pub axes: Vec<AxisPins>,
    /// Evaluated before each tick dispatch; `Some(ticks)` makes the handler
    /// appear to have run that long.
    pub cost_hook: Option<CostHook>,
}

/// A cruise/trapezoid config used by most scenarios: 10 kHz base stepping,
/// 100 Hz acceleration ticks, 3 µs pulses.
pub fn sim_config() -> MotionConfig {
    MotionConfig {
        acceleration_ticks_per_second: 100,
        minimum_steps_per_minute: 3000.0,
        base_stepping_frequency: 10_000.0,
        pulse_width_seconds: 3e-6,
    }
}

impl Sim {
    /// Build a three-axis machine around `config`.
    pub fn new(config: MotionConfig) -> Self {
        let clock = Rc::new(Cell::new(0u64));
        let step_timer = SimStepTimer::new();
        let accel_timer = SimAccelTimer::new();

        let axes: Vec<AxisPins> = (0..3)
            .map(|_| AxisPins {
                step: SimPin::new(clock.clone()),
                dir: SimPin::new(clock.clone()),
                enable: SimPin::new(clock.clone()),
            })
            .collect();

        let mut builder = MotionCoreBuilder::new(step_timer.clone(), accel_timer.clone())
            .config(config);
        for axis in &axes {
            builder = builder.motor(StepperMotor::new(
                axis.step.clone(),
                axis.dir.clone(),
                axis.enable.clone(),
            ));
        }
        let core = builder.build().expect("sim core builds");

        Self {
            core,
            clock,
            step_timer,
            accel_timer,
            axes,
            cost_hook: None,
        }
    }

    /// Advance to the next timer event and dispatch it. Returns `false`
    /// when no event can ever fire (all timers idle).
    pub fn step_event(&mut self) -> bool {
        let (dt, fire_tick, fire_unstep, fire_accel) = {
            let st = self.step_timer.0.borrow();
            let at = self.accel_timer.0.borrow();

            let mut next: Option<u64> = None;
            let mut consider = |delta: u64| {
                next = Some(next.map_or(delta, |d: u64| d.min(delta)));
            };

            if st.running {
                consider(st.tick_cmp.saturating_sub(st.tc) as u64);
                if st.unstep_irq {
                    consider(st.unstep_cmp.saturating_sub(st.tc) as u64);
                }
            }
            if at.period > 0 {
                if at.pending {
                    consider(0);
                } else {
                    consider(at.period.saturating_sub(at.tc) as u64);
                }
            }

            let Some(dt) = next else {
                return false;
            };

            let tick_tc = st.tc as u64 + dt;
            let fire_tick = st.running && tick_tc >= st.tick_cmp as u64;
            let fire_unstep = st.running && st.unstep_irq && tick_tc >= st.unstep_cmp as u64;
            let accel_tc = at.tc as u64 + dt;
            let fire_accel =
                at.period > 0 && (at.pending || accel_tc >= at.period as u64);
            (dt, fire_tick, fire_unstep, fire_accel)
        };

        // Advance both clocks.
        self.clock.set(self.clock.get() + dt);
        {
            let mut st = self.step_timer.0.borrow_mut();
            if st.running {
                st.tc = (st.tc as u64 + dt).min(u32::MAX as u64) as u32;
            }
            let mut at = self.accel_timer.0.borrow_mut();
            at.tc = (at.tc as u64 + dt).min(u32::MAX as u64) as u32;
        }

        if fire_tick || fire_unstep {
            let events = MatchEvents {
                tick: fire_tick,
                unstep: fire_unstep,
            };

            {
                let mut st = self.step_timer.0.borrow_mut();
                if fire_tick {
                    // Hardware resets the counter on the tick match.
                    st.tc = 0;
                }
                if fire_unstep && st.halt_armed {
                    st.running = false;
                    st.tc = 0;
                }
            }

            if fire_tick {
                if let Some(hook) = self.cost_hook.as_mut() {
                    if let Some(cost) = hook(&self.core) {
                        // The handler "takes" this long: wall time passes and
                        // the counter runs on.
                        self.clock.set(self.clock.get() + cost as u64);
                        self.step_timer.0.borrow_mut().tc = cost;
                    }
                }
            }

            self.core.on_step_timer(events);
        }

        if fire_accel {
            {
                let mut at = self.accel_timer.0.borrow_mut();
                if at.pending {
                    at.pending = false;
                } else {
                    at.tc -= at.period;
                }
            }
            self.core.on_acceleration_tick();
        }

        // A force_pending from inside a handler re-enters as soon as the
        // current interrupt exits.
        while self.accel_timer.0.borrow().pending {
            self.accel_timer.0.borrow_mut().pending = false;
            self.core.on_acceleration_tick();
        }

        true
    }

    /// Run until `predicate` holds, panicking after `max_events` dispatches.
    pub fn run_until<F>(&mut self, mut predicate: F, max_events: usize)
    where
        F: FnMut(&TestCore) -> bool,
    {
        for _ in 0..max_events {
            if predicate(&self.core) {
                return;
            }
            if !self.step_event() {
                assert!(predicate(&self.core), "simulation stalled before condition");
                return;
            }
        }
        panic!("simulation did not reach condition within {} events", max_events);
    }

    /// Run until the machine is idle.
    pub fn run_until_idle(&mut self, max_events: usize) {
        self.run_until(|core| core.is_idle(), max_events);
    }

    /// Dispatch a fixed number of events.
    pub fn run_events(&mut self, events: usize) {
        for _ in 0..events {
            if !self.step_event() {
                return;
            }
        }
    }
}

/// Assert that step edges alternate high/low and, when `min_spacing` is
/// given, that each pulse holds high at least that long.
pub fn assert_pulse_pairing(edges: &[(u64, bool)], min_spacing: Option<u64>) {
    let mut last: Option<(u64, bool)> = None;
    for &(at, level) in edges {
        if let Some((prev_at, prev_level)) = last {
            assert_ne!(
                level, prev_level,
                "step pin saw two consecutive {} edges",
                if level { "rising" } else { "falling" }
            );
            if !level {
                if let Some(min) = min_spacing {
                    assert!(
                        at - prev_at >= min,
                        "pulse width {} below minimum {}",
                        at - prev_at,
                        min
                    );
                }
            }
        } else {
            assert!(level, "step pin's first edge must be rising");
        }
        last = Some((at, level));
    }
}
