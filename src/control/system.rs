//! Motion core facade.
//!
//! [`MotionCore`] owns the step ticker, the trapezoid controller, the
//! conveyor and the acceleration timer, and routes between them: the
//! platform's two interrupt handlers call [`MotionCore::on_step_timer`] and
//! [`MotionCore::on_acceleration_tick`], the foreground uses the queueing
//! and pause/flush API. One instance exists per machine, created at
//! startup; the firmware keeps it wherever its interrupt trampolines can
//! reach it (typically a critical-section cell).
//!
//! Every field the interrupt context mutates is only reachable through
//! `&mut self`, so foreground access is forced through whatever mutual
//! exclusion the platform wraps the core in. Block refcounts and the flush
//! flag are atomics and may be touched from anywhere.

use embedded_hal::digital::OutputPin;

use crate::block::Block;
use crate::config::MotionConfig;
use crate::conveyor::{BlockId, Conveyor};
use crate::gcode::Gcode;
use crate::motor::{StepTicker, TickPhase};
use crate::timer::{AccelTimer, MatchEvents, StepTimer};

use super::trapezoid::TrapezoidController;

/// Listener invoked after every trapezoid tick that changed the commanded
/// rate.
pub type RateListener = fn(f32);

/// Listener invoked when a block finishes executing (all axes stopped or
/// the block was flushed).
pub type MoveFinishedListener = fn(BlockId);

/// The assembled motion core: pulse generator, trapezoid controller and
/// block conveyor behind one interface.
pub struct MotionCore<T, A, STEP, DIR, EN, const N: usize, const CAP: usize>
where
    T: StepTimer,
    A: AccelTimer,
    STEP: OutputPin,
    DIR: OutputPin,
    EN: OutputPin,
{
    ticker: StepTicker<T, STEP, DIR, EN, N>,
    accel_timer: A,
    controller: TrapezoidController,
    conveyor: Conveyor<CAP>,
    config: MotionConfig,
    rate_listener: Option<RateListener>,
    move_finished_listener: Option<MoveFinishedListener>,
    last_notified_rate: Option<f32>,
}

impl<T, A, STEP, DIR, EN, const N: usize, const CAP: usize>
    MotionCore<T, A, STEP, DIR, EN, N, CAP>
where
    T: StepTimer,
    A: AccelTimer,
    STEP: OutputPin,
    DIR: OutputPin,
    EN: OutputPin,
{
    pub(crate) fn from_parts(
        ticker: StepTicker<T, STEP, DIR, EN, N>,
        accel_timer: A,
        controller: TrapezoidController,
        config: MotionConfig,
    ) -> Self {
        Self {
            ticker,
            accel_timer,
            controller,
            conveyor: Conveyor::new(),
            config,
            rate_listener: None,
            move_finished_listener: None,
            last_notified_rate: None,
        }
    }

    /// Register the rate-change listener.
    pub fn set_rate_listener(&mut self, listener: RateListener) {
        self.rate_listener = Some(listener);
    }

    /// Register the per-block move-finished listener.
    pub fn set_move_finished_listener(&mut self, listener: MoveFinishedListener) {
        self.move_finished_listener = Some(listener);
    }

    /// Re-apply configuration: base frequency, pulse width, trapezoid
    /// cadence and rate floor. Steppers are disabled afterwards.
    pub fn reload_config(&mut self, config: &MotionConfig) {
        self.ticker.set_frequency(config.base_stepping_frequency);
        self.ticker.set_reset_delay(config.pulse_width_seconds);
        self.accel_timer
            .set_frequency(config.acceleration_ticks_per_second);
        self.controller.on_config_reload(config, &mut self.ticker);
        self.config = config.clone();
    }

    /// Queue a planner block for execution. Starts the block immediately
    /// when the machine is idle.
    ///
    /// Returns the block back when the pool is full.
    pub fn queue_block(&mut self, block: Block) -> Result<(), Block> {
        self.conveyor.queue_block(block)?;
        if self.controller.current_block().is_none() && !self.conveyor.flushing() {
            self.advance_conveyor();
        }
        Ok(())
    }

    /// Hand a received G-code to the motion core. Enable/disable commands
    /// ride on the tail block so they are sequenced with motion.
    pub fn on_gcode_received(&mut self, gcode: Gcode) {
        self.controller
            .on_gcode_received(gcode, &mut self.conveyor, &mut self.ticker);
    }

    /// Halt pulse emission within one base tick, keeping all state.
    pub fn pause(&mut self) {
        self.controller.on_pause(&mut self.ticker);
    }

    /// Resume the profile from where it paused.
    pub fn resume(&mut self) {
        self.controller.on_play(&mut self.ticker);
    }

    /// Request a pipeline drain: the current block decelerates to the floor
    /// rate, then everything queued is dropped. A flush with nothing
    /// running is a no-op.
    pub fn request_flush(&mut self) {
        self.conveyor.set_flush(true);
    }

    /// Clear a previously requested drain.
    pub fn clear_flush(&mut self) {
        self.conveyor.set_flush(false);
    }

    /// Whether nothing is executing and no motor is active.
    pub fn is_idle(&self) -> bool {
        self.controller.current_block().is_none() && !self.ticker.has_active_motors()
    }

    /// Base timer interrupt entry point. `events` carries which match
    /// registers the platform found asserted.
    pub fn on_step_timer(&mut self, events: MatchEvents) {
        match self.ticker.pre_tick(events) {
            TickPhase::Quiet => {}
            TickPhase::Pulsed { signalled } => {
                self.dispatch_signals(signalled);
            }
            TickPhase::Finishing { signalled } => {
                self.dispatch_signals(signalled);
                self.walk_finished_moves();
                self.ticker.finish_tick();
            }
        }
    }

    /// Acceleration timer interrupt entry point.
    pub fn on_acceleration_tick(&mut self) {
        let outcome = self
            .controller
            .trapezoid_generator_tick(&self.conveyor, &mut self.ticker);

        if let Some(rate) = outcome.published_rate {
            self.notify_rate(rate);
        }
        if outcome.block_released {
            self.end_current_block();
        }
    }

    /// Service every motor whose move finished this tick.
    ///
    /// The finished-move handling may release the block and begin the next
    /// one, re-arming motors while we iterate; each motor's active bit is
    /// only cleared after its handling ran, so a block change never resets
    /// the overrun measurement, and removal re-examines the slot.
    fn walk_finished_moves(&mut self) {
        let mut i = 0;
        while i < N {
            let bit = 1u32 << i;
            if self.ticker.active_motor_bm() & bit != 0 {
                let finished = self
                    .ticker
                    .motor_mut(i)
                    .map(|motor| motor.acknowledge_finished())
                    .unwrap_or(false);

                if finished {
                    let released = self
                        .controller
                        .stepper_motor_finished_move(&self.conveyor, &self.ticker);
                    if released {
                        self.end_current_block();
                    }

                    let still_moving = self
                        .ticker
                        .motor(i)
                        .map(|motor| motor.moving())
                        .unwrap_or(false);
                    if !still_moving {
                        self.ticker.remove_motor_from_active_list(i);
                        continue;
                    }
                }
            }
            i += 1;
        }
        self.ticker.clear_moves_finished();
    }

    /// The current block's refcount reached zero: retire it and move on.
    fn end_current_block(&mut self) {
        if let Some(id) = self.conveyor.pop_head() {
            if let Some(listener) = self.move_finished_listener {
                listener(id);
            }
        }
        self.controller.on_block_end();
        self.advance_conveyor();
    }

    /// Begin the next executable block at the head of the queue.
    ///
    /// Blocks the stepping core does not care about (zero length, no
    /// cartesian steps) still have their attached G-codes executed, then
    /// fall straight through. A flush drops queued blocks unexecuted.
    fn advance_conveyor(&mut self) {
        while let Some(id) = self.conveyor.head() {
            if self.conveyor.flushing() {
                self.conveyor.pop_head();
                continue;
            }

            let gcodes = self.conveyor.gcodes(id).clone();
            for gcode in &gcodes {
                self.controller.on_gcode_execute(gcode, &mut self.ticker);
            }

            let rate = self.controller.on_block_begin(
                id,
                &self.conveyor,
                &mut self.ticker,
                &mut self.accel_timer,
            );

            if self.conveyor.refs(id) == 0 {
                self.conveyor.pop_head();
                continue;
            }

            if let Some(rate) = rate {
                self.notify_rate(rate);
            }
            break;
        }
    }

    fn dispatch_signals(&mut self, signalled: u32) {
        if signalled != 0 {
            self.controller.synchronize_acceleration(
                &self.conveyor,
                &mut self.ticker,
                &mut self.accel_timer,
            );
        }
    }

    fn notify_rate(&mut self, rate: f32) {
        if self.last_notified_rate != Some(rate) {
            self.last_notified_rate = Some(rate);
            if let Some(listener) = self.rate_listener {
                listener(rate);
            }
        }
    }

    /// Current commanded lead-axis rate in steps per second.
    #[inline]
    pub fn commanded_rate(&self) -> f32 {
        self.controller.trapezoid_adjusted_rate()
    }

    /// Whether the drivers are energised.
    #[inline]
    pub fn drivers_enabled(&self) -> bool {
        self.controller.drivers_enabled()
    }

    /// Whether the controller is paused.
    #[inline]
    pub fn paused(&self) -> bool {
        self.controller.paused()
    }

    /// Number of blocks waiting on the conveyor (including the current one).
    #[inline]
    pub fn queued_blocks(&self) -> usize {
        self.conveyor.len()
    }

    /// Active configuration.
    #[inline]
    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    /// Read access to the ticker, motors included.
    #[inline]
    pub fn ticker(&self) -> &StepTicker<T, STEP, DIR, EN, N> {
        &self.ticker
    }

    /// Read access to the conveyor.
    #[inline]
    pub fn conveyor(&self) -> &Conveyor<CAP> {
        &self.conveyor
    }

    /// Steps emitted so far by one axis in its current move.
    pub fn stepped(&self, axis: usize) -> u32 {
        self.ticker
            .motor(axis)
            .map(|motor| motor.stepped())
            .unwrap_or(0)
    }
}
