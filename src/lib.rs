//! # step-pulse
//!
//! Real-time motion core for multi-axis stepper machines: converts
//! pre-planned motion blocks (trapezoidal velocity profiles in steps) into
//! precisely timed step pulses, while a slower control loop follows the
//! acceleration / cruise / deceleration curve.
//!
//! ## Architecture
//!
//! - [`StepTicker`](motor::StepTicker) runs at the base stepping frequency
//!   from a hardware match timer. Each tick advances every active motor's
//!   32.32 fixed-point phase accumulator; accumulator overflow emits a step
//!   pulse. Handler overruns are compensated by phantom-advancing the
//!   accumulators over ticks that provably cannot pulse, so step counts are
//!   never lost.
//! - [`TrapezoidController`](control::TrapezoidController) runs at the
//!   (much slower) acceleration-tick cadence and adjusts the commanded rate
//!   against the current block's profile.
//! - [`Conveyor`](conveyor::Conveyor) holds the fixed block pool and the
//!   execution FIFO; blocks are borrowed by refcount and never copied or
//!   mutated while current.
//! - [`MotionCore`](control::MotionCore) owns all of the above and is the
//!   single object the platform's interrupt trampolines and foreground code
//!   talk to.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use step_pulse::{Block, MotionConfig, MotionCoreBuilder, StepperMotor};
//!
//! let mut core = MotionCoreBuilder::<_, _, _, _, _, 3, 16>::new(tim0, tim2)
//!     .config(MotionConfig::default())
//!     .motor(StepperMotor::new(x_step, x_dir, x_en).with_inverted_enable())
//!     .motor(StepperMotor::new(y_step, y_dir, y_en).with_inverted_enable())
//!     .motor(StepperMotor::new(z_step, z_dir, z_en).with_inverted_enable())
//!     .build()?;
//!
//! // From the base timer ISR:
//! //   core.on_step_timer(events);
//! // From the acceleration timer ISR:
//! //   core.on_acceleration_tick();
//! // From the planner:
//! //   core.queue_block(block)?;
//! ```
//!
//! ## Concurrency model
//!
//! Single processor, hardware-interrupt cooperative. All interrupt-owned
//! state is reachable only through `&mut MotionCore`, so the platform's
//! mutual exclusion around the core (interrupt masking, a critical-section
//! cell) is the only locking needed. Block refcounts and the flush flag are
//! atomic and safe to touch from any context. On targets without atomic
//! 64-bit stores the rate update is already safe: it happens inside the
//! same exclusion the core lives behind.
//!
//! ## Feature flags
//!
//! - `std` (default): TOML configuration loading
//! - `defmt`: `defmt::Format` derives on the public data types

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

// Core modules
pub mod block;
pub mod config;
pub mod control;
pub mod conveyor;
pub mod error;
pub mod gcode;
pub mod motor;
pub mod timer;

// Re-exports for ergonomic API
pub use block::{Block, AXES};
pub use config::{validate_config, MotionConfig};
pub use control::{
    MotionCore, MotionCoreBuilder, MoveFinishedListener, RateListener, TrapezoidController,
};
pub use conveyor::{BlockId, Conveyor};
pub use error::{Error, Result};
pub use gcode::Gcode;
pub use motor::{StepTicker, StepperMotor};
pub use timer::{AccelTimer, MatchEvents, StepTimer};

// Configuration loading (std only)
#[cfg(feature = "std")]
pub use config::load_config;
