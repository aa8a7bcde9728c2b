//! Motor module: per-axis stepper state and the base-frequency ticker that
//! dispatches pulses to the active set.

mod stepper;
mod ticker;

pub use stepper::{StepEvent, StepperMotor};
pub use ticker::{StepTicker, TickPhase};
