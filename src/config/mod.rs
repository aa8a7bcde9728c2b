//! Configuration module for step-pulse.
//!
//! Provides the motion-core configuration keys with their firmware defaults,
//! validation, and TOML loading (with the `std` feature).

#[cfg(feature = "std")]
mod loader;
mod motion;
mod validation;

pub use motion::MotionConfig;
pub use validation::validate_config;

#[cfg(feature = "std")]
pub use loader::{load_config, parse_config};
