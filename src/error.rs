//! Error types for step-pulse.
//!
//! All fallible operations are construction-time (configuration parsing,
//! core assembly). The motion hot path absorbs its error conditions locally
//! and exposes none.

use core::fmt;

/// Result type alias using the library's Error type.
pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for all step-pulse operations.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Configuration parsing or validation error
    Config(ConfigError),
    /// Motion core assembly error
    Build(BuildError),
}

/// Configuration-related errors.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Failed to parse TOML configuration
    ParseError(heapless::String<128>),
    /// Base stepping frequency must be positive
    InvalidBaseFrequency(f32),
    /// Acceleration tick rate must be positive
    InvalidAccelerationTicks(u32),
    /// Minimum steps per minute must be positive
    InvalidMinimumRate(f32),
    /// Pulse width must be positive and shorter than one base period
    InvalidPulseWidth {
        /// Configured pulse width in seconds
        pulse_width: f32,
        /// One base tick in seconds
        base_period: f32,
    },
    /// File I/O error (std only)
    #[cfg(feature = "std")]
    IoError(heapless::String<128>),
}

/// Motion core assembly errors.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BuildError {
    /// No stepper motors were registered
    NoMotors,
    /// More motors were registered than the ticker has slots
    MotorSlotsExhausted {
        /// Number of slots available
        slots: usize,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Configuration error: {}", e),
            Error::Build(e) => write!(f, "Build error: {}", e),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            ConfigError::InvalidBaseFrequency(v) => {
                write!(f, "Invalid base stepping frequency: {}. Must be > 0", v)
            }
            ConfigError::InvalidAccelerationTicks(v) => {
                write!(f, "Invalid acceleration tick rate: {}. Must be > 0", v)
            }
            ConfigError::InvalidMinimumRate(v) => {
                write!(f, "Invalid minimum steps per minute: {}. Must be > 0", v)
            }
            ConfigError::InvalidPulseWidth {
                pulse_width,
                base_period,
            } => write!(
                f,
                "Invalid pulse width: {}s. Must be > 0 and shorter than one base period ({}s)",
                pulse_width, base_period
            ),
            #[cfg(feature = "std")]
            ConfigError::IoError(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::NoMotors => write!(f, "No stepper motors registered"),
            BuildError::MotorSlotsExhausted { slots } => {
                write!(f, "Motor slots exhausted (ticker has {} slots)", slots)
            }
        }
    }
}

// Conversion impls
impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<BuildError> for Error {
    fn from(e: BuildError) -> Self {
        Error::Build(e)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[cfg(feature = "std")]
impl std::error::Error for ConfigError {}

#[cfg(feature = "std")]
impl std::error::Error for BuildError {}
