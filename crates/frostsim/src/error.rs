//! Error types for the frost simulation.

use thiserror::Error;

/// Result type for frost simulation operations.
pub type Result<T> = std::result::Result<T, FrostError>;

/// Errors that can occur while sizing, driving or rendering the simulation.
#[derive(Error, Debug)]
pub enum FrostError {
    /// Screen or grid dimensions are unusable (zero sized).
    #[error("Invalid dimensions: {width}x{height}")]
    InvalidDimensions {
        /// Requested width.
        width: u32,
        /// Requested height.
        height: u32,
    },

    /// Malformed stimulus (point count or magnitude).
    #[error("Invalid stimulus: {0}")]
    InvalidStimulus(String),

    /// Height or texture storage could not be reserved.
    #[error("Allocation failed: {0}")]
    Allocation(String),

    /// No adapter, device or required platform feature.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Accumulation-target failure detected while running.
    #[error("Accumulation target failure: {0}")]
    Capability(String),

    /// GPU readback failed.
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    /// Configuration rejected by validation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML parse error.
    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrostError {
    /// Create an invalid stimulus error.
    pub fn stimulus(msg: impl Into<String>) -> Self {
        Self::InvalidStimulus(msg.into())
    }

    /// Create an allocation error.
    pub fn allocation(msg: impl Into<String>) -> Self {
        Self::Allocation(msg.into())
    }

    /// Create a backend unavailable error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    /// Create a capability error.
    pub fn capability(msg: impl Into<String>) -> Self {
        Self::Capability(msg.into())
    }

    /// Create a transfer error.
    pub fn transfer(msg: impl Into<String>) -> Self {
        Self::TransferFailed(msg.into())
    }

    /// Create a config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error should permanently disable the accumulation-target path.
    pub fn is_capability_failure(&self) -> bool {
        matches!(self, Self::Capability(_) | Self::BackendUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_classification() {
        assert!(FrostError::capability("framebuffer incomplete").is_capability_failure());
        assert!(FrostError::unavailable("no adapter").is_capability_failure());
        assert!(!FrostError::stimulus("odd line count").is_capability_failure());
        // A failed readback leaves the accumulation path usable
        assert!(!FrostError::transfer("map failed").is_capability_failure());
        assert!(!FrostError::InvalidDimensions { width: 0, height: 4 }.is_capability_failure());
    }

    #[test]
    fn test_display() {
        let err = FrostError::InvalidDimensions { width: 0, height: 768 };
        assert_eq!(err.to_string(), "Invalid dimensions: 0x768");
    }
}
