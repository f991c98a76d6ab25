//! Raw entropy device contract.
//!
//! Every device implements [`EntropySource`]: static metadata via
//! [`SourceInfo`], an availability check, and a non-blocking read of whatever
//! raw bytes the device has ready. Devices are wrapped into the pipeline by
//! [`SourceModule`](crate::SourceModule).

/// Category of entropy source based on physical mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceCategory {
    /// Thermal noise in circuits/oscillators.
    Thermal,
    /// CPU/memory timing jitter.
    Timing,
    /// OS scheduler nondeterminism.
    Scheduling,
    /// OS-provided randomness or counters.
    System,
    /// Hardware sensor readings (cameras, microphones, radios).
    Sensor,
}

impl std::fmt::Display for SourceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Thermal => write!(f, "thermal"),
            Self::Timing => write!(f, "timing"),
            Self::Scheduling => write!(f, "scheduling"),
            Self::System => write!(f, "system"),
            Self::Sensor => write!(f, "sensor"),
        }
    }
}

/// Metadata about an entropy source.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    /// Unique identifier (e.g. `"clock_jitter"`), also the module name.
    pub name: &'static str,
    /// One-line human-readable description.
    pub description: &'static str,
    /// Physics explanation of the entropy mechanism.
    pub physics: &'static str,
    pub category: SourceCategory,
    /// Estimated entropy rate in bits per raw byte.
    pub entropy_rate_estimate: f64,
}

/// Trait that every raw entropy device must implement.
pub trait EntropySource: Send + Sync {
    /// Source metadata.
    fn info(&self) -> &SourceInfo;

    /// Check if this source can operate on the current machine.
    fn is_available(&self) -> bool;

    /// Raw bytes the device has ready. Empty when nothing is available yet;
    /// never blocks for long.
    fn read_available_bytes(&self) -> Vec<u8>;

    /// Convenience: name from info.
    fn name(&self) -> &'static str {
        self.info().name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_display() {
        assert_eq!(SourceCategory::Timing.to_string(), "timing");
        assert_eq!(SourceCategory::System.to_string(), "system");
    }
}
