//! Error taxonomy for the engine.
//!
//! Every error here is fatal for the run: the engine has no retry or
//! partial-commit path. Callers are expected to report the diagnostic and
//! stop.

use thiserror::Error;

use crate::device::Kernel;
use crate::params::Precision;

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A hard capacity bound was exceeded.
    #[error("capacity error: {0}")]
    Capacity(#[from] CapacityError),

    /// The compute device reported a failure while running `phase`.
    #[error("device error during {phase}: {source}")]
    Device {
        /// Pipeline stage or engine operation that was running.
        phase: &'static str,
        /// Underlying backend failure.
        #[source]
        source: DeviceError,
    },

    /// The engine was configured or driven incorrectly.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Capacity violations. These signal a misconfigured run, not a transient
/// condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapacityError {
    /// Flushing the ingestion batch would push the particle count past the
    /// configured capacity. Nothing was written.
    #[error("particle count full: {live} live + {batch} pending exceeds capacity {capacity}")]
    ParticleCapacity {
        /// Live particles before the flush.
        live: usize,
        /// Size of the rejected batch.
        batch: usize,
        /// Configured maximum particle count.
        capacity: usize,
    },

    /// The neighbor count pass produced more entries than the flat neighbor
    /// array may hold.
    #[error("too many neighbors: {total} entries exceed limit {limit} ({particles} particles x {max_neighbors})")]
    NeighborOverflow {
        /// Total neighbor entries requested (MN).
        total: usize,
        /// N x MAX_NEIGHBORS.
        limit: usize,
        /// Live particle count N.
        particles: usize,
        /// Per-particle neighbor bound.
        max_neighbors: usize,
    },
}

/// Configuration and usage errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A parameter failed validation.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter {
        /// Field name.
        name: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The device cannot run kernels at the compiled precision.
    #[error("{requested:?} precision requested but device `{device}` does not support it")]
    UnsupportedPrecision {
        /// Precision the engine was built with.
        requested: Precision,
        /// Backend description.
        device: String,
    },

    /// `step()` was called before the one-shot mass calibration.
    #[error("mass calibration must run before the first step")]
    NotCalibrated,

    /// Mass calibration found no movable particle with positive density.
    #[error("mass calibration found no non-static particle with positive density")]
    NoFluidDensity,
}

/// Failures reported by a compute backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// No usable adapter or device could be opened.
    #[error("device initialization failed: {0}")]
    Init(String),

    /// A kernel was dispatched or prepared without an implementation.
    #[error("kernel `{}` is not available on this backend", .0.name())]
    MissingKernel(Kernel),

    /// Kernel source failed to compile or link.
    #[error("kernel `{}` failed to build: {message}", .kernel.name())]
    Build {
        /// Kernel being built.
        kernel: Kernel,
        /// Compiler diagnostic.
        message: String,
    },

    /// The bound arguments do not match the kernel's parameter schema.
    #[error("kernel `{}` argument mismatch: {reason}", .kernel.name())]
    Signature {
        /// Kernel being dispatched.
        kernel: Kernel,
        /// Which argument is wrong and why.
        reason: String,
    },

    /// A kernel wrote to a parameter declared read-only.
    #[error("kernel `{}` wrote to read-only argument {index}", .kernel.name())]
    AccessViolation {
        /// Offending kernel.
        kernel: Kernel,
        /// Parameter position.
        index: usize,
    },

    /// The kernel launch itself failed.
    #[error("kernel `{}` launch failed: {message}", .kernel.name())]
    Launch {
        /// Kernel that failed.
        kernel: Kernel,
        /// Backend diagnostic.
        message: String,
    },

    /// A buffer access fell outside the buffer.
    #[error("buffer `{label}` access out of range: offset {offset} + {len} > size {size}")]
    OutOfRange {
        /// Buffer label.
        label: String,
        /// Byte offset of the access.
        offset: u64,
        /// Byte length of the access.
        len: u64,
        /// Buffer size in bytes.
        size: u64,
    },

    /// Mapping a buffer for host readback failed.
    #[error("readback failed: {0}")]
    Readback(String),
}

impl EngineError {
    /// Phase name for device errors, if any.
    pub fn phase(&self) -> Option<&'static str> {
        match self {
            EngineError::Device { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

/// Attach the running phase to a backend result.
pub(crate) trait AtPhase<T> {
    fn at(self, phase: &'static str) -> Result<T, EngineError>;
}

impl<T> AtPhase<T> for Result<T, DeviceError> {
    fn at(self, phase: &'static str) -> Result<T, EngineError> {
        self.map_err(|source| EngineError::Device { phase, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_error_reports_phase() {
        let err: Result<(), DeviceError> = Err(DeviceError::MissingKernel(Kernel::Density));
        let err = err.at("density_predict").unwrap_err();
        assert_eq!(err.phase(), Some("density_predict"));
        let msg = err.to_string();
        assert!(msg.contains("density_predict"), "{msg}");
        assert!(msg.contains("`density`"), "{msg}");
    }

    #[test]
    fn capacity_error_message() {
        let err = EngineError::from(CapacityError::ParticleCapacity {
            live: 8,
            batch: 4,
            capacity: 10,
        });
        assert!(err.phase().is_none());
        assert!(err.to_string().contains("exceeds capacity 10"));
    }
}
