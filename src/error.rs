//! # Errors
//!
//! The benchmark has a narrow failure surface: bad configuration, failed
//! allocation, a thread pool that cannot be built, and misuse of the offload
//! transport. Out-of-range indices and out-of-domain table inputs are
//! programming errors and are asserted instead.

use std::collections::TryReserveError;

use thiserror::Error;

/// Errors produced while setting up or running the kernel
#[derive(Debug, Error)]
pub enum MocError {
    /// Rejected configuration value
    #[error("invalid configuration: {field} {reason}")]
    Config {
        field: &'static str,
        reason: String,
    },

    /// Backing storage could not be reserved
    #[error("failed to allocate {what} ({elements} elements)")]
    Allocation {
        what: &'static str,
        elements: usize,
        #[source]
        source: TryReserveError,
    },

    /// Worker pool construction failed
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Offload transport used out of order or with mismatched data
    #[error("device {device}: {reason}")]
    Device { device: usize, reason: String },
}

impl MocError {
    /// Zero or otherwise non-positive configuration value
    pub fn non_positive(field: &'static str) -> Self {
        Self::Config {
            field,
            reason: "must be positive".to_string(),
        }
    }

    /// Derived array size does not fit in memory addressing
    pub fn overflow(field: &'static str) -> Self {
        Self::Config {
            field,
            reason: "produces an array size that overflows usize".to_string(),
        }
    }

    /// Is this one of the fatal setup errors (config or allocation)?
    pub fn is_fatal_setup(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::Allocation { .. })
    }
}

/// Crate result alias
pub type Result<T> = std::result::Result<T, MocError>;
