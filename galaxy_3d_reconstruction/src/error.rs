//! Error types for Galaxy3D scene reconstruction
//!
//! This module defines the error types used throughout the reconstruction core,
//! including buffer capacity management, input validation, and session lifecycle.

use std::fmt;

/// Result type for Galaxy3D reconstruction operations
pub type Result<T> = std::result::Result<T, Error>;

/// Galaxy3D reconstruction errors
#[derive(Debug, Clone)]
pub enum Error {
    /// Lock poisoning or background worker failure
    BackendError(String),

    /// A buffer category was asked to grow past its configured limit
    CapacityExceeded {
        category: String,
        requested: usize,
        limit: usize,
    },

    /// Malformed input mesh (bad index, mismatched attribute counts, ...)
    InvalidInput(String),

    /// Invalid resource (stale buffer handle, layer type mismatch, ...)
    InvalidResource(String),

    /// Initialization failed (engine, session, configuration)
    InitializationFailed(String),
}

impl Error {
    /// Whether the frame pipeline can degrade gracefully from this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::CapacityExceeded { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::CapacityExceeded { category, requested, limit } => write!(
                f,
                "Capacity exceeded: {} buffer requested {} elements (limit {})",
                category, requested, limit
            ),
            Error::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            Error::InvalidResource(msg) => write!(f, "Invalid resource: {}", msg),
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ===== ERROR MACROS =====

/// Log an error through `engine_error!` and return it from the current function
///
/// Defaults to `Error::InvalidResource`; prefix with `Variant @` to pick
/// another message-carrying variant.
///
/// # Example
///
/// ```ignore
/// engine_bail!("galaxy3d::LayeredBuffer", "Layer {:?} is not {}-aligned", layer, align);
/// engine_bail!(InvalidInput @ "galaxy3d::SceneReconstructor", "Index {} out of range", index);
/// ```
#[macro_export]
macro_rules! engine_bail {
    ($variant:ident @ $source:expr, $($arg:tt)*) => {
        return Err($crate::engine_err!($variant @ $source, $($arg)*))
    };
    ($source:expr, $($arg:tt)*) => {
        return Err($crate::engine_err!($source, $($arg)*))
    };
}

/// Log an error through `engine_error!` and build the matching `Error`
///
/// # Example
///
/// ```ignore
/// let err = engine_err!("galaxy3d::ScratchPool", "Stale scratch handle");
/// ```
#[macro_export]
macro_rules! engine_err {
    ($variant:ident @ $source:expr, $($arg:tt)*) => {{
        let message = format!($($arg)*);
        $crate::engine_error!($source, "{}", message);
        $crate::galaxy3d::Error::$variant(message)
    }};
    ($source:expr, $($arg:tt)*) => {{
        let message = format!($($arg)*);
        $crate::engine_error!($source, "{}", message);
        $crate::galaxy3d::Error::InvalidResource(message)
    }};
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
