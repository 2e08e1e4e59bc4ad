/// Galaxy3D Engine - Singleton manager for the reconstruction session and logger
///
/// A process runs at most one reconstruction session at a time. It lives from
/// `create_reconstructor()` to `destroy_reconstructor()` (or `shutdown()`),
/// and is shared as `Arc<Mutex<SceneReconstructor>>` between the control
/// thread and read-only consumers.

use std::sync::{OnceLock, RwLock, Arc, Mutex};
use std::time::SystemTime;
use crate::config::ReconstructionConfig;
use crate::reconstruction::SceneReconstructor;
use crate::error::{Result, Error};
use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger};

// ===== INTERNAL STATE =====

/// Global engine state storage
static ENGINE_STATE: OnceLock<EngineState> = OnceLock::new();

/// Global logger (initialized with DefaultLogger)
static LOGGER: OnceLock<RwLock<Box<dyn Logger>>> = OnceLock::new();

struct EngineState {
    reconstructor: RwLock<Option<Arc<Mutex<SceneReconstructor>>>>,
}

impl EngineState {
    fn new() -> Self {
        Self {
            reconstructor: RwLock::new(None),
        }
    }
}

fn logger() -> &'static RwLock<Box<dyn Logger>> {
    LOGGER.get_or_init(|| RwLock::new(Box::new(DefaultLogger::default())))
}

// ===== PUBLIC API =====

/// Main engine singleton manager
///
/// # Example
///
/// ```no_run
/// use galaxy_3d_reconstruction::galaxy3d::{Engine, ReconstructionConfig};
///
/// Engine::initialize()?;
/// Engine::create_reconstructor(ReconstructionConfig::default())?;
///
/// let session = Engine::reconstructor()?;
/// // session.lock() and feed frames...
///
/// Engine::shutdown();
/// # Ok::<(), galaxy_3d_reconstruction::galaxy3d::Error>(())
/// ```
pub struct Engine;

impl Engine {
    /// Helper to log errors before returning them (internal use)
    fn log_and_return_error(error: Error) -> Error {
        match &error {
            Error::InitializationFailed(msg) => {
                crate::engine_error!("galaxy3d::Engine", "Initialization failed: {}", msg);
            }
            Error::BackendError(msg) => {
                crate::engine_error!("galaxy3d::Engine", "Backend error: {}", msg);
            }
            _ => {
                crate::engine_error!("galaxy3d::Engine", "Engine error: {}", error);
            }
        }
        error
    }

    fn state() -> Result<&'static EngineState> {
        ENGINE_STATE.get()
            .ok_or_else(|| Self::log_and_return_error(
                Error::InitializationFailed("Engine not initialized. Call Engine::initialize() first.".to_string())
            ))
    }

    /// Initialize the engine
    ///
    /// Must be called before a reconstructor is created. Calling it again is a no-op.
    pub fn initialize() -> Result<()> {
        ENGINE_STATE.get_or_init(EngineState::new);
        Ok(())
    }

    /// Destroy the reconstruction session, if any
    ///
    /// Outstanding `Arc` handles stay valid until dropped.
    pub fn shutdown() {
        if let Some(state) = ENGINE_STATE.get() {
            if let Ok(mut reconstructor) = state.reconstructor.write() {
                *reconstructor = None;
            }
        }
    }

    // ===== RECONSTRUCTOR API =====

    /// Create and register the reconstruction session singleton
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The engine is not initialized
    /// - A session already exists
    /// - `config` does not validate
    /// - The session lock is poisoned
    pub fn create_reconstructor(config: ReconstructionConfig) -> Result<()> {
        let state = Self::state()?;

        let mut lock = state.reconstructor.write()
            .map_err(|_| Self::log_and_return_error(
                Error::BackendError("Reconstructor lock poisoned".to_string())
            ))?;

        if lock.is_some() {
            return Err(Self::log_and_return_error(
                Error::InitializationFailed("Reconstructor already exists. Call Engine::destroy_reconstructor() first.".to_string())
            ));
        }

        let reconstructor = SceneReconstructor::new(config).map_err(Self::log_and_return_error)?;
        *lock = Some(Arc::new(Mutex::new(reconstructor)));

        crate::engine_info!("galaxy3d::Engine", "Reconstructor singleton created successfully");

        Ok(())
    }

    /// Get the reconstruction session singleton
    ///
    /// # Errors
    ///
    /// Returns an error if the engine is not initialized or no session exists.
    pub fn reconstructor() -> Result<Arc<Mutex<SceneReconstructor>>> {
        let state = Self::state()?;

        let lock = state.reconstructor.read()
            .map_err(|_| Self::log_and_return_error(
                Error::BackendError("Reconstructor lock poisoned".to_string())
            ))?;

        lock.clone()
            .ok_or_else(|| Self::log_and_return_error(
                Error::InitializationFailed("Reconstructor not created. Call Engine::create_reconstructor() first.".to_string())
            ))
    }

    /// Destroy the reconstruction session singleton, allowing a new one to be created
    ///
    /// # Errors
    ///
    /// Returns an error if the engine is not initialized
    pub fn destroy_reconstructor() -> Result<()> {
        let state = Self::state()?;

        let mut lock = state.reconstructor.write()
            .map_err(|_| Self::log_and_return_error(
                Error::BackendError("Reconstructor lock poisoned".to_string())
            ))?;

        *lock = None;

        crate::engine_info!("galaxy3d::Engine", "Reconstructor singleton destroyed");

        Ok(())
    }

    /// Reset all singletons for testing (only available in test builds)
    #[cfg(test)]
    pub fn reset_for_testing() {
        if let Some(state) = ENGINE_STATE.get() {
            if let Ok(mut reconstructor) = state.reconstructor.write() {
                *reconstructor = None;
            }
        }
    }

    // ===== LOGGING API =====

    /// Replace the logger (file logger, test capture, ...)
    ///
    /// # Example
    ///
    /// ```no_run
    /// use galaxy_3d_reconstruction::galaxy3d::{Engine, log::{Logger, LogEntry}};
    ///
    /// struct FileLogger;
    /// impl Logger for FileLogger {
    ///     fn log(&self, entry: &LogEntry) {
    ///         // Write to file...
    ///     }
    /// }
    ///
    /// Engine::set_logger(FileLogger);
    /// ```
    pub fn set_logger<L: Logger + 'static>(logger: L) {
        if let Ok(mut lock) = self::logger().write() {
            *lock = Box::new(logger);
        }
    }

    /// Reset logger to default (DefaultLogger)
    pub fn reset_logger() {
        if let Ok(mut lock) = logger().write() {
            *lock = Box::new(DefaultLogger::default());
        }
    }

    /// Internal logging method (for simple logs without file:line)
    ///
    /// Used by macros like engine_info!, engine_warn!, etc.
    pub fn log(severity: LogSeverity, source: &str, message: String) {
        if let Ok(lock) = logger().read() {
            lock.log(&LogEntry {
                severity,
                timestamp: SystemTime::now(),
                source: source.to_string(),
                message,
                file: None,
                line: None,
            });
        }
    }

    /// Internal logging method with file:line information (for ERROR logs)
    ///
    /// Used by engine_error! macro to include source location.
    pub fn log_detailed(
        severity: LogSeverity,
        source: &str,
        message: String,
        file: &'static str,
        line: u32,
    ) {
        if let Ok(lock) = logger().read() {
            lock.log(&LogEntry {
                severity,
                timestamp: SystemTime::now(),
                source: source.to_string(),
                message,
                file: Some(file),
                line: Some(line),
            });
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
