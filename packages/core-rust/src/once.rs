//! Initialize-once cell shared by every registry.

use std::sync::OnceLock;

use crate::error::ConfigError;

/// A value that is set exactly once and read many times afterwards.
///
/// A second `initialize` fails with [`ConfigError::AlreadyInitialized`]
/// instead of silently replacing the contents. Reads before initialization
/// fail with [`ConfigError::NotInitialized`].
#[derive(Debug)]
pub struct InitOnce<T> {
    name: &'static str,
    cell: OnceLock<T>,
}

impl<T> InitOnce<T> {
    /// Creates an empty cell. `name` is used in error messages.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            cell: OnceLock::new(),
        }
    }

    /// Stores `value`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::AlreadyInitialized`] if a value was already stored.
    pub fn initialize(&self, value: T) -> Result<(), ConfigError> {
        self.cell
            .set(value)
            .map_err(|_| ConfigError::AlreadyInitialized {
                registry: self.name,
            })
    }

    /// Returns the stored value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotInitialized`] before the first `initialize`.
    pub fn get(&self) -> Result<&T, ConfigError> {
        self.cell.get().ok_or(ConfigError::NotInitialized {
            registry: self.name,
        })
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}
