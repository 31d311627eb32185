//! Initialize-once registries read by the processor and the dispatcher.
//!
//! All registries are populated exactly once at startup and are read-only
//! afterwards, so they are shared across workers as `Arc<...>` without
//! locking. A second `initialize` fails with
//! [`ConfigError::AlreadyInitialized`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use switchyard_core::{ConfigError, ErrorHandler, InitOnce, InterfaceDefinition, ResourceExecutor, Service};

// ---------------------------------------------------------------------------
// ChainStep
// ---------------------------------------------------------------------------

/// A service as configured in a chain: a stable id plus configuration-time flags.
#[derive(Clone)]
pub struct ChainStep {
    /// Identifier recorded in the service and error traces.
    pub id: String,
    pub service: Arc<dyn Service>,
    /// Failures of this step are recorded but do not end the chain.
    pub ignore_error: bool,
}

impl ChainStep {
    pub fn new(id: impl Into<String>, service: Arc<dyn Service>) -> Self {
        Self {
            id: id.into(),
            service,
            ignore_error: false,
        }
    }

    #[must_use]
    pub fn ignoring_errors(mut self) -> Self {
        self.ignore_error = true;
        self
    }
}

impl fmt::Debug for ChainStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainStep")
            .field("id", &self.id)
            .field("service", &self.service.name())
            .field("ignore_error", &self.ignore_error)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ChainRegistry
// ---------------------------------------------------------------------------

/// Service chains and error-handler chains, keyed by chain id.
#[derive(Default)]
pub struct Chains {
    services: HashMap<String, Arc<[ChainStep]>>,
    handlers: HashMap<String, Arc<[Arc<dyn ErrorHandler>]>>,
}

impl Chains {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a service chain.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateId`] if `id` is already taken.
    pub fn add_service_chain(
        &mut self,
        id: impl Into<String>,
        steps: Vec<ChainStep>,
    ) -> Result<(), ConfigError> {
        let id = id.into();
        if self.services.contains_key(&id) {
            return Err(ConfigError::DuplicateId {
                kind: "service chain",
                id,
            });
        }
        self.services.insert(id, steps.into());
        Ok(())
    }

    /// Adds an error-handler chain.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateId`] if `id` is already taken.
    pub fn add_error_handler_chain(
        &mut self,
        id: impl Into<String>,
        handlers: Vec<Arc<dyn ErrorHandler>>,
    ) -> Result<(), ConfigError> {
        let id = id.into();
        if self.handlers.contains_key(&id) {
            return Err(ConfigError::DuplicateId {
                kind: "error handler chain",
                id,
            });
        }
        self.handlers.insert(id, handlers.into());
        Ok(())
    }
}

/// Resolves chain ids to ordered service and error-handler lists.
pub struct ChainRegistry {
    chains: InitOnce<Chains>,
}

impl ChainRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            chains: InitOnce::new("chain registry"),
        }
    }

    /// Convenience constructor for an already-initialized registry.
    #[must_use]
    pub fn with_chains(chains: Chains) -> Self {
        let registry = Self::new();
        // A fresh cell cannot already be initialized.
        let _ = registry.chains.initialize(chains);
        registry
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::AlreadyInitialized`] on a second call.
    pub fn initialize(&self, chains: Chains) -> Result<(), ConfigError> {
        self.chains.initialize(chains)
    }

    /// Looks up a service chain. `Ok(None)` means no chain is configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotInitialized`] before `initialize`.
    pub fn service_chain(&self, id: &str) -> Result<Option<Arc<[ChainStep]>>, ConfigError> {
        Ok(self.chains.get()?.services.get(id).cloned())
    }

    /// Looks up an error-handler chain. `Ok(None)` means none is configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotInitialized`] before `initialize`.
    pub fn error_handler_chain(
        &self,
        id: &str,
    ) -> Result<Option<Arc<[Arc<dyn ErrorHandler>]>>, ConfigError> {
        Ok(self.chains.get()?.handlers.get(id).cloned())
    }
}

impl Default for ChainRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// InterfaceRegistry
// ---------------------------------------------------------------------------

/// Interface definitions keyed by interface id.
pub struct InterfaceRegistry {
    interfaces: InitOnce<HashMap<String, Arc<InterfaceDefinition>>>,
}

impl InterfaceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            interfaces: InitOnce::new("interface registry"),
        }
    }

    /// Loads all definitions.
    ///
    /// # Errors
    ///
    /// [`ConfigError::DuplicateId`] if two definitions share an id (nothing is
    /// stored in that case), [`ConfigError::AlreadyInitialized`] on a second call.
    pub fn initialize(
        &self,
        definitions: impl IntoIterator<Item = InterfaceDefinition>,
    ) -> Result<(), ConfigError> {
        if self.interfaces.is_initialized() {
            return Err(ConfigError::AlreadyInitialized {
                registry: self.interfaces.name(),
            });
        }
        let mut map = HashMap::new();
        for def in definitions {
            if map.contains_key(&def.id) {
                return Err(ConfigError::DuplicateId {
                    kind: "interface",
                    id: def.id,
                });
            }
            map.insert(def.id.clone(), Arc::new(def));
        }
        self.interfaces.initialize(map)
    }

    /// # Errors
    ///
    /// [`ConfigError::UnknownId`] for an unregistered id,
    /// [`ConfigError::NotInitialized`] before `initialize`.
    pub fn get(&self, id: &str) -> Result<Arc<InterfaceDefinition>, ConfigError> {
        self.interfaces
            .get()?
            .get(id)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownId {
                kind: "interface",
                id: id.to_string(),
            })
    }

    /// Number of registered interfaces (0 before initialization).
    #[must_use]
    pub fn len(&self) -> usize {
        self.interfaces.get().map_or(0, HashMap::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InterfaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// ResourceExecutorRegistry
// ---------------------------------------------------------------------------

/// Resource executors keyed by executor name.
pub struct ResourceExecutorRegistry {
    executors: InitOnce<HashMap<String, Arc<dyn ResourceExecutor>>>,
}

impl ResourceExecutorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            executors: InitOnce::new("resource executor registry"),
        }
    }

    /// Registers all executors.
    ///
    /// # Errors
    ///
    /// [`ConfigError::DuplicateId`] for a repeated name,
    /// [`ConfigError::AlreadyInitialized`] on a second call.
    pub fn initialize(
        &self,
        executors: impl IntoIterator<Item = (String, Arc<dyn ResourceExecutor>)>,
    ) -> Result<(), ConfigError> {
        if self.executors.is_initialized() {
            return Err(ConfigError::AlreadyInitialized {
                registry: self.executors.name(),
            });
        }
        let mut map = HashMap::new();
        for (name, executor) in executors {
            if map.contains_key(&name) {
                return Err(ConfigError::DuplicateId {
                    kind: "resource executor",
                    id: name,
                });
            }
            map.insert(name, executor);
        }
        self.executors.initialize(map)
    }

    /// Returns the executor registered as `name`, or `None` (also before initialization).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ResourceExecutor>> {
        self.executors.get().ok()?.get(name).cloned()
    }
}

impl Default for ResourceExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
