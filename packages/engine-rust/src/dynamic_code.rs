//! Dynamic code: business logic units loaded once at startup and
//! dispatched by id from a service chain.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use switchyard_core::{
    ConfigError, DynamicCode, DynamicCodeError, InitOnce, Service, ServiceContext,
};

/// Location name under which [`CatalogLoader::builtin`] publishes its units.
pub const BUILTIN_LOCATION: &str = "builtin";

/// Produces the dynamic code units found at a source location.
pub trait DynamicCodeLoader: Send + Sync {
    /// Loads every unit at `location`.
    ///
    /// # Errors
    ///
    /// Unknown locations and units that fail to build.
    fn load(&self, location: &str) -> anyhow::Result<Vec<Arc<dyn DynamicCode>>>;
}

// ---------------------------------------------------------------------------
// FnCode
// ---------------------------------------------------------------------------

type CodeFn = dyn Fn(&mut ServiceContext) -> anyhow::Result<()> + Send + Sync;

/// A [`DynamicCode`] backed by a closure.
pub struct FnCode {
    id: String,
    f: Box<CodeFn>,
}

impl FnCode {
    pub fn new(
        id: impl Into<String>,
        f: impl Fn(&mut ServiceContext) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            f: Box::new(f),
        }
    }
}

impl DynamicCode for FnCode {
    fn id(&self) -> &str {
        &self.id
    }

    fn execute(&self, ctx: &mut ServiceContext) -> anyhow::Result<()> {
        (self.f)(ctx)
    }
}

impl fmt::Debug for FnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCode").field("id", &self.id).finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// CatalogLoader
// ---------------------------------------------------------------------------

type Factory = dyn Fn() -> anyhow::Result<Vec<Arc<dyn DynamicCode>>> + Send + Sync;

/// Loader resolving locations against a table of in-process factories.
#[derive(Default)]
pub struct CatalogLoader {
    factories: HashMap<String, Box<Factory>>,
}

impl CatalogLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog with the `builtin` location registered:
    ///
    /// - `noop`: does nothing;
    /// - `stop_chain`: switches processing off, gracefully ending the chain;
    /// - `stamp`: stores the current status under `last_dynamic_code_status`.
    #[must_use]
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register(BUILTIN_LOCATION, || {
            let units: Vec<Arc<dyn DynamicCode>> = vec![
                Arc::new(FnCode::new("noop", |_| Ok(()))),
                Arc::new(FnCode::new("stop_chain", |ctx| {
                    ctx.set_process_on(false);
                    Ok(())
                })),
                Arc::new(FnCode::new("stamp", |ctx| {
                    let status = ctx.process_code().to_string();
                    ctx.add_context_param("last_dynamic_code_status", status);
                    Ok(())
                })),
            ];
            Ok(units)
        });
        catalog
    }

    /// Registers (or replaces) the factory for `location`.
    pub fn register(
        &mut self,
        location: impl Into<String>,
        factory: impl Fn() -> anyhow::Result<Vec<Arc<dyn DynamicCode>>> + Send + Sync + 'static,
    ) {
        self.factories.insert(location.into(), Box::new(factory));
    }
}

impl DynamicCodeLoader for CatalogLoader {
    fn load(&self, location: &str) -> anyhow::Result<Vec<Arc<dyn DynamicCode>>> {
        let factory = self
            .factories
            .get(location)
            .ok_or_else(|| anyhow::anyhow!("no dynamic code catalog entry for `{location}`"))?;
        factory()
    }
}

// ---------------------------------------------------------------------------
// DynamicCodeRegistry
// ---------------------------------------------------------------------------

/// Dynamic code units keyed by id. Populated once, read-only afterwards.
///
/// Only one initialization attempt is allowed, successful or not.
pub struct DynamicCodeRegistry {
    codes: InitOnce<HashMap<String, Arc<dyn DynamicCode>>>,
    attempted: AtomicBool,
}

impl DynamicCodeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            codes: InitOnce::new("dynamic code registry"),
            attempted: AtomicBool::new(false),
        }
    }

    /// Loads every location in order and stores the resulting units.
    /// Returns the number of units registered.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::AlreadyInitialized`] on any call after the first,
    ///   even if the first one failed;
    /// - [`DynamicCodeError::Load`] if a location fails to load;
    /// - [`ConfigError::DuplicateId`] if two units share an id.
    pub fn initialize<S: AsRef<str>>(
        &self,
        locations: &[S],
        loader: &dyn DynamicCodeLoader,
    ) -> anyhow::Result<usize> {
        if self.attempted.swap(true, Ordering::SeqCst) || self.codes.is_initialized() {
            return Err(ConfigError::AlreadyInitialized {
                registry: self.codes.name(),
            }
            .into());
        }

        let mut codes: HashMap<String, Arc<dyn DynamicCode>> = HashMap::new();
        for location in locations {
            let location = location.as_ref();
            let units = loader.load(location).map_err(|source| DynamicCodeError::Load {
                location: location.to_string(),
                source,
            })?;
            tracing::debug!(%location, units = units.len(), "dynamic code location loaded");
            for unit in units {
                let id = unit.id().to_string();
                if codes.contains_key(&id) {
                    return Err(ConfigError::DuplicateId {
                        kind: "dynamic code",
                        id,
                    }
                    .into());
                }
                codes.insert(id, unit);
            }
        }

        let count = codes.len();
        self.codes.initialize(codes)?;
        tracing::info!(count, "dynamic code registry initialized");
        Ok(count)
    }

    /// Looks up a unit. Absence, including an uninitialized registry, is `None`.
    #[must_use]
    pub fn get_dynamic_code(&self, id: &str) -> Option<Arc<dyn DynamicCode>> {
        self.codes.get().ok()?.get(id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.get().map_or(0, HashMap::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DynamicCodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// DynamicCodeService
// ---------------------------------------------------------------------------

/// Chain step executing the next dynamic code id of the interface.
pub struct DynamicCodeService {
    registry: Arc<DynamicCodeRegistry>,
}

impl DynamicCodeService {
    #[must_use]
    pub fn new(registry: Arc<DynamicCodeRegistry>) -> Self {
        Self { registry }
    }
}

impl Service for DynamicCodeService {
    fn name(&self) -> &str {
        "dynamic_code"
    }

    fn process(&self, ctx: &mut ServiceContext) -> anyhow::Result<()> {
        let id = ctx.next_dynamic_code_id()?;
        let code = self
            .registry
            .get_dynamic_code(&id)
            .ok_or_else(|| ConfigError::UnknownId {
                kind: "dynamic code",
                id: id.clone(),
            })?;
        tracing::debug!(tx_id = %ctx.tx_id(), code = %id, "executing dynamic code");
        code.execute(ctx)
            .map_err(|source| DynamicCodeError::Execution { id, source }.into())
    }
}
