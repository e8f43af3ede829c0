//! Context kind to adapter resolution.
//!
//! [`AdapterRegistry`] maps a [`ContextKind`] to its adapter. `None` and
//! `Portable` map straight to the built-in adapters. Any other kind is looked
//! up on first use by scanning registration descriptors (explicitly loaded
//! modules first, in load order, then link-time registrations) and the result
//! is cached for the life of the registry.
//!
//! # Concurrency
//!
//! A single lock spans the cache check, the scan, and the insert. Concurrent
//! first resolutions of a kind therefore scan once and all observe the same
//! instance. Factories run under that lock and must not call back into the
//! registry.

pub mod descriptor;

pub use descriptor::{
    AdapterFactory, ExtensionModule, ProvideAdapter, RegistrationDescriptor, provide,
};

use crate::context::{ContextAdapter, NullAdapter, PortableAdapter};
use crate::error::ContextError;
use crate::tracing_compat::{debug, info, warn};
use crate::types::ContextKind;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Process-scoped cache of resolved adapters.
pub struct AdapterRegistry {
    null: Arc<dyn ContextAdapter>,
    portable: Arc<dyn ContextAdapter>,
    modules: RwLock<Vec<ExtensionModule>>,
    cache: Mutex<BTreeMap<ContextKind, Arc<dyn ContextAdapter>>>,
    scans: AtomicUsize,
}

impl AdapterRegistry {
    /// A registry over the process-wide built-in adapters.
    #[must_use]
    pub fn new() -> Self {
        Self::with_builtins(NullAdapter::shared(), PortableAdapter::shared())
    }

    /// A registry over caller-supplied built-in adapters.
    #[must_use]
    pub fn with_builtins(
        null: Arc<dyn ContextAdapter>,
        portable: Arc<dyn ContextAdapter>,
    ) -> Self {
        Self {
            null,
            portable,
            modules: RwLock::new(Vec::new()),
            cache: Mutex::new(BTreeMap::new()),
            scans: AtomicUsize::new(0),
        }
    }

    /// Makes `module`'s descriptors visible to later scans.
    ///
    /// Kinds already resolved keep their cached adapter.
    pub fn load_module(&self, module: ExtensionModule) {
        debug!(
            module = %module.name(),
            descriptors = module.descriptors().len(),
            "extension module loaded"
        );
        self.modules.write().push(module);
    }

    /// Returns the adapter for `kind`, discovering it on first use.
    pub fn resolve(&self, kind: ContextKind) -> Result<Arc<dyn ContextAdapter>, ContextError> {
        match kind {
            ContextKind::None => return Ok(Arc::clone(&self.null)),
            ContextKind::Portable => return Ok(Arc::clone(&self.portable)),
            _ => {}
        }

        let mut cache = self.cache.lock();
        if let Some(adapter) = cache.get(&kind) {
            return Ok(Arc::clone(adapter));
        }
        let adapter = self.scan(kind)?;
        cache.insert(kind, Arc::clone(&adapter));
        Ok(adapter)
    }

    fn scan(&self, kind: ContextKind) -> Result<Arc<dyn ContextAdapter>, ContextError> {
        self.scans.fetch_add(1, Ordering::Relaxed);

        let mut matches = self.descriptors().into_iter().filter(|d| d.kind() == kind);
        let Some(descriptor) = matches.next() else {
            warn!(kind = %kind, "no adapter registered for context kind");
            return Err(ContextError::UnsupportedKind { kind });
        };
        let shadowed = matches.count();
        if shadowed > 0 {
            warn!(
                kind = %kind,
                adapter = descriptor.adapter_type(),
                shadowed,
                "multiple adapters registered; first match wins"
            );
        }

        let adapter = descriptor
            .instantiate()
            .ok_or(ContextError::MissingInstance {
                kind,
                adapter: descriptor.adapter_type(),
            })?;
        let actual = adapter.kind();
        if actual != kind {
            return Err(ContextError::AdapterKindMismatch {
                requested: kind,
                actual,
                adapter: descriptor.adapter_type(),
            });
        }

        info!(kind = %kind, adapter = descriptor.adapter_type(), "context adapter resolved");
        Ok(adapter)
    }

    /// Every visible descriptor in scan order.
    #[must_use]
    pub fn descriptors(&self) -> Vec<RegistrationDescriptor> {
        let modules = self.modules.read();
        modules
            .iter()
            .flat_map(|module| module.descriptors().iter().copied())
            .chain(inventory::iter::<RegistrationDescriptor>.into_iter().copied())
            .collect()
    }

    /// Names of the loaded extension modules, in load order.
    #[must_use]
    pub fn module_names(&self) -> Vec<String> {
        self.modules
            .read()
            .iter()
            .map(|module| module.name().to_owned())
            .collect()
    }

    /// Number of descriptor scans performed so far.
    #[must_use]
    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::Relaxed)
    }

    /// Platform kinds resolved and cached so far.
    #[must_use]
    pub fn cached_kinds(&self) -> Vec<ContextKind> {
        self.cache.lock().keys().copied().collect()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("modules", &self.module_names())
            .field("cached", &self.cached_kinds())
            .field("scans", &self.scan_count())
            .finish()
    }
}
