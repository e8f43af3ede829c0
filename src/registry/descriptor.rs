//! Registration descriptors.
//!
//! A descriptor is the declarative `(kind, adapter type)` record an extension
//! publishes so the registry can find its adapter without the core knowing
//! about it. Descriptors reach the registry two ways:
//!
//! - link-time, with [`register_adapter!`](crate::register_adapter), collected
//!   through `inventory`
//! - explicitly, grouped in an [`ExtensionModule`] passed to
//!   [`AdapterRegistry::load_module`](super::AdapterRegistry::load_module)

use crate::context::ContextAdapter;
use crate::types::ContextKind;
use std::fmt;
use std::sync::Arc;

/// Produces an adapter's process-wide instance, or `None` if it has none.
pub type AdapterFactory = fn() -> Option<Arc<dyn ContextAdapter>>;

/// Declarative metadata naming the adapter for one context kind.
#[derive(Clone, Copy)]
pub struct RegistrationDescriptor {
    kind: ContextKind,
    adapter_type: &'static str,
    factory: AdapterFactory,
}

impl RegistrationDescriptor {
    /// Creates a descriptor from its parts.
    #[must_use]
    pub const fn new(
        kind: ContextKind,
        adapter_type: &'static str,
        factory: AdapterFactory,
    ) -> Self {
        Self {
            kind,
            adapter_type,
            factory,
        }
    }

    /// Describes adapter type `A` serving `kind`.
    #[must_use]
    pub fn of<A: ProvideAdapter>(kind: ContextKind) -> Self {
        Self::new(kind, std::any::type_name::<A>(), provide::<A>)
    }

    /// Kind this descriptor claims.
    #[must_use]
    pub const fn kind(&self) -> ContextKind {
        self.kind
    }

    /// Type identity of the advertised adapter.
    #[must_use]
    pub const fn adapter_type(&self) -> &'static str {
        self.adapter_type
    }

    /// Obtains the advertised adapter instance.
    #[must_use]
    pub fn instantiate(&self) -> Option<Arc<dyn ContextAdapter>> {
        (self.factory)()
    }
}

impl fmt::Debug for RegistrationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationDescriptor")
            .field("kind", &self.kind)
            .field("adapter_type", &self.adapter_type)
            .finish_non_exhaustive()
    }
}

inventory::collect!(RegistrationDescriptor);

/// An adapter type that exposes its process-wide instance.
///
/// The registry calls [`instance`](Self::instance) at most once per registry
/// and kind, then caches the result.
pub trait ProvideAdapter: ContextAdapter + Sized {
    /// The singleton instance, or `None` if this process cannot provide one.
    fn instance() -> Option<Arc<Self>>;
}

/// Factory for adapter type `A`, usable in const position.
#[must_use]
pub fn provide<A: ProvideAdapter>() -> Option<Arc<dyn ContextAdapter>> {
    A::instance().map(|adapter| adapter as Arc<dyn ContextAdapter>)
}

/// A named group of descriptors loaded into a registry at startup.
#[derive(Debug, Clone)]
pub struct ExtensionModule {
    name: String,
    descriptors: Vec<RegistrationDescriptor>,
}

impl ExtensionModule {
    /// Creates an empty module.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descriptors: Vec::new(),
        }
    }

    /// Adds a descriptor.
    #[must_use]
    pub fn with_descriptor(mut self, descriptor: RegistrationDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Adds a descriptor for adapter type `A` serving `kind`.
    #[must_use]
    pub fn register<A: ProvideAdapter>(self, kind: ContextKind) -> Self {
        self.with_descriptor(RegistrationDescriptor::of::<A>(kind))
    }

    /// Module name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Descriptors in declaration order.
    #[must_use]
    pub fn descriptors(&self) -> &[RegistrationDescriptor] {
        &self.descriptors
    }
}

/// Registers an adapter type for a context kind at link time.
///
/// The type must implement [`ProvideAdapter`].
///
/// ```ignore
/// syncfact::register_adapter!(syncfact::ContextKind::Gtk, GtkAdapter);
/// ```
#[macro_export]
macro_rules! register_adapter {
    ($kind:expr, $adapter:ty $(,)?) => {
        $crate::__private::inventory::submit! {
            $crate::registry::RegistrationDescriptor::new(
                $kind,
                concat!(module_path!(), "::", stringify!($adapter)),
                $crate::registry::provide::<$adapter>,
            )
        }
    };
}
