//! Named extension discovery.
//!
//! Capabilities (serializers, compressors, load balancers) are wired up
//! through descriptor resources: a text file whose first meaningful line
//! names the capability and whose remaining lines map extension names to
//! provider identifiers. Providers themselves are registered in code as
//! factories; the descriptor controls which are exposed and in what order.
//!
//! ```text
//! parallax.balancer
//! random=balance::RandomBalancer
//! round_robin=balance::RoundRobinBalancer
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;

/// Errors from extension lookup.
#[derive(Error, Debug)]
pub enum ExtensionError {
    /// The descriptor resource is empty or malformed.
    #[error("malformed extension descriptor: {0}")]
    MalformedDescriptor(String),

    /// No extension is declared under the name.
    #[error("extension not found: {capability}/{name}")]
    NotFound { capability: String, name: String },

    /// The descriptor names a provider with no registered factory.
    #[error("no provider registered for {capability}/{name} (provider id {provider})")]
    MissingProvider {
        capability: String,
        name: String,
        provider: String,
    },
}

type Factory<T> = Box<dyn Fn() -> Arc<T> + Send + Sync>;

/// Loader for one capability.
///
/// Instances returned by [`ExtensionLoader::get`] are cached singletons;
/// the first declared name in the descriptor is the default.
pub struct ExtensionLoader<T: ?Sized + Send + Sync + 'static> {
    capability: String,
    /// `(name, provider id)` pairs in descriptor order, first-wins on dupes.
    entries: Vec<(String, String)>,
    factories: HashMap<String, Factory<T>>,
    instances: DashMap<String, Arc<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> ExtensionLoader<T> {
    /// Builds a loader from a descriptor resource and a factory table.
    ///
    /// Factory-table keys are provider identifiers as referenced by the
    /// descriptor. A provider missing from the table is only an error at
    /// first lookup of the affected name, mirroring lazy instantiation.
    pub fn from_descriptor(
        descriptor: &str,
        factories: HashMap<String, Factory<T>>,
    ) -> Result<Self, ExtensionError> {
        let mut lines = descriptor
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'));

        let capability = lines
            .next()
            .ok_or_else(|| ExtensionError::MalformedDescriptor("empty descriptor".to_owned()))?
            .to_owned();

        let mut entries: Vec<(String, String)> = Vec::new();
        for line in lines {
            let (name, provider) = line.split_once('=').ok_or_else(|| {
                ExtensionError::MalformedDescriptor(format!("expected name=provider, got {line:?}"))
            })?;
            let name = name.trim();
            let provider = provider.trim();
            if name.is_empty() || provider.is_empty() {
                return Err(ExtensionError::MalformedDescriptor(format!(
                    "blank name or provider in {line:?}"
                )));
            }
            // Duplicate names resolve to the first occurrence.
            if entries.iter().any(|(existing, _)| existing == name) {
                continue;
            }
            entries.push((name.to_owned(), provider.to_owned()));
        }

        Ok(Self {
            capability,
            entries,
            factories,
            instances: DashMap::new(),
        })
    }

    /// The capability this loader serves.
    #[must_use]
    pub fn capability(&self) -> &str {
        &self.capability
    }

    /// Declared extension names in descriptor order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Returns the cached singleton registered under `name`.
    pub fn get(&self, name: &str) -> Result<Arc<T>, ExtensionError> {
        if let Some(instance) = self.instances.get(name) {
            return Ok(instance.clone());
        }

        let provider = self
            .entries
            .iter()
            .find(|(entry_name, _)| entry_name == name)
            .map(|(_, provider)| provider.as_str())
            .ok_or_else(|| ExtensionError::NotFound {
                capability: self.capability.clone(),
                name: name.to_owned(),
            })?;

        let factory =
            self.factories
                .get(provider)
                .ok_or_else(|| ExtensionError::MissingProvider {
                    capability: self.capability.clone(),
                    name: name.to_owned(),
                    provider: provider.to_owned(),
                })?;

        let instance = self
            .instances
            .entry(name.to_owned())
            .or_insert_with(|| factory())
            .clone();
        Ok(instance)
    }

    /// Returns the first-declared extension.
    pub fn get_default(&self) -> Result<Arc<T>, ExtensionError> {
        let name = self
            .entries
            .first()
            .map(|(name, _)| name.clone())
            .ok_or_else(|| ExtensionError::NotFound {
                capability: self.capability.clone(),
                name: "<default>".to_owned(),
            })?;
        self.get(&name)
    }
}

/// Convenience for building factory tables.
#[macro_export]
macro_rules! extension_factories {
    ($trait_ty:ty; $($provider:literal => $ctor:expr),+ $(,)?) => {{
        let mut table: ::std::collections::HashMap<
            String,
            Box<dyn Fn() -> ::std::sync::Arc<$trait_ty> + Send + Sync>,
        > = ::std::collections::HashMap::new();
        $(
            table.insert(
                $provider.to_owned(),
                Box::new(|| ::std::sync::Arc::new($ctor) as ::std::sync::Arc<$trait_ty>),
            );
        )+
        table
    }};
}
