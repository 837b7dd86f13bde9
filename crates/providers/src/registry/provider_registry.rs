//! Catalog of every known provider.
//!
//! The registry is read-only after construction. Registration order is kept
//! because it breaks priority ties when listing a category.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use log::debug;

use super::descriptor::ProviderDescriptor;
use crate::config::ProviderConfig;
use crate::errors::ConfigError;
use crate::models::{Category, ProviderId};

#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<ProviderDescriptor>>,
}

impl ProviderRegistry {
    /// Build a registry from already validated descriptors.
    ///
    /// Fails on duplicate ids.
    pub fn new(descriptors: Vec<ProviderDescriptor>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for descriptor in &descriptors {
            if !seen.insert(descriptor.id.clone()) {
                return Err(ConfigError::DuplicateProvider(descriptor.id.to_string()));
            }
        }

        Ok(Self {
            providers: descriptors.into_iter().map(Arc::new).collect(),
        })
    }

    /// Validate configuration entries and build the registry.
    ///
    /// Entries with `enabled = false` are skipped but still validated, so a
    /// typo in a disabled entry fails just as loudly.
    pub fn from_configs(configs: &[ProviderConfig]) -> Result<Self, ConfigError> {
        let mut descriptors = Vec::with_capacity(configs.len());
        for config in configs {
            let descriptor = ProviderDescriptor::try_from(config)?;
            if config.enabled {
                descriptors.push(descriptor);
            } else {
                debug!("Provider '{}' is disabled, not registering", descriptor.id);
            }
        }
        Self::new(descriptors)
    }

    /// Providers of a category, ordered by base priority then registration order.
    pub fn list_providers(&self, category: Category) -> Vec<Arc<ProviderDescriptor>> {
        let mut providers: Vec<_> = self
            .providers
            .iter()
            .filter(|p| p.category == category)
            .cloned()
            .collect();

        // sort_by_key is stable, registration order survives ties
        providers.sort_by_key(|p| p.priority);
        providers
    }

    pub fn get(&self, id: &str) -> Option<&Arc<ProviderDescriptor>> {
        self.providers.iter().find(|p| &*p.id == id)
    }

    /// All providers in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ProviderDescriptor>> {
        self.providers.iter()
    }

    /// Provider ids in registration order.
    pub fn ids(&self) -> Vec<ProviderId> {
        self.providers.iter().map(|p| p.id.clone()).collect()
    }

    /// Categories with at least one registered provider.
    pub fn categories(&self) -> BTreeSet<Category> {
        self.providers.iter().map(|p| p.category).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
