//! Provider transports.
//!
//! A transport performs the I/O for one provider call and normalizes whatever
//! the provider returned into a canonical [`Payload`]. Everything above this
//! boundary only ever sees canonical payloads or a [`ProviderError`].

mod http;

pub use http::{CanonicalJsonNormalizer, HttpTransport, ResponseNormalizer};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::ProviderError;
use crate::models::{Category, LogicalRequest, Payload};
use crate::registry::ProviderDescriptor;

/// Performs calls against external providers.
///
/// Implementations do not need to enforce the descriptor timeout: the
/// dispatcher bounds every call. They must map failures onto
/// [`ProviderError`] and never panic on malformed provider output.
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    async fn call(
        &self,
        provider: &ProviderDescriptor,
        request: &LogicalRequest,
    ) -> Result<Payload, ProviderError>;
}

pub type SharedTransport = Arc<dyn ProviderTransport>;

/// One transport per category.
#[derive(Clone, Default)]
pub struct TransportSet {
    by_category: HashMap<Category, SharedTransport>,
}

impl TransportSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The same transport for every category.
    pub fn uniform(transport: SharedTransport) -> Self {
        let mut set = Self::new();
        for category in Category::ALL {
            set.insert(category, transport.clone());
        }
        set
    }

    pub fn insert(&mut self, category: Category, transport: SharedTransport) {
        self.by_category.insert(category, transport);
    }

    pub fn with(mut self, category: Category, transport: SharedTransport) -> Self {
        self.insert(category, transport);
        self
    }

    pub fn get(&self, category: Category) -> Option<&SharedTransport> {
        self.by_category.get(&category)
    }

    pub fn contains(&self, category: Category) -> bool {
        self.by_category.contains_key(&category)
    }
}

impl fmt::Debug for TransportSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut categories: Vec<_> = self.by_category.keys().collect();
        categories.sort();
        f.debug_struct("TransportSet")
            .field("categories", &categories)
            .finish()
    }
}
