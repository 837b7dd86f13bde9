use std::sync::Arc;

/// Provider identifier, loaded from configuration and shared cheaply
pub type ProviderId = Arc<str>;
