use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::{Backend, BackendContext, Secrets, s3};
use crate::error::{Error, Result};

/// Builds a backend instance for one request.
pub type BackendFactory =
    Arc<dyn Fn(&BackendContext, &Secrets) -> Result<Box<dyn Backend>> + Send + Sync>;

/// Maps backend selectors to factories. Selectors match exactly.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("BackendRegistry")
            .field("backends", &names)
            .finish()
    }
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in backend.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(s3::BACKEND_NAME, s3::factory());
        registry
    }

    /// Register `factory` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, factory: BackendFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn build(
        &self,
        name: &str,
        ctx: &BackendContext,
        secrets: &Secrets,
    ) -> Result<Box<dyn Backend>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::UnknownBackend(name.to_string()))?;
        debug!(backend = name, "building backend");
        factory(ctx, secrets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::backend_context;
    use tempfile::TempDir;

    #[test]
    fn defaults_register_s3() {
        let registry = BackendRegistry::with_defaults();
        assert!(registry.contains("s3"));
        assert!(!registry.contains("S3"));
    }

    #[test]
    fn unknown_selector_is_an_error() {
        let temp = TempDir::new().unwrap();
        let registry = BackendRegistry::with_defaults();
        let err = registry
            .build("nfs", &backend_context(temp.path()), &Secrets::new())
            .err()
            .expect("unknown backend");
        assert!(matches!(err, Error::UnknownBackend(name) if name == "nfs"));
    }

    #[test]
    fn s3_without_secrets_still_builds() {
        let temp = TempDir::new().unwrap();
        let backend = BackendRegistry::with_defaults()
            .build("s3", &backend_context(temp.path()), &Secrets::new())
            .unwrap();
        assert_eq!(backend.name(), "s3");
    }
}
