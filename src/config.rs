//! Engine-wide configuration.
//!
//! One immutable value constructed at startup and passed by reference;
//! nothing here is global or mutated after construction.

use crate::errors::EntityGraphError;

/// Upper bound on a single bulk-fetch batch regardless of input size.
pub const MAX_BATCH_CEILING: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Prefix for storage identities (IRIs). Record ids are appended as
    /// `{iri_base}:{id}`.
    pub iri_base: String,
    /// Cap on bulk-fetch batch size.
    pub max_batch: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            iri_base: "urn:entity".to_string(),
            max_batch: MAX_BATCH_CEILING,
        }
    }
}

impl EngineConfig {
    pub fn new(iri_base: impl Into<String>) -> Result<Self, EntityGraphError> {
        let iri_base = iri_base.into();
        if iri_base.trim().is_empty() {
            return Err(EntityGraphError::config("iri_base must not be empty"));
        }
        Ok(Self {
            iri_base,
            ..Self::default()
        })
    }

    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch.clamp(1, MAX_BATCH_CEILING);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_usable() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.iri_base, "urn:entity");
        assert!(cfg.max_batch > 0);
    }

    #[test]
    fn empty_base_rejected() {
        assert!(EngineConfig::new("  ").is_err());
    }

    #[test]
    fn max_batch_clamped() {
        let cfg = EngineConfig::default().with_max_batch(0);
        assert_eq!(cfg.max_batch, 1);
        let cfg = EngineConfig::default().with_max_batch(10_000);
        assert_eq!(cfg.max_batch, MAX_BATCH_CEILING);
    }
}
