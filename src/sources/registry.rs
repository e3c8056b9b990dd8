use super::Source;
use crate::models::SourceDescriptor;
use std::sync::{Arc, PoisonError, RwLock};

struct Entry {
    source: Arc<dyn Source>,
    enabled: bool,
}

/// Ordered, runtime-configurable set of sources.
///
/// Registration order is query order for the aggregator.
#[derive(Default)]
pub struct SourceRegistry {
    entries: RwLock<Vec<Entry>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `source` enabled. A source with the same id is replaced in place.
    pub fn register(&self, source: Arc<dyn Source>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let id = source.id().to_string();
        match entries.iter_mut().find(|e| e.source.id() == id) {
            Some(existing) => {
                log::debug!("Replacing source {}", id);
                existing.source = source;
                existing.enabled = true;
            }
            None => {
                log::debug!("Registered source {}", id);
                entries.push(Entry {
                    source,
                    enabled: true,
                });
            }
        }
    }

    fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.iter_mut().find(|e| e.source.id() == id) {
            Some(entry) => {
                entry.enabled = enabled;
                log::info!("Source {} {}", id, if enabled { "enabled" } else { "disabled" });
                true
            }
            None => false,
        }
    }

    /// Returns `false` when no source has this id
    pub fn enable(&self, id: &str) -> bool {
        self.set_enabled(id, true)
    }

    pub fn disable(&self, id: &str) -> bool {
        self.set_enabled(id, false)
    }

    /// Enabled sources in registration order
    pub fn enabled(&self) -> Vec<Arc<dyn Source>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .filter(|e| e.enabled)
            .map(|e| e.source.clone())
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Source>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .find(|e| e.source.id() == id)
            .map(|e| e.source.clone())
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.iter().any(|e| e.enabled && e.source.id() == id)
    }

    /// Every registered source with its enabled flag
    pub fn descriptors(&self) -> Vec<(SourceDescriptor, bool)> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .map(|e| (e.source.descriptor().clone(), e.enabled))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
