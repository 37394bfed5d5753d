use crate::definition::DetectorDefinition;
use oxwatch_common::types::SignalId;
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Source of detector definitions.
pub trait DefinitionStore: Send + Sync {
    fn definitions_for(&self, signal_id: &str) -> anyhow::Result<Vec<DetectorDefinition>>;

    /// Signals that have at least one definition.
    fn signals(&self) -> anyhow::Result<Vec<SignalId>>;
}

/// In-memory definition store keyed by signal.
#[derive(Default)]
pub struct MemoryDefinitionStore {
    by_signal: RwLock<BTreeMap<SignalId, Vec<DetectorDefinition>>>,
}

impl MemoryDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_definitions(definitions: impl IntoIterator<Item = DetectorDefinition>) -> Self {
        let store = Self::new();
        for definition in definitions {
            store.upsert(definition);
        }
        store
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<SignalId, Vec<DetectorDefinition>>> {
        self.by_signal
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<SignalId, Vec<DetectorDefinition>>> {
        self.by_signal
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Inserts or replaces the definition with the same id.
    pub fn upsert(&self, definition: DetectorDefinition) {
        let mut by_signal = self.write();
        for definitions in by_signal.values_mut() {
            definitions.retain(|d| d.id != definition.id);
        }
        by_signal.retain(|_, definitions| !definitions.is_empty());
        by_signal
            .entry(definition.signal_id.clone())
            .or_default()
            .push(definition);
    }

    /// Removes a definition, returning the signal it was attached to.
    pub fn remove(&self, definition_id: &str) -> Option<SignalId> {
        let mut by_signal = self.write();
        let signal = by_signal
            .iter()
            .find(|(_, definitions)| definitions.iter().any(|d| d.id == definition_id))
            .map(|(signal, _)| signal.clone())?;
        if let Some(definitions) = by_signal.get_mut(&signal) {
            definitions.retain(|d| d.id != definition_id);
            if definitions.is_empty() {
                by_signal.remove(&signal);
            }
        }
        Some(signal)
    }

    pub fn len(&self) -> usize {
        self.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl DefinitionStore for MemoryDefinitionStore {
    fn definitions_for(&self, signal_id: &str) -> anyhow::Result<Vec<DetectorDefinition>> {
        Ok(self.read().get(signal_id).cloned().unwrap_or_default())
    }

    fn signals(&self) -> anyhow::Result<Vec<SignalId>> {
        Ok(self.read().keys().cloned().collect())
    }
}
