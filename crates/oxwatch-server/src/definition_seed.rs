use anyhow::Context;
use oxwatch_detect::{DetectorDefinition, MemoryDefinitionStore};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Seed file layout: `{"definitions": [...]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefinitionsSeedFile {
    #[serde(default)]
    pub definitions: Vec<DetectorDefinition>,
}

pub fn load_seed_file(path: impl AsRef<Path>) -> anyhow::Result<DefinitionsSeedFile> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read definitions seed {}", path.display()))?;
    let seed: DefinitionsSeedFile = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse definitions seed {}", path.display()))?;
    Ok(seed)
}

/// Loads valid definitions into `store`. Invalid or duplicate entries are
/// skipped with a warning. Returns the number inserted.
pub fn seed_store(store: &MemoryDefinitionStore, seed: DefinitionsSeedFile) -> usize {
    let total = seed.definitions.len();
    let mut seen = HashSet::new();
    let mut inserted = 0usize;

    for definition in seed.definitions {
        if !seen.insert(definition.id.clone()) {
            tracing::warn!(definition_id = %definition.id, "Duplicate definition id skipped");
            continue;
        }
        if let Err(e) = definition.validate() {
            tracing::warn!(definition_id = %definition.id, error = %e, "Failed to seed definition");
            continue;
        }
        tracing::debug!(
            definition_id = %definition.id,
            signal_id = %definition.signal_id,
            kind = definition.detector.name(),
            "Seeded definition"
        );
        store.upsert(definition);
        inserted += 1;
    }

    tracing::info!(inserted, total, "Detector definitions loaded");
    inserted
}
