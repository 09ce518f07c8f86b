use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::error::{FlowError, Result};

/// Number of leading protocol chunks handed to the report composer.
pub const PROTOCOL_EXCERPT_CHUNKS: usize = 3;

/// Reference protocol text for a study type, in document order. An empty
/// result means "no protocol data".
#[async_trait]
pub trait ProtocolStore: Send + Sync {
    async fn lookup(&self, study_type: &str) -> Result<Vec<String>>;
}

/// Joins the leading chunks used as the systematic-review reference.
pub fn protocol_excerpt(chunks: &[String]) -> String {
    chunks
        .iter()
        .take(PROTOCOL_EXCERPT_CHUNKS)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// On-disk protocol library:
///
/// ```yaml
/// studies:
///   ct_chest:
///     - "Lungs: evaluate for nodules, consolidation..."
/// techniques:
///   ct_chest: "Volume scan of chest was done without IV contrast."
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct ProtocolLibrary {
    #[serde(default)]
    pub studies: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub techniques: BTreeMap<String, String>,
}

impl ProtocolLibrary {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw)
            .map_err(|e| FlowError::InvalidInput(format!("invalid protocol library: {e}")))
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            FlowError::InvalidInput(format!(
                "cannot read protocol library {}: {e}",
                path.display()
            ))
        })?;
        let library = Self::from_yaml(&raw)?;
        info!(
            path = %path.display(),
            studies = library.studies.len(),
            "Loaded protocol library"
        );
        Ok(library)
    }
}

/// In-memory implementation of ProtocolStore
pub struct InMemoryProtocolStore {
    studies: Arc<DashMap<String, Vec<String>>>,
}

impl InMemoryProtocolStore {
    pub fn new() -> Self {
        Self {
            studies: Arc::new(DashMap::new()),
        }
    }

    pub fn from_library(library: &ProtocolLibrary) -> Self {
        let store = Self::new();
        for (study_type, chunks) in &library.studies {
            store.insert(study_type.clone(), chunks.clone());
        }
        store
    }

    pub fn insert(&self, study_type: impl Into<String>, chunks: Vec<String>) {
        self.studies.insert(study_type.into(), chunks);
    }

    pub fn study_types(&self) -> Vec<String> {
        let mut studies: Vec<String> = self.studies.iter().map(|e| e.key().clone()).collect();
        studies.sort();
        studies
    }
}

impl Default for InMemoryProtocolStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolStore for InMemoryProtocolStore {
    async fn lookup(&self, study_type: &str) -> Result<Vec<String>> {
        Ok(self
            .studies
            .get(study_type)
            .map(|entry| entry.clone())
            .unwrap_or_default())
    }
}
