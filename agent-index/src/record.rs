//! Indexed records and the text they are embedded from.

use agent_primitives::{ToolCatalog, ToolDescriptor};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::embeddings::EmbeddingVector;

/// One embedded tool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    tool_name: String,
    vector: EmbeddingVector,
    source_text: String,
}

impl EmbeddingRecord {
    /// Creates a record.
    #[must_use]
    pub fn new(tool_name: impl Into<String>, vector: EmbeddingVector, source_text: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            vector,
            source_text: source_text.into(),
        }
    }

    /// Name of the embedded tool.
    #[must_use]
    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    /// Embedding of [`EmbeddingRecord::source_text`].
    #[must_use]
    pub fn vector(&self) -> &EmbeddingVector {
        &self.vector
    }

    /// Text the vector was computed from.
    #[must_use]
    pub fn source_text(&self) -> &str {
        &self.source_text
    }
}

/// Deterministic text embedded for a descriptor.
///
/// Name, description, category, keywords (sorted) and examples, one per line,
/// without field labels so that only descriptive words reach the embedder.
/// Absent fields are skipped.
#[must_use]
pub fn source_text(descriptor: &ToolDescriptor) -> String {
    let mut lines = vec![
        descriptor.name().to_owned(),
        descriptor.description().to_owned(),
    ];
    if let Some(category) = descriptor.category() {
        lines.push(category.to_owned());
    }
    if !descriptor.keywords().is_empty() {
        let keywords: Vec<&str> = descriptor.keywords().iter().map(String::as_str).collect();
        lines.push(keywords.join(", "));
    }
    if !descriptor.examples().is_empty() {
        lines.push(descriptor.examples().join("; "));
    }
    lines.join("\n")
}

/// SHA-256 over every descriptor's source text, hex encoded.
///
/// Any change that would alter an embedding, including reordering, changes the
/// hash.
#[must_use]
pub fn catalog_hash(catalog: &ToolCatalog) -> String {
    let mut hasher = Sha256::new();
    for descriptor in catalog.iter() {
        hasher.update(descriptor.name().as_bytes());
        hasher.update(b"|");
        hasher.update(source_text(descriptor).as_bytes());
        hasher.update(b"\n");
    }
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(description: &str) -> ToolDescriptor {
        ToolDescriptor::builder("get_current_time", description)
            .category("utility")
            .keyword("time")
            .keyword("clock")
            .example("what time is it")
            .build()
            .unwrap()
    }

    #[test]
    fn source_text_is_deterministic() {
        let text = source_text(&descriptor("Current local time"));
        assert_eq!(
            text,
            "get_current_time\nCurrent local time\nutility\nclock, time\nwhat time is it"
        );
    }

    #[test]
    fn hash_changes_with_catalog_content() {
        let a = ToolCatalog::from_descriptors([descriptor("Current local time")]).unwrap();
        let b = ToolCatalog::from_descriptors([descriptor("Current UTC time")]).unwrap();
        assert_ne!(catalog_hash(&a), catalog_hash(&b));
        assert_eq!(catalog_hash(&a), catalog_hash(&a.clone()));
        assert_eq!(catalog_hash(&a).len(), 64);
    }
}
