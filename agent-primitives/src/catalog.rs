//! Loading and lookup of the tool catalog.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::{Error, Result, ToolDescriptor};

/// Ordered collection of tool descriptors with unique names.
///
/// Insertion order is significant: it breaks similarity ties during retrieval.
/// The catalog is immutable once loaded and cheap to share behind an `Arc`.
#[derive(Clone, Default)]
pub struct ToolCatalog {
    tools: Vec<Arc<ToolDescriptor>>,
    by_name: HashMap<String, usize>,
}

impl ToolCatalog {
    /// Builds a catalog from descriptors, preserving their order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateTool`] when two descriptors share a name.
    pub fn from_descriptors<I>(descriptors: I) -> Result<Self>
    where
        I: IntoIterator<Item = ToolDescriptor>,
    {
        let mut catalog = Self::default();
        for descriptor in descriptors {
            let name = descriptor.name().to_owned();
            if catalog.by_name.contains_key(&name) {
                return Err(Error::DuplicateTool { name });
            }
            catalog.by_name.insert(name, catalog.tools.len());
            catalog.tools.push(Arc::new(descriptor));
        }
        Ok(catalog)
    }

    /// Parses a catalog from JSON text.
    ///
    /// The document is either an array of descriptors or an object holding
    /// that array under `tools`.
    ///
    /// # Errors
    ///
    /// Fails fast on malformed JSON, on descriptors missing `name` or
    /// `description`, on invalid parameter schemas and on duplicate names.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let document: Value = serde_json::from_str(text)?;
        let entries = match document {
            Value::Array(entries) => entries,
            Value::Object(mut root) => match root.remove("tools") {
                Some(Value::Array(entries)) => entries,
                _ => {
                    return Err(Error::invalid_descriptor(
                        "",
                        "catalog object must hold a `tools` array",
                    ));
                }
            },
            _ => {
                return Err(Error::invalid_descriptor(
                    "",
                    "catalog must be a JSON array of tool descriptors",
                ));
            }
        };

        let mut descriptors = Vec::with_capacity(entries.len());
        for (position, entry) in entries.into_iter().enumerate() {
            for field in ["name", "description"] {
                let present = entry
                    .get(field)
                    .and_then(Value::as_str)
                    .is_some_and(|value| !value.trim().is_empty());
                if !present {
                    return Err(Error::MissingField { position, field });
                }
            }
            descriptors.push(serde_json::from_value::<ToolDescriptor>(entry)?);
        }

        let catalog = Self::from_descriptors(descriptors)?;
        debug!(tools = catalog.len(), "parsed tool catalog");
        Ok(catalog)
    }

    /// Reads and parses a catalog file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the file cannot be read, plus every error of
    /// [`ToolCatalog::from_json_str`].
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_json_str(&text)?;
        info!(path = %path.display(), tools = catalog.len(), "loaded tool catalog");
        Ok(catalog)
    }

    /// Looks up a descriptor by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<ToolDescriptor>> {
        self.by_name.get(name).map(|&idx| &self.tools[idx])
    }

    /// Returns the insertion position of a tool.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Returns `true` when the catalog defines `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Iterates descriptors in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ToolDescriptor>> {
        self.tools.iter()
    }

    /// Number of descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` when the catalog holds no descriptors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl fmt::Debug for ToolCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolCatalog")
            .field("tools", &self.tools.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const SAMPLE: &str = r#"[
        {"name": "get_current_time", "server": "utility", "description": "Current date and time",
         "category": "utility", "keywords": ["time", "date"], "parameters": {},
         "examples": ["what time is it"]},
        {"name": "calculate", "server": "utility", "description": "Evaluate arithmetic",
         "parameters": {"expression": "string"}}
    ]"#;

    #[test]
    fn preserves_insertion_order() {
        let catalog = ToolCatalog::from_json_str(SAMPLE).expect("catalog");
        let names: Vec<_> = catalog.iter().map(|d| d.name().to_owned()).collect();
        assert_eq!(names, ["get_current_time", "calculate"]);
        assert_eq!(catalog.position("calculate"), Some(1));
        assert!(catalog.get("missing").is_none());
    }

    #[test]
    fn wrapped_tools_object_is_accepted() {
        let wrapped = format!(r#"{{"tools": {SAMPLE}}}"#);
        let catalog = ToolCatalog::from_json_str(&wrapped).expect("catalog");
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn duplicate_names_fail_fast() {
        let text = r#"[{"name": "a", "description": "x"}, {"name": "a", "description": "y"}]"#;
        let err = ToolCatalog::from_json_str(text).expect_err("duplicate");
        assert!(matches!(err, Error::DuplicateTool { ref name } if name == "a"));
    }

    #[test]
    fn missing_description_reports_position() {
        let text = r#"[{"name": "a", "description": "x"}, {"name": "b"}]"#;
        let err = ToolCatalog::from_json_str(text).expect_err("missing");
        assert!(matches!(
            err,
            Error::MissingField {
                position: 1,
                field: "description"
            }
        ));
    }

    #[test]
    fn missing_name_is_rejected() {
        let err = ToolCatalog::from_json_str(r#"[{"description": "x"}]"#).expect_err("missing");
        assert!(matches!(err, Error::MissingField { field: "name", .. }));
    }

    #[test]
    fn empty_catalog_is_valid() {
        let catalog = ToolCatalog::from_json_str("[]").expect("catalog");
        assert!(catalog.is_empty());
    }

    #[test]
    fn reads_from_disk() {
        let path = std::env::temp_dir().join(format!("catalog-{}.json", Uuid::new_v4()));
        std::fs::write(&path, SAMPLE).expect("write");
        let catalog = ToolCatalog::from_path(&path).expect("catalog");
        assert_eq!(catalog.len(), 2);
        let _ = std::fs::remove_file(path);

        let err = ToolCatalog::from_path("/nonexistent/catalog.json").expect_err("io");
        assert!(matches!(err, Error::Io { .. }));
    }
}
