//! Reading configuration files and applying environment overrides.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::schema::{DecisionProvider, EmptyCandidates, RetrievalMode, RuntimeConfig};

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "TOOLRAG_";

impl RuntimeConfig {
    /// Parses a TOML document without validating it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys.
    pub fn from_toml_str(source: &str) -> ConfigResult<Self> {
        toml::from_str(source).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })
    }

    /// Applies `TOOLRAG_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] when a value cannot be parsed.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |suffix: &str| {
            let key = format!("{ENV_PREFIX}{suffix}");
            lookup(&key).map(|value| (key, value))
        };

        if let Some((key, value)) = get("RETRIEVAL_MODE") {
            self.retrieval.mode = parse::<RetrievalMode>(&key, &value)?;
        }
        if let Some((key, value)) = get("TOP_K") {
            self.retrieval.top_k = parse(&key, &value)?;
        }
        if let Some((key, value)) = get("SCORE_THRESHOLD") {
            self.retrieval.score_threshold = parse(&key, &value)?;
        }
        if let Some((key, value)) = get("EMPTY_CANDIDATES") {
            self.retrieval.empty_candidates = parse::<EmptyCandidates>(&key, &value)?;
        }
        if let Some((_, value)) = get("CATALOG") {
            self.catalog.path = PathBuf::from(value);
        }
        if let Some((_, value)) = get("INDEX_PATH") {
            self.index.path = PathBuf::from(value);
        }
        if let Some((key, value)) = get("DECISION_PROVIDER") {
            self.decision.provider = parse::<DecisionProvider>(&key, &value)?;
        }
        if let Some((_, value)) = get("DECISION_MODEL") {
            self.decision.model = value;
        }
        if let Some((_, value)) = get("DECISION_BASE_URL") {
            self.decision.base_url = Some(value).filter(|url| !url.trim().is_empty());
        }
        if let Some((key, value)) = get("DECISION_TIMEOUT_MS") {
            self.decision.timeout_ms = parse(&key, &value)?;
        }
        if let Some((key, value)) = get("BACKEND_TIMEOUT_MS") {
            self.execution.timeout_ms = parse(&key, &value)?;
        }
        if let Some((_, value)) = get("LOG") {
            self.logging.directive = value;
        }
        Ok(())
    }
}

/// Applies overrides from the process environment.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidEnv`] when a value cannot be parsed.
pub fn apply_env(config: &mut RuntimeConfig) -> ConfigResult<()> {
    config.apply_env_with(|key| std::env::var(key).ok())
}

/// Loads `path` (defaults when `None`), applies environment overrides and
/// validates the result.
///
/// # Errors
///
/// Returns [`ConfigError`] if the file cannot be read or parsed, an override
/// is malformed, or validation fails.
pub fn load(path: Option<&Path>) -> ConfigResult<RuntimeConfig> {
    let mut config = match path {
        Some(path) => {
            let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str(&source).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        }
        None => RuntimeConfig::default(),
    };
    apply_env(&mut config)?;
    config.validate()?;
    debug!(
        config = ?path,
        top_k = config.retrieval.top_k,
        backends = config.backends.len(),
        "configuration loaded"
    );
    Ok(config)
}

fn parse<T>(key: &str, value: &str) -> ConfigResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|err: T::Err| ConfigError::InvalidEnv {
        key: key.to_owned(),
        value: value.to_owned(),
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use uuid::Uuid;

    use super::*;
    use crate::schema::TransportKind;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = RuntimeConfig::from_toml_str("[retrieval]\ntop_k = 5\n").unwrap();
        config
            .apply_env_with(lookup(&[
                ("TOOLRAG_RETRIEVAL_MODE", "all-tools"),
                ("TOOLRAG_TOP_K", "2"),
                ("TOOLRAG_SCORE_THRESHOLD", "0.25"),
                ("TOOLRAG_EMPTY_CANDIDATES", "consult"),
                ("TOOLRAG_DECISION_PROVIDER", "Ollama"),
                ("TOOLRAG_DECISION_MODEL", "llama3.1"),
                ("TOOLRAG_BACKEND_TIMEOUT_MS", "1500"),
                ("TOOLRAG_LOG", "debug"),
            ]))
            .unwrap();

        assert_eq!(config.retrieval.mode, RetrievalMode::AllTools);
        assert_eq!(config.retrieval.top_k, 2);
        assert!((config.retrieval.score_threshold - 0.25).abs() < f32::EPSILON);
        assert_eq!(config.retrieval.empty_candidates, EmptyCandidates::Consult);
        assert_eq!(config.decision.provider, DecisionProvider::Ollama);
        assert_eq!(config.decision.model, "llama3.1");
        assert_eq!(config.execution.timeout_ms, 1500);
        assert_eq!(config.logging.directive, "debug");
    }

    #[test]
    fn malformed_override_names_the_variable() {
        let mut config = RuntimeConfig::default();
        let err = config
            .apply_env_with(lookup(&[("TOOLRAG_TOP_K", "three")]))
            .unwrap_err();
        match err {
            ConfigError::InvalidEnv { key, value, .. } => {
                assert_eq!(key, "TOOLRAG_TOP_K");
                assert_eq!(value, "three");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = config
            .apply_env_with(lookup(&[("TOOLRAG_DECISION_PROVIDER", "bard")]))
            .unwrap_err();
        assert!(err.to_string().contains("TOOLRAG_DECISION_PROVIDER"));
    }

    #[test]
    fn loads_file_from_disk() {
        let path = std::env::temp_dir().join(format!("toolrag-config-{}.toml", Uuid::new_v4()));
        std::fs::write(
            &path,
            "[catalog]\npath = \"tools.json\"\n\n[[backends]]\nname = \"local\"\n",
        )
        .unwrap();

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.catalog.path, PathBuf::from("tools.json"));
        assert_eq!(config.backends.len(), 1);
        assert_eq!(config.backends[0].transport, TransportKind::InProcess);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let path = std::env::temp_dir().join(format!("toolrag-missing-{}.toml", Uuid::new_v4()));
        assert!(matches!(load(Some(&path)), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn parse_errors_carry_the_path() {
        let path = std::env::temp_dir().join(format!("toolrag-broken-{}.toml", Uuid::new_v4()));
        std::fs::write(&path, "[retrieval\n").unwrap();
        let err = load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("toolrag-broken"));
        let _ = std::fs::remove_file(path);
    }
}
