//! # Settings
//!
//! Loads the operator configuration and the content model from TOML and
//! opens the repository they describe.

use arbor_core::config::ArborConfig;
use arbor_core::model::{DictionaryBuilder, InMemoryDictionary, ModelDocument, system_model};
use arbor_core::{ArborError, Repository};
use std::path::Path;
use std::sync::Arc;

/// Maximum size of a configuration or model file (1 MB).
const MAX_SETTINGS_FILE_SIZE: u64 = 1024 * 1024;

fn read_settings_file(path: &Path) -> Result<String, ArborError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| ArborError::Storage(format!("Cannot read '{}': {}", path.display(), e)))?;
    if metadata.len() > MAX_SETTINGS_FILE_SIZE {
        return Err(ArborError::InvalidArgument(format!(
            "'{}' is {} bytes, more than the {} allowed",
            path.display(),
            metadata.len(),
            MAX_SETTINGS_FILE_SIZE
        )));
    }
    std::fs::read_to_string(path)
        .map_err(|e| ArborError::Storage(format!("Cannot read '{}': {}", path.display(), e)))
}

/// Parse a configuration document and reject unusable values.
pub fn parse_config(text: &str) -> Result<ArborConfig, ArborError> {
    let config: ArborConfig =
        toml::from_str(text).map_err(|e| ArborError::Serialization(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Configuration from `path`. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<ArborConfig, ArborError> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no configuration file, using defaults");
        return Ok(ArborConfig::default());
    }
    let config = parse_config(&read_settings_file(path)?)?;
    tracing::info!(path = %path.display(), "loaded configuration");
    Ok(config)
}

/// Parse a model document (`[[types]]`, `[[aspects]]`, `[[associations]]`).
pub fn parse_model(text: &str) -> Result<ModelDocument, ArborError> {
    toml::from_str(text).map_err(|e| ArborError::Serialization(e.to_string()))
}

/// The system model, extended with the model file at `path` if one is given.
pub fn load_dictionary(path: Option<&Path>) -> Result<InMemoryDictionary, ArborError> {
    let builder: DictionaryBuilder = system_model();
    let Some(path) = path else {
        return builder.build();
    };
    let document = parse_model(&read_settings_file(path)?)?;
    tracing::info!(
        path = %path.display(),
        types = document.types.len(),
        aspects = document.aspects.len(),
        associations = document.associations.len(),
        "loaded content model"
    );
    builder.add_document(document).build()
}

/// Open the repository at `database`, or a volatile one when `None`.
pub fn open_repository(
    database: Option<&Path>,
    config: ArborConfig,
    dictionary: InMemoryDictionary,
) -> Result<Repository, ArborError> {
    let builder = Repository::builder(Arc::new(dictionary)).config(config);
    match database {
        Some(path) => builder.open(path),
        None => builder.in_memory(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config = parse_config(
            r#"
            [cleanup]
            max_nodes_per_run = 10

            [[repository.archive_stores]]
            store = "workspace://SpacesStore"
            archive = "archive://SpacesStore"
            "#,
        )
        .expect("config");
        assert_eq!(config.cleanup.max_nodes_per_run, 10);
        assert_eq!(config.retry, ArborConfig::default().retry);
        assert_eq!(config.repository.archive_stores.len(), 1);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let result = parse_config("[cleanup]\ntxn_purge_window_ms = 0\n");
        assert!(matches!(result, Err(ArborError::InvalidArgument(_))));
        let result = parse_config("[cleanup\n");
        assert!(matches!(result, Err(ArborError::Serialization(_))));
    }

    #[test]
    fn missing_config_file_means_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = load_config(&dir.path().join("arbor.toml")).expect("config");
        assert_eq!(config, ArborConfig::default());
    }

    #[test]
    fn model_file_extends_the_system_model() {
        use arbor_core::model::Dictionary;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("model.toml");
        std::fs::write(
            &path,
            r#"
            [[aspects]]
            name = "ex:reviewed"
            properties = [{ name = "ex:reviewer", default = "nobody" }]

            [[types]]
            name = "ex:report"
            parent = "cm:content"
            default_aspects = ["ex:reviewed"]
            "#,
        )
        .expect("write");
        let dictionary = load_dictionary(Some(&path)).expect("dictionary");
        let report = "ex:report".parse().expect("qname");
        assert!(dictionary.get_type(&report).is_some());
        assert!(dictionary.get_type(&"cm:folder".parse().expect("qname")).is_some());
    }
}
