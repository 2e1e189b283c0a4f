//! Config file loading.
//!
//! TOML only, strict: an unreadable file, invalid syntax, or any field the
//! [`Config`](super::Config) record does not recognize is a `ConfigError`
//! and the run never starts.

use super::Config;
use crate::error::RunError;
use std::path::Path;

pub fn load_config(path: Option<&Path>) -> Result<Config, RunError> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let content = std::fs::read_to_string(path).map_err(|err| {
        RunError::Config(format!("failed reading config file {}: {err}", path.display()))
    })?;
    parse_config(&content)
        .map_err(|err| RunError::Config(format!("invalid config {}: {err}", path.display())))
}

fn parse_config(content: &str) -> Result<Config, toml::de::Error> {
    toml::from_str(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_path_yields_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config.output.retention, 5);
    }

    #[test]
    fn valid_toml_overrides_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("atlas.toml");
        std::fs::write(
            &path,
            "[output]\nretention = 2\n\n[bundles]\nmax_bundle_bytes = 1000\n",
        )
        .unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.output.retention, 2);
        assert_eq!(config.bundles.max_bundle_bytes, 1000);
        // Untouched sections keep their defaults.
        assert!(config.graph.enabled);
    }

    #[test]
    fn unknown_field_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("atlas.toml");
        std::fs::write(&path, "surprise_field = true\n").unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn unknown_nested_field_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("atlas.toml");
        std::fs::write(&path, "[graph]\nfancy_mode = true\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn unreadable_file_is_config_error() {
        let err = load_config(Some(Path::new("/nonexistent/atlas.toml"))).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn invalid_preset_name_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("atlas.toml");
        std::fs::write(&path, "[bundles]\npresets = [\"everything\"]\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
