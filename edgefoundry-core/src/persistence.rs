//! Atomic file writes for the artifacts other processes read concurrently:
//! the PID file and the YAML configuration.

use std::io;
use std::path::Path;

/// Atomically write raw bytes to a file.
///
/// Writes to a `.tmp` sibling, then renames over the target, so a reader in
/// another process never observes a half-written file. Creates parent
/// directories if they don't exist.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Atomically write a value as a block-style YAML document.
pub fn atomic_write_yaml<T: serde::Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let yaml = serde_yaml::to_string(data).map_err(io::Error::other)?;
    atomic_write(path, yaml.as_bytes())
}

/// Load and deserialize a YAML document.
///
/// Returns `Ok(None)` if the file doesn't exist.
pub fn load_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    let value =
        serde_yaml::from_str(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        model_path: String,
        port: u16,
    }

    #[test]
    fn test_yaml_write_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("edgefoundry.yaml");
        let data = Sample {
            model_path: "./models/tiny.gguf".into(),
            port: 8000,
        };

        atomic_write_yaml(&path, &data).unwrap();
        let loaded: Option<Sample> = load_yaml(&path).unwrap();
        assert_eq!(loaded, Some(data));
    }

    #[test]
    fn test_atomic_write_creates_parent_dirs_and_leaves_no_tmp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".edgefoundry").join("agent.pid");

        atomic_write(&path, b"1234").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1234");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_load_yaml_missing_file() {
        let loaded: Option<Sample> = load_yaml(Path::new("/nonexistent/edgefoundry.yaml")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_load_yaml_invalid_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "model_path: [unclosed").unwrap();
        let err = load_yaml::<Sample>(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
