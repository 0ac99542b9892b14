pub mod deploy;
pub mod partitions;
pub mod plan;
pub mod save;
pub mod state;

use anyhow::{Context as AnyhowContext, Result};
use reconcile::ConfigTree;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

/// Read and parse a JSON file
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Could not read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// Read an optional config tree; `None` stands for "nothing declared"
pub fn read_tree(path: Option<&Path>) -> Result<Option<ConfigTree>> {
    path.map(read_json::<ConfigTree>).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_tree() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("new.json");
        fs::write(&path, r#"{"app": {"ltm/pool/web": {"members": []}}}"#).unwrap();

        let tree = read_tree(Some(&path)).unwrap().unwrap();
        assert!(tree["app"].contains_key("ltm/pool/web"));
        assert!(read_tree(None).unwrap().is_none());
    }

    #[test]
    fn test_read_tree_rejects_non_object_folder() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.json");
        fs::write(&path, r#"{"app": 3}"#).unwrap();
        assert!(read_tree(Some(&path)).is_err());
    }
}
