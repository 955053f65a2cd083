//! Atomic JSON persistence for saved research outcomes.

use std::io;
use std::path::{Path, PathBuf};

/// Serialize `data` as pretty JSON and write it atomically.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(data).map_err(io::Error::other)?;
    atomic_write(path, json.as_bytes())
}

/// Write to a `.tmp` sibling, then rename over `path`. Parent directories are created.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load JSON from `path`. `Ok(None)` if the file does not exist.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    let value =
        serde_json::from_str(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}

/// `.json` files directly inside `dir`, sorted by name. Empty if `dir` is missing.
pub fn list_json_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Saved {
        question: String,
        steps: u32,
    }

    #[test]
    fn test_write_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a").join("b").join("run.json");
        let data = Saved {
            question: "why".into(),
            steps: 4,
        };
        atomic_write_json(&path, &data).unwrap();
        assert!(!path.with_extension("tmp").exists());
        assert_eq!(load_json::<Saved>(&path).unwrap(), Some(data));
    }

    #[test]
    fn test_load_missing_and_corrupt() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(load_json::<Saved>(&missing).unwrap().is_none());

        let corrupt = dir.path().join("corrupt.json");
        atomic_write(&corrupt, b"{not json").unwrap();
        let err = load_json::<Saved>(&corrupt).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_list_json_files() {
        let dir = TempDir::new().unwrap();
        atomic_write(&dir.path().join("b.json"), b"{}").unwrap();
        atomic_write(&dir.path().join("a.json"), b"{}").unwrap();
        atomic_write(&dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub.json")).unwrap();

        let names: Vec<String> = list_json_files(dir.path())
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        assert_eq!(names, vec!["a.json", "b.json"]);
        assert!(list_json_files(&dir.path().join("nope")).is_empty());
    }
}
