//! Part persistence: `<prefix>_<repo>_part<NNNNN>.txt` in the output dir.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::types::MapPart;

/// Writes map parts under deterministic names.
#[derive(Debug, Clone)]
pub struct PartWriter {
    output_dir: PathBuf,
    prefix: String,
    repo_name: String,
}

/// A part file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartFile {
    pub index: usize,
    pub path: PathBuf,
    pub bytes: u64,
}

impl PartWriter {
    pub fn new(output_dir: impl Into<PathBuf>, prefix: impl Into<String>, root: &Path) -> Self {
        Self {
            output_dir: output_dir.into(),
            prefix: prefix.into(),
            repo_name: repo_name(root),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn repo_name(&self) -> &str {
        &self.repo_name
    }

    pub fn file_name(&self, index: usize) -> String {
        part_file_name(&self.prefix, &self.repo_name, index)
    }

    pub fn path(&self, index: usize) -> PathBuf {
        self.output_dir.join(self.file_name(index))
    }

    pub fn write(&self, part: &MapPart) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("failed to create {}", self.output_dir.display()))?;
        let path = self.path(part.index);
        fs::write(&path, &part.text).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    pub fn write_all<'a>(&self, parts: impl IntoIterator<Item = &'a MapPart>) -> Result<Vec<PathBuf>> {
        parts.into_iter().map(|part| self.write(part)).collect()
    }

    /// Delete part files with an index above `keep`, left over from an
    /// earlier, longer run.
    pub fn remove_after(&self, keep: usize) -> Result<()> {
        for part in self.list()? {
            if part.index > keep {
                fs::remove_file(&part.path)
                    .with_context(|| format!("failed to remove {}", part.path.display()))?;
            }
        }
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<PartFile>> {
        list_parts(&self.output_dir, &self.prefix, &self.repo_name)
    }
}

/// Repository name used in part file names: the root's basename, lowercased,
/// whitespace replaced by `_`.
pub fn repo_name(root: &Path) -> String {
    let resolved = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let base = resolved
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "repo".to_string());
    base.to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}

pub fn part_file_name(prefix: &str, repo: &str, index: usize) -> String {
    format!("{}_{}_part{:05}.txt", prefix, repo, index)
}

/// Existing part files for `prefix`/`repo`, in index order.
pub fn list_parts(output_dir: &Path, prefix: &str, repo: &str) -> Result<Vec<PartFile>> {
    if !output_dir.exists() {
        return Ok(Vec::new());
    }

    let stem = format!("{}_{}_part", prefix, repo);
    let mut parts = Vec::new();
    let entries = fs::read_dir(output_dir)
        .with_context(|| format!("failed to read {}", output_dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(digits) = name.strip_prefix(&stem).and_then(|rest| rest.strip_suffix(".txt")) else {
            continue;
        };
        if digits.len() != 5 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let Ok(index) = digits.parse::<usize>() else { continue };
        let bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
        parts.push(PartFile { index, path: entry.path(), bytes });
    }
    parts.sort_by_key(|p| p.index);
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn part(index: usize, text: &str) -> MapPart {
        MapPart { index, text: text.to_string(), token_count: 1, oversized: false }
    }

    #[test]
    fn test_repo_name_normalized() -> Result<()> {
        let dir = TempDir::new()?;
        let root = dir.path().join("My Project");
        fs::create_dir(&root)?;
        assert_eq!(repo_name(&root), "my_project");
        Ok(())
    }

    #[test]
    fn test_file_names_are_zero_padded() {
        assert_eq!(part_file_name("repomap", "demo", 3), "repomap_demo_part00003.txt");
    }

    #[test]
    fn test_write_and_list_in_order() -> Result<()> {
        let dir = TempDir::new()?;
        let out = dir.path().join("out");
        let writer = PartWriter::new(&out, "repomap", &dir.path().join("demo"));

        writer.write_all([&part(2, "two"), &part(10, "ten"), &part(1, "one")])?;
        fs::write(out.join("unrelated.txt"), "x")?;

        let listed: Vec<usize> = writer.list()?.iter().map(|p| p.index).collect();
        assert_eq!(listed, vec![1, 2, 10]);
        assert_eq!(fs::read_to_string(writer.path(10))?, "ten");
        Ok(())
    }

    #[test]
    fn test_remove_after_drops_stale_parts() -> Result<()> {
        let dir = TempDir::new()?;
        let writer = PartWriter::new(dir.path().join("out"), "repomap", &dir.path().join("demo"));

        writer.write_all([&part(1, "a"), &part(2, "b"), &part(3, "c")])?;
        writer.remove_after(1)?;

        let listed: Vec<usize> = writer.list()?.iter().map(|p| p.index).collect();
        assert_eq!(listed, vec![1]);
        Ok(())
    }

    #[test]
    fn test_list_missing_dir_is_empty() -> Result<()> {
        let dir = TempDir::new()?;
        assert!(list_parts(&dir.path().join("nope"), "repomap", "demo")?.is_empty());
        Ok(())
    }
}
