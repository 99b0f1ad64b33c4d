//! Git-aware file discovery with parallel traversal.
//!
//! This module implements file discovery that:
//! - Respects .gitignore automatically via the `ignore` crate
//! - Applies repomap.toml/pyproject.toml include/exclude patterns
//! - Filters out binary files by extension and by content sniffing
//! - Skips files above the configured size bound
//! - Never descends into the tag cache or the map output directory
//! - Returns deterministic (sorted) results

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Result;
use ignore::WalkBuilder;

use crate::cache::cache_dir_name;
use crate::config::Config;

/// File extensions excluded from discovery.
///
/// Lock files (Cargo.lock, package-lock.json) are generated and contain
/// thousands of dependency entries that would dominate the graph.
const EXCLUDED_EXTENSIONS: &[&str] = &[
    // Images
    "png", "jpg", "jpeg", "gif", "ico", "svg", "webp", "bmp", "tiff",
    // Fonts
    "woff", "woff2", "ttf", "eot", "otf",
    // Media
    "mp3", "mp4", "wav", "ogg", "webm", "avi", "mov", "flac",
    // Archives
    "zip", "tar", "gz", "rar", "7z", "bz2", "xz", "tgz",
    // Documents
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx",
    // Compiled/Binary
    "pyc", "pyo", "so", "dylib", "dll", "exe", "o", "a", "lib",
    "class", "jar", "war", "ear",
    // Lock files
    "lock", "sum",
    // Database files
    "db", "sqlite", "sqlite3", "redb",
    // Misc binary
    "wasm", "bin", "dat",
];

/// Bytes inspected when sniffing for binary content.
const SNIFF_BYTES: usize = 8192;

/// Find source files under `directory` (or `directory` itself if it is a file).
///
/// ## Returns
/// Sorted absolute-or-as-given paths of every file that passes the
/// extension, binary, size and pattern filters.
pub fn find_source_files(directory: &Path, config: &Config) -> Result<Vec<PathBuf>> {
    if directory.is_file() {
        let name = directory.file_name().map(Path::new).unwrap_or(directory);
        return Ok(if accept_file(directory, name, config) {
            vec![directory.to_path_buf()]
        } else {
            Vec::new()
        });
    }

    if !directory.is_dir() {
        anyhow::bail!("Path does not exist: {}", directory.display());
    }

    let cache_dir = cache_dir_name();
    let output_dir = resolve(directory, &config.map.output_dir);

    let walker = WalkBuilder::new(directory)
        .hidden(false)          // Let .gitignore and the exclude globs decide
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        .require_git(false)     // Work even in non-git directories
        .follow_links(false)    // Avoid symlink cycles
        .threads(0)
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            if !is_dir {
                return true;
            }
            if entry.file_name().to_str() == Some(cache_dir.as_str()) {
                return false;
            }
            output_dir.as_ref().map_or(true, |out| !same_path(entry.path(), out))
        })
        .build_parallel();

    let files = Mutex::new(Vec::new());
    let root = directory.to_path_buf();

    walker.run(|| {
        Box::new(|entry_result| {
            let Ok(entry) = entry_result else {
                // Unreadable entries (permissions, broken symlinks) are skipped
                return ignore::WalkState::Continue;
            };
            let path = entry.path();
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                return ignore::WalkState::Continue;
            }

            let rel_path = path.strip_prefix(&root).unwrap_or(path);
            if accept_file(path, rel_path, config) {
                if let Ok(mut files) = files.lock() {
                    files.push(path.to_path_buf());
                }
            }
            ignore::WalkState::Continue
        })
    });

    let mut files = files
        .into_inner()
        .map_err(|_| anyhow::anyhow!("discovery worker panicked"))?;

    // Sorted for reproducible fingerprints and rankings
    files.sort();
    files.dedup();
    tracing::debug!("discovered {} files under {}", files.len(), directory.display());
    Ok(files)
}

/// Discover every path in `paths`, merging and sorting the results.
pub fn find_source_files_in(paths: &[PathBuf], config: &Config) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        files.extend(find_source_files(path, config)?);
    }
    files.sort();
    files.dedup();
    Ok(files)
}

/// All per-file filters; `rel_path` is what the config globs see.
fn accept_file(path: &Path, rel_path: &Path, config: &Config) -> bool {
    if is_excluded_by_extension(path) || !config.should_include(rel_path) {
        return false;
    }
    match path.metadata() {
        Ok(meta) if meta.len() > config.max_file_size => {
            tracing::trace!("skipping {}: {} bytes", path.display(), meta.len());
            return false;
        }
        Ok(_) => {}
        Err(_) => return false,
    }
    !looks_binary(path)
}

/// Check if a file should be excluded based on its extension.
fn is_excluded_by_extension(path: &Path) -> bool {
    if let Some(ext) = path.extension() {
        if let Some(ext_str) = ext.to_str() {
            let ext_lower = ext_str.to_ascii_lowercase();
            return EXCLUDED_EXTENSIONS.contains(&ext_lower.as_str());
        }
    }
    false
}

/// A NUL byte within the first 8 KiB marks a file as binary.
fn looks_binary(path: &Path) -> bool {
    let Ok(file) = File::open(path) else {
        return false;
    };
    let mut head = Vec::with_capacity(SNIFF_BYTES);
    if file.take(SNIFF_BYTES as u64).read_to_end(&mut head).is_err() {
        return false;
    }
    head.contains(&0)
}

fn resolve(root: &Path, dir: &Path) -> Option<PathBuf> {
    let joined = if dir.is_absolute() { dir.to_path_buf() } else { root.join(dir) };
    joined.canonicalize().ok()
}

fn same_path(a: &Path, b: &Path) -> bool {
    a.canonicalize().map(|a| a == b).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn names(root: &Path, files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.strip_prefix(root).unwrap_or(f).to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn test_extension_filtering() {
        assert!(is_excluded_by_extension(Path::new("image.png")));
        assert!(is_excluded_by_extension(Path::new("IMAGE.PNG")));
        assert!(is_excluded_by_extension(Path::new("Cargo.lock")));
        assert!(!is_excluded_by_extension(Path::new("main.rs")));
        assert!(!is_excluded_by_extension(Path::new("README.md")));
    }

    #[test]
    fn test_discovery_filters_and_sorts() -> Result<()> {
        let dir = TempDir::new()?;
        let root = dir.path();
        fs::create_dir_all(root.join("src"))?;
        fs::create_dir_all(root.join(cache_dir_name()))?;
        fs::create_dir_all(root.join("output"))?;
        fs::write(root.join("src/b.py"), "def b(): pass\n")?;
        fs::write(root.join("src/a.rs"), "fn a() {}\n")?;
        fs::write(root.join("logo.png"), "fake")?;
        fs::write(root.join("blob.txt"), b"abc\0def")?;
        fs::write(root.join(cache_dir_name()).join("tags.txt"), "cached")?;
        fs::write(root.join("output/repomap_x_part00001.txt"), "map")?;

        let files = find_source_files(root, &Config::default())?;
        assert_eq!(names(root, &files), vec!["src/a.rs", "src/b.py"]);
        Ok(())
    }

    #[test]
    fn test_size_bound_and_skip_tests() -> Result<()> {
        let dir = TempDir::new()?;
        let root = dir.path();
        fs::create_dir_all(root.join("tests"))?;
        fs::write(root.join("big.py"), "x = 1\n".repeat(100))?;
        fs::write(root.join("small.py"), "y = 2\n")?;
        fs::write(root.join("tests/test_small.py"), "z = 3\n")?;

        let config = Config { max_file_size: 100, skip_tests: true, ..Default::default() };
        let files = find_source_files(root, &config)?;
        assert_eq!(names(root, &files), vec!["small.py"]);
        Ok(())
    }

    #[test]
    fn test_gitignore_respected() -> Result<()> {
        let dir = TempDir::new()?;
        let root = dir.path();
        fs::write(root.join(".gitignore"), "ignored.py\n")?;
        fs::write(root.join("ignored.py"), "a = 1\n")?;
        fs::write(root.join("kept.py"), "b = 1\n")?;

        let files = find_source_files(root, &Config::default())?;
        assert_eq!(names(root, &files), vec![".gitignore", "kept.py"]);
        Ok(())
    }

    #[test]
    fn test_single_file_and_multiple_roots() -> Result<()> {
        let dir = TempDir::new()?;
        let a = dir.path().join("a.py");
        let b = dir.path().join("b.py");
        fs::write(&a, "a = 1\n")?;
        fs::write(&b, "b = 1\n")?;

        assert_eq!(find_source_files(&a, &Config::default())?, vec![a.clone()]);
        let merged = find_source_files_in(&[b.clone(), a.clone(), b.clone()], &Config::default())?;
        assert_eq!(merged, vec![a, b]);
        Ok(())
    }

    #[test]
    fn test_nonexistent_path() {
        assert!(find_source_files(Path::new("/nonexistent/path/xyz"), &Config::default()).is_err());
    }
}
