//! Configuration loading from repomap.toml and pyproject.toml.
//!
//! Follows conventions from ruff, black, mypy for familiarity:
//! - Standalone repomap.toml takes precedence
//! - `[tool.repomap]` section in pyproject.toml otherwise
//!
//! ## Example
//!
//! ```toml
//! [tool.repomap]
//! include = ["src/**", "lib/**"]
//! extend-exclude = ["**/generated/**"]
//! map-tokens = 8192
//! refresh = "files"
//!
//! [tool.repomap.ranking]
//! mention-multiplier = 10.0
//!
//! [tool.repomap.assembly]
//! early-close-ratio = 0.9
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::diagnostics::{Diagnostics, Warning};

/// Default exclude patterns (common non-source directories).
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "**/node_modules/**",
    "**/.git/**",
    "**/.hg/**",
    "**/.svn/**",
    "**/target/**",
    "**/build/**",
    "**/dist/**",
    "**/__pycache__/**",
    "**/.venv/**",
    "**/venv/**",
    "**/.tox/**",
    "**/.mypy_cache/**",
    "**/.pytest_cache/**",
    "**/.DS_Store",
    "**/.repomap.tags.cache*/**",
];

/// Test files and directories, excluded with `skip-tests`.
pub const TEST_PATTERNS: &[&str] = &[
    "**/test_*.py",
    "**/tests/**",
    "**/test/**",
    "**/testing/**",
    "**/*_test.py",
    "**/*_test.go",
    "**/*_test.js",
    "**/*_test.ts",
    "**/*.test.js",
    "**/*.test.ts",
    "**/*.spec.js",
    "**/*.spec.ts",
    "**/conftest.py",
];

/// Documentation files and directories, excluded with `skip-docs`.
pub const DOC_PATTERNS: &[&str] = &[
    "**/docs/**",
    "**/doc/**",
    "**/documentation/**",
    "**/*.md",
    "**/*.rst",
    "**/*.txt",
    "**/README*",
    "**/CHANGELOG*",
    "**/LICENSE*",
];

/// Budget floor: smaller budgets are raised to this.
pub const MIN_TOKEN_SIZE: usize = 4096;

/// Schema version of the persistent tag cache; part of its directory name.
pub const CACHE_VERSION: u32 = 4;

/// When the result cache may serve a previously assembled map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RefreshPolicy {
    /// Never read the cache
    Always,
    /// Reuse unless a sample of the other files changed on disk
    Files,
    /// Always serve the last computed map until told to refresh
    Manual,
    /// Reuse only when the previous computation was slow
    #[default]
    Auto,
}

impl RefreshPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshPolicy::Always => "always",
            RefreshPolicy::Files => "files",
            RefreshPolicy::Manual => "manual",
            RefreshPolicy::Auto => "auto",
        }
    }
}

impl fmt::Display for RefreshPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefreshPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "always" => Ok(RefreshPolicy::Always),
            "files" => Ok(RefreshPolicy::Files),
            "manual" => Ok(RefreshPolicy::Manual),
            "auto" => Ok(RefreshPolicy::Auto),
            other => Err(format!("unknown refresh policy '{}'", other)),
        }
    }
}

/// Tunables for graph construction and PageRank.
///
/// The heuristic weights have no derivation behind them; they are exposed so
/// they can be tuned per repository.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RankingConfig {
    /// Weight of the self-loop given to identifiers nobody references
    pub self_loop_weight: f64,
    /// Edge multiplier for identifiers the caller mentioned
    pub mention_multiplier: f64,
    /// Edge multiplier for `_private` identifiers
    pub private_multiplier: f64,
    /// Total personalization mass, split evenly over the node count
    pub personalization_mass: f64,
    pub pagerank_alpha: f64,
    pub pagerank_tolerance: f64,
    pub pagerank_max_iterations: usize,
    /// Graphs above either bound are refused with a scale-limit error
    pub max_graph_nodes: usize,
    pub max_graph_edges: usize,
    /// How many other files survive a scale-limit retry
    pub scale_retry_files: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            self_loop_weight: 0.1,
            mention_multiplier: 10.0,
            private_multiplier: 0.1,
            personalization_mass: 100.0,
            pagerank_alpha: 0.85,
            pagerank_tolerance: 1e-6,
            pagerank_max_iterations: 100,
            max_graph_nodes: 100_000,
            max_graph_edges: 5_000_000,
            scale_retry_files: 2_000,
        }
    }
}

/// Tunables for part assembly.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AssemblyConfig {
    /// Close a part once it passes this fraction of the budget
    pub early_close_ratio: f64,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self { early_close_ratio: 0.9 }
    }
}

/// Tunables for the result cache.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ResultCacheConfig {
    /// `auto` serves cached maps only when the last computation took longer
    pub auto_threshold_ms: u64,
    /// Files checked for mtime changes under the `files` policy
    pub files_sample_size: usize,
    /// File lists longer than this enter the fingerprint as a count
    pub fingerprint_count_threshold: usize,
}

impl Default for ResultCacheConfig {
    fn default() -> Self {
        Self {
            auto_threshold_ms: 1000,
            files_sample_size: 100,
            fingerprint_count_threshold: 1000,
        }
    }
}

/// Budget and output settings for map generation.
#[derive(Debug, Clone, PartialEq)]
pub struct MapSettings {
    /// Requested tokens per part (before floor and no-files boost)
    pub map_tokens: usize,
    /// Budget floor
    pub min_tokens: usize,
    /// Budget multiplier applied when there are no focus files
    pub map_mul_no_files: f64,
    /// Consumer's context window, caps the no-files boost
    pub max_context_window: Option<usize>,
    /// Space reserved inside the context window for everything else
    pub context_window_padding: usize,
    /// Single unbounded part
    pub no_split: bool,
    pub refresh: RefreshPolicy,
    pub output_dir: PathBuf,
    pub artifact_prefix: String,
    /// Tag collection threads (0 = rayon default)
    pub workers: usize,
}

impl Default for MapSettings {
    fn default() -> Self {
        Self {
            map_tokens: 8192,
            min_tokens: MIN_TOKEN_SIZE,
            map_mul_no_files: 8.0,
            max_context_window: None,
            context_window_padding: 4096,
            no_split: false,
            refresh: RefreshPolicy::Auto,
            output_dir: PathBuf::from("output"),
            artifact_prefix: "repomap".to_string(),
            workers: 0,
        }
    }
}

/// Repomap configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Source file for this config (for display).
    pub source: Option<PathBuf>,

    /// Glob patterns for files to include. If empty, include all source files.
    pub include: Vec<String>,

    /// Glob patterns for files to exclude. Replaces defaults if set.
    pub exclude: Vec<String>,

    /// Additional exclude patterns (extends defaults).
    pub extend_exclude: Vec<String>,

    /// Files larger than this many bytes are skipped during discovery.
    pub max_file_size: u64,

    pub skip_tests: bool,
    pub skip_docs: bool,

    pub map: MapSettings,
    pub ranking: RankingConfig,
    pub assembly: AssemblyConfig,
    pub result_cache: ResultCacheConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: None,
            include: Vec::new(),
            exclude: Vec::new(),
            extend_exclude: Vec::new(),
            max_file_size: 1024 * 1024,
            skip_tests: false,
            skip_docs: false,
            map: MapSettings::default(),
            ranking: RankingConfig::default(),
            assembly: AssemblyConfig::default(),
            result_cache: ResultCacheConfig::default(),
        }
    }
}

/// Raw config as deserialized from TOML.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
struct RawConfig {
    include: Option<Vec<String>>,
    exclude: Option<Vec<String>>,
    extend_exclude: Option<Vec<String>>,
    max_file_size: Option<u64>,
    skip_tests: Option<bool>,
    skip_docs: Option<bool>,
    map_tokens: Option<usize>,
    min_tokens: Option<usize>,
    map_mul_no_files: Option<f64>,
    max_context_window: Option<usize>,
    context_window_padding: Option<usize>,
    refresh: Option<RefreshPolicy>,
    output_dir: Option<String>,
    artifact_prefix: Option<String>,
    workers: Option<usize>,
    ranking: Option<RankingConfig>,
    assembly: Option<AssemblyConfig>,
    result_cache: Option<ResultCacheConfig>,
}

/// Wrapper for pyproject.toml structure.
#[derive(Debug, Deserialize)]
struct PyProject {
    tool: Option<PyProjectTool>,
}

#[derive(Debug, Deserialize)]
struct PyProjectTool {
    repomap: Option<RawConfig>,
}

impl Config {
    /// Load configuration from the given directory, discarding warnings.
    pub fn load(directory: &Path) -> Self {
        Self::load_reporting(directory, &Diagnostics::new())
    }

    /// Load configuration from the given directory.
    ///
    /// Search order, per directory from `directory` upward:
    /// 1. repomap.toml
    /// 2. pyproject.toml `[tool.repomap]`
    ///
    /// Falls back to defaults if nothing is found. Files that exist but fail
    /// to parse are reported and skipped.
    pub fn load_reporting(directory: &Path, diagnostics: &Diagnostics) -> Self {
        let mut current = Some(directory.to_path_buf());
        while let Some(dir) = current {
            let repomap_toml = dir.join("repomap.toml");
            if repomap_toml.is_file() {
                match Self::load_repomap_toml(&repomap_toml) {
                    Ok(config) => return config,
                    Err(reason) => {
                        diagnostics.warn(Warning::Config {
                            path: repomap_toml.display().to_string(),
                            reason,
                        });
                    }
                }
            }

            let pyproject = dir.join("pyproject.toml");
            if pyproject.is_file() {
                match Self::load_pyproject(&pyproject) {
                    Ok(Some(config)) => return config,
                    Ok(None) => {}
                    Err(reason) => {
                        diagnostics.warn(Warning::Config {
                            path: pyproject.display().to_string(),
                            reason,
                        });
                    }
                }
            }

            current = dir.parent().map(Path::to_path_buf);
        }

        Self::default()
    }

    fn load_repomap_toml(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        let raw: RawConfig = toml::from_str(&content).map_err(|e| e.to_string())?;
        Ok(Self::from_raw(raw, path.to_path_buf()))
    }

    fn load_pyproject(path: &Path) -> Result<Option<Self>, String> {
        let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        let pyproject: PyProject = toml::from_str(&content).map_err(|e| e.to_string())?;
        Ok(pyproject
            .tool
            .and_then(|tool| tool.repomap)
            .map(|raw| Self::from_raw(raw, path.to_path_buf())))
    }

    fn from_raw(raw: RawConfig, source: PathBuf) -> Self {
        let defaults = Self::default();
        let map_defaults = defaults.map;
        Self {
            source: Some(source),
            include: raw.include.unwrap_or_default(),
            exclude: raw.exclude.unwrap_or_default(),
            extend_exclude: raw.extend_exclude.unwrap_or_default(),
            max_file_size: raw.max_file_size.unwrap_or(defaults.max_file_size),
            skip_tests: raw.skip_tests.unwrap_or(false),
            skip_docs: raw.skip_docs.unwrap_or(false),
            map: MapSettings {
                map_tokens: raw.map_tokens.unwrap_or(map_defaults.map_tokens),
                min_tokens: raw.min_tokens.unwrap_or(map_defaults.min_tokens),
                map_mul_no_files: raw.map_mul_no_files.unwrap_or(map_defaults.map_mul_no_files),
                max_context_window: raw.max_context_window.or(map_defaults.max_context_window),
                context_window_padding: raw
                    .context_window_padding
                    .unwrap_or(map_defaults.context_window_padding),
                no_split: false,
                refresh: raw.refresh.unwrap_or(map_defaults.refresh),
                output_dir: raw.output_dir.map(PathBuf::from).unwrap_or(map_defaults.output_dir),
                artifact_prefix: raw.artifact_prefix.unwrap_or(map_defaults.artifact_prefix),
                workers: raw.workers.unwrap_or(map_defaults.workers),
            },
            ranking: raw.ranking.unwrap_or_default(),
            assembly: raw.assembly.unwrap_or_default(),
            result_cache: raw.result_cache.unwrap_or_default(),
        }
    }

    /// Get effective exclude patterns (defaults + extend-exclude, or custom
    /// exclude), plus the test/doc sets when enabled.
    pub fn effective_excludes(&self) -> Vec<String> {
        let mut patterns: Vec<String> = if !self.exclude.is_empty() {
            // Custom exclude replaces defaults
            self.exclude.clone()
        } else {
            let mut patterns: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
            patterns.extend(self.extend_exclude.iter().cloned());
            patterns
        };
        if self.skip_tests {
            patterns.extend(TEST_PATTERNS.iter().map(|s| s.to_string()));
        }
        if self.skip_docs {
            patterns.extend(DOC_PATTERNS.iter().map(|s| s.to_string()));
        }
        patterns
    }

    /// Check if a path matches any include pattern.
    /// Returns true if no include patterns (include all), or if path matches any pattern.
    pub fn matches_include(&self, path: &Path) -> bool {
        if self.include.is_empty() {
            return true;
        }
        let path_str = path.to_string_lossy();
        self.include.iter().any(|pattern| glob_match::glob_match(pattern, &path_str))
    }

    /// Check if a path matches any exclude pattern.
    pub fn matches_exclude(&self, path: &Path) -> bool {
        let path_str = path.to_string_lossy();
        self.effective_excludes()
            .iter()
            .any(|pattern| glob_match::glob_match(pattern, &path_str))
    }

    /// Check if a path should be included (matches include AND not exclude).
    pub fn should_include(&self, path: &Path) -> bool {
        self.matches_include(path) && !self.matches_exclude(path)
    }

    /// Format config for verbose display.
    pub fn display_summary(&self) -> String {
        let mut lines = Vec::new();

        if let Some(ref source) = self.source {
            lines.push(format!("config: {}", source.display()));
        } else {
            lines.push("config: (defaults)".to_string());
        }

        if !self.include.is_empty() {
            lines.push(format!("include: {}", self.include.join(", ")));
        }

        let excludes = self.effective_excludes();
        if excludes.len() <= 3 {
            lines.push(format!("exclude: {}", excludes.join(", ")));
        } else {
            lines.push(format!(
                "exclude: {}, ... (+{} more)",
                excludes[..2].join(", "),
                excludes.len() - 2
            ));
        }

        lines.push(format!(
            "map: {} tokens (floor {}), refresh={}",
            self.map.map_tokens, self.map.min_tokens, self.map.refresh
        ));

        lines.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_excludes() {
        let config = Config::default();
        assert!(config.matches_exclude(Path::new("foo/node_modules/bar.js")));
        assert!(config.matches_exclude(Path::new("project/.git/config")));
        assert!(config.matches_exclude(Path::new("src/__pycache__/mod.pyc")));
        assert!(config.matches_exclude(Path::new("repo/.repomap.tags.cache.v4/tags.redb")));
        assert!(!config.matches_exclude(Path::new("src/main.py")));
    }

    #[test]
    fn test_include_patterns() {
        let config = Config {
            include: vec!["src/**".to_string(), "lib/**".to_string()],
            ..Default::default()
        };
        assert!(config.matches_include(Path::new("src/main.py")));
        assert!(config.matches_include(Path::new("lib/utils.py")));
        assert!(!config.matches_include(Path::new("tests/test_main.py")));
    }

    #[test]
    fn test_skip_tests_and_docs() {
        let config = Config { skip_tests: true, skip_docs: true, ..Default::default() };
        assert!(config.matches_exclude(Path::new("pkg/tests/test_api.py")));
        assert!(config.matches_exclude(Path::new("pkg/README.md")));
        assert!(!config.matches_exclude(Path::new("pkg/api.py")));
    }

    #[test]
    fn test_refresh_policy_parse() {
        assert_eq!("FILES".parse::<RefreshPolicy>(), Ok(RefreshPolicy::Files));
        assert_eq!(RefreshPolicy::default(), RefreshPolicy::Auto);
        assert!("sometimes".parse::<RefreshPolicy>().is_err());
    }

    #[test]
    fn test_load_repomap_toml_with_sections() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(
            dir.path().join("repomap.toml"),
            r#"
map-tokens = 2048
refresh = "manual"
skip-tests = true

[ranking]
mention-multiplier = 4.0

[assembly]
early-close-ratio = 0.75

[result-cache]
files-sample-size = 7
"#,
        )?;

        let config = Config::load(dir.path());
        assert_eq!(config.map.map_tokens, 2048);
        assert_eq!(config.map.refresh, RefreshPolicy::Manual);
        assert!(config.skip_tests);
        assert_eq!(config.ranking.mention_multiplier, 4.0);
        // Unset keys keep their defaults
        assert_eq!(config.ranking.self_loop_weight, 0.1);
        assert_eq!(config.assembly.early_close_ratio, 0.75);
        assert_eq!(config.result_cache.files_sample_size, 7);
        assert_eq!(config.result_cache.auto_threshold_ms, 1000);
        Ok(())
    }

    #[test]
    fn test_load_pyproject_walks_upward() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(
            dir.path().join("pyproject.toml"),
            "[tool.repomap]\nmin-tokens = 1024\n",
        )?;
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested)?;

        let config = Config::load(&nested);
        assert_eq!(config.map.min_tokens, 1024);
        assert_eq!(config.source, Some(dir.path().join("pyproject.toml")));
        Ok(())
    }

    #[test]
    fn test_malformed_config_warns_and_falls_back() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("repomap.toml"), "map-tokens = [not a number")?;

        let diagnostics = Diagnostics::new();
        let config = Config::load_reporting(dir.path(), &diagnostics);

        assert_eq!(config.map.map_tokens, MapSettings::default().map_tokens);
        assert_eq!(diagnostics.count_where(|w| matches!(w, Warning::Config { .. })), 1);
        Ok(())
    }
}
