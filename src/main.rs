//! repomap CLI - token-budgeted repository maps
//!
//! Discovers files under the given paths, ranks their definitions against
//! the focus files and writes the map as numbered parts:
//!
//! 1. Discovery: walk paths respecting .gitignore and repomap.toml
//! 2. Map: tag cache → ranking → assembly (see `RepoMap`)
//! 3. Output: every part to `<output-dir>/<prefix>_<repo>_partNNNNN.txt`,
//!    part 1 also to stdout
//!
//! Maintenance modes (--list-parts, --symbols, --cache-stats, --clear-cache)
//! run instead of the map and exit.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use repomap::assembly::{list_parts, repo_name, PartWriter};
use repomap::cache::TagCache;
use repomap::discovery::find_source_files_in;
use repomap::extraction::{SourceParser, TagParser};
use repomap::rendering::{part_line, Badge, Colorizer};
use repomap::{Config, Diagnostics, MapOutput, MapRequest, RefreshPolicy, RepoMap};

/// Token-budgeted, importance-ranked repository maps
///
/// repomap lists the definitions that matter most for the files you are
/// working on, ranked by how the rest of the repository references them,
/// split into parts that each fit a token budget.
///
/// Examples:
///   repomap .                              # Map the whole repository
///   repomap . --focus src/lib.rs           # Rank around a file in focus
///   repomap . -t 2048 --mention-ident Foo  # Smaller parts, boost a symbol
///   repomap --list-parts                   # Show previously written parts
#[derive(Parser, Debug)]
#[command(name = "repomap")]
#[command(version)]
#[command(about, long_about = None)]
pub struct Cli {
    /// Files or directories to map
    ///
    /// Directories are expanded by discovery. Defaults to the root.
    #[arg(value_name = "PATHS")]
    pub paths: Vec<PathBuf>,

    /// Focus file (repeatable)
    ///
    /// Focus files steer the ranking and are never listed in the map.
    #[arg(long, value_name = "FILE")]
    pub focus: Vec<PathBuf>,

    /// Token budget per part
    ///
    /// Raised to the configured floor (4096 by default). Without focus
    /// files the budget is boosted for a wider overview.
    #[arg(short = 't', long)]
    pub tokens: Option<usize>,

    /// Produce one unbounded part
    #[arg(long)]
    pub no_split: bool,

    /// Verbose output
    ///
    /// Progress and per-part summaries on stderr.
    #[arg(short, long)]
    pub verbose: bool,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(long)]
    pub debug: bool,

    /// Directory for part files, relative to the root unless absolute
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Repository root
    ///
    /// Base for relative paths, the tag cache and configuration lookup.
    #[arg(short, long, default_value = ".")]
    pub root: PathBuf,

    /// When a previously assembled map may be served
    #[arg(long, value_enum)]
    pub refresh: Option<RefreshPolicy>,

    /// File mentioned in the conversation (repeatable)
    #[arg(long, value_name = "FILE")]
    pub mention_file: Vec<String>,

    /// Identifier mentioned in the conversation (repeatable)
    #[arg(long, value_name = "NAME")]
    pub mention_ident: Vec<String>,

    /// Re-parse the requested files and bypass the result cache
    #[arg(long)]
    pub force_refresh: bool,

    /// List the part files written for this repository
    #[arg(long)]
    pub list_parts: bool,

    /// Print a JSON report instead of part 1
    #[arg(long)]
    pub json: bool,

    /// Print the definitions found in one file
    #[arg(long, value_name = "FILE")]
    pub symbols: Option<PathBuf>,

    /// Show tag cache statistics
    #[arg(long)]
    pub cache_stats: bool,

    /// Delete every cached tag entry
    #[arg(long)]
    pub clear_cache: bool,
}

/// JSON report of one run.
#[derive(Debug, Serialize)]
struct Report {
    repo: String,
    budget: Option<usize>,
    unranked: bool,
    cached: bool,
    total_tokens: usize,
    parts: Vec<PartReport>,
    warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
struct PartReport {
    index: usize,
    path: PathBuf,
    tokens: usize,
    oversized: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match dispatch(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::from(1)
        }
    }
}

/// stderr logging: RUST_LOG wins, then --debug, then --verbose.
fn init_tracing(cli: &Cli) {
    let default = if cli.debug {
        "repomap=trace"
    } else if cli.verbose {
        "repomap=debug"
    } else {
        "repomap=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn dispatch(cli: &Cli) -> Result<()> {
    let root = cli
        .root
        .canonicalize()
        .with_context(|| format!("failed to resolve root path '{}'", cli.root.display()))?;

    let diagnostics = Diagnostics::new();
    let mut config = Config::load_reporting(&root, &diagnostics);
    apply_overrides(cli, &mut config);

    if cli.verbose {
        eprintln!("repomap v{}", env!("CARGO_PKG_VERSION"));
        eprintln!("root: {}", root.display());
        eprintln!("{}", config.display_summary());
    }

    if cli.clear_cache || cli.cache_stats {
        return run_cache(cli, &root, diagnostics);
    }
    if cli.list_parts {
        return run_list_parts(&root, &config);
    }
    if let Some(file) = &cli.symbols {
        return run_symbols(&root, file);
    }

    let run = run_map(cli, &root, config, diagnostics)?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&run.report)?);
    } else {
        print!("{}", run.output.text());
    }
    Ok(())
}

/// CLI flags take precedence over the config file.
fn apply_overrides(cli: &Cli, config: &mut Config) {
    if let Some(tokens) = cli.tokens {
        config.map.map_tokens = tokens;
    }
    if cli.no_split {
        config.map.no_split = true;
    }
    if let Some(dir) = &cli.output_dir {
        config.map.output_dir = dir.clone();
    }
    if let Some(policy) = cli.refresh {
        config.map.refresh = policy;
    }
}

/// Relative inputs are tried against the working directory, then the root.
fn resolve_input(root: &Path, path: &Path) -> Option<PathBuf> {
    if path.exists() {
        return path.canonicalize().ok();
    }
    let under_root = root.join(path);
    under_root.exists().then(|| under_root.canonicalize().ok()).flatten()
}

struct MapRun {
    output: MapOutput,
    report: Report,
}

fn run_map(cli: &Cli, root: &Path, config: Config, diagnostics: Diagnostics) -> Result<MapRun> {
    let start = Instant::now();

    let inputs: Vec<PathBuf> = if cli.paths.is_empty() { vec![root.to_path_buf()] } else { cli.paths.clone() };
    let mut existing = Vec::new();
    for input in &inputs {
        match resolve_input(root, input) {
            Some(path) => existing.push(path),
            None => tracing::warn!("skipping non-existent path: {}", input.display()),
        }
    }
    if existing.is_empty() {
        anyhow::bail!("none of the given paths exist");
    }

    let mut focus = Vec::new();
    for file in &cli.focus {
        match resolve_input(root, file) {
            Some(path) => focus.push(path),
            None => tracing::warn!("skipping non-existent focus file: {}", file.display()),
        }
    }

    let files = find_source_files_in(&existing, &config)?;
    if files.is_empty() && focus.is_empty() {
        anyhow::bail!("no source files found; check your paths and .gitignore");
    }
    tracing::info!("found {} files ({:.2?})", files.len(), start.elapsed());

    let others: Vec<PathBuf> = files.into_iter().filter(|f| !focus.contains(f)).collect();
    let request = MapRequest::new(focus, others)
        .with_mentioned_files(cli.mention_file.iter().cloned())
        .with_mentioned_idents(cli.mention_ident.iter().cloned())
        .force_refresh(cli.force_refresh);

    let repo = RepoMap::new(root, config, diagnostics.clone());
    let output = repo.get_map(&request)?;

    // The library persists parts 2..N; the CLI also keeps part 1 on disk
    let writer = repo.writer();
    let mut paths = Vec::with_capacity(output.map.parts.len());
    if let Some(first) = output.map.first() {
        paths.push(writer.write(first)?);
    }
    paths.extend(output.artifacts.iter().cloned());

    let color = std::io::stderr().is_terminal();
    if cli.verbose {
        for (part, path) in output.map.parts.iter().zip(&paths) {
            let mut badges = Vec::new();
            if part.oversized {
                badges.push(Badge::Oversized);
            }
            if output.map.unranked {
                badges.push(Badge::Unranked);
            }
            let detail = Colorizer::tokens(part.token_count, color);
            eprintln!("{}", part_line(part.index, &path.display().to_string(), &detail, &badges, color));
        }
        eprintln!(
            "{} parts{} ({:.2?})",
            output.map.parts.len(),
            if output.cached { ", cached" } else { "" },
            start.elapsed()
        );
    }

    let report = Report {
        repo: writer.repo_name().to_string(),
        budget: (output.map.budget != usize::MAX).then_some(output.map.budget),
        unranked: output.map.unranked,
        cached: output.cached,
        total_tokens: output.map.total_tokens(),
        parts: output
            .map
            .parts
            .iter()
            .zip(&paths)
            .map(|(part, path)| PartReport {
                index: part.index,
                path: path.clone(),
                tokens: part.token_count,
                oversized: part.oversized,
            })
            .collect(),
        warnings: diagnostics.warnings().iter().map(ToString::to_string).collect(),
    };

    Ok(MapRun { output, report })
}

fn run_list_parts(root: &Path, config: &Config) -> Result<()> {
    let output_dir = if config.map.output_dir.is_absolute() {
        config.map.output_dir.clone()
    } else {
        root.join(&config.map.output_dir)
    };
    let parts = list_parts(&output_dir, &config.map.artifact_prefix, &repo_name(root))?;
    if parts.is_empty() {
        anyhow::bail!("no parts in {}", output_dir.display());
    }

    let color = std::io::stdout().is_terminal();
    for part in &parts {
        let detail = Colorizer::dim(&format!("{} bytes", part.bytes), color);
        println!("{}", part_line(part.index, &part.path.display().to_string(), &detail, &[], color));
    }
    Ok(())
}

fn run_symbols(root: &Path, file: &Path) -> Result<()> {
    let path = resolve_input(root, file)
        .with_context(|| format!("no such file: {}", file.display()))?;
    let rel = path.strip_prefix(root).unwrap_or(&path).to_string_lossy().replace('\\', "/");

    let mut defs: Vec<_> = SourceParser::new()
        .parse(&path, &rel)?
        .into_iter()
        .filter(|t| t.is_def())
        .collect();
    defs.sort_by_key(|t| t.line);

    let color = std::io::stdout().is_terminal();
    println!("{}", Colorizer::file_path(&rel, color));
    for tag in defs {
        let line = tag.line.map(|l| (l + 1).to_string()).unwrap_or_else(|| "?".to_string());
        println!("  {:>5}  {}", Colorizer::dim(&line, color), tag.name);
    }
    Ok(())
}

fn run_cache(cli: &Cli, root: &Path, diagnostics: Diagnostics) -> Result<()> {
    let cache = TagCache::open(root, diagnostics);
    if cli.clear_cache {
        cache.clear()?;
        println!("cleared {}", cache.cache_dir().display());
    }
    if cli.cache_stats {
        let stats = cache.stats();
        println!("cache: {}", cache.cache_dir().display());
        println!("backend: {}", stats.backend);
        println!("entries: {}", stats.entries);
        println!("size: {}", stats.size_human());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("repomap").chain(args.iter().copied()))
    }

    #[test]
    fn test_cli_parse_minimal() {
        let cli = cli(&[]);
        assert!(cli.paths.is_empty());
        assert_eq!(cli.tokens, None);
        assert_eq!(cli.root, PathBuf::from("."));
        assert!(!cli.no_split);
    }

    #[test]
    fn test_cli_parse_repeatable_flags() {
        let cli = cli(&[
            "src",
            "--focus", "src/a.py",
            "--focus", "src/b.py",
            "--mention-ident", "Foo",
            "--mention-ident", "bar",
            "--mention-file", "src/c.py",
        ]);
        assert_eq!(cli.paths, vec![PathBuf::from("src")]);
        assert_eq!(cli.focus, vec![PathBuf::from("src/a.py"), PathBuf::from("src/b.py")]);
        assert_eq!(cli.mention_ident, vec!["Foo", "bar"]);
        assert_eq!(cli.mention_file, vec!["src/c.py"]);
    }

    #[test]
    fn test_cli_parse_refresh_policy() {
        assert_eq!(cli(&["--refresh", "manual"]).refresh, Some(RefreshPolicy::Manual));
        assert!(Cli::try_parse_from(["repomap", "--refresh", "sometimes"]).is_err());
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut config = Config::default();
        apply_overrides(&cli(&["-t", "2048", "--no-split", "-o", "maps", "--refresh", "files"]), &mut config);
        assert_eq!(config.map.map_tokens, 2048);
        assert!(config.map.no_split);
        assert_eq!(config.map.output_dir, PathBuf::from("maps"));
        assert_eq!(config.map.refresh, RefreshPolicy::Files);
    }

    #[test]
    fn test_run_writes_every_part() -> Result<()> {
        let dir = TempDir::new()?;
        let root = dir.path().canonicalize()?;
        fs::write(root.join("a.py"), "def foo():\n    return 1\n")?;
        fs::write(root.join("b.py"), "foo()\n")?;

        let cli = cli(&["--refresh", "always"]);
        let mut config = Config::default();
        apply_overrides(&cli, &mut config);
        let run = run_map(&cli, &root, config, Diagnostics::new())?;

        assert_eq!(run.report.parts.len(), run.output.map.parts.len());
        for part in &run.report.parts {
            assert!(part.path.is_file());
        }
        assert!(run.output.text().contains("def foo():"));
        assert!(run.report.parts[0].path.starts_with(root.join("output")));
        Ok(())
    }

    #[test]
    fn test_run_fails_without_inputs() {
        let dir = TempDir::new().unwrap();
        let cli = cli(&["does/not/exist"]);
        assert!(run_map(&cli, dir.path(), Config::default(), Diagnostics::new()).is_err());
    }
}
