//! The map pipeline: request → result cache → tags → ranking → assembly.
//!
//! [`RepoMap`] owns the long-lived state of one repository: the tag cache,
//! the result cache, the render memo and the collaborators. Each call to
//! [`RepoMap::get_map`] is a single pass over that state.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;

use crate::assembly::{effective_budget, MapAssembler, PartWriter};
use crate::cache::{ResultCache, TagCache};
use crate::config::Config;
use crate::diagnostics::{Diagnostics, Warning};
use crate::error::{MapError, MapResult, RankError};
use crate::extraction::{SourceParser, TagParser};
use crate::ranking::{ImportanceRanker, RankInput};
use crate::rendering::{char_estimator, sampled, ContextRenderer, ElidedRenderer, RenderMemo, TokenCounter};
use crate::types::{AssembledMap, MapRequest, RankedTagList, Tag};

/// Result of one map request.
#[derive(Debug, Clone)]
pub struct MapOutput {
    pub map: Arc<AssembledMap>,
    /// Persisted files for parts 2..N
    pub artifacts: Vec<PathBuf>,
    /// Served from the result cache
    pub cached: bool,
}

impl MapOutput {
    /// Text of the first part, empty if there is none.
    pub fn text(&self) -> &str {
        self.map.first().map(|p| p.text.as_str()).unwrap_or("")
    }
}

/// A requested file: where it is and what it's called in the map.
#[derive(Debug, Clone)]
struct RequestedFile {
    path: PathBuf,
    rel_fname: Arc<str>,
}

pub struct RepoMap {
    root: PathBuf,
    config: Config,
    diagnostics: Diagnostics,
    tag_cache: TagCache,
    result_cache: ResultCache,
    parser: Arc<dyn TagParser>,
    counter: TokenCounter,
    memo: Arc<RenderMemo>,
    ranker: ImportanceRanker,
    writer: PartWriter,
    pool: Option<rayon::ThreadPool>,
}

impl RepoMap {
    /// Set up the pipeline for the repository at `root`.
    ///
    /// Opening never fails: a broken tag cache degrades to memory.
    pub fn new(root: impl Into<PathBuf>, config: Config, diagnostics: Diagnostics) -> Self {
        let root: PathBuf = root.into();
        let root = root.canonicalize().unwrap_or(root);

        let output_dir = if config.map.output_dir.is_absolute() {
            config.map.output_dir.clone()
        } else {
            root.join(&config.map.output_dir)
        };
        let writer = PartWriter::new(output_dir, config.map.artifact_prefix.clone(), &root);

        let pool = match config.map.workers {
            0 => None,
            workers => match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
                Ok(pool) => Some(pool),
                Err(err) => {
                    tracing::debug!("falling back to the global rayon pool: {}", err);
                    None
                }
            },
        };

        Self {
            tag_cache: TagCache::open(&root, diagnostics.clone()),
            result_cache: ResultCache::new(config.map.refresh, config.result_cache.clone()),
            parser: Arc::new(SourceParser::new()),
            counter: char_estimator(),
            memo: Arc::new(RenderMemo::new(Arc::new(ElidedRenderer::new()))),
            ranker: ImportanceRanker::new(config.ranking.clone()),
            writer,
            pool,
            root,
            config,
            diagnostics,
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn TagParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Use a custom token counter; long texts are counted by sampling.
    pub fn with_token_counter(mut self, counter: TokenCounter) -> Self {
        self.counter = sampled(counter);
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn ContextRenderer>) -> Self {
        self.memo = Arc::new(RenderMemo::new(renderer));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn tag_cache(&self) -> &TagCache {
        &self.tag_cache
    }

    pub fn writer(&self) -> &PartWriter {
        &self.writer
    }

    /// Compute (or serve from cache) the map for a request.
    pub fn get_map(&self, request: &MapRequest) -> MapResult<MapOutput> {
        if request.focus_files.is_empty() && request.other_files.is_empty() {
            return Err(MapError::NoFiles);
        }

        let budget = effective_budget(&self.config.map, !request.focus_files.is_empty());
        let fingerprint = self.result_cache.fingerprint(request, budget);

        let (focus, other) = self.resolve(request);
        if request.force_refresh {
            for file in focus.iter().chain(&other) {
                self.tag_cache.invalidate(&file.rel_fname);
            }
        }

        let cached = self
            .result_cache
            .lookup(&fingerprint, request.force_refresh, || self.sampled_files_changed(&other));
        if let Some(map) = cached {
            tracing::debug!("result cache hit ({} policy)", self.result_cache.policy());
            // Other requests may have rewritten the part files since
            let artifacts = self.persist(&map)?;
            return Ok(MapOutput { map, artifacts, cached: true });
        }

        let started = Instant::now();
        let map = self.compute(request, &focus, &other, budget)?;
        if map.is_empty() {
            return Err(MapError::NoOutput);
        }

        let artifacts = self.persist(&map)?;
        if map.parts.len() > 1 {
            tracing::info!(
                "map split into {} parts of at most {} tokens",
                map.parts.len(),
                budget
            );
        }
        let map = self.result_cache.store(fingerprint, map, started.elapsed());
        Ok(MapOutput { map, artifacts, cached: false })
    }

    /// Split request paths into focus and other files, dropping duplicates.
    fn resolve(&self, request: &MapRequest) -> (Vec<RequestedFile>, Vec<RequestedFile>) {
        let mut seen: HashSet<Arc<str>> = HashSet::new();
        let mut resolve_all = |paths: &[PathBuf]| -> Vec<RequestedFile> {
            paths
                .iter()
                .map(|p| self.requested_file(p))
                .filter(|f| seen.insert(f.rel_fname.clone()))
                .collect()
        };
        let focus = resolve_all(&request.focus_files);
        let other = resolve_all(&request.other_files);
        (focus, other)
    }

    fn requested_file(&self, path: &Path) -> RequestedFile {
        let path = if path.is_absolute() { path.to_path_buf() } else { self.root.join(path) };
        let rel = match path.strip_prefix(&self.root) {
            Ok(rel) => rel.to_path_buf(),
            // Symlinked temp dirs and the like: compare canonical forms
            Err(_) => path
                .canonicalize()
                .ok()
                .and_then(|c| c.strip_prefix(&self.root).ok().map(Path::to_path_buf))
                .unwrap_or_else(|| path.clone()),
        };
        let rel_fname = rel.to_string_lossy().replace('\\', "/");
        RequestedFile { path, rel_fname: Arc::from(rel_fname) }
    }

    /// Under the `files` policy: did any sampled file change since its tags
    /// were cached?
    fn sampled_files_changed(&self, other: &[RequestedFile]) -> bool {
        self.result_cache
            .sample(other)
            .into_iter()
            .any(|file| !self.tag_cache.is_fresh(&file.path, &file.rel_fname))
    }

    fn compute(
        &self,
        request: &MapRequest,
        focus: &[RequestedFile],
        other: &[RequestedFile],
        budget: usize,
    ) -> MapResult<AssembledMap> {
        let all: Vec<RequestedFile> = focus.iter().chain(other).cloned().collect();
        let tags = self.collect_tags(&all);
        tracing::debug!("{} tags from {} files", tags.len(), all.len());

        let focus_set: BTreeSet<Arc<str>> = focus.iter().map(|f| f.rel_fname.clone()).collect();
        let files: Vec<Arc<str>> = all.iter().map(|f| f.rel_fname.clone()).collect();

        let ranked = match self.rank(&tags, &files, &focus_set, request) {
            Ok(ranked) => ranked,
            Err(RankError::ScaleLimit { nodes, edges }) => {
                tracing::debug!("scale limit hit: {} nodes, {} edges", nodes, edges);
                self.rank_trimmed(&tags, focus, other, &focus_set, request)?
            }
            Err(RankError::Degenerate(reason)) => {
                self.diagnostics.warn(Warning::RankingDegenerate { reason });
                Vec::new()
            }
        };

        let assembler = MapAssembler::new(
            self.counter.clone(),
            self.memo.clone(),
            self.config.assembly.clone(),
            self.diagnostics.clone(),
        );

        if ranked.is_empty() {
            let listed: Vec<Arc<str>> = other.iter().map(|f| f.rel_fname.clone()).collect();
            tracing::debug!("no ranking available, listing {} files", listed.len());
            return Ok(assembler.assemble_listing(&listed, budget));
        }
        Ok(assembler.assemble(&ranked, budget))
    }

    /// Retry ranking once over a bounded prefix of the other files.
    fn rank_trimmed(
        &self,
        tags: &[Tag],
        focus: &[RequestedFile],
        other: &[RequestedFile],
        focus_set: &BTreeSet<Arc<str>>,
        request: &MapRequest,
    ) -> MapResult<RankedTagList> {
        let limit = self.config.ranking.scale_retry_files;
        let mut kept: Vec<Arc<str>> = other.iter().map(|f| f.rel_fname.clone()).collect();
        kept.sort();
        kept.truncate(limit);

        self.diagnostics.warn(Warning::ScaleLimit { from: other.len(), to: kept.len() });

        let files: Vec<Arc<str>> = focus.iter().map(|f| f.rel_fname.clone()).chain(kept).collect();
        let keep: HashSet<&str> = files.iter().map(|f| &**f).collect();
        let tags: Vec<Tag> = tags.iter().filter(|t| keep.contains(&*t.rel_fname)).cloned().collect();

        match self.rank(&tags, &files, focus_set, request) {
            Ok(ranked) => Ok(ranked),
            Err(RankError::ScaleLimit { nodes, edges }) => Err(MapError::ScaleLimit {
                files: files.len(),
                limit: format!(
                    "{} nodes / {} edges, graph had {} / {}",
                    self.config.ranking.max_graph_nodes, self.config.ranking.max_graph_edges, nodes, edges
                ),
            }),
            Err(RankError::Degenerate(reason)) => {
                self.diagnostics.warn(Warning::RankingDegenerate { reason });
                Ok(Vec::new())
            }
        }
    }

    fn rank(
        &self,
        tags: &[Tag],
        files: &[Arc<str>],
        focus: &BTreeSet<Arc<str>>,
        request: &MapRequest,
    ) -> Result<RankedTagList, RankError> {
        let input = RankInput {
            tags,
            files,
            focus,
            mentioned_files: &request.mentioned_files,
            mentioned_idents: &request.mentioned_idents,
        };
        self.ranker.rank(input, &self.diagnostics)
    }

    /// Tags of every file, in request order, parsed in parallel.
    fn collect_tags(&self, files: &[RequestedFile]) -> Vec<Tag> {
        let parser = self.parser.as_ref();
        let collect = || -> Vec<Tag> {
            files
                .par_iter()
                .flat_map_iter(|file| self.tag_cache.get(&file.path, &file.rel_fname, parser))
                .collect()
        };
        match &self.pool {
            Some(pool) => pool.install(collect),
            None => collect(),
        }
    }

    /// Write parts 2..N and drop stale parts from longer earlier runs.
    fn persist(&self, map: &AssembledMap) -> MapResult<Vec<PathBuf>> {
        let io_error = |err: anyhow::Error| {
            let path = self.writer.output_dir().to_path_buf();
            let source = match err.downcast::<std::io::Error>() {
                Ok(io) => io,
                Err(other) => std::io::Error::other(format!("{:#}", other)),
            };
            MapError::Io { path, source }
        };

        let artifacts = self.writer.write_all(map.parts.iter().skip(1)).map_err(io_error)?;
        self.writer.remove_after(map.parts.len()).map_err(io_error)?;
        Ok(artifacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::continued_header;
    use crate::config::RefreshPolicy;
    use crate::types::RankedEntry;
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn config(policy: RefreshPolicy) -> Config {
        let mut config = Config::default();
        config.map.refresh = policy;
        config
    }

    fn write(dir: &TempDir, rel: &str, content: &str) -> Result<PathBuf> {
        let path = dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        Ok(path)
    }

    /// A module per index, each calling the previous one.
    fn chain_repo(dir: &TempDir, count: usize) -> Result<Vec<PathBuf>> {
        (0..count)
            .map(|i| {
                let body = if i == 0 {
                    "def handler_0(request,\n              context):\n    return request\n".to_string()
                } else {
                    format!(
                        "def handler_{}(request,\n              context):\n    return handler_{}(request, context)\n",
                        i,
                        i - 1
                    )
                };
                write(dir, &format!("pkg/mod_{:02}.py", i), &body)
            })
            .collect()
    }

    struct CountingParser {
        inner: SourceParser,
        calls: AtomicUsize,
    }

    impl TagParser for CountingParser {
        fn parse(&self, path: &Path, rel_fname: &str) -> Result<Vec<Tag>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.parse(path, rel_fname)
        }
    }

    #[test]
    fn test_definer_listed_referencer_not() -> Result<()> {
        let dir = TempDir::new()?;
        let a = write(&dir, "a.py", "def foo():\n    return 1\n")?;
        let b = write(&dir, "b.py", "foo()\n")?;

        let repo = RepoMap::new(dir.path(), config(RefreshPolicy::Always), Diagnostics::new());
        let out = repo.get_map(&MapRequest::new(vec![], vec![a, b]))?;

        assert!(out.text().contains("a.py:\n│def foo():"));
        assert!(!out.text().contains("b.py"));
        Ok(())
    }

    #[test]
    fn test_budget_floor_applies() -> Result<()> {
        let dir = TempDir::new()?;
        let a = write(&dir, "a.py", "def foo():\n    pass\n")?;
        let b = write(&dir, "b.py", "def bar():\n    foo()\n")?;

        let mut config = config(RefreshPolicy::Always);
        config.map.map_tokens = 100;
        let repo = RepoMap::new(dir.path(), config, Diagnostics::new());
        let out = repo.get_map(&MapRequest::new(vec![a], vec![b]))?;

        assert_eq!(out.map.budget, 4096);
        Ok(())
    }

    #[test]
    fn test_no_files_is_an_error() {
        let dir = TempDir::new().unwrap();
        let repo = RepoMap::new(dir.path(), Config::default(), Diagnostics::new());
        assert!(matches!(repo.get_map(&MapRequest::default()), Err(MapError::NoFiles)));
    }

    #[test]
    fn test_parts_within_budget_and_persisted() -> Result<()> {
        let dir = TempDir::new()?;
        let files = chain_repo(&dir, 40)?;

        let repo = RepoMap::new(dir.path(), small_parts(RefreshPolicy::Always), Diagnostics::new());
        let out = repo.get_map(&MapRequest::new(vec![], files))?;

        let parts = &out.map.parts;
        assert!(parts.len() > 1);
        for part in parts.iter() {
            assert!(!part.oversized);
            assert!(part.token_count <= 120);
            // Two-line signatures stay whole
            assert_eq!(part.text.matches('(').count(), part.text.matches(')').count());
        }
        for part in parts.iter().skip(1) {
            assert!(part.text.starts_with(&continued_header(part.index)));
        }

        assert_eq!(out.artifacts.len(), parts.len() - 1);
        for (path, part) in out.artifacts.iter().zip(parts.iter().skip(1)) {
            assert_eq!(fs::read_to_string(path)?, part.text);
        }
        Ok(())
    }

    #[test]
    fn test_identical_requests_identical_maps() -> Result<()> {
        let dir = TempDir::new()?;
        let files = chain_repo(&dir, 12)?;
        let request = MapRequest::new(vec![], files).with_mentioned_idents(["handler_3"]);

        let first = RepoMap::new(dir.path(), config(RefreshPolicy::Always), Diagnostics::new())
            .get_map(&request)?;
        let second = RepoMap::new(dir.path(), config(RefreshPolicy::Always), Diagnostics::new())
            .get_map(&request)?;
        assert_eq!(first.map.parts, second.map.parts);
        Ok(())
    }

    #[test]
    fn test_manual_policy_serves_last_map() -> Result<()> {
        let dir = TempDir::new()?;
        let a = write(&dir, "a.py", "def alpha():\n    pass\n")?;
        let b = write(&dir, "b.py", "def beta():\n    alpha()\n")?;

        let repo = RepoMap::new(dir.path(), config(RefreshPolicy::Manual), Diagnostics::new());
        let first = repo.get_map(&MapRequest::new(vec![], vec![a.clone(), b.clone()]))?;
        let second = repo.get_map(&MapRequest::new(vec![a.clone()], vec![b.clone()]))?;

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.text(), second.text());

        let refreshed = repo.get_map(&MapRequest::new(vec![a], vec![b]).force_refresh(true))?;
        assert!(!refreshed.cached);
        Ok(())
    }

    fn small_parts(policy: RefreshPolicy) -> Config {
        let mut config = config(policy);
        config.map.map_tokens = 120;
        config.map.min_tokens = 60;
        config.map.map_mul_no_files = 1.0;
        config
    }

    #[test]
    fn test_cached_map_rewrites_its_parts() -> Result<()> {
        let dir = TempDir::new()?;
        let files = chain_repo(&dir, 40)?;

        let repo = RepoMap::new(dir.path(), small_parts(RefreshPolicy::Files), Diagnostics::new());
        let large = MapRequest::new(vec![], files.clone());
        let small = MapRequest::new(vec![], files[..12].to_vec());

        let first = repo.get_map(&large)?;
        repo.get_map(&small)?;
        let again = repo.get_map(&large)?;

        assert!(!first.cached);
        assert!(again.cached);
        assert_eq!(again.artifacts.len(), again.map.parts.len() - 1);
        for (path, part) in again.artifacts.iter().zip(again.map.parts.iter().skip(1)) {
            assert_eq!(fs::read_to_string(path)?, part.text);
        }
        let on_disk: Vec<usize> = repo.writer().list()?.iter().map(|p| p.index).collect();
        let expected: Vec<usize> = (2..=again.map.parts.len()).collect();
        assert_eq!(on_disk, expected);
        Ok(())
    }

    #[test]
    fn test_files_policy_recomputes_after_touch() -> Result<()> {
        let dir = TempDir::new()?;
        let a = write(&dir, "a.py", "def alpha():\n    pass\n")?;
        let b = write(&dir, "b.py", "def beta():\n    alpha()\n")?;

        let repo = RepoMap::new(dir.path(), config(RefreshPolicy::Files), Diagnostics::new());
        let request = MapRequest::new(vec![], vec![a, b.clone()]);

        assert!(!repo.get_map(&request)?.cached);
        assert!(repo.get_map(&request)?.cached);

        fs::File::options()
            .write(true)
            .open(&b)?
            .set_modified(SystemTime::now() + Duration::from_secs(60))?;
        assert!(!repo.get_map(&request)?.cached);
        assert!(repo.get_map(&request)?.cached);
        Ok(())
    }

    #[test]
    fn test_force_refresh_reparses() -> Result<()> {
        let dir = TempDir::new()?;
        let a = write(&dir, "a.py", "def alpha():\n    pass\n")?;
        let parser = Arc::new(CountingParser { inner: SourceParser::new(), calls: AtomicUsize::new(0) });

        let repo = RepoMap::new(dir.path(), config(RefreshPolicy::Always), Diagnostics::new())
            .with_parser(parser.clone());
        let request = MapRequest::new(vec![], vec![a]);

        repo.get_map(&request)?;
        repo.get_map(&request)?;
        assert_eq!(parser.calls.load(Ordering::SeqCst), 1);

        repo.get_map(&request.clone().force_refresh(true))?;
        assert_eq!(parser.calls.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[test]
    fn test_untaggable_files_fall_back_to_listing() -> Result<()> {
        let dir = TempDir::new()?;
        let notes = write(&dir, "notes.txt", "just words\n")?;
        let data = write(&dir, "data.csv", "a,b\n")?;

        let diagnostics = Diagnostics::new();
        let repo = RepoMap::new(dir.path(), config(RefreshPolicy::Always), diagnostics.clone());
        let out = repo.get_map(&MapRequest::new(vec![], vec![notes, data]))?;

        assert!(out.map.unranked);
        assert_eq!(
            out.text(),
            "Repository contents:\n\n.csv files:\n  data.csv\n\n.txt files:\n  notes.txt\n\n"
        );
        assert_eq!(diagnostics.count_where(|w| matches!(w, Warning::RankingDegenerate { .. })), 1);
        Ok(())
    }

    #[test]
    fn test_scale_limit_trims_and_retries() -> Result<()> {
        let dir = TempDir::new()?;
        let files = chain_repo(&dir, 10)?;

        let mut config = config(RefreshPolicy::Always);
        config.ranking.max_graph_nodes = 5;
        config.ranking.scale_retry_files = 4;
        let diagnostics = Diagnostics::new();
        let repo = RepoMap::new(dir.path(), config, diagnostics.clone());
        let out = repo.get_map(&MapRequest::new(vec![], files))?;

        assert_eq!(diagnostics.warnings(), vec![Warning::ScaleLimit { from: 10, to: 4 }]);
        assert!(out.text().contains("pkg/mod_00.py"));
        assert!(!out.text().contains("pkg/mod_09.py"));
        Ok(())
    }

    #[test]
    fn test_scale_limit_twice_is_terminal() -> Result<()> {
        let dir = TempDir::new()?;
        let files = chain_repo(&dir, 6)?;

        let mut config = config(RefreshPolicy::Always);
        config.ranking.max_graph_nodes = 2;
        config.ranking.scale_retry_files = 3;
        let repo = RepoMap::new(dir.path(), config, Diagnostics::new());
        let err = repo.get_map(&MapRequest::new(vec![], files)).unwrap_err();

        assert!(matches!(err, MapError::ScaleLimit { files: 3, .. }));
        Ok(())
    }

    #[test]
    fn test_focus_files_never_listed() -> Result<()> {
        let dir = TempDir::new()?;
        let files = chain_repo(&dir, 4)?;
        let (focus, other) = files.split_at(1);

        let repo = RepoMap::new(dir.path(), config(RefreshPolicy::Always), Diagnostics::new());
        let out = repo.get_map(&MapRequest::new(focus.to_vec(), other.to_vec()))?;

        assert!(!out.text().contains("pkg/mod_00.py"));
        assert!(out.text().contains("pkg/mod_01.py"));
        Ok(())
    }

    #[test]
    fn test_relative_request_paths() -> Result<()> {
        let dir = TempDir::new()?;
        write(&dir, "src/lib.py", "def exported():\n    pass\n")?;

        let repo = RepoMap::new(dir.path(), config(RefreshPolicy::Always), Diagnostics::new());
        let (_, other) = repo.resolve(&MapRequest::new(vec![], vec![PathBuf::from("src/lib.py")]));
        assert_eq!(&*other[0].rel_fname, "src/lib.py");
        assert!(other[0].path.is_file());

        let ranked = repo.rank(
            &repo.collect_tags(&other),
            &[other[0].rel_fname.clone()],
            &BTreeSet::new(),
            &MapRequest::default(),
        )?;
        assert!(matches!(&ranked[0], RankedEntry::Definition(r) if &*r.tag.name == "exported"));
        Ok(())
    }
}
