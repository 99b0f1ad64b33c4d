//! Diagnostic channel for non-fatal conditions.
//!
//! Every recoverable problem (unreadable file, broken cache, degenerate
//! ranking, oversized excerpt, trimmed file set) is recorded here and echoed
//! through `tracing::warn!`. Callers that need to inspect what happened, tests
//! included, read the recorded list back.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// A recoverable condition worth telling the user about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// File vanished or could not be read; it is skipped
    FileAccess { path: String, reason: String },
    /// Persistent tag store failed; recovered by recreating or going in-memory
    Cache { reason: String },
    /// Ranking could not be normalized; an unranked listing may follow
    RankingDegenerate { reason: String },
    /// A single excerpt exceeds the per-part budget and got its own part
    BudgetOverflow { file: Option<String>, tokens: usize, budget: usize },
    /// The candidate set was trimmed to keep ranking tractable
    ScaleLimit { from: usize, to: usize },
    /// A config file was present but unusable
    Config { path: String, reason: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::FileAccess { path, reason } => {
                write!(f, "skipping {}: {}", path, reason)
            }
            Warning::Cache { reason } => write!(f, "tag cache: {}", reason),
            Warning::RankingDegenerate { reason } => write!(f, "ranking: {}", reason),
            Warning::BudgetOverflow { file, tokens, budget } => match file {
                Some(file) => write!(
                    f,
                    "excerpt for {} is {} tokens, over the {} token budget; emitted as its own part",
                    file, tokens, budget
                ),
                None => write!(
                    f,
                    "excerpt is {} tokens, over the {} token budget; emitted as its own part",
                    tokens, budget
                ),
            },
            Warning::ScaleLimit { from, to } => {
                write!(f, "ranking too expensive for {} files; retrying with {}", from, to)
            }
            Warning::Config { path, reason } => write!(f, "ignoring config {}: {}", path, reason),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    warnings: Vec<Warning>,
    /// Paths already reported as inaccessible
    reported_paths: HashSet<String>,
}

/// Shared, cloneable warning sink.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    inner: Arc<Mutex<Inner>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a warning. Returns false when it was a duplicate and dropped.
    ///
    /// File access warnings are deduplicated per path; everything else is
    /// recorded as given.
    pub fn warn(&self, warning: Warning) -> bool {
        {
            let mut inner = self.lock();
            if let Warning::FileAccess { path, .. } = &warning {
                if !inner.reported_paths.insert(path.clone()) {
                    return false;
                }
            }
            inner.warnings.push(warning.clone());
        }
        tracing::warn!("{}", warning);
        true
    }

    pub fn warnings(&self) -> Vec<Warning> {
        self.lock().warnings.clone()
    }

    pub fn count(&self) -> usize {
        self.lock().warnings.len()
    }

    /// Count recorded warnings matching a predicate
    pub fn count_where(&self, pred: impl Fn(&Warning) -> bool) -> usize {
        self.lock().warnings.iter().filter(|w| pred(w)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_access_warnings_deduplicated() {
        let diag = Diagnostics::new();
        let warning = Warning::FileAccess { path: "a.py".into(), reason: "gone".into() };

        assert!(diag.warn(warning.clone()));
        assert!(!diag.warn(warning));
        assert!(diag.warn(Warning::FileAccess { path: "b.py".into(), reason: "gone".into() }));

        assert_eq!(diag.count(), 2);
    }

    #[test]
    fn test_other_warnings_recorded_each_time() {
        let diag = Diagnostics::new();
        let overflow = Warning::BudgetOverflow { file: None, tokens: 10, budget: 5 };
        diag.warn(overflow.clone());
        diag.warn(overflow);
        assert_eq!(diag.count_where(|w| matches!(w, Warning::BudgetOverflow { .. })), 2);
    }

    #[test]
    fn test_clones_share_the_sink() {
        let diag = Diagnostics::new();
        let other = diag.clone();
        other.warn(Warning::Cache { reason: "corrupt".into() });
        assert_eq!(diag.warnings(), vec![Warning::Cache { reason: "corrupt".into() }]);
    }

    #[test]
    fn test_display_mentions_budget() {
        let msg = Warning::BudgetOverflow { file: Some("big.rs".into()), tokens: 9000, budget: 4096 }
            .to_string();
        assert!(msg.contains("big.rs"));
        assert!(msg.contains("4096"));
    }
}
