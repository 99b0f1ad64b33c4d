//! Unranked fallback: a plain file listing grouped by extension.
//!
//! ```text
//! Repository contents:
//!
//! .py files:
//!   pkg/a.py
//!   pkg/b.py
//!
//! files without extension:
//!   Makefile
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Header of the first listing section.
pub const LISTING_HEADER: &str = "Repository contents:";

/// One extension group of the listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingSection {
    /// `.ext files:` line, repeated when the group continues in a new part
    pub heading: Option<String>,
    pub text: String,
}

/// Listing sections, one per extension, ready for the assembler.
///
/// The first section carries the listing header so it lands in part 1.
pub fn file_listing(files: &[Arc<str>]) -> Vec<ListingSection> {
    let mut groups: BTreeMap<Option<String>, Vec<&str>> = BTreeMap::new();
    for file in files {
        let ext = Path::new(file.as_ref())
            .extension()
            .map(|e| e.to_string_lossy().to_string());
        groups.entry(ext).or_default().push(file.as_ref());
    }

    let mut sections = Vec::with_capacity(groups.len());
    // Extensionless files sort first in the map; list them last
    let (bare, with_ext): (Vec<_>, Vec<_>) = groups.into_iter().partition(|(ext, _)| ext.is_none());

    for (ext, mut paths) in with_ext.into_iter().chain(bare) {
        paths.sort_unstable();
        paths.dedup();
        let heading = match ext {
            Some(ext) => format!(".{} files:\n", ext),
            None => "files without extension:\n".to_string(),
        };
        let mut text = heading.clone();
        for path in paths {
            text.push_str("  ");
            text.push_str(path);
            text.push('\n');
        }
        text.push('\n');
        sections.push(ListingSection { heading: Some(heading), text });
    }

    if let Some(first) = sections.first_mut() {
        first.text.insert_str(0, &format!("{}\n\n", LISTING_HEADER));
    } else {
        sections.push(ListingSection { heading: None, text: format!("{}\n", LISTING_HEADER) });
    }
    sections
}
