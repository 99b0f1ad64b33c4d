//! Text production - token counts, per-file excerpts, fallback listings.
//!
//! - `tokens`: token counting and sampled estimation
//! - `context`: elided excerpts around lines of interest, memoized
//! - `listing`: unranked file listing grouped by extension
//! - `colors`: terminal styling for CLI listings

mod colors;
mod context;
mod listing;
mod tokens;

pub use colors::{part_line, Badge, Colorizer};
pub use context::{ContextRenderer, ElidedRenderer, Excerpt, RenderMemo, ELISION_MARKER, GUTTER};
pub use listing::{file_listing, ListingSection, LISTING_HEADER};
pub use tokens::{char_estimator, estimate_tokens, sampled, TokenCounter, SAMPLE_THRESHOLD};
