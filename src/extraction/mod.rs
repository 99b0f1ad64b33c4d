//! Tag extraction from source code.
//!
//! - `TreeSitterParser`: AST walk for bundled grammars, plus structural
//!   boundary analysis used by the splitter
//! - `RegexParser`: pattern-based fallback for everything else
//! - `SourceParser`: the default [`TagParser`], combining both

mod parser;
mod tags;
mod treesitter;

pub use parser::RegexParser;
pub use tags::{language_for_path, structural_boundaries, SourceParser, TagParser};
pub use treesitter::{extension_to_language, TreeSitterParser};
