//! Assembly - ranked definitions into budgeted, persisted map parts.
//!
//! - `budget`: effective per-part budget
//! - `splitter`: signature-safe section splitting
//! - `assembler`: section packing into parts
//! - `output`: part files on disk

mod assembler;
mod budget;
mod output;
mod splitter;

pub use assembler::{continued_header, MapAssembler, Section};
pub use budget::effective_budget;
pub use output::{list_parts, part_file_name, repo_name, PartFile, PartWriter};
pub use splitter::{cut_points, split_section, Cut, Piece};
