//! Regex-based tag extraction.
//!
//! Used when tree-sitter has no grammar for a file or gives up on it.
//! Definitions come from per-language declaration patterns; references are
//! every other identifier token in the file that is not a keyword.
//!
//! - Line numbers are 0-indexed, computed from byte offsets
//! - Each language gets its own pattern table to keep patterns readable

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{Tag, TagKind};

/// Regex fallback parser. Stateless; patterns are compiled once per process.
pub struct RegexParser;

impl RegexParser {
    pub fn new() -> Self {
        Self
    }

    /// Read and parse a file.
    pub fn parse_file(&self, path: &Path, rel_fname: &str) -> Result<Vec<Tag>> {
        let content = std::fs::read_to_string(path)?;
        Ok(self.parse_source(&content, path, rel_fname))
    }

    /// Parse already-loaded source text.
    pub fn parse_source(&self, content: &str, path: &Path, rel_fname: &str) -> Vec<Tag> {
        let lang = detect_language(path);
        let patterns = match definition_patterns(lang) {
            Some(patterns) => patterns,
            None => return Vec::new(),
        };

        let fname: Arc<str> = Arc::from(path.to_string_lossy().into_owned());
        let rel: Arc<str> = Arc::from(rel_fname);
        let mut tags = Vec::new();
        // Byte offsets of identifiers that are definition names
        let mut def_offsets: HashSet<usize> = HashSet::new();

        for pattern in patterns.iter() {
            for cap in pattern.captures_iter(content) {
                let Some(name) = cap.get(1) else { continue };
                if !def_offsets.insert(name.start()) {
                    continue;
                }
                tags.push(Tag::new(
                    rel.clone(),
                    fname.clone(),
                    Some(line_number(content, name.start())),
                    name.as_str(),
                    TagKind::Def,
                ));
            }
        }

        for token in IDENTIFIER.find_iter(content) {
            if def_offsets.contains(&token.start()) || KEYWORDS.contains(token.as_str()) {
                continue;
            }
            tags.push(Tag::new(
                rel.clone(),
                fname.clone(),
                Some(line_number(content, token.start())),
                token.as_str(),
                TagKind::Ref,
            ));
        }

        // Definitions in source order, ahead of references
        tags.sort_by_key(|t| (t.kind, t.line));
        tags
    }
}

impl Default for RegexParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Languages with regex definition patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Language {
    Python,
    Rust,
    JavaScript,
    TypeScript,
    Go,
    Java,
    Ruby,
    Unknown,
}

/// Detect language from file extension.
fn detect_language(path: &Path) -> Language {
    match path.extension().and_then(|e| e.to_str()) {
        Some("py" | "pyi" | "pyw") => Language::Python,
        Some("rs") => Language::Rust,
        Some("js" | "jsx" | "mjs" | "cjs") => Language::JavaScript,
        Some("ts" | "tsx" | "mts" | "cts") => Language::TypeScript,
        Some("go") => Language::Go,
        Some("java") => Language::Java,
        Some("rb") => Language::Ruby,
        _ => Language::Unknown,
    }
}

/// Calculate 0-indexed line number from byte offset.
fn line_number(content: &str, byte_offset: usize) -> u32 {
    content[..byte_offset].matches('\n').count() as u32
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("Invalid definition regex"))
        .collect()
}

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]*\b").expect("Invalid identifier regex"));

/// Words that never name a user symbol in any supported language.
static KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "def", "class", "return", "if", "elif", "else", "for", "while", "in", "is", "not",
        "and", "or", "import", "from", "as", "with", "pass", "break", "continue", "try",
        "except", "finally", "raise", "lambda", "yield", "async", "await", "None", "True",
        "False", "self", "fn", "pub", "let", "mut", "struct", "enum", "trait", "impl", "mod",
        "use", "crate", "super", "Self", "match", "where", "const", "static", "type", "loop",
        "ref", "move", "dyn", "unsafe", "extern", "function", "var", "new", "this", "export",
        "default", "extends", "implements", "interface", "typeof", "instanceof", "null",
        "undefined", "true", "false", "switch", "case", "do", "void", "delete", "package",
        "func", "go", "chan", "select", "defer", "range", "map", "public", "private",
        "protected", "final", "abstract", "throws", "throw", "catch", "end", "module", "then",
        "unless", "begin", "rescue", "ensure", "nil",
    ]
    .into_iter()
    .collect()
});

// ============================================================================
// DEFINITION PATTERNS
// ============================================================================

static PYTHON: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?m)^\s*class\s+(\w+)",
        r"(?m)^\s*(?:async\s+)?def\s+(\w+)\s*\(",
        // Module-level constants
        r"(?m)^([A-Z_][A-Z0-9_]*)\s*=",
    ])
});

static RUST: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?fn\s+(\w+)",
        r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum|union|trait|type|mod)\s+(\w+)",
        r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?(?:const|static)\s+(?:mut\s+)?([A-Za-z_]\w*)\s*:",
        r"(?m)^\s*macro_rules!\s*(\w+)",
    ])
});

static JAVASCRIPT: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?m)^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(\w+)\s*\(",
        r"(?m)^\s*(?:export\s+)?(?:default\s+)?class\s+(\w+)",
        r"(?m)^\s*(?:export\s+)?const\s+(\w+)\s*=\s*(?:async\s*)?\(",
        r"(?m)^\s*(?:export\s+)?const\s+([A-Z_][A-Z0-9_]*)\s*=",
    ])
});

static TYPESCRIPT: Lazy<Vec<Regex>> = Lazy::new(|| {
    let mut patterns = compile(&[
        r"(?m)^\s*(?:export\s+)?(?:declare\s+)?interface\s+(\w+)",
        r"(?m)^\s*(?:export\s+)?(?:declare\s+)?type\s+(\w+)\s*(?:<[^=]*>)?\s*=",
        r"(?m)^\s*(?:export\s+)?(?:declare\s+)?(?:const\s+)?enum\s+(\w+)",
        r"(?m)^\s*(?:export\s+)?abstract\s+class\s+(\w+)",
    ]);
    patterns.extend(JAVASCRIPT.iter().cloned());
    patterns
});

static GO: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?m)^func\s+(?:\([^)]*\)\s*)?(\w+)",
        r"(?m)^type\s+(\w+)",
        r"(?m)^\s*(?:const|var)\s+(\w+)",
    ])
});

static JAVA: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?m)^\s*(?:(?:public|private|protected|static|final|abstract|sealed)\s+)*(?:class|interface|enum|record)\s+(\w+)",
        r"(?m)^\s+(?:(?:public|private|protected|static|final|abstract|synchronized)\s+)+[\w<>\[\], ]+\s+(\w+)\s*\(",
    ])
});

static RUBY: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?m)^\s*(?:class|module)\s+([A-Z]\w*)",
        r"(?m)^\s*def\s+(?:self\.)?(\w+[?!]?)",
    ])
});

fn definition_patterns(lang: Language) -> Option<&'static Vec<Regex>> {
    match lang {
        Language::Python => Some(&PYTHON),
        Language::Rust => Some(&RUST),
        Language::JavaScript => Some(&JAVASCRIPT),
        Language::TypeScript => Some(&TYPESCRIPT),
        Language::Go => Some(&GO),
        Language::Java => Some(&JAVA),
        Language::Ruby => Some(&RUBY),
        Language::Unknown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str, name: &str) -> Vec<Tag> {
        RegexParser::new().parse_source(content, Path::new(name), name)
    }

    fn defs(tags: &[Tag]) -> Vec<&str> {
        tags.iter().filter(|t| t.is_def()).map(|t| t.name.as_ref()).collect()
    }

    #[test]
    fn test_line_number() {
        let content = "line 1\nline 2\nline 3\n";
        assert_eq!(line_number(content, 0), 0);
        assert_eq!(line_number(content, 7), 1);
        assert_eq!(line_number(content, 14), 2);
    }

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language(Path::new("foo.py")), Language::Python);
        assert_eq!(detect_language(Path::new("bar.rs")), Language::Rust);
        assert_eq!(detect_language(Path::new("baz.js")), Language::JavaScript);
        assert_eq!(detect_language(Path::new("qux.ts")), Language::TypeScript);
        assert_eq!(detect_language(Path::new("app.rb")), Language::Ruby);
        assert_eq!(detect_language(Path::new("unknown.txt")), Language::Unknown);
    }

    #[test]
    fn test_parse_python_class_and_method() {
        let tags = parse("class Foo:\n    def bar(self):\n        pass\n", "test.py");
        assert_eq!(defs(&tags), vec!["Foo", "bar"]);
        assert_eq!(tags[0].line, Some(0));
        assert_eq!(tags[1].line, Some(1));
    }

    #[test]
    fn test_references_exclude_definitions_and_keywords() {
        let tags = parse("def helper():\n    return compute(42)\n", "m.py");
        let refs: Vec<&str> = tags.iter().filter(|t| t.is_ref()).map(|t| t.name.as_ref()).collect();
        assert_eq!(refs, vec!["compute"]);
    }

    #[test]
    fn test_parse_rust_items() {
        let tags = parse("pub struct Bar {\n    field: i32\n}\npub(crate) async fn foo() {}\n", "test.rs");
        assert_eq!(defs(&tags), vec!["Bar", "foo"]);
    }

    #[test]
    fn test_parse_typescript_interface_and_class() {
        let tags = parse("export interface IFoo {\n  bar: string;\n}\nexport class Impl {}\n", "test.ts");
        let names = defs(&tags);
        assert!(names.contains(&"IFoo"));
        assert!(names.contains(&"Impl"));
    }

    #[test]
    fn test_unknown_language_yields_nothing() {
        assert!(parse("some words here", "notes.txt").is_empty());
    }
}
