//! Tree-sitter based tag extraction and structural boundary analysis.
//!
//! Rather than shipping per-language `.scm` query files, extraction walks the
//! syntax tree directly:
//! - a node whose kind is a declaration kind for the language yields a
//!   definition tag from its `name` field
//! - every other identifier-like leaf yields a reference tag
//!
//! The same declaration kinds drive [`TreeSitterParser::boundaries`], which
//! reports the lines where declarations start and end so the splitter has
//! syntax-aware candidates to cut at.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tree_sitter::{Language, Node, Parser as TsParser, Tree};

use crate::types::{Tag, TagKind};

/// Node kinds that declare a named symbol, and the leaf kinds that name one.
struct LangSpec {
    definitions: &'static [&'static str],
    identifiers: &'static [&'static str],
    /// Sibling/wrapper kinds that belong to the declaration that follows
    decorators: &'static [&'static str],
}

const PYTHON: LangSpec = LangSpec {
    definitions: &["function_definition", "class_definition"],
    identifiers: &["identifier"],
    decorators: &["decorated_definition"],
};

const RUST: LangSpec = LangSpec {
    definitions: &[
        "function_item",
        "function_signature_item",
        "struct_item",
        "enum_item",
        "union_item",
        "trait_item",
        "type_item",
        "const_item",
        "static_item",
        "mod_item",
        "macro_definition",
    ],
    identifiers: &["identifier", "type_identifier", "field_identifier"],
    decorators: &["attribute_item"],
};

const JAVASCRIPT: LangSpec = LangSpec {
    definitions: &[
        "function_declaration",
        "generator_function_declaration",
        "class_declaration",
        "method_definition",
    ],
    identifiers: &["identifier", "property_identifier"],
    decorators: &["decorator"],
};

const TYPESCRIPT: LangSpec = LangSpec {
    definitions: &[
        "function_declaration",
        "generator_function_declaration",
        "class_declaration",
        "abstract_class_declaration",
        "method_definition",
        "interface_declaration",
        "type_alias_declaration",
        "enum_declaration",
    ],
    identifiers: &["identifier", "property_identifier", "type_identifier"],
    decorators: &["decorator"],
};

const GO: LangSpec = LangSpec {
    definitions: &["function_declaration", "method_declaration", "type_spec"],
    identifiers: &["identifier", "type_identifier", "field_identifier"],
    decorators: &[],
};

const JAVA: LangSpec = LangSpec {
    definitions: &[
        "class_declaration",
        "interface_declaration",
        "enum_declaration",
        "record_declaration",
        "method_declaration",
        "constructor_declaration",
    ],
    identifiers: &["identifier", "type_identifier"],
    decorators: &[],
};

/// Get tree-sitter language by name
fn get_language(name: &str) -> Option<Language> {
    match name {
        "python" => Some(tree_sitter_python::LANGUAGE.into()),
        "rust" => Some(tree_sitter_rust::LANGUAGE.into()),
        "javascript" => Some(tree_sitter_javascript::LANGUAGE.into()),
        "typescript" => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
        "tsx" => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
        "go" => Some(tree_sitter_go::LANGUAGE.into()),
        "java" => Some(tree_sitter_java::LANGUAGE.into()),
        _ => None,
    }
}

fn get_spec(name: &str) -> Option<&'static LangSpec> {
    match name {
        "python" => Some(&PYTHON),
        "rust" => Some(&RUST),
        "javascript" => Some(&JAVASCRIPT),
        "typescript" | "tsx" => Some(&TYPESCRIPT),
        "go" => Some(&GO),
        "java" => Some(&JAVA),
        _ => None,
    }
}

/// Map file extension to language name
pub fn extension_to_language(ext: &str) -> Option<&'static str> {
    match ext {
        "py" | "pyi" | "pyw" => Some("python"),
        "rs" => Some("rust"),
        "js" | "mjs" | "cjs" | "jsx" => Some("javascript"),
        "ts" | "mts" | "cts" => Some("typescript"),
        "tsx" => Some("tsx"),
        "go" => Some("go"),
        "java" => Some("java"),
        _ => None,
    }
}

/// Tree-sitter based parser for extracting tags from source code.
pub struct TreeSitterParser {
    /// Not thread-safe; callers keep one per thread
    parser: TsParser,
}

impl TreeSitterParser {
    pub fn new() -> Self {
        Self { parser: TsParser::new() }
    }

    /// Check if a language is supported.
    pub fn supports_language(lang: &str) -> bool {
        get_spec(lang).is_some()
    }

    fn parse(&mut self, content: &str, language: &str) -> Option<(Tree, &'static LangSpec)> {
        let spec = get_spec(language)?;
        let grammar = get_language(language)?;
        self.parser.set_language(&grammar).ok()?;
        let tree = self.parser.parse(content, None)?;
        Some((tree, spec))
    }

    /// Extract definition and reference tags.
    ///
    /// Returns `None` when the language is unsupported or the parser gave up,
    /// so the caller can fall back to the regex extractor.
    pub fn extract_tags(
        &mut self,
        content: &str,
        language: &str,
        fname: &str,
        rel_fname: &str,
    ) -> Option<Vec<Tag>> {
        let (tree, spec) = self.parse(content, language)?;
        let source = content.as_bytes();
        let fname: Arc<str> = Arc::from(fname);
        let rel: Arc<str> = Arc::from(rel_fname);

        let mut tags = Vec::new();
        // Name nodes already claimed by a definition
        let mut def_names: HashSet<usize> = HashSet::new();

        walk(tree.root_node(), |node| {
            if spec.definitions.contains(&node.kind()) {
                if let Some(name_node) = node.child_by_field_name("name") {
                    if let Ok(name) = name_node.utf8_text(source) {
                        if !name.is_empty() {
                            def_names.insert(name_node.id());
                            tags.push(Tag::new(
                                rel.clone(),
                                fname.clone(),
                                Some(name_node.start_position().row as u32),
                                name,
                                TagKind::Def,
                            ));
                        }
                    }
                }
            } else if node.child_count() == 0
                && spec.identifiers.contains(&node.kind())
                && !def_names.contains(&node.id())
            {
                if let Ok(name) = node.utf8_text(source) {
                    if !name.is_empty() {
                        tags.push(Tag::new(
                            rel.clone(),
                            fname.clone(),
                            Some(node.start_position().row as u32),
                            name,
                            TagKind::Ref,
                        ));
                    }
                }
            }
        });

        Some(tags)
    }

    /// Lines (0-indexed) where a declaration starts, including any decorators
    /// or attributes attached to it, and the line right after one ends.
    pub fn boundaries(&mut self, content: &str, language: &str) -> BTreeSet<usize> {
        let Some((tree, spec)) = self.parse(content, language) else {
            return BTreeSet::new();
        };

        let mut lines = BTreeSet::new();
        walk(tree.root_node(), |node| {
            if !spec.definitions.contains(&node.kind()) {
                return;
            }
            lines.insert(declaration_start(node, spec));
            lines.insert(node.end_position().row + 1);
        });
        lines
    }
}

impl Default for TreeSitterParser {
    fn default() -> Self {
        Self::new()
    }
}

/// First line of a declaration, pulled up over decorators and attributes.
fn declaration_start(node: Node<'_>, spec: &LangSpec) -> usize {
    let mut start = node.start_position().row;

    if let Some(parent) = node.parent() {
        if spec.decorators.contains(&parent.kind()) {
            start = start.min(parent.start_position().row);
        }
    }

    let mut prev = node.prev_named_sibling();
    while let Some(sibling) = prev {
        if !spec.decorators.contains(&sibling.kind()) {
            break;
        }
        start = start.min(sibling.start_position().row);
        prev = sibling.prev_named_sibling();
    }

    start
}

/// Pre-order traversal without recursion.
fn walk<'a>(root: Node<'a>, mut visit: impl FnMut(Node<'a>)) {
    let mut cursor = root.walk();
    loop {
        visit(cursor.node());
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return;
            }
        }
    }
}
