//! Pack-driven source analysis.
//!
//! Everything here consumes only pack metadata: tags/refs queries produce
//! symbol and reference records for the store boundary, the complexity
//! tables drive decision-point counting, and the import patterns run as
//! plain regexes over source lines. Packs without the relevant section
//! yield empty results.

use crate::error::{GrammarError, Result};
use crate::pack::Pack;
use crate::registry::default_registry;
use aide_index::{FileInfo, Reference, StoreError, Symbol, SymbolStore};
use regex::Regex;
use streaming_iterator::StreamingIterator;
use tree_sitter::{Language, Node, Parser, Query, QueryCursor, Tree};

/// Symbols and references extracted from one file.
#[derive(Debug, Default, Clone)]
pub struct FileAnalysis {
    pub symbols: Vec<Symbol>,
    pub references: Vec<Reference>,
}

/// Complexity of one function body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionComplexity {
    pub name: String,
    pub start_line: usize,
    pub end_line: usize,
    /// Decision points + 1.
    pub complexity: usize,
}

/// One import found by a pack's patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRecord {
    pub path: String,
    /// 1-based source line.
    pub line: usize,
    pub context: Option<String>,
}

/// Token class, per the pack's tokenisation tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    Literal,
    Keyword,
}

/// One classified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// 1-based source line.
    pub line: usize,
}

/// Parse `source` with a loaded grammar.
pub fn parse_source(lang_name: &str, language: &Language, source: &str) -> Result<Tree> {
    let mut parser = Parser::new();
    parser
        .set_language(language)
        .map_err(|e| analysis_err(lang_name, format!("grammar rejected by parser: {}", e)))?;
    parser
        .parse(source, None)
        .ok_or_else(|| analysis_err(lang_name, "parse produced no tree".to_string()))
}

/// Run the pack's tags and refs queries over a file.
///
/// Definitions are captures named `definition.<kind>` paired with a `name`
/// capture; references are `reference.<kind>` pairs. A pack without
/// queries produces an empty analysis.
pub fn extract_symbols(
    lang_name: &str,
    language: &Language,
    path: &str,
    source: &str,
) -> Result<FileAnalysis> {
    let Some(queries) = default_registry().get(lang_name).and_then(|p| p.queries) else {
        return Ok(FileAnalysis::default());
    };

    let tree = parse_source(lang_name, language, source)?;
    let mut analysis = FileAnalysis::default();

    if !queries.tags.is_empty() {
        for (kind, name_node, def_node) in
            run_capture_query(lang_name, language, &queries.tags, "definition.", &tree, source)?
        {
            let name = node_text(&name_node, source);
            let line = name_node.start_position().row as u32 + 1;
            analysis.symbols.push(Symbol {
                id: format!("{}:{}:{}", path, line, name),
                name,
                kind,
                lang: lang_name.to_string(),
                path: path.to_string(),
                line,
                end_line: def_node.end_position().row as u32 + 1,
                signature: signature_of(&def_node, source),
                parent: None,
            });
        }
    }

    if !queries.refs.is_empty() {
        for (kind, name_node, _) in
            run_capture_query(lang_name, language, &queries.refs, "reference.", &tree, source)?
        {
            analysis.references.push(Reference {
                name: node_text(&name_node, source),
                path: path.to_string(),
                line: name_node.start_position().row as u32 + 1,
                context: kind,
            });
        }
    }

    Ok(analysis)
}

/// Replace a file's records in the store: clear, re-add, update file info.
/// Per-file atomicity of the replacement is the store's promise.
pub fn index_file(
    store: &mut dyn SymbolStore,
    mut info: FileInfo,
    analysis: &FileAnalysis,
) -> std::result::Result<(), StoreError> {
    store.clear_file_references(&info.path)?;
    for symbol in &analysis.symbols {
        store.add_symbol(symbol.clone())?;
    }
    for reference in &analysis.references {
        store.add_reference(reference.clone())?;
    }
    info.symbol_count = analysis.symbols.len() as u32;
    store.set_file_info(info)
}

/// McCabe complexity for every function body the pack can name.
pub fn cyclomatic_complexity(pack: &Pack, tree: &Tree, source: &str) -> Vec<FunctionComplexity> {
    let Some(config) = &pack.complexity else {
        return Vec::new();
    };
    if config.func_node_types.is_empty() {
        return Vec::new();
    }

    let mut functions = Vec::new();
    visit(tree.root_node(), &mut |node| {
        if !config.func_node_types.iter().any(|k| k == node.kind()) {
            return;
        }
        let mut branches = 0usize;
        visit(node, &mut |inner| {
            if inner.id() != node.id() && config.branch_types.iter().any(|k| k == inner.kind()) {
                branches += 1;
            }
        });
        let name = node
            .child_by_field_name(config.name_field.as_str())
            .map(|n| node_text(&n, source))
            .unwrap_or_default();
        functions.push(FunctionComplexity {
            name,
            start_line: node.start_position().row + 1,
            end_line: node.end_position().row + 1,
            complexity: branches + 1,
        });
    });
    functions
}

/// Apply the pack's import patterns line by line.
///
/// Patterns with context `block` only match between the pack's
/// `block_start` and `block_end` lines; all others match anywhere.
pub fn scan_imports(pack: &Pack, source: &str) -> Vec<ImportRecord> {
    let Some(config) = &pack.imports else {
        return Vec::new();
    };

    let compile = |pattern: &str| match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            log::warn!("pack {}: invalid import regex {}: {}", pack.name, pattern, e);
            None
        }
    };
    let block_start = config.block_start.as_deref().and_then(compile);
    let block_end = config.block_end.as_deref().and_then(compile);
    let patterns: Vec<_> = config
        .patterns
        .iter()
        .filter_map(|p| compile(&p.regex).map(|re| (re, p)))
        .collect();

    let mut records = Vec::new();
    let mut in_block = false;

    for (idx, line) in source.lines().enumerate() {
        if in_block {
            if block_end.as_ref().is_some_and(|re| re.is_match(line)) {
                in_block = false;
                continue;
            }
        } else if block_start.as_ref().is_some_and(|re| re.is_match(line)) {
            in_block = true;
        }

        for (re, pattern) in &patterns {
            let block_only = pattern.context.as_deref() == Some("block");
            if block_only && !in_block {
                continue;
            }
            let Some(captures) = re.captures(line) else {
                continue;
            };
            let Some(group) = captures.get(pattern.group) else {
                continue;
            };
            records.push(ImportRecord {
                path: group.as_str().to_string(),
                line: idx + 1,
                context: pattern.context.clone(),
            });
            break;
        }
    }

    records
}

/// Classify leaf nodes against the pack's tokenisation tables.
///
/// Walks the tree in document order and emits a token for every node whose
/// kind appears in one of the identifier/literal/keyword lists. Packs
/// without a tokenisation section yield nothing.
pub fn tokenise(pack: &Pack, tree: &Tree, source: &str) -> Vec<Token> {
    let Some(config) = &pack.tokenisation else {
        return Vec::new();
    };

    let mut tokens = Vec::new();
    visit(tree.root_node(), &mut |node| {
        let kind = if config.identifier_types.iter().any(|k| k == node.kind()) {
            TokenKind::Identifier
        } else if config.literal_types.iter().any(|k| k == node.kind()) {
            TokenKind::Literal
        } else if config.keyword_types.iter().any(|k| k == node.kind()) {
            TokenKind::Keyword
        } else {
            return;
        };
        tokens.push(Token {
            kind,
            text: node_text(&node, source),
            line: node.start_position().row + 1,
        });
    });
    tokens
}

/// Run a query, yielding `(kind, name_node, tagged_node)` per match.
fn run_capture_query<'t>(
    lang_name: &str,
    language: &Language,
    query_src: &str,
    tag_prefix: &str,
    tree: &'t Tree,
    source: &str,
) -> Result<Vec<(String, Node<'t>, Node<'t>)>> {
    let query = Query::new(language, query_src)
        .map_err(|e| analysis_err(lang_name, format!("bad query: {}", e)))?;
    let capture_names = query.capture_names();

    let mut out = Vec::new();
    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(&query, tree.root_node(), source.as_bytes());
    while let Some(m) = matches.next() {
        let mut name_node = None;
        let mut tagged: Option<(String, Node)> = None;
        for capture in m.captures {
            let capture_name = capture_names[capture.index as usize];
            if capture_name == "name" {
                name_node = Some(capture.node);
            } else if let Some(kind) = capture_name.strip_prefix(tag_prefix) {
                tagged = Some((kind.to_string(), capture.node));
            }
        }
        if let (Some(name_node), Some((kind, tagged_node))) = (name_node, tagged) {
            out.push((kind, name_node, tagged_node));
        }
    }
    Ok(out)
}

fn visit<'t>(node: Node<'t>, f: &mut impl FnMut(Node<'t>)) {
    f(node);
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        visit(child, f);
    }
}

fn node_text(node: &Node, source: &str) -> String {
    node.utf8_text(source.as_bytes()).unwrap_or("").to_string()
}

/// First line of a definition, as a display signature.
fn signature_of(node: &Node, source: &str) -> String {
    let text = node.utf8_text(source.as_bytes()).unwrap_or("");
    text.lines().next().unwrap_or("").trim().to_string()
}

fn analysis_err(lang_name: &str, cause: String) -> GrammarError {
    GrammarError::Analysis {
        lang: lang_name.to_string(),
        cause,
    }
}
