//! Per-language pack metadata.
//!
//! A pack describes one language: how to detect its files, which C entry
//! symbol its grammar exports, and the query/analysis configuration the
//! substrate runs against parsed trees. Packs ship embedded in the binary
//! and can be overridden by a `pack.json` on disk; a downloaded grammar
//! archive may carry its own.

use crate::error::{GrammarError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current pack schema. Bump when the JSON layout changes incompatibly.
pub const PACK_SCHEMA_VERSION: u32 = 1;

/// File name a pack is stored under, both on disk and inside archives.
pub const PACK_FILE: &str = "pack.json";

/// Embedded pack descriptors bundled at build time.
pub(crate) const EMBEDDED_PACKS: &[&str] = &[
    include_str!("../packs/bash.json"),
    include_str!("../packs/c.json"),
    include_str!("../packs/cpp.json"),
    include_str!("../packs/csharp.json"),
    include_str!("../packs/css.json"),
    include_str!("../packs/dockerfile.json"),
    include_str!("../packs/go.json"),
    include_str!("../packs/hcl.json"),
    include_str!("../packs/html.json"),
    include_str!("../packs/java.json"),
    include_str!("../packs/javascript.json"),
    include_str!("../packs/json.json"),
    include_str!("../packs/lua.json"),
    include_str!("../packs/markdown.json"),
    include_str!("../packs/php.json"),
    include_str!("../packs/python.json"),
    include_str!("../packs/ruby.json"),
    include_str!("../packs/rust.json"),
    include_str!("../packs/text.json"),
    include_str!("../packs/toml.json"),
    include_str!("../packs/typescript.json"),
    include_str!("../packs/yaml.json"),
];

/// One language's metadata record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pack {
    pub schema_version: u32,
    /// Canonical language name, lower case.
    pub name: String,
    /// Zero-argument C entry function the shared library exports. Empty for
    /// meta-only packs that carry detection tables but no grammar.
    #[serde(default)]
    pub c_symbol: String,
    /// Informational origin of the grammar sources.
    #[serde(default)]
    pub source_repo: String,
    #[serde(default)]
    pub meta: PackMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queries: Option<Queries>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<Complexity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imports: Option<Imports>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenisation: Option<Tokenisation>,
}

/// File-detection tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackMeta {
    /// Lower-case, dot-prefixed extensions (`.go`).
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Exact file names (`Dockerfile`).
    #[serde(default)]
    pub filenames: Vec<String>,
    /// Interpreter basenames matched against `#!` lines (`python3`).
    #[serde(default)]
    pub shebangs: Vec<String>,
    /// Alternative names resolving to this pack (`py`).
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Tree-sitter query strings for symbol and reference extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Queries {
    /// Definitions: captures named `@definition.<kind>` with a `@name` child.
    #[serde(default)]
    pub tags: String,
    /// References: captures named `@reference.<kind>` with a `@name` child.
    #[serde(default)]
    pub refs: String,
}

/// Cyclomatic-complexity configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Complexity {
    /// Node kinds that open a countable function body.
    #[serde(default)]
    pub func_node_types: Vec<String>,
    /// Decision-point node kinds counted inside a function.
    #[serde(default)]
    pub branch_types: Vec<String>,
    /// Field name holding the function's identifier node.
    #[serde(default)]
    pub name_field: String,
}

/// Import-scanning configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Imports {
    #[serde(default)]
    pub patterns: Vec<ImportPattern>,
    /// Line opening a grouped import block, if the language has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_start: Option<String>,
    /// Line closing a grouped import block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_end: Option<String>,
}

/// One import-matching regex.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportPattern {
    pub regex: String,
    /// Capture group holding the imported path.
    pub group: usize,
    /// Where the pattern applies: `block` restricts it to grouped import
    /// blocks, anything else (or absent) matches any line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Node-kind classes used for tokenisation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tokenisation {
    #[serde(default)]
    pub identifier_types: Vec<String>,
    #[serde(default)]
    pub literal_types: Vec<String>,
    #[serde(default)]
    pub keyword_types: Vec<String>,
}

impl Pack {
    /// Parse a pack from JSON text.
    pub fn from_json(text: &str) -> serde_json::Result<Pack> {
        serde_json::from_str(text)
    }

    /// Read and parse `<path>` as a pack file.
    pub fn load(path: &Path) -> Result<Pack> {
        let text =
            std::fs::read_to_string(path).map_err(|e| GrammarError::io("read", path, e))?;
        Pack::from_json(&text).map_err(|e| GrammarError::PackParse {
            path: path.to_path_buf(),
            cause: e,
        })
    }

    /// Whether this pack describes a loadable grammar (meta-only packs
    /// carry detection tables but no C entry symbol).
    pub fn has_grammar(&self) -> bool {
        !self.c_symbol.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_packs_parse() {
        for src in EMBEDDED_PACKS {
            let pack = Pack::from_json(src).expect("embedded pack must parse");
            assert_eq!(pack.schema_version, PACK_SCHEMA_VERSION);
            assert!(!pack.name.is_empty());
            assert_eq!(pack.name, pack.name.to_lowercase());
        }
    }

    #[test]
    fn every_pack_has_a_detection_signal() {
        for src in EMBEDDED_PACKS {
            let pack = Pack::from_json(src).unwrap();
            if pack.has_grammar() {
                let signals = pack.meta.extensions.len()
                    + pack.meta.filenames.len()
                    + pack.meta.shebangs.len();
                assert!(signals > 0, "pack {} has no detection signal", pack.name);
            } else {
                assert!(
                    !pack.meta.filenames.is_empty() || !pack.meta.extensions.is_empty(),
                    "meta-only pack {} is undetectable",
                    pack.name
                );
            }
        }
    }

    #[test]
    fn extensions_are_normalised() {
        for src in EMBEDDED_PACKS {
            let pack = Pack::from_json(src).unwrap();
            for ext in &pack.meta.extensions {
                assert!(ext.starts_with('.'), "{}: extension {}", pack.name, ext);
                assert_eq!(ext, &ext.to_lowercase(), "{}: extension {}", pack.name, ext);
            }
        }
    }

    #[test]
    fn minimal_pack_parses_with_defaults() {
        let pack = Pack::from_json(r#"{"schema_version": 1, "name": "x"}"#).unwrap();
        assert_eq!(pack.name, "x");
        assert!(pack.c_symbol.is_empty());
        assert!(!pack.has_grammar());
        assert!(pack.queries.is_none());
    }

    #[test]
    fn malformed_pack_is_a_parse_error() {
        assert!(Pack::from_json("{not json").is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PACK_FILE);
        std::fs::write(&path, "{broken").unwrap();
        match Pack::load(&path) {
            Err(GrammarError::PackParse { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected PackParse, got {:?}", other),
        }
    }
}
