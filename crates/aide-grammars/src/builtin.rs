//! Grammars statically linked into the binary.
//!
//! Each enabled `lang-*` feature wires a canonical name to the grammar
//! crate's entry thunk. Loading goes through the same null-pointer check as
//! dynamic grammars; the constructed `Language` is cached for the process
//! lifetime.

use crate::error::{GrammarError, Result};
use std::collections::HashMap;
use std::sync::RwLock;
use tree_sitter::Language;
use tree_sitter_language::LanguageFn;

/// Zero-argument C constructor returning the grammar's ABI pointer.
type GrammarThunk = unsafe extern "C" fn() -> *const ();

/// Names of the grammars compiled into this build.
pub fn builtin_names() -> &'static [&'static str] {
    &[
        #[cfg(feature = "lang-bash")]
        "bash",
        #[cfg(feature = "lang-go")]
        "go",
        #[cfg(feature = "lang-javascript")]
        "javascript",
        #[cfg(feature = "lang-json")]
        "json",
        #[cfg(feature = "lang-python")]
        "python",
    ]
}

/// Whether `name` is compiled into this build.
pub fn is_builtin(name: &str) -> bool {
    builtin_names().contains(&name)
}

/// Directory of statically linked grammars.
pub struct BuiltinRegistry {
    thunks: HashMap<&'static str, GrammarThunk>,
    loaded: RwLock<HashMap<&'static str, Language>>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        let mut thunks: HashMap<&'static str, GrammarThunk> = HashMap::new();

        #[cfg(feature = "lang-bash")]
        thunks.insert("bash", tree_sitter_bash::LANGUAGE.into_raw());
        #[cfg(feature = "lang-go")]
        thunks.insert("go", tree_sitter_go::LANGUAGE.into_raw());
        #[cfg(feature = "lang-javascript")]
        thunks.insert("javascript", tree_sitter_javascript::LANGUAGE.into_raw());
        #[cfg(feature = "lang-json")]
        thunks.insert("json", tree_sitter_json::LANGUAGE.into_raw());
        #[cfg(feature = "lang-python")]
        thunks.insert("python", tree_sitter_python::LANGUAGE.into_raw());

        Self {
            thunks,
            loaded: RwLock::new(HashMap::new()),
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.thunks.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.thunks.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Construct (or return the cached) `Language` for a built-in grammar.
    pub fn load(&self, name: &str) -> Result<Language> {
        if let Some(lang) = self.loaded.read().unwrap().get(name) {
            return Ok(lang.clone());
        }

        let mut loaded = self.loaded.write().unwrap();
        // Double-checked: another thread may have built it while we waited.
        if let Some(lang) = loaded.get(name) {
            return Ok(lang.clone());
        }

        let (&key, &thunk) = self
            .thunks
            .get_key_value(name)
            .ok_or_else(|| GrammarError::NotFound {
                name: name.to_string(),
            })?;

        // A thunk handing back null cannot produce a usable handle; treat
        // the grammar as absent rather than constructing a broken Language.
        let ptr = unsafe { thunk() };
        if ptr.is_null() {
            return Err(GrammarError::NotFound {
                name: name.to_string(),
            });
        }

        let language = Language::new(unsafe { LanguageFn::from_raw(thunk) });
        loaded.insert(key, language.clone());
        Ok(language)
    }
}

impl Default for BuiltinRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_match_enabled_features() {
        let reg = BuiltinRegistry::new();
        assert_eq!(reg.names(), builtin_names());
        for name in builtin_names() {
            assert!(reg.has(name));
            assert!(is_builtin(name));
        }
        assert!(!is_builtin("ruby"));
    }

    #[test]
    fn unknown_name_is_not_found() {
        let reg = BuiltinRegistry::new();
        match reg.load("klingon") {
            Err(GrammarError::NotFound { name }) => assert_eq!(name, "klingon"),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[cfg(feature = "lang-go")]
    #[test]
    fn load_is_idempotent() {
        let reg = BuiltinRegistry::new();
        let first = reg.load("go").unwrap();
        let second = reg.load("go").unwrap();
        assert_eq!(first.abi_version(), second.abi_version());
        assert!(first.node_kind_count() > 0);
    }
}
