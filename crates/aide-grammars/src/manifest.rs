//! Manifest of installed dynamic grammars.
//!
//! One JSON file under the grammar cache directory records every grammar
//! the dynamic loader has installed: which host version installed it, the
//! archive checksum, the C entry symbol, and whether the archive carried a
//! `pack.json`. The store is the single source of truth for what exists in
//! the cache; the file is always rewritten whole via a temp-and-rename.

use crate::error::{GrammarError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Manifest file name under the cache root.
pub const MANIFEST_FILE: &str = "manifest.json";

/// On-disk manifest document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Host release that last mutated the manifest.
    #[serde(default)]
    pub aide_version: String,
    /// Tree-sitter ABI version the host runtime speaks.
    #[serde(default)]
    pub abi_version: u32,
    #[serde(default)]
    pub grammars: BTreeMap<String, ManifestEntry>,
}

/// One installed dynamic grammar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Release tag that installed it, or `snapshot`.
    pub version: String,
    /// Library path relative to the cache root (`ruby/grammar.so`).
    pub file: String,
    /// Hex SHA-256 of the downloaded archive.
    pub sha256: String,
    pub c_symbol: String,
    #[serde(default)]
    pub has_pack: bool,
    /// RFC 3339 install timestamp.
    #[serde(default)]
    pub installed_at: String,
}

/// Thread-safe manifest store bound to one cache directory.
pub struct ManifestStore {
    dir: PathBuf,
    state: RwLock<Manifest>,
}

impl ManifestStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            state: RwLock::new(Manifest::default()),
        }
    }

    /// Path of the manifest file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    /// Read the manifest from disk, replacing in-memory state. A missing
    /// file is an empty manifest, not an error.
    pub fn load(&self) -> Result<()> {
        let path = self.path();
        let mut state = self.state.write().unwrap();
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                *state = Manifest::default();
                return Ok(());
            }
            Err(e) => return Err(GrammarError::io("read", path, e)),
        };
        *state =
            serde_json::from_str(&text).map_err(|e| GrammarError::PackParse { path, cause: e })?;
        Ok(())
    }

    /// Write the manifest whole: pretty JSON to a sibling `.tmp`, then
    /// rename over the real file. Creates the cache directory if missing.
    pub fn save(&self) -> Result<()> {
        let state = self.state.write().unwrap();
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| GrammarError::io("create directory", &self.dir, e))?;

        let path = self.path();
        let tmp = path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(&*state).expect("manifest serialises");
        std::fs::write(&tmp, text).map_err(|e| GrammarError::io("write", &tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| GrammarError::io("rename", &tmp, e))?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<ManifestEntry> {
        self.state.read().unwrap().grammars.get(name).cloned()
    }

    pub fn set(&self, name: &str, entry: ManifestEntry) {
        self.state
            .write()
            .unwrap()
            .grammars
            .insert(name.to_string(), entry);
    }

    pub fn remove(&self, name: &str) -> Option<ManifestEntry> {
        self.state.write().unwrap().grammars.remove(name)
    }

    /// Defensive copy of all entries, sorted by name.
    pub fn entries(&self) -> BTreeMap<String, ManifestEntry> {
        self.state.read().unwrap().grammars.clone()
    }

    pub fn aide_version(&self) -> String {
        self.state.read().unwrap().aide_version.clone()
    }

    pub fn set_aide_version(&self, version: &str) {
        let mut state = self.state.write().unwrap();
        state.aide_version = version.to_string();
        state.abi_version = tree_sitter::LANGUAGE_VERSION as u32;
    }

    /// Absolute path a manifest entry's library should exist at.
    pub fn entry_path(&self, entry: &ManifestEntry) -> PathBuf {
        self.dir.join(&entry.file)
    }

    /// Cache root this store writes under.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
