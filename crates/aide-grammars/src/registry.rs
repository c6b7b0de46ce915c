//! Pack registry with alias, extension, filename, and shebang lookups.

use crate::builtin;
use crate::error::Result;
use crate::pack::{EMBEDDED_PACKS, PACK_FILE, Pack};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{OnceLock, RwLock};

/// Process-wide catalogue of language packs.
///
/// Embedded packs are loaded on first use; packs read from disk (or shipped
/// inside a grammar archive) replace embedded ones wholesale. Derived
/// reverse tables are rebuilt together with the pack map under one write
/// lock, so readers never observe a half-updated entry.
pub struct PackRegistry {
    inner: RwLock<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    packs: HashMap<String, Pack>,
    extensions: HashMap<String, String>,
    filenames: HashMap<String, String>,
    shebangs: HashMap<String, String>,
    aliases: HashMap<String, String>,
}

impl RegistryState {
    fn insert(&mut self, pack: Pack) {
        let name = pack.name.clone();

        // Replacing a pack rebuilds its reverse entries from scratch.
        self.extensions.retain(|_, v| *v != name);
        self.filenames.retain(|_, v| *v != name);
        self.shebangs.retain(|_, v| *v != name);
        self.aliases.retain(|_, v| *v != name);

        for ext in &pack.meta.extensions {
            self.extensions.insert(normalise_ext(ext), name.clone());
        }
        for file in &pack.meta.filenames {
            self.filenames.insert(file.clone(), name.clone());
        }
        for interp in &pack.meta.shebangs {
            self.shebangs.insert(interp.clone(), name.clone());
        }
        for alias in &pack.meta.aliases {
            if *alias != name {
                self.aliases.insert(alias.clone(), name.clone());
            }
        }
        self.packs.insert(name, pack);
    }
}

impl PackRegistry {
    /// An empty registry with no packs.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryState::default()),
        }
    }

    /// A registry seeded with the embedded pack descriptors.
    ///
    /// Malformed embedded data yields an empty registry rather than a
    /// panic; lookups then simply miss.
    pub fn with_embedded() -> Self {
        let registry = Self::new();
        for src in EMBEDDED_PACKS {
            match Pack::from_json(src) {
                Ok(pack) => registry.insert(pack),
                Err(e) => {
                    log::error!("embedded pack descriptor is malformed: {}", e);
                    return Self::new();
                }
            }
        }
        registry
    }

    /// Add or replace a pack. Later insertions win, so user and downloaded
    /// packs override embedded ones.
    pub fn insert(&self, pack: Pack) {
        self.inner.write().unwrap().insert(pack);
    }

    pub fn get(&self, name: &str) -> Option<Pack> {
        self.inner.read().unwrap().packs.get(name).cloned()
    }

    /// Resolve an alias (`py`, `c++`) to its pack.
    pub fn by_alias(&self, alias: &str) -> Option<Pack> {
        let state = self.inner.read().unwrap();
        let name = state.aliases.get(alias)?;
        state.packs.get(name).cloned()
    }

    /// Language owning a file extension. Accepts `.go` or `go`.
    pub fn lang_for_extension(&self, ext: &str) -> Option<String> {
        self.inner
            .read()
            .unwrap()
            .extensions
            .get(&normalise_ext(ext))
            .cloned()
    }

    /// Language owning an exact file name (`Dockerfile`).
    pub fn lang_for_filename(&self, file: &str) -> Option<String> {
        self.inner.read().unwrap().filenames.get(file).cloned()
    }

    /// Language owning a shebang interpreter basename (`python3`).
    pub fn lang_for_shebang(&self, interpreter: &str) -> Option<String> {
        self.inner
            .read()
            .unwrap()
            .shebangs
            .get(interpreter)
            .cloned()
    }

    /// Canonicalise a user-supplied language name.
    ///
    /// Trims and lower-cases, then resolves aliases. Unknown names pass
    /// through unchanged (after trimming and lower-casing) so callers get a
    /// consistent `NotFound` downstream instead of a second lookup scheme.
    pub fn normalise(&self, s: &str) -> String {
        let name = s.trim().to_lowercase();
        let state = self.inner.read().unwrap();
        if state.packs.contains_key(&name) {
            return name;
        }
        if let Some(canonical) = state.aliases.get(&name) {
            return canonical.clone();
        }
        name
    }

    /// Load `<dir>/pack.json`, replacing any pack with the same name.
    pub fn load_from_dir(&self, dir: &Path) -> Result<Pack> {
        let pack = Pack::load(&dir.join(PACK_FILE))?;
        self.insert(pack.clone());
        Ok(pack)
    }

    /// All canonical names, sorted.
    pub fn all(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().unwrap().packs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of every pack.
    pub fn languages(&self) -> HashMap<String, Pack> {
        self.inner.read().unwrap().packs.clone()
    }

    /// Packs that describe a downloadable grammar: non-empty `c_symbol`
    /// and not already compiled into the binary.
    pub fn dynamic_packs(&self) -> HashMap<String, Pack> {
        let state = self.inner.read().unwrap();
        state
            .packs
            .iter()
            .filter(|(name, pack)| pack.has_grammar() && !builtin::is_builtin(name))
            .map(|(name, pack)| (name.clone(), pack.clone()))
            .collect()
    }
}

impl Default for PackRegistry {
    fn default() -> Self {
        Self::with_embedded()
    }
}

fn normalise_ext(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}

static DEFAULT: OnceLock<PackRegistry> = OnceLock::new();

/// The process-wide registry, initialised with the embedded packs on first
/// use. Downloaded `pack.json` files are loaded into this instance so their
/// metadata takes effect for every component immediately.
pub fn default_registry() -> &'static PackRegistry {
    DEFAULT.get_or_init(PackRegistry::with_embedded)
}
