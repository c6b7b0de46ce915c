//! Dynamically loaded grammars.
//!
//! Grammars installed as shared libraries live under the cache directory,
//! one subdirectory per language, tracked by the manifest. Loading opens
//! the library through the OS linker, resolves the recorded C entry symbol
//! and constructs a `Language` from the pointer it returns. The `Library`
//! handle stays alive for the life of the loader so handed-out `Language`
//! values remain valid; `remove` only evicts caches and deletes files.

use crate::cancel::CancelToken;
use crate::error::{GrammarError, Result};
use crate::fetch::{self, FetchOptions};
use crate::manifest::{ManifestEntry, ManifestStore};
use crate::pack::Pack;
use crate::platform::Platform;
use crate::registry::default_registry;
use chrono::{SecondsFormat, Utc};
use libloading::Library;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tree_sitter::Language;
use tree_sitter_language::LanguageFn;

/// Version tag that opts out of staleness checks on either side.
pub const SNAPSHOT_VERSION: &str = "snapshot";

/// Default download URL template.
pub const DEFAULT_BASE_URL: &str =
    "https://github.com/jmylchreest/aide/releases/download/{version}/{asset}";

/// One installed grammar, for inventory listings.
#[derive(Debug, Clone, PartialEq)]
pub struct GrammarInfo {
    pub name: String,
    pub version: String,
    pub built_in: bool,
    /// Library path for dynamic grammars, empty for built-ins.
    pub path: PathBuf,
    pub installed_at: String,
}

struct DynState {
    loaded: HashMap<String, Language>,
    // Keeps libraries open; dropping a Library while a Language from it is
    // alive is undefined behaviour.
    libraries: HashMap<String, Library>,
}

/// Loader for downloaded grammar libraries.
pub struct DynamicLoader {
    dir: PathBuf,
    base_url: String,
    version: String,
    platform: Platform,
    fetch: FetchOptions,
    manifest: ManifestStore,
    state: RwLock<DynState>,
}

impl DynamicLoader {
    /// Open a loader over `dir`, reading the manifest if one exists.
    ///
    /// `base_url` empty keeps the default template; `version` empty means
    /// "unspecified" and downloads resolve to `snapshot`.
    pub fn new(dir: impl Into<PathBuf>, base_url: &str, version: &str) -> Result<Self> {
        let dir = dir.into();
        let manifest = ManifestStore::new(&dir);
        manifest.load()?;

        Ok(Self {
            dir,
            base_url: if base_url.is_empty() {
                DEFAULT_BASE_URL.to_string()
            } else {
                base_url.to_string()
            },
            version: version.to_string(),
            platform: Platform::current(),
            fetch: FetchOptions::default(),
            manifest,
            state: RwLock::new(DynState {
                loaded: HashMap::new(),
                libraries: HashMap::new(),
            }),
        })
    }

    /// Host version tag this loader pins installs to.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Cache root.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn manifest(&self) -> &ManifestStore {
        &self.manifest
    }

    /// Resolve an installed grammar to a live `Language`.
    ///
    /// Cache hits bypass the staleness check: a handle handed out earlier
    /// stays usable regardless of what the mirror published since.
    pub fn load(&self, name: &str) -> Result<Language> {
        if let Some(lang) = self.state.read().unwrap().loaded.get(name) {
            return Ok(lang.clone());
        }

        let mut state = self.state.write().unwrap();
        if let Some(lang) = state.loaded.get(name) {
            return Ok(lang.clone());
        }

        let entry = self
            .manifest
            .get(name)
            .ok_or_else(|| GrammarError::NotFound {
                name: name.to_string(),
            })?;

        if version_is_pinned(&self.version)
            && version_is_pinned(&entry.version)
            && self.version != entry.version
        {
            return Err(GrammarError::Stale {
                name: name.to_string(),
                installed: entry.version,
                want: self.version.clone(),
            });
        }

        let lib_path = self.manifest.entry_path(&entry);
        if !lib_path.exists() {
            return Err(GrammarError::io(
                "open grammar library",
                &lib_path,
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} is recorded in the manifest but missing on disk", name),
                ),
            ));
        }

        let (language, library) = open_language(name, &lib_path, &entry.c_symbol)?;

        let abi = language.abi_version();
        let (min, max) = (
            tree_sitter::MIN_COMPATIBLE_LANGUAGE_VERSION,
            tree_sitter::LANGUAGE_VERSION,
        );
        if abi < min || abi > max {
            return Err(GrammarError::IncompatibleAbi {
                name: name.to_string(),
                abi,
                min,
                max,
            });
        }

        state.libraries.insert(name.to_string(), library);
        state.loaded.insert(name.to_string(), language.clone());
        Ok(language)
    }

    /// Download and install `name`, replacing any previous copy.
    ///
    /// The language subdirectory is deleted up front whether or not a
    /// manifest entry exists, so orphaned files from an interrupted install
    /// are healed here. A crash after extraction but before the manifest
    /// write leaves the directory orphaned until the next download or
    /// remove. The archive's `pack.json`, if present, is loaded into the
    /// default pack registry immediately.
    pub fn download(&self, ctx: &CancelToken, name: &str, pack: &Pack) -> Result<()> {
        self.download_inner(ctx, name, pack)
            .map_err(|e| match e {
                e @ GrammarError::DownloadFailed { .. } => e,
                other => GrammarError::download(name, other),
            })
    }

    fn download_inner(&self, ctx: &CancelToken, name: &str, pack: &Pack) -> Result<()> {
        let version = self.effective_version();

        // Serialise concurrent installs; the whole download happens under
        // the write lock so a racing load never sees a half-written cache.
        let mut state = self.state.write().unwrap();
        state.loaded.remove(name);
        state.libraries.remove(name);

        let lang_dir = self.dir.join(name);
        if lang_dir.exists() {
            std::fs::remove_dir_all(&lang_dir)
                .map_err(|e| GrammarError::io("remove directory", &lang_dir, e))?;
        }

        log::info!("downloading grammar {} ({})", name, version);
        let (sha256, has_pack) = fetch::download_and_extract_pack(
            ctx,
            &self.base_url,
            name,
            &version,
            &self.dir,
            &self.platform,
            &self.fetch,
        )?;

        if has_pack {
            default_registry().load_from_dir(&lang_dir)?;
        }

        self.manifest.set(
            name,
            ManifestEntry {
                version: version.clone(),
                file: format!("{}/{}", name, self.platform.library_file()),
                sha256,
                c_symbol: pack.c_symbol.clone(),
                has_pack,
                installed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            },
        );
        self.manifest.set_aide_version(&version);
        self.manifest.save()?;
        log::info!("installed grammar {} ({})", name, version);
        Ok(())
    }

    /// Uninstall `name`: evict caches, delete its subdirectory, drop the
    /// manifest entry. Handles already handed out keep working; the
    /// underlying library is released at process exit.
    pub fn remove(&self, name: &str) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.loaded.remove(name);
        // Deliberately retains the Library: a Language cloned out earlier
        // may still be parsing.

        let lang_dir = self.dir.join(name);
        if lang_dir.exists() {
            std::fs::remove_dir_all(&lang_dir)
                .map_err(|e| GrammarError::io("remove directory", &lang_dir, e))?;
        }
        if self.manifest.remove(name).is_some() {
            self.manifest.save()?;
        }
        Ok(())
    }

    /// Inventory of installed dynamic grammars, sorted by name.
    pub fn installed(&self) -> Vec<GrammarInfo> {
        self.manifest
            .entries()
            .into_iter()
            .map(|(name, entry)| GrammarInfo {
                path: self.dir.join(&entry.file),
                name,
                version: entry.version,
                built_in: false,
                installed_at: entry.installed_at,
            })
            .collect()
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.manifest.get(name).is_some()
    }

    /// Drop manifest entries whose library file no longer exists on disk,
    /// and delete cache subdirectories no manifest entry points at.
    /// Returns the names whose entries were dropped.
    pub fn prune(&self) -> Result<Vec<String>> {
        let mut state = self.state.write().unwrap();
        let mut dropped = Vec::new();

        for (name, entry) in self.manifest.entries() {
            if !self.manifest.entry_path(&entry).exists() {
                state.loaded.remove(&name);
                self.manifest.remove(&name);
                dropped.push(name);
            }
        }

        // Orphaned directories: extraction finished but the manifest write
        // never happened.
        if let Ok(dir_entries) = std::fs::read_dir(&self.dir) {
            for dir_entry in dir_entries.flatten() {
                if !dir_entry.path().is_dir() {
                    continue;
                }
                let name = dir_entry.file_name().to_string_lossy().to_string();
                if self.manifest.get(&name).is_none() {
                    log::info!("pruning orphaned grammar directory {}", name);
                    std::fs::remove_dir_all(dir_entry.path())
                        .map_err(|e| GrammarError::io("remove directory", dir_entry.path(), e))?;
                }
            }
        }

        if !dropped.is_empty() {
            self.manifest.save()?;
        }
        Ok(dropped)
    }

    fn effective_version(&self) -> String {
        if self.version.is_empty() {
            SNAPSHOT_VERSION.to_string()
        } else {
            self.version.clone()
        }
    }
}

/// Open a shared library and construct a `Language` from its entry symbol.
///
/// Missing symbols and null constructor results surface as `LibraryOpen`
/// rather than aborting the process.
fn open_language(name: &str, path: &Path, symbol: &str) -> Result<(Language, Library)> {
    let open_err = |cause: String| GrammarError::LibraryOpen {
        name: name.to_string(),
        path: path.to_path_buf(),
        symbol: symbol.to_string(),
        cause,
    };

    let library = unsafe { Library::new(path) }.map_err(|e| open_err(e.to_string()))?;

    let thunk: unsafe extern "C" fn() -> *const () = unsafe {
        let sym: libloading::Symbol<unsafe extern "C" fn() -> *const ()> = library
            .get(symbol.as_bytes())
            .map_err(|e| open_err(e.to_string()))?;
        *sym
    };

    let ptr = unsafe { thunk() };
    if ptr.is_null() {
        return Err(open_err("grammar constructor returned null".to_string()));
    }

    let language = Language::new(unsafe { LanguageFn::from_raw(thunk) });
    Ok((language, library))
}

fn version_is_pinned(version: &str) -> bool {
    !version.is_empty() && version != SNAPSHOT_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(version: &str) -> ManifestEntry {
        ManifestEntry {
            version: version.to_string(),
            file: "ruby/grammar.so".to_string(),
            sha256: "cd".repeat(32),
            c_symbol: "tree_sitter_ruby".to_string(),
            has_pack: false,
            installed_at: String::new(),
        }
    }

    fn loader(dir: &Path, version: &str) -> DynamicLoader {
        DynamicLoader::new(dir, "", version).unwrap()
    }

    #[test]
    fn load_without_manifest_entry_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let dynamic = loader(dir.path(), "v0.1.0");
        assert!(matches!(
            dynamic.load("ruby"),
            Err(GrammarError::NotFound { .. })
        ));
    }

    #[test]
    fn version_mismatch_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let dynamic = loader(dir.path(), "v0.2.0");
        dynamic.manifest.set("ruby", entry("v0.1.0"));

        match dynamic.load("ruby") {
            Err(GrammarError::Stale {
                name,
                installed,
                want,
            }) => {
                assert_eq!(name, "ruby");
                assert_eq!(installed, "v0.1.0");
                assert_eq!(want, "v0.2.0");
            }
            other => panic!("expected Stale, got {:?}", other),
        }
    }

    #[test]
    fn snapshot_disables_staleness_both_ways() {
        let dir = tempfile::tempdir().unwrap();

        // Installed snapshot, loader pinned.
        let dynamic = loader(dir.path(), "v0.5.0");
        dynamic.manifest.set("ruby", entry(SNAPSHOT_VERSION));
        assert!(!matches!(
            dynamic.load("ruby"),
            Err(GrammarError::Stale { .. })
        ));

        // Installed pinned, loader snapshot.
        let dynamic = loader(dir.path(), SNAPSHOT_VERSION);
        dynamic.manifest.set("ruby", entry("v0.3.0"));
        assert!(!matches!(
            dynamic.load("ruby"),
            Err(GrammarError::Stale { .. })
        ));

        // Empty loader version also disables the check.
        let dynamic = loader(dir.path(), "");
        dynamic.manifest.set("ruby", entry("v0.3.0"));
        assert!(!matches!(
            dynamic.load("ruby"),
            Err(GrammarError::Stale { .. })
        ));
    }

    #[test]
    fn missing_library_file_is_descriptive() {
        let dir = tempfile::tempdir().unwrap();
        let dynamic = loader(dir.path(), "v0.1.0");
        dynamic.manifest.set("ruby", entry("v0.1.0"));

        match dynamic.load("ruby") {
            Err(GrammarError::Io { path, .. }) => {
                assert!(path.to_string_lossy().contains("ruby"));
            }
            other => panic!("expected Io, got {:?}", other),
        }
    }

    #[test]
    fn unopenable_library_is_library_open() {
        let dir = tempfile::tempdir().unwrap();
        let dynamic = loader(dir.path(), "v0.1.0");
        let mut e = entry("v0.1.0");
        e.file = format!("ruby/{}", Platform::current().library_file());
        dynamic.manifest.set("ruby", e);

        // A text file is not a loadable shared object.
        let lang_dir = dir.path().join("ruby");
        std::fs::create_dir_all(&lang_dir).unwrap();
        std::fs::write(
            lang_dir.join(Platform::current().library_file()),
            "not a library",
        )
        .unwrap();

        match dynamic.load("ruby") {
            Err(GrammarError::LibraryOpen { name, symbol, .. }) => {
                assert_eq!(name, "ruby");
                assert_eq!(symbol, "tree_sitter_ruby");
            }
            other => panic!("expected LibraryOpen, got {:?}", other),
        }
    }

    #[test]
    fn remove_is_idempotent_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let dynamic = loader(dir.path(), "v0.1.0");
        dynamic.manifest.set("ruby", entry("v0.1.0"));
        std::fs::create_dir_all(dir.path().join("ruby")).unwrap();

        dynamic.remove("ruby").unwrap();
        assert!(!dir.path().join("ruby").exists());
        assert!(dynamic.manifest.get("ruby").is_none());

        // Second remove is a no-op.
        dynamic.remove("ruby").unwrap();
    }

    #[test]
    fn installed_reflects_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let dynamic = loader(dir.path(), "v0.1.0");
        dynamic.manifest.set("ruby", entry("v0.1.0"));

        let infos = dynamic.installed();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].name, "ruby");
        assert!(!infos[0].built_in);
        assert!(infos[0].path.ends_with("ruby/grammar.so"));
        assert!(dynamic.is_installed("ruby"));
        assert!(!dynamic.is_installed("lua"));
    }

    #[test]
    fn prune_drops_dangling_entries_and_orphan_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let dynamic = loader(dir.path(), "v0.1.0");

        // Dangling entry: in the manifest, no file on disk.
        dynamic.manifest.set("ruby", entry("v0.1.0"));
        // Healthy entry: file exists where the manifest says.
        let mut lua = entry("v0.1.0");
        lua.file = "lua/grammar.so".to_string();
        dynamic.manifest.set("lua", lua);
        std::fs::create_dir_all(dir.path().join("lua")).unwrap();
        std::fs::write(dir.path().join("lua/grammar.so"), "lib").unwrap();
        // Orphaned directory: on disk, not in the manifest.
        std::fs::create_dir_all(dir.path().join("zig")).unwrap();
        std::fs::write(dir.path().join("zig/grammar.so"), "lib").unwrap();

        let dropped = dynamic.prune().unwrap();
        assert_eq!(dropped, vec!["ruby".to_string()]);
        assert!(dynamic.is_installed("lua"));
        assert!(!dynamic.is_installed("ruby"));
        assert!(!dir.path().join("zig").exists());
        assert!(dir.path().join("lua/grammar.so").exists());
    }

    #[test]
    fn version_pinning_rules() {
        assert!(version_is_pinned("v0.1.0"));
        assert!(!version_is_pinned(""));
        assert!(!version_is_pinned(SNAPSHOT_VERSION));
    }
}
