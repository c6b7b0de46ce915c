//! Composite grammar loader.
//!
//! The public entry point for resolving a language name to a parser
//! `Language`: built-in grammars first, then the dynamic cache, then an
//! automatic download when the grammar is missing or stale.

use crate::builtin::BuiltinRegistry;
use crate::cancel::CancelToken;
use crate::dynamic::{DynamicLoader, GrammarInfo};
use crate::error::{GrammarError, Result};
use crate::manifest::ManifestEntry;
use crate::registry::default_registry;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tree_sitter::Language;

/// Directory grammars are cached under, relative to the workspace root.
pub const DEFAULT_CACHE_SUBDIR: &str = ".aide/grammars";

/// Construction options for [`GrammarLoader`].
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// Cache root; `None` resolves to `<workspace>/.aide/grammars`.
    pub grammar_dir: Option<PathBuf>,
    /// Download URL template; empty keeps the default.
    pub base_url: String,
    /// Host release tag; empty means unspecified (`snapshot` downloads,
    /// staleness checks disabled).
    pub version: String,
    /// Download missing or stale grammars on demand. On by default.
    pub auto_download: bool,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            grammar_dir: None,
            base_url: String::new(),
            version: String::new(),
            auto_download: true,
        }
    }
}

impl LoaderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for a workspace, honouring the `GRAMMAR_*` environment
    /// variables (`GRAMMAR_CACHE_DIR`, `GRAMMAR_BASE_URL`,
    /// `GRAMMAR_VERSION`, `GRAMMAR_AUTO_DOWNLOAD=0`).
    pub fn from_env(workspace_root: &Path) -> Self {
        let grammar_dir = std::env::var("GRAMMAR_CACHE_DIR")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| workspace_root.join(DEFAULT_CACHE_SUBDIR));

        Self {
            grammar_dir: Some(grammar_dir),
            base_url: std::env::var("GRAMMAR_BASE_URL").unwrap_or_default(),
            version: std::env::var("GRAMMAR_VERSION").unwrap_or_default(),
            auto_download: std::env::var("GRAMMAR_AUTO_DOWNLOAD")
                .map(|v| v != "0")
                .unwrap_or(true),
        }
    }
}

/// Public facade over the built-in and dynamic grammar registries.
pub struct GrammarLoader {
    builtin: BuiltinRegistry,
    dynamic: DynamicLoader,
    auto_download: bool,
    cache: RwLock<HashMap<String, Language>>,
}

impl GrammarLoader {
    /// Loader rooted at a workspace, configured from the environment.
    pub fn new(workspace_root: &Path) -> Result<Self> {
        Self::with_options(LoaderOptions::from_env(workspace_root))
    }

    pub fn with_options(options: LoaderOptions) -> Result<Self> {
        let dir = options
            .grammar_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_SUBDIR));
        Ok(Self {
            builtin: BuiltinRegistry::new(),
            dynamic: DynamicLoader::new(dir, &options.base_url, &options.version)?,
            auto_download: options.auto_download,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Resolve `name` (canonical or alias) to a live `Language`.
    ///
    /// Tries the in-process cache, then built-ins, then installed dynamic
    /// grammars. With auto-download enabled a missing or stale grammar is
    /// installed and loading retried once; the retry's error propagates
    /// as-is, so a library that fails to open is never reported as
    /// `NotFound`.
    pub fn load(&self, ctx: &CancelToken, name: &str) -> Result<Language> {
        let name = default_registry().normalise(name);

        if let Some(lang) = self.cache.read().unwrap().get(&name) {
            return Ok(lang.clone());
        }

        if self.builtin.has(&name) {
            let lang = self.builtin.load(&name)?;
            self.cache.write().unwrap().insert(name, lang.clone());
            return Ok(lang);
        }

        match self.dynamic.load(&name) {
            Ok(lang) => {
                self.cache.write().unwrap().insert(name, lang.clone());
                Ok(lang)
            }
            Err(e) if self.auto_download && (e.is_not_found() || e.is_stale()) => {
                match &e {
                    GrammarError::Stale {
                        installed, want, ..
                    } => {
                        log::info!(
                            "grammar {} is stale (installed {}, want {}), re-downloading",
                            name,
                            installed,
                            want
                        );
                    }
                    _ => log::info!("grammar {} not installed, downloading", name),
                }
                self.install(ctx, &name)?;
                let lang = self.dynamic.load(&name)?;
                self.cache.write().unwrap().insert(name, lang.clone());
                Ok(lang)
            }
            Err(e) => Err(e),
        }
    }

    /// Download and install a grammar. No-op for built-ins; names without
    /// a downloadable pack surface as `NotFound`.
    pub fn install(&self, ctx: &CancelToken, name: &str) -> Result<()> {
        let name = default_registry().normalise(name);
        if self.builtin.has(&name) {
            return Ok(());
        }

        let pack = default_registry()
            .get(&name)
            .filter(|p| p.has_grammar())
            .ok_or_else(|| GrammarError::NotFound { name: name.clone() })?;

        self.dynamic.download(ctx, &name, &pack)?;
        // The next load must see the fresh copy, not a handle opened
        // against the replaced library.
        self.cache.write().unwrap().remove(&name);
        Ok(())
    }

    /// Every loadable name: built-ins plus downloadable packs, sorted.
    pub fn available(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .builtin
            .names()
            .iter()
            .map(|s| s.to_string())
            .collect();
        names.extend(default_registry().dynamic_packs().into_keys());
        names.sort();
        names.dedup();
        names
    }

    /// Installed grammars: built-ins first, then dynamic installs.
    pub fn installed(&self) -> Vec<GrammarInfo> {
        let mut infos: Vec<GrammarInfo> = self
            .builtin
            .names()
            .iter()
            .map(|name| GrammarInfo {
                name: name.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                built_in: true,
                path: PathBuf::new(),
                installed_at: String::new(),
            })
            .collect();
        infos.extend(self.dynamic.installed());
        infos
    }

    /// Whether `name` resolves without a download.
    pub fn is_installed(&self, name: &str) -> bool {
        let name = default_registry().normalise(name);
        self.builtin.has(&name) || self.dynamic.is_installed(&name)
    }

    /// Drop the cached handle and uninstall the dynamic copy. No-op for
    /// built-ins.
    pub fn remove(&self, name: &str) -> Result<()> {
        let name = default_registry().normalise(name);
        self.cache.write().unwrap().remove(&name);
        if self.builtin.has(&name) {
            return Ok(());
        }
        self.dynamic.remove(&name)
    }

    /// A parser ready to parse `name` sources.
    ///
    /// Convenience over [`GrammarLoader::load`] for callers that want to go
    /// straight from a language name to parsing.
    pub fn parser_for(&self, ctx: &CancelToken, name: &str) -> Result<tree_sitter::Parser> {
        let language = self.load(ctx, name)?;
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&language)
            .map_err(|e| GrammarError::Analysis {
                lang: default_registry().normalise(name),
                cause: format!("grammar rejected by parser: {}", e),
            })?;
        Ok(parser)
    }

    /// The built-in registry behind this loader.
    pub fn builtin(&self) -> &BuiltinRegistry {
        &self.builtin
    }

    /// The dynamic loader behind this facade.
    pub fn dynamic(&self) -> &DynamicLoader {
        &self.dynamic
    }

    /// Snapshot of the dynamic manifest, for lock-file generation.
    pub fn manifest_entries(&self) -> BTreeMap<String, ManifestEntry> {
        self.dynamic.manifest().entries()
    }
}
