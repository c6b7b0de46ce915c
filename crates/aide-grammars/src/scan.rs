//! Workspace scanning and per-language grammar status.
//!
//! Walks a project with gitignore-aware filtering, classifies every file
//! through the pack registry, and reports which grammars are ready, which
//! could be installed, and which the substrate cannot provide.

use crate::cancel::CancelToken;
use crate::detect::detect;
use crate::error::Result;
use crate::loader::GrammarLoader;
use crate::registry::default_registry;
use ignore::WalkBuilder;
use std::collections::BTreeMap;
use std::path::Path;

/// Directories never descended into, on top of gitignore rules.
const DEFAULT_IGNORED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".aide",
    "node_modules",
    "target",
    "vendor",
    "dist",
    "build",
    "__pycache__",
];

/// How a detected language relates to the loader.
///
/// Ordering is the display order: ready grammars first, then installable,
/// then unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LanguageStatus {
    Builtin,
    Installed,
    Available,
    Unavailable,
}

impl LanguageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LanguageStatus::Builtin => "builtin",
            LanguageStatus::Installed => "installed",
            LanguageStatus::Available => "available",
            LanguageStatus::Unavailable => "unavailable",
        }
    }
}

/// Aggregate scan outcome.
#[derive(Debug, Default)]
pub struct ScanResult {
    /// Detected languages and their file counts.
    pub languages: BTreeMap<String, usize>,
    /// Files that matched any language.
    pub total_files: usize,
    /// Languages that would need a grammar download, sorted.
    pub needed: Vec<String>,
    /// Languages no grammar exists for, sorted.
    pub unavailable: Vec<String>,
}

/// Per-language line of the detailed report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageReport {
    pub name: String,
    pub files: usize,
    pub status: LanguageStatus,
    pub can_install: bool,
}

/// Walk `root` and tally detected languages against the loader.
pub fn scan_project(root: &Path, loader: &GrammarLoader) -> Result<ScanResult> {
    let mut result = ScanResult::default();

    let walker = WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(true)
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !(entry.path().is_dir() && DEFAULT_IGNORED_DIRS.contains(&name.as_ref()))
        })
        .build();

    for entry in walker {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let Some(lang) = detect(entry.path(), None) else {
            continue;
        };
        *result.languages.entry(lang).or_insert(0) += 1;
        result.total_files += 1;
    }

    let dynamic = default_registry().dynamic_packs();
    for name in result.languages.keys() {
        if loader.is_installed(name) {
            continue;
        }
        if dynamic.contains_key(name) {
            result.needed.push(name.clone());
        } else {
            result.unavailable.push(name.clone());
        }
    }

    Ok(result)
}

/// Detailed per-language report, sorted by status then descending file
/// count, name as the tiebreaker.
pub fn scan_detail(root: &Path, loader: &GrammarLoader) -> Result<Vec<LanguageReport>> {
    let result = scan_project(root, loader)?;
    let dynamic = default_registry().dynamic_packs();

    let mut reports: Vec<LanguageReport> = result
        .languages
        .iter()
        .map(|(name, &files)| {
            let status = if loader.builtin().has(name) {
                LanguageStatus::Builtin
            } else if loader.is_installed(name) {
                LanguageStatus::Installed
            } else if dynamic.contains_key(name) {
                LanguageStatus::Available
            } else {
                LanguageStatus::Unavailable
            };
            LanguageReport {
                name: name.clone(),
                files,
                can_install: status == LanguageStatus::Available,
                status,
            }
        })
        .collect();

    reports.sort_by(|a, b| {
        a.status
            .cmp(&b.status)
            .then(b.files.cmp(&a.files))
            .then(a.name.cmp(&b.name))
    });
    Ok(reports)
}

/// Install every grammar a scan reported as needed.
///
/// Returns the names actually installed, in scan order. Stops at the first
/// failure, leaving earlier installs in place.
pub fn install_needed(
    ctx: &CancelToken,
    loader: &GrammarLoader,
    scan: &ScanResult,
) -> Result<Vec<String>> {
    let mut installed = Vec::new();
    for name in &scan.needed {
        loader.install(ctx, name)?;
        installed.push(name.clone());
    }
    Ok(installed)
}
