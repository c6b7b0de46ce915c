//! Reproducible grammar pinning.
//!
//! `aide.lock` snapshots the set of installed dynamic grammars so a
//! workspace can be restored to the same grammars on another machine.
//! Entries are serialised in name order for stable diffs; the file is
//! meant to be committed.

use crate::cancel::CancelToken;
use crate::error::{GrammarError, Result};
use crate::loader::GrammarLoader;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Lock file name at the workspace root.
pub const LOCK_FILE: &str = "aide.lock";

const LOCK_COMMENT: &str =
    "Pinned grammar set. Generated by aide; commit to reproduce grammar installs.";

/// On-disk lock document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LockFile {
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub generated_at: String,
    #[serde(default)]
    pub grammars: BTreeMap<String, LockEntry>,
}

/// One pinned grammar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockEntry {
    pub version: String,
    pub sha256: String,
    pub c_symbol: String,
}

/// Snapshot the loader's dynamic manifest into a lock document.
pub fn generate_lock_file(loader: &GrammarLoader) -> LockFile {
    let grammars = loader
        .manifest_entries()
        .into_iter()
        .map(|(name, entry)| {
            (
                name,
                LockEntry {
                    version: entry.version,
                    sha256: entry.sha256,
                    c_symbol: entry.c_symbol,
                },
            )
        })
        .collect();

    LockFile {
        comment: LOCK_COMMENT.to_string(),
        generated_at: String::new(),
        grammars,
    }
}

/// Write `lock` to `<workspace_root>/aide.lock`, stamping `generated_at`.
pub fn write_lock_file(workspace_root: &Path, lock: &LockFile) -> Result<()> {
    let mut lock = lock.clone();
    if lock.comment.is_empty() {
        lock.comment = LOCK_COMMENT.to_string();
    }
    lock.generated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

    let path = workspace_root.join(LOCK_FILE);
    let text = serde_json::to_string_pretty(&lock).expect("lock file serialises");
    std::fs::write(&path, text + "\n").map_err(|e| GrammarError::io("write", &path, e))
}

/// Read `<workspace_root>/aide.lock`. `None` when the file does not exist.
pub fn read_lock_file(workspace_root: &Path) -> Result<Option<LockFile>> {
    let path = workspace_root.join(LOCK_FILE);
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(GrammarError::io("read", &path, e)),
    };
    let lock =
        serde_json::from_str(&text).map_err(|e| GrammarError::PackParse { path, cause: e })?;
    Ok(Some(lock))
}

/// Install every pinned grammar that is not already present (built-ins
/// count as present). Returns the newly installed names in lock order;
/// aborts on the first failure, reporting how far it got.
pub fn install_from_lock(
    ctx: &CancelToken,
    loader: &GrammarLoader,
    lock: &LockFile,
) -> Result<Vec<String>> {
    let mut installed = Vec::new();
    for name in lock.grammars.keys() {
        if loader.is_installed(name) {
            continue;
        }
        if let Err(e) = loader.install(ctx, name) {
            log::error!(
                "lock install aborted at {}: {} of {} grammars installed",
                name,
                installed.len(),
                lock.grammars.len()
            );
            return Err(e);
        }
        installed.push(name.clone());
    }
    Ok(installed)
}
