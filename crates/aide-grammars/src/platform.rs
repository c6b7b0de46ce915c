//! Platform triple and grammar asset naming.

use std::path::{Path, PathBuf};

/// File name of the shared library inside a grammar's cache subdirectory.
pub const LIBRARY_STEM: &str = "grammar";

/// OS, architecture, and shared-library extension of a build target.
///
/// Asset file names embed the triple so one release can carry grammars for
/// every supported platform side by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub os: &'static str,
    pub arch: &'static str,
    pub ext: &'static str,
}

impl Platform {
    /// The triple of the running host.
    pub fn current() -> Self {
        let os = if cfg!(target_os = "macos") {
            "darwin"
        } else if cfg!(target_os = "windows") {
            "windows"
        } else {
            "linux"
        };

        let arch = if cfg!(target_arch = "aarch64") {
            "arm64"
        } else {
            "amd64"
        };

        Self {
            os,
            arch,
            ext: extension_for_os(os),
        }
    }

    /// Library file name, `grammar.so` / `grammar.dylib` / `grammar.dll`.
    pub fn library_file(&self) -> String {
        format!("{}{}", LIBRARY_STEM, self.ext)
    }

    /// Release asset name for one grammar at one version.
    pub fn asset_name(&self, name: &str, version: &str) -> String {
        format!(
            "aide-grammar-{}-{}-{}-{}.tar.gz",
            name, version, self.os, self.arch
        )
    }
}

/// Path of an installed grammar's shared library under the cache root.
pub fn library_path(dir: &Path, name: &str, platform: &Platform) -> PathBuf {
    dir.join(name).join(platform.library_file())
}

fn extension_for_os(os: &str) -> &'static str {
    match os {
        "darwin" => ".dylib",
        "windows" => ".dll",
        _ => ".so",
    }
}
