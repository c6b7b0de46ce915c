//! Hybrid tree-sitter grammar loading for the aide code-indexing substrate.
//!
//! A grammar can be statically linked into the binary, or downloaded on
//! demand as a platform-specific shared library packaged with per-language
//! metadata. This crate provides:
//! - the pack registry (file detection tables, queries, analysis config);
//! - the built-in and dynamic grammar registries and the composite
//!   [`GrammarLoader`] that resolves a name through both, downloading and
//!   re-downloading as needed;
//! - the installed-grammar manifest and the `aide.lock` pinning file;
//! - a workspace scanner reporting per-language grammar status;
//! - pack-driven symbol extraction feeding the `aide-index` boundary.
//!
//! # Example
//!
//! ```ignore
//! use aide_grammars::{CancelToken, GrammarLoader};
//!
//! let loader = GrammarLoader::new(std::path::Path::new("."))?;
//! let language = loader.load(&CancelToken::new(), "go")?;
//! ```

pub mod analysis;
pub mod builtin;
pub mod cancel;
pub mod detect;
pub mod dynamic;
pub mod error;
pub mod fetch;
pub mod loader;
pub mod lockfile;
pub mod manifest;
pub mod pack;
pub mod platform;
pub mod registry;
pub mod scan;

pub use cancel::CancelToken;
pub use error::{GrammarError, Result};
pub use loader::{GrammarLoader, LoaderOptions};
pub use pack::Pack;
pub use registry::{PackRegistry, default_registry};
