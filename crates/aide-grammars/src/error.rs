//! Error types for the grammar substrate.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GrammarError>;

/// Everything that can go wrong between a language name and a live parser.
#[derive(Debug, Error)]
pub enum GrammarError {
    /// No built-in grammar, no dynamic pack, or no manifest entry.
    #[error("grammar not found: {name}")]
    NotFound { name: String },

    /// Installed version differs from the host's pinned version.
    #[error("grammar {name} is stale: installed {installed}, want {want}")]
    Stale {
        name: String,
        installed: String,
        want: String,
    },

    /// Download or extraction failed; wraps the underlying cause.
    #[error("failed to download grammar {name}: {cause}")]
    DownloadFailed {
        name: String,
        #[source]
        cause: Box<GrammarError>,
    },

    /// The loaded grammar's ABI is outside the runtime's supported range.
    #[error("grammar {name} has ABI version {abi}, supported range is {min}..={max}")]
    IncompatibleAbi {
        name: String,
        abi: usize,
        min: usize,
        max: usize,
    },

    /// The OS refused to open the library or resolve the entry symbol.
    #[error("failed to load grammar {name} from {} (symbol {symbol}): {cause}", .path.display())]
    LibraryOpen {
        name: String,
        path: PathBuf,
        symbol: String,
        cause: String,
    },

    /// Non-2xx response from the grammar mirror.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus { status: u16, url: String },

    /// Transport-level network failure.
    #[error("network error fetching {url}: {cause}")]
    Network { url: String, cause: String },

    /// A download or archive entry blew past its size cap.
    #[error("{what} too large: {got} bytes exceeds limit of {max}")]
    TooLarge {
        what: &'static str,
        got: u64,
        max: u64,
    },

    /// Malformed or hostile archive content.
    #[error("invalid grammar archive: {0}")]
    Archive(String),

    /// `pack.json` failed to parse.
    #[error("invalid pack {}: {cause}", .path.display())]
    PackParse {
        path: PathBuf,
        #[source]
        cause: serde_json::Error,
    },

    /// Query compilation or parsing failed during analysis.
    #[error("analysis failed for {lang}: {cause}")]
    Analysis { lang: String, cause: String },

    /// The operation's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// File-system failure, tagged with the operation and path.
    #[error("failed to {op} {}: {cause}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        cause: std::io::Error,
    },
}

impl GrammarError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, cause: std::io::Error) -> Self {
        GrammarError::Io {
            op,
            path: path.into(),
            cause,
        }
    }

    pub(crate) fn download(name: &str, cause: GrammarError) -> Self {
        GrammarError::DownloadFailed {
            name: name.to_string(),
            cause: Box::new(cause),
        }
    }

    /// True for `NotFound` regardless of which layer produced it.
    pub fn is_not_found(&self) -> bool {
        matches!(self, GrammarError::NotFound { .. })
    }

    /// True for the staleness signal the composite loader converts into a
    /// re-download.
    pub fn is_stale(&self) -> bool {
        matches!(self, GrammarError::Stale { .. })
    }
}
