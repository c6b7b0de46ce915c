//! Grammar archive download and extraction.
//!
//! Downloads stream to a sibling `.tmp` file while a SHA-256 runs over the
//! bytes; extraction treats every archive as hostile and only ever writes
//! `pack.json` and `grammar*` files inside the target language directory.

use crate::cancel::CancelToken;
use crate::error::{GrammarError, Result};
use crate::pack::PACK_FILE;
use crate::platform::{LIBRARY_STEM, Platform};
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use std::time::Duration;

/// Limits and retry policy for one download-and-extract operation.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Total per-request timeout.
    pub timeout: Duration,
    /// Cap on the downloaded archive.
    pub max_archive_size: u64,
    /// Cap on a single extracted file.
    pub max_file_size: u64,
    /// Cap on regular files in one archive.
    pub max_archive_entries: usize,
    /// Retries after the first attempt, on transient failures only.
    pub retries: u32,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            max_archive_size: 50 * 1024 * 1024,
            max_file_size: 10 * 1024 * 1024,
            max_archive_entries: 20,
            retries: 2,
        }
    }
}

/// Expand the placeholders of a URL template.
///
/// `{version}`, `{asset}`, `{name}`, `{os}`, and `{arch}` are substituted;
/// a template without placeholders comes back verbatim.
pub fn resolve_url(template: &str, name: &str, version: &str, platform: &Platform) -> String {
    template
        .replace("{asset}", &platform.asset_name(name, version))
        .replace("{version}", version)
        .replace("{name}", name)
        .replace("{os}", platform.os)
        .replace("{arch}", platform.arch)
}

/// Download `url` into `dest`, returning the hex SHA-256 of the bytes.
///
/// The body streams to `<dest>.tmp` and is renamed into place only once
/// fully read; the hash is computed on the fly and the read length is
/// capped at `max_archive_size`. Transient failures (429/502/503, transport
/// errors) are retried with exponential backoff.
pub fn download_to_file(
    ctx: &CancelToken,
    url: &str,
    dest: &Path,
    opts: &FetchOptions,
) -> Result<String> {
    let agent = ureq::builder().timeout(opts.timeout).build();

    let mut attempt = 0u32;
    let response = loop {
        ctx.check()?;
        match agent.get(url).set("User-Agent", "aide-grammars").call() {
            Ok(resp) => break resp,
            Err(ureq::Error::Status(code, _)) if is_transient(code) && attempt < opts.retries => {
                log::debug!("transient HTTP {} from {}, retrying", code, url);
                backoff(attempt);
                attempt += 1;
            }
            Err(ureq::Error::Status(code, _)) => {
                return Err(GrammarError::HttpStatus {
                    status: code,
                    url: url.to_string(),
                });
            }
            Err(ureq::Error::Transport(t)) if attempt < opts.retries => {
                log::debug!("transport error from {}: {}, retrying", url, t);
                backoff(attempt);
                attempt += 1;
            }
            Err(ureq::Error::Transport(t)) => {
                return Err(GrammarError::Network {
                    url: url.to_string(),
                    cause: t.to_string(),
                });
            }
        }
    };

    let tmp = dest.with_extension("tmp");
    let result = stream_body(ctx, response.into_reader(), &tmp, opts);
    match result {
        Ok(sha256) => {
            ctx.check().inspect_err(|_| {
                let _ = std::fs::remove_file(&tmp);
            })?;
            std::fs::rename(&tmp, dest).map_err(|e| GrammarError::io("rename", &tmp, e))?;
            Ok(sha256)
        }
        Err(e) => {
            let _ = std::fs::remove_file(&tmp);
            Err(e)
        }
    }
}

fn stream_body(
    ctx: &CancelToken,
    mut body: impl Read,
    tmp: &Path,
    opts: &FetchOptions,
) -> Result<String> {
    use std::io::Write;

    let mut out =
        std::fs::File::create(tmp).map_err(|e| GrammarError::io("create", tmp, e))?;
    let mut hasher = Sha256::new();
    let mut total: u64 = 0;
    let mut buf = [0u8; 64 * 1024];

    loop {
        ctx.check()?;
        let n = body
            .read(&mut buf)
            .map_err(|e| GrammarError::io("read response into", tmp, e))?;
        if n == 0 {
            break;
        }
        total += n as u64;
        if total > opts.max_archive_size {
            return Err(GrammarError::TooLarge {
                what: "grammar archive",
                got: total,
                max: opts.max_archive_size,
            });
        }
        hasher.update(&buf[..n]);
        out.write_all(&buf[..n])
            .map_err(|e| GrammarError::io("write", tmp, e))?;
    }

    out.sync_all().map_err(|e| GrammarError::io("sync", tmp, e))?;
    Ok(hex::encode(hasher.finalize()))
}

/// Extract a grammar archive into `<dest_root>/<name>/`.
///
/// Only regular files named `pack.json` or `grammar*` directly under the
/// `<name>/` prefix are written; everything else is skipped. Entries with
/// absolute paths or `..` components never touch the file system. Returns
/// whether a `pack.json` was extracted.
pub fn extract_pack_archive(
    ctx: &CancelToken,
    archive: &Path,
    name: &str,
    dest_root: &Path,
    opts: &FetchOptions,
) -> Result<bool> {
    let file = std::fs::File::open(archive).map_err(|e| GrammarError::io("open", archive, e))?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));

    let dest_dir = dest_root.join(name);
    let mut has_pack = false;
    let mut regular_files = 0usize;

    let entries = tar
        .entries()
        .map_err(|e| GrammarError::Archive(format!("unreadable archive: {}", e)))?;
    for entry in entries {
        ctx.check()?;
        let mut entry =
            entry.map_err(|e| GrammarError::Archive(format!("corrupt entry: {}", e)))?;

        // Directories, symlinks, and device nodes are never extracted and
        // do not count against the entry limit.
        if !entry.header().entry_type().is_file() {
            continue;
        }
        regular_files += 1;
        if regular_files > opts.max_archive_entries {
            return Err(GrammarError::Archive(format!(
                "too many entries: more than {}",
                opts.max_archive_entries
            )));
        }

        let entry_name = {
            let raw_path = entry
                .path()
                .map_err(|e| GrammarError::Archive(format!("bad entry name: {}", e)))?;
            raw_path.to_string_lossy().replace('\\', "/")
        };

        let Some(basename) = safe_basename(&entry_name, name) else {
            log::debug!("skipping archive entry {}", entry_name);
            continue;
        };
        let is_grammar = basename.starts_with(LIBRARY_STEM);
        let is_pack = basename == PACK_FILE;
        if !is_grammar && !is_pack {
            continue;
        }

        let size = entry.size();
        if size > opts.max_file_size {
            return Err(GrammarError::TooLarge {
                what: "archive entry",
                got: size,
                max: opts.max_file_size,
            });
        }

        std::fs::create_dir_all(&dest_dir)
            .map_err(|e| GrammarError::io("create directory", &dest_dir, e))?;
        let out_path = dest_dir.join(basename);
        let mut out = std::fs::File::create(&out_path)
            .map_err(|e| GrammarError::io("create", &out_path, e))?;
        // The header size is already checked; take() guards against a
        // header that lies about it.
        std::io::copy(&mut (&mut entry).take(opts.max_file_size), &mut out)
            .map_err(|e| GrammarError::io("extract", &out_path, e))?;

        #[cfg(unix)]
        if is_grammar {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(0o755))
                .map_err(|e| GrammarError::io("chmod", &out_path, e))?;
        }

        if is_pack {
            has_pack = true;
        }
    }

    Ok(has_pack)
}

/// Download the archive for `name` at `version` and extract it under
/// `<dest_root>/<name>/`. The intermediate archive is deleted whether
/// extraction succeeds or fails; a failed extraction also removes the
/// partially populated language directory.
pub fn download_and_extract_pack(
    ctx: &CancelToken,
    url_template: &str,
    name: &str,
    version: &str,
    dest_root: &Path,
    platform: &Platform,
    opts: &FetchOptions,
) -> Result<(String, bool)> {
    let url = resolve_url(url_template, name, version, platform);
    std::fs::create_dir_all(dest_root)
        .map_err(|e| GrammarError::io("create directory", dest_root, e))?;

    let archive = dest_root.join(format!("{}.tar.gz", name));
    let sha256 = download_to_file(ctx, &url, &archive, opts)?;

    let extracted = extract_pack_archive(ctx, &archive, name, dest_root, opts);
    let _ = std::fs::remove_file(&archive);

    match extracted {
        Ok(has_pack) => Ok((sha256, has_pack)),
        Err(e) => {
            let _ = std::fs::remove_dir_all(dest_root.join(name));
            Err(e)
        }
    }
}

/// Validate an entry name against the `<name>/` prefix policy.
///
/// Returns the basename for `name/<basename>` entries; anything absolute,
/// traversing, outside the prefix, or nested deeper is `None`.
fn safe_basename<'a>(entry_name: &'a str, name: &str) -> Option<&'a str> {
    if entry_name.starts_with('/') {
        return None;
    }
    let components: Vec<&str> = entry_name
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect();
    if components.iter().any(|c| *c == "..") {
        return None;
    }
    match components.as_slice() {
        [dir, base] if *dir == name => Some(base),
        _ => None,
    }
}

fn is_transient(status: u16) -> bool {
    matches!(status, 429 | 502 | 503)
}

fn backoff(attempt: u32) {
    std::thread::sleep(Duration::from_millis(500u64 << attempt));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn platform() -> Platform {
        Platform {
            os: "linux",
            arch: "amd64",
            ext: ".so",
        }
    }

    /// Build a gzipped tar from (entry name, contents) pairs.
    fn make_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, contents) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, *name, *contents).unwrap();
        }
        let tar_bytes = builder.into_inner().unwrap();

        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        encoder.finish().unwrap()
    }

    fn write_archive(dir: &Path, entries: &[(&str, &[u8])]) -> std::path::PathBuf {
        let path = dir.join("fixture.tar.gz");
        std::fs::write(&path, make_archive(entries)).unwrap();
        path
    }

    /// Like `make_archive`, but writes the entry name straight into the
    /// header so hostile names (`../x`, `/abs/x`) reach the extractor even
    /// if the tar builder would refuse them.
    fn make_archive_raw_names(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, contents) in entries {
            let mut header = tar::Header::new_gnu();
            {
                let gnu = header.as_gnu_mut().unwrap();
                gnu.name = [0; 100];
                gnu.name[..name.len()].copy_from_slice(name.as_bytes());
            }
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(tar::EntryType::Regular);
            header.set_cksum();
            builder.append(&header, *contents).unwrap();
        }
        let tar_bytes = builder.into_inner().unwrap();

        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn url_template_expansion() {
        let p = platform();
        let url = resolve_url(
            "https://mirror.example/releases/download/{version}/{asset}",
            "ruby",
            "v0.1.0",
            &p,
        );
        assert_eq!(
            url,
            "https://mirror.example/releases/download/v0.1.0/aide-grammar-ruby-v0.1.0-linux-amd64.tar.gz"
        );

        let partial = resolve_url("https://mirror.example/{os}/{arch}/pkg", "ruby", "v1", &p);
        assert_eq!(partial, "https://mirror.example/linux/amd64/pkg");
    }

    #[test]
    fn url_without_placeholders_is_verbatim() {
        let url = "https://mirror.example/fixed/path.tar.gz";
        assert_eq!(resolve_url(url, "ruby", "v1", &platform()), url);
    }

    #[test]
    fn safe_basename_policy() {
        assert_eq!(safe_basename("ruby/grammar.so", "ruby"), Some("grammar.so"));
        assert_eq!(safe_basename("ruby/pack.json", "ruby"), Some("pack.json"));
        assert_eq!(safe_basename("./ruby/pack.json", "ruby"), Some("pack.json"));
        assert_eq!(safe_basename("evil/grammar.so", "ruby"), None);
        assert_eq!(safe_basename("../ruby/grammar.so", "ruby"), None);
        assert_eq!(safe_basename("/abs/grammar.so", "ruby"), None);
        assert_eq!(safe_basename("ruby/sub/grammar.so", "ruby"), None);
        assert_eq!(safe_basename("ruby", "ruby"), None);
    }

    #[test]
    fn extraction_keeps_only_expected_files() {
        let dir = tempfile::tempdir().unwrap();
        let archive = write_archive(
            dir.path(),
            &[
                ("evil/grammar.so", b"nope".as_slice()),
                ("ruby/grammar.so", b"\x7fELF fake grammar".as_slice()),
                ("ruby/README.md", b"docs".as_slice()),
                ("ruby/pack.json", br#"{"schema_version":1,"name":"ruby"}"#.as_slice()),
            ],
        );

        let ctx = CancelToken::new();
        let has_pack =
            extract_pack_archive(&ctx, &archive, "ruby", dir.path(), &FetchOptions::default())
                .unwrap();
        assert!(has_pack);

        let ruby = dir.path().join("ruby");
        assert!(ruby.join("grammar.so").exists());
        assert!(ruby.join("pack.json").exists());
        assert!(!ruby.join("README.md").exists());
        assert!(!dir.path().join("evil").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let grammar_mode = std::fs::metadata(ruby.join("grammar.so"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(grammar_mode & 0o111, 0o111, "grammar must be executable");
            let pack_mode = std::fs::metadata(ruby.join("pack.json"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(pack_mode & 0o111, 0, "pack.json must not be executable");
        }
    }

    #[test]
    fn traversal_and_absolute_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("hostile.tar.gz");
        std::fs::write(
            &archive,
            make_archive_raw_names(&[
                ("../escape/grammar.so", b"nope".as_slice()),
                ("/abs/grammar.so", b"nope".as_slice()),
                ("ruby/grammar.so", b"ok".as_slice()),
            ]),
        )
        .unwrap();

        let ctx = CancelToken::new();
        let has_pack =
            extract_pack_archive(&ctx, &archive, "ruby", dir.path(), &FetchOptions::default())
                .unwrap();
        assert!(!has_pack);
        assert!(dir.path().join("ruby/grammar.so").exists());
        assert!(!dir.path().join("escape").exists());
        assert!(!Path::new("/abs").exists());
    }

    #[test]
    fn entry_count_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let opts = FetchOptions {
            max_archive_entries: 3,
            ..FetchOptions::default()
        };
        let ctx = CancelToken::new();

        let at_limit: Vec<(String, Vec<u8>)> = (0..3)
            .map(|i| (format!("ruby/grammar.{}", i), b"x".to_vec()))
            .collect();
        let entries: Vec<(&str, &[u8])> = at_limit
            .iter()
            .map(|(n, c)| (n.as_str(), c.as_slice()))
            .collect();
        let archive = write_archive(dir.path(), &entries);
        assert!(extract_pack_archive(&ctx, &archive, "ruby", dir.path(), &opts).is_ok());

        let over: Vec<(String, Vec<u8>)> = (0..4)
            .map(|i| (format!("ruby/grammar.{}", i), b"x".to_vec()))
            .collect();
        let entries: Vec<(&str, &[u8])> =
            over.iter().map(|(n, c)| (n.as_str(), c.as_slice())).collect();
        let archive = write_archive(dir.path(), &entries);
        match extract_pack_archive(&ctx, &archive, "ruby", dir.path(), &opts) {
            Err(GrammarError::Archive(msg)) => assert!(msg.contains("too many")),
            other => panic!("expected entry-count error, got {:?}", other),
        }
    }

    #[test]
    fn file_size_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let opts = FetchOptions {
            max_file_size: 8,
            ..FetchOptions::default()
        };
        let ctx = CancelToken::new();

        let archive = write_archive(dir.path(), &[("ruby/grammar.so", &[0u8; 8])]);
        assert!(extract_pack_archive(&ctx, &archive, "ruby", dir.path(), &opts).is_ok());

        let archive = write_archive(dir.path(), &[("ruby/grammar.so", &[0u8; 9])]);
        assert!(matches!(
            extract_pack_archive(&ctx, &archive, "ruby", dir.path(), &opts),
            Err(GrammarError::TooLarge { .. })
        ));
    }

    #[test]
    fn cancellation_stops_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let archive = write_archive(dir.path(), &[("ruby/grammar.so", b"x".as_slice())]);
        let ctx = CancelToken::new();
        ctx.cancel();
        assert!(matches!(
            extract_pack_archive(&ctx, &archive, "ruby", dir.path(), &FetchOptions::default()),
            Err(GrammarError::Cancelled)
        ));
    }

    #[test]
    fn archive_stream_size_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let opts = FetchOptions {
            max_archive_size: 16,
            ..FetchOptions::default()
        };
        let ctx = CancelToken::new();

        let tmp = dir.path().join("body.tmp");
        let sha = stream_body(&ctx, std::io::Cursor::new(vec![1u8; 16]), &tmp, &opts).unwrap();
        assert_eq!(sha.len(), 64);

        assert!(matches!(
            stream_body(&ctx, std::io::Cursor::new(vec![1u8; 17]), &tmp, &opts),
            Err(GrammarError::TooLarge { .. })
        ));
    }
}
