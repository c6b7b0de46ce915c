//! File classification by filename, extension, and shebang.

use crate::registry::default_registry;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// Classify a file against the pack registry.
///
/// Checks in order: exact filename, lower-cased extension, then the `#!`
/// line. When `content` is `None` the shebang check reads the first line
/// from disk, bounded to a few hundred bytes.
pub fn detect(path: &Path, content: Option<&str>) -> Option<String> {
    let registry = default_registry();

    if let Some(filename) = path.file_name().and_then(|f| f.to_str()) {
        if let Some(lang) = registry.lang_for_filename(filename) {
            return Some(lang);
        }
    }

    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        if let Some(lang) = registry.lang_for_extension(&ext.to_lowercase()) {
            return Some(lang);
        }
    }

    let first_line = match content {
        Some(text) => text.lines().next().map(|l| l.to_string()),
        None => read_first_line(path),
    };
    if let Some(line) = first_line {
        if let Some(interpreter) = shebang_interpreter(&line) {
            return registry.lang_for_shebang(&interpreter);
        }
    }

    None
}

/// Interpreter basename of a `#!` line, with `env` indirection resolved.
///
/// `#!/usr/bin/env python3` and `#!/usr/bin/python3` both yield `python3`.
fn shebang_interpreter(line: &str) -> Option<String> {
    let rest = line.strip_prefix("#!")?.trim();
    let mut words = rest.split_whitespace();
    let program = words.next()?;
    let mut basename = program.rsplit('/').next()?;
    if basename == "env" {
        // Skip env flags like -S; the interpreter is the first bare word.
        basename = words.find(|w| !w.starts_with('-'))?;
    }
    if basename.is_empty() {
        None
    } else {
        Some(basename.to_string())
    }
}

fn read_first_line(path: &Path) -> Option<String> {
    let file = std::fs::File::open(path).ok()?;
    let mut reader = BufReader::new(file.take(512));
    let mut line = String::new();
    reader.read_line(&mut line).ok()?;
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn extension_detection() {
        assert_eq!(detect(Path::new("main.go"), Some("")).as_deref(), Some("go"));
        assert_eq!(
            detect(Path::new("src/APP.RB"), Some("")).as_deref(),
            Some("ruby")
        );
        assert_eq!(detect(Path::new("noext"), Some("")), None);
    }

    #[test]
    fn filename_beats_extension() {
        assert_eq!(
            detect(Path::new("deploy/Dockerfile"), Some("")).as_deref(),
            Some("dockerfile")
        );
        assert_eq!(
            detect(Path::new("Gemfile"), Some("")).as_deref(),
            Some("ruby")
        );
    }

    #[test]
    fn shebang_from_content() {
        assert_eq!(
            detect(Path::new("script"), Some("#!/usr/bin/env python3\nprint()")).as_deref(),
            Some("python")
        );
        assert_eq!(
            detect(Path::new("script"), Some("#!/bin/bash\necho hi")).as_deref(),
            Some("bash")
        );
    }

    #[test]
    fn shebang_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("deploy");
        std::fs::write(&script, "#!/usr/bin/env ruby\nputs :hi\n").unwrap();
        assert_eq!(detect(&script, None).as_deref(), Some("ruby"));
    }

    #[test]
    fn shebang_parsing() {
        assert_eq!(
            shebang_interpreter("#!/usr/bin/python3").as_deref(),
            Some("python3")
        );
        assert_eq!(
            shebang_interpreter("#!/usr/bin/env -S node --no-warnings").as_deref(),
            Some("node")
        );
        assert_eq!(shebang_interpreter("#!/usr/bin/env"), None);
        assert_eq!(shebang_interpreter("plain text"), None);
    }

    #[test]
    fn missing_file_without_content_is_undetected() {
        let path = PathBuf::from("/does/not/exist/script");
        assert_eq!(detect(&path, None), None);
    }
}
