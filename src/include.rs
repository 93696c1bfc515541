// Copyright (c) 2016-2020 Fabian Schuiki

//! Include file resolution.

use std::path::{Path, PathBuf};

/// How the file name was written in the `#include` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncludeKind {
    /// `"name"`: the current file's directory is searched first.
    Quoted,
    /// `<name>`: only the configured include path is searched.
    Angled,
}

/// Resolve an include reference to the first existing regular file. The
/// quoted form searches the directory of the including file before the
/// configured include path; the angled form searches only the include path.
/// The file name is taken verbatim; no macro expansion is applied to it.
pub fn resolve(
    name: &str,
    kind: IncludeKind,
    current_dir: &Path,
    search_path: &[PathBuf],
) -> Option<PathBuf> {
    let first = match kind {
        IncludeKind::Quoted => Some(current_dir.to_path_buf()),
        IncludeKind::Angled => None,
    };
    for dir in first.iter().chain(search_path.iter()) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn quoted_prefers_current_dir() {
        let current = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        fs::write(current.path().join("a.inc"), "current\n").unwrap();
        fs::write(other.path().join("a.inc"), "other\n").unwrap();
        let search = vec![other.path().to_path_buf()];

        let found = resolve("a.inc", IncludeKind::Quoted, current.path(), &search).unwrap();
        assert_eq!(found, current.path().join("a.inc"));

        // The angled form skips the current directory.
        let found = resolve("a.inc", IncludeKind::Angled, current.path(), &search).unwrap();
        assert_eq!(found, other.path().join("a.inc"));
    }

    #[test]
    fn search_path_order_is_respected() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        fs::write(second.path().join("b.inc"), "second\n").unwrap();
        let search = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        let found = resolve("b.inc", IncludeKind::Angled, Path::new("."), &search).unwrap();
        assert_eq!(found, second.path().join("b.inc"));
    }

    #[test]
    fn missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve("nope.inc", IncludeKind::Quoted, dir.path(), &[]).is_none());
    }

    #[test]
    fn directories_are_not_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        assert!(resolve("sub", IncludeKind::Quoted, dir.path(), &[]).is_none());
    }
}
