//! Deterministic artifact manifest over the workspace tree.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use anyhow::Result;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use walkdir::{DirEntry, WalkDir};

use crate::state::ArtifactEntry;

/// Directory names pruned during traversal.
pub const EXCLUDED_DIRS: [&str; 9] = [
    ".orchestrator",
    ".git",
    ".svn",
    ".hg",
    ".venv",
    "__pycache__",
    ".pytest_cache",
    ".mypy_cache",
    ".ruff_cache",
];

/// File suffixes never recorded.
pub const EXCLUDED_SUFFIXES: [&str; 7] = [
    ".pyc", ".pyo", ".pyd", ".db", ".sqlite", ".sqlite3", ".coverage",
];

const CHUNK_SIZE: usize = 64 * 1024;

/// Stream-hash a file with SHA-256; returns lowercase hex.
pub fn checksum_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut chunk = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Build the manifest for `root`, sorted by path.
pub fn build(root: &Path) -> Result<Vec<ArtifactEntry>> {
    build_with(root, checksum_file)
}

/// Build the manifest with an injectable hasher.
///
/// Files the hasher cannot read are skipped.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn build_with<H>(root: &Path, mut hasher: H) -> Result<Vec<ArtifactEntry>>
where
    H: FnMut(&Path) -> io::Result<String>,
{
    let mut entries = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_excluded_dir(entry));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!(err = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || has_excluded_suffix(entry.path()) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let rel = relative.to_string_lossy().replace('\\', "/");
        match hasher(entry.path()) {
            Ok(checksum) => entries.push(ArtifactEntry {
                path: rel,
                checksum,
                last_story: None,
            }),
            Err(err) => debug!(path = %rel, err = %err, "skipping unreadable file"),
        }
    }

    entries.sort_by(|a, b| a.path.cmp(&b.path));
    debug!(files = entries.len(), "manifest built");
    Ok(entries)
}

fn is_excluded_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| EXCLUDED_DIRS.contains(&name))
}

fn has_excluded_suffix(path: &Path) -> bool {
    let name = path.file_name().map(|n| n.to_string_lossy().to_lowercase());
    name.is_some_and(|name| EXCLUDED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, contents).expect("write");
    }

    fn paths(entries: &[ArtifactEntry]) -> Vec<&str> {
        entries.iter().map(|entry| entry.path.as_str()).collect()
    }

    #[test]
    fn identical_trees_produce_identical_manifests() {
        let temp = tempfile::tempdir().expect("tempdir");
        write(temp.path(), "app/main.py", "print('x')\n");
        write(temp.path(), "README.md", "hi\n");

        let first = build(temp.path()).expect("first");
        let second = build(temp.path()).expect("second");
        assert_eq!(first, second);
        assert_eq!(paths(&first), vec!["README.md", "app/main.py"]);
        assert_eq!(first[0].checksum.len(), 64);
    }

    #[test]
    fn excluded_dirs_and_suffixes_are_skipped() {
        let temp = tempfile::tempdir().expect("tempdir");
        write(temp.path(), "app/a.py", "a");
        write(temp.path(), "app/__pycache__/a.cpython-312.pyc", "x");
        write(temp.path(), ".git/HEAD", "ref");
        write(temp.path(), ".orchestrator/state.json", "{}");
        write(temp.path(), "data/local.sqlite3", "db");
        write(temp.path(), "nested/.venv/lib/x.py", "v");

        let entries = build(temp.path()).expect("build");
        assert_eq!(paths(&entries), vec!["app/a.py"]);
    }

    #[test]
    fn unreadable_file_is_skipped_without_failing() {
        let temp = tempfile::tempdir().expect("tempdir");
        write(temp.path(), "ok.txt", "fine");
        write(temp.path(), "locked.txt", "nope");

        let entries = build_with(temp.path(), |path| {
            if path.ends_with("locked.txt") {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"))
            } else {
                checksum_file(path)
            }
        })
        .expect("build");
        assert_eq!(paths(&entries), vec!["ok.txt"]);
    }

    #[test]
    fn checksum_matches_known_digest() {
        let temp = tempfile::tempdir().expect("tempdir");
        write(temp.path(), "abc.txt", "abc");
        let digest = checksum_file(&temp.path().join("abc.txt")).expect("hash");
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
