//! Directory catalog.
//!
//! Lists the playable files of one directory under human-readable names and maps names back
//! to paths. The transport only ever receives paths; this is the lookup in front of it.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::tag;

/// One playable file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: String,
    pub path: PathBuf,
}

/// Name-to-path lookup consumed by a UI.
pub trait Catalog {
    /// Entries ordered by name.
    fn list(&self) -> Vec<CatalogEntry>;
    fn resolve(&self, name: &str) -> Option<PathBuf>;
}

/// Catalog of the files directly inside one directory.
#[derive(Clone, Debug, Default)]
pub struct DirectoryCatalog {
    root: PathBuf,
    entries: BTreeMap<String, PathBuf>,
}

impl DirectoryCatalog {
    /// Scan `root` (non-recursive) for `.mp3` files and files starting with a tag header.
    pub fn scan(root: &Path) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("canonicalize root {:?}", root))?;
        if !root.is_dir() {
            return Err(anyhow::anyhow!("root is not a directory: {:?}", root));
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&root).with_context(|| format!("read_dir {:?}", root))? {
            let entry = entry.context("read_dir entry")?;
            let path = entry.path();
            if !path.is_file() || !is_playable(&path) {
                continue;
            }
            files.push(path);
        }
        files.sort();

        let mut entries = BTreeMap::new();
        for path in files {
            let name = unique_name(&entries, tag::display_name(&path));
            entries.insert(name, path);
        }

        tracing::info!(root = %root.display(), tracks = entries.len(), "catalog scan complete");
        Ok(Self { root, entries })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Catalog for DirectoryCatalog {
    fn list(&self) -> Vec<CatalogEntry> {
        self.entries
            .iter()
            .map(|(name, path)| CatalogEntry {
                name: name.clone(),
                path: path.clone(),
            })
            .collect()
    }

    fn resolve(&self, name: &str) -> Option<PathBuf> {
        self.entries.get(name).cloned()
    }
}

fn is_playable(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(OsStr::to_str)
        .unwrap_or("")
        .to_ascii_lowercase();
    ext == "mp3" || starts_with_tag(path)
}

fn starts_with_tag(path: &Path) -> bool {
    let mut magic = [0u8; 3];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .map(|_| &magic == b"ID3")
        .unwrap_or(false)
}

/// `name`, or `name (2)`, `name (3)`... whichever is free first.
fn unique_name(taken: &BTreeMap<String, PathBuf>, name: String) -> String {
    if !taken.contains_key(&name) {
        return name;
    }
    (2..)
        .map(|n| format!("{name} ({n})"))
        .find(|candidate| !taken.contains_key(candidate))
        .unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::build_tag;

    fn tagged(title: &str, artist: &str) -> Vec<u8> {
        build_tag(
            3,
            &[
                (b"TIT2", format!("\x00{title}").into_bytes()),
                (b"TPE1", format!("\x00{artist}").into_bytes()),
            ],
        )
    }

    #[test]
    fn scan_lists_playable_files_by_display_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.mp3"), tagged("Song", "Band")).unwrap();
        std::fs::write(dir.path().join("plain.MP3"), b"\xFF\xFB\x90\x00").unwrap();
        std::fs::write(dir.path().join("noext"), tagged("Hidden", "Band")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
        std::fs::create_dir(dir.path().join("nested.mp3")).unwrap();

        let catalog = DirectoryCatalog::scan(dir.path()).unwrap();
        let names: Vec<String> = catalog.list().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["Band - Hidden", "Band - Song", "plain.MP3"]);
        assert_eq!(
            catalog.resolve("Band - Song"),
            Some(catalog.root().join("b.mp3"))
        );
        assert_eq!(catalog.resolve("notes.txt"), None);
    }

    #[test]
    fn duplicate_names_get_a_counter_suffix() {
        let dir = tempfile::tempdir().unwrap();
        for f in ["a.mp3", "b.mp3", "c.mp3"] {
            std::fs::write(dir.path().join(f), tagged("Same", "Artist")).unwrap();
        }

        let catalog = DirectoryCatalog::scan(dir.path()).unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.resolve("Artist - Same"), Some(catalog.root().join("a.mp3")));
        assert_eq!(catalog.resolve("Artist - Same (2)"), Some(catalog.root().join("b.mp3")));
        assert_eq!(catalog.resolve("Artist - Same (3)"), Some(catalog.root().join("c.mp3")));
    }

    #[test]
    fn scan_rejects_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DirectoryCatalog::scan(&dir.path().join("nope")).is_err());
    }
}
