//! Source file discovery under the input root

use std::collections::hash_map::{Entry, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::{JobSpec, TargetFormat};
use crate::error::{ConvertError, Result};
use crate::processing::formats::has_source_extension;

pub mod paths;
pub use paths::*;

/// A discovered source image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    path: PathBuf,
    relative: PathBuf,
    collides_with: Option<PathBuf>,
}

impl SourceFile {
    /// Create a source file; `path` must live under `input_root`
    pub fn new(input_root: &Path, path: PathBuf) -> Option<Self> {
        let relative = path.strip_prefix(input_root).ok()?.to_path_buf();
        if relative.as_os_str().is_empty() {
            return None;
        }
        Some(Self {
            path,
            relative,
            collides_with: None,
        })
    }

    /// Absolute path of the source image
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path relative to the input root
    pub fn relative(&self) -> &Path {
        &self.relative
    }

    /// An earlier source whose outputs this file would overwrite, if any
    pub fn collides_with(&self) -> Option<&Path> {
        self.collides_with.as_deref()
    }

    /// The relative path re-rooted under `output_root`, source extension kept
    pub fn target_file(&self, output_root: &Path) -> PathBuf {
        output_root.join(&self.relative)
    }

    /// Output location for `format`: the target file with the format's extension
    pub fn output_path(&self, output_root: &Path, format: TargetFormat) -> PathBuf {
        self.target_file(output_root)
            .with_extension(format.extension())
    }
}

/// Walks the input root and collects files with a source extension
#[derive(Debug, Clone)]
pub struct FileDiscoverer {
    extensions: Vec<String>,
    recursive: bool,
    exclude: Option<PathBuf>,
}

impl FileDiscoverer {
    /// Create a discoverer for the given extensions
    pub fn new(extensions: Vec<String>, recursive: bool) -> Self {
        Self {
            extensions,
            recursive,
            exclude: None,
        }
    }

    /// Discoverer configured from a job, pruning the output tree when it
    /// lives inside the input tree
    pub fn for_job(job: &JobSpec, paths: &ResolvedPaths) -> Self {
        let discoverer = Self::new(job.source_extensions().to_vec(), job.recursive());
        if paths.output_inside_input() {
            discoverer.exclude(paths.output_root.clone())
        } else {
            discoverer
        }
    }

    /// Never descend into `dir`
    pub fn exclude(mut self, dir: PathBuf) -> Self {
        self.exclude = Some(dir);
        self
    }

    /// Collect all matching regular files below `root`.
    ///
    /// An empty result is not an error; callers decide how to report it.
    pub fn discover(&self, root: &Path) -> Result<Vec<SourceFile>> {
        if !root.is_dir() {
            return Err(ConvertError::invalid_input(root.to_path_buf(), "not a directory"));
        }

        let max_depth = if self.recursive { usize::MAX } else { 1 };

        let walker = WalkDir::new(root)
            .min_depth(1)
            .max_depth(max_depth)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !self.is_excluded(entry));

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(ConvertError::invalid_input(root.to_path_buf(), e.to_string()));
                }
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            if !has_source_extension(entry.path(), &self.extensions) || !is_regular_file(&entry) {
                continue;
            }

            if let Some(file) = SourceFile::new(root, entry.into_path()) {
                files.push(file);
            }
        }

        mark_output_collisions(&mut files);
        debug!("Discovered {} source files under {:?}", files.len(), root);
        Ok(files)
    }

    fn is_excluded(&self, entry: &DirEntry) -> bool {
        match &self.exclude {
            Some(dir) => entry.file_type().is_dir() && entry.path() == dir,
            None => false,
        }
    }
}

/// Sources whose relative paths differ only in extension (`scan.tif`,
/// `scan.TIF`, `scan.tiff`) share every output path. The first one in
/// discovery order owns the outputs; the others are marked.
fn mark_output_collisions(files: &mut [SourceFile]) {
    let mut owners: HashMap<PathBuf, PathBuf> = HashMap::new();
    for file in files.iter_mut() {
        match owners.entry(file.relative.with_extension("")) {
            Entry::Occupied(owner) => {
                warn!(
                    "{:?} has the same output stem as {:?} and will not be converted",
                    file.path,
                    owner.get()
                );
                file.collides_with = Some(owner.get().clone());
            }
            Entry::Vacant(slot) => {
                slot.insert(file.path.clone());
            }
        }
    }
}

/// Regular files, or symlinks that resolve to one
fn is_regular_file(entry: &DirEntry) -> bool {
    if entry.file_type().is_file() {
        return true;
    }
    entry.path_is_symlink()
        && fs::metadata(entry.path())
            .map(|m| m.is_file())
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"DUMMY IMAGE DATA").unwrap();
    }

    fn setup_tree() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();

        touch(&root.join("b.tif"));
        touch(&root.join("a.TIF"));
        touch(&root.join("c.tiff"));
        touch(&root.join("notes.txt"));
        touch(&root.join("photo.png"));
        touch(&root.join("sub").join("d.tif"));
        touch(&root.join("sub").join("deeper").join("e.tif"));
        fs::create_dir_all(root.join("folder.tif")).unwrap();

        (dir, root)
    }

    fn relatives(files: &[SourceFile]) -> Vec<PathBuf> {
        files.iter().map(|f| f.relative().to_path_buf()).collect()
    }

    #[test]
    fn test_flat_discovery_ignores_subdirectories() {
        let (_dir, root) = setup_tree();
        let files = FileDiscoverer::new(vec!["tif".into(), "tiff".into()], false)
            .discover(&root)
            .unwrap();

        assert_eq!(
            relatives(&files),
            vec![
                PathBuf::from("a.TIF"),
                PathBuf::from("b.tif"),
                PathBuf::from("c.tiff"),
            ]
        );
    }

    #[test]
    fn test_recursive_discovery_finds_every_depth_once() {
        let (_dir, root) = setup_tree();
        let files = FileDiscoverer::new(vec!["tif".into()], true)
            .discover(&root)
            .unwrap();

        let found = relatives(&files);
        assert_eq!(found.len(), 4);
        assert!(found.contains(&PathBuf::from("sub").join("d.tif")));
        assert!(found.contains(&PathBuf::from("sub").join("deeper").join("e.tif")));
        assert!(!found.iter().any(|p| p.ends_with("folder.tif")));

        let mut deduped = found.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), found.len());
    }

    #[test]
    fn test_excluded_output_tree_is_pruned() {
        let (_dir, root) = setup_tree();
        touch(&root.join("converted").join("old.tif"));

        let files = FileDiscoverer::new(vec!["tif".into()], true)
            .exclude(root.join("converted"))
            .discover(&root)
            .unwrap();

        assert!(!relatives(&files).iter().any(|p| p.starts_with("converted")));
    }

    #[test]
    fn test_empty_directory_yields_nothing() {
        let dir = TempDir::new().unwrap();
        let files = FileDiscoverer::new(vec!["tif".into()], true)
            .discover(dir.path())
            .unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = TempDir::new().unwrap();
        let result = FileDiscoverer::new(vec!["tif".into()], false).discover(&dir.path().join("gone"));
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks() {
        let (_dir, root) = setup_tree();
        let outside = TempDir::new().unwrap();
        touch(&outside.path().join("linked").join("x.tif"));

        std::os::unix::fs::symlink(outside.path().join("linked"), root.join("link_dir")).unwrap();
        std::os::unix::fs::symlink(root.join("b.tif"), root.join("alias.tif")).unwrap();

        let files = FileDiscoverer::new(vec!["tif".into()], true)
            .discover(&root)
            .unwrap();
        let found = relatives(&files);

        assert!(found.contains(&PathBuf::from("alias.tif")));
        assert!(!found.iter().any(|p| p.starts_with("link_dir")));
    }

    #[test]
    fn test_shared_stems_are_marked() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        touch(&root.join("scan.tif"));
        touch(&root.join("scan.tiff"));
        touch(&root.join("scan.001.tif"));
        touch(&root.join("sub").join("scan.tif"));

        let files = FileDiscoverer::new(vec!["tif".into(), "tiff".into()], true)
            .discover(&root)
            .unwrap();

        let marked: Vec<_> = files
            .iter()
            .filter_map(|f| f.collides_with().map(|other| (f.relative(), other)))
            .collect();
        let owner = root.join("scan.tif");
        assert_eq!(marked, vec![(Path::new("scan.tiff"), owner.as_path())]);
    }

    #[test]
    fn test_output_path_mirrors_structure() {
        let file = SourceFile::new(
            Path::new("/in"),
            PathBuf::from("/in/sub/scan.001.tif"),
        )
        .unwrap();

        assert_eq!(
            file.output_path(Path::new("/out"), TargetFormat::Jpeg),
            PathBuf::from("/out/sub/scan.001.jpeg")
        );
        assert_eq!(
            file.output_path(Path::new("/out"), TargetFormat::Png),
            PathBuf::from("/out/sub/scan.001.png")
        );
        assert!(SourceFile::new(Path::new("/in"), PathBuf::from("/elsewhere/a.tif")).is_none());
    }
}
