//! Input/output root resolution and output directory creation policy

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info};

use crate::config::ResumeMode;
use crate::error::{ConvertError, Result};

/// Directory name used under the input root when no output root is given
pub const DEFAULT_OUTPUT_DIR: &str = "converted";

/// Absolute, normalized roots of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub input_root: PathBuf,
    pub output_root: PathBuf,
}

impl ResolvedPaths {
    /// Resolve both roots and check the output precondition for `mode`.
    ///
    /// Nothing is written here; see [`ResolvedPaths::prepare`].
    pub fn resolve(input: &Path, output: Option<&Path>, mode: ResumeMode) -> Result<Self> {
        let input_root = fs::canonicalize(input)
            .map_err(|e| ConvertError::invalid_input(input.to_path_buf(), e.to_string()))?;

        if !input_root.is_dir() {
            return Err(ConvertError::invalid_input(input_root, "not a directory"));
        }

        let output_root = match output {
            Some(path) => canonicalize_best_effort(&absolutize(path)?),
            None => input_root.join(DEFAULT_OUTPUT_DIR),
        };

        if output_root == input_root || input_root.starts_with(&output_root) {
            return Err(ConvertError::SelfReferentialOutput {
                input: input_root,
                output: output_root,
            });
        }

        if let Ok(metadata) = fs::metadata(&output_root) {
            if !metadata.is_dir() {
                return Err(ConvertError::invalid_input(
                    output_root,
                    "output path exists and is not a directory",
                ));
            }
            if mode == ResumeMode::FailIfExists {
                return Err(ConvertError::AlreadyExists { path: output_root });
            }
        }

        info!("Input path is {:?}", input_root);
        info!("Output path is {:?}", output_root);

        Ok(Self {
            input_root,
            output_root,
        })
    }

    /// Create the output root according to `mode`.
    ///
    /// `fail-if-exists` creates it non-recursively so a directory that
    /// appeared since [`ResolvedPaths::resolve`] still aborts the run.
    pub fn prepare(&self, mode: ResumeMode) -> Result<()> {
        match mode {
            ResumeMode::FailIfExists => match fs::create_dir(&self.output_root) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    return Err(ConvertError::AlreadyExists {
                        path: self.output_root.clone(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(ConvertError::invalid_input(
                        self.output_root.clone(),
                        "parent directory of the output path does not exist",
                    ));
                }
                Err(e) => return Err(e.into()),
            },
            ResumeMode::Overwrite | ResumeMode::SkipExisting => {
                fs::create_dir_all(&self.output_root)?;
            }
        }

        debug!("Output directory ready: {:?}", self.output_root);
        Ok(())
    }

    /// Whether the output tree lives inside the input tree
    pub fn output_inside_input(&self) -> bool {
        self.output_root.starts_with(&self.input_root)
    }
}

/// Join a relative path onto the current directory and drop `.`/`..` components
fn absolutize(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    Ok(normalize_lexically(&absolute))
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Canonicalize the longest existing ancestor and re-append the rest, so
/// that symlinked parents compare equal to the canonical input root.
fn canonicalize_best_effort(path: &Path) -> PathBuf {
    let mut existing = path;
    let mut missing = Vec::new();

    loop {
        if let Ok(mut canonical) = existing.canonicalize() {
            for name in missing.iter().rev() {
                canonical.push(name);
            }
            return canonical;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn canonical_tempdir() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        (dir, root)
    }

    #[test]
    fn test_default_output_is_derived() {
        let (_dir, root) = canonical_tempdir();
        let paths = ResolvedPaths::resolve(&root, None, ResumeMode::FailIfExists).unwrap();
        assert_eq!(paths.input_root, root);
        assert_eq!(paths.output_root, root.join("converted"));
        assert!(paths.output_inside_input());
        // resolving must not create anything
        assert!(!paths.output_root.exists());
    }

    #[test]
    fn test_explicit_output_is_normalized() {
        let (_dir, root) = canonical_tempdir();
        fs::create_dir(root.join("in")).unwrap();

        let output = root.join("in").join("..").join(".").join("out");
        let paths =
            ResolvedPaths::resolve(&root.join("in"), Some(&output), ResumeMode::Overwrite).unwrap();
        assert_eq!(paths.output_root, root.join("out"));
        assert!(!paths.output_inside_input());
    }

    #[test]
    fn test_missing_input_is_rejected() {
        let (_dir, root) = canonical_tempdir();
        let result = ResolvedPaths::resolve(&root.join("nope"), None, ResumeMode::Overwrite);
        assert!(matches!(result, Err(ConvertError::InvalidInput { .. })));
    }

    #[test]
    fn test_file_input_is_rejected() {
        let (_dir, root) = canonical_tempdir();
        let file = root.join("image.tif");
        fs::write(&file, b"data").unwrap();
        let result = ResolvedPaths::resolve(&file, None, ResumeMode::Overwrite);
        assert!(matches!(result, Err(ConvertError::InvalidInput { .. })));
    }

    #[test]
    fn test_existing_output_fails_without_overwrite() {
        let (_dir, root) = canonical_tempdir();
        fs::create_dir(root.join("converted")).unwrap();

        let result = ResolvedPaths::resolve(&root, None, ResumeMode::FailIfExists);
        assert!(matches!(result, Err(ConvertError::AlreadyExists { .. })));

        assert!(ResolvedPaths::resolve(&root, None, ResumeMode::Overwrite).is_ok());
        assert!(ResolvedPaths::resolve(&root, None, ResumeMode::SkipExisting).is_ok());
    }

    #[test]
    fn test_self_referential_output_is_rejected() {
        let (_dir, root) = canonical_tempdir();
        let nested = root.join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        let same = ResolvedPaths::resolve(&root, Some(&root), ResumeMode::Overwrite);
        assert!(matches!(same, Err(ConvertError::SelfReferentialOutput { .. })));

        let ancestor =
            ResolvedPaths::resolve(&nested, Some(&root.join("a")), ResumeMode::Overwrite);
        assert!(matches!(ancestor, Err(ConvertError::SelfReferentialOutput { .. })));
    }

    #[test]
    fn test_output_file_is_rejected() {
        let (_dir, root) = canonical_tempdir();
        fs::create_dir(root.join("in")).unwrap();
        fs::write(root.join("out"), b"not a dir").unwrap();

        let result = ResolvedPaths::resolve(
            &root.join("in"),
            Some(&root.join("out")),
            ResumeMode::Overwrite,
        );
        assert!(matches!(result, Err(ConvertError::InvalidInput { .. })));
    }

    #[test]
    fn test_prepare_respects_mode() {
        let (_dir, root) = canonical_tempdir();
        let paths = ResolvedPaths::resolve(&root, None, ResumeMode::FailIfExists).unwrap();

        paths.prepare(ResumeMode::FailIfExists).unwrap();
        assert!(paths.output_root.is_dir());

        // created by someone else in the meantime
        let again = paths.prepare(ResumeMode::FailIfExists);
        assert!(matches!(again, Err(ConvertError::AlreadyExists { .. })));

        assert!(paths.prepare(ResumeMode::Overwrite).is_ok());
        assert!(paths.prepare(ResumeMode::SkipExisting).is_ok());
    }

    #[test]
    fn test_prepare_skip_existing_creates_missing_parents() {
        let (_dir, root) = canonical_tempdir();
        fs::create_dir(root.join("in")).unwrap();
        let output = root.join("deep").join("er").join("out");

        let paths =
            ResolvedPaths::resolve(&root.join("in"), Some(&output), ResumeMode::SkipExisting)
                .unwrap();
        paths.prepare(ResumeMode::SkipExisting).unwrap();
        assert!(output.is_dir());
    }

    #[test]
    fn test_normalize_lexically() {
        assert_eq!(
            normalize_lexically(Path::new("/a/./b/../c")),
            PathBuf::from("/a/c")
        );
        assert_eq!(normalize_lexically(Path::new("/../a")), PathBuf::from("/a"));
    }
}
