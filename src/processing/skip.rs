//! Deciding which target formats still need encoding

use std::path::Path;

use crate::config::{ResumeMode, TargetFormat};

/// Return the subset of `requested` that has to be encoded for `target_file`,
/// the source path re-rooted under the output root. Each format's output is
/// `target_file` with its extension replaced.
///
/// Only `skip-existing` consults the filesystem; the other modes always
/// encode every requested format. Order of `requested` is preserved.
pub fn plan_formats(
    target_file: &Path,
    requested: &[TargetFormat],
    mode: ResumeMode,
) -> Vec<TargetFormat> {
    if mode != ResumeMode::SkipExisting {
        return requested.to_vec();
    }

    requested
        .iter()
        .copied()
        .filter(|format| !target_file.with_extension(format.extension()).is_file())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_skip_existing_returns_only_missing() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("scan");
        fs::write(base.with_extension("png"), b"done").unwrap();
        fs::write(base.with_extension("bmp"), b"done").unwrap();

        let planned = plan_formats(&base, &TargetFormat::ALL, ResumeMode::SkipExisting);
        assert_eq!(planned, vec![TargetFormat::Jpeg]);
    }

    #[test]
    fn test_everything_present_plans_nothing() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("scan");
        fs::write(base.with_extension("png"), b"done").unwrap();

        assert!(plan_formats(&base, &[TargetFormat::Png], ResumeMode::SkipExisting).is_empty());
    }

    #[test]
    fn test_other_modes_ignore_disk() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("scan");
        fs::write(base.with_extension("png"), b"done").unwrap();

        let requested = [TargetFormat::Png, TargetFormat::Jpeg];
        assert_eq!(plan_formats(&base, &requested, ResumeMode::Overwrite), requested.to_vec());
        assert_eq!(
            plan_formats(&base, &requested, ResumeMode::FailIfExists),
            requested.to_vec()
        );
    }

    #[test]
    fn test_directory_with_output_name_is_not_output() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("scan");
        fs::create_dir(base.with_extension("png")).unwrap();

        assert_eq!(
            plan_formats(&base, &[TargetFormat::Png], ResumeMode::SkipExisting),
            vec![TargetFormat::Png]
        );
    }

    #[test]
    fn test_dotted_stems() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("scan.001.tif");
        fs::write(dir.path().join("scan.001.png"), b"done").unwrap();
        // a sibling with a shorter stem must not count
        fs::write(dir.path().join("scan.jpeg"), b"other").unwrap();

        assert_eq!(
            plan_formats(&base, &[TargetFormat::Png, TargetFormat::Jpeg], ResumeMode::SkipExisting),
            vec![TargetFormat::Jpeg]
        );
    }
}
