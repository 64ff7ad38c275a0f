//! Structure checks for uploaded zip archives.

use std::fs::File;
use std::path::{Component, Path};

use thiserror::Error;
use zip::ZipArchive;

/// File extensions an archive may carry.
pub const ALLOWED_EXTENSIONS: [&str; 4] = ["bufr", "grib", "grib2", "json"];

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Failed to open archive: {0}")]
    OpenFailed(String),
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("Archive contains no files")]
    Empty,
    #[error("Unsafe entry path: {0}")]
    UnsafePath(String),
    #[error("Entry has a disallowed extension: {0}")]
    DisallowedExtension(String),
}

/// One file entry of a validated archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: String,
    pub size: u64,
}

fn is_unsafe(name: &str) -> bool {
    let path = Path::new(name);
    name.starts_with('/')
        || name.starts_with('\\')
        || path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        || name.split(['/', '\\']).any(|part| part == "..")
}

fn has_allowed_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
}

/// Check an archive: at least one file, no absolute or parent-relative
/// entry paths, and only allowed extensions. Returns its file entries.
pub fn validate_archive(path: &Path) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    let file = File::open(path).map_err(|e| ArchiveError::OpenFailed(e.to_string()))?;
    let mut archive = ZipArchive::new(file)?;
    let mut entries = Vec::new();

    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        let name = entry.name().to_string();

        if is_unsafe(&name) {
            return Err(ArchiveError::UnsafePath(name));
        }
        if entry.is_dir() {
            continue;
        }
        if !has_allowed_extension(&name) {
            return Err(ArchiveError::DisallowedExtension(name));
        }
        entries.push(ArchiveEntry {
            path: name,
            size: entry.size(),
        });
    }

    if entries.is_empty() {
        return Err(ArchiveError::Empty);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn build(path: &Path, entries: &[(&str, &[u8])], dirs: &[&str]) {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        for dir in dirs {
            zip.add_directory(*dir, SimpleFileOptions::default()).unwrap();
        }
        for (name, data) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_valid_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.zip");
        build(
            &path,
            &[("obs/a.bufr", b"BUFR"), ("fc/b.GRIB2", b"GRIB"), ("c.json", b"{}")],
            &["obs/"],
        );

        let entries = validate_archive(&path).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].path, "obs/a.bufr");
        assert_eq!(entries[0].size, 4);
    }

    #[test]
    fn test_rejections() {
        let dir = tempfile::tempdir().unwrap();

        let empty = dir.path().join("empty.zip");
        build(&empty, &[], &["only-a-dir/"]);
        assert!(matches!(validate_archive(&empty), Err(ArchiveError::Empty)));

        let bad_ext = dir.path().join("ext.zip");
        build(&bad_ext, &[("notes.txt", b"hi")], &[]);
        assert!(matches!(
            validate_archive(&bad_ext),
            Err(ArchiveError::DisallowedExtension(_))
        ));

        let traversal = dir.path().join("trav.zip");
        build(&traversal, &[("../evil.bufr", b"BUFR")], &[]);
        assert!(matches!(
            validate_archive(&traversal),
            Err(ArchiveError::UnsafePath(_))
        ));

        assert!(matches!(
            validate_archive(&dir.path().join("missing.zip")),
            Err(ArchiveError::OpenFailed(_))
        ));
    }

    #[test]
    fn test_path_checks() {
        assert!(is_unsafe("/etc/passwd.json"));
        assert!(is_unsafe("a/../../b.bufr"));
        assert!(is_unsafe("..\\b.bufr"));
        assert!(!is_unsafe("data/2024/obs.bufr"));
        assert!(has_allowed_extension("x.grib2"));
        assert!(!has_allowed_extension("x"));
    }
}
