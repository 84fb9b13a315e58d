//! Zip archive handling.

use std::fs::File;
use std::io::{Cursor, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use content_core::{ContentError, Result};

/// Extract every entry of `archive` into `dest`.
///
/// Entries that would escape `dest` are rejected by the zip reader.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(file).map_err(|e| {
        ContentError::extraction(format!("Failed to open archive {:?}: {}", archive, e))
    })?;

    std::fs::create_dir_all(dest)?;
    zip.extract(dest).map_err(|e| {
        ContentError::extraction(format!("Failed to extract {:?}: {}", archive, e))
    })?;

    Ok(())
}

/// Build an archive holding `file` under `entry_name`.
///
/// Packages a catalog or item package in the layout the download
/// operations expect.
pub fn archive_file(file: &Path, entry_name: &str) -> Result<Vec<u8>> {
    let contents = std::fs::read(file)?;

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    writer
        .start_file(entry_name, options)
        .map_err(|e| ContentError::extraction(format!("Failed to start entry {}: {}", entry_name, e)))?;
    writer.write_all(&contents)?;

    let cursor = writer
        .finish()
        .map_err(|e| ContentError::extraction(format!("Failed to finish archive: {}", e)))?;

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_archive_then_extract() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.bin");
        std::fs::write(&source, b"catalog bytes").unwrap();

        let bytes = archive_file(&source, "Catalog.sqlite").unwrap();
        let archive = dir.path().join("archive.zip");
        std::fs::write(&archive, bytes).unwrap();

        let out = dir.path().join("out");
        extract_archive(&archive, &out).unwrap();

        assert_eq!(std::fs::read(out.join("Catalog.sqlite")).unwrap(), b"catalog bytes");
    }

    #[test]
    fn test_corrupt_archive_is_extraction_error() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("archive.zip");
        std::fs::write(&archive, b"not a zip").unwrap();

        let err = extract_archive(&archive, &dir.path().join("out")).unwrap_err();
        assert_eq!(err.error_code(), "EXTRACTION_ERROR");
    }
}
