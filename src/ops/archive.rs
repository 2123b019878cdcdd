//! Zip archiving: one input file becomes an archive with exactly one entry.

use super::ExecutorError;
use crate::utils::sanitize_file_name;
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{AesMode, CompressionMethod, ZipWriter};

/// Produce `<name>.zip` inside `out_dir`, containing the input file under
/// its own base name as the sole entry.
///
/// # Errors
///
/// I/O failures reading the input or writing the archive.
pub fn create_zip(input: &Path, out_dir: &Path) -> Result<PathBuf, ExecutorError> {
    write_zip(input, out_dir, None)
}

/// Like [`create_zip`], but the entry is AES-256 encrypted: extraction
/// requires `password`.
///
/// # Errors
///
/// I/O or encryption failures while writing the archive.
pub fn create_encrypted_zip(
    input: &Path,
    out_dir: &Path,
    password: &str,
) -> Result<PathBuf, ExecutorError> {
    write_zip(input, out_dir, Some(password))
}

fn write_zip(
    input: &Path,
    out_dir: &Path,
    password: Option<&str>,
) -> Result<PathBuf, ExecutorError> {
    let file_name = input
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    let entry_name = sanitize_file_name(file_name, "file");
    let out_path = out_dir.join(format!("{file_name}.zip"));

    let mut options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);
    if let Some(password) = password {
        options = options.with_aes_encryption(AesMode::Aes256, password);
    }

    let out = File::create(&out_path)?;
    let mut writer = ZipWriter::new(BufWriter::new(out));
    writer.start_file(entry_name, options).map_err(as_io)?;

    let mut reader = BufReader::new(File::open(input)?);
    io::copy(&mut reader, &mut writer)?;
    writer.finish().map_err(as_io)?;

    Ok(out_path)
}

/// Archive creation has no password/corruption dimension; every zip-layer
/// failure here is an I/O failure to the caller.
fn as_io(e: ZipError) -> ExecutorError {
    match e {
        ZipError::Io(io) => ExecutorError::Io(io),
        other => ExecutorError::Io(io::Error::other(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn write_input(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).expect("write input");
        path
    }

    #[test]
    fn zip_contains_exactly_the_input_under_its_base_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = write_input(dir.path(), "report.pdf", b"not really a pdf");

        let out = create_zip(&input, dir.path()).expect("create zip");
        assert_eq!(out.file_name().and_then(|n| n.to_str()), Some("report.pdf.zip"));

        let mut archive =
            zip::ZipArchive::new(File::open(&out).expect("open zip")).expect("read zip");
        assert_eq!(archive.len(), 1);
        let mut entry = archive.by_index(0).expect("entry");
        assert_eq!(entry.name(), "report.pdf");
        let mut content = Vec::new();
        entry.read_to_end(&mut content).expect("read entry");
        assert_eq!(content, b"not really a pdf");
    }

    #[test]
    fn encrypted_zip_rejects_plain_reads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = write_input(dir.path(), "secret.txt", b"hunter2 file");

        let out = create_encrypted_zip(&input, dir.path(), "s3cret").expect("create zip");

        let mut archive =
            zip::ZipArchive::new(File::open(&out).expect("open zip")).expect("read zip");
        // Without the password the entry must not be readable.
        assert!(archive.by_index(0).is_err());
    }

    #[test]
    fn missing_input_is_io_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ghost = dir.path().join("ghost.bin");
        assert!(matches!(
            create_zip(&ghost, dir.path()),
            Err(ExecutorError::Io(_))
        ));
    }
}
