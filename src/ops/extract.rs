//! Zip extraction into a fresh isolated directory.

use super::ExecutorError;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use uuid::Uuid;
use zip::result::ZipError;
use zip::ZipArchive;

/// Decompress every entry of `input` into a fresh directory under
/// `dest_root`, decrypting with `password` when given.
///
/// Returns the extracted file paths. On any failure the fresh directory is
/// removed again, so a wrong password never leaves partial output behind.
/// Entry names are confined to the target directory; an archive trying to
/// escape it is treated as corrupt.
///
/// # Errors
///
/// `WrongPasswordOrCorrupt` if the archive cannot be read or decrypted,
/// `EmptyArchive` if nothing was extracted, `Io` for destination-side
/// filesystem failures.
pub fn extract_all(
    input: &Path,
    dest_root: &Path,
    password: Option<&str>,
) -> Result<Vec<PathBuf>, ExecutorError> {
    let file = File::open(input)?;
    let mut archive = ZipArchive::new(BufReader::new(file)).map_err(read_failure)?;
    if archive.len() == 0 {
        return Err(ExecutorError::EmptyArchive);
    }

    let out_dir = dest_root.join(format!("unzipped-{}", Uuid::new_v4().simple()));
    std::fs::create_dir_all(&out_dir)?;

    match extract_entries(&mut archive, &out_dir, password) {
        Ok(files) if files.is_empty() => {
            let _ = std::fs::remove_dir_all(&out_dir);
            Err(ExecutorError::EmptyArchive)
        }
        Ok(files) => Ok(files),
        Err(e) => {
            let _ = std::fs::remove_dir_all(&out_dir);
            Err(e)
        }
    }
}

fn extract_entries<R: io::Read + io::Seek>(
    archive: &mut ZipArchive<R>,
    out_dir: &Path,
    password: Option<&str>,
) -> Result<Vec<PathBuf>, ExecutorError> {
    let mut written = Vec::new();

    for index in 0..archive.len() {
        let mut entry = match password {
            Some(p) => archive
                .by_index_decrypt(index, p.as_bytes())
                .map_err(read_failure)?,
            None => archive.by_index(index).map_err(read_failure)?,
        };

        // enclosed_name() strips nothing: it refuses names that would land
        // outside the target directory.
        let Some(relative) = entry.enclosed_name() else {
            return Err(ExecutorError::WrongPasswordOrCorrupt);
        };
        let target = out_dir.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut out = File::create(&target)?;
        // A wrong ZipCrypto password surfaces here as garbage failing the
        // CRC check, so copy failures count as wrong-password-or-corrupt.
        io::copy(&mut entry, &mut out).map_err(|_| ExecutorError::WrongPasswordOrCorrupt)?;
        written.push(target);
    }

    Ok(written)
}

/// Everything the zip layer reports while reading, including a rejected
/// password, means the archive cannot be extracted as given.
fn read_failure(e: ZipError) -> ExecutorError {
    match e {
        ZipError::Io(io) => ExecutorError::Io(io),
        _ => ExecutorError::WrongPasswordOrCorrupt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::archive::{create_encrypted_zip, create_zip};

    fn entries_under(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .map(|rd| rd.filter_map(|e| e.ok().map(|e| e.path())).collect())
            .unwrap_or_default()
    }

    #[test]
    fn archive_then_extract_reproduces_content_and_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("report.pdf");
        std::fs::write(&input, b"byte-identical payload").expect("write input");

        let zipped = create_zip(&input, dir.path()).expect("zip");
        let files = extract_all(&zipped, dir.path(), None).expect("extract");

        assert_eq!(files.len(), 1);
        assert_eq!(
            files[0].file_name().and_then(|n| n.to_str()),
            Some("report.pdf")
        );
        let roundtripped = std::fs::read(&files[0]).expect("read extracted");
        assert_eq!(roundtripped, b"byte-identical payload");
    }

    #[test]
    fn encrypted_roundtrip_with_correct_password() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("secret.txt");
        std::fs::write(&input, b"classified").expect("write input");

        let zipped = create_encrypted_zip(&input, dir.path(), "pw123").expect("zip");
        let files = extract_all(&zipped, dir.path(), Some("pw123")).expect("extract");

        assert_eq!(std::fs::read(&files[0]).expect("read"), b"classified");
    }

    #[test]
    fn wrong_password_fails_and_leaves_no_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("secret.txt");
        std::fs::write(&input, b"classified").expect("write input");
        let zipped = create_encrypted_zip(&input, dir.path(), "right").expect("zip");

        let dest = dir.path().join("dest");
        std::fs::create_dir_all(&dest).expect("mkdir dest");
        let err = extract_all(&zipped, &dest, Some("wrong")).expect_err("must fail");

        assert!(matches!(err, ExecutorError::WrongPasswordOrCorrupt));
        assert!(
            entries_under(&dest).is_empty(),
            "failed extraction must not leave a populated directory"
        );
    }

    #[test]
    fn missing_password_on_encrypted_archive_is_wrong_password() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("secret.txt");
        std::fs::write(&input, b"classified").expect("write input");
        let zipped = create_encrypted_zip(&input, dir.path(), "right").expect("zip");

        let err = extract_all(&zipped, dir.path(), None).expect_err("must fail");
        assert!(matches!(err, ExecutorError::WrongPasswordOrCorrupt));
    }

    #[test]
    fn garbage_input_is_corrupt_not_a_crash() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("junk.zip");
        std::fs::write(&input, b"this is not a zip file").expect("write input");

        let err = extract_all(&input, dir.path(), None).expect_err("must fail");
        assert!(matches!(err, ExecutorError::WrongPasswordOrCorrupt));
    }

    #[test]
    fn empty_archive_is_a_typed_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("empty.zip");
        let writer = zip::ZipWriter::new(File::create(&path).expect("create"));
        writer.finish().expect("finish");

        let err = extract_all(&path, dir.path(), None).expect_err("must fail");
        assert!(matches!(err, ExecutorError::EmptyArchive));
    }
}
