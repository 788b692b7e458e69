// Writing assembled files to the output directory

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::common::error::{Error, Result};
use crate::validation::{sanitize_file_name, validate_hash_hex};

/// Name collisions are resolved by suffixing `_1`, `_2`, ... up to this
const MAX_NAME_ATTEMPTS: u32 = 10_000;

/// Places received files in one directory without overwriting anything
#[derive(Debug, Clone)]
pub struct OutputWriter {
    dir: PathBuf,
}

impl OutputWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `data` under a collision-free version of `file_name`
    ///
    /// # Arguments
    /// * `file_name` - Sender-supplied name, sanitized here
    /// * `data` - Verified file contents
    /// * `expected_hash` - Hex BLAKE3 hash the written file must match
    ///
    /// # Returns
    /// * `Ok(PathBuf)` - Where the file landed
    /// * `Err(Error)` - If writing fails or the file on disk does not match
    pub fn write(&self, file_name: &str, data: &[u8], expected_hash: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let (path, reserved) = self.reserve(&sanitize_file_name(file_name))?;
        drop(reserved);

        let part = part_path(&path);
        let result = write_part(&part, data)
            .and_then(|_| fs::rename(&part, &path).map_err(Error::from))
            .and_then(|_| verify_file_hash(&path, expected_hash));
        if let Err(e) = result {
            let _ = fs::remove_file(&part);
            let _ = fs::remove_file(&path);
            return Err(e);
        }

        log::info!("Wrote {} ({} bytes)", path.display(), data.len());
        Ok(path)
    }

    /// Create the first free name as an empty file so concurrent writers skip it
    fn reserve(&self, file_name: &str) -> Result<(PathBuf, File)> {
        let (stem, ext) = split_name(file_name);
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let candidate = if attempt == 0 {
                file_name.to_string()
            } else {
                format!("{}_{}{}", stem, attempt, ext)
            };
            let path = self.dir.join(&candidate);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::Storage(format!(
            "No free name for {} in {}",
            file_name,
            self.dir.display()
        )))
    }
}

/// `report.tar.gz` splits as `report` and `.tar.gz`; leading-dot names have no extension
fn split_name(file_name: &str) -> (&str, &str) {
    match file_name.find('.') {
        Some(0) | None => (file_name, ""),
        Some(dot) => file_name.split_at(dot),
    }
}

fn part_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.part", name))
}

fn write_part(part: &Path, data: &[u8]) -> Result<()> {
    let mut file = File::create(part)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}

/// Verify the hex BLAKE3 hash of a file on disk
pub fn verify_file_hash(path: &Path, expected_hash: &str) -> Result<()> {
    validate_hash_hex(expected_hash)?;

    let mut file = File::open(path)?;
    let actual = compute_file_hash(&mut file)?.to_hex().to_string();
    if !actual.eq_ignore_ascii_case(expected_hash) {
        return Err(Error::HashMismatch {
            expected: expected_hash.to_ascii_lowercase(),
            actual,
        });
    }
    Ok(())
}

/// BLAKE3 of a whole file, streamed in 64KB reads
pub fn compute_file_hash(file: &mut File) -> Result<blake3::Hash> {
    file.seek(SeekFrom::Start(0))?;

    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; 65536];
    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::compute_hash;
    use tempfile::TempDir;

    #[test]
    fn test_collisions_get_suffixes() {
        let dir = TempDir::new().unwrap();
        let writer = OutputWriter::new(dir.path());
        let data = b"contents";
        let hash = compute_hash(data);

        let first = writer.write("report.tar.gz", data, &hash).unwrap();
        let second = writer.write("report.tar.gz", data, &hash).unwrap();
        let third = writer.write("../report.tar.gz", data, &hash).unwrap();

        assert_eq!(first.file_name().unwrap(), "report.tar.gz");
        assert_eq!(second.file_name().unwrap(), "report_1.tar.gz");
        assert_eq!(third.file_name().unwrap(), "report_2.tar.gz");
        assert_eq!(fs::read(&second).unwrap(), data);
        assert!(!dir.path().join(".report_1.tar.gz.part").exists());
    }

    #[test]
    fn test_hash_mismatch_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let writer = OutputWriter::new(dir.path().join("out"));
        let result = writer.write("a.bin", b"actual", &compute_hash(b"expected"));
        assert!(matches!(result, Err(Error::HashMismatch { .. })));
        assert_eq!(fs::read_dir(writer.dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_compute_file_hash_matches_in_memory_hash() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.bin");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &data).unwrap();

        let mut file = File::open(&path).unwrap();
        assert_eq!(compute_file_hash(&mut file).unwrap(), blake3::hash(&data));
        assert!(verify_file_hash(&path, &compute_hash(&data)).is_ok());
        assert!(verify_file_hash(&path, "xyz").is_err());
    }

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("a.txt"), ("a", ".txt"));
        assert_eq!(split_name("noext"), ("noext", ""));
        assert_eq!(split_name(".hidden"), (".hidden", ""));
    }
}
