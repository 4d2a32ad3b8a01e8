//! On-disk SHA-256 hash records for integrity verification (component B).
//!
//! Records are content-addressed: the record for an absolute path `p` is
//! stored at `<hash_dir>/<first-12-chars-of-b64url(sha256(p))>.json`. Writes
//! go through a temp-then-rename so a crash mid-write never leaves a
//! truncated record behind.

use std::io::Read;
use std::path::{Path, PathBuf};

use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::os::unix::ffi::OsStrExt;

use crate::error::{RunnerError, Result};
use crate::safe_open::SafeFile;

/// Default cap on file size streamed for hashing (128 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 128 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashRecord {
    pub algorithm: String,
    pub path: String,
    pub hash: String,
}

/// Filesystem-backed store rooted at a hash directory.
pub struct HashStore {
    dir: PathBuf,
    max_file_size: u64,
}

impl HashStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }

    pub fn with_max_file_size(mut self, max: u64) -> Self {
        self.max_file_size = max;
        self
    }

    /// Deterministic record filename for an absolute path.
    pub fn hash_file_of(&self, path: &Path) -> Result<PathBuf> {
        let name = record_filename(path)?;
        Ok(self.dir.join(name))
    }

    /// Compute and persist the hash record for `path` using an already-open
    /// handle (so the open may have gone through the privileged-read
    /// adapter without this store ever seeing elevated privileges itself).
    pub fn record_from_handle(&self, path: &Path, handle: &SafeFile) -> Result<HashRecord> {
        let hash = stream_sha256(path, handle, self.max_file_size)?;
        let record = HashRecord {
            algorithm: "sha256".to_string(),
            path: path.display().to_string(),
            hash,
        };
        self.write_record(path, &record)?;
        Ok(record)
    }

    /// Verify `path` against its stored record using an already-open handle.
    pub fn verify_from_handle(&self, path: &Path, handle: &SafeFile) -> Result<()> {
        let record = self.read_record(path)?;
        let actual = stream_sha256(path, handle, self.max_file_size)?;
        if actual != record.hash {
            return Err(RunnerError::HashMismatch {
                path: path.to_path_buf(),
                expected: record.hash,
                actual,
            });
        }
        Ok(())
    }

    fn read_record(&self, path: &Path) -> Result<HashRecord> {
        let record_path = self.hash_file_of(path)?;
        let content = std::fs::read_to_string(&record_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RunnerError::HashRecordMissing {
                    path: path.to_path_buf(),
                }
            } else {
                RunnerError::HashRecordCorrupt {
                    detail: format!("reading {}: {e}", record_path.display()),
                }
            }
        })?;
        serde_json::from_str(&content).map_err(|e| RunnerError::HashRecordCorrupt {
            detail: format!("parsing {}: {e}", record_path.display()),
        })
    }

    fn write_record(&self, path: &Path, record: &HashRecord) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| RunnerError::Io {
            path: self.dir.clone(),
            source: e,
        })?;

        let final_path = self.hash_file_of(path)?;
        let tmp_path = self.dir.join(format!(
            ".{}.tmp",
            final_path.file_name().unwrap_or_default().to_string_lossy()
        ));

        let body = serde_json::to_vec_pretty(record).map_err(|e| RunnerError::HashRecordCorrupt {
            detail: format!("serializing record: {e}"),
        })?;

        {
            let mut f = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode_or_default(0o644)
                .open(&tmp_path)
                .map_err(|e| RunnerError::Io {
                    path: tmp_path.clone(),
                    source: e,
                })?;
            use std::io::Write;
            f.write_all(&body).map_err(|e| RunnerError::Io {
                path: tmp_path.clone(),
                source: e,
            })?;
            f.sync_all().map_err(|e| RunnerError::Io {
                path: tmp_path.clone(),
                source: e,
            })?;
        }

        std::fs::rename(&tmp_path, &final_path).map_err(|e| RunnerError::Io {
            path: final_path.clone(),
            source: e,
        })?;

        Ok(())
    }
}

fn record_filename(path: &Path) -> Result<String> {
    if !path.is_absolute() {
        return Err(RunnerError::InvalidPath {
            path: path.display().to_string(),
        });
    }
    let mut hasher = Sha256::new();
    hasher.update(path.as_os_str().as_bytes());
    let digest = hasher.finalize();
    let b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest);
    let prefix: String = b64.chars().take(12).collect();
    Ok(format!("{prefix}.json"))
}

fn stream_sha256(path: &Path, handle: &SafeFile, max_size: u64) -> Result<String> {
    let len = handle.len().map_err(|e| RunnerError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    if len > max_size {
        return Err(RunnerError::FileTooLarge {
            path: path.to_path_buf(),
            size: len,
            cap: max_size,
        });
    }

    let mut reader = handle.reader().map_err(|e| RunnerError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).map_err(|e| RunnerError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Small extension to set the create mode on Unix without pulling in an
/// extra crate for a one-field builder.
trait OpenOptionsModeExt {
    fn mode_or_default(&mut self, mode: u32) -> &mut Self;
}

impl OpenOptionsModeExt for std::fs::OpenOptions {
    #[cfg(unix)]
    fn mode_or_default(&mut self, mode: u32) -> &mut Self {
        use std::os::unix::fs::OpenOptionsExt;
        self.mode(mode)
    }

    #[cfg(not(unix))]
    fn mode_or_default(&mut self, _mode: u32) -> &mut Self {
        self
    }
}
