use std::fs;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identity of a capture file: where it is and what it contains.
///
/// Two identities compare equal only if path, size, modification time, and
/// content hash all match, so an edited capture never reuses a stale cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureIdentity {
    /// Canonical path of the capture file.
    pub path: String,
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch, when available.
    pub modified_ns: Option<u64>,
    /// Hex SHA-256 of the file contents.
    pub sha256: String,
}

impl CaptureIdentity {
    /// Fingerprint the file at `path`.
    pub fn of_file(path: &Path) -> io::Result<Self> {
        let canonical = path.canonicalize()?;
        let metadata = fs::metadata(&canonical)?;
        let modified_ns = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .and_then(|elapsed| u64::try_from(elapsed.as_nanos()).ok());

        Ok(Self {
            path: canonical.to_string_lossy().to_string(),
            size: metadata.len(),
            modified_ns,
            sha256: sha256_file(&canonical)?,
        })
    }
}

/// Compute the SHA-256 hash of a file and return it as a hex string.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let file = fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
