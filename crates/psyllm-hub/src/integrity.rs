use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{HubError, HubResult};

const READ_CHUNK: usize = 1 << 20;

/// SHA-256 hex digest of a file, read in 1 MiB chunks so multi-gigabyte
/// weight shards never need to fit in memory.
pub fn sha256_file(path: &Path) -> HubResult<String> {
    let file = std::fs::File::open(path).map_err(HubError::Io)?;
    let mut reader = BufReader::with_capacity(READ_CHUNK, file);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut buf).map_err(HubError::Io)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Check `path` against an expected SHA-256 hex digest (case-insensitive).
pub fn verify_integrity(path: &Path, expected_sha256: &str) -> HubResult<()> {
    let actual = sha256_file(path)?;
    debug!(path = %path.display(), expected = expected_sha256, actual = %actual, "Verifying file");
    if actual.eq_ignore_ascii_case(expected_sha256) {
        Ok(())
    } else {
        Err(HubError::IntegrityMismatch {
            file: path.to_string_lossy().to_string(),
            expected: expected_sha256.to_string(),
            actual,
        })
    }
}
