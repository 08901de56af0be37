//! Chunked HTTP download helpers
//!
//! Packages are fetched with `Range` requests in fixed-size chunks; each
//! chunk retries independently with a linear backoff. Integrity is the
//! orchestrator's job, this layer only moves bytes.

use std::path::Path;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use vmg_core::{VmgError, VmgResult};

/// Delay between chunk retry attempts
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Fetch one byte range (`start..=end`), retrying up to `max_retries` times.
/// Accepts 206 (partial content) and 200 (servers that ignore Range).
pub async fn fetch_chunk(
    client: &reqwest::Client,
    url: &str,
    start: u64,
    end: u64,
    max_retries: u32,
) -> VmgResult<Vec<u8>> {
    let mut last_error = String::new();

    for attempt in 1..=max_retries {
        let result = client
            .get(url)
            .header(reqwest::header::RANGE, format!("bytes={}-{}", start, end))
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status();
                if status == reqwest::StatusCode::PARTIAL_CONTENT
                    || status == reqwest::StatusCode::OK
                {
                    match response.bytes().await {
                        Ok(bytes) => {
                            debug!(start, end, len = bytes.len(), "chunk downloaded");
                            return Ok(bytes.to_vec());
                        }
                        Err(e) => last_error = format!("body read failed: {}", e),
                    }
                } else {
                    last_error = format!("unexpected status {}", status);
                }
            }
            Err(e) => last_error = format!("request failed: {}", e),
        }

        warn!(start, end, attempt, max_retries, error = %last_error, "chunk download failed");
        if attempt < max_retries {
            tokio::time::sleep(RETRY_BACKOFF).await;
        }
    }

    Err(VmgError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!(
            "chunk {}-{} failed after {} attempts: {}",
            start, end, max_retries, last_error
        ),
    )))
}

/// Streaming SHA-256 of a file.
pub fn sha256_file(path: &Path) -> VmgResult<[u8; 32]> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let got = std::io::Read::read(&mut file, &mut buf)?;
        if got == 0 {
            break;
        }
        hasher.update(&buf[..got]);
    }
    Ok(hasher.finalize().into())
}

/// Decode a 64-hex-character SHA-256 string.
pub fn decode_sha256_hex(hex_str: &str) -> VmgResult<[u8; 32]> {
    let bytes = hex::decode(hex_str.trim())
        .map_err(|e| VmgError::Integrity(format!("invalid SHA-256 hex: {}", e)))?;
    bytes
        .try_into()
        .map_err(|_| VmgError::Integrity("SHA-256 must be 32 bytes".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_decoding() {
        // sha256("") well-known vector
        let hex = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        let decoded = decode_sha256_hex(hex).unwrap();
        assert_eq!(decoded[0], 0xE3);
        assert_eq!(decoded[31], 0x55);

        assert!(decode_sha256_hex("abcd").is_err());
        assert!(decode_sha256_hex("zz").is_err());
    }

    #[test]
    fn file_hash_matches_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, b"vmg").unwrap();

        let expected: [u8; 32] = Sha256::digest(b"vmg").into();
        assert_eq!(sha256_file(&path).unwrap(), expected);
    }
}
