use std::fs::File;
use std::io::Read;
use std::path::Path;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use url::Url;

use crate::Result;

/// Capability that streams a remote resource to a local file. Transports
/// (HTTP, FTP, mirrors, caches) live outside the core; the pipeline only
/// ever hands over a URL and a destination path.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &Url, dest: &Path) -> anyhow::Result<()>;
}

/// Streaming SHA-256 of a file, hex encoded in lowercase.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}
