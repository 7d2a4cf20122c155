use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::io::AsyncReadExt;

const DIGEST_BLOCK_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
#[error("failed to hash {}: {source}", path.display())]
pub struct VerifyError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityVerdict {
    Match,
    Mismatch,
    /// No comparison happened: the download failed, or a file could not be hashed
    Skipped,
}

/// MD5 of the file at `path`, read in fixed-size blocks.
pub async fn file_digest(path: &Path) -> Result<md5::Digest, VerifyError> {
    let to_err = |source| VerifyError {
        path: path.to_path_buf(),
        source,
    };
    let mut file = tokio::fs::File::open(path).await.map_err(to_err)?;
    let mut context = md5::Context::new();
    let mut buf = vec![0u8; DIGEST_BLOCK_SIZE];
    loop {
        let read = file.read(&mut buf).await.map_err(to_err)?;
        if read == 0 {
            break;
        }
        context.consume(&buf[..read]);
    }
    Ok(context.compute())
}

/// Compares the digests of the uploaded artifact and the downloaded copy.
pub async fn verify(original: &Path, downloaded: &Path) -> Result<IntegrityVerdict, VerifyError> {
    let expected = file_digest(original).await?;
    let actual = file_digest(downloaded).await?;
    if expected == actual {
        Ok(IntegrityVerdict::Match)
    } else {
        Ok(IntegrityVerdict::Mismatch)
    }
}
