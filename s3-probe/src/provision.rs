use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::target::ProbeTarget;

const FILL_BLOCK_SIZE: usize = 1024 * 1024;
/// Appended to a target's name to form its download path
pub const DOWNLOAD_SUFFIX: &str = "-tmp";

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("failed to create files directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to create artifact {}: {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write artifact {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A target together with the local paths a lifecycle run uses for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedTarget {
    pub target: ProbeTarget,
    /// The uploaded artifact, `{dir}/{name}`
    pub artifact: PathBuf,
    /// Where downloads land, `{dir}/{name}-tmp`
    pub download_path: PathBuf,
}

/// Writes `buf` with the content found at `offset` of every artifact.
/// Content is a pure function of position, so two artifacts of different
/// sizes share a prefix and a re-provisioned artifact is byte-identical.
pub fn fill_block(offset: u64, buf: &mut [u8]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte = ((offset + i as u64) % 251) as u8;
    }
}

/// Creates the local artifacts at startup and removes them at shutdown.
pub struct Provisioner {
    dir: PathBuf,
    provisioned: Vec<PathBuf>,
}

impl Provisioner {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            provisioned: Vec::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Removes leftovers of a previous run: the artifact itself and any
    /// `{name}-*` sibling such as an interrupted download. Failures are
    /// logged and skipped.
    pub async fn remove_stale(&self, name: &str) {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "failed to list files directory");
                return;
            }
        };

        let prefix = format!("{name}-");
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(dir = %self.dir.display(), error = %e, "failed to read files directory entry");
                    break;
                }
            };
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if file_name != name && !file_name.starts_with(&prefix) {
                continue;
            }
            let path = entry.path();
            match tokio::fs::remove_file(&path).await {
                Ok(()) => info!(path = %path.display(), "removed stale file"),
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove stale file"),
            }
        }
    }

    /// Creates the artifact for `target` with exactly `target.size` bytes.
    pub async fn provision(&mut self, target: &ProbeTarget) -> Result<ProvisionedTarget, ProvisionError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| ProvisionError::CreateDir {
                path: self.dir.clone(),
                source,
            })?;

        let artifact = self.dir.join(&target.name);
        let download_path = self.dir.join(format!("{}{DOWNLOAD_SUFFIX}", target.name));

        let mut file = tokio::fs::File::create(&artifact)
            .await
            .map_err(|source| ProvisionError::Create {
                path: artifact.clone(),
                source,
            })?;
        // Tracked as soon as it exists so cleanup covers a half-written file.
        self.provisioned.push(artifact.clone());

        let write_error = |source| ProvisionError::Write {
            path: artifact.clone(),
            source,
        };
        let mut buf = vec![0u8; FILL_BLOCK_SIZE];
        let mut offset = 0u64;
        while offset < target.size {
            let len = (target.size - offset).min(FILL_BLOCK_SIZE as u64) as usize;
            let block = &mut buf[..len];
            fill_block(offset, block);
            file.write_all(block).await.map_err(write_error)?;
            offset += len as u64;
        }
        file.flush().await.map_err(write_error)?;
        file.sync_all().await.map_err(write_error)?;

        info!(file = %target.name, size = target.size, path = %artifact.display(), "provisioned artifact");
        Ok(ProvisionedTarget {
            target: target.clone(),
            artifact,
            download_path,
        })
    }

    /// Stale files of every target are removed before any artifact is
    /// created, so one target's cleanup never deletes another's artifact.
    pub async fn provision_all(
        &mut self,
        targets: &[ProbeTarget],
    ) -> Result<Vec<ProvisionedTarget>, ProvisionError> {
        for target in targets {
            self.remove_stale(&target.name).await;
        }
        let mut provisioned = Vec::with_capacity(targets.len());
        for target in targets {
            provisioned.push(self.provision(target).await?);
        }
        Ok(provisioned)
    }

    /// Removes every artifact this provisioner created, plus any download
    /// file left next to it. Failures are logged.
    pub async fn cleanup(&self) {
        for artifact in &self.provisioned {
            let mut download = artifact.clone().into_os_string();
            download.push(DOWNLOAD_SUFFIX);
            for path in [artifact.clone(), PathBuf::from(download)] {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => info!(path = %path.display(), "removed local file"),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => warn!(path = %path.display(), error = %e, "failed to remove local file"),
                }
            }
        }
    }
}
