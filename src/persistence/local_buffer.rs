use super::Sample;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Errors raised while touching the sample file.
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("Failed to reset sample file {path}: {source}")]
    Reset {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to append sample {sample} to {path}: {source}")]
    Append {
        sample: Sample,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read sample file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Corrupt line {line} in sample file: {content:?}")]
    Corrupt { line: usize, content: String },
}

/// Append-only text file holding every sample the agent produced.
///
/// The file handle is never kept between calls. Each append opens the file, writes one
/// line, syncs and drops the handle before returning, so a tick never leaves a descriptor
/// open behind it.
#[derive(Debug, Clone)]
pub struct LocalBuffer {
    path: PathBuf,
}

impl LocalBuffer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Truncates (or creates) the file. Called once at startup.
    pub async fn reset(&self) -> Result<(), BufferError> {
        let file = File::create(&self.path)
            .await
            .map_err(|source| BufferError::Reset {
                path: self.path.clone(),
                source,
            })?;
        file.sync_all().await.map_err(|source| BufferError::Reset {
            path: self.path.clone(),
            source,
        })?;

        info!("Sample file {} reset", self.path.display());
        Ok(())
    }

    /// Appends `sample` as a single newline-terminated line.
    pub async fn append(&self, sample: Sample) -> Result<(), BufferError> {
        let append_err = |source| BufferError::Append {
            sample,
            path: self.path.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(append_err)?;

        file.write_all(format!("{}\n", sample).as_bytes())
            .await
            .map_err(append_err)?;
        file.flush().await.map_err(append_err)?;
        file.sync_data().await.map_err(append_err)?;

        debug!("Sample {} appended to {}", sample, self.path.display());
        Ok(())
    }

    /// Reads back every persisted sample in file order.
    pub async fn read_samples(&self) -> Result<Vec<Sample>, BufferError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(BufferError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                line.parse::<Sample>().map_err(|_| BufferError::Corrupt {
                    line: idx + 1,
                    content: line.to_string(),
                })
            })
            .collect()
    }
}
