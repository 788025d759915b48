use std::path::PathBuf;

use async_trait::async_trait;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum FileStoreError {
    #[error("file name '{0}' has no usable characters")]
    InvalidName(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Blob storage for fulfillment artifacts and certificates. The engine keeps only the
/// returned path and never looks inside the file.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn store(&self, bytes: &[u8], filename: &str) -> Result<String, FileStoreError>;

    /// Deletes a file this store returned from [`FileStore::store`].
    async fn remove(&self, path: &str) -> Result<(), FileStoreError>;

    fn url(&self, path: &str) -> String;
}

/// Writes under a local directory that a static file server exposes at `base_url`.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
    base_url: String,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
        }
    }
}

fn sanitize(filename: &str) -> String {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or_default();
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn store(&self, bytes: &[u8], filename: &str) -> Result<String, FileStoreError> {
        let clean = sanitize(filename);
        if clean.is_empty() {
            return Err(FileStoreError::InvalidName(filename.to_string()));
        }

        tokio::fs::create_dir_all(&self.root).await?;
        let relative = format!("{}-{}", Uuid::new_v4(), clean);
        tokio::fs::write(self.root.join(&relative), bytes).await?;

        tracing::debug!(path = %relative, size = bytes.len(), "Stored file");
        Ok(relative)
    }

    async fn remove(&self, path: &str) -> Result<(), FileStoreError> {
        if path != sanitize(path) {
            return Err(FileStoreError::InvalidName(path.to_string()));
        }
        tokio::fs::remove_file(self.root.join(path)).await?;
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}
