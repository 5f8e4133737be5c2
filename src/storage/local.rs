use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{ByteStream, ObjectStore, StorageError, StoredObject};

/// Stores objects as files below a root directory.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        if key.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".partial");
    PathBuf::from(name)
}

async fn write_partial(path: &Path, body: &mut ByteStream) -> Result<u64, StorageError> {
    let mut file = fs::File::create(path).await?;
    let mut size = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(StorageError::Upstream)?;
        file.write_all(&chunk).await?;
        size += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(size)
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put_stream(
        &self,
        key: &str,
        _content_type: &str,
        mut body: ByteStream,
    ) -> Result<StoredObject, StorageError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // write next to the target and rename, so readers never see half a file
        let partial = partial_path(&path);
        let size = match write_partial(&partial, &mut body).await {
            Ok(size) => size,
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&partial).await {
                    warn!(key, error = %cleanup, "could not remove partial upload");
                }
                return Err(e);
            }
        };
        fs::rename(&partial, &path).await?;

        debug!(key, size, "stored object on local disk");
        Ok(StoredObject {
            key: key.to_string(),
            size,
            location: format!("file://{}", path.display()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn stream(parts: &[&'static str]) -> ByteStream {
        let chunks: Vec<Result<Bytes, std::io::Error>> =
            parts.iter().map(|p| Ok(Bytes::from_static(p.as_bytes()))).collect();
        futures::stream::iter(chunks).boxed()
    }

    #[tokio::test]
    async fn test_put_stream_writes_all_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        let stored = store
            .put_stream("courses/c/_/f/a.txt", "text/plain", stream(&["hello ", "world"]))
            .await
            .unwrap();

        assert_eq!(stored.size, 11);
        let written = std::fs::read_to_string(dir.path().join("courses/c/_/f/a.txt")).unwrap();
        assert_eq!(written, "hello world");
    }

    #[tokio::test]
    async fn test_failed_stream_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"first part")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];

        let err = store
            .put_stream("c/_/f/a.tar.gz", "application/gzip", futures::stream::iter(chunks).boxed())
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Upstream(_)));
        let left: Vec<_> = std::fs::read_dir(dir.path().join("c/_/f")).unwrap().collect();
        assert!(left.is_empty());
    }

    #[test]
    fn test_partial_path_keeps_full_name() {
        assert_eq!(
            partial_path(Path::new("c/_/f/a.tar.gz")),
            PathBuf::from("c/_/f/a.tar.gz.partial")
        );
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let err = store
            .put_stream("../outside", "text/plain", stream(&["x"]))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }
}
