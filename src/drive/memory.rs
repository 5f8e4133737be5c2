use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{mime, DriveClient, DriveError, DriveNode};
use crate::storage::ByteStream;

struct Entry {
    node: DriveNode,
    parent: Option<String>,
    content: Bytes,
}

#[derive(Default)]
struct Inner {
    entries: Vec<Entry>,
    failures: HashMap<String, (u16, usize)>,
}

/// Drive tree held in memory. Children are listed in insertion order.
///
/// Used for dry runs and tests. Content reads are counted so callers can
/// check how many files were actually fetched.
#[derive(Default)]
pub struct InMemoryDrive {
    inner: Mutex<Inner>,
    fetches: AtomicUsize,
}

impl InMemoryDrive {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, node: DriveNode, parent: Option<&str>, content: Bytes) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.entries.push(Entry {
                node,
                parent: parent.map(str::to_string),
                content,
            });
        }
    }

    pub fn add_folder(&self, id: &str, name: &str, parent: Option<&str>) -> &Self {
        self.insert(
            DriveNode {
                id: id.to_string(),
                name: name.to_string(),
                mime_type: mime::FOLDER.to_string(),
                modified_time: Some("2024-01-01T00:00:00.000Z".to_string()),
                size: None,
                web_view_link: None,
            },
            parent,
            Bytes::new(),
        );
        self
    }

    pub fn add_file(
        &self,
        id: &str,
        name: &str,
        mime_type: &str,
        parent: &str,
        content: impl Into<Bytes>,
    ) -> &Self {
        let content = content.into();
        self.insert(
            DriveNode {
                id: id.to_string(),
                name: name.to_string(),
                mime_type: mime_type.to_string(),
                modified_time: Some("2024-01-01T00:00:00.000Z".to_string()),
                size: Some(content.len() as u64),
                web_view_link: Some(super::view_link(id)),
            },
            Some(parent),
            content,
        );
        self
    }

    /// Make the next `times` content reads of `id` fail with `status`.
    pub fn fail_reads(&self, id: &str, status: u16, times: usize) -> &Self {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failures.insert(id.to_string(), (status, times));
        }
        self
    }

    /// Change the revision marker of a node, as an edit in Drive would.
    pub fn touch(&self, id: &str, modified_time: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            for entry in inner.entries.iter_mut().filter(|e| e.node.id == id) {
                entry.node.modified_time = Some(modified_time.to_string());
            }
        }
    }

    /// Number of download/export calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn poisoned() -> DriveError {
        DriveError::Decode("in-memory drive lock poisoned".to_string())
    }

    fn read(&self, file_id: &str) -> Result<ByteStream, DriveError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().map_err(|_| Self::poisoned())?;
        if let Some((status, remaining)) = inner.failures.get_mut(file_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DriveError::Status {
                    status: *status,
                    body: format!("injected failure for {file_id}"),
                });
            }
        }
        let content = inner
            .entries
            .iter()
            .find(|e| e.node.id == file_id)
            .map(|e| e.content.clone())
            .ok_or_else(|| DriveError::NotFound(file_id.to_string()))?;

        // two chunks, so consumers see a real stream
        let mid = content.len() / 2;
        let chunks: Vec<Result<Bytes, std::io::Error>> =
            vec![Ok(content.slice(..mid)), Ok(content.slice(mid..))];
        Ok(futures::stream::iter(chunks).boxed())
    }
}

#[async_trait]
impl DriveClient for InMemoryDrive {
    async fn get(&self, id: &str) -> Result<DriveNode, DriveError> {
        let inner = self.inner.lock().map_err(|_| Self::poisoned())?;
        inner
            .entries
            .iter()
            .find(|e| e.node.id == id)
            .map(|e| e.node.clone())
            .ok_or_else(|| DriveError::NotFound(id.to_string()))
    }

    async fn list_children(&self, folder_id: &str) -> Result<Vec<DriveNode>, DriveError> {
        let inner = self.inner.lock().map_err(|_| Self::poisoned())?;
        Ok(inner
            .entries
            .iter()
            .filter(|e| e.parent.as_deref() == Some(folder_id))
            .map(|e| e.node.clone())
            .collect())
    }

    async fn download(&self, file_id: &str) -> Result<ByteStream, DriveError> {
        self.read(file_id)
    }

    async fn export(&self, file_id: &str, _mime_type: &str) -> Result<ByteStream, DriveError> {
        self.read(file_id)
    }
}
