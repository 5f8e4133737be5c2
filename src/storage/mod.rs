//! Object storage for lesson content.

mod local;
#[cfg(feature = "s3")]
mod s3;

pub use local::LocalObjectStore;
#[cfg(feature = "s3")]
pub use s3::{S3Config, S3ObjectStore};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::retry::Transient;

/// Streamed file content.
pub type ByteStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// Where an uploaded object ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub size: u64,
    /// `s3://bucket/key` or `file:///path`.
    pub location: String,
}

#[derive(Error, Debug)]
pub enum StorageError {
    /// The source stream failed while being read.
    #[error("reading source content failed: {0}")]
    Upstream(#[source] std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object storage error: {0}")]
    Sdk(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Transient for StorageError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Upstream(_) | Self::Sdk(_))
    }
}

/// Path-addressed blob upload.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `body` under `key` without buffering it in full.
    async fn put_stream(
        &self,
        key: &str,
        content_type: &str,
        body: ByteStream,
    ) -> Result<StoredObject, StorageError>;
}

/// Keep key segments to a safe character set.
fn sanitize_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// `courses/{course}/{module or _}/{source}/{file name}`
pub fn object_key(course_id: &str, module_id: Option<&str>, source_id: &str, file_name: &str) -> String {
    format!(
        "courses/{}/{}/{}/{}",
        sanitize_segment(course_id),
        module_id.map(sanitize_segment).unwrap_or_else(|| "_".to_string()),
        sanitize_segment(source_id),
        sanitize_segment(file_name),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_layout() {
        assert_eq!(
            object_key("c1", Some("m1"), "f1", "video1.mp4"),
            "courses/c1/m1/f1/video1.mp4"
        );
        assert_eq!(object_key("c1", None, "f1", "doc.pdf"), "courses/c1/_/f1/doc.pdf");
    }

    #[test]
    fn test_object_key_sanitizes() {
        assert_eq!(
            object_key("c1", None, "f1", "../Aula 1: Intro.pdf"),
            "courses/c1/_/f1/_Aula_1__Intro.pdf"
        );
        assert_eq!(object_key("c1", None, "f1", ".."), "courses/c1/_/f1/_");
    }
}
