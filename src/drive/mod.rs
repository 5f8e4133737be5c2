//! Drive client adapter: listing folders and streaming file content.

mod auth;
mod folder;
mod google;
mod memory;

pub use auth::{DriveAuth, ServiceAccountKey};
pub use folder::parse_folder_reference;
pub use google::GoogleDriveClient;
pub use memory::InMemoryDrive;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::Transient;
use crate::storage::ByteStream;

/// MIME types the pipeline cares about.
pub mod mime {
    pub const FOLDER: &str = "application/vnd.google-apps.folder";
    pub const GOOGLE_DOC: &str = "application/vnd.google-apps.document";
    pub const GOOGLE_SLIDES: &str = "application/vnd.google-apps.presentation";
    pub const GOOGLE_SHEET: &str = "application/vnd.google-apps.spreadsheet";
    pub const GOOGLE_NATIVE_PREFIX: &str = "application/vnd.google-apps.";
    pub const PDF: &str = "application/pdf";
    pub const DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
    pub const PPTX: &str =
        "application/vnd.openxmlformats-officedocument.presentationml.presentation";
    pub const TEXT: &str = "text/plain";
    pub const CSV: &str = "text/csv";
    pub const OCTET_STREAM: &str = "application/octet-stream";
}

/// A file or folder as returned by the Drive API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveNode {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub modified_time: Option<String>,
    pub size: Option<u64>,
    pub web_view_link: Option<String>,
}

impl DriveNode {
    pub fn is_folder(&self) -> bool {
        self.mime_type == mime::FOLDER
    }

    /// Docs, Sheets and Slides have no bytes of their own and must be exported.
    pub fn is_google_native(&self) -> bool {
        is_google_native(&self.mime_type)
    }
}

pub fn is_google_native(mime_type: &str) -> bool {
    mime_type.starts_with(mime::GOOGLE_NATIVE_PREFIX) && mime_type != mime::FOLDER
}

/// Link shown to students for a Drive file.
pub fn view_link(file_id: &str) -> String {
    format!("https://drive.google.com/file/d/{file_id}/view")
}

#[derive(Error, Debug)]
pub enum DriveError {
    #[error("drive request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("drive returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("drive authentication failed: {0}")]
    Auth(String),

    #[error("{0} is not a folder")]
    NotAFolder(String),

    #[error("drive file not found: {0}")]
    NotFound(String),

    #[error("invalid drive response: {0}")]
    Decode(String),
}

impl DriveError {
    /// Transport errors, rate limiting and server errors are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => !e.is_decode() && !e.is_builder(),
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// The folder does not exist or the credentials cannot see it.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
            || matches!(self, Self::Status { status, .. } if *status == 404 || *status == 403)
    }
}

impl Transient for DriveError {
    fn is_transient(&self) -> bool {
        self.is_retryable()
    }
}

/// Read access to Drive.
#[async_trait]
pub trait DriveClient: Send + Sync {
    /// Fetch metadata for one file or folder.
    async fn get(&self, id: &str) -> Result<DriveNode, DriveError>;

    /// List the non-trashed children of a folder, following pagination.
    /// Order is the API's and must not be changed.
    async fn list_children(&self, folder_id: &str) -> Result<Vec<DriveNode>, DriveError>;

    /// Stream the raw bytes of a binary file.
    async fn download(&self, file_id: &str) -> Result<ByteStream, DriveError>;

    /// Stream a Google-native document converted to `mime_type`.
    async fn export(&self, file_id: &str, mime_type: &str) -> Result<ByteStream, DriveError>;

    /// Fetch a node and check it is a folder the credentials can list.
    async fn resolve_folder(&self, folder_id: &str) -> Result<DriveNode, DriveError> {
        let node = self.get(folder_id).await?;
        if !node.is_folder() {
            return Err(DriveError::NotAFolder(node.name));
        }
        Ok(node)
    }
}
