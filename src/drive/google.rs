use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use super::{mime, DriveAuth, DriveClient, DriveError, DriveNode};
use crate::storage::ByteStream;

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/drive/v3";
const FILE_FIELDS: &str = "id, name, mimeType, modifiedTime, size, webViewLink";
const PAGE_SIZE: &str = "1000";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFile {
    id: String,
    name: String,
    mime_type: String,
    #[serde(default)]
    modified_time: Option<String>,
    // Drive encodes int64 as a JSON string
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    web_view_link: Option<String>,
}

impl From<WireFile> for DriveNode {
    fn from(f: WireFile) -> Self {
        DriveNode {
            id: f.id,
            name: f.name,
            mime_type: f.mime_type,
            modified_time: f.modified_time,
            size: f.size.and_then(|s| s.parse().ok()),
            web_view_link: f.web_view_link,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<WireFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Drive v3 REST client. Shared drives are included in every call.
#[derive(Clone)]
pub struct GoogleDriveClient {
    http: reqwest::Client,
    base_url: String,
    auth: Arc<DriveAuth>,
}

impl GoogleDriveClient {
    pub fn new(auth: DriveAuth) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            auth: Arc::new(auth),
        }
    }

    /// Point the client at another endpoint, e.g. a local mock.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn request(&self, url: String) -> Result<reqwest::RequestBuilder, DriveError> {
        let token = self.auth.access_token(&self.http).await?;
        Ok(self.http.get(url).bearer_auth(token))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, DriveError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        match status.as_u16() {
            401 => Err(DriveError::Auth(body)),
            code => Err(DriveError::Status { status: code, body }),
        }
    }

    fn into_stream(response: reqwest::Response) -> ByteStream {
        response
            .bytes_stream()
            .map_err(std::io::Error::other)
            .boxed()
    }
}

#[async_trait]
impl DriveClient for GoogleDriveClient {
    async fn get(&self, id: &str) -> Result<DriveNode, DriveError> {
        let request = self
            .request(format!("{}/files/{}", self.base_url, id))
            .await?
            .query(&[("fields", FILE_FIELDS), ("supportsAllDrives", "true")]);
        let response = self.send(request).await.map_err(|e| match e {
            DriveError::Status { status: 404, .. } => DriveError::NotFound(id.to_string()),
            other => other,
        })?;
        let file: WireFile = response
            .json()
            .await
            .map_err(|e| DriveError::Decode(e.to_string()))?;
        Ok(file.into())
    }

    async fn list_children(&self, folder_id: &str) -> Result<Vec<DriveNode>, DriveError> {
        let query = format!("'{folder_id}' in parents and trashed = false");
        let fields = format!("nextPageToken, files({FILE_FIELDS})");
        let mut nodes = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("q", query.as_str()),
                ("fields", fields.as_str()),
                ("orderBy", "folder,name"),
                ("pageSize", PAGE_SIZE),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }
            let request = self
                .request(format!("{}/files", self.base_url))
                .await?
                .query(&params);
            let page: FileList = self
                .send(request)
                .await?
                .json()
                .await
                .map_err(|e| DriveError::Decode(e.to_string()))?;

            debug!(folder_id, page_len = page.files.len(), "listed drive page");
            nodes.extend(page.files.into_iter().map(DriveNode::from));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(nodes)
    }

    async fn download(&self, file_id: &str) -> Result<ByteStream, DriveError> {
        let request = self
            .request(format!("{}/files/{}", self.base_url, file_id))
            .await?
            .query(&[("alt", "media"), ("supportsAllDrives", "true")]);
        Ok(Self::into_stream(self.send(request).await?))
    }

    async fn export(&self, file_id: &str, mime_type: &str) -> Result<ByteStream, DriveError> {
        let mime_type = if mime_type.is_empty() { mime::PDF } else { mime_type };
        let request = self
            .request(format!("{}/files/{}/export", self.base_url, file_id))
            .await?
            .query(&[("mimeType", mime_type)]);
        Ok(Self::into_stream(self.send(request).await?))
    }
}
