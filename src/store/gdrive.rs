//! Google Drive object store
//!
//! Drive addresses everything by opaque file ID; folders are ordinary files
//! with a special MIME type and children point at them through `parents`.
//! This module maps the [`ObjectStore`] primitives onto Drive v3 calls.

use std::io::Cursor;

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::Bytes;
use google_drive3::api::{File, Scope};
use google_drive3::DriveHub;
use http_body_util::BodyExt;
use hyper_util::client::legacy::connect::HttpConnector;
use tracing::{debug, trace};

use crate::auth::TokenProviderWrapper;
use crate::error::{GatewayError, Result};
use crate::store::{ByteStream, MetadataPatch, ObjectKind, ObjectMetadata, ObjectStore};

/// MIME type for Google Drive folders
const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Fields to request for file metadata
const FILE_FIELDS: &str = "id, name, mimeType, size, modifiedTime, createdTime, parents";

/// Fields to request for file list
const LIST_FIELDS: &str =
    "nextPageToken, files(id, name, mimeType, size, modifiedTime, createdTime, parents)";

/// Largest page the Drive API accepts
const MAX_PAGE_SIZE: usize = 1000;

type DriveClient = DriveHub<hyper_rustls::HttpsConnector<HttpConnector>>;

/// Escape a value for embedding in a Drive query string literal.
///
/// Backslashes go first so the escapes added for quotes are not doubled.
pub fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Build the `q` parameter selecting the children of a folder
fn children_query(parent_id: &str, name: Option<&str>) -> String {
    let parent = escape_query_value(parent_id);
    match name {
        Some(name) => format!(
            "name = '{}' and '{}' in parents and trashed = false",
            escape_query_value(name),
            parent
        ),
        None => format!("'{}' in parents and trashed = false", parent),
    }
}

/// Map a Drive API error, keeping "not found" distinguishable
fn map_drive_error(err: google_drive3::Error, context: &str) -> GatewayError {
    let message = err.to_string();
    if message.contains("404") || message.contains("notFound") {
        GatewayError::NotFound(context.to_string())
    } else {
        GatewayError::Backend(format!("Drive API error ({}): {}", context, message))
    }
}

/// Convert a Google Drive File to our ObjectMetadata
fn file_to_metadata(file: File) -> Result<ObjectMetadata> {
    let id = file
        .id
        .ok_or_else(|| GatewayError::Backend("File has no ID".to_string()))?;

    let kind = match file.mime_type.as_deref() {
        Some(FOLDER_MIME_TYPE) => ObjectKind::Folder,
        _ => ObjectKind::File,
    };

    let size = match kind {
        ObjectKind::Folder => 0,
        // size is Option<i64> in the API
        ObjectKind::File => file.size.unwrap_or(0).max(0) as u64,
    };

    Ok(ObjectMetadata {
        id,
        name: file.name.unwrap_or_default(),
        kind,
        size,
        modified_time: file.modified_time,
        created_time: file.created_time,
        parents: file.parents.unwrap_or_default(),
    })
}

/// Google Drive backed object store
pub struct DriveStore {
    hub: DriveClient,
}

impl DriveStore {
    /// Create a store that authenticates every call through `auth`
    pub fn new(auth: TokenProviderWrapper) -> Result<Self> {
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|e| GatewayError::Backend(format!("Failed to load TLS roots: {}", e)))?
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();

        let client =
            hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
                .build(https);

        Ok(Self {
            hub: DriveHub::new(client, auth),
        })
    }
}

#[async_trait]
impl ObjectStore for DriveStore {
    async fn list_children(
        &self,
        parent_id: &str,
        name: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ObjectMetadata>> {
        let query = children_query(parent_id, name);
        trace!("list_children: q={}", query);

        let mut objects = Vec::new();
        let mut page_token: Option<String> = None;

        while objects.len() < limit {
            let page_size = (limit - objects.len()).min(MAX_PAGE_SIZE) as i32;
            let mut request = self
                .hub
                .files()
                .list()
                .q(&query)
                .add_scope(Scope::Full)
                .param("fields", LIST_FIELDS)
                .page_size(page_size);

            if let Some(token) = page_token.take() {
                request = request.page_token(&token);
            }

            let (_, list) = request
                .doit()
                .await
                .map_err(|e| map_drive_error(e, parent_id))?;

            for file in list.files.unwrap_or_default() {
                objects.push(file_to_metadata(file)?);
            }

            page_token = list.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        objects.truncate(limit);
        Ok(objects)
    }

    async fn get_metadata(&self, id: &str) -> Result<ObjectMetadata> {
        let (_, file) = self
            .hub
            .files()
            .get(id)
            .add_scope(Scope::Full)
            .param("fields", FILE_FIELDS)
            .doit()
            .await
            .map_err(|e| map_drive_error(e, id))?;

        file_to_metadata(file)
    }

    async fn download(&self, id: &str) -> Result<ByteStream> {
        debug!("download: {}", id);

        let (response, _) = self
            .hub
            .files()
            .get(id)
            .add_scope(Scope::Full)
            .param("alt", "media")
            .doit()
            .await
            .map_err(|e| map_drive_error(e, id))?;

        let mut body = response.into_body();
        Ok(Box::pin(try_stream! {
            while let Some(frame) = body.frame().await {
                let frame = frame.map_err(|e| {
                    GatewayError::Backend(format!("Failed to read response body: {}", e))
                })?;
                if let Ok(chunk) = frame.into_data() {
                    yield chunk;
                }
            }
        }))
    }

    async fn create_object(
        &self,
        parent_id: &str,
        name: &str,
        kind: ObjectKind,
        content: Option<Bytes>,
    ) -> Result<String> {
        debug!("create_object: {} under {} ({:?})", name, parent_id, kind);

        let mut metadata = File {
            name: Some(name.to_string()),
            parents: Some(vec![parent_id.to_string()]),
            ..Default::default()
        };

        let created = match kind {
            ObjectKind::Folder => {
                // Folders are created through an empty upload; the MIME type
                // in the metadata is what makes it a folder
                let folder_mime = folder_mime()?;
                metadata.mime_type = Some(FOLDER_MIME_TYPE.to_string());
                self.hub
                    .files()
                    .create(metadata)
                    .add_scope(Scope::Full)
                    .param("fields", "id")
                    .upload(Cursor::new(Vec::<u8>::new()), folder_mime)
                    .await
            }
            ObjectKind::File => {
                let cursor = Cursor::new(content.unwrap_or_default());
                self.hub
                    .files()
                    .create(metadata)
                    .add_scope(Scope::Full)
                    .param("fields", "id")
                    .upload(cursor, mime::APPLICATION_OCTET_STREAM)
                    .await
            }
        };

        let (_, file) = created.map_err(|e| map_drive_error(e, name))?;
        file.id
            .ok_or_else(|| GatewayError::Backend("Created file has no ID".to_string()))
    }

    async fn update_content(&self, id: &str, content: Bytes) -> Result<()> {
        debug!("update_content: {} size={}", id, content.len());

        self.hub
            .files()
            .update(File::default(), id)
            .add_scope(Scope::Full)
            .upload(Cursor::new(content), mime::APPLICATION_OCTET_STREAM)
            .await
            .map_err(|e| map_drive_error(e, id))?;

        Ok(())
    }

    async fn update_metadata(&self, id: &str, patch: MetadataPatch) -> Result<()> {
        debug!("update_metadata: {} {:?}", id, patch);

        let update = File {
            name: patch.name,
            ..Default::default()
        };

        self.hub
            .files()
            .update(update, id)
            .add_scope(Scope::Full)
            .doit_without_upload()
            .await
            .map_err(|e| map_drive_error(e, id))?;

        Ok(())
    }

    async fn delete_object(&self, id: &str) -> Result<()> {
        debug!("delete_object: {}", id);

        self.hub
            .files()
            .delete(id)
            .add_scope(Scope::Full)
            .doit()
            .await
            .map_err(|e| map_drive_error(e, id))?;

        Ok(())
    }
}

fn folder_mime() -> Result<mime::Mime> {
    FOLDER_MIME_TYPE
        .parse()
        .map_err(|e| GatewayError::Backend(format!("Invalid folder MIME type: {}", e)))
}
