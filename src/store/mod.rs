pub mod gdrive;
pub mod memory;
pub mod timeout;

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;

use crate::error::Result;

/// Object type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    File,
    Folder,
}

/// Metadata for a remote object
#[derive(Debug, Clone)]
pub struct ObjectMetadata {
    pub id: String,
    pub name: String,
    pub kind: ObjectKind,
    /// Content length in bytes; folders report 0
    pub size: u64,
    pub modified_time: Option<DateTime<Utc>>,
    pub created_time: Option<DateTime<Utc>>,
    pub parents: Vec<String>,
}

impl ObjectMetadata {
    pub fn is_folder(&self) -> bool {
        matches!(self.kind, ObjectKind::Folder)
    }
}

/// Fields changed by `update_metadata`. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct MetadataPatch {
    pub name: Option<String>,
}

impl MetadataPatch {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}

/// Stream type for downloaded content
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Primitive operations against a flat, ID-addressed object store.
///
/// Objects are linked to their folders by parent IDs; there is no notion of
/// a path at this level. Implementations report a missing object as
/// `GatewayError::NotFound` and every other remote failure as
/// `GatewayError::Backend`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List non-trashed children of `parent_id`.
    ///
    /// With `name` set only children carrying exactly that name are returned.
    /// At most `limit` results come back, in the store's native order.
    async fn list_children(
        &self,
        parent_id: &str,
        name: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ObjectMetadata>>;

    /// Fetch metadata for a single object
    async fn get_metadata(&self, id: &str) -> Result<ObjectMetadata>;

    /// Stream the content of a file object
    async fn download(&self, id: &str) -> Result<ByteStream>;

    /// Create a new object under `parent_id` and return its ID
    async fn create_object(
        &self,
        parent_id: &str,
        name: &str,
        kind: ObjectKind,
        content: Option<Bytes>,
    ) -> Result<String>;

    /// Replace the content of an existing file object
    async fn update_content(&self, id: &str, content: Bytes) -> Result<()>;

    /// Update object metadata in place
    async fn update_metadata(&self, id: &str, patch: MetadataPatch) -> Result<()>;

    /// Delete an object
    async fn delete_object(&self, id: &str) -> Result<()>;
}
