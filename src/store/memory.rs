//! In-process object store
//!
//! Keeps the whole object graph in a concurrent map. It honors the same
//! contract as the Drive store (parent links, trash-free listing, native
//! insertion order) so the adapter can run against it unchanged, both in
//! tests and for local runs without Google credentials.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use futures::stream;
use tracing::trace;

use crate::error::{GatewayError, Result};
use crate::store::{ByteStream, MetadataPatch, ObjectKind, ObjectMetadata, ObjectStore};

/// Chunk size used when streaming content back out
const DOWNLOAD_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct StoredObject {
    metadata: ObjectMetadata,
    content: Bytes,
    /// Creation sequence number, used to keep listings in insertion order
    seq: u64,
}

/// In-memory object store
pub struct MemoryStore {
    root_id: String,
    objects: DashMap<String, StoredObject>,
    next_id: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store whose root folder has ID `root_id`
    pub fn new(root_id: impl Into<String>) -> Self {
        let root_id = root_id.into();
        let objects = DashMap::new();
        let now = Utc::now();
        objects.insert(
            root_id.clone(),
            StoredObject {
                metadata: ObjectMetadata {
                    id: root_id.clone(),
                    name: "/".to_string(),
                    kind: ObjectKind::Folder,
                    size: 0,
                    modified_time: Some(now),
                    created_time: Some(now),
                    parents: Vec::new(),
                },
                content: Bytes::new(),
                seq: 0,
            },
        );

        Self {
            root_id,
            objects,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    /// Number of objects, including the root
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.len() <= 1
    }

    fn get(&self, id: &str) -> Result<StoredObject> {
        self.objects
            .get(id)
            .map(|o| o.clone())
            .ok_or_else(|| GatewayError::NotFound(format!("Object not found: {}", id)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("root")
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_children(
        &self,
        parent_id: &str,
        name: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ObjectMetadata>> {
        trace!("list_children: parent={} name={:?}", parent_id, name);

        let mut children: Vec<(u64, ObjectMetadata)> = self
            .objects
            .iter()
            .filter(|o| o.metadata.parents.iter().any(|p| p == parent_id))
            .filter(|o| name.map_or(true, |n| o.metadata.name == n))
            .map(|o| (o.seq, o.metadata.clone()))
            .collect();

        children.sort_by_key(|(seq, _)| *seq);
        Ok(children
            .into_iter()
            .take(limit)
            .map(|(_, meta)| meta)
            .collect())
    }

    async fn get_metadata(&self, id: &str) -> Result<ObjectMetadata> {
        Ok(self.get(id)?.metadata)
    }

    async fn download(&self, id: &str) -> Result<ByteStream> {
        let content = self.get(id)?.content;
        let chunks: Vec<Result<Bytes>> = (0..content.len())
            .step_by(DOWNLOAD_CHUNK_SIZE)
            .map(|start| {
                let end = (start + DOWNLOAD_CHUNK_SIZE).min(content.len());
                Ok(content.slice(start..end))
            })
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn create_object(
        &self,
        parent_id: &str,
        name: &str,
        kind: ObjectKind,
        content: Option<Bytes>,
    ) -> Result<String> {
        let parent = self.get(parent_id)?;
        if !parent.metadata.is_folder() {
            return Err(GatewayError::Backend(format!(
                "Parent is not a folder: {}",
                parent_id
            )));
        }

        let seq = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = format!("mem-{:08}", seq);
        let content = match kind {
            ObjectKind::Folder => Bytes::new(),
            ObjectKind::File => content.unwrap_or_default(),
        };
        let now = Utc::now();

        self.objects.insert(
            id.clone(),
            StoredObject {
                metadata: ObjectMetadata {
                    id: id.clone(),
                    name: name.to_string(),
                    kind,
                    size: content.len() as u64,
                    modified_time: Some(now),
                    created_time: Some(now),
                    parents: vec![parent_id.to_string()],
                },
                content,
                seq,
            },
        );

        Ok(id)
    }

    async fn update_content(&self, id: &str, content: Bytes) -> Result<()> {
        let mut object = self
            .objects
            .get_mut(id)
            .ok_or_else(|| GatewayError::NotFound(format!("Object not found: {}", id)))?;

        if object.metadata.is_folder() {
            return Err(GatewayError::Backend(format!(
                "Cannot upload content to a folder: {}",
                id
            )));
        }

        object.metadata.size = content.len() as u64;
        object.metadata.modified_time = Some(Utc::now());
        object.content = content;
        Ok(())
    }

    async fn update_metadata(&self, id: &str, patch: MetadataPatch) -> Result<()> {
        let mut object = self
            .objects
            .get_mut(id)
            .ok_or_else(|| GatewayError::NotFound(format!("Object not found: {}", id)))?;

        if let Some(name) = patch.name {
            object.metadata.name = name;
        }
        object.metadata.modified_time = Some(Utc::now());
        Ok(())
    }

    async fn delete_object(&self, id: &str) -> Result<()> {
        if id == self.root_id {
            return Err(GatewayError::PermissionDenied);
        }
        if self.objects.remove(id).is_none() {
            return Err(GatewayError::NotFound(format!("Object not found: {}", id)));
        }

        // Drive deletes folders together with their descendants
        let mut pending = vec![id.to_string()];
        while let Some(parent) = pending.pop() {
            let children: Vec<String> = self
                .objects
                .iter()
                .filter(|o| o.metadata.parents.contains(&parent))
                .map(|o| o.key().clone())
                .collect();
            for child in children {
                self.objects.remove(&child);
                pending.push(child);
            }
        }
        Ok(())
    }
}
