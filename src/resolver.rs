//! Path to object resolution
//!
//! The store only knows objects by ID and their parent links, so a path is
//! resolved by walking it one segment at a time from the root folder,
//! asking the store for the child with that name under the current parent.
//! Every resolved prefix is remembered in the [`ResolutionCache`].

use std::sync::Arc;
use std::time::SystemTime;

use tracing::trace;

use crate::cache::ResolutionCache;
use crate::error::{GatewayError, Result};
use crate::path;
use crate::store::{ObjectMetadata, ObjectStore};

/// Default bound on the number of segments in a resolvable path
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// A path that has been mapped onto a remote object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedNode {
    pub id: String,
    pub name: String,
    pub is_dir: bool,
    /// Content size in bytes, 0 for directories
    pub size: u64,
    pub modified_at: SystemTime,
    pub parent_id: String,
}

impl ResolvedNode {
    /// Build a node from store metadata found under `parent_id`.
    ///
    /// The timestamp prefers the modification time, then the creation
    /// time, then the current time.
    pub fn from_metadata(meta: ObjectMetadata, parent_id: &str) -> Self {
        let modified_at = meta
            .modified_time
            .or(meta.created_time)
            .map(SystemTime::from)
            .unwrap_or_else(SystemTime::now);
        let is_dir = meta.is_folder();

        Self {
            id: meta.id,
            name: meta.name,
            is_dir,
            size: if is_dir { 0 } else { meta.size },
            modified_at,
            parent_id: parent_id.to_string(),
        }
    }
}

/// Resolves slash-separated paths against an [`ObjectStore`]
pub struct PathResolver {
    store: Arc<dyn ObjectStore>,
    cache: Arc<ResolutionCache>,
    root_id: String,
    /// Reported for the root, which has no remote metadata to read
    root_modified_at: SystemTime,
    max_depth: usize,
}

impl PathResolver {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        cache: Arc<ResolutionCache>,
        root_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            cache,
            root_id: root_id.into(),
            root_modified_at: SystemTime::now(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    /// Synthetic node for the root folder; never fetched remotely
    pub fn root_node(&self) -> ResolvedNode {
        ResolvedNode {
            id: self.root_id.clone(),
            name: "/".to_string(),
            is_dir: true,
            size: 0,
            modified_at: self.root_modified_at,
            parent_id: self.root_id.clone(),
        }
    }

    /// Resolve a path to its node, or `GatewayError::NotFound`
    pub async fn resolve(&self, raw_path: &str) -> Result<ResolvedNode> {
        let generation = self.cache.generation();
        let segments = path::segments(raw_path);
        if segments.is_empty() {
            return Ok(self.root_node());
        }
        if segments.len() > self.max_depth {
            return Err(GatewayError::InvalidPath(format!(
                "Path exceeds {} segments: {}",
                self.max_depth, raw_path
            )));
        }

        let full_path = path::normalize(raw_path);
        if let Some(node) = self.cache.get(&full_path) {
            trace!("resolve: cache hit {}", full_path);
            return Ok(node);
        }

        let mut current = self.root_node();
        let mut prefix = String::with_capacity(full_path.len());

        for segment in segments {
            if !current.is_dir {
                return Err(GatewayError::NotFound(full_path));
            }

            prefix.push('/');
            prefix.push_str(segment);

            if let Some(node) = self.cache.get(&prefix) {
                current = node;
                continue;
            }

            trace!("resolve: lookup {:?} under {}", segment, current.id);
            let found = self
                .store
                .list_children(&current.id, Some(segment), 1)
                .await?;

            // Duplicate sibling names are possible remotely; first match wins
            let meta = found
                .into_iter()
                .next()
                .ok_or_else(|| GatewayError::NotFound(full_path.clone()))?;

            let node = ResolvedNode::from_metadata(meta, &current.id);
            self.cache.put_if_current(&prefix, node.clone(), generation);
            current = node;
        }

        Ok(current)
    }

    /// Resolve the parent folder of a path and return it with the leaf name
    pub async fn resolve_parent(&self, raw_path: &str) -> Result<(ResolvedNode, String)> {
        let (parent_path, leaf) = path::split_parent(raw_path)
            .ok_or_else(|| GatewayError::InvalidPath("Root has no parent".to_string()))?;

        let parent = self.resolve(&parent_path).await?;
        if !parent.is_dir {
            return Err(GatewayError::NotADirectory(parent_path));
        }
        Ok((parent, leaf))
    }
}
