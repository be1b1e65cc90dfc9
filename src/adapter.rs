//! Path-based filesystem façade over an ID-addressed object store
//!
//! The protocol layer calls one method per command. Every method resolves
//! its path(s) through the [`PathResolver`], talks to the [`ObjectStore`]
//! and, when it mutates anything, invalidates the affected cache entries
//! before returning.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::cache::{ResolutionCache, DEFAULT_TTL};
use crate::error::{GatewayError, Result};
use crate::path;
use crate::resolver::{PathResolver, ResolvedNode, DEFAULT_MAX_DEPTH};
use crate::store::{ByteStream, MetadataPatch, ObjectKind, ObjectStore};

/// Default cap on the number of entries returned by one listing
pub const DEFAULT_MAX_LIST_ENTRIES: usize = 10_000;

/// Tunables for the adapter
#[derive(Debug, Clone)]
pub struct AdapterOptions {
    /// ID of the remote folder mapped to `/`
    pub root_id: String,
    /// Resolution cache TTL; zero disables the cache
    pub cache_ttl: Duration,
    pub max_depth: usize,
    pub max_list_entries: usize,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            root_id: "root".to_string(),
            cache_ttl: DEFAULT_TTL,
            max_depth: DEFAULT_MAX_DEPTH,
            max_list_entries: DEFAULT_MAX_LIST_ENTRIES,
        }
    }
}

/// Result of `stat`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub name: String,
    pub id: String,
    pub size: u64,
    pub mtime: SystemTime,
    pub is_dir: bool,
}

impl From<ResolvedNode> for FileStat {
    fn from(node: ResolvedNode) -> Self {
        Self {
            name: node.name,
            id: node.id,
            size: node.size,
            mtime: node.modified_at,
            is_dir: node.is_dir,
        }
    }
}

/// Filesystem operations over a remote object store.
///
/// Holds no per-call state; one instance is shared by every session.
pub struct FilesystemAdapter {
    store: Arc<dyn ObjectStore>,
    cache: Arc<ResolutionCache>,
    resolver: PathResolver,
    max_list_entries: usize,
}

impl FilesystemAdapter {
    pub fn new(store: Arc<dyn ObjectStore>, options: AdapterOptions) -> Self {
        let cache = Arc::new(ResolutionCache::new(options.cache_ttl));
        let resolver = PathResolver::new(store.clone(), cache.clone(), options.root_id)
            .with_max_depth(options.max_depth);

        Self {
            store,
            cache,
            resolver,
            max_list_entries: options.max_list_entries,
        }
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }

    /// Get metadata for a path
    pub async fn stat(&self, path: &str) -> Result<FileStat> {
        Ok(self.resolver.resolve(path).await?.into())
    }

    /// List a directory in the store's native order.
    ///
    /// A missing path or a file yields an empty listing. Listings longer
    /// than the configured cap are truncated.
    pub async fn list_directory(&self, path: &str) -> Result<Vec<ResolvedNode>> {
        let generation = self.cache.generation();
        let dir = match self.resolver.resolve(path).await {
            Ok(node) if node.is_dir => node,
            Ok(_) => return Ok(Vec::new()),
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut children = self
            .store
            .list_children(&dir.id, None, self.max_list_entries.saturating_add(1))
            .await?;

        if children.len() > self.max_list_entries {
            warn!(
                "Listing of {} truncated to {} entries",
                path, self.max_list_entries
            );
            children.truncate(self.max_list_entries);
        }

        let nodes: Vec<ResolvedNode> = children
            .into_iter()
            .map(|meta| ResolvedNode::from_metadata(meta, &dir.id))
            .collect();
        self.warm_cache(path, &nodes, generation);
        Ok(nodes)
    }

    /// Seed the resolution cache from a listing. Only the first of several
    /// same-named siblings is what a lookup would pick. Nothing is seeded
    /// if a mutation invalidated the cache while the listing was in flight.
    fn warm_cache(&self, dir_path: &str, nodes: &[ResolvedNode], generation: u64) {
        let base = path::normalize(dir_path);
        let mut seen = HashSet::new();
        for node in nodes {
            if seen.insert(node.name.as_str())
                && !self
                    .cache
                    .put_if_current(&path::join(&base, &node.name), node.clone(), generation)
            {
                return;
            }
        }
    }

    /// Open a file for streaming. Directories yield an empty stream.
    pub async fn read_file(&self, path: &str) -> Result<ByteStream> {
        let node = self.resolver.resolve(path).await?;
        if node.is_dir {
            return Ok(Box::pin(futures::stream::empty::<Result<Bytes>>()));
        }
        self.store.download(&node.id).await
    }

    /// Write a whole file, updating it when it exists and creating it
    /// under its parent folder otherwise.
    pub async fn write_file(&self, path: &str, content: Bytes) -> Result<()> {
        let target = path::normalize(path);
        let (parent, leaf) = self.resolver.resolve_parent(&target).await?;
        debug!("write_file: {} ({} bytes)", target, content.len());

        let existing = match self.resolver.resolve(&target).await {
            Ok(node) if node.is_dir => return Err(GatewayError::IsADirectory(target)),
            Ok(node) => Some(node),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        let result = match existing {
            Some(node) => match self.store.update_content(&node.id, content.clone()).await {
                // Cached node was deleted behind our back; fall through to create
                Err(e) if e.is_not_found() => {
                    debug!("write_file: {} vanished remotely, recreating", target);
                    self.cache.invalidate(&target);
                    self.create_file(&parent, &leaf, content).await
                }
                other => other,
            },
            None => self.create_file(&parent, &leaf, content).await,
        };

        self.cache.invalidate(&target);
        result
    }

    async fn create_file(&self, parent: &ResolvedNode, leaf: &str, content: Bytes) -> Result<()> {
        self.store
            .create_object(&parent.id, leaf, ObjectKind::File, Some(content))
            .await
            .map(|_| ())
    }

    /// Delete a file or an empty directory
    pub async fn delete_file(&self, path: &str) -> Result<()> {
        let node = self.resolve_mutable(path).await?;
        self.delete_node(path, &node).await
    }

    /// Delete an empty directory
    pub async fn remove_directory(&self, path: &str) -> Result<()> {
        let node = self.resolve_mutable(path).await?;
        if !node.is_dir {
            return Err(GatewayError::NotADirectory(path::normalize(path)));
        }
        self.delete_node(path, &node).await
    }

    async fn delete_node(&self, path: &str, node: &ResolvedNode) -> Result<()> {
        debug!("delete: {} ({})", path, node.id);

        if node.is_dir {
            let children = self.store.list_children(&node.id, None, 1).await?;
            if !children.is_empty() {
                return Err(GatewayError::NotEmpty(path::normalize(path)));
            }
        }

        let result = self.store.delete_object(&node.id).await;
        self.cache.invalidate_prefix(path);
        result
    }

    /// Create a folder under an existing parent
    pub async fn create_directory(&self, path: &str) -> Result<()> {
        let target = path::normalize(path);
        let (parent, leaf) = self.resolver.resolve_parent(&target).await?;
        debug!("create_directory: {}", target);

        match self.resolver.resolve(&target).await {
            Ok(_) => return Err(GatewayError::AlreadyExists(target)),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let result = self
            .store
            .create_object(&parent.id, &leaf, ObjectKind::Folder, None)
            .await;
        self.cache.invalidate(&target);
        result.map(|_| ())
    }

    /// Rename in place.
    ///
    /// Only the leaf name of `new_path` is applied; the object stays in the
    /// folder it was found in even when `new_path` names another directory.
    ///
    /// The collision check and the rename are separate store calls. An
    /// object created under the new name in between leaves two siblings
    /// with that name; lookups then pick the first one the store returns.
    pub async fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        let node = self.resolve_mutable(old_path).await?;
        let (old_dir, old_leaf) = path::split_parent(old_path)
            .ok_or_else(|| GatewayError::InvalidPath(old_path.to_string()))?;
        let (new_dir, new_leaf) = path::split_parent(new_path)
            .ok_or_else(|| GatewayError::InvalidPath(new_path.to_string()))?;

        if new_dir != old_dir {
            warn!(
                "rename {} -> {}: keeping parent {}, only the name changes",
                old_path, new_path, old_dir
            );
        }
        if new_leaf == old_leaf {
            return Ok(());
        }

        let taken = self
            .store
            .list_children(&node.parent_id, Some(&new_leaf), 1)
            .await?;
        if !taken.is_empty() {
            return Err(GatewayError::AlreadyExists(path::join(&old_dir, &new_leaf)));
        }

        debug!("rename: {} ({}) -> {}", old_path, node.id, new_leaf);
        let result = self
            .store
            .update_metadata(&node.id, MetadataPatch::rename(new_leaf.clone()))
            .await;

        let renamed_path = path::join(&old_dir, &new_leaf);
        self.cache.invalidate_prefix(old_path);
        self.cache.invalidate(new_path);
        self.cache.invalidate_prefix(&renamed_path);
        result?;

        let generation = self.cache.generation();
        match self.store.get_metadata(&node.id).await {
            Ok(meta) => {
                self.cache.put_if_current(
                    &renamed_path,
                    ResolvedNode::from_metadata(meta, &node.parent_id),
                    generation,
                );
            }
            Err(e) => debug!("rename: could not refresh {}: {}", renamed_path, e),
        }
        Ok(())
    }

    /// Resolve a path that is about to be deleted or renamed
    async fn resolve_mutable(&self, path: &str) -> Result<ResolvedNode> {
        if path::is_root(path) {
            return Err(GatewayError::PermissionDenied);
        }
        self.resolver.resolve(path).await
    }
}
