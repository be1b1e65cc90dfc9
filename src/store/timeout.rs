//! Deadline layer for remote calls
//!
//! Wraps any [`ObjectStore`] and fails each primitive with
//! `GatewayError::Timeout` once it runs longer than the configured limit.
//! Downloads are bounded per chunk, so a stalled transfer fails while a
//! slow but steady one keeps going. Content uploads send the whole body in
//! one call and get their own, longer, limit.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tracing::warn;

use crate::error::{GatewayError, Result};
use crate::store::{ByteStream, MetadataPatch, ObjectKind, ObjectMetadata, ObjectStore};

/// Store decorator enforcing a per-call deadline
pub struct TimeoutStore<S: ObjectStore> {
    inner: Arc<S>,
    limit: Duration,
    upload_limit: Duration,
}

impl<S: ObjectStore> TimeoutStore<S> {
    /// Bound every call, uploads included, by `limit`
    pub fn new(store: S, limit: Duration) -> Self {
        Self {
            inner: Arc::new(store),
            limit,
            upload_limit: limit,
        }
    }

    /// Bound calls that carry file content by `upload_limit` instead
    pub fn with_upload_limit(mut self, upload_limit: Duration) -> Self {
        self.upload_limit = upload_limit;
        self
    }

    async fn bounded<T>(&self, op: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        within(self.limit, op, fut).await
    }

    async fn bounded_upload<T>(
        &self,
        op: &str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        within(self.upload_limit, op, fut).await
    }
}

async fn within<T>(limit: Duration, op: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!("{} exceeded {:?}", op, limit);
            Err(GatewayError::Timeout(limit))
        }
    }
}

#[async_trait]
impl<S: ObjectStore + 'static> ObjectStore for TimeoutStore<S> {
    async fn list_children(
        &self,
        parent_id: &str,
        name: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ObjectMetadata>> {
        self.bounded(
            "list_children",
            self.inner.list_children(parent_id, name, limit),
        )
        .await
    }

    async fn get_metadata(&self, id: &str) -> Result<ObjectMetadata> {
        self.bounded("get_metadata", self.inner.get_metadata(id)).await
    }

    async fn download(&self, id: &str) -> Result<ByteStream> {
        let stream = self.bounded("download", self.inner.download(id)).await?;
        let limit = self.limit;
        Ok(Box::pin(futures::stream::unfold(
            Some(stream),
            move |state| async move {
                let mut stream = state?;
                match tokio::time::timeout(limit, stream.next()).await {
                    Ok(Some(item)) => Some((item, Some(stream))),
                    Ok(None) => None,
                    Err(_) => {
                        warn!("download stalled for {:?}", limit);
                        Some((Err(GatewayError::Timeout(limit)), None))
                    }
                }
            },
        )))
    }

    async fn create_object(
        &self,
        parent_id: &str,
        name: &str,
        kind: ObjectKind,
        content: Option<Bytes>,
    ) -> Result<String> {
        let call = self.inner.create_object(parent_id, name, kind, content);
        match kind {
            ObjectKind::File => self.bounded_upload("create_object", call).await,
            ObjectKind::Folder => self.bounded("create_object", call).await,
        }
    }

    async fn update_content(&self, id: &str, content: Bytes) -> Result<()> {
        self.bounded_upload("update_content", self.inner.update_content(id, content))
            .await
    }

    async fn update_metadata(&self, id: &str, patch: MetadataPatch) -> Result<()> {
        self.bounded("update_metadata", self.inner.update_metadata(id, patch))
            .await
    }

    async fn delete_object(&self, id: &str) -> Result<()> {
        self.bounded("delete_object", self.inner.delete_object(id))
            .await
    }
}
