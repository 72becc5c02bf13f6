use std::time::Duration;

use async_trait::async_trait;

use super::{Document, DocumentStore, FieldOp, Query, StoreResult};

/// 每次调用前休眠一段时间，让并发请求在读写之间交错
pub struct SlowStore<S> {
    inner: S,
    delay: Duration,
}

impl<S> SlowStore<S> {
    pub fn new(inner: S, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl<S: DocumentStore> DocumentStore for SlowStore<S> {
    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }

    async fn insert(&self, table: &str, docs: Vec<Document>) -> StoreResult<usize> {
        tokio::time::sleep(self.delay).await;
        self.inner.insert(table, docs).await
    }

    async fn get(&self, table: &str, id: &str) -> StoreResult<Option<Document>> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(table, id).await
    }

    async fn find(&self, query: &Query) -> StoreResult<Vec<Document>> {
        tokio::time::sleep(self.delay).await;
        self.inner.find(query).await
    }

    async fn count(&self, query: &Query) -> StoreResult<usize> {
        self.inner.count(query).await
    }

    async fn merge(&self, table: &str, id: &str, patch: Document) -> StoreResult<Option<Document>> {
        tokio::time::sleep(self.delay).await;
        self.inner.merge(table, id, patch).await
    }

    async fn apply(&self, table: &str, id: &str, ops: Vec<FieldOp>) -> StoreResult<Option<Document>> {
        tokio::time::sleep(self.delay).await;
        self.inner.apply(table, id, ops).await
    }

    async fn update_where(&self, query: &Query, patch: Document) -> StoreResult<usize> {
        tokio::time::sleep(self.delay).await;
        self.inner.update_where(query, patch).await
    }
}
