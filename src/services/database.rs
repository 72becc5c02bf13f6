use crate::config::Config;
use crate::error::{AppError, Result};
use crate::store::{Document, DocumentStore, FieldOp, MemoryStore, Query, SurrealStore};
use crate::utils::serde_helpers::format_timestamp;
use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info};

/// 数据库服务
#[derive(Clone)]
pub struct Database {
    store: Arc<dyn DocumentStore>,
    pub config: Config,
}

impl Database {
    /// 创建新的数据库实例
    pub async fn new(config: &Config) -> Result<Self> {
        let store: Arc<dyn DocumentStore> = if config.uses_memory_store() {
            info!("Using in-memory document store");
            Arc::new(MemoryStore::new())
        } else {
            info!("Initializing database connection to {}", config.database_url);
            Arc::new(SurrealStore::connect(config).await?)
        };

        Ok(Self::with_store(store, config))
    }

    pub fn with_store(store: Arc<dyn DocumentStore>, config: &Config) -> Self {
        Self {
            store,
            config: config.clone(),
        }
    }

    /// 验证数据库连接
    pub async fn verify_connection(&self) -> Result<()> {
        match self.store.ping().await {
            Ok(_) => {
                info!("Database connection verified successfully");
                Ok(())
            }
            Err(e) => {
                error!("Failed to verify database connection: {}", e);
                Err(e.into())
            }
        }
    }

    /// 创建记录
    pub async fn create<T>(&self, table: &str, data: T) -> Result<T>
    where
        T: Serialize + Send + Sync,
    {
        let doc = to_document(&data)?;
        self.store.insert(table, vec![doc]).await?;
        Ok(data)
    }

    /// 批量创建记录，整批写入
    pub async fn insert_many<T>(&self, table: &str, items: &[T]) -> Result<usize>
    where
        T: Serialize + Send + Sync,
    {
        let docs = items.iter().map(to_document).collect::<Result<Vec<_>>>()?;
        Ok(self.store.insert(table, docs).await?)
    }

    /// 通过ID获取单个记录
    pub async fn get_by_id<T>(&self, table: &str, id: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        debug!("Fetching {}:{}", table, id);
        match self.store.get(table, id).await? {
            Some(doc) => Ok(Some(from_document(doc)?)),
            None => Ok(None),
        }
    }

    /// 条件查询
    pub async fn find<T>(&self, query: &Query) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        self.store
            .find(query)
            .await?
            .into_iter()
            .map(from_document)
            .collect()
    }

    /// 查找单个记录
    pub async fn find_one<T>(&self, query: Query) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        let mut rows = self.find(&query.limit(1)).await?;
        Ok(if rows.is_empty() { None } else { Some(rows.remove(0)) })
    }

    pub async fn count(&self, query: &Query) -> Result<usize> {
        Ok(self.store.count(query).await?)
    }

    /// 分页查询
    pub async fn paginate<T>(&self, query: Query, page: usize, per_page: usize) -> Result<PaginatedResult<T>>
    where
        T: DeserializeOwned,
    {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let total = self.count(&query.unpaged()).await?;
        let data = self
            .find(&query.skip((page - 1) * per_page).limit(per_page))
            .await?;

        Ok(PaginatedResult::new(data, total, page, per_page))
    }

    /// 通过ID使用JSON数据更新记录并返回指定类型
    pub async fn update_by_id_with_json<T>(&self, table: &str, id: &str, updates: Value) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        let patch = match updates {
            Value::Object(map) => map,
            _ => return Err(AppError::Internal("Update payload must be an object".to_string())),
        };
        match self.store.merge(table, id, patch).await? {
            Some(doc) => Ok(Some(from_document(doc)?)),
            None => Ok(None),
        }
    }

    /// 更新并刷新 `updated_at`
    pub async fn touch_by_id<T>(&self, table: &str, id: &str, mut updates: Value) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        if let Value::Object(map) = &mut updates {
            map.insert("updated_at".into(), Value::String(format_timestamp(&Utc::now())));
        }
        self.update_by_id_with_json(table, id, updates).await
    }

    /// 原子地执行数组/计数器操作并刷新 `updated_at`
    pub async fn apply_ops<T>(&self, table: &str, id: &str, mut ops: Vec<FieldOp>) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        ops.push(FieldOp::set("updated_at", format_timestamp(&Utc::now())));
        match self.store.apply(table, id, ops).await? {
            Some(doc) => Ok(Some(from_document(doc)?)),
            None => Ok(None),
        }
    }

    /// 批量更新所有匹配的记录
    pub async fn update_where(&self, query: &Query, updates: Value) -> Result<usize> {
        let patch = match updates {
            Value::Object(map) => map,
            _ => return Err(AppError::Internal("Update payload must be an object".to_string())),
        };
        let updated = self.store.update_where(query, patch).await?;
        debug!("Updated {} records in {}", updated, query.table);
        Ok(updated)
    }
}

fn to_document<T: Serialize>(data: &T) -> Result<Document> {
    match serde_json::to_value(data)? {
        Value::Object(map) => Ok(map),
        _ => Err(AppError::Internal("Record must serialize to an object".to_string())),
    }
}

fn from_document<T: DeserializeOwned>(doc: Document) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}

/// 分页结果结构
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PaginatedResult<T> {
    pub data: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub total_pages: usize,
}

impl<T> PaginatedResult<T> {
    pub fn new(data: Vec<T>, total: usize, page: usize, per_page: usize) -> Self {
        let total_pages = if per_page == 0 { 0 } else { (total + per_page - 1) / per_page };
        Self {
            data,
            total,
            page,
            per_page,
            total_pages,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PaginatedResult<U> {
        PaginatedResult {
            data: self.data.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
            total_pages: self.total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Row {
        id: String,
        n: u32,
        read: bool,
    }

    #[tokio::test]
    async fn test_database_connection() {
        let config = Config::default();
        let db = Database::new(&config).await;
        assert!(db.is_ok());
        assert!(db.unwrap().verify_connection().await.is_ok());
    }

    #[tokio::test]
    async fn paginates_and_merges_typed_records() {
        let db = Database::new(&Config::default()).await.unwrap();
        let rows: Vec<Row> = (0..7)
            .map(|n| Row { id: format!("r{}", n), n, read: false })
            .collect();
        assert_eq!(db.insert_many("row", &rows).await.unwrap(), 7);

        let page: PaginatedResult<Row> = db
            .paginate(Query::table("row").sort_desc("n"), 2, 3)
            .await
            .unwrap();
        assert_eq!(page.total, 7);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.data.iter().map(|r| r.n).collect::<Vec<_>>(), vec![3, 2, 1]);

        let updated: Row = db
            .update_by_id_with_json("row", "r1", json!({ "read": true }))
            .await
            .unwrap()
            .unwrap();
        assert!(updated.read);
        assert_eq!(updated.n, 1);
    }
}
