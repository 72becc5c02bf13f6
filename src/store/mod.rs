//! 文档存储抽象
//!
//! 业务服务只依赖 [`DocumentStore`]，具体后端由 `DATABASE_URL` 决定：
//! `memory` 使用进程内存储（开发与测试），其余地址连接 SurrealDB。

pub mod memory;
pub mod surreal;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::utils::serde_helpers::format_timestamp;

pub use memory::MemoryStore;
pub use surreal::SurrealStore;

/// 存储中的一条文档，`id` 字段即记录主键
pub type Document = Map<String, Value>;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SurrealDB error: {0}")]
    Surreal(#[from] surrealdb::Error),

    #[error("Duplicate record {table}:{id}")]
    Duplicate { table: String, id: String },

    #[error("Document is missing an id")]
    MissingId,

    #[error("Backend error: {0}")]
    Backend(String),
}

/// 查询条件
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(String, Value),
    Ne(String, Value),
    In(String, Vec<Value>),
    NotIn(String, Vec<Value>),
    /// 数组字段包含某个值
    Contains(String, Value),
    /// 时间字段 >= 给定时刻
    Since(String, DateTime<Utc>),
    /// 时间字段 < 给定时刻
    Before(String, DateTime<Utc>),
    /// 大小写不敏感的子串匹配，数组字段匹配任一元素
    TextContains(String, String),
    Any(Vec<Condition>),
}

impl Condition {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::Eq(field.to_string(), value.into())
    }

    pub fn ne(field: &str, value: impl Into<Value>) -> Self {
        Self::Ne(field.to_string(), value.into())
    }

    pub fn is_in<I, V>(field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::In(field.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn not_in<I, V>(field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::NotIn(field.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn contains(field: &str, value: impl Into<Value>) -> Self {
        Self::Contains(field.to_string(), value.into())
    }

    pub fn since(field: &str, at: DateTime<Utc>) -> Self {
        Self::Since(field.to_string(), at)
    }

    pub fn before(field: &str, at: DateTime<Utc>) -> Self {
        Self::Before(field.to_string(), at)
    }

    pub fn text_contains(field: &str, term: &str) -> Self {
        Self::TextContains(field.to_string(), term.to_lowercase())
    }

    /// 时间条件统一使用固定精度的字符串比较
    pub(crate) fn timestamp_value(at: &DateTime<Utc>) -> Value {
        Value::String(format_timestamp(at))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// 单表查询
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub conditions: Vec<Condition>,
    pub sort: Option<(String, SortOrder)>,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl Query {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            conditions: Vec::new(),
            sort: None,
            skip: 0,
            limit: None,
        }
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(Condition::eq(field, value))
    }

    /// 排除软删除的文档
    pub fn not_deleted(self) -> Self {
        self.eq("deleted", false)
    }

    pub fn sort_asc(mut self, field: &str) -> Self {
        self.sort = Some((field.to_string(), SortOrder::Asc));
        self
    }

    pub fn sort_desc(mut self, field: &str) -> Self {
        self.sort = Some((field.to_string(), SortOrder::Desc));
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// 去掉排序与分页，用于计数
    pub fn unpaged(&self) -> Self {
        Self {
            table: self.table.clone(),
            conditions: self.conditions.clone(),
            sort: None,
            skip: 0,
            limit: None,
        }
    }
}

/// 单条记录上的字段操作；一次 [`DocumentStore::apply`] 中的操作整体生效，
/// 不会与其他写入者交错
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Set(String, Value),
    /// 数组中不存在该值时追加到末尾
    AddToSet(String, Value),
    /// 移除数组中所有相同的值
    Pull(String, Value),
    Increment(String, i64),
}

impl FieldOp {
    pub fn set(field: &str, value: impl Into<Value>) -> Self {
        Self::Set(field.to_string(), value.into())
    }

    pub fn add_to_set(field: &str, value: impl Into<Value>) -> Self {
        Self::AddToSet(field.to_string(), value.into())
    }

    pub fn pull(field: &str, value: impl Into<Value>) -> Self {
        Self::Pull(field.to_string(), value.into())
    }

    pub fn increment(field: &str, by: i64) -> Self {
        Self::Increment(field.to_string(), by)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// 连接检查
    async fn ping(&self) -> StoreResult<()>;

    /// 批量插入；任一文档失败则整批不写入
    async fn insert(&self, table: &str, docs: Vec<Document>) -> StoreResult<usize>;

    async fn get(&self, table: &str, id: &str) -> StoreResult<Option<Document>>;

    async fn find(&self, query: &Query) -> StoreResult<Vec<Document>>;

    async fn count(&self, query: &Query) -> StoreResult<usize>;

    /// 浅合并字段，文档不存在时返回 `None`
    async fn merge(&self, table: &str, id: &str, patch: Document) -> StoreResult<Option<Document>>;

    /// 原子地应用字段操作，文档不存在时返回 `None`
    async fn apply(&self, table: &str, id: &str, ops: Vec<FieldOp>) -> StoreResult<Option<Document>>;

    /// 对所有匹配的文档合并字段，返回更新数量
    async fn update_where(&self, query: &Query, patch: Document) -> StoreResult<usize>;
}

pub(crate) fn document_id(doc: &Document) -> StoreResult<String> {
    match doc.get("id") {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        _ => Err(StoreError::MissingId),
    }
}
