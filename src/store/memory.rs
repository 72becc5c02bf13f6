use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use super::{
    document_id, Condition, Document, DocumentStore, FieldOp, Query, SortOrder, StoreError, StoreResult,
};

/// 进程内文档存储，保持插入顺序
#[derive(Default)]
pub struct MemoryStore {
    tables: DashMap<String, Table>,
}

#[derive(Default)]
struct Table {
    rows: Vec<Document>,
    index: HashMap<String, usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn insert(&self, table: &str, docs: Vec<Document>) -> StoreResult<usize> {
        let mut entry = self.tables.entry(table.to_string()).or_default();

        let mut ids = Vec::with_capacity(docs.len());
        for doc in &docs {
            let id = document_id(doc)?;
            if entry.index.contains_key(&id) || ids.contains(&id) {
                return Err(StoreError::Duplicate {
                    table: table.to_string(),
                    id,
                });
            }
            ids.push(id);
        }

        let inserted = docs.len();
        for (id, doc) in ids.into_iter().zip(docs) {
            let position = entry.rows.len();
            entry.rows.push(doc);
            entry.index.insert(id, position);
        }

        debug!("Inserted {} documents into {}", inserted, table);
        Ok(inserted)
    }

    async fn get(&self, table: &str, id: &str) -> StoreResult<Option<Document>> {
        Ok(self.tables.get(table).and_then(|t| {
            t.index.get(id).map(|&position| t.rows[position].clone())
        }))
    }

    async fn find(&self, query: &Query) -> StoreResult<Vec<Document>> {
        let mut rows: Vec<Document> = match self.tables.get(&query.table) {
            Some(table) => table
                .rows
                .iter()
                .filter(|doc| query.conditions.iter().all(|c| matches(doc, c)))
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        if let Some((field, order)) = &query.sort {
            rows.sort_by(|a, b| {
                let ordering = compare(a.get(field), b.get(field));
                match order {
                    SortOrder::Asc => ordering,
                    SortOrder::Desc => ordering.reverse(),
                }
            });
        }

        let rows = rows.into_iter().skip(query.skip);
        Ok(match query.limit {
            Some(limit) => rows.take(limit).collect(),
            None => rows.collect(),
        })
    }

    async fn count(&self, query: &Query) -> StoreResult<usize> {
        Ok(match self.tables.get(&query.table) {
            Some(table) => table
                .rows
                .iter()
                .filter(|doc| query.conditions.iter().all(|c| matches(doc, c)))
                .count(),
            None => 0,
        })
    }

    async fn merge(&self, table: &str, id: &str, patch: Document) -> StoreResult<Option<Document>> {
        let Some(mut entry) = self.tables.get_mut(table) else {
            return Ok(None);
        };
        let Some(&position) = entry.index.get(id) else {
            return Ok(None);
        };

        let doc = &mut entry.rows[position];
        for (key, value) in patch {
            if key != "id" {
                doc.insert(key, value);
            }
        }
        Ok(Some(doc.clone()))
    }

    async fn apply(&self, table: &str, id: &str, ops: Vec<FieldOp>) -> StoreResult<Option<Document>> {
        // 持有分片写锁直到全部操作完成
        let Some(mut entry) = self.tables.get_mut(table) else {
            return Ok(None);
        };
        let Some(&position) = entry.index.get(id) else {
            return Ok(None);
        };

        let mut doc = entry.rows[position].clone();
        for op in ops {
            apply_op(&mut doc, op)?;
        }
        entry.rows[position] = doc.clone();
        Ok(Some(doc))
    }

    async fn update_where(&self, query: &Query, patch: Document) -> StoreResult<usize> {
        let Some(mut entry) = self.tables.get_mut(&query.table) else {
            return Ok(0);
        };

        let mut updated = 0;
        for doc in entry
            .rows
            .iter_mut()
            .filter(|doc| query.conditions.iter().all(|c| matches(doc, c)))
        {
            for (key, value) in &patch {
                if key != "id" {
                    doc.insert(key.clone(), value.clone());
                }
            }
            updated += 1;
        }
        debug!("Updated {} documents in {}", updated, query.table);
        Ok(updated)
    }
}

fn apply_op(doc: &mut Document, op: FieldOp) -> StoreResult<()> {
    match op {
        FieldOp::Set(field, _) if field == "id" => {}
        FieldOp::Set(field, value) => {
            doc.insert(field, value);
        }
        FieldOp::AddToSet(field, value) => {
            let items = array_field(doc, &field)?;
            if !items.contains(&value) {
                items.push(value);
            }
        }
        FieldOp::Pull(field, value) => {
            array_field(doc, &field)?.retain(|item| item != &value);
        }
        FieldOp::Increment(field, by) => {
            let current = doc.get(&field).and_then(Value::as_i64).unwrap_or(0);
            doc.insert(field, Value::from(current + by));
        }
    }
    Ok(())
}

/// 缺失或为 null 的字段视为空数组
fn array_field<'a>(doc: &'a mut Document, field: &str) -> StoreResult<&'a mut Vec<Value>> {
    let slot = doc.entry(field.to_string()).or_insert(Value::Null);
    if slot.is_null() {
        *slot = Value::Array(Vec::new());
    }
    match slot {
        Value::Array(items) => Ok(items),
        _ => Err(StoreError::Backend(format!("Field {} is not an array", field))),
    }
}

fn matches(doc: &Document, condition: &Condition) -> bool {
    let field_value = |field: &str| doc.get(field).unwrap_or(&Value::Null);

    match condition {
        Condition::Eq(field, value) => field_value(field) == value,
        Condition::Ne(field, value) => field_value(field) != value,
        Condition::In(field, values) => values.contains(field_value(field)),
        Condition::NotIn(field, values) => !values.contains(field_value(field)),
        Condition::Contains(field, value) => match field_value(field) {
            Value::Array(items) => items.contains(value),
            _ => false,
        },
        Condition::Since(field, at) => {
            compare(Some(field_value(field)), Some(&Condition::timestamp_value(at))) != Ordering::Less
        }
        Condition::Before(field, at) => {
            compare(Some(field_value(field)), Some(&Condition::timestamp_value(at))) == Ordering::Less
        }
        Condition::TextContains(field, term) => match field_value(field) {
            Value::String(text) => text.to_lowercase().contains(term.as_str()),
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_str)
                .any(|item| item.to_lowercase().contains(term.as_str())),
            _ => false,
        },
        Condition::Any(conditions) => conditions.iter().any(|c| matches(doc, c)),
    }
}

/// 缺失值排在最前
fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}
