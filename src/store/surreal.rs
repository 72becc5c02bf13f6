use async_trait::async_trait;
use serde_json::{json, Map, Value};
use surrealdb::{
    engine::any::{self, Any},
    opt::auth::Root,
    Surreal,
};
use tracing::{debug, info};

use super::{Condition, Document, DocumentStore, FieldOp, Query, SortOrder, StoreError, StoreResult};
use crate::config::Config;

/// SurrealDB 后端（HTTP 协议）
pub struct SurrealStore {
    client: Surreal<Any>,
}

impl SurrealStore {
    pub async fn connect(config: &Config) -> StoreResult<Self> {
        info!("Connecting to SurrealDB at {}", config.database_url);

        let client = any::connect(config.database_url.as_str()).await?;
        // 嵌入式引擎（`mem://`）没有用户体系
        if !config.database_url.starts_with("mem://") {
            client
                .signin(Root {
                    username: &config.database_username,
                    password: &config.database_password,
                })
                .await?;
        }
        client
            .use_ns(&config.database_namespace)
            .use_db(&config.database_name)
            .await?;

        Ok(Self { client })
    }

    async fn rows(&self, sql: String, params: Map<String, Value>) -> StoreResult<Vec<Document>> {
        debug!("Executing query: {}", sql);
        let mut response = self.client.query(sql).bind(Value::Object(params)).await?;
        let rows: Vec<Value> = response.take(0)?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match row {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect())
    }
}

#[async_trait]
impl DocumentStore for SurrealStore {
    async fn ping(&self) -> StoreResult<()> {
        self.client.query("INFO FOR DB").await?.check()?;
        Ok(())
    }

    async fn insert(&self, table: &str, docs: Vec<Document>) -> StoreResult<usize> {
        let count = docs.len();
        if count == 0 {
            return Ok(0);
        }
        let docs: Vec<Value> = docs.into_iter().map(Value::Object).collect();

        // 单条语句在同一事务中执行，整批成功或整批失败
        self.client
            .query(format!("INSERT INTO {} $docs RETURN NONE", table))
            .bind(json!({ "docs": docs }))
            .await?
            .check()
            .map_err(|e| insert_error(table, e))?;
        Ok(count)
    }

    async fn get(&self, table: &str, id: &str) -> StoreResult<Option<Document>> {
        let mut params = Map::new();
        params.insert("tb".into(), json!(table));
        params.insert("id".into(), json!(id));
        let rows = self
            .rows(
                "SELECT *, meta::id(id) AS id FROM type::thing($tb, $id)".to_string(),
                params,
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn find(&self, query: &Query) -> StoreResult<Vec<Document>> {
        let (sql, params) = compile_select(query);
        self.rows(sql, params).await
    }

    async fn count(&self, query: &Query) -> StoreResult<usize> {
        let (sql, params) = compile_count(query);
        let rows = self.rows(sql, params).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize)
    }

    async fn merge(&self, table: &str, id: &str, mut patch: Document) -> StoreResult<Option<Document>> {
        if self.get(table, id).await?.is_none() {
            return Ok(None);
        }
        patch.remove("id");

        self.client
            .query("UPDATE type::thing($tb, $id) MERGE $patch RETURN NONE")
            .bind(json!({ "tb": table, "id": id, "patch": Value::Object(patch) }))
            .await?
            .check()
            .map_err(StoreError::from)?;
        self.get(table, id).await
    }

    async fn apply(&self, table: &str, id: &str, ops: Vec<FieldOp>) -> StoreResult<Option<Document>> {
        // UPDATE 作用于不存在的记录时会创建它
        if self.get(table, id).await?.is_none() {
            return Ok(None);
        }

        let (sql, params) = compile_apply(table, id, &ops);
        if !params.is_empty() {
            debug!("Executing query: {}", sql);
            self.client
                .query(sql)
                .bind(Value::Object(params))
                .await?
                .check()
                .map_err(StoreError::from)?;
        }
        self.get(table, id).await
    }

    async fn update_where(&self, query: &Query, mut patch: Document) -> StoreResult<usize> {
        patch.remove("id");

        let mut params = Map::new();
        params.insert("tb".into(), json!(query.table));
        params.insert("patch".into(), Value::Object(patch));
        let mut sql = String::from("LET $updated = (UPDATE type::table($tb) MERGE $patch");
        push_where(&mut sql, &mut params, &query.conditions);
        sql.push_str(" RETURN AFTER); RETURN array::len($updated);");

        debug!("Executing query: {}", sql);
        let mut response = self.client.query(sql).bind(Value::Object(params)).await?;
        let updated: Option<i64> = response.take(1)?;
        Ok(updated.unwrap_or(0).max(0) as usize)
    }
}

/// 主键冲突的报错形如 ``Database record `table:id` already exists``
fn insert_error(table: &str, error: surrealdb::Error) -> StoreError {
    let message = error.to_string();
    if !message.contains("already exists") {
        return error.into();
    }
    let id = message
        .split('`')
        .nth(1)
        .and_then(|thing| thing.split_once(':'))
        .map(|(_, id)| id.trim_matches(|c| c == '⟨' || c == '⟩').to_string())
        .unwrap_or_default();
    StoreError::Duplicate {
        table: table.to_string(),
        id,
    }
}

/// 所有字段操作渲染为同一条 UPDATE 语句，由数据库在单个事务内执行
fn compile_apply(table: &str, id: &str, ops: &[FieldOp]) -> (String, Map<String, Value>) {
    let mut params = Map::new();
    let assignments: Vec<String> = ops
        .iter()
        .filter_map(|op| match op {
            FieldOp::Set(field, _) if field == "id" => None,
            FieldOp::Set(field, value) => Some(format!("{} = {}", field, bind(&mut params, value.clone()))),
            FieldOp::AddToSet(field, value) => Some(format!(
                "{0} = array::union({0} ?? [], [{1}])",
                field,
                bind(&mut params, value.clone())
            )),
            FieldOp::Pull(field, value) => Some(format!(
                "{0} = array::complement({0} ?? [], [{1}])",
                field,
                bind(&mut params, value.clone())
            )),
            FieldOp::Increment(field, by) => Some(format!(
                "{0} = ({0} ?? 0) + {1}",
                field,
                bind(&mut params, json!(by))
            )),
        })
        .collect();
    if assignments.is_empty() {
        return (String::new(), params);
    }

    params.insert("tb".into(), json!(table));
    params.insert("id".into(), json!(id));
    let sql = format!(
        "UPDATE type::thing($tb, $id) SET {} RETURN NONE",
        assignments.join(", ")
    );
    (sql, params)
}

fn compile_select(query: &Query) -> (String, Map<String, Value>) {
    let mut params = Map::new();
    params.insert("tb".into(), json!(query.table));

    let mut sql = String::from("SELECT *, meta::id(id) AS id FROM type::table($tb)");
    push_where(&mut sql, &mut params, &query.conditions);

    if let Some((field, order)) = &query.sort {
        let direction = match order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        sql.push_str(&format!(" ORDER BY {} {}", field, direction));
    }
    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    if query.skip > 0 {
        sql.push_str(&format!(" START {}", query.skip));
    }

    (sql, params)
}

fn compile_count(query: &Query) -> (String, Map<String, Value>) {
    let mut params = Map::new();
    params.insert("tb".into(), json!(query.table));

    let mut sql = String::from("SELECT count() FROM type::table($tb)");
    push_where(&mut sql, &mut params, &query.conditions);
    sql.push_str(" GROUP ALL");

    (sql, params)
}

fn push_where(sql: &mut String, params: &mut Map<String, Value>, conditions: &[Condition]) {
    if conditions.is_empty() {
        return;
    }
    let clauses: Vec<String> = conditions
        .iter()
        .map(|c| compile_condition(c, params))
        .collect();
    sql.push_str(" WHERE ");
    sql.push_str(&clauses.join(" AND "));
}

fn bind(params: &mut Map<String, Value>, value: Value) -> String {
    let name = format!("p{}", params.len());
    params.insert(name.clone(), value);
    format!("${}", name)
}

/// 记录 ID 以 `table:key` 存储，按 key 比较
fn column(field: &str) -> String {
    if field == "id" {
        "meta::id(id)".to_string()
    } else {
        field.to_string()
    }
}

fn compile_condition(condition: &Condition, params: &mut Map<String, Value>) -> String {
    match condition {
        Condition::Eq(field, value) => format!("{} = {}", column(field), bind(params, value.clone())),
        Condition::Ne(field, value) => format!("{} != {}", column(field), bind(params, value.clone())),
        Condition::In(field, values) => {
            format!("{} IN {}", column(field), bind(params, Value::Array(values.clone())))
        }
        Condition::NotIn(field, values) => {
            format!("{} NOT IN {}", column(field), bind(params, Value::Array(values.clone())))
        }
        Condition::Contains(field, value) => {
            format!("{} CONTAINS {}", column(field), bind(params, value.clone()))
        }
        Condition::Since(field, at) => {
            format!("{} >= {}", column(field), bind(params, Condition::timestamp_value(at)))
        }
        Condition::Before(field, at) => {
            format!("{} < {}", column(field), bind(params, Condition::timestamp_value(at)))
        }
        // 数组字段转成字符串后同样可以做子串匹配
        Condition::TextContains(field, term) => format!(
            "string::lowercase(<string>({} ?? '')) CONTAINS {}",
            column(field),
            bind(params, Value::String(term.clone()))
        ),
        Condition::Any(conditions) => {
            let clauses: Vec<String> = conditions
                .iter()
                .map(|c| compile_condition(c, params))
                .collect();
            format!("({})", clauses.join(" OR "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_filters_into_bound_parameters() {
        let query = Query::table("publication")
            .not_deleted()
            .filter(Condition::Any(vec![
                Condition::text_contains("content", "Rust"),
                Condition::contains("hashtags", "rust"),
            ]))
            .sort_desc("created_at")
            .skip(20)
            .limit(10);

        let (sql, params) = compile_select(&query);
        assert!(sql.starts_with("SELECT *, meta::id(id) AS id FROM type::table($tb) WHERE deleted = $p1 AND ("));
        assert!(sql.ends_with("ORDER BY created_at DESC LIMIT 10 START 20"));
        assert_eq!(params["tb"], json!("publication"));
        assert_eq!(params["p1"], json!(false));
        assert_eq!(params["p2"], json!("rust"));
        assert_eq!(params["p3"], json!("rust"));
    }

    #[test]
    fn counts_group_all() {
        let (sql, params) = compile_count(&Query::table("user").eq("status", "active"));
        assert_eq!(sql, "SELECT count() FROM type::table($tb) WHERE status = $p1 GROUP ALL");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn record_ids_compare_by_key() {
        let query = Query::table("user").filter(Condition::not_in("id", vec!["u1", "u2"]));
        let (sql, params) = compile_select(&query);
        assert!(sql.ends_with("WHERE meta::id(id) NOT IN $p1"));
        assert_eq!(params["p1"], json!(["u1", "u2"]));
    }

    #[test]
    fn field_ops_render_into_one_update() {
        let ops = vec![
            FieldOp::add_to_set("followers", "u1"),
            FieldOp::pull("following", "u2"),
            FieldOp::increment("shares", 1),
            FieldOp::set("id", "ignored"),
        ];
        let (sql, params) = compile_apply("user", "u9", &ops);
        assert_eq!(
            sql,
            "UPDATE type::thing($tb, $id) SET followers = array::union(followers ?? [], [$p0]), \
             following = array::complement(following ?? [], [$p1]), shares = (shares ?? 0) + $p2 RETURN NONE"
        );
        assert_eq!(params["p0"], json!("u1"));
        assert_eq!(params["p2"], json!(1));
        assert_eq!(params["id"], json!("u9"));
    }
}
