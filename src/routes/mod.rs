use crate::services::database::PaginatedResult;
use serde::Serialize;
use serde_json::{json, Map, Value};

pub mod admin;
pub mod feed;
pub mod messages;
pub mod notifications;
pub mod publications;
pub mod search;
pub mod socket;
pub mod subscriptions;
pub mod users;

/// 统一的分页响应结构
pub fn paginated<T: Serialize>(key: &str, result: PaginatedResult<T>) -> Value {
    let mut body = Map::new();
    body.insert(key.to_string(), json!(result.data));
    body.insert(
        "pagination".to_string(),
        json!({
            "current_page": result.page,
            "total_pages": result.total_pages,
            "total_items": result.total,
            "items_per_page": result.per_page,
            "has_next": result.page < result.total_pages,
            "has_prev": result.page > 1,
        }),
    );
    Value::Object(body)
}
