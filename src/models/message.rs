use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::utils::serde_helpers::{thing_id, timestamp};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(with = "thing_id")]
    pub id: String,
    pub room: String,
    pub sender: String,
    pub receiver: String,
    pub content: String,
    pub read: bool,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

/// 两个用户之间的会话，ID 与房间号相同
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    #[serde(with = "thing_id")]
    pub id: String,
    pub users: Vec<String>,
    /// 按发送顺序排列的消息 ID
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

/// 一条待发送的消息，四个字段都必须存在
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SendMessage {
    #[serde(default, alias = "roomId")]
    #[validate(length(min = 1, message = "room is required"))]
    pub room: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "sender is required"))]
    pub sender: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "receiver is required"))]
    pub receiver: String,
    #[serde(default)]
    #[validate(length(min = 1, max = 2000, message = "content must be 1-2000 characters"))]
    pub content: String,
}

/// REST 发送消息的请求体，房间与发送者来自路径和登录态
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    #[validate(length(min = 1, message = "receiver is required"))]
    pub receiver: String,
    #[validate(length(min = 1, max = 2000, message = "content must be 1-2000 characters"))]
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}
