use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::publication::ContentStatus;
use crate::utils::serde_helpers::{thing_id, timestamp};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    #[serde(with = "thing_id")]
    pub id: String,
    pub publication: String,
    pub author: String,
    pub content: String,
    pub status: ContentStatus,
    #[serde(default)]
    pub deleted: bool,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CreateCommentRequest {
    #[validate(length(min = 1, max = 500, message = "Comment must be 1-500 characters"))]
    pub content: String,
}
