use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::utils::serde_helpers::{thing_id, timestamp};
use crate::utils::validation::validate_hashtags;

/// 帖子与评论共用的审核状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    Active,
    Reported,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Active => "active",
            ContentStatus::Reported => "reported",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Publication {
    #[serde(with = "thing_id")]
    pub id: String,
    pub author: String,
    pub content: String,
    #[serde(default)]
    pub media: Vec<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub inspires: Vec<String>,
    #[serde(default)]
    pub recommends: Vec<String>,
    #[serde(default)]
    pub wants_to_contribute: Vec<String>,
    #[serde(default)]
    pub comments: Vec<String>,
    #[serde(default)]
    pub shares: u64,
    pub status: ContentStatus,
    #[serde(default)]
    pub highlight: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl Publication {
    pub fn reactors(&self, reaction: Reaction) -> &Vec<String> {
        match reaction {
            Reaction::InspiresMe => &self.inspires,
            Reaction::RecommendIt => &self.recommends,
            Reaction::WantToContribute => &self.wants_to_contribute,
        }
    }
}

/// 三种互动
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Reaction {
    InspiresMe,
    RecommendIt,
    WantToContribute,
}

impl Reaction {
    /// 存放互动用户的字段名
    pub fn field(&self) -> &'static str {
        match self {
            Reaction::InspiresMe => "inspires",
            Reaction::RecommendIt => "recommends",
            Reaction::WantToContribute => "wants_to_contribute",
        }
    }

    pub fn phrase(&self) -> &'static str {
        match self {
            Reaction::InspiresMe => "is inspired by your publication",
            Reaction::RecommendIt => "recommends your publication",
            Reaction::WantToContribute => "wants to contribute to your publication",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionCounts {
    pub inspires_me: usize,
    pub recommend_it: usize,
    pub want_to_contribute: usize,
}

/// 返回给客户端的帖子
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicationView {
    pub id: String,
    pub author: String,
    pub content: String,
    pub media: Vec<String>,
    pub hashtags: Vec<String>,
    pub reactions: ReactionCounts,
    pub comments_count: usize,
    pub shares: u64,
    pub highlight: bool,
    pub status: ContentStatus,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl From<Publication> for PublicationView {
    fn from(p: Publication) -> Self {
        Self {
            reactions: ReactionCounts {
                inspires_me: p.inspires.len(),
                recommend_it: p.recommends.len(),
                want_to_contribute: p.wants_to_contribute.len(),
            },
            comments_count: p.comments.len(),
            id: p.id,
            author: p.author,
            content: p.content,
            media: p.media,
            hashtags: p.hashtags,
            shares: p.shares,
            highlight: p.highlight,
            status: p.status,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CreatePublicationRequest {
    #[validate(length(min = 3, max = 200, message = "Content must be 3-200 characters"))]
    pub content: String,
    #[serde(default)]
    pub media: Vec<String>,
    #[serde(default)]
    #[validate(custom = "validate_hashtags")]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub highlight: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct EditPublicationRequest {
    #[validate(length(min = 3, max = 200, message = "Content must be 3-200 characters"))]
    pub content: Option<String>,
    pub media: Option<Vec<String>>,
    #[validate(custom = "validate_hashtags")]
    pub hashtags: Option<Vec<String>>,
}

/// 互动切换结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionToggle {
    pub reaction: Reaction,
    pub active: bool,
    pub count: usize,
}
