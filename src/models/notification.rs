use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::publication::Reaction;
use crate::utils::serde_helpers::{thing_id, timestamp};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Follower,
    Publication,
    Reaction,
    Comment,
    Message,
}

/// 通知引用的实体类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RefModel {
    User,
    Publication,
    Message,
}

/// 通知指向的实体；引用类型与 ID 一起构造，不会错配
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationTarget {
    User(String),
    Publication(String),
    Message(String),
}

impl NotificationTarget {
    pub fn ref_model(&self) -> RefModel {
        match self {
            NotificationTarget::User(_) => RefModel::User,
            NotificationTarget::Publication(_) => RefModel::Publication,
            NotificationTarget::Message(_) => RefModel::Message,
        }
    }

    pub fn ref_id(&self) -> &str {
        match self {
            NotificationTarget::User(id)
            | NotificationTarget::Publication(id)
            | NotificationTarget::Message(id) => id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(with = "thing_id")]
    pub id: String,
    pub recipient: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub ref_model: RefModel,
    pub ref_id: String,
    pub content: String,
    pub read: bool,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

/// 待写入的通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub recipient: String,
    pub notification_type: NotificationType,
    pub target: NotificationTarget,
    pub content: String,
}

impl NewNotification {
    pub fn into_notification(self, created_at: DateTime<Utc>) -> Notification {
        Notification {
            id: Uuid::new_v4().to_string(),
            ref_model: self.target.ref_model(),
            ref_id: self.target.ref_id().to_string(),
            recipient: self.recipient,
            notification_type: self.notification_type,
            content: self.content,
            read: false,
            created_at,
        }
    }
}

/// 触发通知的动作
#[derive(Debug, Clone)]
pub enum FanOutAction {
    Follower {
        actor: String,
        actor_name: String,
        followed: String,
    },
    Comment {
        actor: String,
        actor_name: String,
        publication: String,
        author: String,
    },
    Reaction {
        actor: String,
        actor_name: String,
        publication: String,
        author: String,
        reaction: Reaction,
    },
    /// `followers` 是触发时刻的关注者快照
    Publication {
        actor: String,
        actor_name: String,
        publication: String,
        highlighted: bool,
        followers: Vec<String>,
    },
    Message {
        actor: String,
        actor_name: String,
        receiver: String,
        message: String,
    },
}

impl FanOutAction {
    pub fn kind(&self) -> NotificationType {
        match self {
            FanOutAction::Follower { .. } => NotificationType::Follower,
            FanOutAction::Comment { .. } => NotificationType::Comment,
            FanOutAction::Reaction { .. } => NotificationType::Reaction,
            FanOutAction::Publication { .. } => NotificationType::Publication,
            FanOutAction::Message { .. } => NotificationType::Message,
        }
    }
}

/// 一次扇出的写入结果
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct FanOutReport {
    pub planned: usize,
    pub inserted: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
    /// 默认只返回未读通知
    pub unread: Option<bool>,
}
