use crate::{
    config::Config,
    error::{AppError, Result},
    models::notification::*,
    services::database::{Database, PaginatedResult},
    store::Query,
};
use chrono::Utc;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub const NOTIFICATION_TABLE: &str = "notification";

/// 根据动作生成待写入的通知，不做任何 I/O
///
/// 每个动作对应的收件人：
/// - 关注：被关注者
/// - 评论、互动：帖子作者
/// - 发帖：触发时刻的每一位关注者（去重）；高亮帖子使用高亮文案
/// - 私信：接收者
///
/// 行为人永远不会通知自己。
pub fn plan(action: &FanOutAction) -> Vec<NewNotification> {
    let kind = action.kind();
    let single = |actor: &str, recipient: &str, target: NotificationTarget, content: String| {
        if actor == recipient {
            Vec::new()
        } else {
            vec![NewNotification {
                recipient: recipient.to_string(),
                notification_type: kind,
                target,
                content,
            }]
        }
    };

    match action {
        FanOutAction::Follower { actor, actor_name, followed } => single(
            actor,
            followed,
            NotificationTarget::User(actor.clone()),
            format!("{} started following you", actor_name),
        ),
        FanOutAction::Comment { actor, actor_name, publication, author } => single(
            actor,
            author,
            NotificationTarget::Publication(publication.clone()),
            format!("{} commented on your publication", actor_name),
        ),
        FanOutAction::Reaction { actor, actor_name, publication, author, reaction } => single(
            actor,
            author,
            NotificationTarget::Publication(publication.clone()),
            format!("{} {}", actor_name, reaction.phrase()),
        ),
        FanOutAction::Message { actor, actor_name, receiver, message } => single(
            actor,
            receiver,
            NotificationTarget::Message(message.clone()),
            format!("{} sent you a message", actor_name),
        ),
        FanOutAction::Publication { actor, actor_name, publication, highlighted, followers } => {
            let content = if *highlighted {
                format!("{} highlighted a new publication", actor_name)
            } else {
                format!("{} shared a new publication", actor_name)
            };

            let mut seen = HashSet::new();
            followers
                .iter()
                .filter(|follower| *follower != actor && seen.insert(follower.as_str()))
                .map(|follower| NewNotification {
                    recipient: follower.clone(),
                    notification_type: kind,
                    target: NotificationTarget::Publication(publication.clone()),
                    content: content.clone(),
                })
                .collect()
        }
    }
}

#[derive(Clone)]
pub struct NotificationService {
    db: Arc<Database>,
    config: Config,
    queue_tx: mpsc::UnboundedSender<FanOutAction>,
}

impl NotificationService {
    pub async fn new(db: Arc<Database>, config: &Config) -> Result<Self> {
        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<FanOutAction>();

        let service = Self {
            db,
            config: config.clone(),
            queue_tx,
        };

        // 启动通知队列处理器
        let worker = service.clone();
        tokio::spawn(async move {
            while let Some(action) = queue_rx.recv().await {
                let kind = action.kind();
                if let Err(e) = worker.dispatch(action).await {
                    error!("Failed to process queued {:?} notification: {}", kind, e);
                }
            }
        });

        Ok(service)
    }

    /// 扇出写入：先整批插入，失败后逐条重试并记录失败项
    pub async fn dispatch(&self, action: FanOutAction) -> Result<FanOutReport> {
        let planned = plan(&action);
        if planned.is_empty() {
            debug!("No notifications planned for {:?}", action.kind());
            return Ok(FanOutReport::default());
        }

        let now = Utc::now();
        let notifications: Vec<Notification> = planned
            .into_iter()
            .map(|n| n.into_notification(now))
            .collect();
        let mut report = FanOutReport {
            planned: notifications.len(),
            ..Default::default()
        };

        match self.db.insert_many(NOTIFICATION_TABLE, &notifications).await {
            Ok(inserted) => {
                report.inserted = inserted;
            }
            Err(e) => {
                warn!(
                    "Batched insert of {} notifications failed, retrying one by one: {}",
                    report.planned, e
                );
                for notification in &notifications {
                    match self.db.create(NOTIFICATION_TABLE, notification).await {
                        Ok(_) => report.inserted += 1,
                        Err(e) => {
                            report.failed += 1;
                            error!(
                                "Failed to store notification for {}: {}",
                                notification.recipient, e
                            );
                        }
                    }
                }
            }
        }

        if report.inserted == 0 {
            return Err(AppError::Internal(format!(
                "Failed to store any of {} notifications",
                report.planned
            )));
        }

        info!(
            "Fan-out {:?}: {} planned, {} stored, {} failed",
            action.kind(),
            report.planned,
            report.inserted,
            report.failed
        );
        Ok(report)
    }

    /// 交给后台队列处理，不等待写入
    pub fn enqueue(&self, action: FanOutAction) {
        if let Err(e) = self.queue_tx.send(action) {
            error!("Notification queue is closed, dropping {:?} notification", e.0.kind());
        }
    }

    /// 获取通知列表
    pub async fn list_for(
        &self,
        user_id: &str,
        unread_only: bool,
        page: Option<usize>,
        limit: Option<usize>,
    ) -> Result<PaginatedResult<Notification>> {
        debug!("Listing notifications for user {} (unread only: {})", user_id, unread_only);

        let (page, limit) = self.config.page_params(page, limit);
        let mut query = Query::table(NOTIFICATION_TABLE).eq("recipient", user_id);
        if unread_only {
            query = query.eq("read", false);
        }

        self.db
            .paginate(query.sort_desc("created_at"), page, limit)
            .await
    }

    pub async fn unread_count(&self, user_id: &str) -> Result<usize> {
        self.db
            .count(
                &Query::table(NOTIFICATION_TABLE)
                    .eq("recipient", user_id)
                    .eq("read", false),
            )
            .await
    }

    /// 标记为已读；重复调用结果相同
    pub async fn mark_as_read(&self, user_id: &str, notification_id: &str) -> Result<Notification> {
        let notification: Notification = self
            .db
            .get_by_id(NOTIFICATION_TABLE, notification_id)
            .await?
            .ok_or_else(|| AppError::not_found("Notification"))?;

        if notification.recipient != user_id {
            return Err(AppError::forbidden("Cannot modify another user's notification"));
        }
        if notification.read {
            return Ok(notification);
        }

        self.db
            .update_by_id_with_json(NOTIFICATION_TABLE, notification_id, json!({ "read": true }))
            .await?
            .ok_or_else(|| AppError::not_found("Notification"))
    }

    /// 单条条件更新，不逐条读写
    pub async fn mark_all_as_read(&self, user_id: &str) -> Result<usize> {
        let updated = self
            .db
            .update_where(
                &Query::table(NOTIFICATION_TABLE)
                    .eq("recipient", user_id)
                    .eq("read", false),
                json!({ "read": true }),
            )
            .await?;

        info!("Marked {} notifications as read for user {}", updated, user_id);
        Ok(updated)
    }
}
