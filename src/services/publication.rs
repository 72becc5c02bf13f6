use crate::{
    config::Config,
    error::{AppError, Result},
    models::{notification::FanOutAction, publication::*, user::User},
    services::{
        auth::AuthUser,
        database::{Database, PaginatedResult},
        notification::NotificationService,
        user::{ensure_not_blocked_by, UserService, USER_TABLE},
    },
    store::{Condition, FieldOp, Query},
    utils::validation::normalize_hashtags,
};
use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

pub const PUBLICATION_TABLE: &str = "publication";

const HIGHLIGHT_WINDOW_HOURS: i64 = 24;
const HIGHLIGHT_LIMIT: usize = 10;

#[derive(Clone)]
pub struct PublicationService {
    db: Arc<Database>,
    config: Config,
    user_service: UserService,
    notification_service: NotificationService,
}

impl PublicationService {
    pub async fn new(
        db: Arc<Database>,
        config: &Config,
        user_service: UserService,
        notification_service: NotificationService,
    ) -> Result<Self> {
        Ok(Self {
            db,
            config: config.clone(),
            user_service,
            notification_service,
        })
    }

    /// 发布帖子，并通知作者此刻的所有关注者
    pub async fn create(&self, author_id: &str, request: CreatePublicationRequest) -> Result<Publication> {
        debug!("Creating publication for user: {}", author_id);
        request.validate().map_err(AppError::ValidatorError)?;

        let author = self.user_service.require_active(author_id).await?;
        if request.highlight && !author.role.is_premium() {
            return Err(AppError::forbidden("Highlighting requires a premium subscription"));
        }

        let now = Utc::now();
        let publication = Publication {
            id: Uuid::new_v4().to_string(),
            author: author.id.clone(),
            content: request.content,
            media: request.media,
            hashtags: normalize_hashtags(request.hashtags),
            inspires: Vec::new(),
            recommends: Vec::new(),
            wants_to_contribute: Vec::new(),
            comments: Vec::new(),
            shares: 0,
            status: ContentStatus::Active,
            highlight: request.highlight,
            deleted: false,
            created_at: now,
            updated_at: now,
        };
        let publication = self.db.create(PUBLICATION_TABLE, publication).await?;

        self.notify_followers(&author, &publication).await;

        info!("Created publication {} by {}", publication.id, author.id);
        Ok(publication)
    }

    async fn notify_followers(&self, author: &User, publication: &Publication) {
        let action = FanOutAction::Publication {
            actor: author.id.clone(),
            actor_name: author.username.clone(),
            publication: publication.id.clone(),
            highlighted: publication.highlight,
            followers: author.followers.clone(),
        };
        if let Err(e) = self.notification_service.dispatch(action).await {
            warn!("Failed to notify followers of publication {}: {}", publication.id, e);
        }
    }

    /// 读取对查看者可见的帖子
    ///
    /// 帖子或作者已删除时返回 404，作者拉黑了查看者时返回 403。
    pub async fn get_visible(&self, viewer_id: &str, publication_id: &str) -> Result<(Publication, User)> {
        let publication = match self.db.get_by_id::<Publication>(PUBLICATION_TABLE, publication_id).await? {
            Some(p) if !p.deleted => p,
            _ => return Err(AppError::not_found("Publication")),
        };
        let author = match self.user_service.get_user(&publication.author).await? {
            Some(author) if !author.deleted => author,
            _ => return Err(AppError::not_found("Publication")),
        };
        ensure_not_blocked_by(&author, viewer_id)?;

        Ok((publication, author))
    }

    pub async fn view(&self, viewer_id: &str, publication_id: &str) -> Result<PublicationView> {
        let (publication, _) = self.get_visible(viewer_id, publication_id).await?;
        Ok(publication.into())
    }

    /// 编辑帖子（仅作者）
    pub async fn edit(
        &self,
        actor_id: &str,
        publication_id: &str,
        request: EditPublicationRequest,
    ) -> Result<PublicationView> {
        request.validate().map_err(AppError::ValidatorError)?;

        let publication = self.require_owned(actor_id, publication_id).await?;

        let mut updates = Map::new();
        if let Some(content) = request.content {
            updates.insert("content".into(), json!(content));
        }
        if let Some(media) = request.media {
            updates.insert("media".into(), json!(media));
        }
        if let Some(hashtags) = request.hashtags {
            updates.insert("hashtags".into(), json!(normalize_hashtags(hashtags)));
        }
        if updates.is_empty() {
            return Ok(publication.into());
        }

        Ok(self.update(publication_id, Value::Object(updates)).await?.into())
    }

    /// 高亮帖子；已高亮时不重复通知
    pub async fn highlight(&self, actor_id: &str, publication_id: &str) -> Result<PublicationView> {
        let author = self.user_service.require_active(actor_id).await?;
        if !author.role.is_premium() {
            return Err(AppError::forbidden("Highlighting requires a premium subscription"));
        }

        let publication = self.require_owned(actor_id, publication_id).await?;
        if publication.highlight {
            return Ok(publication.into());
        }

        let publication = self.update(publication_id, json!({ "highlight": true })).await?;
        self.notify_followers(&author, &publication).await;

        info!("Publication {} highlighted", publication_id);
        Ok(publication.into())
    }

    /// 软删除（作者或管理员）
    pub async fn delete(&self, actor: &AuthUser, publication_id: &str) -> Result<()> {
        let publication = match self.db.get_by_id::<Publication>(PUBLICATION_TABLE, publication_id).await? {
            Some(p) if !p.deleted => p,
            _ => return Err(AppError::not_found("Publication")),
        };
        if publication.author != actor.id && !actor.is_admin() {
            return Err(AppError::forbidden("You can only delete your own publications"));
        }

        self.update(publication_id, json!({ "deleted": true })).await?;
        info!("Publication {} deleted by {}", publication_id, actor.id);
        Ok(())
    }

    /// 切换互动；作者拉黑行为人时在写入前拒绝
    pub async fn react(&self, actor_id: &str, publication_id: &str, reaction: Reaction) -> Result<ReactionToggle> {
        let actor = self.user_service.require_active(actor_id).await?;
        let (publication, author) = self.get_visible(actor_id, publication_id).await?;

        let active = !publication.reactors(reaction).iter().any(|id| id == actor_id);
        let op = if active {
            FieldOp::add_to_set(reaction.field(), actor_id)
        } else {
            FieldOp::pull(reaction.field(), actor_id)
        };
        let count = self.apply(publication_id, vec![op]).await?.reactors(reaction).len();

        if active {
            let action = FanOutAction::Reaction {
                actor: actor.id.clone(),
                actor_name: actor.username.clone(),
                publication: publication.id.clone(),
                author: author.id.clone(),
                reaction,
            };
            if let Err(e) = self.notification_service.dispatch(action).await {
                warn!("Failed to send reaction notification: {}", e);
            }
        }

        Ok(ReactionToggle { reaction, active, count })
    }

    pub async fn share(&self, actor_id: &str, publication_id: &str) -> Result<u64> {
        self.get_visible(actor_id, publication_id).await?;
        let publication = self
            .apply(publication_id, vec![FieldOp::increment("shares", 1)])
            .await?;
        Ok(publication.shares)
    }

    pub async fn report(&self, actor_id: &str, publication_id: &str) -> Result<()> {
        let (publication, _) = self.get_visible(actor_id, publication_id).await?;

        if publication.author == actor_id {
            return Err(AppError::bad_request("You cannot report your own publication"));
        }
        if publication.status == ContentStatus::Reported {
            return Err(AppError::bad_request("Publication has already been reported"));
        }

        self.update(publication_id, json!({ "status": ContentStatus::Reported })).await?;
        info!("Publication {} reported by {}", publication_id, actor_id);
        Ok(())
    }

    /// 关注作者的帖子，最新的在前
    pub async fn feed(
        &self,
        user_id: &str,
        page: Option<usize>,
        limit: Option<usize>,
    ) -> Result<PaginatedResult<PublicationView>> {
        let (page, limit) = self.config.page_params(page, limit);
        let user = self.user_service.require_active(user_id).await?;

        let authors: Vec<User> = if user.following.is_empty() {
            Vec::new()
        } else {
            self.db
                .find(
                    &Query::table(USER_TABLE)
                        .not_deleted()
                        .filter(Condition::is_in("id", user.following.clone())),
                )
                .await?
        };
        if authors.is_empty() {
            return Ok(PaginatedResult::new(Vec::new(), 0, page, limit));
        }

        let query = Query::table(PUBLICATION_TABLE)
            .not_deleted()
            .filter(Condition::is_in("author", authors.into_iter().map(|a| a.id)))
            .sort_desc("created_at");
        Ok(self
            .db
            .paginate::<Publication>(query, page, limit)
            .await?
            .map(PublicationView::from))
    }

    /// 最近 24 小时内的高亮帖子
    pub async fn highlighted(&self) -> Result<Vec<PublicationView>> {
        let since = Utc::now() - Duration::hours(HIGHLIGHT_WINDOW_HOURS);
        let publications: Vec<Publication> = self
            .db
            .find(
                &Query::table(PUBLICATION_TABLE)
                    .not_deleted()
                    .eq("highlight", true)
                    .filter(Condition::since("created_at", since))
                    .sort_desc("created_at")
                    .limit(HIGHLIGHT_LIMIT),
            )
            .await?;
        Ok(publications.into_iter().map(PublicationView::from).collect())
    }

    pub async fn by_author(
        &self,
        viewer_id: &str,
        username: &str,
        page: Option<usize>,
        limit: Option<usize>,
    ) -> Result<PaginatedResult<PublicationView>> {
        let (page, limit) = self.config.page_params(page, limit);
        let author = self.user_service.require_by_username(username).await?;
        ensure_not_blocked_by(&author, viewer_id)?;

        let query = Query::table(PUBLICATION_TABLE)
            .not_deleted()
            .eq("author", author.id.as_str())
            .sort_desc("created_at");
        Ok(self
            .db
            .paginate::<Publication>(query, page, limit)
            .await?
            .map(PublicationView::from))
    }

    async fn require_owned(&self, actor_id: &str, publication_id: &str) -> Result<Publication> {
        let publication = match self.db.get_by_id::<Publication>(PUBLICATION_TABLE, publication_id).await? {
            Some(p) if !p.deleted => p,
            _ => return Err(AppError::not_found("Publication")),
        };
        if publication.author != actor_id {
            return Err(AppError::forbidden("You can only modify your own publications"));
        }
        Ok(publication)
    }

    pub(crate) async fn update(&self, publication_id: &str, updates: Value) -> Result<Publication> {
        self.db
            .touch_by_id(PUBLICATION_TABLE, publication_id, updates)
            .await?
            .ok_or_else(|| AppError::not_found("Publication"))
    }

    /// 互动列表、评论列表与计数器只通过原子操作修改
    pub(crate) async fn apply(&self, publication_id: &str, ops: Vec<FieldOp>) -> Result<Publication> {
        self.db
            .apply_ops(PUBLICATION_TABLE, publication_id, ops)
            .await?
            .ok_or_else(|| AppError::not_found("Publication"))
    }
}
