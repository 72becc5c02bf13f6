use crate::{
    error::{AppError, Result},
    models::{
        comment::*,
        notification::FanOutAction,
        publication::{ContentStatus, Publication},
    },
    services::{
        auth::AuthUser,
        database::Database,
        notification::NotificationService,
        publication::{PublicationService, PUBLICATION_TABLE},
        user::UserService,
    },
    store::{Condition, FieldOp, Query},
};
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

pub const COMMENT_TABLE: &str = "comment";

/// 评论服务
#[derive(Clone)]
pub struct CommentService {
    db: Arc<Database>,
    user_service: UserService,
    publication_service: PublicationService,
    notification_service: NotificationService,
}

impl CommentService {
    pub async fn new(
        db: Arc<Database>,
        user_service: UserService,
        publication_service: PublicationService,
        notification_service: NotificationService,
    ) -> Result<Self> {
        Ok(Self {
            db,
            user_service,
            publication_service,
            notification_service,
        })
    }

    /// 按帖子中记录的顺序返回未删除的评论
    pub async fn list(&self, viewer_id: &str, publication_id: &str) -> Result<Vec<Comment>> {
        let (publication, _) = self
            .publication_service
            .get_visible(viewer_id, publication_id)
            .await?;
        if publication.comments.is_empty() {
            return Ok(Vec::new());
        }

        let comments: Vec<Comment> = self
            .db
            .find(
                &Query::table(COMMENT_TABLE)
                    .not_deleted()
                    .filter(Condition::is_in("id", publication.comments.clone())),
            )
            .await?;
        let mut by_id: HashMap<String, Comment> =
            comments.into_iter().map(|c| (c.id.clone(), c)).collect();

        Ok(publication
            .comments
            .iter()
            .filter_map(|id| by_id.remove(id))
            .collect())
    }

    /// 发表评论；作者拉黑评论者时不写入任何内容
    pub async fn create(
        &self,
        actor_id: &str,
        publication_id: &str,
        request: CreateCommentRequest,
    ) -> Result<Comment> {
        debug!("User {} commenting on {}", actor_id, publication_id);
        request.validate().map_err(AppError::ValidatorError)?;

        let actor = self.user_service.require_active(actor_id).await?;
        let (publication, author) = self
            .publication_service
            .get_visible(actor_id, publication_id)
            .await?;

        let now = Utc::now();
        let comment = Comment {
            id: Uuid::new_v4().to_string(),
            publication: publication.id.clone(),
            author: actor.id.clone(),
            content: request.content,
            status: ContentStatus::Active,
            deleted: false,
            created_at: now,
            updated_at: now,
        };
        let comment = self.db.create(COMMENT_TABLE, comment).await?;

        self.publication_service
            .apply(&publication.id, vec![FieldOp::add_to_set("comments", comment.id.as_str())])
            .await?;

        let action = FanOutAction::Comment {
            actor: actor.id.clone(),
            actor_name: actor.username.clone(),
            publication: publication.id.clone(),
            author: author.id.clone(),
        };
        if let Err(e) = self.notification_service.dispatch(action).await {
            warn!("Failed to send comment notification: {}", e);
        }

        info!("Comment {} added to publication {}", comment.id, publication.id);
        Ok(comment)
    }

    pub async fn report(&self, actor_id: &str, publication_id: &str, comment_id: &str) -> Result<()> {
        self.publication_service
            .get_visible(actor_id, publication_id)
            .await?;
        let comment = self.require_comment(publication_id, comment_id).await?;

        if comment.author == actor_id {
            return Err(AppError::bad_request("You cannot report your own comment"));
        }
        if comment.status == ContentStatus::Reported {
            return Err(AppError::bad_request("Comment has already been reported"));
        }

        self.db
            .touch_by_id::<Comment>(COMMENT_TABLE, comment_id, json!({ "status": ContentStatus::Reported }))
            .await?;
        info!("Comment {} reported by {}", comment_id, actor_id);
        Ok(())
    }

    /// 评论作者、帖子作者或管理员可以删除
    pub async fn delete(&self, actor: &AuthUser, publication_id: &str, comment_id: &str) -> Result<()> {
        let comment = self.require_comment(publication_id, comment_id).await?;
        let publication = self.publication_service.get_visible(&actor.id, publication_id).await;

        let publication = match publication {
            Ok((publication, _)) => Some(publication),
            Err(AppError::NotFound(_)) if actor.is_admin() => None,
            Err(e) => return Err(e),
        };
        let owns_publication = publication
            .as_ref()
            .map(|p| p.author == actor.id)
            .unwrap_or(false);
        if comment.author != actor.id && !owns_publication && !actor.is_admin() {
            return Err(AppError::forbidden("You cannot delete this comment"));
        }

        self.soft_delete(&comment).await?;
        info!("Comment {} deleted by {}", comment_id, actor.id);
        Ok(())
    }

    /// 软删除并从帖子的评论列表中移除
    pub(crate) async fn soft_delete(&self, comment: &Comment) -> Result<()> {
        self.db
            .touch_by_id::<Comment>(COMMENT_TABLE, &comment.id, json!({ "deleted": true }))
            .await?;

        // 帖子记录不存在时返回 None，忽略即可
        self.db
            .apply_ops::<Publication>(
                PUBLICATION_TABLE,
                &comment.publication,
                vec![FieldOp::pull("comments", comment.id.as_str())],
            )
            .await?;
        Ok(())
    }

    pub async fn get(&self, comment_id: &str) -> Result<Option<Comment>> {
        self.db.get_by_id(COMMENT_TABLE, comment_id).await
    }

    async fn require_comment(&self, publication_id: &str, comment_id: &str) -> Result<Comment> {
        match self.get(comment_id).await? {
            Some(comment) if !comment.deleted && comment.publication == publication_id => Ok(comment),
            _ => Err(AppError::not_found("Comment")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::publication::CreatePublicationRequest;
    use crate::models::user::{RegisterRequest, Role, User};
    use crate::services::{auth::AuthService, email::EmailService, notification::NOTIFICATION_TABLE};
    use crate::store::MemoryStore;

    struct Fixture {
        db: Arc<Database>,
        users: UserService,
        publications: PublicationService,
        comments: CommentService,
    }

    async fn setup() -> Fixture {
        let config = Config::default();
        let db = Arc::new(Database::with_store(Arc::new(MemoryStore::new()), &config));
        let auth = AuthService::new(&config).await.unwrap();
        let email = EmailService::new(&config).await.unwrap();
        let notifications = NotificationService::new(db.clone(), &config).await.unwrap();
        let users = UserService::new(db.clone(), &config, auth, email, notifications.clone())
            .await
            .unwrap();
        let publications =
            PublicationService::new(db.clone(), &config, users.clone(), notifications.clone())
                .await
                .unwrap();
        let comments = CommentService::new(db.clone(), users.clone(), publications.clone(), notifications)
            .await
            .unwrap();
        Fixture { db, users, publications, comments }
    }

    async fn register(users: &UserService, name: &str) -> User {
        users
            .register(RegisterRequest {
                full_name: format!("{} Tester", name),
                username: Some(name.to_string()),
                email: format!("{}@example.com", name),
                password: "password1".into(),
                confirm_password: "password1".into(),
                interests: Vec::new(),
                bio: None,
            })
            .await
            .unwrap()
    }

    async fn publish(f: &Fixture, author: &User) -> Publication {
        f.publications
            .create(
                &author.id,
                CreatePublicationRequest {
                    content: "something to discuss".into(),
                    media: Vec::new(),
                    hashtags: Vec::new(),
                    highlight: false,
                },
            )
            .await
            .unwrap()
    }

    fn say(content: &str) -> CreateCommentRequest {
        CreateCommentRequest { content: content.to_string() }
    }

    #[tokio::test]
    async fn comments_keep_publication_order_and_notify_the_author() {
        let f = setup().await;
        let author = register(&f.users, "author").await;
        let reader = register(&f.users, "reader").await;
        let publication = publish(&f, &author).await;

        let first = f.comments.create(&reader.id, &publication.id, say("first")).await.unwrap();
        let second = f.comments.create(&author.id, &publication.id, say("second")).await.unwrap();

        let listed: Vec<String> = f
            .comments
            .list(&reader.id, &publication.id)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(listed, vec![first.id.clone(), second.id]);

        // 作者评论自己的帖子不产生通知
        let notified = f
            .db
            .count(&Query::table(NOTIFICATION_TABLE).eq("recipient", author.id.as_str()))
            .await
            .unwrap();
        assert_eq!(notified, 1);
    }

    #[tokio::test]
    async fn blocked_commenters_write_nothing() {
        let f = setup().await;
        let author = register(&f.users, "author").await;
        let reader = register(&f.users, "reader").await;
        let publication = publish(&f, &author).await;
        f.users.block_or_unblock(&author.id, "reader").await.unwrap();

        let result = f.comments.create(&reader.id, &publication.id, say("hey")).await;
        assert!(matches!(result, Err(AppError::Authorization(_))));
        assert_eq!(f.db.count(&Query::table(COMMENT_TABLE)).await.unwrap(), 0);
        assert_eq!(f.db.count(&Query::table(NOTIFICATION_TABLE)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn publication_owner_can_delete_any_comment() {
        let f = setup().await;
        let author = register(&f.users, "author").await;
        let reader = register(&f.users, "reader").await;
        let bystander = register(&f.users, "bystander").await;
        let publication = publish(&f, &author).await;
        let comment = f.comments.create(&reader.id, &publication.id, say("hey")).await.unwrap();

        let stranger = AuthUser { id: bystander.id.clone(), role: Role::User };
        assert!(matches!(
            f.comments.delete(&stranger, &publication.id, &comment.id).await,
            Err(AppError::Authorization(_))
        ));

        let owner = AuthUser { id: author.id.clone(), role: Role::User };
        f.comments.delete(&owner, &publication.id, &comment.id).await.unwrap();

        assert!(f.comments.list(&reader.id, &publication.id).await.unwrap().is_empty());
        let stored: Publication = f.db.get_by_id(PUBLICATION_TABLE, &publication.id).await.unwrap().unwrap();
        assert!(stored.comments.is_empty());
        assert!(f.comments.get(&comment.id).await.unwrap().unwrap().deleted);
    }

    #[tokio::test]
    async fn reporting_a_comment_is_one_shot() {
        let f = setup().await;
        let author = register(&f.users, "author").await;
        let reader = register(&f.users, "reader").await;
        let publication = publish(&f, &author).await;
        let comment = f.comments.create(&reader.id, &publication.id, say("hey")).await.unwrap();

        assert!(f.comments.report(&reader.id, &publication.id, &comment.id).await.is_err());
        f.comments.report(&author.id, &publication.id, &comment.id).await.unwrap();
        assert!(f.comments.report(&author.id, &publication.id, &comment.id).await.is_err());
    }
}
