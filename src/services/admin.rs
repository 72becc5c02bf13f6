use crate::{
    config::Config,
    error::{AppError, Result},
    models::{
        admin::*,
        comment::Comment,
        message::Message,
        publication::{ContentStatus, Publication, PublicationView},
        subscription::{Transaction, TransactionStatus},
        user::{Account, Role, User, UserStatus},
    },
    services::{
        comment::{CommentService, COMMENT_TABLE},
        database::{Database, PaginatedResult},
        message::MESSAGE_TABLE,
        publication::{PublicationService, PUBLICATION_TABLE},
        subscription::{SUBSCRIPTION_TABLE, TRANSACTION_TABLE},
        user::{UserService, USER_TABLE},
    },
    store::{Condition, Query},
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

const MOST_COMMENTED_LIMIT: usize = 10;
const TOP_MESSAGERS_LIMIT: usize = 5;

/// 后台管理：统计、列表、审核与报表
#[derive(Clone)]
pub struct AdminService {
    db: Arc<Database>,
    config: Config,
    user_service: UserService,
    publication_service: PublicationService,
    comment_service: CommentService,
}

impl AdminService {
    pub async fn new(
        db: Arc<Database>,
        config: &Config,
        user_service: UserService,
        publication_service: PublicationService,
        comment_service: CommentService,
    ) -> Result<Self> {
        Ok(Self {
            db,
            config: config.clone(),
            user_service,
            publication_service,
            comment_service,
        })
    }

    /// 仪表盘统计
    pub async fn stats(&self) -> Result<DashboardStats> {
        debug!("Computing dashboard statistics");

        let users = UserStats {
            active: self.count_status(USER_TABLE, UserStatus::Active.as_str()).await?,
            blocked: self.count_status(USER_TABLE, UserStatus::Blocked.as_str()).await?,
            reported: self.count_status(USER_TABLE, UserStatus::Reported.as_str()).await?,
            deleted: self.count_deleted(USER_TABLE).await?,
            total: self.db.count(&Query::table(USER_TABLE)).await?,
        };

        Ok(DashboardStats {
            users,
            publications: self.content_stats(PUBLICATION_TABLE).await?,
            comments: self.content_stats(COMMENT_TABLE).await?,
            transactions: TransactionStats {
                pending: self.count_transactions(TransactionStatus::Pending).await?,
                completed: self.count_transactions(TransactionStatus::Completed).await?,
                failed: self.count_transactions(TransactionStatus::Failed).await?,
                total: self.db.count(&Query::table(TRANSACTION_TABLE)).await?,
            },
        })
    }

    async fn content_stats(&self, table: &str) -> Result<ContentStats> {
        Ok(ContentStats {
            active: self.count_status(table, ContentStatus::Active.as_str()).await?,
            reported: self.count_status(table, ContentStatus::Reported.as_str()).await?,
            deleted: self.count_deleted(table).await?,
            total: self.db.count(&Query::table(table)).await?,
        })
    }

    async fn count_status(&self, table: &str, status: &str) -> Result<usize> {
        self.db
            .count(&Query::table(table).not_deleted().eq("status", status))
            .await
    }

    async fn count_deleted(&self, table: &str) -> Result<usize> {
        self.db.count(&Query::table(table).eq("deleted", true)).await
    }

    async fn count_transactions(&self, status: TransactionStatus) -> Result<usize> {
        self.db
            .count(&Query::table(TRANSACTION_TABLE).eq("status", status.as_str()))
            .await
    }

    pub async fn list_users(&self, query: AdminListQuery) -> Result<PaginatedResult<Account>> {
        let (page, limit) = self.config.page_params(query.page, query.limit);
        Ok(self
            .db
            .paginate::<User>(Query::table(USER_TABLE).not_deleted().sort_desc("created_at"), page, limit)
            .await?
            .map(Account::from))
    }

    pub async fn list_publications(&self, query: AdminListQuery) -> Result<PaginatedResult<PublicationView>> {
        let (page, limit) = self.config.page_params(query.page, query.limit);
        Ok(self
            .db
            .paginate::<Publication>(
                Query::table(PUBLICATION_TABLE).not_deleted().sort_desc("created_at"),
                page,
                limit,
            )
            .await?
            .map(PublicationView::from))
    }

    pub async fn list_comments(&self, query: AdminListQuery) -> Result<PaginatedResult<Comment>> {
        let (page, limit) = self.config.page_params(query.page, query.limit);
        self.db
            .paginate(Query::table(COMMENT_TABLE).not_deleted().sort_desc("created_at"), page, limit)
            .await
    }

    pub async fn list_transactions(&self, query: AdminListQuery) -> Result<PaginatedResult<Transaction>> {
        let (page, limit) = self.config.page_params(query.page, query.limit);
        self.db
            .paginate(Query::table(TRANSACTION_TABLE).sort_desc("created_at"), page, limit)
            .await
    }

    /// 在 active 与 blocked 之间切换账户状态
    pub async fn toggle_user_status(&self, admin_id: &str, username: &str) -> Result<Account> {
        let user = self.user_service.require_by_username(username).await?;
        if user.id == admin_id || user.role == Role::Admin {
            return Err(AppError::bad_request("Administrators cannot be blocked"));
        }

        let status = match user.status {
            UserStatus::Blocked => UserStatus::Active,
            UserStatus::Active | UserStatus::Reported => UserStatus::Blocked,
        };
        let user = self.user_service.update(&user.id, json!({ "status": status })).await?;

        info!("Admin {} set user {} to {:?}", admin_id, user.id, status);
        Ok(user.into())
    }

    /// 软删除用户
    pub async fn delete_user(&self, admin_id: &str, username: &str) -> Result<()> {
        let user = self.user_service.require_by_username(username).await?;
        if user.id == admin_id {
            return Err(AppError::bad_request("You cannot delete your own account"));
        }

        self.user_service.update(&user.id, json!({ "deleted": true })).await?;
        info!("Admin {} deleted user {}", admin_id, user.id);
        Ok(())
    }

    pub async fn delete_publication(&self, admin_id: &str, publication_id: &str) -> Result<()> {
        let publication: Option<Publication> = self.db.get_by_id(PUBLICATION_TABLE, publication_id).await?;
        match publication {
            Some(p) if !p.deleted => {}
            _ => return Err(AppError::not_found("Publication")),
        }

        self.publication_service
            .update(publication_id, json!({ "deleted": true }))
            .await?;
        info!("Admin {} deleted publication {}", admin_id, publication_id);
        Ok(())
    }

    pub async fn delete_comment(&self, admin_id: &str, comment_id: &str) -> Result<()> {
        let comment = match self.comment_service.get(comment_id).await? {
            Some(c) if !c.deleted => c,
            _ => return Err(AppError::not_found("Comment")),
        };

        self.comment_service.soft_delete(&comment).await?;
        info!("Admin {} deleted comment {}", admin_id, comment_id);
        Ok(())
    }

    /// 按周期生成报表
    pub async fn report(&self, kind: ReportKind, period: ReportPeriod) -> Result<Report> {
        debug!("Generating {:?} report for {:?}", kind, period);
        let now = Utc::now();
        let start = now - period.length();
        let previous_start = start - period.length();

        let report = match kind {
            ReportKind::RegisteredUsers => Report::RegisteredUsers(PeriodComparison::new(
                self.count_between(USER_TABLE, start, now).await?,
                self.count_between(USER_TABLE, previous_start, start).await?,
            )),
            ReportKind::PremiumSubscriptions => Report::PremiumSubscriptions(PeriodComparison::new(
                self.count_between(SUBSCRIPTION_TABLE, start, now).await?,
                self.count_between(SUBSCRIPTION_TABLE, previous_start, start).await?,
            )),
            ReportKind::HighlightedPublications => {
                let in_period = Query::table(PUBLICATION_TABLE)
                    .not_deleted()
                    .filter(Condition::since("created_at", start));
                let total = self.db.count(&in_period).await?;
                let highlighted = self.db.count(&in_period.eq("highlight", true)).await?;
                let percent = if total == 0 {
                    0.0
                } else {
                    highlighted as f64 / total as f64 * 100.0
                };
                Report::HighlightedPublications(HighlightShare { highlighted, total, percent })
            }
            ReportKind::MostCommented => Report::MostCommented(self.most_commented(start).await?),
            ReportKind::TopMessagers => Report::TopMessagers(self.top_messagers(start).await?),
        };

        Ok(report)
    }

    async fn count_between(&self, table: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<usize> {
        self.db
            .count(
                &Query::table(table)
                    .filter(Condition::since("created_at", from))
                    .filter(Condition::before("created_at", to)),
            )
            .await
    }

    async fn most_commented(&self, since: DateTime<Utc>) -> Result<Vec<MostCommented>> {
        let mut publications: Vec<Publication> = self
            .db
            .find(
                &Query::table(PUBLICATION_TABLE)
                    .not_deleted()
                    .filter(Condition::since("created_at", since)),
            )
            .await?;
        publications.retain(|p| !p.comments.is_empty());
        publications.sort_by(|a, b| b.comments.len().cmp(&a.comments.len()));

        Ok(publications
            .into_iter()
            .take(MOST_COMMENTED_LIMIT)
            .map(|p| MostCommented {
                comments_count: p.comments.len(),
                publication_id: p.id,
                author: p.author,
                content: p.content,
            })
            .collect())
    }

    async fn top_messagers(&self, since: DateTime<Utc>) -> Result<Vec<TopMessager>> {
        let messages: Vec<Message> = self
            .db
            .find(&Query::table(MESSAGE_TABLE).filter(Condition::since("created_at", since)))
            .await?;

        let mut counts: HashMap<String, usize> = HashMap::new();
        for message in messages {
            *counts.entry(message.sender).or_default() += 1;
        }
        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut top = Vec::new();
        for (user_id, messages_sent) in ranked.into_iter().take(TOP_MESSAGERS_LIMIT) {
            let username = self
                .user_service
                .get_user(&user_id)
                .await?
                .map(|u| u.username)
                .unwrap_or_default();
            top.push(TopMessager { user_id, username, messages_sent });
        }
        Ok(top)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::comment::CreateCommentRequest;
    use crate::models::message::SendMessage;
    use crate::models::publication::CreatePublicationRequest;
    use crate::models::user::RegisterRequest;
    use crate::services::{
        auth::{AuthService, AuthUser},
        email::EmailService,
        message::{room_id, MessageService},
        notification::NotificationService,
        websocket::WebSocketService,
    };
    use crate::store::MemoryStore;

    struct Fixture {
        users: UserService,
        publications: PublicationService,
        comments: CommentService,
        messages: MessageService,
        admin: AdminService,
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
        let comments =
            CommentService::new(db.clone(), users.clone(), publications.clone(), notifications.clone())
                .await
                .unwrap();
        let hub = WebSocketService::new().await.unwrap();
        let messages = MessageService::new(db.clone(), &config, users.clone(), notifications, hub)
            .await
            .unwrap();
        let admin = AdminService::new(db, &config, users.clone(), publications.clone(), comments.clone())
            .await
            .unwrap();
        Fixture { users, publications, comments, messages, admin }
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

    async fn publish(f: &Fixture, author: &User, highlight: bool) -> Publication {
        f.publications
            .create(
                &author.id,
                CreatePublicationRequest {
                    content: "worth reading".into(),
                    media: Vec::new(),
                    hashtags: Vec::new(),
                    highlight,
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn stats_separate_statuses_and_deletions() {
        let f = setup().await;
        let admin = register(&f.users, "admin").await;
        register(&f.users, "alice").await;
        register(&f.users, "bob").await;
        register(&f.users, "carol").await;

        f.admin.toggle_user_status(&admin.id, "alice").await.unwrap();
        f.admin.delete_user(&admin.id, "bob").await.unwrap();

        let stats = f.admin.stats().await.unwrap();
        assert_eq!(stats.users.total, 4);
        assert_eq!(stats.users.active, 2);
        assert_eq!(stats.users.blocked, 1);
        assert_eq!(stats.users.deleted, 1);

        let listed = f.admin.list_users(AdminListQuery { page: None, limit: None }).await.unwrap();
        assert_eq!(listed.total, 3);

        let unblocked = f.admin.toggle_user_status(&admin.id, "alice").await.unwrap();
        assert_eq!(unblocked.status, UserStatus::Active);
    }

    #[tokio::test]
    async fn moderation_soft_deletes_content() {
        let f = setup().await;
        let admin = register(&f.users, "admin").await;
        let alice = register(&f.users, "alice").await;
        let bob = register(&f.users, "bob").await;
        let publication = publish(&f, &alice, false).await;
        let comment = f
            .comments
            .create(&bob.id, &publication.id, CreateCommentRequest { content: "nice".into() })
            .await
            .unwrap();

        f.admin.delete_comment(&admin.id, &comment.id).await.unwrap();
        assert!(f.comments.list(&bob.id, &publication.id).await.unwrap().is_empty());
        assert!(matches!(
            f.admin.delete_comment(&admin.id, &comment.id).await,
            Err(AppError::NotFound(_))
        ));

        f.admin.delete_publication(&admin.id, &publication.id).await.unwrap();
        let stats = f.admin.stats().await.unwrap();
        assert_eq!(stats.publications.deleted, 1);
        assert_eq!(stats.publications.total, 1);
        assert_eq!(stats.comments.deleted, 1);

        let viewer = AuthUser { id: bob.id.clone(), role: Role::User };
        assert!(f.publications.delete(&viewer, &publication.id).await.is_err());
    }

    #[tokio::test]
    async fn reports_cover_the_requested_period() {
        let f = setup().await;
        let alice = register(&f.users, "alice").await;
        let bob = register(&f.users, "bob").await;
        f.users.set_role(&alice.id, Role::UserPremium, None).await.unwrap();

        let highlighted = publish(&f, &alice, true).await;
        publish(&f, &alice, false).await;
        f.comments
            .create(&bob.id, &highlighted.id, CreateCommentRequest { content: "wow".into() })
            .await
            .unwrap();
        for content in ["one", "two"] {
            f.messages
                .send(
                    &bob.id,
                    SendMessage {
                        room: room_id(&alice.id, &bob.id),
                        sender: bob.id.clone(),
                        receiver: alice.id.clone(),
                        content: content.into(),
                    },
                )
                .await
                .unwrap();
        }

        match f.admin.report(ReportKind::RegisteredUsers, ReportPeriod::Weekly).await.unwrap() {
            Report::RegisteredUsers(cmp) => {
                assert_eq!(cmp.current, 2);
                assert_eq!(cmp.change_percent, None);
            }
            other => panic!("unexpected report {:?}", other),
        }
        match f
            .admin
            .report(ReportKind::HighlightedPublications, ReportPeriod::Monthly)
            .await
            .unwrap()
        {
            Report::HighlightedPublications(share) => {
                assert_eq!((share.highlighted, share.total), (1, 2));
                assert_eq!(share.percent, 50.0);
            }
            other => panic!("unexpected report {:?}", other),
        }
        match f.admin.report(ReportKind::MostCommented, ReportPeriod::Yearly).await.unwrap() {
            Report::MostCommented(top) => {
                assert_eq!(top.len(), 1);
                assert_eq!(top[0].publication_id, highlighted.id);
            }
            other => panic!("unexpected report {:?}", other),
        }
        match f.admin.report(ReportKind::TopMessagers, ReportPeriod::Weekly).await.unwrap() {
            Report::TopMessagers(top) => {
                assert_eq!(top[0].username, "bob");
                assert_eq!(top[0].messages_sent, 2);
            }
            other => panic!("unexpected report {:?}", other),
        }
    }
}
