use crate::{
    config::Config,
    error::{AppError, Result},
    models::{
        publication::{ContentStatus, Publication, PublicationView},
        user::{User, UserProfile, UserStatus},
    },
    services::{
        database::{Database, PaginatedResult},
        publication::PUBLICATION_TABLE,
        user::USER_TABLE,
    },
    store::{Condition, Query},
};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct SearchService {
    db: Arc<Database>,
    config: Config,
}

impl SearchService {
    pub async fn new(db: Arc<Database>, config: &Config) -> Result<Self> {
        Ok(Self {
            db,
            config: config.clone(),
        })
    }

    /// 按姓名、用户名、简介和兴趣搜索活跃用户
    pub async fn search_users(
        &self,
        term: &str,
        page: Option<usize>,
        limit: Option<usize>,
    ) -> Result<PaginatedResult<UserProfile>> {
        let term = search_term(term)?;
        debug!("Searching users for: {}", term);
        let (page, limit) = self.config.page_params(page, limit);

        let query = Query::table(USER_TABLE)
            .not_deleted()
            .eq("status", UserStatus::Active.as_str())
            .filter(Condition::Any(vec![
                Condition::text_contains("full_name", term),
                Condition::text_contains("username", term),
                Condition::text_contains("bio", term),
                Condition::text_contains("interests", term),
            ]))
            .sort_asc("username");

        Ok(self
            .db
            .paginate::<User>(query, page, limit)
            .await?
            .map(|user| UserProfile::from(&user)))
    }

    /// 按内容和话题标签搜索帖子
    pub async fn search_publications(
        &self,
        term: &str,
        page: Option<usize>,
        limit: Option<usize>,
    ) -> Result<PaginatedResult<PublicationView>> {
        let term = search_term(term)?;
        debug!("Searching publications for: {}", term);
        let (page, limit) = self.config.page_params(page, limit);

        let query = Query::table(PUBLICATION_TABLE)
            .not_deleted()
            .eq("status", ContentStatus::Active.as_str())
            .filter(Condition::Any(vec![
                Condition::text_contains("content", term),
                Condition::text_contains("hashtags", term.trim_start_matches('#')),
            ]))
            .sort_desc("created_at");

        Ok(self
            .db
            .paginate::<Publication>(query, page, limit)
            .await?
            .map(PublicationView::from))
    }
}

fn search_term(term: &str) -> Result<&str> {
    let term = term.trim();
    if term.is_empty() {
        Err(AppError::bad_request("Search term is required"))
    } else {
        Ok(term)
    }
}
