use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserStats {
    pub active: usize,
    pub blocked: usize,
    pub reported: usize,
    pub deleted: usize,
    pub total: usize,
}

/// 帖子和评论共用
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentStats {
    pub active: usize,
    pub reported: usize,
    pub deleted: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionStats {
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardStats {
    pub users: UserStats,
    pub publications: ContentStats,
    pub comments: ContentStats,
    pub transactions: TransactionStats,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReportPeriod {
    Weekly,
    Monthly,
    Yearly,
}

impl ReportPeriod {
    pub fn length(&self) -> chrono::Duration {
        match self {
            ReportPeriod::Weekly => chrono::Duration::days(7),
            ReportPeriod::Monthly => chrono::Duration::days(30),
            ReportPeriod::Yearly => chrono::Duration::days(365),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ReportKind {
    RegisteredUsers,
    HighlightedPublications,
    MostCommented,
    TopMessagers,
    PremiumSubscriptions,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportQuery {
    pub period: Option<ReportPeriod>,
}

/// 本期与上期对比
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeriodComparison {
    pub current: usize,
    pub previous: usize,
    /// 上期为 0 时为 `None`
    pub change_percent: Option<f64>,
}

impl PeriodComparison {
    pub fn new(current: usize, previous: usize) -> Self {
        let change_percent = if previous == 0 {
            None
        } else {
            Some((current as f64 - previous as f64) / previous as f64 * 100.0)
        };
        Self {
            current,
            previous,
            change_percent,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HighlightShare {
    pub highlighted: usize,
    pub total: usize,
    pub percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MostCommented {
    pub publication_id: String,
    pub author: String,
    pub content: String,
    pub comments_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopMessager {
    pub user_id: String,
    pub username: String,
    pub messages_sent: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "report", content = "result", rename_all = "kebab-case")]
pub enum Report {
    RegisteredUsers(PeriodComparison),
    HighlightedPublications(HighlightShare),
    MostCommented(Vec<MostCommented>),
    TopMessagers(Vec<TopMessager>),
    PremiumSubscriptions(PeriodComparison),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminListQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparison_handles_an_empty_previous_period() {
        assert_eq!(PeriodComparison::new(4, 0).change_percent, None);
        assert_eq!(PeriodComparison::new(3, 2).change_percent, Some(50.0));
        assert_eq!(PeriodComparison::new(1, 4).change_percent, Some(-75.0));
    }
}
