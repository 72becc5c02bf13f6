use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::utils::serde_helpers::{option_timestamp, thing_id, timestamp};

/// 会员计划
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Monthly,
    Yearly,
}

/// 试用期天数
pub const TRIAL_DAYS: i64 = 7;

impl Plan {
    pub const ALL: [Plan; 2] = [Plan::Monthly, Plan::Yearly];

    /// 价格（美分）
    pub fn price(&self) -> i64 {
        match self {
            Plan::Monthly => 500,
            Plan::Yearly => 4800,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Plan::Monthly => "Premium Monthly",
            Plan::Yearly => "Premium Yearly",
        }
    }

    pub fn period(&self) -> Duration {
        match self {
            Plan::Monthly => Duration::days(30),
            Plan::Yearly => Duration::days(365),
        }
    }
}

/// 计划目录条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanInfo {
    pub plan: Plan,
    pub name: String,
    pub product_id: String,
    pub price: i64,
    pub currency: String,
    pub period_days: i64,
    pub trial_days: i64,
}

/// 用户订阅
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(with = "thing_id")]
    pub id: String,
    pub user: String,
    pub plan: Plan,
    pub price: i64,
    pub currency: String,
    #[serde(with = "timestamp")]
    pub start_date: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub end_date: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub trial_end: DateTime<Utc>,
    pub is_active: bool,
    pub external_reference: Option<String>,
    #[serde(default, with = "option_timestamp")]
    pub canceled_at: Option<DateTime<Utc>>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }
}

/// 支付流水
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(with = "thing_id")]
    pub id: String,
    pub user: String,
    pub subscription: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: TransactionStatus,
    pub payment_method: String,
    pub external_reference: Option<String>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

/// 订阅状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionStatusView {
    pub is_premium: bool,
    pub in_trial: bool,
    pub subscription: Option<Subscription>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SubscribeRequest {
    pub plan: Plan,
    #[validate(length(min = 1, max = 128))]
    pub external_reference: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RenewRequest {
    #[validate(length(min = 1, max = 128))]
    pub external_reference: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}
