use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::utils::serde_helpers::{thing_id, timestamp};
use crate::utils::validation::{validate_interests, validate_username};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
    UserPremium,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
            Role::UserPremium => "userpremium",
        }
    }

    /// 可以使用高亮等付费功能
    pub fn is_premium(&self) -> bool {
        matches!(self, Role::Admin | Role::UserPremium)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Blocked,
    Reported,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Blocked => "blocked",
            UserStatus::Reported => "reported",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(with = "thing_id")]
    pub id: String,
    pub full_name: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub status: UserStatus,
    #[serde(default)]
    pub interests: Vec<String>,
    pub profile_picture: Option<String>,
    pub bio: Option<String>,
    #[serde(default)]
    pub followers: Vec<String>,
    #[serde(default)]
    pub following: Vec<String>,
    #[serde(default)]
    pub blocked_users: Vec<String>,
    pub subscription: Option<String>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn has_blocked(&self, user_id: &str) -> bool {
        self.blocked_users.iter().any(|id| id == user_id)
    }

    pub fn is_following(&self, user_id: &str) -> bool {
        self.following.iter().any(|id| id == user_id)
    }

    /// 可以登录、被关注、收发消息
    pub fn is_reachable(&self) -> bool {
        !self.deleted && self.status != UserStatus::Blocked
    }
}

/// 对外展示的用户资料
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub full_name: String,
    pub username: String,
    pub role: Role,
    pub interests: Vec<String>,
    pub profile_picture: Option<String>,
    pub bio: Option<String>,
    pub followers_count: usize,
    pub following_count: usize,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            full_name: user.full_name.clone(),
            username: user.username.clone(),
            role: user.role,
            interests: user.interests.clone(),
            profile_picture: user.profile_picture.clone(),
            bio: user.bio.clone(),
            followers_count: user.followers.len(),
            following_count: user.following.len(),
            created_at: user.created_at,
        }
    }
}

/// 当前登录用户看到的账户信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub full_name: String,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub status: UserStatus,
    pub interests: Vec<String>,
    pub profile_picture: Option<String>,
    pub bio: Option<String>,
    pub followers: Vec<String>,
    pub following: Vec<String>,
    pub blocked_users: Vec<String>,
    pub subscription: Option<String>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl From<User> for Account {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            full_name: user.full_name,
            username: user.username,
            email: user.email,
            role: user.role,
            status: user.status,
            interests: user.interests,
            profile_picture: user.profile_picture,
            bio: user.bio,
            followers: user.followers,
            following: user.following,
            blocked_users: user.blocked_users,
            subscription: user.subscription,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 50, message = "Full name must be 3-50 characters"))]
    pub full_name: String,
    #[validate(custom = "validate_username")]
    pub username: Option<String>,
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 8, max = 15, message = "Password must be 8-15 characters"))]
    pub password: String,
    #[validate(must_match(other = "password", message = "Passwords do not match"))]
    pub confirm_password: String,
    #[serde(default)]
    #[validate(custom = "validate_interests")]
    pub interests: Vec<String>,
    #[validate(length(max = 255, message = "Bio must be at most 255 characters"))]
    pub bio: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ForgotPasswordRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ResetPasswordRequest {
    #[validate(length(min = 8, max = 15, message = "Password must be 8-15 characters"))]
    pub password: String,
    #[validate(must_match(other = "password", message = "Passwords do not match"))]
    pub confirm_password: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct EditPasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,
    #[validate(length(min = 8, max = 15, message = "Password must be 8-15 characters"))]
    pub new_password: String,
    #[validate(must_match(other = "new_password", message = "Passwords do not match"))]
    pub confirm_password: String,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct EditProfileRequest {
    #[validate(length(min = 3, max = 50, message = "Full name must be 3-50 characters"))]
    pub full_name: Option<String>,
    #[validate(custom = "validate_username")]
    pub username: Option<String>,
    #[validate(length(max = 255, message = "Bio must be at most 255 characters"))]
    pub bio: Option<String>,
    #[validate(custom = "validate_interests")]
    pub interests: Option<Vec<String>>,
    #[validate(length(max = 512))]
    pub profile_picture: Option<String>,
}
