use crate::{
    config::Config,
    error::{AppError, Result},
    models::user::Role,
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm as Argon2Algorithm, Argon2, Params, Version,
};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
    Reset,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,        // 用户ID
    pub role: Role,         // 签发时的角色
    pub kind: TokenKind,    // 令牌用途
    pub exp: i64,           // 过期时间
    pub iat: i64,           // 签发时间
}

/// 已认证的请求用户，由认证中间件放入请求扩展
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_premium(&self) -> bool {
        self.role.is_premium()
    }
}

/// 一次登录签发的令牌对
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Clone)]
pub struct AuthService {
    config: Config,
}

impl AuthService {
    pub async fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
        })
    }

    fn hasher(&self) -> Result<Argon2<'static>> {
        let params = Params::new(
            Params::DEFAULT_M_COST,
            self.config.salt_rounds.max(1),
            Params::DEFAULT_P_COST,
            None,
        )
        .map_err(|e| AppError::Internal(format!("Invalid password hash parameters: {}", e)))?;
        Ok(Argon2::new(Argon2Algorithm::Argon2id, Version::V0x13, params))
    }

    pub fn hash_password(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.hasher()?
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
    }

    pub fn verify_password(&self, password: &str, password_hash: &str) -> Result<bool> {
        let parsed = PasswordHash::new(password_hash)
            .map_err(|e| AppError::Internal(format!("Stored password hash is invalid: {}", e)))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }

    fn secret(&self, kind: TokenKind) -> &str {
        match kind {
            TokenKind::Access => &self.config.jwt_secret,
            TokenKind::Refresh => &self.config.jwt_refresh_secret,
            TokenKind::Reset => &self.config.jwt_reset_secret,
        }
    }

    fn ttl(&self, kind: TokenKind) -> i64 {
        match kind {
            TokenKind::Access => self.config.access_token_ttl_secs,
            TokenKind::Refresh => self.config.refresh_token_ttl_secs,
            TokenKind::Reset => self.config.reset_token_ttl_secs,
        }
    }

    pub fn issue_token(&self, user_id: &str, role: Role, kind: TokenKind) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            role,
            kind,
            iat: now.timestamp(),
            exp: (now + Duration::seconds(self.ttl(kind))).timestamp(),
        };

        Ok(encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret(kind).as_bytes()),
        )?)
    }

    pub fn verify_token(&self, token: &str, kind: TokenKind) -> Result<Claims> {
        let decoding_key = DecodingKey::from_secret(self.secret(kind).as_bytes());
        let validation = Validation::new(Algorithm::HS256);

        match decode::<Claims>(token, &decoding_key, &validation) {
            Ok(token_data) if token_data.claims.kind == kind => {
                debug!("Token verified for user: {}", token_data.claims.sub);
                Ok(token_data.claims)
            }
            Ok(_) => Err(AppError::Authentication("Invalid token".to_string())),
            Err(e) => {
                warn!("Token verification failed: {}", e);
                Err(AppError::Authentication("Invalid token".to_string()))
            }
        }
    }

    pub fn issue_session(&self, user_id: &str, role: Role) -> Result<SessionTokens> {
        Ok(SessionTokens {
            access_token: self.issue_token(user_id, role, TokenKind::Access)?,
            refresh_token: self.issue_token(user_id, role, TokenKind::Refresh)?,
        })
    }

    fn cookie(&self, name: &str, value: &str, max_age: i64) -> String {
        let secure = if self.config.is_production() { "; Secure" } else { "" };
        format!(
            "{}={}; HttpOnly; Path=/; Max-Age={}; SameSite=Strict{}",
            name, value, max_age, secure
        )
    }

    /// `Set-Cookie` 头的值
    pub fn session_cookies(&self, tokens: &SessionTokens) -> [String; 2] {
        [
            self.cookie(ACCESS_COOKIE, &tokens.access_token, self.config.access_token_ttl_secs),
            self.cookie(REFRESH_COOKIE, &tokens.refresh_token, self.config.refresh_token_ttl_secs),
        ]
    }

    pub fn access_cookie(&self, access_token: &str) -> String {
        self.cookie(ACCESS_COOKIE, access_token, self.config.access_token_ttl_secs)
    }

    pub fn cleared_cookies(&self) -> [String; 2] {
        [self.cookie(ACCESS_COOKIE, "", 0), self.cookie(REFRESH_COOKIE, "", 0)]
    }
}

// Axum extractor for authentication
#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| AppError::Authentication("Authentication required".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn service() -> AuthService {
        AuthService::new(&Config::default()).await.unwrap()
    }

    #[tokio::test]
    async fn passwords_round_trip_through_argon2() {
        let auth = service().await;
        let hash = auth.hash_password("secret123").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(auth.verify_password("secret123", &hash).unwrap());
        assert!(!auth.verify_password("secret124", &hash).unwrap());
    }

    #[tokio::test]
    async fn tokens_are_bound_to_their_kind() {
        let auth = service().await;
        let token = auth.issue_token("u1", Role::UserPremium, TokenKind::Access).unwrap();

        let claims = auth.verify_token(&token, TokenKind::Access).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.role, Role::UserPremium);
        assert!(auth.verify_token(&token, TokenKind::Refresh).is_err());
        assert!(auth.verify_token("garbage", TokenKind::Access).is_err());
    }

    #[tokio::test]
    async fn cookies_are_http_only() {
        let auth = service().await;
        let tokens = auth.issue_session("u1", Role::User).unwrap();
        let [access, refresh] = auth.session_cookies(&tokens);
        assert!(access.starts_with("accessToken="));
        assert!(access.contains("HttpOnly"));
        assert!(refresh.starts_with("refreshToken="));
        assert!(auth.cleared_cookies()[0].contains("Max-Age=0"));
    }
}
