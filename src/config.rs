use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub server_host: String,
    pub server_port: u16,
    pub environment: String,
    pub log_level: String,

    // Database configuration
    pub database_url: String,
    pub database_namespace: String,
    pub database_name: String,
    pub database_username: String,
    pub database_password: String,

    // Authentication configuration
    pub jwt_secret: String,
    pub jwt_refresh_secret: String,
    pub jwt_reset_secret: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    pub reset_token_ttl_secs: i64,
    pub salt_rounds: u32,

    // Email configuration
    pub enable_email: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub smtp_from_email: String,

    // Frontend URLs
    pub frontend_url: String,

    // Pagination
    pub default_page_size: usize,
    pub max_page_size: usize,

    // Premium plans
    pub premium_product_id: String,
    pub premium_currency: String,

    // Rate limiting
    pub rate_limit_requests: u32,
    /// 仅在反向代理之后开启，否则客户端可以伪造 `X-Forwarded-For`
    pub trust_proxy_headers: bool,

    // CORS configuration
    pub cors_allowed_origins: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Config {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            database_namespace: env::var("DATABASE_NAMESPACE")
                .unwrap_or_else(|_| "kirtily".to_string()),
            database_name: env::var("DATABASE_NAME")
                .unwrap_or_else(|_| "social".to_string()),
            database_username: env::var("DATABASE_USERNAME")
                .unwrap_or_else(|_| "root".to_string()),
            database_password: env::var("DATABASE_PASSWORD")
                .unwrap_or_else(|_| "root".to_string()),

            jwt_secret: env::var("JWT_SECRET")
                .map_err(|_| anyhow::anyhow!("JWT_SECRET must be set"))?,
            jwt_refresh_secret: env::var("JWT_REFRESH_SECRET")
                .map_err(|_| anyhow::anyhow!("JWT_REFRESH_SECRET must be set"))?,
            jwt_reset_secret: env::var("JWT_RESET_SECRET")
                .map_err(|_| anyhow::anyhow!("JWT_RESET_SECRET must be set"))?,
            access_token_ttl_secs: env::var("ACCESS_TOKEN_TTL_SECS")
                .unwrap_or_else(|_| "900".to_string())
                .parse()?,
            refresh_token_ttl_secs: env::var("REFRESH_TOKEN_TTL_SECS")
                .unwrap_or_else(|_| "604800".to_string())
                .parse()?,
            reset_token_ttl_secs: env::var("RESET_TOKEN_TTL_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()?,
            salt_rounds: env::var("SALT_ROUNDS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()?,

            enable_email: env::var("ENABLE_EMAIL")
                .unwrap_or_else(|_| "false".to_string())
                .parse()?,
            smtp_host: env::var("SMTP_HOST")
                .unwrap_or_else(|_| "localhost".to_string()),
            smtp_port: env::var("SMTP_PORT")
                .unwrap_or_else(|_| "587".to_string())
                .parse()?,
            smtp_username: env::var("SMTP_USERNAME")
                .unwrap_or_default(),
            smtp_password: env::var("SMTP_PASSWORD")
                .unwrap_or_default(),
            smtp_from_email: env::var("SMTP_FROM_EMAIL")
                .unwrap_or_else(|_| "noreply@kirtily.com".to_string()),

            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),

            default_page_size: env::var("DEFAULT_PAGE_SIZE")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            max_page_size: env::var("MAX_PAGE_SIZE")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,

            premium_product_id: env::var("PREMIUM_PRODUCT_ID")
                .unwrap_or_else(|_| "kirtily-premium".to_string()),
            premium_currency: env::var("PREMIUM_CURRENCY")
                .unwrap_or_else(|_| "USD".to_string()),

            rate_limit_requests: env::var("RATE_LIMIT_REQUESTS")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,
            trust_proxy_headers: env::var("TRUST_PROXY_HEADERS")
                .unwrap_or_else(|_| "false".to_string())
                .parse()?,

            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url.starts_with("memory")
    }

    /// 分页参数归一化：页码从 1 开始，每页数量不超过上限
    pub fn page_params(&self, page: Option<usize>, limit: Option<usize>) -> (usize, usize) {
        let page = page.unwrap_or(1).max(1);
        let limit = limit
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size);
        (page, limit)
    }
}

impl Default for Config {
    /// 开发与测试用配置：内存存储、固定密钥
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 3000,
            environment: "development".to_string(),
            log_level: "debug".to_string(),
            database_url: "memory".to_string(),
            database_namespace: "kirtily".to_string(),
            database_name: "social".to_string(),
            database_username: "root".to_string(),
            database_password: "root".to_string(),
            jwt_secret: "dev-access-secret".to_string(),
            jwt_refresh_secret: "dev-refresh-secret".to_string(),
            jwt_reset_secret: "dev-reset-secret".to_string(),
            access_token_ttl_secs: 900,
            refresh_token_ttl_secs: 7 * 24 * 3600,
            reset_token_ttl_secs: 3600,
            salt_rounds: 1,
            enable_email: false,
            smtp_host: "localhost".to_string(),
            smtp_port: 587,
            smtp_username: String::new(),
            smtp_password: String::new(),
            smtp_from_email: "noreply@kirtily.com".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            default_page_size: 10,
            max_page_size: 100,
            premium_product_id: "kirtily-premium".to_string(),
            premium_currency: "USD".to_string(),
            rate_limit_requests: 1000,
            trust_proxy_headers: false,
            cors_allowed_origins: "http://localhost:5173".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_params_are_clamped() {
        let config = Config::default();
        assert_eq!(config.page_params(None, None), (1, 10));
        assert_eq!(config.page_params(Some(0), Some(0)), (1, 1));
        assert_eq!(config.page_params(Some(3), Some(5000)), (3, 100));
    }
}
