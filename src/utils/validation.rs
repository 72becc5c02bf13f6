use regex::Regex;
use std::sync::OnceLock;
use validator::ValidationError;

/// 可选的兴趣标签
pub const INTERESTS: [&str; 8] = [
    "music",
    "technology",
    "food",
    "bakery",
    "design",
    "gospel",
    "dance",
    "art",
];

pub const MAX_HASHTAG_LENGTH: usize = 20;

fn username_pattern() -> &'static Regex {
    static USERNAME: OnceLock<Regex> = OnceLock::new();
    USERNAME.get_or_init(|| Regex::new(r"^[a-zA-Z0-9]{3,30}$").expect("valid username regex"))
}

/// 用户名只能包含字母和数字，长度 3-30
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    if username_pattern().is_match(username) {
        Ok(())
    } else {
        let mut error = ValidationError::new("username");
        error.message = Some("Username must be 3-30 alphanumeric characters".into());
        Err(error)
    }
}

pub fn validate_interests(interests: &Vec<String>) -> Result<(), ValidationError> {
    match interests.iter().find(|i| !INTERESTS.contains(&i.as_str())) {
        None => Ok(()),
        Some(unknown) => {
            let mut error = ValidationError::new("interests");
            error.message = Some(format!("Unknown interest: {}", unknown).into());
            Err(error)
        }
    }
}

pub fn validate_hashtags(hashtags: &Vec<String>) -> Result<(), ValidationError> {
    if hashtags
        .iter()
        .all(|tag| !tag.trim().is_empty() && tag.chars().count() <= MAX_HASHTAG_LENGTH)
    {
        Ok(())
    } else {
        let mut error = ValidationError::new("hashtags");
        error.message = Some("Hashtags must be 1-20 characters".into());
        Err(error)
    }
}

/// 由全名生成默认用户名：去掉非字母数字字符，小写，追加一位随机数字
pub fn default_username(full_name: &str) -> String {
    let base: String = full_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    let base = if base.len() < 2 { "user".to_string() } else { base };
    let truncated: String = base.chars().take(29).collect();
    format!("{}{}", truncated, rand::random::<u8>() % 10)
}

/// 标签统一去掉 `#` 并小写
pub fn normalize_hashtags(hashtags: Vec<String>) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::with_capacity(hashtags.len());
    for tag in hashtags {
        let tag = tag.trim().trim_start_matches('#').to_lowercase();
        if !tag.is_empty() && !normalized.contains(&tag) {
            normalized.push(tag);
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_validation() {
        assert!(validate_username("maria88").is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username("with space").is_err());
        assert!(validate_username("dash-name").is_err());
        assert!(validate_username(&"a".repeat(31)).is_err());
    }

    #[test]
    fn test_interest_validation() {
        assert!(validate_interests(&vec!["music".into(), "art".into()]).is_ok());
        assert!(validate_interests(&vec!["gardening".into()]).is_err());
    }

    #[test]
    fn default_usernames_are_valid() {
        for name in ["Ana María López", "Jo", "李雷", "Very Long Name That Goes On And On Forever"] {
            let username = default_username(name);
            assert!(validate_username(&username).is_ok(), "{}", username);
        }
    }

    #[test]
    fn hashtags_are_normalized() {
        let tags = normalize_hashtags(vec!["#Rust".into(), "rust".into(), " ".into(), "Art".into()]);
        assert_eq!(tags, vec!["rust".to_string(), "art".to_string()]);
    }
}
