use crate::value_objects::{PasswordHash, Timestamp, UserEmail, UserId, Username};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: Username,
    pub email: UserEmail,
    #[serde(skip_serializing)] // 密码字段不暴露给客户端
    pub password: PasswordHash,
    pub first_name: String,
    pub last_name: String,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub is_active: bool,
    pub is_online: bool,
    pub last_seen: Timestamp,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// 资料更新，`None` 表示保持原值。
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub username: Option<Username>,
    pub email: Option<UserEmail>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar: Option<Option<String>>,
    pub bio: Option<Option<String>>,
}

impl User {
    pub fn register(
        id: UserId,
        username: Username,
        email: UserEmail,
        password: PasswordHash,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            username,
            email,
            password,
            first_name: String::new(),
            last_name: String::new(),
            avatar: None,
            bio: None,
            is_active: true,
            is_online: false,
            last_seen: now,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn deactivate(&mut self, now: Timestamp) {
        self.is_active = false;
        self.updated_at = now;
    }

    pub fn update_profile(&mut self, changes: ProfileChanges, now: Timestamp) {
        if let Some(username) = changes.username {
            self.username = username;
        }
        if let Some(email) = changes.email {
            self.email = email;
        }
        if let Some(first_name) = changes.first_name {
            self.first_name = first_name;
        }
        if let Some(last_name) = changes.last_name {
            self.last_name = last_name;
        }
        if let Some(avatar) = changes.avatar {
            self.avatar = avatar;
        }
        if let Some(bio) = changes.bio {
            self.bio = bio;
        }
        self.updated_at = now;
    }

    pub fn set_password(&mut self, password: PasswordHash, now: Timestamp) {
        self.password = password;
        self.updated_at = now;
    }

    pub fn set_online(&mut self, online: bool, now: Timestamp) {
        self.is_online = online;
        self.last_seen = now;
    }

    /// 搜索匹配：用户名、邮箱、名、姓的大小写不敏感子串匹配。
    pub fn matches_search(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return true;
        }
        [
            self.username.as_str(),
            self.email.as_str(),
            self.first_name.as_str(),
            self.last_name.as_str(),
        ]
        .iter()
        .any(|field| field.to_lowercase().contains(&query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_user() -> User {
        User::register(
            UserId::from(Uuid::new_v4()),
            Username::parse("alice").expect("username"),
            UserEmail::parse("alice@example.com").expect("email"),
            PasswordHash::new("hash").expect("hash"),
            Utc::now(),
        )
    }

    #[test]
    fn full_name_joins_first_and_last() {
        let mut user = sample_user();
        user.update_profile(
            ProfileChanges {
                first_name: Some("Alice".to_string()),
                last_name: Some("Liddell".to_string()),
                ..ProfileChanges::default()
            },
            Utc::now(),
        );
        assert_eq!(user.full_name(), "Alice Liddell");
    }

    #[test]
    fn search_covers_names_and_email() {
        let mut user = sample_user();
        user.last_name = "Liddell".to_string();
        assert!(user.matches_search("ALI"));
        assert!(user.matches_search("example.com"));
        assert!(user.matches_search("liddell"));
        assert!(!user.matches_search("bob"));
        assert!(user.matches_search("  "));
    }
}
