//! User model
//!
//! Accounts are shared by all three applications: catalog staff, blog
//! authors and members of the social graph.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A registered account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    /// Unique login name
    pub username: String,
    /// Unique email address
    pub email: String,
    /// Argon2 PHC string
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    /// May manage other accounts
    pub is_staff: bool,
    /// Holds every catalog permission
    pub is_superuser: bool,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Build an unsaved user. The password must already be hashed.
    pub fn new(username: String, email: String, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            username,
            email,
            password_hash,
            first_name: String::new(),
            last_name: String::new(),
            date_of_birth: None,
            is_staff: false,
            is_superuser: false,
            status: UserStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Promote to superuser. Superusers are always staff.
    pub fn into_superuser(mut self) -> Self {
        self.is_staff = true;
        self.is_superuser = true;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

/// Account state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    /// Cannot log in
    Inactive,
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserStatus::Active => write!(f, "active"),
            UserStatus::Inactive => write!(f, "inactive"),
        }
    }
}

impl FromStr for UserStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(UserStatus::Active),
            "inactive" => Ok(UserStatus::Inactive),
            _ => Err(anyhow::anyhow!("Invalid user status: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_new() {
        let user = User::new(
            "testuser".to_string(),
            "test@example.com".to_string(),
            "hashed_password".to_string(),
        );

        assert_eq!(user.id, 0);
        assert_eq!(user.username, "testuser");
        assert!(user.is_active());
        assert!(!user.is_staff);
        assert!(!user.is_superuser);
    }

    #[test]
    fn test_superuser_is_staff() {
        let user = User::new("root".into(), "root@example.com".into(), "hash".into())
            .into_superuser();
        assert!(user.is_staff);
        assert!(user.is_superuser);
    }

    #[test]
    fn test_full_name() {
        let mut user = User::new("jd".into(), "jd@example.com".into(), "hash".into());
        assert_eq!(user.full_name(), "");
        user.first_name = "Jane".into();
        assert_eq!(user.full_name(), "Jane");
        user.last_name = "Doe".into();
        assert_eq!(user.full_name(), "Jane Doe");
    }

    #[test]
    fn test_user_status_from_str() {
        assert_eq!(UserStatus::from_str("ACTIVE").unwrap(), UserStatus::Active);
        assert_eq!(UserStatus::from_str("inactive").unwrap(), UserStatus::Inactive);
        assert!(UserStatus::from_str("banned").is_err());
    }
}
