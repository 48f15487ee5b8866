//! Login session model

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque login token bound to a user.
///
/// The same token is handed out by `/login/` (also set as a cookie) and by
/// `/token/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Token value (UUID v4)
    pub id: String,
    pub user_id: i64,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Issue a fresh token valid for `days`
    pub fn issue(user_id: i64, days: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            expires_at: now + Duration::days(days),
            created_at: now,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }
}
