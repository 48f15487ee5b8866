//! User profile model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One-to-one companion row of a user, created in the same transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: i64,
    /// Free text, at most 500 characters
    pub bio: String,
    /// Path or URL of an avatar picture
    pub profile_picture: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn empty(user_id: i64) -> Self {
        Self {
            user_id,
            bio: String::new(),
            profile_picture: None,
            updated_at: Utc::now(),
        }
    }
}

/// Fields a user may change on their own account and profile.
///
/// `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    /// `Some(None)` clears the picture
    pub profile_picture: Option<Option<String>>,
}
