//! Social graph types

use serde::{Deserialize, Serialize};

/// Compact view of a user inside a follower/following list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
}

/// Sizes of both sides of a user's relationships
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowCounts {
    pub followers: i64,
    pub following: i64,
}

/// Result of a follow or unfollow request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowOutcome {
    /// The edge was added or removed
    Changed,
    /// The graph already had the requested shape
    Unchanged,
}
