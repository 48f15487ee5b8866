//! Social graph service
//!
//! Follow edges are directed: following someone never makes them follow
//! back. Both stored sides of an edge change in one transaction (see the
//! follow repository).

use crate::db::repositories::{FollowRepository, ProfileRepository, UserRepository};
use crate::models::{FollowCounts, FollowOutcome, ListParams, PagedResult, UserSummary};
use anyhow::Context;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum FollowServiceError {
    #[error("You cannot follow yourself")]
    SelfFollow,

    #[error("User not found")]
    UserNotFound,

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// What anyone may see about a user
#[derive(Debug, Clone, Serialize)]
pub struct PublicProfile {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub bio: String,
    pub profile_picture: Option<String>,
    pub followers_count: i64,
    pub following_count: i64,
}

pub struct FollowService {
    follow_repo: Arc<dyn FollowRepository>,
    user_repo: Arc<dyn UserRepository>,
    profile_repo: Arc<dyn ProfileRepository>,
}

impl FollowService {
    pub fn new(
        follow_repo: Arc<dyn FollowRepository>,
        user_repo: Arc<dyn UserRepository>,
        profile_repo: Arc<dyn ProfileRepository>,
    ) -> Self {
        Self {
            follow_repo,
            user_repo,
            profile_repo,
        }
    }

    /// Following someone already followed is not an error
    pub async fn follow(&self, user_id: i64, target_id: i64) -> Result<FollowOutcome, FollowServiceError> {
        if user_id == target_id {
            return Err(FollowServiceError::SelfFollow);
        }
        self.ensure_user(target_id).await?;

        let outcome = self
            .follow_repo
            .follow(user_id, target_id)
            .await
            .context("Failed to follow user")?;
        if outcome == FollowOutcome::Changed {
            tracing::info!(user_id, target_id, "User followed");
        }
        Ok(outcome)
    }

    pub async fn unfollow(&self, user_id: i64, target_id: i64) -> Result<FollowOutcome, FollowServiceError> {
        self.ensure_user(target_id).await?;

        let outcome = self
            .follow_repo
            .unfollow(user_id, target_id)
            .await
            .context("Failed to unfollow user")?;
        if outcome == FollowOutcome::Changed {
            tracing::info!(user_id, target_id, "User unfollowed");
        }
        Ok(outcome)
    }

    pub async fn profile(&self, user_id: i64) -> Result<PublicProfile, FollowServiceError> {
        let user = self
            .user_repo
            .get_by_id(user_id)
            .await
            .context("Failed to get user")?
            .ok_or(FollowServiceError::UserNotFound)?;
        let profile = self
            .profile_repo
            .get_by_user(user_id)
            .await
            .context("Failed to load profile")?;
        let FollowCounts { followers, following } = self
            .follow_repo
            .counts(user_id)
            .await
            .context("Failed to count relationships")?;

        let (bio, profile_picture) = profile
            .map(|p| (p.bio, p.profile_picture))
            .unwrap_or_default();
        Ok(PublicProfile {
            id: user.id,
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            bio,
            profile_picture,
            followers_count: followers,
            following_count: following,
        })
    }

    pub async fn followers(
        &self,
        user_id: i64,
        params: &ListParams,
    ) -> Result<PagedResult<UserSummary>, FollowServiceError> {
        self.ensure_user(user_id).await?;
        Ok(self
            .follow_repo
            .followers(user_id, params)
            .await
            .context("Failed to list followers")?)
    }

    pub async fn following(
        &self,
        user_id: i64,
        params: &ListParams,
    ) -> Result<PagedResult<UserSummary>, FollowServiceError> {
        self.ensure_user(user_id).await?;
        Ok(self
            .follow_repo
            .following(user_id, params)
            .await
            .context("Failed to list followed users")?)
    }

    async fn ensure_user(&self, user_id: i64) -> Result<(), FollowServiceError> {
        self.user_repo
            .get_by_id(user_id)
            .await
            .context("Failed to get user")?
            .map(|_| ())
            .ok_or(FollowServiceError::UserNotFound)
    }
}
