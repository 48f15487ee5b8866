//! Shared API response types

use serde::Serialize;

use crate::models::{PagedResult, Permission, Principal, Profile, Role, User};

/// One page of a list endpoint
#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub count: i64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
    pub results: Vec<T>,
}

impl<T> From<PagedResult<T>> for ListResponse<T> {
    fn from(paged: PagedResult<T>) -> Self {
        Self {
            count: paged.total,
            page: paged.page,
            page_size: paged.per_page,
            total_pages: paged.total_pages(),
            results: paged.items,
        }
    }
}

/// Account fields safe to return to their owner
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub date_joined: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            is_staff: user.is_staff,
            is_superuser: user.is_superuser,
            date_joined: user.created_at.to_rfc3339(),
        }
    }
}

/// The caller's own account with profile fields merged in
#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    #[serde(flatten)]
    pub user: UserResponse,
    pub bio: String,
    pub profile_picture: Option<String>,
}

impl ProfileResponse {
    pub fn new(user: User, profile: Profile) -> Self {
        Self {
            user: user.into(),
            bio: profile.bio,
            profile_picture: profile.profile_picture,
        }
    }
}

/// Roles and effective permissions of a user
#[derive(Debug, Serialize)]
pub struct PermissionsResponse {
    pub user_id: i64,
    pub username: String,
    pub is_superuser: bool,
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
}

impl From<Principal> for PermissionsResponse {
    fn from(principal: Principal) -> Self {
        Self {
            user_id: principal.user_id,
            username: principal.username,
            is_superuser: principal.is_superuser,
            roles: principal.roles,
            permissions: principal.permissions.iter().copied().collect(),
        }
    }
}
