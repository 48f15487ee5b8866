//! Access control
//!
//! [`authorize`] is a pure decision over (principal, action, resource).
//! Catalog resources are gated by permissions that come from roles; blog
//! content and profiles are gated by ownership. Reads follow the configured
//! [`ReadAccess`] policy of the resource family.
//!
//! [`AccessService`] keeps the role table in step with the built-in role
//! definitions and resolves a user into a [`Principal`].

use crate::cache::{Cache, CacheLayer};
use crate::config::AccessConfig;
use crate::db::repositories::{RoleRepository, UserRepository};
use crate::models::{Permission, PermissionSet, Principal, ReadAccess, Role, User};
use anyhow::Context;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    View,
    List,
    Create,
    Update,
    Delete,
}

impl Action {
    pub fn is_read(&self) -> bool {
        matches!(self, Action::View | Action::List)
    }
}

/// What an action targets. Owned resources carry their owner for detail
/// actions; `None` when there is no concrete object yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Book,
    Author,
    /// Libraries, their shelves and librarians
    Library,
    Post { owner_id: Option<i64> },
    Comment { owner_id: Option<i64> },
    Profile { owner_id: Option<i64> },
    /// The follow graph of users
    Follow,
    /// Role assignments of users
    RoleAssignment,
}

impl Resource {
    fn owner_id(&self) -> Option<Option<i64>> {
        match self {
            Resource::Post { owner_id }
            | Resource::Comment { owner_id }
            | Resource::Profile { owner_id } => Some(*owner_id),
            _ => None,
        }
    }

    /// The configured read policy of this resource family
    pub fn read_policy(&self, config: &AccessConfig) -> ReadAccess {
        match self {
            Resource::Book | Resource::Author | Resource::Library => config.books_read,
            Resource::Post { .. } | Resource::Comment { .. } => config.posts_read,
            Resource::Profile { .. } | Resource::Follow => config.profiles_read,
            Resource::RoleAssignment => ReadAccess::Authenticated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DenyReason {
    #[error("Authentication credentials were not provided")]
    Unauthenticated,

    #[error("You do not have the '{0}' permission")]
    MissingPermission(Permission),

    #[error("You can only modify content you own")]
    NotOwner,

    #[error("Only superusers can perform this action")]
    SuperuserRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn into_result(self) -> Result<(), DenyReason> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => Err(reason),
        }
    }
}

/// Permission required for an action on a catalog resource
fn catalog_permission(action: Action) -> Permission {
    match action {
        Action::View | Action::List => Permission::CanView,
        Action::Create => Permission::CanCreate,
        Action::Update => Permission::CanEdit,
        Action::Delete => Permission::CanDelete,
    }
}

fn require(principal: &Principal, permission: Permission) -> Decision {
    if principal.has(permission) {
        Decision::Allow
    } else {
        Decision::Deny(DenyReason::MissingPermission(permission))
    }
}

/// Decide whether `principal` may perform `action` on `resource`.
///
/// `read_access` is the policy for reads of this resource family; writes
/// always require a principal.
pub fn authorize(
    principal: Option<&Principal>,
    action: Action,
    resource: Resource,
    read_access: ReadAccess,
) -> Decision {
    if action.is_read() {
        let is_catalog = matches!(resource, Resource::Book | Resource::Author | Resource::Library);
        return match (read_access, principal) {
            (ReadAccess::Public, _) => Decision::Allow,
            (_, None) => Decision::Deny(DenyReason::Unauthenticated),
            (ReadAccess::Permission, Some(p)) if is_catalog => require(p, Permission::CanView),
            (_, Some(_)) => Decision::Allow,
        };
    }

    let Some(principal) = principal else {
        return Decision::Deny(DenyReason::Unauthenticated);
    };

    match resource {
        Resource::Book | Resource::Author | Resource::Library => {
            require(principal, catalog_permission(action))
        }
        Resource::Follow => Decision::Allow,
        Resource::RoleAssignment => {
            if principal.is_superuser {
                Decision::Allow
            } else {
                Decision::Deny(DenyReason::SuperuserRequired)
            }
        }
        owned => match (action, owned.owner_id().flatten()) {
            (Action::Create, _) => Decision::Allow,
            (_, Some(owner_id)) if owner_id == principal.user_id => Decision::Allow,
            _ => Decision::Deny(DenyReason::NotOwner),
        },
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AccessServiceError {
    #[error("User not found")]
    UserNotFound,

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

fn principal_key(user_id: i64) -> String {
    format!("perms:{}", user_id)
}

pub struct AccessService {
    role_repo: Arc<dyn RoleRepository>,
    user_repo: Arc<dyn UserRepository>,
    cache: Arc<Cache>,
}

impl AccessService {
    pub fn new(
        role_repo: Arc<dyn RoleRepository>,
        user_repo: Arc<dyn UserRepository>,
        cache: Arc<Cache>,
    ) -> Self {
        Self {
            role_repo,
            user_repo,
            cache,
        }
    }

    /// Create every built-in role that is missing and reset its
    /// permissions to the built-in set
    pub async fn sync_roles(&self) -> Result<(), AccessServiceError> {
        for role in Role::ALL {
            self.role_repo
                .sync_role(role)
                .await
                .with_context(|| format!("Failed to sync role {}", role))?;
            tracing::info!(
                role = role.slug(),
                permissions = role.default_permissions().len(),
                "Role synchronised"
            );
        }
        self.cache
            .delete_pattern("perms:*")
            .await
            .context("Failed to invalidate cached permissions")?;
        Ok(())
    }

    /// Resolve a user's roles and permissions, cached under `perms:{id}`
    pub async fn principal_for(&self, user: &User) -> Result<Principal, AccessServiceError> {
        let key = principal_key(user.id);
        match self.cache.get::<Principal>(&key).await {
            Ok(Some(principal)) => return Ok(principal),
            Ok(None) => {}
            Err(e) => tracing::warn!("Ignoring unreadable cache entry {}: {}", key, e),
        }

        let roles = self
            .role_repo
            .roles_for_user(user.id)
            .await
            .context("Failed to load user roles")?;
        let permissions = if user.is_superuser {
            PermissionSet::all()
        } else {
            self.role_repo
                .permissions_for_user(user.id)
                .await
                .context("Failed to load user permissions")?
        };

        let principal = Principal {
            user_id: user.id,
            username: user.username.clone(),
            is_superuser: user.is_superuser,
            roles,
            permissions,
        };

        if let Err(e) = self.cache.set(&key, &principal, self.cache.default_ttl()).await {
            tracing::warn!("Failed to cache principal {}: {}", key, e);
        }
        Ok(principal)
    }

    /// Replace the roles of a user and return the refreshed principal
    pub async fn set_user_roles(
        &self,
        user_id: i64,
        roles: &[Role],
    ) -> Result<Principal, AccessServiceError> {
        let user = self
            .user_repo
            .get_by_id(user_id)
            .await
            .context("Failed to load user")?
            .ok_or(AccessServiceError::UserNotFound)?;

        let mut roles = roles.to_vec();
        roles.sort();
        roles.dedup();

        self.role_repo
            .set_user_roles(user_id, &roles)
            .await
            .context("Failed to assign roles")?;
        self.invalidate(user_id).await;

        tracing::info!(user_id, roles = ?roles, "User roles replaced");
        self.principal_for(&user).await
    }

    /// Drop the cached principal of a user
    pub async fn invalidate(&self, user_id: i64) {
        if let Err(e) = self.cache.delete(&principal_key(user_id)).await {
            tracing::warn!("Failed to invalidate cached principal {}: {}", user_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::db::repositories::{SqlxRoleRepository, SqlxUserRepository};
    use crate::db::{create_test_pool, migrations};

    fn principal(user_id: i64, roles: &[Role]) -> Principal {
        Principal {
            user_id,
            username: format!("user{}", user_id),
            is_superuser: false,
            roles: roles.to_vec(),
            permissions: PermissionSet::from_roles(roles),
        }
    }

    fn superuser(user_id: i64) -> Principal {
        Principal {
            is_superuser: true,
            permissions: PermissionSet::all(),
            ..principal(user_id, &[])
        }
    }

    const WRITES: [Action; 3] = [Action::Create, Action::Update, Action::Delete];

    #[test]
    fn test_viewer_cannot_write_books() {
        let viewer = principal(1, &[Role::Viewer]);
        for action in WRITES {
            let decision = authorize(Some(&viewer), action, Resource::Book, ReadAccess::Permission);
            assert!(matches!(decision, Decision::Deny(DenyReason::MissingPermission(_))));
        }
        assert!(authorize(Some(&viewer), Action::List, Resource::Book, ReadAccess::Permission)
            .is_allowed());
    }

    #[test]
    fn test_editor_cannot_delete() {
        let editor = principal(1, &[Role::Editor]);
        assert!(authorize(Some(&editor), Action::Create, Resource::Book, ReadAccess::Permission)
            .is_allowed());
        assert!(authorize(Some(&editor), Action::Update, Resource::Author, ReadAccess::Permission)
            .is_allowed());
        assert_eq!(
            authorize(Some(&editor), Action::Delete, Resource::Book, ReadAccess::Permission),
            Decision::Deny(DenyReason::MissingPermission(Permission::CanDelete))
        );
    }

    #[test]
    fn test_libraries_use_catalog_permissions() {
        let viewer = principal(1, &[Role::Viewer]);
        let editor = principal(2, &[Role::Editor]);
        assert!(authorize(Some(&viewer), Action::View, Resource::Library, ReadAccess::Permission)
            .is_allowed());
        assert_eq!(
            authorize(Some(&viewer), Action::Update, Resource::Library, ReadAccess::Permission),
            Decision::Deny(DenyReason::MissingPermission(Permission::CanEdit))
        );
        assert!(authorize(Some(&editor), Action::Create, Resource::Library, ReadAccess::Permission)
            .is_allowed());
        assert!(!authorize(Some(&editor), Action::Delete, Resource::Library, ReadAccess::Permission)
            .is_allowed());
    }

    #[test]
    fn test_read_policies() {
        let nobody = principal(1, &[]);
        assert!(authorize(None, Action::List, Resource::Book, ReadAccess::Public).is_allowed());
        assert_eq!(
            authorize(None, Action::View, Resource::Book, ReadAccess::Authenticated),
            Decision::Deny(DenyReason::Unauthenticated)
        );
        assert!(authorize(Some(&nobody), Action::View, Resource::Book, ReadAccess::Authenticated)
            .is_allowed());
        assert_eq!(
            authorize(Some(&nobody), Action::View, Resource::Book, ReadAccess::Permission),
            Decision::Deny(DenyReason::MissingPermission(Permission::CanView))
        );
        // Owned content has no permission to check; only identity
        assert!(authorize(
            Some(&nobody),
            Action::List,
            Resource::Post { owner_id: None },
            ReadAccess::Permission
        )
        .is_allowed());
    }

    #[test]
    fn test_unauthenticated_writes_denied() {
        for resource in [
            Resource::Book,
            Resource::Post { owner_id: None },
            Resource::Follow,
            Resource::RoleAssignment,
        ] {
            assert_eq!(
                authorize(None, Action::Create, resource, ReadAccess::Public),
                Decision::Deny(DenyReason::Unauthenticated)
            );
        }
    }

    #[test]
    fn test_ownership() {
        let owner = principal(7, &[]);
        let other = principal(8, &[Role::Admin]);
        let post = Resource::Post { owner_id: Some(7) };

        assert!(authorize(Some(&owner), Action::Update, post, ReadAccess::Public).is_allowed());
        assert!(authorize(Some(&owner), Action::Delete, post, ReadAccess::Public).is_allowed());
        assert_eq!(
            authorize(Some(&other), Action::Update, post, ReadAccess::Public),
            Decision::Deny(DenyReason::NotOwner)
        );
        assert!(authorize(
            Some(&other),
            Action::Create,
            Resource::Comment { owner_id: None },
            ReadAccess::Public
        )
        .is_allowed());
    }

    #[test]
    fn test_superuser_does_not_bypass_ownership() {
        let root = superuser(1);
        let comment = Resource::Comment { owner_id: Some(2) };
        assert_eq!(
            authorize(Some(&root), Action::Delete, comment, ReadAccess::Public),
            Decision::Deny(DenyReason::NotOwner)
        );
        assert!(authorize(Some(&root), Action::Delete, Resource::Book, ReadAccess::Permission)
            .is_allowed());
    }

    #[test]
    fn test_role_assignment_requires_superuser() {
        let admin = principal(1, &[Role::Admin]);
        assert_eq!(
            authorize(Some(&admin), Action::Update, Resource::RoleAssignment, ReadAccess::Public),
            Decision::Deny(DenyReason::SuperuserRequired)
        );
        assert!(authorize(
            Some(&superuser(2)),
            Action::Update,
            Resource::RoleAssignment,
            ReadAccess::Public
        )
        .is_allowed());
    }

    #[test]
    fn test_read_policy_lookup() {
        let config = AccessConfig::default();
        assert_eq!(Resource::Book.read_policy(&config), ReadAccess::Permission);
        assert_eq!(
            Resource::Comment { owner_id: None }.read_policy(&config),
            ReadAccess::Public
        );
        assert_eq!(Resource::Follow.read_policy(&config), ReadAccess::Public);
    }

    async fn setup_service() -> (AccessService, Arc<dyn UserRepository>) {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let users = SqlxUserRepository::boxed(pool.clone());
        let service = AccessService::new(
            SqlxRoleRepository::boxed(pool),
            users.clone(),
            Arc::new(Cache::Memory(MemoryCache::new())),
        );
        (service, users)
    }

    #[tokio::test]
    async fn test_principal_reflects_role_changes() {
        let (service, users) = setup_service().await;
        service.sync_roles().await.unwrap();

        let user = users
            .create(
                &User::new("reader".into(), "reader@example.com".into(), "hash".into()),
                &[Role::Viewer],
            )
            .await
            .unwrap();

        let before = service.principal_for(&user).await.unwrap();
        assert_eq!(before.roles, vec![Role::Viewer]);
        assert!(!before.has(Permission::CanCreate));

        let after = service
            .set_user_roles(user.id, &[Role::Editor, Role::Editor])
            .await
            .unwrap();
        assert_eq!(after.roles, vec![Role::Editor]);
        assert!(after.has(Permission::CanCreate));
        assert!(!after.has(Permission::CanDelete));
    }

    #[tokio::test]
    async fn test_superuser_principal() {
        let (service, users) = setup_service().await;
        let root = users
            .create(
                &User::new("root".into(), "root@example.com".into(), "hash".into())
                    .into_superuser(),
                &[],
            )
            .await
            .unwrap();

        let principal = service.principal_for(&root).await.unwrap();
        assert!(principal.roles.is_empty());
        assert_eq!(principal.permissions, PermissionSet::all());
    }

    #[tokio::test]
    async fn test_set_roles_for_missing_user() {
        let (service, _users) = setup_service().await;
        let result = service.set_user_roles(999, &[Role::Admin]).await;
        assert!(matches!(result, Err(AccessServiceError::UserNotFound)));
    }
}
