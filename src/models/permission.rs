//! Permissions, roles and the authenticated principal
//!
//! The catalog (books and authors) is guarded by four named permissions that
//! are granted through three roles. Blog content is guarded by ownership
//! instead, see `services::access`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A named catalog permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    CanView,
    CanCreate,
    CanEdit,
    CanDelete,
}

impl Permission {
    pub const ALL: [Permission; 4] = [
        Permission::CanView,
        Permission::CanCreate,
        Permission::CanEdit,
        Permission::CanDelete,
    ];

    /// Codename stored in `role_permissions.permission`
    pub fn codename(&self) -> &'static str {
        match self {
            Permission::CanView => "can_view",
            Permission::CanCreate => "can_create",
            Permission::CanEdit => "can_edit",
            Permission::CanDelete => "can_delete",
        }
    }

}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.codename())
    }
}

impl FromStr for Permission {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "can_view" => Ok(Permission::CanView),
            "can_create" => Ok(Permission::CanCreate),
            "can_edit" => Ok(Permission::CanEdit),
            "can_delete" => Ok(Permission::CanDelete),
            _ => Err(anyhow::anyhow!("Invalid permission: {}", s)),
        }
    }
}

/// Role a user can be assigned to.
///
/// - Viewer: read the catalog
/// - Editor: read, create and edit
/// - Admin: every catalog permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Editor,
    Admin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Viewer, Role::Editor, Role::Admin];

    /// Slug stored in `roles.slug`
    pub fn slug(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Editor => "editor",
            Role::Admin => "admin",
        }
    }

    /// Display name of the role group
    pub fn display_name(&self) -> &'static str {
        match self {
            Role::Viewer => "Viewers",
            Role::Editor => "Editors",
            Role::Admin => "Admins",
        }
    }

    /// Permissions every instance of this role is expected to carry
    pub fn default_permissions(&self) -> &'static [Permission] {
        match self {
            Role::Viewer => &[Permission::CanView],
            Role::Editor => &[Permission::CanView, Permission::CanCreate, Permission::CanEdit],
            Role::Admin => &Permission::ALL,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "viewer" | "viewers" => Ok(Role::Viewer),
            "editor" | "editors" => Ok(Role::Editor),
            "admin" | "admins" => Ok(Role::Admin),
            _ => Err(anyhow::anyhow!("Invalid role: {}", s)),
        }
    }
}

/// The effective permissions of a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    pub fn empty() -> Self {
        Self(BTreeSet::new())
    }

    pub fn all() -> Self {
        Self(Permission::ALL.into_iter().collect())
    }

    /// Union of the default permissions of the given roles
    pub fn from_roles(roles: &[Role]) -> Self {
        Self(
            roles
                .iter()
                .flat_map(|r| r.default_permissions().iter().copied())
                .collect(),
        )
    }

    pub fn has(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Who is making a request, with everything `authorize` needs to decide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: i64,
    pub username: String,
    pub is_superuser: bool,
    pub roles: Vec<Role>,
    pub permissions: PermissionSet,
}

impl Principal {
    pub fn has(&self, permission: Permission) -> bool {
        self.is_superuser || self.permissions.has(permission)
    }
}

/// Read policy for a family of endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadAccess {
    /// Anyone, including anonymous callers
    Public,
    /// Any logged-in user
    Authenticated,
    /// Users holding `can_view`
    #[default]
    Permission,
}

impl FromStr for ReadAccess {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(ReadAccess::Public),
            "authenticated" => Ok(ReadAccess::Authenticated),
            "permission" => Ok(ReadAccess::Permission),
            _ => Err(anyhow::anyhow!("Invalid read access policy: {}", s)),
        }
    }
}
