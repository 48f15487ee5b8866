//! User service
//!
//! Accounts and sessions:
//! - registration, which creates the user, an empty profile and the default
//!   role assignment together
//! - login by username or email, guarded by [`LoginRateLimiter`]
//! - session validation and logout
//! - reading and editing the caller's own profile

use crate::db::repositories::{
    is_unique_violation, ProfileRepository, SessionRepository, UserRepository,
};
use crate::models::{Profile, ProfileChanges, Role, Session, User};
use crate::services::password::{hash_password, verify_password};
use crate::services::rate_limiter::LoginRateLimiter;
use crate::services::validation::{
    clean_bio, clean_email, clean_name, clean_password, clean_username, FieldErrors,
};
use anyhow::Context;
use chrono::Utc;
use std::net::IpAddr;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    #[error("Invalid username or password")]
    InvalidCredentials,

    /// Username or email already belongs to another account
    #[error("Conflict: {0}")]
    Conflict(FieldErrors),

    #[error("Too many login attempts; retry in {retry_after} seconds")]
    RateLimited { retry_after: u64 },

    #[error("User not found")]
    NotFound,

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Input for user registration
#[derive(Debug, Clone, Default)]
pub struct RegisterInput {
    pub username: String,
    pub email: String,
    pub password: String,
    /// Confirmation, checked when present
    pub password2: Option<String>,
    pub first_name: String,
    pub last_name: String,
}

impl RegisterInput {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            ..Self::default()
        }
    }
}

/// Input for user login
#[derive(Debug, Clone)]
pub struct LoginInput {
    pub username_or_email: String,
    pub password: String,
}

impl LoginInput {
    pub fn new(username_or_email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username_or_email: username_or_email.into(),
            password: password.into(),
        }
    }
}

/// A new account together with its first session
#[derive(Debug, Clone)]
pub struct Registration {
    pub user: User,
    pub session: Session,
}

pub struct UserService {
    user_repo: Arc<dyn UserRepository>,
    session_repo: Arc<dyn SessionRepository>,
    profile_repo: Arc<dyn ProfileRepository>,
    rate_limiter: Arc<LoginRateLimiter>,
    session_days: i64,
    default_role: Option<Role>,
}

impl UserService {
    pub fn new(
        user_repo: Arc<dyn UserRepository>,
        session_repo: Arc<dyn SessionRepository>,
        profile_repo: Arc<dyn ProfileRepository>,
        rate_limiter: Arc<LoginRateLimiter>,
    ) -> Self {
        Self {
            user_repo,
            session_repo,
            profile_repo,
            rate_limiter,
            session_days: 7,
            default_role: None,
        }
    }

    pub fn with_session_days(mut self, days: i64) -> Self {
        self.session_days = days;
        self
    }

    /// Role granted to every self-registered account
    pub fn with_default_role(mut self, role: Option<Role>) -> Self {
        self.default_role = role;
        self
    }

    /// Register an account with the configured default role and log it in
    pub async fn register(&self, input: RegisterInput) -> Result<Registration, UserServiceError> {
        let roles: Vec<Role> = self.default_role.into_iter().collect();
        let user = self.create_account(input, &roles, false).await?;
        let session = self.create_session(user.id).await?;
        Ok(Registration { user, session })
    }

    /// Create an account with explicit roles. Superusers are always staff.
    pub async fn create_account(
        &self,
        input: RegisterInput,
        roles: &[Role],
        superuser: bool,
    ) -> Result<User, UserServiceError> {
        let mut errors = FieldErrors::new();
        let username = errors.check("username", clean_username(&input.username));
        let email = errors.check("email", clean_email(&input.email));
        let password = errors.check(
            "password",
            clean_password(&input.password, input.password2.as_deref()),
        );
        let first_name = errors.check("first_name", clean_name(&input.first_name));
        let last_name = errors.check("last_name", clean_name(&input.last_name));

        let (Some(username), Some(email), Some(password), Some(first_name), Some(last_name)) =
            (username, email, password, first_name, last_name)
        else {
            return Err(UserServiceError::Validation(errors));
        };

        let mut conflicts = FieldErrors::new();
        if self
            .user_repo
            .get_by_username(&username)
            .await
            .context("Failed to check username")?
            .is_some()
        {
            conflicts.add("username", "A user with that username already exists.");
        }
        if self
            .user_repo
            .get_by_email(&email)
            .await
            .context("Failed to check email")?
            .is_some()
        {
            conflicts.add("email", "A user with that email already exists.");
        }
        if !conflicts.is_empty() {
            return Err(UserServiceError::Conflict(conflicts));
        }

        let password_hash = hash_password(&password).context("Failed to hash password")?;
        let mut user = User::new(username, email, password_hash);
        user.first_name = first_name;
        user.last_name = last_name;
        if superuser {
            user = user.into_superuser();
        }

        match self.user_repo.create(&user, roles).await {
            Ok(created) => {
                tracing::info!(user_id = created.id, username = %created.username, "User registered");
                Ok(created)
            }
            // Lost a race with a concurrent registration
            Err(e) if is_unique_violation(&e) => Err(UserServiceError::Conflict(
                FieldErrors::single("username", "A user with that username or email already exists."),
            )),
            Err(e) => Err(UserServiceError::InternalError(e.context("Failed to create user"))),
        }
    }

    /// Check credentials and open a session
    pub async fn login(
        &self,
        input: LoginInput,
        client_ip: Option<IpAddr>,
    ) -> Result<(Session, User), UserServiceError> {
        if let Some(ip) = client_ip {
            if let Some(retry_after) = self.rate_limiter.check_ip(ip).await {
                tracing::warn!(target: "security", %ip, "Login rate limit hit for client");
                return Err(UserServiceError::RateLimited { retry_after });
            }
        }

        let login = input.username_or_email.trim();
        if let Some(retry_after) = self.rate_limiter.check_username(login).await {
            tracing::warn!(target: "security", username = %login, "Login rate limit hit for username");
            return Err(UserServiceError::RateLimited { retry_after });
        }

        let user = match self.find_user_by_username_or_email(login).await? {
            Some(user) if user.is_active() => user,
            _ => {
                self.rate_limiter.record_failed_attempt(login).await;
                return Err(UserServiceError::InvalidCredentials);
            }
        };

        let valid = verify_password(&input.password, &user.password_hash)
            .context("Failed to verify password")?;
        if !valid {
            self.rate_limiter.record_failed_attempt(login).await;
            tracing::info!(user_id = user.id, "Login failed: wrong password");
            return Err(UserServiceError::InvalidCredentials);
        }

        self.rate_limiter.clear_username(login).await;
        let session = self.create_session(user.id).await?;
        tracing::info!(user_id = user.id, "User logged in");
        Ok((session, user))
    }

    pub async fn logout(&self, token: &str) -> Result<(), UserServiceError> {
        self.session_repo
            .delete(token)
            .await
            .context("Failed to delete session")?;
        Ok(())
    }

    /// The active user behind an unexpired session token
    pub async fn validate_session(&self, token: &str) -> Result<Option<User>, UserServiceError> {
        let Some(session) = self
            .session_repo
            .get_valid(token)
            .await
            .context("Failed to get session")?
        else {
            return Ok(None);
        };

        let user = self
            .user_repo
            .get_by_id(session.user_id)
            .await
            .context("Failed to get user")?;
        Ok(user.filter(User::is_active))
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, UserServiceError> {
        Ok(self
            .user_repo
            .get_by_id(id)
            .await
            .context("Failed to get user by ID")?)
    }

    /// A user and their profile
    pub async fn get_profile(&self, user_id: i64) -> Result<(User, Profile), UserServiceError> {
        let user = self.get_by_id(user_id).await?.ok_or(UserServiceError::NotFound)?;
        let profile = self
            .profile_repo
            .get_by_user(user_id)
            .await
            .context("Failed to load profile")?
            .unwrap_or_else(|| Profile::empty(user_id));
        Ok((user, profile))
    }

    /// Apply profile edits; absent fields are left unchanged
    pub async fn update_profile(
        &self,
        user_id: i64,
        changes: ProfileChanges,
    ) -> Result<(User, Profile), UserServiceError> {
        let (mut user, mut profile) = self.get_profile(user_id).await?;

        let mut errors = FieldErrors::new();
        if let Some(email) = &changes.email {
            if let Some(email) = errors.check("email", clean_email(email)) {
                user.email = email;
            }
        }
        if let Some(first_name) = &changes.first_name {
            if let Some(first_name) = errors.check("first_name", clean_name(first_name)) {
                user.first_name = first_name;
            }
        }
        if let Some(last_name) = &changes.last_name {
            if let Some(last_name) = errors.check("last_name", clean_name(last_name)) {
                user.last_name = last_name;
            }
        }
        if let Some(bio) = &changes.bio {
            if let Some(bio) = errors.check("bio", clean_bio(bio)) {
                profile.bio = bio;
            }
        }
        if let Some(picture) = changes.profile_picture {
            profile.profile_picture = picture
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty());
        }
        errors.into_result().map_err(UserServiceError::Validation)?;

        if changes.email.is_some() {
            let taken = self
                .user_repo
                .get_by_email(&user.email)
                .await
                .context("Failed to check email")?
                .is_some_and(|other| other.id != user_id);
            if taken {
                return Err(UserServiceError::Conflict(FieldErrors::single(
                    "email",
                    "A user with that email already exists.",
                )));
            }
        }

        user.updated_at = Utc::now();
        match self.profile_repo.save(&user, &profile).await {
            Ok(saved) => Ok((user, saved)),
            Err(e) if is_unique_violation(&e) => Err(UserServiceError::Conflict(
                FieldErrors::single("email", "A user with that email already exists."),
            )),
            Err(e) => Err(UserServiceError::InternalError(e.context("Failed to save profile"))),
        }
    }

    /// Delete expired sessions, returning how many were removed
    pub async fn cleanup_expired_sessions(&self) -> Result<u64, UserServiceError> {
        self.rate_limiter.cleanup().await;
        Ok(self
            .session_repo
            .delete_expired()
            .await
            .context("Failed to delete expired sessions")?)
    }

    async fn find_user_by_username_or_email(
        &self,
        login: &str,
    ) -> Result<Option<User>, UserServiceError> {
        if let Some(user) = self
            .user_repo
            .get_by_username(login)
            .await
            .context("Failed to get user by username")?
        {
            return Ok(Some(user));
        }
        if !login.contains('@') {
            return Ok(None);
        }
        Ok(self
            .user_repo
            .get_by_email(login)
            .await
            .context("Failed to get user by email")?)
    }

    async fn create_session(&self, user_id: i64) -> Result<Session, UserServiceError> {
        let session = Session::issue(user_id, self.session_days);
        Ok(self
            .session_repo
            .create(&session)
            .await
            .context("Failed to create session")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{
        RoleRepository, SqlxProfileRepository, SqlxRoleRepository, SqlxSessionRepository,
        SqlxUserRepository,
    };
    use crate::db::{create_test_pool, migrations, DynDatabasePool};
    use std::str::FromStr;

    async fn setup() -> (UserService, DynDatabasePool) {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let service = UserService::new(
            SqlxUserRepository::boxed(pool.clone()),
            SqlxSessionRepository::boxed(pool.clone()),
            SqlxProfileRepository::boxed(pool.clone()),
            Arc::new(LoginRateLimiter::new()),
        );
        (service, pool)
    }

    fn input(username: &str) -> RegisterInput {
        RegisterInput::new(username, format!("{}@example.com", username), "testpass123")
    }

    #[tokio::test]
    async fn test_register_creates_user_profile_and_session() {
        let (service, _pool) = setup().await;
        let registration = service.register(input("reader")).await.unwrap();

        assert_eq!(registration.user.username, "reader");
        assert_ne!(registration.user.password_hash, "testpass123");
        assert_eq!(registration.session.user_id, registration.user.id);

        let (_, profile) = service.get_profile(registration.user.id).await.unwrap();
        assert_eq!(profile.bio, "");

        let found = service
            .validate_session(&registration.session.id)
            .await
            .unwrap();
        assert_eq!(found.map(|u| u.id), Some(registration.user.id));
    }

    #[tokio::test]
    async fn test_register_grants_default_role() {
        let (service, pool) = setup().await;
        let service = service.with_default_role(Some(Role::Viewer));
        let registration = service.register(input("viewer")).await.unwrap();

        let roles = SqlxRoleRepository::new(pool)
            .roles_for_user(registration.user.id)
            .await
            .unwrap();
        assert_eq!(roles, vec![Role::Viewer]);
    }

    #[tokio::test]
    async fn test_register_collects_field_errors() {
        let (service, _pool) = setup().await;
        let mut bad = RegisterInput::new("x", "not-an-email", "short");
        bad.password2 = Some("different".into());

        match service.register(bad).await {
            Err(UserServiceError::Validation(errors)) => {
                assert!(errors.contains("username"));
                assert!(errors.contains("email"));
                assert!(errors.contains("password"));
            }
            other => panic!("expected validation error, got {:?}", other.map(|r| r.user.id)),
        }
    }

    #[tokio::test]
    async fn test_register_duplicate_is_conflict() {
        let (service, _pool) = setup().await;
        service.register(input("taken")).await.unwrap();

        let mut again = input("taken");
        again.email = "other@example.com".into();
        match service.register(again).await {
            Err(UserServiceError::Conflict(errors)) => assert!(errors.contains("username")),
            other => panic!("expected conflict, got {:?}", other.map(|r| r.user.id)),
        }

        let same_email = RegisterInput::new("fresh", "TAKEN@example.com", "testpass123");
        assert!(matches!(
            service.register(same_email).await,
            Err(UserServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_create_superuser_is_staff() {
        let (service, _pool) = setup().await;
        let root = service
            .create_account(input("root"), &[Role::Admin], true)
            .await
            .unwrap();
        assert!(root.is_superuser);
        assert!(root.is_staff);
    }

    #[tokio::test]
    async fn test_login_and_logout() {
        let (service, _pool) = setup().await;
        service.register(input("alice")).await.unwrap();

        let (session, user) = service
            .login(LoginInput::new("alice", "testpass123"), None)
            .await
            .unwrap();
        assert_eq!(user.username, "alice");

        // Email works too
        service
            .login(LoginInput::new("alice@example.com", "testpass123"), None)
            .await
            .unwrap();

        service.logout(&session.id).await.unwrap();
        assert!(service.validate_session(&session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_login_wrong_password() {
        let (service, _pool) = setup().await;
        service.register(input("bob")).await.unwrap();

        assert!(matches!(
            service.login(LoginInput::new("bob", "wrongpass"), None).await,
            Err(UserServiceError::InvalidCredentials)
        ));
        assert!(matches!(
            service.login(LoginInput::new("nobody", "testpass123"), None).await,
            Err(UserServiceError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_login_rate_limited_after_failures() {
        let (service, _pool) = setup().await;
        service.register(input("carol")).await.unwrap();

        for _ in 0..5 {
            let _ = service.login(LoginInput::new("carol", "nope"), None).await;
        }
        // Even the right password waits now
        assert!(matches!(
            service.login(LoginInput::new("carol", "testpass123"), None).await,
            Err(UserServiceError::RateLimited { .. })
        ));
    }

    #[tokio::test]
    async fn test_login_ip_rate_limit() {
        let (service, _pool) = setup().await;
        let ip = IpAddr::from_str("192.0.2.1").unwrap();

        for _ in 0..10 {
            let _ = service.login(LoginInput::new("ghost", "x"), Some(ip)).await;
        }
        assert!(matches!(
            service.login(LoginInput::new("other", "x"), Some(ip)).await,
            Err(UserServiceError::RateLimited { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_profile() {
        let (service, _pool) = setup().await;
        let user = service.register(input("dora")).await.unwrap().user;

        let (user, profile) = service
            .update_profile(
                user.id,
                ProfileChanges {
                    first_name: Some("Dora".into()),
                    bio: Some("  Reads a lot.  ".into()),
                    profile_picture: Some(Some("avatars/dora.png".into())),
                    ..ProfileChanges::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(user.first_name, "Dora");
        assert_eq!(profile.bio, "Reads a lot.");
        assert_eq!(profile.profile_picture.as_deref(), Some("avatars/dora.png"));

        let result = service
            .update_profile(
                user.id,
                ProfileChanges {
                    bio: Some("b".repeat(501)),
                    ..ProfileChanges::default()
                },
            )
            .await;
        assert!(matches!(result, Err(UserServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_update_profile_email_conflict() {
        let (service, _pool) = setup().await;
        service.register(input("erin")).await.unwrap();
        let frank = service.register(input("frank")).await.unwrap().user;

        let result = service
            .update_profile(
                frank.id,
                ProfileChanges {
                    email: Some("erin@example.com".into()),
                    ..ProfileChanges::default()
                },
            )
            .await;
        assert!(matches!(result, Err(UserServiceError::Conflict(_))));

        // Keeping one's own address is fine
        service
            .update_profile(
                frank.id,
                ProfileChanges {
                    email: Some("frank@example.com".into()),
                    ..ProfileChanges::default()
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_inactive_user_session_rejected() {
        let (service, pool) = setup().await;
        let registration = service.register(input("gone")).await.unwrap();

        sqlx::query("UPDATE users SET status = 'inactive' WHERE id = ?")
            .bind(registration.user.id)
            .execute(pool.as_sqlite().unwrap())
            .await
            .unwrap();

        assert!(service
            .validate_session(&registration.session.id)
            .await
            .unwrap()
            .is_none());
        assert!(matches!(
            service.login(LoginInput::new("gone", "testpass123"), None).await,
            Err(UserServiceError::InvalidCredentials)
        ));
    }
}
