//! Inkwell - book catalog, blog and social API server

use anyhow::Result;
use std::net::SocketAddr;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use inkwell::{
    api::{self, AppState},
    config::Config,
    db::{self, migrations},
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inkwell=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Inkwell...");

    let config = Config::load_with_env(Path::new("config.yml"))?;
    tracing::info!("Configuration loaded");

    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {:?}", config.database.driver);

    migrations::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::new(pool, config);

    state.access_service.sync_roles().await?;
    tracing::info!("Roles synchronised");

    #[cfg(feature = "demo")]
    demo::seed(&state).await?;

    // Expired sessions and stale rate-limit windows, every 10 minutes
    {
        let user_service = state.user_service.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(600));
            loop {
                interval.tick().await;
                match user_service.cleanup_expired_sessions().await {
                    Ok(0) => {}
                    Ok(removed) => tracing::info!(removed, "Expired sessions removed"),
                    Err(e) => tracing::warn!("Session cleanup failed: {}", e),
                }
            }
        });
    }

    let app = api::build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(feature = "demo")]
mod demo {
    use anyhow::Result;
    use inkwell::api::AppState;
    use inkwell::models::Role;
    use inkwell::services::{BookInput, BookServiceError, RegisterInput, UserServiceError};

    const PASSWORD: &str = "testpass123";

    const USERS: [(&str, Role); 3] = [
        ("viewer_test", Role::Viewer),
        ("editor_test", Role::Editor),
        ("admin_test", Role::Admin),
    ];

    const BOOKS: [(&str, &str, i32); 5] = [
        ("The Great Gatsby", "F. Scott Fitzgerald", 1925),
        ("To Kill a Mockingbird", "Harper Lee", 1960),
        ("1984", "George Orwell", 1949),
        ("Pride and Prejudice", "Jane Austen", 1813),
        ("The Catcher in the Rye", "J.D. Salinger", 1951),
    ];

    /// Create the test accounts and sample books that are missing
    pub async fn seed(state: &AppState) -> Result<()> {
        for (username, role) in USERS {
            let input = RegisterInput::new(username, format!("{}@example.com", username), PASSWORD);
            match state.user_service.create_account(input, &[role], false).await {
                Ok(user) => {
                    tracing::info!(user_id = user.id, "Demo mode: created {} ({})", username, role)
                }
                Err(UserServiceError::Conflict(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        for (title, author, year) in BOOKS {
            let input = BookInput {
                title: Some(title.to_string()),
                author_name: Some(author.to_string()),
                publication_year: Some(year.into()),
                ..BookInput::default()
            };
            match state.book_service.create(input).await {
                Ok(book) => tracing::info!(book_id = book.id, "Demo mode: created book {}", title),
                // Already seeded
                Err(BookServiceError::Validation(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
