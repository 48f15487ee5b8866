//! HTTP-level tests driving the real router in-process

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use inkwell::api::{build_router, AppState};
use inkwell::config::Config;
use inkwell::db::{create_test_pool, migrations};
use inkwell::models::{ReadAccess, Role};
use inkwell::services::RegisterInput;

const PASSWORD: &str = "testpass123";

struct TestApp {
    state: AppState,
    router: Router,
}

impl TestApp {
    async fn new() -> Self {
        Self::with_config(Config::default()).await
    }

    async fn with_config(config: Config) -> Self {
        let pool = create_test_pool().await.expect("pool");
        migrations::run_migrations(&pool).await.expect("migrations");
        let state = AppState::new(pool, config);
        state.access_service.sync_roles().await.expect("roles");
        let router = build_router(state.clone());
        Self { state, router }
    }

    /// Create an account in the given roles and return its id and token
    async fn user(&self, username: &str, roles: &[Role], superuser: bool) -> (i64, String) {
        let input = RegisterInput::new(username, format!("{}@example.com", username), PASSWORD);
        let user = self
            .state
            .user_service
            .create_account(input, roles, superuser)
            .await
            .expect("create account");

        let (status, body) = self
            .request(
                Method::POST,
                "/api/v1/login/",
                None,
                Some(json!({"username": username, "password": PASSWORD})),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        let token = body["token"].as_str().expect("token").to_string();
        (user.id, token)
    }

    async fn send(&self, request: Request<Body>) -> axum::response::Response {
        self.router.clone().oneshot(request).await.expect("response")
    }

    async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.send(request).await;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("JSON body")
        };
        (status, value)
    }
}

fn book(title: &str, author: &str, year: i32) -> Value {
    json!({"title": title, "author_name": author, "publication_year": year})
}

#[tokio::test]
async fn test_register_returns_token() {
    let app = TestApp::new().await;
    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/register/",
            None,
            Some(json!({
                "username": "newreader",
                "email": "newreader@example.com",
                "password": PASSWORD,
                "password2": PASSWORD,
            })),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["username"], "newreader");
    assert!(body["token"].as_str().is_some_and(|t| !t.is_empty()));

    let token = body["token"].as_str().unwrap();
    let (status, profile) = app
        .request(Method::GET, "/api/v1/profile/", Some(token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["username"], "newreader");
    assert_eq!(profile["bio"], "");
}

#[tokio::test]
async fn test_duplicate_username_is_conflict() {
    let app = TestApp::new().await;
    app.user("taken", &[], false).await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/register/",
            None,
            Some(json!({"username": "taken", "email": "other@example.com", "password": PASSWORD})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"]["details"]["username"].is_array());
}

#[tokio::test]
async fn test_bad_credentials() {
    let app = TestApp::new().await;
    app.user("reader", &[Role::Viewer], false).await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/login/",
            None,
            Some(json!({"username": "reader", "password": "wrong-password"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_CREDENTIALS");
}

#[tokio::test]
async fn test_book_title_validation() {
    let app = TestApp::new().await;
    let (_, token) = app.user("editor", &[Role::Editor], false).await;

    let (status, body) = app
        .request(Method::POST, "/api/v1/books/", Some(&token), Some(book("A", "Jane Doe", 2020)))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert!(body["error"]["details"]["title"].is_array());

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/books/",
            Some(&token),
            Some(book("Valid Title 1", "Jane Doe", 2020)),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["title"], "Valid Title 1");
    assert_eq!(body["author_name"], "Jane Doe");
    assert_eq!(body["publication_year"], 2020);
}

#[tokio::test]
async fn test_duplicate_isbn_rejected() {
    let app = TestApp::new().await;
    let (_, token) = app.user("editor", &[Role::Editor], false).await;

    let mut first = book("First Book", "Jane Doe", 2001);
    first["isbn"] = json!("9780000000001");
    let (status, _) = app
        .request(Method::POST, "/api/v1/books/create/", Some(&token), Some(first))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let mut second = book("Second Book", "Jane Doe", 2002);
    second["isbn"] = json!("9780000000001");
    let (status, body) = app
        .request(Method::POST, "/api/v1/books/", Some(&token), Some(second))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["details"]["isbn"].is_array());
}

#[tokio::test]
async fn test_viewer_cannot_write_books() {
    let app = TestApp::new().await;
    let (_, viewer) = app.user("viewer", &[Role::Viewer], false).await;
    let (_, editor) = app.user("editor", &[Role::Editor], false).await;

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/books/",
            Some(&viewer),
            Some(book("Viewer Book", "Jane Doe", 2000)),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, created) = app
        .request(
            Method::POST,
            "/api/v1/books/",
            Some(&editor),
            Some(book("Editor Book", "Jane Doe", 2000)),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let uri = format!("/api/v1/books/{}/", created["id"]);

    let (status, _) = app
        .request(Method::PATCH, &uri, Some(&viewer), Some(json!({"title": "Renamed"})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.request(Method::DELETE, &uri, Some(&viewer), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Editors may change but not delete
    let (status, _) = app.request(Method::DELETE, &uri, Some(&editor), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.request(Method::GET, &uri, Some(&viewer), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Editor Book");
}

#[tokio::test]
async fn test_books_require_login_by_default() {
    let app = TestApp::new().await;

    let (status, body) = app.request(Method::GET, "/api/v1/books/", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    // A user without roles is logged in but lacks can_view
    let (_, token) = app.user("norole", &[], false).await;
    let (status, _) = app
        .request(Method::GET, "/api/v1/books/", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_book_list_filters_and_search_limit() {
    let app = TestApp::new().await;
    let (_, token) = app.user("admin", &[Role::Admin], false).await;
    for (title, author, year) in [
        ("Pride and Prejudice", "Jane Austen", 1813),
        ("Emma", "Jane Austen", 1815),
        ("Nineteen Eighty-Four", "George Orwell", 1949),
    ] {
        let (status, _) = app
            .request(Method::POST, "/api/v1/books/", Some(&token), Some(book(title, author, year)))
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = app
        .request(
            Method::GET,
            "/api/v1/books/?search=austen&ordering=-publication_year",
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(body["results"][0]["title"], "Emma");

    let long = "x".repeat(101);
    let (status, body) = app
        .request(
            Method::GET,
            &format!("/api/v1/books/?search={}", long),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["details"]["search"].is_array());
}

#[tokio::test]
async fn test_author_detail_nests_books() {
    let app = TestApp::new().await;
    let (_, token) = app.user("admin", &[Role::Admin], false).await;

    let (_, created) = app
        .request(
            Method::POST,
            "/api/v1/books/",
            Some(&token),
            Some(book("Animal Farm", "George Orwell", 1945)),
        )
        .await;
    let uri = format!("/api/v1/authors/{}/", created["author_id"]);

    let (status, body) = app.request(Method::GET, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "George Orwell");
    assert_eq!(body["books"][0]["title"], "Animal Farm");
}

#[tokio::test]
async fn test_post_ownership() {
    let app = TestApp::new().await;
    let (_, owner) = app.user("owner", &[], false).await;
    let (_, other) = app.user("other", &[Role::Admin], false).await;

    let (status, post) = app
        .request(
            Method::POST,
            "/api/v1/posts/",
            Some(&owner),
            Some(json!({"title": "Reading Notes", "content": "Chapter one.", "tags": ["Books"]})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let uri = format!("/api/v1/posts/{}/", post["id"]);

    // Catalog roles grant nothing on someone else's post
    let (status, _) = app
        .request(Method::PATCH, &uri, Some(&other), Some(json!({"title": "Hijacked"})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.request(Method::DELETE, &uri, Some(&other), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .request(Method::PATCH, &uri, Some(&owner), Some(json!({"title": "Reading Notes II"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Reading Notes II");
    assert_eq!(body["content"], "Chapter one.");

    // Posts are public to read by default
    let (status, body) = app.request(Method::GET, "/api/v1/tags/books/posts/", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);

    let (status, _) = app.request(Method::DELETE, &uri, Some(&owner), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.request(Method::GET, &uri, None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_comment_flow() {
    let app = TestApp::new().await;
    let (_, author) = app.user("author", &[], false).await;
    let (_, reader) = app.user("reader", &[], false).await;

    let (_, post) = app
        .request(
            Method::POST,
            "/api/v1/posts/",
            Some(&author),
            Some(json!({"title": "Open Thread", "content": "Say hello."})),
        )
        .await;
    let comments_uri = format!("/api/v1/posts/{}/comments/", post["id"]);

    let (status, comment) = app
        .request(Method::POST, &comments_uri, Some(&reader), Some(json!({"content": "Hello!"})))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let comment_uri = format!("/api/v1/comments/{}/", comment["id"]);
    let (status, _) = app
        .request(Method::PUT, &comment_uri, Some(&author), Some(json!({"content": "Edited"})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.request(Method::GET, &comments_uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["content"], "Hello!");

    let (status, _) = app
        .request(Method::POST, "/api/v1/posts/9999/comments/", Some(&reader), Some(json!({"content": "Lost"})))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_follow_and_unfollow_counts() {
    let app = TestApp::new().await;
    let (alice_id, alice) = app.user("alice", &[], false).await;
    let (bob_id, _) = app.user("bob", &[], false).await;

    let follow_uri = format!("/api/v1/users/{}/follow", bob_id);
    let (status, body) = app.request(Method::POST, &follow_uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], true);

    let (_, body) = app.request(Method::POST, &follow_uri, Some(&alice), None).await;
    assert_eq!(body["changed"], false);

    let (_, bob) = app
        .request(Method::GET, &format!("/api/v1/users/{}/", bob_id), None, None)
        .await;
    assert_eq!(bob["followers_count"], 1);
    assert_eq!(bob["following_count"], 0);

    let (_, followers) = app
        .request(Method::GET, &format!("/api/v1/users/{}/followers", bob_id), None, None)
        .await;
    assert_eq!(followers["results"][0]["id"], alice_id);

    let unfollow_uri = format!("/api/v1/users/{}/unfollow", bob_id);
    let (status, _) = app.request(Method::POST, &unfollow_uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, bob) = app
        .request(Method::GET, &format!("/api/v1/users/{}/", bob_id), None, None)
        .await;
    assert_eq!(bob["followers_count"], 0);

    let (status, _) = app
        .request(Method::POST, &format!("/api/v1/users/{}/follow", alice_id), Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .request(Method::POST, "/api/v1/users/9999/follow", Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.request(Method::POST, &follow_uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_role_assignment_requires_superuser() {
    let app = TestApp::new().await;
    let (_, root) = app.user("root", &[], true).await;
    let (_, admin) = app.user("admin", &[Role::Admin], false).await;
    let (target_id, target) = app.user("target", &[], false).await;
    let uri = format!("/api/v1/users/{}/roles/", target_id);

    let (status, _) = app
        .request(Method::PUT, &uri, Some(&admin), Some(json!({"roles": ["editor"]})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .request(Method::PUT, &uri, Some(&root), Some(json!({"roles": ["editor"]})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["roles"], json!(["editor"]));

    // New roles apply to the existing session
    let (status, body) = app
        .request(Method::GET, "/api/v1/permissions/", Some(&target), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["roles"], json!(["editor"]));
    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/books/",
            Some(&target),
            Some(book("Promoted", "Jane Doe", 1999)),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_logout_ends_session() {
    let app = TestApp::new().await;
    let (_, token) = app.user("leaving", &[], false).await;

    let (status, _) = app
        .request(Method::POST, "/api/v1/logout/", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .request(Method::GET, "/api/v1/profile/", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_security_headers_on_every_response() {
    let app = TestApp::new().await;
    let request = Request::builder()
        .uri("/api/v1/posts/")
        .body(Body::empty())
        .unwrap();
    let response = app.send(request).await;

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert!(headers.contains_key("content-security-policy"));
    assert!(!headers.contains_key(header::SERVER));

    let request = Request::builder()
        .uri("/api/v1/books/")
        .body(Body::empty())
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()["x-frame-options"], "DENY");
}

#[tokio::test]
async fn test_malformed_input_is_validation_error() {
    let app = TestApp::new().await;
    let (_, token) = app.user("editor", &[Role::Editor], false).await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/books/",
            Some(&token),
            Some(json!({"title": 123, "author_name": "Jane Doe", "publication_year": 2020})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert!(body["error"]["details"]["title"].is_array());

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/books/")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).expect("JSON body");
    assert!(body["error"]["details"]["__all__"].is_array());

    let (status, body) = app
        .request(Method::GET, "/api/v1/books/?page=abc", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, body) = app
        .request(Method::GET, "/api/v1/books/first/", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_post_search_matches_content_as_written() {
    let app = TestApp::new().await;
    let (_, owner) = app.user("owner", &[], false).await;

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/posts/",
            Some(&owner),
            Some(json!({"title": "Old Records", "content": "My rock & roll years, Jack's band"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    for (query, expected) in [("rock%20%26%20roll", 1), ("jack's", 1), ("%3Cb%3E", 0)] {
        let uri = format!("/api/v1/posts/search/?q={}", query);
        let (status, body) = app.request(Method::GET, &uri, None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], expected, "query {}", query);
    }
}

#[tokio::test]
async fn test_restricted_post_reads_answer_unauthenticated_first() {
    let mut config = Config::default();
    config.access.posts_read = ReadAccess::Authenticated;
    let app = TestApp::with_config(config).await;

    let (status, body) = app.request(Method::GET, "/api/v1/posts/9999/", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    let (status, _) = app.request(Method::GET, "/api/v1/comments/9999/", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, reader) = app.user("reader", &[], false).await;
    let (status, _) = app
        .request(Method::GET, "/api/v1/posts/9999/", Some(&reader), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_library_detail_nests_books_and_librarian() {
    let app = TestApp::new().await;
    let (_, editor) = app.user("editor", &[Role::Editor], false).await;
    let (_, viewer) = app.user("viewer", &[Role::Viewer], false).await;

    let (status, book) = app
        .request(Method::POST, "/api/v1/books/", Some(&editor), Some(book("Animal Farm", "George Orwell", 1945)))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = app
        .request(Method::POST, "/api/v1/libraries/", Some(&viewer), Some(json!({"name": "Central"})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, library) = app
        .request(Method::POST, "/api/v1/libraries/", Some(&editor), Some(json!({"name": "Central"})))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let uri = format!("/api/v1/libraries/{}/", library["id"]);

    let (status, detail) = app
        .request(
            Method::POST,
            &format!("{}books/", uri),
            Some(&editor),
            Some(json!({"book_id": book["id"]})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["books"][0]["title"], "Animal Farm");
    assert!(detail["librarian"].is_null());

    let (status, librarian) = app
        .request(
            Method::PUT,
            &format!("{}librarian/", uri),
            Some(&editor),
            Some(json!({"name": "Ada Lovelace"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(librarian["library_id"], library["id"]);

    let (status, detail) = app.request(Method::GET, &uri, Some(&viewer), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["name"], "Central");
    assert_eq!(detail["books"][0]["author_name"], "George Orwell");
    assert_eq!(detail["librarian"]["name"], "Ada Lovelace");

    // Catalog reads need a login by default
    let (status, _) = app.request(Method::GET, &uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .request(Method::GET, "/api/v1/libraries/9999/", Some(&viewer), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, list) = app.request(Method::GET, "/api/v1/libraries/", Some(&viewer), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["results"][0]["book_count"], 1);
}
