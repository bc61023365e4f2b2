use axum::{
    Router,
    body::{Body, to_bytes},
    http::{HeaderMap, Method, Request, StatusCode, header},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::{Value, json};
use server::{
    app,
    auth::issue_token,
    config::{BasicCredentials, Config},
    state::State,
};
use tempfile::TempDir;
use tower::ServiceExt;

const SECRET: &str = "test-secret";
const OLD: &str = "2020-01-01T00:00:00.000Z";

fn fixture() -> Value {
    json!({
        "users": [
            {
                "id": 1, "name": "Ada", "email": "ada@example.com", "password": "pw1",
                "createdAt": OLD, "updatedAt": OLD
            },
            { "id": 2, "name": "Bob", "email": "bob@example.com", "password": "pw2" }
        ],
        "admin": [],
        "posts": [
            { "id": 1, "title": "first", "userId": 1, "createdAt": OLD, "updatedAt": OLD },
            { "id": 2, "title": "second", "userId": 2 },
            { "id": 3, "title": "third", "userId": 1 }
        ],
        "comments": [
            { "id": 1, "postId": 1, "body": "hi" }
        ],
        "settings": { "theme": "dark" }
    })
}

struct TestApp {
    dir: TempDir,
    router: Router,
}

impl TestApp {
    async fn new(basic_auth: Option<BasicCredentials>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_file = dir.path().join("db.json");
        std::fs::write(&db_file, serde_json::to_string_pretty(&fixture()).unwrap()).unwrap();

        let config = Config {
            port: 0,
            db_file,
            basic_auth,
            jwt_secret: Some(SECRET.to_string()),
        };
        let state = State::new(config).await.unwrap();

        Self {
            dir,
            router: app(state),
        }
    }

    fn on_disk(&self) -> Value {
        let raw = std::fs::read_to_string(self.dir.path().join("db.json")).unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        (status, headers, body)
    }

    async fn get(&self, uri: &str) -> (StatusCode, HeaderMap, Value) {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    async fn json(&self, method: Method, uri: &str, body: Value) -> (StatusCode, HeaderMap, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        self.send(request).await
    }

    async fn delete(&self, uri: &str) -> (StatusCode, HeaderMap, Value) {
        self.send(
            Request::delete(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }
}

fn with_auth(uri: &str, authorization: &str) -> Request<Body> {
    Request::get(uri)
        .header(header::AUTHORIZATION, authorization)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_create_collection_then_listed() {
    let app = TestApp::new(None).await;

    let (status, _, body) = app
        .json(
            Method::POST,
            "/admin/collections/todos",
            json!([{ "task": "a" }, { "id": 10, "task": "b" }, { "task": "c" }]),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, json!({ "message": "Collection 'todos' created.", "count": 3 }));

    let (_, _, names) = app.get("/admin/collections").await;
    assert_eq!(names, json!(["users", "admin", "posts", "comments", "settings", "todos"]));

    let (status, _, todos) = app.get("/todos").await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<i64> = todos
        .as_array()
        .unwrap()
        .iter()
        .map(|todo| todo["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![11, 10, 12]);
    assert!(todos[0]["createdAt"].is_string());

    assert!(app.on_disk()["todos"].is_array());
}

#[tokio::test]
async fn test_create_collection_rejections() {
    let app = TestApp::new(None).await;

    let (status, _, body) = app.json(Method::POST, "/admin/collections/posts", json!([])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "Collection already exists." }));

    let (status, _, body) = app.json(Method::POST, "/admin/collections/a%2Fb", json!([])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "Invalid collection name." }));
}

#[tokio::test]
async fn test_delete_collection() {
    let app = TestApp::new(None).await;

    let (status, _, body) = app.delete("/admin/collections/users").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, json!({ "error": "Cannot delete protected collection." }));

    let (status, _, _) = app.delete("/admin/collections/admin").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, body) = app.delete("/admin/collections/ghosts").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "error": "Collection 'ghosts' does not exist." }));

    let (status, _, body) = app.delete("/admin/collections/comments").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "message": "Collection 'comments' deleted." }));
    assert!(app.on_disk().get("comments").is_none());

    let (status, _, _) = app.get("/comments").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_login() {
    let app = TestApp::new(None).await;

    let (status, _, body) = app
        .json(
            Method::POST,
            "/login",
            json!({ "email": "ada@example.com", "password": "pw1" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], json!(1));
    assert_eq!(body["name"], json!("Ada"));
    assert!(body["token"].as_str().is_some_and(|t| !t.is_empty()));
    assert!(body.get("password").is_none());
    assert!(body.get("createdAt").is_none());

    let (status, _, body) = app
        .json(
            Method::POST,
            "/login",
            json!({ "email": "ada@example.com", "password": "nope" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "Invalid credentials" }));
}

#[tokio::test]
async fn test_profile() {
    let app = TestApp::new(None).await;

    let (status, _, _) = app.get("/profile").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, _, login) = app
        .json(
            Method::POST,
            "/login",
            json!({ "email": "bob@example.com", "password": "pw2" }),
        )
        .await;
    let token = login["token"].as_str().unwrap().to_string();

    let claims = login.as_object().unwrap().clone();
    let forged = issue_token(&claims, "someone-else").unwrap();
    let (status, _, _) = app
        .send(with_auth("/profile", &format!("Bearer {forged}")))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, _) = app.send(with_auth("/profile", "Bearer")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, body) = app
        .send(with_auth("/profile", &format!("Bearer {token}")))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "id": 2, "name": "Bob", "email": "bob@example.com" })
    );
}

#[tokio::test]
async fn test_profile_for_deleted_user() {
    let app = TestApp::new(None).await;

    let (_, _, login) = app
        .json(
            Method::POST,
            "/login",
            json!({ "email": "bob@example.com", "password": "pw2" }),
        )
        .await;
    let token = login["token"].as_str().unwrap().to_string();

    let (status, _, _) = app.delete("/users/2").await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = app
        .send(with_auth("/profile", &format!("Bearer {token}")))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_post_and_patch_timestamps() {
    let app = TestApp::new(None).await;

    let (status, _, created) = app.json(Method::POST, "/posts", json!({ "title": "fourth" })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["id"], json!(4));
    assert!(created["createdAt"].is_string());
    assert_eq!(created["createdAt"], created["updatedAt"]);

    let (status, _, patched) = app
        .json(Method::PATCH, "/posts/1", json!({ "title": "edited" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(patched["title"], json!("edited"));
    assert_eq!(patched["createdAt"], json!(OLD));
    assert_ne!(patched["updatedAt"], json!(OLD));
    assert_eq!(patched["userId"], json!(1));

    assert_eq!(app.on_disk()["posts"][0]["title"], json!("edited"));
}

#[tokio::test]
async fn test_put_replaces_record() {
    let app = TestApp::new(None).await;

    let (status, _, replaced) = app.json(Method::PUT, "/posts/1", json!({ "title": "new" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replaced["id"], json!(1));
    assert!(replaced.get("userId").is_none());
    assert!(replaced.get("createdAt").is_none());
    assert!(replaced["updatedAt"].is_string());

    let (status, _, _) = app.json(Method::PUT, "/posts/99", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_queries() {
    let app = TestApp::new(None).await;

    let (_, _, body) = app.get("/posts?userId=1").await;
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (_, headers, body) = app.get("/posts?_sort=id&_order=desc&_page=1&_limit=2").await;
    assert_eq!(headers["x-total-count"], "3");
    assert_eq!(body[0]["id"], json!(3));
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (_, _, body) = app.get("/posts/1?_embed=comments").await;
    assert_eq!(body["comments"][0]["body"], json!("hi"));

    let (_, _, body) = app.get("/posts/1/comments").await;
    assert_eq!(body, json!([{ "id": 1, "postId": 1, "body": "hi" }]));

    let (status, _, _) = app.get("/posts/42").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = app.get("/posts?title_like=(").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_record_persists() {
    let app = TestApp::new(None).await;

    let (status, _, body) = app.delete("/posts/2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));

    let ids: Vec<Value> = app.on_disk()["posts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|post| post["id"].clone())
        .collect();
    assert_eq!(ids, vec![json!(1), json!(3)]);

    let (status, _, _) = app.delete("/posts/2").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_db_reads_from_disk() {
    let app = TestApp::new(None).await;

    std::fs::write(app.dir.path().join("db.json"), r#"{"outside": [1]}"#).unwrap();

    let (status, _, body) = app.get("/db").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "outside": [1] }));

    let (_, _, body) = app.get("/admin/db").await;
    assert_eq!(body, json!({ "outside": [1] }));
}

#[tokio::test]
async fn test_health_and_echo() {
    let app = TestApp::new(None).await;

    let (status, _, body) = app.get("/admin/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));
    assert!(body["time"].as_str().unwrap().ends_with('Z'));

    let (_, _, body) = app.get("/admin/echo?x=1&y=two").await;
    assert_eq!(body, json!({ "x": "1", "y": "two" }));
}

#[tokio::test]
async fn test_unknown_resource_is_json_404() {
    let app = TestApp::new(None).await;

    let (status, _, body) = app.get("/ghosts").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

fn credentials() -> BasicCredentials {
    BasicCredentials {
        username: "admin".into(),
        password: "hunter2".into(),
    }
}

fn basic(credentials: &str) -> String {
    format!("Basic {}", STANDARD.encode(credentials))
}

#[tokio::test]
async fn test_basic_auth_gate() {
    let app = TestApp::new(Some(credentials())).await;

    let (status, headers, body) = app.get("/posts").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(headers[header::WWW_AUTHENTICATE], "Basic realm=\"JSON Server\"");
    assert_eq!(body, json!({ "error": "Authentication required." }));

    let (status, _, _) = app.send(with_auth("/posts", &basic("admin:wrong"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, _) = app.send(with_auth("/posts", "Basic %%%")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, body) = app.send(with_auth("/posts", &basic("admin:hunter2"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_basic_auth_skips_profile() {
    let app = TestApp::new(Some(credentials())).await;

    let (status, headers, body) = app.get("/profile").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(!headers.contains_key(header::WWW_AUTHENTICATE));
    assert_eq!(body, json!({ "error": "Missing bearer token" }));
}

#[tokio::test]
async fn test_cors_preflight_bypasses_auth() {
    let app = TestApp::new(Some(credentials())).await;

    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/posts")
        .header(header::ORIGIN, "http://localhost:3000")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();

    let (status, headers, _) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}

#[tokio::test]
async fn test_nested_create_links_parent() {
    let app = TestApp::new(None).await;

    let (status, _, created) = app
        .json(Method::POST, "/posts/1/comments", json!({ "body": "again" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["postId"], json!(1));
    assert_eq!(created["id"], json!(2));
    assert!(created["createdAt"].is_string());

    let (_, _, listed) = app.get("/posts/1/comments").await;
    assert_eq!(listed.as_array().unwrap().len(), 2);

    let (status, _, created) = app
        .json(Method::POST, "/posts/draft/comments", json!({ "body": "loose" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["postId"], json!("draft"));

    assert_eq!(app.on_disk()["comments"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_singular_resource() {
    let app = TestApp::new(None).await;

    let (status, _, body) = app.get("/settings").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "theme": "dark" }));

    let (status, _, body) = app.json(Method::PATCH, "/settings", json!({ "lang": "en" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["theme"], json!("dark"));
    assert_eq!(body["lang"], json!("en"));
    assert!(body["updatedAt"].is_string());

    let (status, _, body) = app
        .json(Method::POST, "/settings", json!({ "theme": "light" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["theme"], json!("light"));
    assert!(body.get("lang").is_none());

    assert_eq!(app.on_disk()["settings"]["theme"], json!("light"));
}

#[tokio::test]
async fn test_expand_parent() {
    let app = TestApp::new(None).await;

    let (status, _, body) = app.get("/comments/1?_expand=post").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["post"]["title"], json!("first"));

    let (_, _, body) = app.get("/comments?_expand=post").await;
    assert_eq!(body[0]["post"]["id"], json!(1));
}

#[tokio::test]
async fn test_id_after_largest_integer() {
    let app = TestApp::new(None).await;

    let (status, _, _) = app
        .json(Method::POST, "/admin/collections/big", json!([{ "id": i64::MAX }]))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _, created) = app.json(Method::POST, "/big", json!({ "t": 1 })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(created["id"].is_string());

    let (status, _, body) = app
        .json(
            Method::POST,
            "/admin/collections/bigger",
            json!([{ "id": i64::MAX }, {}]),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "Id counter overflow" }));
}

#[tokio::test]
async fn test_body_size_limit() {
    let app = TestApp::new(None).await;

    let title = "x".repeat(3 * 1024 * 1024);
    let (status, _, created) = app
        .json(Method::POST, "/posts", json!({ "title": title }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["title"].as_str().unwrap().len(), 3 * 1024 * 1024);

    let title = "x".repeat(11 * 1024 * 1024);
    let (status, _, body) = app
        .json(Method::POST, "/posts", json!({ "title": title }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "Malformed payload" }));
}

#[tokio::test]
async fn test_routing_errors_are_json() {
    let app = TestApp::new(None).await;

    let (status, _, body) = app.get("/login").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body, json!({ "error": "Method not allowed" }));

    let (status, _, body) = app.get("/posts/%FF").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("Invalid path"));
}
