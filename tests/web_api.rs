mod util;

use std::net::SocketAddr;

use personal_blog::search::client::IndexClient;
use personal_blog::web::serve_listener;
use reqwest::StatusCode;
use reqwest::header::{COOKIE, SET_COOKIE};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use util::{MemoryBackend, TestBlog};

struct Server {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<anyhow::Result<()>>,
    http: reqwest::Client,
}

impl Server {
    async fn start(t: &TestBlog) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(serve_listener(listener, t.blog.clone(), async {
            let _ = stopped.await;
        }));
        Self {
            addr,
            stop: Some(stop),
            task,
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn post(&self, path: &str, body: Value, cookie: Option<&str>) -> (StatusCode, Value) {
        let mut req = self.http.post(self.url(path)).json(&body);
        if let Some(cookie) = cookie {
            req = req.header(COOKIE, cookie);
        }
        let resp = req.send().await.unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap())
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let resp = self.http.get(self.url(path)).send().await.unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap())
    }

    async fn login(&self, email: &str) -> String {
        let resp = self
            .http
            .post(self.url("/login"))
            .json(&json!({ "email": email, "password": "secret-pw", "remember": false }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let header = resp.headers()[SET_COOKIE].to_str().unwrap().to_string();
        header.split(';').next().unwrap().to_string()
    }

    async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task.await.unwrap().unwrap();
    }
}

fn register_body(username: &str) -> Value {
    json!({
        "username": username,
        "email": format!("{username}@example.com"),
        "password": "secret-pw",
        "confirm_password": "secret-pw",
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn post_lifecycle_over_http() {
    let t = TestBlog::new(IndexClient::new(MemoryBackend::default()));
    let server = Server::start(&t).await;

    let (status, body) = server.post("/register", register_body("admin"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["is_admin"], true);
    server.post("/register", register_body("reader"), None).await;

    let admin = server.login("admin@example.com").await;
    assert!(admin.starts_with("session="));
    let reader = server.login("reader@example.com").await;

    let post = json!({ "title": "Hello", "tags": "rust web", "content": "first words" });
    let (status, _) = server.post("/post/new", post.clone(), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, body) = server.post("/post/new", post.clone(), Some(&reader)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Forbidden");

    let (status, created) = server.post("/post/new", post, Some(&admin)).await;
    assert_eq!(status, StatusCode::OK);
    let id = created["post"]["id"].as_i64().unwrap();

    let (status, detail) = server.get(&format!("/post/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["post"]["title"], "Hello");
    assert_eq!(detail["author"], "admin");
    assert_eq!(detail["tags"].as_array().unwrap().len(), 2);

    let (status, found) = server.get("/search?q=words").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(found["results"], true);
    assert_eq!(found["posts"][0]["id"], id);
    let (_, missing) = server.get("/search?q=absent").await;
    assert_eq!(missing, json!({ "results": false }));

    let (status, _) = server
        .post(&format!("/post/{id}/delete"), json!({}), Some(&admin))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = server.get(&format!("/post/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Not found");

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn search_without_backend_is_unavailable() {
    let t = TestBlog::new(IndexClient::disabled());
    let server = Server::start(&t).await;

    let (status, body) = server.get("/search?q=rust").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].is_string());

    let (status, _) = server.get("/no/such/page").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = server.get(&format!("/home?page={}", usize::MAX)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"], json!([]));

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn registration_errors_are_reported_per_field() {
    let t = TestBlog::new(IndexClient::disabled());
    let server = Server::start(&t).await;

    server.post("/register", register_body("alice"), None).await;
    let (status, body) = server.post("/register", register_body("alice"), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["fields"]["username"][0], "Username is already taken!");

    server.stop().await;
}
