use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use axum::{
    extract::{Multipart, State},
    http::{HeaderMap, Method as HttpMethod, StatusCode, Uri},
    response::Response as HttpResponse,
    routing::post,
    Router,
};
use reqwire::{
    AttemptCause, Client, ClientBuilder, ConfigSide, Context, Cookie, Error, RetryPolicy,
    TransportError,
};
use serde::Deserialize;
use serde_json::json;

#[derive(Clone)]
struct MockResponse {
    status: StatusCode,
    body: String,
    headers: Vec<(&'static str, String)>,
    delay: Duration,
}

impl MockResponse {
    fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            headers: Vec::new(),
            delay: Duration::from_millis(0),
        }
    }

    fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Clone, Debug)]
struct SeenRequest {
    method: String,
    uri: String,
    headers: HeaderMap,
    body: String,
}

#[derive(Clone)]
struct MockState {
    name: String,
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    hits: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

async fn mock_handler(
    State(state): State<MockState>,
    method: HttpMethod,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> HttpResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    state
        .seen
        .lock()
        .expect("seen mutex must not be poisoned")
        .push(SeenRequest {
            method: method.to_string(),
            uri: uri.to_string(),
            headers,
            body,
        });

    let response = {
        let mut queue = state
            .responses
            .lock()
            .expect("response queue mutex must not be poisoned");
        queue
            .pop_front()
            .unwrap_or_else(|| MockResponse::text(StatusCode::OK, state.name.clone()))
    };

    if !response.delay.is_zero() {
        tokio::time::sleep(response.delay).await;
    }

    let mut builder = HttpResponse::builder().status(response.status);
    for (name, value) in response.headers {
        builder = builder.header(name, value);
    }
    builder
        .body(axum::body::Body::from(response.body))
        .expect("mock response must build")
}

async fn upload_handler(mut multipart: Multipart) -> String {
    let mut fields = Vec::new();
    while let Some(field) = multipart.next_field().await.expect("valid multipart") {
        let name = field.name().unwrap_or_default().to_owned();
        let value = field.text().await.expect("text field");
        fields.push(format!("{name}={value}"));
    }
    fields.join(";")
}

struct TestServer {
    base_url: String,
    hits: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl TestServer {
    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    fn seen(&self) -> Vec<SeenRequest> {
        self.seen
            .lock()
            .expect("seen mutex must not be poisoned")
            .clone()
    }
}

async fn spawn_server(responses: Vec<MockResponse>) -> TestServer {
    spawn_named_server("ok", responses).await
}

async fn spawn_named_server(name: &str, responses: Vec<MockResponse>) -> TestServer {
    let state = MockState {
        name: name.to_owned(),
        responses: Arc::new(Mutex::new(responses.into())),
        hits: Arc::new(AtomicUsize::new(0)),
        seen: Arc::new(Mutex::new(Vec::new())),
    };

    let app = Router::new()
        .route("/upload", post(upload_handler))
        .fallback(mock_handler)
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind test listener");
    let address = listener.local_addr().expect("must have local addr");
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("mock server must run");
    });

    TestServer {
        base_url: format!("http://{address}"),
        hits: state.hits,
        seen: state.seen,
        task,
    }
}

fn server_error() -> MockResponse {
    MockResponse::text(StatusCode::INTERNAL_SERVER_ERROR, "boom")
}

fn fast_retry(max_attempts: usize) -> RetryPolicy {
    RetryPolicy::constant_backoff(Duration::from_millis(1), max_attempts)
        .retry_if(|response| response.status().is_server_error())
}

#[tokio::test]
async fn retries_until_server_recovers() {
    let server = spawn_server(vec![
        server_error(),
        server_error(),
        MockResponse::text(StatusCode::OK, "recovered"),
    ])
    .await;
    let client = Client::new(&server.base_url);

    let response = client
        .get("/jobs/1")
        .retry(fast_retry(3))
        .send()
        .await
        .expect("request must succeed on third attempt");

    assert!(response.status().is_ok());
    assert_eq!(response.attempt(), 3);
    assert_eq!(response.as_string().await.expect("utf-8 body"), "recovered");
    assert_eq!(server.hits(), 3);
}

#[tokio::test]
async fn exhausted_retries_report_every_attempt() {
    let server = spawn_server(vec![server_error(); 5]).await;
    let client = Client::new(&server.base_url);

    let err = client
        .get("/jobs/1")
        .retry(fast_retry(3))
        .send()
        .await
        .expect_err("server never recovers");

    let attempts = err.attempts().expect("retry exhausted error");
    assert_eq!(attempts.len(), 3);
    for (index, failure) in attempts.iter().enumerate() {
        assert_eq!(failure.attempt, index + 1);
        assert!(matches!(failure.cause, AttemptCause::Status { code: 500, .. }));
    }
    assert!(err.to_string().contains("attempt 3: status 500"));

    let last = err.into_last_response().expect("last response is kept");
    assert_eq!(last.status().code(), 500);
    assert_eq!(last.as_string().await.expect("utf-8 body"), "boom");
    assert_eq!(server.hits(), 3);
}

#[tokio::test]
async fn round_robin_client_rotates_servers() {
    let servers = vec![
        spawn_named_server("s0", Vec::new()).await,
        spawn_named_server("s1", Vec::new()).await,
        spawn_named_server("s2", Vec::new()).await,
    ];
    let client = ClientBuilder::new()
        .base_urls(servers.iter().map(|server| server.base_url.clone()))
        .build();

    let mut order = Vec::new();
    for _ in 0..5 {
        let response = client.get("/who").send().await.expect("request must succeed");
        order.push(response.as_string().await.expect("utf-8 body"));
    }

    assert_eq!(order, vec!["s0", "s1", "s2", "s0", "s1"]);
    assert_eq!(servers[0].hits(), 2);
    assert_eq!(servers[1].hits(), 2);
    assert_eq!(servers[2].hits(), 1);
}

#[tokio::test]
async fn invalid_client_configuration_never_reaches_network() {
    let server = spawn_server(Vec::new()).await;
    let client = ClientBuilder::new()
        .base_url(&server.base_url)
        .header("bad header", "value")
        .build();

    let err = client
        .get("/")
        .retry(fast_retry(3))
        .send()
        .await
        .expect_err("configuration must be rejected");

    match err {
        Error::Configuration { side, errors } => {
            assert_eq!(side, ConfigSide::Client);
            assert_eq!(errors.len(), 1);
        }
        other => panic!("expected configuration error, got {other:?}"),
    }
    assert_eq!(server.hits(), 0);
}

#[tokio::test]
async fn invalid_request_query_never_reaches_network() {
    let server = spawn_server(Vec::new()).await;
    let client = Client::new(&server.base_url);

    let err = client
        .get("/")
        .query_string("page=%zz")
        .send()
        .await
        .expect_err("query must be rejected");

    assert!(matches!(
        err,
        Error::Configuration {
            side: ConfigSide::Request,
            ..
        }
    ));
    assert_eq!(server.hits(), 0);
}

#[tokio::test]
async fn before_request_hook_can_abort() {
    let server = spawn_server(Vec::new()).await;
    let client = ClientBuilder::new()
        .base_url(&server.base_url)
        .before_request(|request| {
            if request.header_map().contains("x-api-key") {
                Ok(())
            } else {
                Err("missing x-api-key".into())
            }
        })
        .build();

    let err = client.get("/").send().await.expect_err("hook must reject");
    assert!(matches!(err, Error::Hook(_)));
    assert_eq!(server.hits(), 0);

    client
        .get("/")
        .header("X-Api-Key", "k")
        .send()
        .await
        .expect("hook must accept");
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn without_retry_error_status_is_returned_as_response() {
    let server = spawn_server(vec![MockResponse::text(StatusCode::NOT_FOUND, "nope")]).await;
    let client = Client::new(&server.base_url);

    let response = client.get("/missing").send().await.expect("single attempt");
    assert!(response.status().is_not_found());
    assert!(response.status().is_error());
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn predicate_false_is_terminal_even_for_errors() {
    let server = spawn_server(vec![MockResponse::text(StatusCode::NOT_FOUND, "nope")]).await;
    let client = Client::new(&server.base_url);

    let response = client
        .get("/missing")
        .retry(fast_retry(3))
        .send()
        .await
        .expect("4xx is not retried by a 5xx predicate");
    assert_eq!(response.status().code(), 404);
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn layered_headers_cookies_and_query_reach_server() {
    let server = spawn_server(Vec::new()).await;
    let client = ClientBuilder::new()
        .base_url(format!("{}/api/", server.base_url))
        .header("X-Trace", "client")
        .add_header("X-Tag", "client-tag")
        .cookie(Cookie::new("session", "s1"))
        .build();

    client
        .post("/items")
        .header("X-Trace", "request")
        .add_header("X-Tag", "request-tag")
        .cookie(Cookie::new("theme", "dark"))
        .query("tag", "b")
        .query("tag", "a")
        .query("page", "2")
        .json(&json!({"name": "kit"}))
        .send()
        .await
        .expect("request must succeed");

    let seen = server.seen();
    assert_eq!(seen.len(), 1);
    let request = &seen[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.uri, "/api/items?page=2&tag=b&tag=a");
    assert_eq!(request.headers["x-trace"], "request");
    let tags: Vec<_> = request.headers.get_all("x-tag").iter().collect();
    assert_eq!(tags, vec!["client-tag", "request-tag"]);
    assert_eq!(request.headers["cookie"], "session=s1; theme=dark");
    assert_eq!(request.headers["content-type"], "application/json");
    assert_eq!(request.body, r#"{"name":"kit"}"#);
}

#[derive(Debug, Deserialize)]
struct Item {
    id: u32,
}

#[tokio::test]
async fn response_facade_exposes_headers_cookies_and_request() {
    let server = spawn_server(vec![MockResponse::text(StatusCode::OK, r#"{"id":9}"#)
        .with_header("content-type", "application/json")
        .with_header("set-cookie", "session=abc; Path=/; HttpOnly")
        .with_header("set-cookie", "theme=dark")])
    .await;
    let client = Client::new(&server.base_url);

    let response = client
        .get("/items/9")
        .header("X-Request", "yes")
        .send()
        .await
        .expect("request must succeed");

    assert_eq!(response.header().get("Content-Type"), Some("application/json"));
    let cookies = response.cookies();
    assert_eq!(cookies.len(), 2);
    assert_eq!(cookies[0].name(), "session");
    assert_eq!(cookies[0].value(), "abc");
    assert_eq!(cookies[0].path(), Some("/"));
    assert!(cookies[0].http_only());
    assert_eq!(response.cookie("theme").map(Cookie::value), Some("dark"));

    assert_eq!(response.request().method(), reqwire::Method::Get);
    assert_eq!(response.request().url().path(), "/items/9");
    assert_eq!(response.request().headers()["x-request"], "yes");

    let item: Item = response.as_json().await.expect("json body");
    assert_eq!(item.id, 9);
    assert_eq!(response.as_string().await.expect("closed body"), "");
}

#[tokio::test]
async fn context_deadline_surfaces_transport_timeout() {
    let server = spawn_server(vec![
        MockResponse::text(StatusCode::OK, "late").with_delay(Duration::from_millis(300))
    ])
    .await;
    let client = Client::new(&server.base_url);

    let err = client
        .get("/slow")
        .timeout(Duration::from_millis(50))
        .send()
        .await
        .expect_err("request must time out");

    match err {
        Error::Transport(inner) => assert!(inner.is_timeout()),
        other => panic!("expected transport timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn cancellation_cuts_backoff_short() {
    let server = spawn_server(vec![server_error(); 3]).await;
    let client = Client::new(&server.base_url);
    let (context, handle) = Context::background().with_cancel();

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel();
    });

    let started = Instant::now();
    let err = client
        .get("/")
        .context(context)
        .retry(RetryPolicy::constant_backoff(Duration::from_secs(10), 3))
        .send()
        .await
        .expect_err("cancelled request must fail");
    canceller.await.expect("canceller must finish");

    assert!(started.elapsed() < Duration::from_secs(5));
    let attempts = err.attempts().expect("retry exhausted error");
    assert_eq!(attempts.len(), 2);
    assert!(matches!(
        attempts.last().map(|failure| &failure.cause),
        Some(AttemptCause::Transport(TransportError::Cancelled))
    ));
    assert_eq!(err.last_response().map(|r| r.status().code()), Some(500));
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn transport_failures_are_retried_and_aggregated() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("must bind");
    let address = listener.local_addr().expect("must have local addr");
    drop(listener);
    let client = Client::new(format!("http://{address}"));

    let err = client
        .get("/")
        .retry(fast_retry(3))
        .send()
        .await
        .expect_err("nothing listens on the port");

    let attempts = err.attempts().expect("retry exhausted error");
    assert_eq!(attempts.len(), 3);
    assert!(attempts
        .iter()
        .all(|failure| matches!(failure.cause, AttemptCause::Transport(_))));
    assert!(err.last_response().is_none());
}

#[tokio::test]
async fn buffered_body_is_replayed_on_every_attempt() {
    let server = spawn_server(vec![
        server_error(),
        MockResponse::text(StatusCode::CREATED, "created"),
    ])
    .await;
    let attempts_seen = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&attempts_seen);
    let client = ClientBuilder::new()
        .base_url(&server.base_url)
        .retry(fast_retry(4))
        .after_response(move |_request, _response| {
            observed.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    let response = client
        .put("/things/1")
        .json(&json!({"v": 1}))
        .send()
        .await
        .expect("second attempt succeeds");

    assert_eq!(response.status().code(), 201);
    assert_eq!(attempts_seen.load(Ordering::SeqCst), 2);
    let bodies: Vec<String> = server.seen().into_iter().map(|seen| seen.body).collect();
    assert_eq!(bodies, vec![r#"{"v":1}"#, r#"{"v":1}"#]);
}

#[tokio::test]
async fn multipart_form_is_readable_by_server() {
    let server = spawn_server(Vec::new()).await;
    let client = Client::new(&server.base_url);

    let response = client
        .post("/upload")
        .form_data([("name", "kit"), ("greeting", "hello world")])
        .send()
        .await
        .expect("upload must succeed");

    assert!(response.status().is_success());
    assert_eq!(
        response.as_string().await.expect("utf-8 body"),
        "name=kit;greeting=hello world"
    );
}
