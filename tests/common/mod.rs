#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use rpcdeck::backend::Backend;
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// One request as the mock gateway saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    /// Raw (still percent-encoded) path.
    pub path: String,
    pub query: Option<String>,
    pub use_tls: Option<String>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl Recorded {
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Clone)]
struct Route {
    method: Method,
    path: String,
    status: StatusCode,
    body: Value,
    delay: Duration,
}

/// Scripted stand-in for the reflection gateway. Unscripted requests get a
/// 404 with an error envelope.
#[derive(Clone, Default)]
pub struct MockGateway {
    routes: Arc<Mutex<Vec<Route>>>,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `method path` with a 200 and `body`. Later scripts win.
    pub fn on(&self, method: Method, path: &str, body: Value) -> &Self {
        self.script(method, path, StatusCode::OK, body, Duration::ZERO)
    }

    pub fn on_status(&self, method: Method, path: &str, status: StatusCode, body: Value) -> &Self {
        self.script(method, path, status, body, Duration::ZERO)
    }

    pub fn on_delayed(&self, method: Method, path: &str, delay: Duration, body: Value) -> &Self {
        self.script(method, path, StatusCode::OK, body, delay)
    }

    fn script(
        &self,
        method: Method,
        path: &str,
        status: StatusCode,
        body: Value,
        delay: Duration,
    ) -> &Self {
        self.routes.lock().push(Route {
            method,
            path: path.to_string(),
            status,
            body,
            delay,
        });
        self
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Serve on an ephemeral port and return a backend pointed at it.
    pub async fn start(&self) -> (Backend, SocketAddr) {
        let app = axum::Router::new()
            .fallback(record)
            .with_state(self.clone());
        let addr = start_test_server(app).await;
        let backend = Backend::new(&format!("http://{addr}/"), Duration::from_secs(5)).unwrap();
        (backend, addr)
    }
}

async fn record(
    State(gw): State<MockGateway>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    gw.requests.lock().push(Recorded {
        method: method.clone(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        use_tls: header("use_tls"),
        content_type: header("content-type"),
        body: body.to_vec(),
    });

    let route = gw
        .routes
        .lock()
        .iter()
        .rev()
        .find(|r| r.method == method && r.path == uri.path())
        .cloned();

    match route {
        Some(route) => {
            if !route.delay.is_zero() {
                tokio::time::sleep(route.delay).await;
            }
            (route.status, axum::Json(route.body)).into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            axum::Json(json!({ "error": format!("no route for {}", uri.path()) })),
        )
            .into_response(),
    }
}

pub async fn start_test_server(app: axum::Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    addr
}

/// Gateway scripted with one target exposing `proto.Greeter`.
pub fn greeter_gateway(target: &str) -> MockGateway {
    let gw = MockGateway::new();
    gw.on(
        Method::GET,
        &format!("/server/{target}/services"),
        json!({ "data": ["proto.Greeter", "admin.Ops"] }),
    );
    gw.on(
        Method::GET,
        &format!("/server/{target}/service/proto.Greeter/functions"),
        json!({ "data": ["proto.Greeter.SayHello", "proto.Greeter.SayBye"] }),
    );
    gw.on(
        Method::GET,
        &format!("/server/{target}/function/proto.Greeter.SayHello/describe"),
        json!({
            "data": {
                "template": "{\n  \"name\": \"\"\n}",
                "schema": "message HelloRequest {\n  string name = 1;\n}"
            }
        }),
    );
    gw
}
