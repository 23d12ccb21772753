#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use reqwest::Url;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const CREDENTIAL_VARS: [(&str, &str); 4] = [
    ("TIMELINE_CONSUMER_KEY", "consumer-key"),
    ("TIMELINE_CONSUMER_SECRET", "consumer-secret"),
    ("TIMELINE_ACCESS_TOKEN", "access-token"),
    ("TIMELINE_ACCESS_SECRET", "access-secret"),
];

pub fn set_credentials() {
    for (name, value) in CREDENTIAL_VARS {
        std::env::set_var(name, value);
    }
}

pub fn clear_credentials() {
    for (name, _) in CREDENTIAL_VARS {
        std::env::remove_var(name);
    }
}

/// One request as the server saw it. `path` is kept percent-encoded, `query` is decoded.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub headers: HashMap<String, String>,
}

struct FakeFeed {
    name: String,
    ids: Vec<u64>,
}

#[derive(Default)]
struct State {
    /// Keyed by the percent-encoded path segment of the feed.
    feeds: HashMap<String, FakeFeed>,
    throttled_calls: HashSet<usize>,
    requests: Vec<SeenRequest>,
}

/// The path segment a well-behaved client sends for `feed`.
pub fn encoded_segment(feed: &str) -> String {
    let mut url = Url::parse("http://fake/").expect("static url");
    url.path_segments_mut()
        .expect("http url has a path")
        .pop_if_empty()
        .push(feed);
    url.path().trim_start_matches('/').to_string()
}

/// Timeline server on hyper: pages newest-first with an offset cursor and exclusive
/// `since_id`/`max_id`. Unknown feeds get a 404.
pub struct FakeTimelineServer {
    pub base_url: String,
    state: Arc<Mutex<State>>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl FakeTimelineServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind fake timeline listener");
        let addr = listener.local_addr().expect("listener address");
        let std_listener = listener.into_std().expect("convert listener");
        std_listener
            .set_nonblocking(true)
            .expect("non-blocking listener");

        let state = Arc::new(Mutex::new(State::default()));
        let served = Arc::clone(&state);
        let make_service = make_service_fn(move |_| {
            let state = Arc::clone(&served);
            async move {
                Ok::<_, Infallible>(service_fn(move |req| serve_request(Arc::clone(&state), req)))
            }
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let server = Server::from_tcp(std_listener)
            .expect("failed to build fake timeline server")
            .serve(make_service)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
        let handle = tokio::spawn(async move {
            if let Err(err) = server.await {
                eprintln!("fake timeline server stopped: {err}");
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn with_feed(self, feed: &str, ids: impl IntoIterator<Item = u64>) -> Self {
        let mut ids: Vec<u64> = ids.into_iter().collect();
        ids.sort_unstable();
        self.state.lock().unwrap().feeds.insert(
            encoded_segment(feed),
            FakeFeed {
                name: feed.to_string(),
                ids,
            },
        );
        self
    }

    /// Answer the `call`-th request (0-based) with 429.
    pub fn throttle_call(self, call: usize) -> Self {
        self.state.lock().unwrap().throttled_calls.insert(call);
        self
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.state.lock().unwrap().requests.clone()
    }
}

impl Drop for FakeTimelineServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn serve_request(
    state: Arc<Mutex<State>>,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::GET {
        return Ok(reply(StatusCode::METHOD_NOT_ALLOWED, json!({"error": "GET only"})));
    }

    let query: BTreeMap<String, String> = Url::parse(&format!("http://fake{}", req.uri()))
        .map(|url| url.query_pairs().into_owned().collect())
        .unwrap_or_default();
    let headers: HashMap<String, String> = req
        .headers()
        .iter()
        .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
        .collect();
    let seen = SeenRequest {
        path: req.uri().path().to_string(),
        query,
        headers,
    };

    let (status, body) = respond(&mut state.lock().unwrap(), seen);
    Ok(reply(status, body))
}

fn reply(status: StatusCode, body: Value) -> Response<Body> {
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

fn respond(state: &mut State, seen: SeenRequest) -> (StatusCode, Value) {
    let call = state.requests.len();
    state.requests.push(seen.clone());
    if state.throttled_calls.remove(&call) {
        return (StatusCode::TOO_MANY_REQUESTS, json!({"error": "rate limit"}));
    }

    let Some(segment) = seen.path.strip_prefix("/timelines/") else {
        return (StatusCode::NOT_FOUND, json!({"error": "no route"}));
    };
    let Some(feed) = state.feeds.get(segment) else {
        return (StatusCode::NOT_FOUND, json!({"error": "unknown feed"}));
    };

    let number = |key: &str| seen.query.get(key).and_then(|v| v.parse::<u64>().ok());
    let since = number("since_id");
    let max = number("max_id");
    let count = number("count").unwrap_or(20).max(1) as usize;
    let offset = number("cursor").unwrap_or(0) as usize;

    let visible: Vec<u64> = feed
        .ids
        .iter()
        .rev()
        .copied()
        .filter(|id| since.map_or(true, |s| *id > s))
        .filter(|id| max.map_or(true, |m| *id < m))
        .collect();
    let end = (offset + count).min(visible.len());
    let items: Vec<Value> = visible[offset.min(end)..end]
        .iter()
        .map(|id| json!({"id": id, "text": format!("post {id}"), "user": {"screen_name": feed.name}}))
        .collect();
    let next_cursor = (end < visible.len()).then(|| end.to_string());

    (StatusCode::OK, json!({"items": items, "next_cursor": next_cursor}))
}
