//! End-to-end tests: a fake Keenetic router, the real proxy, a plain client.
//!
//! The fake router hands out a session cookie on the auth probe, accepts a
//! login whose digest matches `solve(...)`, and only serves `/rci/...` to
//! authenticated sessions.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderMap, AUTHORIZATION, COOKIE, SET_COOKIE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use keenetic_proxy::auth::solve;
use keenetic_proxy::{Config, ProxyServer};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

const LOGIN: &str = "admin";
const PASSWORD: &str = "secret";
const REALM: &str = "Keenetic Giga";
const SESSION_COOKIE: &str = "NDMSESSID";

#[derive(Default)]
struct FakeRouter {
    /// session id -> authenticated
    sessions: Mutex<HashMap<String, bool>>,
    next_session: AtomicUsize,
    probes: AtomicUsize,
    logins: AtomicUsize,
    forwards: AtomicUsize,
    /// Bodies seen on non-auth paths, in order
    bodies: Mutex<Vec<Bytes>>,
    /// Request headers seen on non-auth paths, in order
    forwarded_headers: Mutex<Vec<HeaderMap>>,
    /// Delay before answering the auth probe
    probe_delay: Duration,
    /// Omit the challenge headers from the 401 probe answer
    omit_challenge: bool,
}

impl FakeRouter {
    fn session_id(req: &Request<Incoming>) -> Option<String> {
        let cookies = req.headers().get(COOKIE)?.to_str().ok()?;
        cookies.split(';').find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == SESSION_COOKIE).then(|| value.to_string())
        })
    }

    fn is_authenticated(&self, session: Option<&String>) -> bool {
        session
            .and_then(|id| self.sessions.lock().unwrap().get(id).copied())
            .unwrap_or(false)
    }

    fn nonce_for(session: &str) -> String {
        format!("NONCE{session}")
    }

    async fn route(
        self: Arc<Self>,
        req: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>, Infallible> {
        let session = Self::session_id(&req);
        let headers = req.headers().clone();
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let body = req.into_body().collect().await.unwrap().to_bytes();

        let response = match (method, path.as_str()) {
            (Method::GET, "/auth") => {
                self.probes.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(self.probe_delay).await;
                if self.is_authenticated(session.as_ref()) {
                    Response::new(Full::new(Bytes::new()))
                } else {
                    let id = self.next_session.fetch_add(1, Ordering::SeqCst).to_string();
                    self.sessions.lock().unwrap().insert(id.clone(), false);
                    let mut builder = Response::builder()
                        .status(StatusCode::UNAUTHORIZED)
                        .header(
                            SET_COOKIE,
                            format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly"),
                        );
                    if !self.omit_challenge {
                        builder = builder
                            .header("X-NDM-Realm", REALM)
                            .header("X-NDM-Challenge", Self::nonce_for(&id));
                    }
                    builder.body(Full::new(Bytes::new())).unwrap()
                }
            }
            (Method::POST, "/auth") => {
                self.logins.fetch_add(1, Ordering::SeqCst);
                let login: serde_json::Value = serde_json::from_slice(&body).unwrap();
                let accepted = session.as_ref().is_some_and(|id| {
                    let expected = solve(LOGIN, PASSWORD, REALM, &Self::nonce_for(id));
                    login["login"] == LOGIN && login["password"] == expected
                });
                if accepted {
                    if let Some(id) = session {
                        self.sessions.lock().unwrap().insert(id, true);
                    }
                    Response::new(Full::new(Bytes::new()))
                } else {
                    status_response(StatusCode::UNAUTHORIZED, "")
                }
            }
            (_, path) => {
                self.forwards.fetch_add(1, Ordering::SeqCst);
                self.forwarded_headers.lock().unwrap().push(headers);
                if self.is_authenticated(session.as_ref()) {
                    self.bodies.lock().unwrap().push(body.clone());
                    Response::builder()
                        .header("X-Trace", "one")
                        .header("Content-Type", "application/json")
                        .header("X-Trace", "two")
                        .body(Full::new(Bytes::from(format!(
                            r#"{{"path":"{path}","body_len":{}}}"#,
                            body.len()
                        ))))
                        .unwrap()
                } else {
                    status_response(StatusCode::UNAUTHORIZED, "unauthorized")
                }
            }
        };
        Ok(response)
    }
}

fn status_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}

async fn start_router(router: Arc<FakeRouter>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let router = Arc::clone(&router);
            tokio::spawn(async move {
                let service = service_fn(move |req| Arc::clone(&router).route(req));
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    addr
}

async fn start_proxy(router_host: String, password: &str) -> SocketAddr {
    let config = Config::new(router_host, LOGIN, password);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(ProxyServer::new(config).serve(listener));
    addr
}

async fn setup(router: FakeRouter, password: &str) -> (Arc<FakeRouter>, SocketAddr) {
    let router = Arc::new(router);
    let router_addr = start_router(Arc::clone(&router)).await;
    let proxy_addr = start_proxy(router_addr.to_string(), password).await;
    (router, proxy_addr)
}

#[tokio::test]
async fn test_login_on_demand_then_session_reused() {
    let (router, proxy) = setup(FakeRouter::default(), PASSWORD).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{proxy}/rci/show/version"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let traces: Vec<_> = response
        .headers()
        .get_all("x-trace")
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert_eq!(traces, vec!["one", "two"]);
    assert_eq!(
        response.text().await.unwrap(),
        r#"{"path":"/rci/show/version","body_len":0}"#
    );

    assert_eq!(router.probes.load(Ordering::SeqCst), 1);
    assert_eq!(router.logins.load(Ordering::SeqCst), 1);
    assert_eq!(router.forwards.load(Ordering::SeqCst), 2);

    // The proxy's cookie session is now authenticated; no new login.
    let response = client
        .get(format!("http://{proxy}/rci/show/system"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(router.probes.load(Ordering::SeqCst), 1);
    assert_eq!(router.logins.load(Ordering::SeqCst), 1);
    assert_eq!(router.forwards.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_post_body_replayed_after_login() {
    let (router, proxy) = setup(FakeRouter::default(), PASSWORD).await;
    let client = reqwest::Client::new();
    let payload = r#"[{"show":{"interface":{}}}]"#;

    let response = client
        .post(format!("http://{proxy}/rci/"))
        .header("content-type", "application/json")
        .body(payload)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bodies = router.bodies.lock().unwrap().clone();
    assert_eq!(bodies, vec![Bytes::from_static(payload.as_bytes())]);
}

#[tokio::test]
async fn test_wrong_password_returns_original_401() {
    let (router, proxy) = setup(FakeRouter::default(), "wrong").await;

    let response = reqwest::get(format!("http://{proxy}/rci/show/version"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.text().await.unwrap(), "unauthorized");
    assert_eq!(router.logins.load(Ordering::SeqCst), 1);
    assert_eq!(router.forwards.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missing_challenge_is_bad_gateway() {
    let router = FakeRouter {
        omit_challenge: true,
        ..Default::default()
    };
    let (router, proxy) = setup(router, PASSWORD).await;

    let response = reqwest::get(format!("http://{proxy}/rci/show/version"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("X-NDM-Realm"));
    assert_eq!(router.logins.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unreachable_router_is_bad_gateway() {
    let closed_port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let proxy = start_proxy(format!("127.0.0.1:{closed_port}"), PASSWORD).await;

    let response = reqwest::get(format!("http://{proxy}/rci/show/version"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_concurrent_requests_share_session() {
    let (router, proxy) = setup(FakeRouter::default(), PASSWORD).await;
    let client = reqwest::Client::new();

    let warm_up = client
        .get(format!("http://{proxy}/rci/show/version"))
        .send()
        .await
        .unwrap();
    assert_eq!(warm_up.status(), StatusCode::OK);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .get(format!("http://{proxy}/rci/show/item/{i}"))
                    .send()
                    .await
                    .unwrap()
                    .status()
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::OK);
    }

    assert_eq!(router.logins.load(Ordering::SeqCst), 1);
    assert_eq!(router.forwards.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn test_client_cookie_and_session_both_reach_router() {
    let (router, proxy) = setup(FakeRouter::default(), PASSWORD).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{proxy}/rci/show/version"))
        .header("cookie", "ui_lang=en")
        .header("authorization", "Basic dXNlcjpwYXNz")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(router.logins.load(Ordering::SeqCst), 1);

    let seen = router.forwarded_headers.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].get(COOKIE).unwrap(), "ui_lang=en");
    assert_eq!(
        seen[1].get(COOKIE).unwrap(),
        &format!("ui_lang=en; {SESSION_COOKIE}=0")
    );
    for headers in &seen {
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Basic dXNlcjpwYXNz");
    }
}

#[tokio::test]
async fn test_retry_completes_after_client_hangs_up() {
    let router = FakeRouter {
        probe_delay: Duration::from_millis(300),
        ..Default::default()
    };
    let (router, proxy) = setup(router, PASSWORD).await;

    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream
        .write_all(
            b"POST /rci/ HTTP/1.1\r\nHost: proxy\r\nContent-Type: application/json\r\n\
              Content-Length: 2\r\n\r\n[]",
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(stream);

    for _ in 0..40 {
        if router.forwards.load(Ordering::SeqCst) == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert_eq!(router.probes.load(Ordering::SeqCst), 1);
    assert_eq!(router.logins.load(Ordering::SeqCst), 1);
    assert_eq!(router.forwards.load(Ordering::SeqCst), 2);
    let bodies = router.bodies.lock().unwrap().clone();
    assert_eq!(bodies, vec![Bytes::from_static(b"[]")]);
}
