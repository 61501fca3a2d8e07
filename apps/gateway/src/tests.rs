//! End-to-end tests for request dispatch
//!
//! The backend is a raw TCP responder so the exact bytes the gateway sends
//! can be inspected.

use super::*;
use http::header::{COOKIE, LOCATION, SET_COOKIE};
use http_body_util::{BodyExt, Full};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

const ROUTE: &str = "/v1/acme/projects/p1/servers/s1/endpoint/notebook";

struct CountingAuthorizer {
    allow: bool,
    calls: AtomicUsize,
}

impl CountingAuthorizer {
    fn new(allow: bool) -> Self {
        Self {
            allow,
            calls: AtomicUsize::new(0),
        }
    }
}

impl Authorizer for CountingAuthorizer {
    async fn authorize(&self, _route: &RouteMatch, _token: &str) -> anyhow::Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.allow)
    }
}

fn scope() -> ServerScope {
    ServerScope {
        namespace: "acme".to_string(),
        project_id: "p1".to_string(),
        server_id: "s1".to_string(),
    }
}

fn config() -> GatewayConfig {
    GatewayConfig::new(
        scope(),
        PublicOrigin {
            scheme: "https".to_string(),
            host: "api.example.com".to_string(),
        },
    )
}

fn gateway(backend: SocketAddr, allow: bool) -> Gateway<CountingAuthorizer> {
    gateway_with(config(), backend, allow)
}

fn gateway_with(config: GatewayConfig, backend: SocketAddr, allow: bool) -> Gateway<CountingAuthorizer> {
    Gateway::new(
        config,
        BackendConfig { addr: backend },
        CountingAuthorizer::new(allow),
        SessionCodec::new("test-secret").unwrap(),
    )
    .unwrap()
}

fn calls(gateway: &Gateway<CountingAuthorizer>) -> usize {
    gateway.authorizer.calls.load(Ordering::SeqCst)
}

fn peer() -> SocketAddr {
    "10.0.0.7:51234".parse().unwrap()
}

fn get(path: &str) -> http::request::Builder {
    Request::builder().method("GET").uri(format!("{}{}", ROUTE, path))
}

async fn body_text(response: Response<GatewayBody>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn read_head(stream: &mut tokio::net::TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    buf
}

/// Backend answering every connection with `response`, reporting request heads
async fn spawn_backend(response: &'static str) -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let head = read_head(&mut stream).await;
                let _ = tx.send(String::from_utf8_lossy(&head).to_lowercase());
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    (addr, rx)
}

async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

#[tokio::test]
async fn test_missing_token_is_forbidden() {
    let gateway = gateway(closed_port().await, true);
    let req = get("/api/status").body(Full::new(Bytes::new())).unwrap();

    let response = gateway.handle(req, peer()).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(calls(&gateway), 0);
}

#[tokio::test]
async fn test_denied_token_is_forbidden_and_not_cached() {
    let gateway = gateway(closed_port().await, false);

    for _ in 0..2 {
        let req = get("/api/status")
            .header("authorization", "Bearer tok")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = gateway.handle(req, peer()).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
    assert_eq!(calls(&gateway), 2);
    assert!(gateway.cache().is_empty());
}

#[tokio::test]
async fn test_unknown_route_and_other_server() {
    let gateway = gateway(closed_port().await, true);

    let req = Request::builder()
        .uri("/healthz")
        .body(Full::new(Bytes::new()))
        .unwrap();
    assert_eq!(gateway.handle(req, peer()).await.status(), StatusCode::NOT_FOUND);

    let req = Request::builder()
        .uri("/v1/acme/projects/p1/servers/s2/endpoint/notebook/api")
        .header("authorization", "Bearer tok")
        .body(Full::new(Bytes::new()))
        .unwrap();
    assert_eq!(gateway.handle(req, peer()).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(calls(&gateway), 0);
}

#[tokio::test]
async fn test_authorized_request_is_proxied() {
    let (backend, mut heads) =
        spawn_backend("HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok").await;
    let gateway = gateway(backend, true);

    let req = get("/api/status?x=1")
        .header("host", "api.example.com")
        .header("authorization", "Bearer tok")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = gateway.handle(req, peer()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = response
        .headers()
        .get(SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("session-s1="));
    assert!(cookie.contains("HttpOnly"));
    assert_eq!(body_text(response).await, "ok");

    let head = heads.recv().await.unwrap();
    assert!(head.starts_with("get /api/status?x=1 http/1.1\r\n"), "{}", head);
    assert!(head.contains("x-forwarded-for: 10.0.0.7"));
    assert!(head.contains("x-forwarded-host: api.example.com"));
    assert_eq!(calls(&gateway), 1);
    assert!(gateway.cache().get("tok"));

    // Cached: no second remote check
    let req = get("/api/status")
        .header("authorization", "Bearer tok")
        .body(Full::new(Bytes::new()))
        .unwrap();
    assert_eq!(gateway.handle(req, peer()).await.status(), StatusCode::OK);
    assert_eq!(calls(&gateway), 1);

    // The session cookie alone is enough
    let pair = cookie.split(';').next().unwrap().to_string();
    let req = get("/tree")
        .header(COOKIE, pair)
        .body(Full::new(Bytes::new()))
        .unwrap();
    assert_eq!(gateway.handle(req, peer()).await.status(), StatusCode::OK);
    assert_eq!(calls(&gateway), 1);
}

#[tokio::test]
async fn test_cached_token_skips_authorizer() {
    let (backend, _heads) =
        spawn_backend("HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;
    let gateway = gateway(backend, false);
    gateway.cache().set("validtoken", Duration::from_secs(10));

    let req = get("/api/status")
        .header("authorization", "Bearer validtoken")
        .body(Full::new(Bytes::new()))
        .unwrap();
    assert_eq!(gateway.handle(req, peer()).await.status(), StatusCode::OK);
    assert_eq!(calls(&gateway), 0);
}

#[tokio::test]
async fn test_query_token_is_accepted() {
    let (backend, mut heads) =
        spawn_backend("HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n").await;
    let gateway = gateway(backend, true);

    let req = get("/lab?access_token=tok")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = gateway.handle(req, peer()).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(heads.recv().await.unwrap().starts_with("get /lab?access_token=tok "));
}

#[tokio::test]
async fn test_redirect_location_is_rewritten() {
    let (backend, _heads) = spawn_backend(
        "HTTP/1.1 302 Found\r\nLocation: /login?next=%2Ftree\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
    )
    .await;
    let gateway = gateway(backend, true);

    let req = get("/tree")
        .header("authorization", "Bearer tok")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = gateway.handle(req, peer()).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers().get(LOCATION).unwrap(),
        &format!("https://api.example.com{}/login?next=%2Ftree", ROUTE)
    );
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let mut config = config();
    config.max_body_bytes = 16;
    let gateway = gateway_with(config, closed_port().await, true);

    let req = Request::builder()
        .method("POST")
        .uri(format!("{}/api/contents", ROUTE))
        .header("authorization", "Bearer tok")
        .body(Full::new(Bytes::from(vec![b'a'; 64])))
        .unwrap();
    let response = gateway.handle(req, peer()).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_unreachable_backend_is_bad_gateway() {
    let gateway = gateway(closed_port().await, true);

    let req = get("/api/status")
        .header("authorization", "Bearer tok")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = gateway.handle(req, peer()).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_text(response).await, "Bad Gateway\n");
}

#[tokio::test]
async fn test_upgrade_without_connection_handle() {
    let gateway = gateway(closed_port().await, true);

    let req = get("/api/kernels/k1/channels")
        .header("authorization", "Bearer tok")
        .header("connection", "Upgrade")
        .header("upgrade", "websocket")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = gateway.handle(req, peer()).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

/// Backend that accepts one upgrade, sends early bytes, then echoes
async fn spawn_upgrade_backend() -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, heads) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let head = read_head(&mut stream).await;
        tx.send(String::from_utf8_lossy(&head).to_string()).unwrap();
        stream
            .write_all(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\nhello")
            .await
            .unwrap();
        let mut buf = [0u8; 1024];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => {
                    if stream.write_all(&buf[..n]).await.is_err() {
                        return;
                    }
                }
            }
        }
    });
    (addr, heads)
}

async fn spawn_gateway(gateway: Gateway<CountingAuthorizer>) -> (SocketAddr, Arc<Gateway<CountingAuthorizer>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let gateway = Arc::new(gateway);
    tokio::spawn(serve(Arc::clone(&gateway), listener));
    (addr, gateway)
}

/// Send the upgrade request and read up to the backend's early bytes
async fn open_upgraded(gateway_addr: SocketAddr) -> tokio::net::TcpStream {
    let mut client = tokio::net::TcpStream::connect(gateway_addr).await.unwrap();
    let request = format!(
        "GET {}/api/kernels/k1/channels?session_id=abc HTTP/1.1\r\nHost: api.example.com\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Version: 13\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nAuthorization: Bearer tok\r\n\r\n",
        ROUTE
    );
    client.write_all(request.as_bytes()).await.unwrap();

    let mut received = read_head(&mut client).await;
    let text = String::from_utf8_lossy(&received).to_lowercase();
    assert!(text.starts_with("http/1.1 101"), "{}", text);
    assert!(text.contains("set-cookie: session-s1="));

    let mut chunk = [0u8; 64];
    while !received.ends_with(b"hello") {
        let n = client.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before early bytes");
        received.extend_from_slice(&chunk[..n]);
    }
    client
}

async fn assert_echo(client: &mut tokio::net::TcpStream) {
    client.write_all(b"ping").await.unwrap();
    let mut echo = [0u8; 4];
    client.read_exact(&mut echo).await.unwrap();
    assert_eq!(&echo, b"ping");
}

#[tokio::test]
async fn test_websocket_upgrade_is_spliced() {
    let (backend, mut heads) = spawn_upgrade_backend().await;
    let (gateway_addr, gateway) = spawn_gateway(gateway(backend, true)).await;

    let exchange = async {
        let mut client = open_upgraded(gateway_addr).await;
        assert_echo(&mut client).await;
    };
    tokio::time::timeout(Duration::from_secs(5), exchange)
        .await
        .expect("upgrade exchange timed out");

    let head = heads.recv().await.unwrap();
    assert!(head.starts_with("GET /api/kernels/k1/channels?session_id=abc HTTP/1.1\r\n"));
    assert_eq!(calls(&gateway), 1);
}

#[tokio::test]
async fn test_upgraded_connection_outlives_request_timeout() {
    let (backend, _heads) = spawn_upgrade_backend().await;
    let mut config = config();
    config.request_timeout = Duration::from_secs(1);
    let (gateway_addr, _gateway) = spawn_gateway(gateway_with(config, backend, true)).await;

    let exchange = async {
        let mut client = open_upgraded(gateway_addr).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_echo(&mut client).await;
    };
    tokio::time::timeout(Duration::from_secs(6), exchange)
        .await
        .expect("upgraded connection stalled");
}

#[tokio::test]
async fn test_api_authorizer_against_service() {
    async fn answer(status_line: &'static str) -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
        let response: &'static str = match status_line {
            "204" => "HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n",
            "403" => "HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            _ => "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        };
        spawn_backend(response).await
    }

    let route = RouteMatch::parse(&format!("{}/api", ROUTE)).unwrap();

    let (addr, mut heads) = answer("204").await;
    let authorizer = ApiAuthorizer::new(reqwest::Client::new(), "http", addr.to_string());
    assert!(authorizer.authorize(&route, "tok").await.unwrap());
    let head = heads.recv().await.unwrap();
    assert!(head.starts_with("get /v1/acme/projects/p1/servers/s1/auth/ http/1.1\r\n"));
    assert!(head.contains("authorization: bearer tok"));

    let (addr, _heads) = answer("403").await;
    let authorizer = ApiAuthorizer::new(reqwest::Client::new(), "http", addr.to_string());
    assert!(!authorizer.authorize(&route, "tok").await.unwrap());

    let (addr, _heads) = answer("500").await;
    let authorizer = ApiAuthorizer::new(reqwest::Client::new(), "http", addr.to_string());
    assert!(authorizer.authorize(&route, "tok").await.is_err());
}
