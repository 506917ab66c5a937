// Integration tests for `DeviceClient` against a wiremock device.
//
// The client is blocking, so wiremock runs on its own tokio runtime and
// every request is issued from plain test threads. Socket-level behavior
// (stalls, keep-alive teardown) uses a raw listener instead.
#![allow(clippy::unwrap_used)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::runtime::Runtime;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

use devlink_api::{
    AuthMode, AuthScheme, DeviceClient, DeviceConfig, DeviceConfigBuilder, Endpoint, ErrorKind,
    RequestOptions,
};

const BASIC_TEST_PASSWORD: &str = "Basic dGVzdDpwYXNzd29yZA==";
const CHALLENGE: &str = r#"Digest realm="Device API", nonce="abc123", qop="auth""#;
const PARAM_PATH: &str = "/axis-cgi/param.cgi";

// ── Helpers ─────────────────────────────────────────────────────────

/// Mock device plus the runtime it lives on. `server` is declared first
/// so it is dropped before the runtime.
struct Harness {
    server: MockServer,
    runtime: Runtime,
}

impl Harness {
    fn start() -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let server = runtime.block_on(MockServer::start());
        Self { server, runtime }
    }

    fn mount(&self, mock: Mock) {
        self.runtime.block_on(mock.mount(&self.server));
    }

    fn requests(&self) -> Vec<Request> {
        self.runtime
            .block_on(self.server.received_requests())
            .unwrap_or_default()
    }

    fn config(&self) -> DeviceConfigBuilder {
        DeviceConfig::http("127.0.0.1").port(self.server.address().port())
    }

    fn client(&self, builder: DeviceConfigBuilder) -> DeviceClient {
        DeviceClient::new(builder.build().unwrap()).unwrap()
    }

    /// A device that only accepts Digest answers for `test`/`password`.
    fn digest_device(&self) {
        self.mount(
            Mock::given(method("GET"))
                .and(path(PARAM_PATH))
                .and(DigestAuthorization)
                .respond_with(ResponseTemplate::new(200).set_body_string("root.Brand.Brand=AXIS"))
                .with_priority(1),
        );
        self.mount(
            Mock::given(method("GET"))
                .and(path(PARAM_PATH))
                .respond_with(ResponseTemplate::new(401).insert_header("WWW-Authenticate", CHALLENGE)),
        );
    }

    /// A device that only accepts Basic `test`/`password`.
    fn basic_device(&self) {
        self.mount(
            Mock::given(method("GET"))
                .and(path(PARAM_PATH))
                .and(header("authorization", BASIC_TEST_PASSWORD))
                .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
                .with_priority(1),
        );
        self.mount(
            Mock::given(method("GET"))
                .and(path(PARAM_PATH))
                .respond_with(
                    ResponseTemplate::new(401).insert_header("WWW-Authenticate", r#"Basic realm="device""#),
                ),
        );
    }
}

/// Matches a well-formed Digest answer to `CHALLENGE` from user `test`.
struct DigestAuthorization;

impl Match for DigestAuthorization {
    fn matches(&self, request: &Request) -> bool {
        authorization(request).is_some_and(|value| {
            value.starts_with("Digest ")
                && value.contains(r#"username="test""#)
                && value.contains(r#"realm="Device API""#)
                && value.contains(r#"nonce="abc123""#)
                && value.contains("response=")
        })
    }
}

fn authorization(request: &Request) -> Option<&str> {
    request
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
}

/// Keep-alive device on a raw socket. `GET /fast` is answered at once;
/// every other request is read and never answered. Counts accepted and
/// closed connections.
struct RawDevice {
    port: u16,
    accepted: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl RawDevice {
    fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));

        let (on_accept, on_close) = (Arc::clone(&accepted), Arc::clone(&closed));
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                on_accept.fetch_add(1, Ordering::SeqCst);
                let on_close = Arc::clone(&on_close);
                thread::spawn(move || {
                    serve_fast_only(stream);
                    on_close.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        Self {
            port,
            accepted,
            closed,
        }
    }

    fn client(&self, builder: impl FnOnce(DeviceConfigBuilder) -> DeviceConfigBuilder) -> DeviceClient {
        let config = builder(DeviceConfig::http("127.0.0.1").port(self.port));
        DeviceClient::new(config.build().unwrap()).unwrap()
    }

    fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Poll `done` for up to five seconds.
    fn wait_for(&self, done: impl Fn(&Self) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done(self) {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        done(self)
    }
}

/// Serve one connection until the peer hangs up.
fn serve_fast_only(mut stream: TcpStream) {
    let mut pending = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => return,
            Ok(n) => pending.extend_from_slice(&chunk[..n]),
        }
        while let Some(end) = pending.windows(4).position(|w| w == b"\r\n\r\n") {
            let head: Vec<u8> = pending.drain(..end + 4).collect();
            if head.starts_with(b"GET /fast ") {
                let reply = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
                if stream.write_all(reply).is_err() {
                    return;
                }
            }
        }
    }
}

fn params() -> Endpoint {
    Endpoint::get(PARAM_PATH).unwrap()
}

// ── Plain requests ──────────────────────────────────────────────────

#[test]
fn get_returns_the_raw_response() {
    let harness = Harness::start();
    harness.mount(
        Mock::given(method("GET"))
            .and(path("/axis-cgi/basicdeviceinfo.cgi"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"data": {"propertyList": {"ProdNbr": "M3068-P"}}})),
            ),
    );
    let client = harness.client(harness.config());

    let result = client.request(
        &Endpoint::get("axis-cgi/basicdeviceinfo.cgi").unwrap(),
        RequestOptions::new(),
    );

    assert!(result.is_success());
    let response = result.raw_response().unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().unwrap();
    assert_eq!(body["data"]["propertyList"]["ProdNbr"], "M3068-P");

    let sent = harness.requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].headers.get("accept").unwrap().to_str().unwrap(),
        "application/json"
    );
    assert!(
        sent[0]
            .headers
            .get("user-agent")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("devlink/")
    );
    assert!(authorization(&sent[0]).is_none());
}

#[test]
fn post_sends_json_body() {
    let harness = Harness::start();
    let payload = json!({"apiVersion": "1.0", "method": "getSupportedVersions"});
    harness.mount(
        Mock::given(method("POST"))
            .and(path("/axis-cgi/mqtt/client.cgi"))
            .and(header("content-type", "application/json"))
            .and(body_json(&payload))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"apiVersion": "1.0"}))),
    );
    let client = harness.client(harness.config());

    let result = client.request(
        &Endpoint::post("/axis-cgi/mqtt/client.cgi").unwrap(),
        RequestOptions::new().json(payload),
    );

    assert_eq!(result.status(), Some(200));
}

#[test]
fn raw_body_uses_given_content_type() {
    let harness = Harness::start();
    harness.mount(
        Mock::given(method("PUT"))
            .and(path("/config"))
            .and(header("content-type", "text/plain"))
            .respond_with(ResponseTemplate::new(204)),
    );
    let client = harness.client(harness.config());

    let result = client.request(
        &Endpoint::put("config").unwrap(),
        RequestOptions::new().body("Brand=AXIS", "text/plain"),
    );

    assert_eq!(result.status(), Some(204));
}

#[test]
fn caller_headers_override_defaults() {
    let harness = Harness::start();
    harness.mount(
        Mock::given(method("GET"))
            .and(path(PARAM_PATH))
            .and(header("accept", "text/plain"))
            .and(header("x-request-id", "42"))
            .respond_with(ResponseTemplate::new(200)),
    );
    let client = harness.client(harness.config());

    let result = client.request(
        &params(),
        RequestOptions::new()
            .header("Accept", "text/plain")
            .header("X-Request-Id", "42"),
    );

    assert_eq!(result.status(), Some(200));
    let sent = harness.requests();
    assert_eq!(sent[0].headers.get_all("accept").iter().count(), 1);
}

#[test]
fn query_params_are_encoded() {
    let harness = Harness::start();
    harness.mount(
        Mock::given(method("GET"))
            .and(path(PARAM_PATH))
            .and(query_param("action", "list"))
            .and(query_param("group", "root.Brand & Model"))
            .respond_with(ResponseTemplate::new(200)),
    );
    let client = harness.client(harness.config());

    let result = client.request(
        &params(),
        RequestOptions::new()
            .param("action", "list")
            .param("group", "root.Brand & Model"),
    );

    assert_eq!(result.status(), Some(200));
}

#[test]
fn server_errors_are_successful_transports() {
    let harness = Harness::start();
    harness.mount(
        Mock::given(method("GET"))
            .and(path(PARAM_PATH))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal error")),
    );
    let client = harness.client(harness.config());

    let result = client.request(&params(), RequestOptions::new());

    assert!(result.is_success());
    assert_eq!(result.status(), Some(500));
    assert_eq!(result.raw_response().unwrap().text(), "internal error");
}

#[test]
fn redirects_are_not_followed() {
    let harness = Harness::start();
    harness.mount(
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/new")),
    );
    let client = harness.client(harness.config());

    let result = client.request(&Endpoint::get("/old").unwrap(), RequestOptions::new());

    let response = result.raw_response().unwrap();
    assert_eq!(response.status(), 302);
    assert_eq!(response.header("location"), Some("/new"));
    assert_eq!(harness.requests().len(), 1);
}

#[test]
fn invalid_header_is_a_configuration_failure() {
    let harness = Harness::start();
    let client = harness.client(harness.config());

    let result = client.request(&params(), RequestOptions::new().header("Bad Name", "x"));

    assert_eq!(result.kind(), Some(ErrorKind::Configuration));
    assert!(harness.requests().is_empty());
}

// ── Authentication ──────────────────────────────────────────────────

#[test]
fn explicit_basic_sends_credentials_up_front() {
    let harness = Harness::start();
    harness.basic_device();
    let client = harness.client(
        harness
            .config()
            .credentials("test", "password".to_string())
            .auth_mode(AuthMode::Basic),
    );

    let result = client.request(&params(), RequestOptions::new());

    assert_eq!(result.status(), Some(200));
    assert_eq!(harness.requests().len(), 1);
}

#[test]
fn explicit_digest_answers_the_challenge() {
    let harness = Harness::start();
    harness.digest_device();
    let client = harness.client(
        harness
            .config()
            .credentials("test", "password".to_string())
            .auth_mode(AuthMode::Digest),
    );

    let result = client.request(&params(), RequestOptions::new().param("action", "list"));

    assert_eq!(result.status(), Some(200));
    let sent = harness.requests();
    assert_eq!(sent.len(), 2);
    assert!(authorization(&sent[0]).is_none());
    let answer = authorization(&sent[1]).unwrap();
    assert!(answer.contains(r#"uri="/axis-cgi/param.cgi?action=list""#));
}

#[test]
fn auto_detects_basic() {
    let harness = Harness::start();
    harness.basic_device();
    let client = harness.client(harness.config().credentials("test", "password".to_string()));
    assert_eq!(client.auth_scheme(), AuthScheme::Undetermined);

    assert_eq!(client.request(&params(), RequestOptions::new()).status(), Some(200));
    assert_eq!(client.request(&params(), RequestOptions::new()).status(), Some(200));

    assert_eq!(client.auth_scheme(), AuthScheme::Basic);
    assert_eq!(harness.requests().len(), 2);
}

#[test]
fn basic_realm_naming_digest_is_still_basic() {
    let harness = Harness::start();
    harness.mount(
        Mock::given(method("GET")).and(path(PARAM_PATH)).respond_with(
            ResponseTemplate::new(401)
                .insert_header("WWW-Authenticate", r#"Basic realm="axis digest camera""#),
        ),
    );
    let client = harness.client(harness.config().credentials("test", "password".to_string()));

    let result = client.request(&params(), RequestOptions::new());

    assert_eq!(result.kind(), Some(ErrorKind::Authentication));
    assert_eq!(client.auth_scheme(), AuthScheme::Basic);
    assert_eq!(harness.requests().len(), 1);
}

#[test]
fn auto_detects_digest_with_one_extra_round_trip() {
    let harness = Harness::start();
    harness.digest_device();
    let client = harness.client(harness.config().credentials("test", "password".to_string()));

    for _ in 0..3 {
        let result = client.request(&params(), RequestOptions::new());
        assert_eq!(result.status(), Some(200));
    }

    assert_eq!(client.auth_scheme(), AuthScheme::Digest);
    let sent = harness.requests();
    assert_eq!(sent.len(), 4, "one basic probe, then one request each");
    let basic_probes = sent
        .iter()
        .filter(|r| authorization(r).is_some_and(|v| v.starts_with("Basic ")))
        .count();
    assert_eq!(basic_probes, 1);
}

#[test]
fn clearing_the_auth_cache_restarts_detection() {
    let harness = Harness::start();
    harness.digest_device();
    let client = harness.client(harness.config().credentials("test", "password".to_string()));

    let _ = client.request(&params(), RequestOptions::new());
    assert_eq!(client.auth_scheme(), AuthScheme::Digest);

    client.clear_auth_cache();
    assert_eq!(client.auth_scheme(), AuthScheme::Undetermined);
}

#[test]
fn wrong_credentials_fail_with_authentication_error() {
    let harness = Harness::start();
    harness.basic_device();
    let client = harness.client(harness.config().credentials("test", "wrong".to_string()));

    let result = client.request(&params(), RequestOptions::new());

    assert!(!result.is_success());
    assert_eq!(result.kind(), Some(ErrorKind::Authentication));
    let error = result.error().unwrap();
    assert_eq!(error.code(), "authentication_failed");
    assert_eq!(error.status(), Some(401));
    assert_eq!(harness.requests().len(), 1);
}

#[test]
fn missing_credentials_are_reported() {
    let harness = Harness::start();
    harness.digest_device();
    let client = harness.client(harness.config());

    let result = client.request(&params(), RequestOptions::new());

    assert_eq!(result.kind(), Some(ErrorKind::Authentication));
    assert_eq!(result.error().unwrap().code(), "credentials_required");
}

// ── Network failures ────────────────────────────────────────────────

#[test]
fn slow_device_times_out() {
    let harness = Harness::start();
    harness.mount(
        Mock::given(method("GET"))
            .and(path(PARAM_PATH))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5))),
    );
    let client = harness.client(harness.config().read_timeout(Duration::from_millis(300)));

    let result = client.request(&params(), RequestOptions::new());

    assert_eq!(result.kind(), Some(ErrorKind::Network));
    let error = result.error().unwrap();
    assert_eq!(error.code(), "request_timeout");
    assert!(error.is_timeout());
    assert!(error.is_transient());
}

#[test]
fn per_call_timeout_overrides_config() {
    let harness = Harness::start();
    harness.mount(
        Mock::given(method("GET"))
            .and(path(PARAM_PATH))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5))),
    );
    let client = harness.client(harness.config());

    let result = client.request(
        &params(),
        RequestOptions::new().timeout(Duration::from_millis(300)),
    );

    assert_eq!(result.error().unwrap().code(), "request_timeout");
}

#[test]
fn silent_device_hits_the_read_timeout() {
    let device = RawDevice::start();
    let client = device.client(|config| config.read_timeout(Duration::from_millis(300)));

    let started = Instant::now();
    let result = client.request(&Endpoint::get("/silent").unwrap(), RequestOptions::new());

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(result.kind(), Some(ErrorKind::Network));
    let error = result.error().unwrap();
    assert_eq!(error.code(), "request_timeout");
    assert!(error.is_timeout());
    assert_eq!(device.accepted(), 1);
}

#[test]
fn unroutable_device_hits_the_connect_timeout() {
    // 10.255.255.1 swallows SYNs on most networks; sandboxes without a
    // route fail fast instead, which is still a network failure.
    let config = DeviceConfig::http("10.255.255.1")
        .connect_timeout(Duration::from_millis(200))
        .read_timeout(Duration::from_secs(30))
        .build()
        .unwrap();
    let client = DeviceClient::new(config).unwrap();

    let started = Instant::now();
    let result = client.request(&params(), RequestOptions::new());

    assert!(started.elapsed() < Duration::from_secs(5), "took {:?}", started.elapsed());
    assert_eq!(result.kind(), Some(ErrorKind::Network));
    assert!(result.error().unwrap().is_transient());
}

#[test]
fn refused_connection_is_a_network_failure() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = DeviceConfig::http("127.0.0.1").port(port).build().unwrap();
    let client = DeviceClient::new(config).unwrap();

    let result = client.request(&params(), RequestOptions::new());

    assert_eq!(result.kind(), Some(ErrorKind::Network));
    assert_eq!(result.error().unwrap().code(), "connection_refused");
}

// ── Lifecycle & sessions ────────────────────────────────────────────

#[test]
fn close_is_idempotent_and_blocks_requests() {
    let harness = Harness::start();
    harness.mount(
        Mock::given(method("GET"))
            .and(path(PARAM_PATH))
            .respond_with(ResponseTemplate::new(200)),
    );
    let client = harness.client(harness.config());
    assert_eq!(client.request(&params(), RequestOptions::new()).status(), Some(200));

    client.close();
    client.close();

    assert!(client.is_closed());
    for result in [
        client.request(&params(), RequestOptions::new()),
        client.request_isolated(&params(), RequestOptions::new()),
    ] {
        assert_eq!(result.kind(), Some(ErrorKind::Network));
        assert_eq!(result.error().unwrap().code(), "client_closed");
    }
    assert_eq!(harness.requests().len(), 1);
}

#[test]
fn close_abandons_in_flight_requests_and_their_sockets() {
    let device = RawDevice::start();
    let client = device.client(|config| config);

    thread::scope(|scope| {
        let stalled = scope.spawn(|| {
            client.request(&Endpoint::get("/stall").unwrap(), RequestOptions::new())
        });
        assert!(device.wait_for(|d| d.accepted() == 1));

        // A second socket, left idle in the pool.
        let fast = client.request(&Endpoint::get("/fast").unwrap(), RequestOptions::new());
        assert_eq!(fast.status(), Some(200));
        assert_eq!(device.accepted(), 2);
        assert_eq!(device.closed(), 0);

        let started = Instant::now();
        client.close();
        let stalled = stalled.join().unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(stalled.kind(), Some(ErrorKind::Network));
        assert_eq!(stalled.error().unwrap().code(), "client_closed");
    });

    assert!(
        device.wait_for(|d| d.closed() == 2),
        "{} of 2 sockets closed",
        device.closed()
    );
}

#[test]
fn isolated_requests_leave_auth_state_alone() {
    let harness = Harness::start();
    harness.digest_device();
    let client = harness.client(harness.config().credentials("test", "password".to_string()));

    let result = client.request_isolated(&params(), RequestOptions::new());

    assert_eq!(result.status(), Some(200));
    assert_eq!(client.auth_scheme(), AuthScheme::Undetermined);
}

#[test]
fn session_cookies_persist_until_cleared() {
    let harness = Harness::start();
    harness.mount(
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).insert_header("Set-Cookie", "session=abc123; Path=/")),
    );
    harness.mount(
        Mock::given(method("GET"))
            .and(path("/whoami"))
            .and(header("cookie", "session=abc123"))
            .respond_with(ResponseTemplate::new(200))
            .with_priority(1),
    );
    harness.mount(
        Mock::given(method("GET"))
            .and(path("/whoami"))
            .respond_with(ResponseTemplate::new(403)),
    );
    let client = harness.client(harness.config());
    let whoami = Endpoint::get("/whoami").unwrap();

    assert_eq!(
        client.request(&Endpoint::get("/login").unwrap(), RequestOptions::new()).status(),
        Some(200)
    );
    assert_eq!(client.request(&whoami, RequestOptions::new()).status(), Some(200));
    assert_eq!(
        client.request_isolated(&whoami, RequestOptions::new()).status(),
        Some(403)
    );

    client.clear_session().unwrap();
    assert_eq!(client.request(&whoami, RequestOptions::new()).status(), Some(403));
}

// ── Concurrency ─────────────────────────────────────────────────────

#[test]
fn concurrent_requests_share_one_auth_decision() {
    let harness = Harness::start();
    harness.digest_device();
    let client = harness.client(harness.config().credentials("test", "password".to_string()));

    thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    (0..3)
                        .map(|_| client.request(&params(), RequestOptions::new()).status())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        for worker in workers {
            assert_eq!(worker.join().unwrap(), vec![Some(200); 3]);
        }
    });

    assert_eq!(client.auth_scheme(), AuthScheme::Digest);
}
