//! End-to-end tests driving a real reactor over a loopback socket.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use fake::faker::internet::en::{Password, Username};
use fake::Fake;
use hearth::config::Config;
use hearth::db::{InMemoryStore, UserStore};
use hearth::parser::response::ResponseBuilder;
use hearth::reactor::Reactor;
use hearth::worker::RequestContext;
use std::sync::Arc;

/// A fresh username/password pair, so tests that register a user don't
/// collide with each other if the credential store were ever shared.
fn fake_credentials() -> (String, String) {
    let username: String = Username().fake();
    let password: String = Password(8..16).fake();
    (username, password)
}

fn doc_root() -> PathBuf {
    use std::sync::atomic::{AtomicUsize, Ordering};
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let id = COUNTER.fetch_add(1, Ordering::Relaxed);
    let root = std::env::temp_dir().join(format!("hearth-test-doc-root-{}-{id}", std::process::id()));
    let _ = std::fs::remove_dir_all(&root);
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(root.join("index.html"), "<h1>home</h1>").unwrap();
    std::fs::write(root.join("400.html"), "bad request").unwrap();
    std::fs::write(root.join("403.html"), "forbidden").unwrap();
    std::fs::write(root.join("404.html"), "not found").unwrap();
    std::fs::write(root.join("welcome.html"), "<h1>welcome back</h1>").unwrap();
    std::fs::write(root.join("error.html"), "<h1>bad credentials</h1>").unwrap();
    root
}

/// Spawns a reactor on an OS-assigned loopback port with a short idle
/// timeout, backed by an in-memory credential store, and returns the
/// address it's listening on. The reactor thread runs for the rest of
/// the test process's life, same as a real server's main loop.
fn spawn_server(timeout_ms: u64) -> std::net::SocketAddr {
    let root = doc_root();
    let config = Config::parse_from([
        "server",
        "--port",
        "0",
        "--doc-root",
        root.to_str().unwrap(),
        "--timeout-ms",
        &timeout_ms.to_string(),
    ]);

    let responses = ResponseBuilder::new(&config.doc_root).unwrap();
    let users: Arc<dyn UserStore> = Arc::new(InMemoryStore::default());
    let context = RequestContext { responses, users };

    let reactor = Reactor::bind(&config, context).expect("reactor should bind to an ephemeral port");
    let addr = reactor.local_addr().unwrap();

    std::thread::spawn(move || reactor.run());
    // Give the worker threads and poll loop a moment to settle before
    // the first connection lands.
    std::thread::sleep(Duration::from_millis(50));
    addr
}

fn request(addr: std::net::SocketAddr, raw: &[u8], read_timeout: Duration) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(read_timeout)).unwrap();
    stream.write_all(raw).unwrap();
    let mut out = Vec::new();
    let _ = stream.read_to_end(&mut out);
    out
}

#[test]
fn serves_index_on_root_get() {
    let addr = spawn_server(60_000);
    let response = request(addr, b"GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n", Duration::from_secs(2));
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 200"), "got: {text}");
    assert!(text.contains("<h1>home</h1>"));
}

#[test]
fn missing_asset_returns_404() {
    let addr = spawn_server(60_000);
    let response = request(addr, b"GET /nope.html HTTP/1.1\r\nConnection: close\r\n\r\n", Duration::from_secs(2));
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 404"), "got: {text}");
}

#[test]
fn path_traversal_is_rejected() {
    let addr = spawn_server(60_000);
    let response = request(
        addr,
        b"GET /../../../../etc/passwd HTTP/1.1\r\nConnection: close\r\n\r\n",
        Duration::from_secs(2),
    );
    let text = String::from_utf8_lossy(&response);
    assert!(
        text.starts_with("HTTP/1.1 404") || text.starts_with("HTTP/1.1 403"),
        "got: {text}"
    );
}

#[test]
fn keep_alive_serves_two_requests_on_one_connection() {
    let addr = spawn_server(60_000);
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    stream.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
    let mut buf = [0u8; 4096];
    let n = stream.read(&mut buf).unwrap();
    let first = String::from_utf8_lossy(&buf[..n]);
    assert!(first.starts_with("HTTP/1.1 200"));
    assert!(first.contains("Connection: keep-alive"));

    stream.write_all(b"GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").unwrap();
    let n = stream.read(&mut buf).unwrap();
    let second = String::from_utf8_lossy(&buf[..n]);
    assert!(second.starts_with("HTTP/1.1 200"));
}

#[test]
fn register_then_login_serves_welcome_page() {
    let addr = spawn_server(60_000);
    let (username, password) = fake_credentials();

    let register_body = format!("username={username}&password={password}").into_bytes();
    let register_req = format!(
        "POST /register.html HTTP/1.1\r\nHost: x\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        register_body.len()
    );
    let mut raw = register_req.into_bytes();
    raw.extend_from_slice(&register_body);
    let response = request(addr, &raw, Duration::from_secs(2));
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 200"), "got: {text}");
    assert!(text.contains("welcome back"));

    let login_body = format!("username={username}&password={password}").into_bytes();
    let login_req = format!(
        "POST /login.html HTTP/1.1\r\nHost: x\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        login_body.len()
    );
    let mut raw = login_req.into_bytes();
    raw.extend_from_slice(&login_body);
    let response = request(addr, &raw, Duration::from_secs(2));
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 200"), "got: {text}");
    assert!(text.contains("welcome back"));
}

#[test]
fn login_with_wrong_password_serves_error_page() {
    let addr = spawn_server(60_000);
    let (username, password) = fake_credentials();

    let register_body = format!("username={username}&password={password}").into_bytes();
    let register_req = format!(
        "POST /register.html HTTP/1.1\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        register_body.len()
    );
    let mut raw = register_req.into_bytes();
    raw.extend_from_slice(&register_body);
    request(addr, &raw, Duration::from_secs(2));

    let wrong_password: String = Password(8..16).fake();
    let login_body = format!("username={username}&password={wrong_password}").into_bytes();
    let login_req = format!(
        "POST /login.html HTTP/1.1\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        login_body.len()
    );
    let mut raw = login_req.into_bytes();
    raw.extend_from_slice(&login_body);
    let response = request(addr, &raw, Duration::from_secs(2));
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 200"), "got: {text}");
    assert!(text.contains("bad credentials"));
}

#[test]
fn malformed_request_line_gets_a_bad_request_response() {
    let addr = spawn_server(60_000);
    let response = request(addr, b"NOTAVERB / GARBAGE\r\n\r\n", Duration::from_secs(2));
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 400"), "got: {text}");
}

#[test]
fn idle_connection_is_closed_after_its_timeout() {
    let addr = spawn_server(200);
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    // Send nothing; wait past the configured idle timeout, then expect
    // the reactor to have closed the socket from its end.
    std::thread::sleep(Duration::from_millis(600));
    let mut buf = [0u8; 16];
    let n = stream.read(&mut buf).unwrap_or(0);
    assert_eq!(0, n, "expected the idle connection to be closed by the server");
}
