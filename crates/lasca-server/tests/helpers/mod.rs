#![allow(dead_code)]

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

/// A running `lasca-server` instance for end-to-end testing.
///
/// Spawns the server binary on a random port with a temporary config that
/// points at the PostgreSQL instance named by `LASCA_TEST_DATABASE_URL`
/// (a single main shard, id 10). The server is killed when this struct is
/// dropped.
pub struct TestServer {
    child: Option<Child>,
    addr: String,
    /// Kept alive for the duration of the test; dropping cleans up the
    /// temporary config directory.
    _config_dir: tempfile::TempDir,
}

impl TestServer {
    /// Start a new lasca-server instance on a random port.
    pub fn start() -> Self {
        let port = free_port();
        let addr = format!("127.0.0.1:{port}");
        let shard_url = test_database_url();

        let config_dir = tempfile::tempdir().expect("create temp dir");
        let config_path = config_dir.path().join("lasca.toml");
        let config_content = format!(
            r#"[server]
listen_addr = "{addr}"

[[shards]]
id = 10
main = true
url = "{shard_url}"
"#
        );
        std::fs::write(&config_path, config_content).expect("write config");

        let binary = server_binary();
        assert!(
            binary.exists(),
            "lasca-server binary not found at {binary:?}. Run `cargo build` first."
        );

        let child = Command::new(&binary)
            .current_dir(config_dir.path())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("start lasca-server");

        // Poll TCP until the server is reachable.
        let start = std::time::Instant::now();
        let mut connected = false;
        while start.elapsed() < Duration::from_secs(10) {
            if std::net::TcpStream::connect(&addr).is_ok() {
                connected = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        assert!(
            connected,
            "lasca-server did not become reachable at {addr} within 10s"
        );

        Self {
            child: Some(child),
            addr: format!("http://{addr}"),
            _config_dir: config_dir,
        }
    }

    /// The HTTP address of the running server (e.g., "http://127.0.0.1:12345").
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// The PostgreSQL the suite runs against. The schema is created by the
/// server on startup.
fn test_database_url() -> String {
    std::env::var("LASCA_TEST_DATABASE_URL")
        .expect("set LASCA_TEST_DATABASE_URL to run the end-to-end suite")
}

/// A topic name unique to this test run, so suites sharing one database
/// don't cross-deliver.
pub fn unique_topic(label: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{label}-{nanos}")
}

/// Create a namespace and return its id.
pub fn create_namespace(client: &reqwest::blocking::Client, addr: &str, name: &str) -> String {
    let response = client
        .post(format!("{addr}/ns"))
        .json(&serde_json::json!({"name": name}))
        .send()
        .expect("create namespace");
    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().expect("namespace body");
    body["id"].as_str().expect("namespace id").to_string()
}

/// Enqueue a message and return its id.
pub fn enqueue_message(
    client: &reqwest::blocking::Client,
    addr: &str,
    namespace: &str,
    topic: &str,
    priority: u32,
    payload: &str,
    deliver_after_seconds: u64,
    ttl_seconds: u64,
) -> String {
    let response = client
        .post(format!("{addr}/message/enqueue"))
        .json(&serde_json::json!({
            "namespace": namespace,
            "topic": topic,
            "priority": priority,
            "payload": payload,
            "metadata": "m",
            "deliverAfterSeconds": deliver_after_seconds,
            "ttlSeconds": ttl_seconds,
        }))
        .send()
        .expect("enqueue message");
    assert_eq!(response.status().as_u16(), 201, "enqueue failed");
    let body: serde_json::Value = response.json().expect("enqueue body");
    assert_eq!(body["status"], "created");
    body["msgId"].as_str().expect("message id").to_string()
}

/// Dequeue with the given limit and timeout; returns the `messages` array.
pub fn dequeue_messages(
    client: &reqwest::blocking::Client,
    addr: &str,
    namespace: &str,
    topic: &str,
    limit: usize,
    timeout_seconds: u64,
) -> Vec<serde_json::Value> {
    let response = client
        .post(format!("{addr}/message/dequeue"))
        .json(&serde_json::json!({
            "namespace": namespace,
            "topic": topic,
            "limit": limit,
            "timeoutSeconds": timeout_seconds,
        }))
        .send()
        .expect("dequeue messages");
    let body: serde_json::Value = response.json().expect("dequeue body");
    body["messages"].as_array().cloned().unwrap_or_default()
}

/// Ack (or nack) a batch of message ids.
pub fn ack_messages(
    client: &reqwest::blocking::Client,
    addr: &str,
    items: &[(&str, bool)],
) {
    let body: Vec<serde_json::Value> = items
        .iter()
        .map(|(id, ack)| serde_json::json!({"id": id, "ack": ack}))
        .collect();
    let response = client
        .post(format!("{addr}/message/ack"))
        .json(&body)
        .send()
        .expect("ack messages");
    assert!(response.status().is_success());
}

/// Find a free TCP port.
fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind to free port");
    listener.local_addr().unwrap().port()
}

/// Resolve the path to the lasca-server binary in the workspace target dir.
fn server_binary() -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.pop(); // crates/
    path.pop(); // workspace root
    path.push("target");
    path.push("debug");
    path.push("lasca-server");
    path
}
