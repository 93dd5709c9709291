//! CLI Integration Tests
//!
//! Runs the real `wirerpc` binary: a `serve` process in the background and
//! `call` processes against it over loopback.

use std::net::TcpListener;
use std::process::{Child, Command, Output, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

fn wirerpc() -> Command {
    Command::new(env!("CARGO_BIN_EXE_wirerpc"))
}

/// Picks a port that was free a moment ago.
fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

struct ServeProcess {
    child: Child,
    addr: String,
}

impl Drop for ServeProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn start_server() -> ServeProcess {
    let addr = format!("127.0.0.1:{}", free_port());
    let child = wirerpc()
        .args(["serve", "-b", &addr])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let server = ServeProcess { child, addr };

    let deadline = Instant::now() + Duration::from_secs(10);
    while std::net::TcpStream::connect(&server.addr).is_err() {
        assert!(Instant::now() < deadline, "server did not start");
        sleep(Duration::from_millis(50));
    }
    server
}

fn call(addr: &str, service: &str, method: &str, args: &str) -> Output {
    wirerpc()
        .args(["call", "--instance", addr, service, method, "-a", args])
        .output()
        .unwrap()
}

#[test]
fn test_call_echo() {
    let server = start_server();
    let output = call(&server.addr, "EchoService", "echo", r#"["hello"]"#);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "\"hello\"");
}

#[test]
fn test_call_remote_failure_exits_non_zero() {
    let server = start_server();
    let output = call(&server.addr, "EchoService", "fail", r#"["boom"]"#);

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("boom"));
}

#[test]
fn test_call_unknown_service() {
    let server = start_server();
    let output = call(&server.addr, "Missing", "echo", "[]");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("ServiceNotFound"));
}

#[test]
fn test_call_builtin_info() {
    let server = start_server();
    let output = call(&server.addr, "EchoService", "_info", "[]");

    assert!(output.status.success());
    let info: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(info["role"], "server");
    assert_eq!(info["services"], serde_json::json!(["EchoService"]));
}

#[test]
fn test_call_unreachable_instance() {
    let addr = format!("127.0.0.1:{}", free_port());
    let output = call(&addr, "EchoService", "echo", r#"["hello"]"#);
    assert!(!output.status.success());
}

#[test]
fn test_call_invalid_args() {
    let output = call("127.0.0.1:1", "EchoService", "echo", "not json");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid JSON"));
}
