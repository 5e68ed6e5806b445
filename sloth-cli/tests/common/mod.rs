//! Common test utilities for CLI integration tests

#![allow(dead_code)]

use std::io::Write;
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::thread;
use tempfile::{NamedTempFile, TempDir};

/// Minimal valid profile pointing at `url`
pub fn minimal_profile(url: &str) -> String {
    format!(
        r#"
[experiment]
name = "test"
duration = "2s"

[target]
url = "{url}"
"#
    )
}

/// Write `content` to a temporary `.toml` file
pub fn write_profile(content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().expect("Failed to create temp file");
    file.write_all(content.as_bytes()).expect("Failed to write profile");
    file
}

/// Scratch directory plus a path inside it
pub fn scratch_path(name: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join(name);
    (dir, path)
}

/// Loopback server that accepts and holds connections until the test ends
pub fn start_holding_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get local addr");
    thread::spawn(move || {
        let mut held = Vec::new();
        for stream in listener.incoming().flatten() {
            held.push(stream);
        }
    });
    addr
}
