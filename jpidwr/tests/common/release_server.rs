//! Minimal HTTP/1.1 release server for integration tests.
//!
//! Serves fixed bodies by path, answers 404 for anything else, and can be
//! told to answer 503 a number of times before serving a path. Every request
//! is counted so tests can assert how much network I/O happened.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Default)]
struct State {
    routes: HashMap<String, Vec<u8>>,
    failures: HashMap<String, u32>,
    hits: HashMap<String, usize>,
}

/// Handle to a running server. The server lives until the process exits.
#[derive(Clone)]
pub struct ReleaseServer {
    base_url: String,
    state: Arc<Mutex<State>>,
}

impl ReleaseServer {
    /// Start serving on an ephemeral loopback port.
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(State::default()));

        let shared = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let state = Arc::clone(&shared);
                thread::spawn(move || handle(stream, &state));
            }
        });

        Self {
            base_url: format!("http://127.0.0.1:{}/releases", port),
            state,
        }
    }

    /// Base URL to configure the cache with.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Serve `body` at `<base>/<version>/<name>`.
    pub fn serve(&self, version: &str, name: &str, body: Vec<u8>) {
        let path = route(version, name);
        self.state.lock().unwrap().routes.insert(path, body);
    }

    /// Answer 503 for the next `times` requests of `<base>/<version>/<name>`.
    pub fn fail_times(&self, version: &str, name: &str, times: u32) {
        let path = route(version, name);
        self.state.lock().unwrap().failures.insert(path, times);
    }

    /// Requests received for `<base>/<version>/<name>`.
    pub fn hits(&self, version: &str, name: &str) -> usize {
        let path = route(version, name);
        self.state.lock().unwrap().hits.get(&path).copied().unwrap_or(0)
    }

    /// Requests received in total.
    pub fn total_hits(&self) -> usize {
        self.state.lock().unwrap().hits.values().sum()
    }
}

fn route(version: &str, name: &str) -> String {
    format!("/releases/{}/{}", version, name)
}

fn handle(mut stream: TcpStream, state: &Mutex<State>) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));

    let mut request = Vec::new();
    let mut buf = [0u8; 4096];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }

    let request = String::from_utf8_lossy(&request);
    let mut parts = request.lines().next().unwrap_or("").split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("").to_string();

    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(
            b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        return;
    }

    let response = {
        let mut state = state.lock().unwrap();
        *state.hits.entry(path.clone()).or_insert(0) += 1;

        let failing = match state.failures.get_mut(&path) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        };

        if failing {
            None
        } else {
            Some(state.routes.get(&path).cloned())
        }
    };

    let (status, body) = match response {
        None => ("503 Service Unavailable", Vec::new()),
        Some(None) => ("404 Not Found", Vec::new()),
        Some(Some(body)) => ("200 OK", body),
    };

    let head = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n\r\n",
        status,
        body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}
