//! Minimal blocking HTTP stub server for fetcher and orchestrator tests.
//!
//! Serves canned routes with ETag/304 semantics on a loopback port, records
//! every request (path + `If-None-Match` header), and shuts down on drop.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// How the server treats one path.
#[derive(Clone)]
pub enum Route {
    /// 200 with body (or 304 when `If-None-Match` matches the ETag).
    Content { body: Vec<u8>, etag: Option<String> },
    /// A fixed failure status (404, 500, ...).
    Status(u16),
    /// Accept the connection, then close it without responding.
    Hangup,
}

#[derive(Default)]
struct State {
    routes: HashMap<String, Route>,
    // (path, If-None-Match) per request, in arrival order.
    requests: Vec<(String, Option<String>)>,
}

pub struct StubServer {
    url: String,
    state: Arc<Mutex<State>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl StubServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");
        let state = Arc::new(Mutex::new(State::default()));
        let stop = Arc::new(AtomicBool::new(false));

        let thread_state = Arc::clone(&state);
        let thread_stop = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            for stream in listener.incoming() {
                if thread_stop.load(Ordering::SeqCst) {
                    break;
                }
                if let Ok(stream) = stream {
                    handle_connection(stream, &thread_state);
                }
            }
        });

        Self {
            url: format!("http://{addr}"),
            state,
            stop,
            handle: Some(handle),
        }
    }

    /// Base URL, e.g. `http://127.0.0.1:41234`.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Serve `body` at `path` with an optional ETag.
    pub fn set(&self, path: &str, body: impl Into<Vec<u8>>, etag: Option<&str>) {
        self.state.lock().expect("state lock").routes.insert(
            path.to_owned(),
            Route::Content {
                body: body.into(),
                etag: etag.map(str::to_owned),
            },
        );
    }

    /// Serve a fixed failure status at `path`.
    pub fn set_status(&self, path: &str, status: u16) {
        self.state
            .lock()
            .expect("state lock")
            .routes
            .insert(path.to_owned(), Route::Status(status));
    }

    /// Close connections to `path` without responding.
    pub fn set_hangup(&self, path: &str) {
        self.state
            .lock()
            .expect("state lock")
            .routes
            .insert(path.to_owned(), Route::Hangup);
    }

    /// `If-None-Match` values seen for `path`, one entry per request.
    pub fn requests_for(&self, path: &str) -> Vec<Option<String>> {
        self.state
            .lock()
            .expect("state lock")
            .requests
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, inm)| inm.clone())
            .collect()
    }

    pub fn request_count(&self, path: &str) -> usize {
        self.requests_for(path).len()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // Unblock the accept loop.
        let addr = self.url.trim_start_matches("http://").to_owned();
        let _ = TcpStream::connect(addr);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn handle_connection(stream: TcpStream, state: &Arc<Mutex<State>>) {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    let path = match request_line.split_whitespace().nth(1) {
        Some(path) => path.to_owned(),
        None => return,
    };

    let mut if_none_match = None;
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                let line = line.trim_end();
                if line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    if name.eq_ignore_ascii_case("if-none-match") {
                        if_none_match = Some(value.trim().to_owned());
                    }
                }
            }
            Err(_) => return,
        }
    }

    let route = {
        let mut state = state.lock().expect("state lock");
        state.requests.push((path.clone(), if_none_match.clone()));
        state.routes.get(&path).cloned()
    };

    let mut stream = reader.into_inner();
    match route {
        None => respond_status(&mut stream, 404, "Not Found"),
        Some(Route::Status(code)) => respond_status(&mut stream, code, "Stubbed Error"),
        Some(Route::Hangup) => {} // drop without responding
        Some(Route::Content { body, etag }) => {
            let matches = match (&if_none_match, &etag) {
                (Some(presented), Some(current)) => presented == current,
                _ => false,
            };
            if matches {
                let mut response = String::from("HTTP/1.1 304 Not Modified\r\n");
                if let Some(etag) = &etag {
                    response.push_str(&format!("ETag: {etag}\r\n"));
                }
                response.push_str("Connection: close\r\n\r\n");
                let _ = stream.write_all(response.as_bytes());
            } else {
                let mut response = String::from("HTTP/1.1 200 OK\r\n");
                if let Some(etag) = &etag {
                    response.push_str(&format!("ETag: {etag}\r\n"));
                }
                response.push_str(&format!("Content-Length: {}\r\n", body.len()));
                response.push_str("Connection: close\r\n\r\n");
                let _ = stream.write_all(response.as_bytes());
                let _ = stream.write_all(&body);
            }
            let _ = stream.flush();
        }
    }
}

fn respond_status(stream: &mut TcpStream, code: u16, reason: &str) {
    let response = format!(
        "HTTP/1.1 {code} {reason}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}
