//! Minimal HTTP/1.1 server that answers each request with the next entry in
//! a status script. Lets integration tests express per-attempt sequences
//! (503, 503, 200) that a record-once mock cannot.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

pub struct ScriptedServer {
    url: String,
    hits: Arc<AtomicUsize>,
}

impl ScriptedServer {
    /// Base URL of the server, e.g. "http://127.0.0.1:41123".
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Number of requests received so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Starts a server in a background thread. Each incoming request is answered
/// with the next `(status, body)` entry; once the script is exhausted the
/// last entry repeats. The server runs until the process exits.
pub fn start(script: Vec<(u16, &'static str)>) -> ScriptedServer {
    assert!(!script.is_empty(), "script must have at least one entry");
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&hits);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let hit = counter.fetch_add(1, Ordering::SeqCst);
            let (status, body) = script[hit.min(script.len() - 1)];
            thread::spawn(move || handle(stream, status, body));
        }
    });

    ScriptedServer {
        url: format!("http://127.0.0.1:{}", port),
        hits,
    }
}

fn handle(mut stream: TcpStream, status: u16, body: &str) {
    let _ = stream.set_read_timeout(Some(std::time::Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(std::time::Duration::from_secs(2)));

    // One read is enough for the small requests these tests send.
    let mut buf = [0u8; 8192];
    match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(_) => {}
    }

    // Connection: close keeps every attempt on a fresh connection, so the
    // hit counter sees each retry.
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason(status),
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes());
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "",
    }
}
