//! HTTP boundary for uploads, history, live stream and stored frames.
//!
//! Plain `TcpListener` server: a nonblocking accept loop driven by a
//! shutdown flag, one spawned thread per connection so concurrent
//! uploads and long-lived stream consumers never block each other.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::broadcast::{write_multipart_frame, STREAM_BOUNDARY};
use crate::ingest::{IngestError, IngestRuntime};
use crate::storage::FRAMES_URL_PREFIX;

const MAX_HEADER_BYTES: usize = 8192;
const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;
const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 500;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:5000".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join().map_err(|_| anyhow!("server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct Server {
    cfg: ServerConfig,
    runtime: Arc<IngestRuntime>,
}

impl Server {
    pub fn new(cfg: ServerConfig, runtime: Arc<IngestRuntime>) -> Self {
        Self { cfg, runtime }
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        let listener = TcpListener::bind(&self.cfg.addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let runtime = self.runtime;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_server(listener, runtime, shutdown_thread) {
                log::error!("http server stopped: {}", err);
            }
        });

        Ok(ServerHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_server(
    listener: TcpListener,
    runtime: Arc<IngestRuntime>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                let runtime = runtime.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &runtime) {
                        log::debug!("connection ended: {:#}", err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, runtime: &IngestRuntime) -> Result<()> {
    let request = read_request(&mut stream)?;

    match (request.method.as_str(), request.path.as_str()) {
        ("POST", "/upload") => handle_upload(&mut stream, runtime, &request),
        ("GET", "/history") => handle_history(&mut stream, runtime, &request),
        ("GET", "/stream") => handle_stream(stream, runtime),
        ("GET", "/health") => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        ("GET", path) if path.starts_with(FRAMES_URL_PREFIX) => {
            handle_frame(&mut stream, runtime, path)
        }
        ("GET", _) => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
        _ => write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#),
    }
}

fn handle_upload(
    stream: &mut TcpStream,
    runtime: &IngestRuntime,
    request: &HttpRequest,
) -> Result<()> {
    match runtime.ingest(&request.body, chrono::Utc::now()) {
        Ok(result) => {
            let payload = serde_json::to_vec(&result)?;
            write_response(stream, 200, "application/json", &payload)
        }
        Err(IngestError::EmptyBody) => {
            write_json_response(stream, 400, r#"{"error":"no_data"}"#)
        }
        Err(IngestError::Decode(_)) => {
            write_json_response(stream, 400, r#"{"error":"decode_failed"}"#)
        }
        Err(IngestError::Detection(err)) => {
            log::error!("detection failed: {:#}", err);
            write_json_response(stream, 500, r#"{"error":"detection_failed"}"#)
        }
    }
}

fn handle_history(
    stream: &mut TcpStream,
    runtime: &IngestRuntime,
    request: &HttpRequest,
) -> Result<()> {
    let limit = request
        .query_param("limit")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    match runtime.recent_events(limit) {
        Ok(events) => {
            let payload = serde_json::to_vec(&events)?;
            write_response(stream, 200, "application/json", &payload)
        }
        Err(err) => {
            log::error!("history query failed: {:#}", err);
            write_json_response(stream, 500, r#"{"error":"history_failed"}"#)
        }
    }
}

/// Long-lived MJPEG stream. Writes multipart chunks at whatever cadence
/// frames are published, until the client disconnects. Blocks silently
/// before the first publish instead of erroring.
fn handle_stream(mut stream: TcpStream, runtime: &IngestRuntime) -> Result<()> {
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        STREAM_BOUNDARY
    );
    stream.write_all(header.as_bytes())?;

    let mut subscriber = runtime.broadcaster().subscribe();
    loop {
        let jpeg = subscriber.next();
        // A write error means the viewer went away; that is the only
        // termination condition.
        if write_multipart_frame(&mut stream, &jpeg).is_err() {
            return Ok(());
        }
    }
}

fn handle_frame(stream: &mut TcpStream, runtime: &IngestRuntime, path: &str) -> Result<()> {
    let filename = &path[FRAMES_URL_PREFIX.len()..];
    match runtime.frames().read(filename) {
        Ok(bytes) => write_response(stream, 200, "image/jpeg", &bytes),
        Err(_) => write_json_response(stream, 404, r#"{"error":"not_found"}"#),
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut buf = [0u8; 8192];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = find_header_end(&data) {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request header too large"));
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed mid-request"));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let head = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    if content_length > MAX_BODY_BYTES {
        return Err(anyhow!("request body too large"));
    }

    let mut body = data[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed mid-body"));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        raw_path: raw_path.to_string(),
        body,
    })
}

fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    raw_path: String,
    body: Vec<u8>,
}

impl HttpRequest {
    fn query_param(&self, key: &str) -> Option<&str> {
        let query = self.raw_path.split('?').nth(1)?;
        for pair in query.split('&') {
            if let Some((k, v)) = pair.split_once('=') {
                if k == key {
                    return Some(v);
                }
            }
        }
        None
    }
}
