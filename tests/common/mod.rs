//! Shared utilities for integration tests: a scriptable mock S3 backend and
//! a gateway started on an ephemeral port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use s3_gateway::config::GatewayConfig;
use s3_gateway::net::Listener;
use s3_gateway::{Gateway, HttpServer, Shutdown};

/// A request as the backend saw it on the wire.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    /// Request target: raw path and query.
    pub target: String,
    /// Header lines in wire order, names in wire case.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Accept order of the connection that carried it.
    pub connection: usize,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What the mock answers.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Fixed status and body, keep-alive.
    Respond { status: u16, body: Vec<u8> },
    /// Close the first `count` connections after reading the request head,
    /// then respond 200 with `body`.
    ResetFirst { count: usize, body: Vec<u8> },
    /// `total` bytes of body with Content-Length, written in `chunk`-sized
    /// pieces with `pause` between them.
    Stream { total: usize, chunk: usize, pause: Duration },
    /// Send headers promising `total` bytes, write `sent`, then close.
    Truncate { total: usize, sent: usize },
    /// Wait `delay` before responding 200 with `body`.
    Slow { delay: Duration, body: Vec<u8> },
}

/// A mock S3 backend listening on 127.0.0.1.
pub struct MockS3 {
    pub addr: SocketAddr,
    pub requests: Arc<Mutex<Vec<RecordedRequest>>>,
    /// Connections accepted so far.
    pub accepted: Arc<AtomicUsize>,
    /// Connections currently open.
    pub open: Arc<AtomicUsize>,
    /// Highest number of simultaneously open connections.
    pub peak_open: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockS3 {
    pub async fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicUsize::new(0));
        let open = Arc::new(AtomicUsize::new(0));
        let peak_open = Arc::new(AtomicUsize::new(0));

        let task = {
            let requests = Arc::clone(&requests);
            let accepted = Arc::clone(&accepted);
            let open = Arc::clone(&open);
            let peak_open = Arc::clone(&peak_open);
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    let index = accepted.fetch_add(1, Ordering::SeqCst);
                    let now_open = open.fetch_add(1, Ordering::SeqCst) + 1;
                    peak_open.fetch_max(now_open, Ordering::SeqCst);

                    let behavior = behavior.clone();
                    let requests = Arc::clone(&requests);
                    let open = Arc::clone(&open);
                    tokio::spawn(async move {
                        serve_connection(socket, index, behavior, requests).await;
                        open.fetch_sub(1, Ordering::SeqCst);
                    });
                }
            })
        };

        Self {
            addr,
            requests,
            accepted,
            open,
            peak_open,
            task,
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Drop for MockS3 {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_connection(
    mut socket: TcpStream,
    index: usize,
    behavior: Behavior,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
) {
    let mut buffer = Vec::new();
    loop {
        let Some(request) = read_request(&mut socket, &mut buffer, index).await else {
            return;
        };
        let method = request.method.clone();
        requests.lock().unwrap().push(request);

        let keep_open = match &behavior {
            Behavior::Respond { status, body } => respond(&mut socket, *status, body, &method).await,
            Behavior::ResetFirst { count, body } => {
                if index < *count {
                    return;
                }
                respond(&mut socket, 200, body, &method).await
            }
            Behavior::Stream { total, chunk, pause } => {
                stream_body(&mut socket, *total, *chunk, *pause).await
            }
            Behavior::Truncate { total, sent } => {
                let head = format!("HTTP/1.1 200 OK\r\nContent-Length: {total}\r\n\r\n");
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&vec![b'x'; *sent]).await;
                let _ = socket.flush().await;
                return;
            }
            Behavior::Slow { delay, body } => {
                tokio::time::sleep(*delay).await;
                respond(&mut socket, 200, body, &method).await
            }
        };
        if !keep_open {
            return;
        }
    }
}

/// Read one request (head + Content-Length body). `None` on EOF or error.
async fn read_request(socket: &mut TcpStream, buffer: &mut Vec<u8>, connection: usize) -> Option<RecordedRequest> {
    let head_end = loop {
        if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let mut chunk = [0u8; 8192];
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buffer[..head_end]).to_string();
    buffer.drain(..head_end + 4);

    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split(' ');
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect();

    let length = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    while buffer.len() < length {
        let mut chunk = [0u8; 65536];
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
    let body = buffer.drain(..length).collect();

    Some(RecordedRequest {
        method,
        target,
        headers,
        body,
        connection,
    })
}

async fn respond(socket: &mut TcpStream, status: u16, body: &[u8], method: &str) -> bool {
    let reason = match status {
        200 => "OK",
        204 => "No Content",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Slow Down",
        _ => "Unknown",
    };
    let head = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nX-Amz-Request-Id: MOCK\r\nContent-Type: application/octet-stream\r\n\r\n",
        body.len()
    );
    if socket.write_all(head.as_bytes()).await.is_err() {
        return false;
    }
    if method != "HEAD" && socket.write_all(body).await.is_err() {
        return false;
    }
    socket.flush().await.is_ok()
}

async fn stream_body(socket: &mut TcpStream, total: usize, chunk: usize, pause: Duration) -> bool {
    let head = format!("HTTP/1.1 200 OK\r\nContent-Length: {total}\r\nETag: \"mock\"\r\n\r\n");
    if socket.write_all(head.as_bytes()).await.is_err() {
        return false;
    }
    let piece = vec![b's'; chunk];
    let mut written = 0;
    while written < total {
        let n = chunk.min(total - written);
        if socket.write_all(&piece[..n]).await.is_err() {
            return false;
        }
        written += n;
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }
    socket.flush().await.is_ok()
}

/// Configuration pointing at `backend` over plain HTTP, path-style, with
/// short retry delays.
pub fn gateway_config(backend: SocketAddr) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.upstream.host = backend.ip().to_string();
    config.upstream.port = Some(backend.port());
    config.upstream.scheme = "http".into();
    config.retries.base_delay_ms = 10;
    config.retries.max_delay_ms = 100;
    config.timeouts.request_deadline_ms = 2_000;
    config.timeouts.shutdown_grace_secs = 1;
    config
}

/// A gateway serving on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub gateway: Arc<Gateway>,
    pub shutdown: Shutdown,
    task: JoinHandle<()>,
}

impl TestGateway {
    pub async fn start(config: GatewayConfig) -> Self {
        let server = HttpServer::new(config).unwrap();
        let gateway = server.gateway();
        let listener = Listener::bind(&server.config().listener).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let shutdown = Shutdown::new();
        let shutdown_rx = shutdown.subscribe();
        let task = tokio::spawn(async move {
            server.run(listener, shutdown_rx).await.unwrap();
        });

        Self {
            addr,
            gateway,
            shutdown,
            task,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Checked-out upstream slots across all pools.
    pub fn in_use(&self) -> usize {
        self.gateway.dispatcher().in_use()
    }

    /// Poll until no upstream slot is checked out, or `timeout` passes.
    pub async fn wait_idle(&self, timeout: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let in_use = self.in_use();
            if in_use == 0 || tokio::time::Instant::now() >= deadline {
                return in_use;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.task).await;
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Byte every position of chunk `index` of a paced upload carries.
pub fn upload_byte(index: usize) -> u8 {
    (index % 251) as u8
}

/// A streamed request body of `chunks` pieces of `chunk` bytes, each sent
/// after `pause`. Set Content-Length yourself to avoid chunked encoding.
pub fn paced_body(chunks: usize, chunk: usize, pause: Duration) -> reqwest::Body {
    let stream = futures_util::stream::iter(0..chunks).then(move |index| async move {
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        Ok::<_, std::io::Error>(vec![upload_byte(index); chunk])
    });
    reqwest::Body::wrap_stream(stream)
}
