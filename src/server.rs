//! Minimal HTTP transport for the live stream and alert feed.
//!
//! Routes:
//! - `GET /video_feed`: `multipart/x-mixed-replace; boundary=frame`, one JPEG
//!   part per chunk. One session per request; the device is released when the
//!   client goes away.
//! - `GET /alerts`: `text/event-stream`, one `event: fall_alert` per alert.
//! - `GET /health`: JSON status.
//!
//! One thread per connection. The pipeline is shared behind a `Mutex` taken
//! with `try_lock`, so a second concurrent `/video_feed` gets 503 instead of
//! queueing behind the first.

use anyhow::{anyhow, Result};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Mutex, TryLockError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::alert::{AlertHub, FALL_ALERT_EVENT};
use crate::ingest::FrameSource;
use crate::pipeline::StreamPipeline;
use crate::PipelineError;

const MAX_REQUEST_BYTES: usize = 8192;
const ALERT_POLL_INTERVAL: Duration = Duration::from_millis(250);
const ALERT_KEEPALIVE: Duration = Duration::from_secs(15);
const CLIENT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

pub const MULTIPART_BOUNDARY: &str = "frame";

/// Opens a fresh source for each `/video_feed` request.
pub type SourceFactory =
    Arc<dyn Fn() -> Result<Box<dyn FrameSource>, PipelineError> + Send + Sync>;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: String,
    /// Shown in `/health`.
    pub source_label: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8780".to_string(),
            source_label: "stub://camera".to_string(),
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
            join.join()
                .map_err(|_| anyhow!("stream server thread panicked"))?;
        }
        Ok(())
    }
}

struct ServerContext {
    pipeline: Mutex<StreamPipeline>,
    backend: &'static str,
    hub: AlertHub,
    source_factory: SourceFactory,
    source_label: String,
    shutdown: Arc<AtomicBool>,
}

pub struct StreamServer {
    cfg: ServerConfig,
    pipeline: StreamPipeline,
    hub: AlertHub,
    source_factory: SourceFactory,
}

impl StreamServer {
    /// `hub` must be the hub (or a clone of it) the pipeline's sink publishes to.
    pub fn new(
        cfg: ServerConfig,
        pipeline: StreamPipeline,
        hub: AlertHub,
        source_factory: SourceFactory,
    ) -> Self {
        Self {
            cfg,
            pipeline,
            hub,
            source_factory,
        }
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "server configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let ctx = Arc::new(ServerContext {
            backend: self.pipeline.classifier_name(),
            pipeline: Mutex::new(self.pipeline),
            hub: self.hub,
            source_factory: self.source_factory,
            source_label: self.cfg.source_label,
            shutdown: shutdown.clone(),
        });
        let join = std::thread::spawn(move || {
            if let Err(err) = run_server(listener, ctx) {
                log::error!("stream server stopped: {}", err);
            }
        });
        log::info!("stream server listening on http://{}", addr);

        Ok(ServerHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_server(listener: TcpListener, ctx: Arc<ServerContext>) -> Result<()> {
    loop {
        if ctx.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                let ctx = ctx.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &ctx) {
                        log::warn!("request failed: {}", err);
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

fn handle_connection(mut stream: TcpStream, ctx: &ServerContext) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(());
    }

    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }
    log::debug!("{} {} from {}", request.method, request.path, peer);
    match request.path.as_str() {
        "/health" => serve_health(&mut stream, ctx),
        "/video_feed" => serve_video(&mut stream, ctx),
        "/alerts" => serve_alerts(&mut stream, ctx),
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

fn serve_health(stream: &mut TcpStream, ctx: &ServerContext) -> Result<()> {
    let streaming = matches!(ctx.pipeline.try_lock(), Err(TryLockError::WouldBlock));
    let body = serde_json::json!({
        "status": "ok",
        "streaming": streaming,
        "backend": ctx.backend,
        "source": ctx.source_label,
        "alert_listeners": ctx.hub.listener_count(),
    });
    write_response(stream, 200, "application/json", body.to_string().as_bytes())
}

fn serve_video(stream: &mut TcpStream, ctx: &ServerContext) -> Result<()> {
    let mut pipeline = match ctx.pipeline.try_lock() {
        Ok(pipeline) => pipeline,
        Err(TryLockError::WouldBlock) => {
            return write_json_response(stream, 503, r#"{"error":"stream_busy"}"#);
        }
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
    };
    let live = match (ctx.source_factory)() {
        Ok(source) => pipeline.stream(source),
        Err(err) => Err(err),
    };
    let mut live = match live {
        Ok(live) => live,
        Err(err) => {
            log::warn!("video feed refused: {}", err);
            let body = serde_json::json!({ "error": err.to_string() });
            return write_response(stream, 503, "application/json", body.to_string().as_bytes());
        }
    };

    stream.set_write_timeout(Some(CLIENT_WRITE_TIMEOUT))?;
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        MULTIPART_BOUNDARY
    );
    let cancel = live.cancel_handle();
    if stream.write_all(header.as_bytes()).is_ok() {
        for chunk in live.by_ref() {
            if ctx.shutdown.load(Ordering::SeqCst) {
                cancel.cancel();
                break;
            }
            if let Err(err) = write_part(stream, &chunk.jpeg) {
                log::info!("video client disconnected: {}", err);
                break;
            }
        }
    }
    let report = live.close();
    log::info!(
        "video feed ended: {} ({} chunks, {} alerts)",
        report.state,
        report.stats.yielded,
        report.stats.alerts
    );
    Ok(())
}

fn write_part(stream: &mut TcpStream, jpeg: &[u8]) -> std::io::Result<()> {
    let part_header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        MULTIPART_BOUNDARY,
        jpeg.len()
    );
    stream.write_all(part_header.as_bytes())?;
    stream.write_all(jpeg)?;
    stream.write_all(b"\r\n")?;
    stream.flush()
}

fn serve_alerts(stream: &mut TcpStream, ctx: &ServerContext) -> Result<()> {
    let subscription = ctx.hub.subscribe();
    stream.set_write_timeout(Some(CLIENT_WRITE_TIMEOUT))?;
    stream.write_all(
        b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
    )?;
    stream.flush()?;

    let mut last_write = Instant::now();
    while !ctx.shutdown.load(Ordering::SeqCst) {
        if client_closed(stream) {
            log::debug!("alert listener disconnected");
            break;
        }
        let message = match subscription.recv_timeout(ALERT_POLL_INTERVAL) {
            Ok(alert) => format!("event: {}\ndata: {}\n\n", FALL_ALERT_EVENT, alert.to_json()),
            Err(RecvTimeoutError::Timeout) if last_write.elapsed() >= ALERT_KEEPALIVE => {
                ": keepalive\n\n".to_string()
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if let Err(err) = stream
            .write_all(message.as_bytes())
            .and_then(|_| stream.flush())
        {
            log::debug!("alert listener disconnected: {}", err);
            break;
        }
        last_write = Instant::now();
    }
    Ok(())
}

/// True once the peer has shut down its side. SSE clients never send after
/// the request, so any readable EOF or socket error means they left.
fn client_closed(stream: &TcpStream) -> bool {
    if stream.set_nonblocking(true).is_err() {
        return true;
    }
    let mut byte = [0u8; 1];
    let closed = match stream.peek(&mut byte) {
        Ok(0) => true,
        Ok(_) => false,
        Err(err) => !matches!(
            err.kind(),
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
        ),
    };
    closed || stream.set_nonblocking(false).is_err()
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text.split("\r\n").next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
    })
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
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        503 => "HTTP/1.1 503 Service Unavailable",
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
}
