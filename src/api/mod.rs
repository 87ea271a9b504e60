//! Minimal HTTP surface: the MJPEG feed, an index page and a health check.
//!
//! Plain `std::net`; one accept thread, plus one thread per connection so a
//! slow or idle client only holds up itself.

use anyhow::{anyhow, Context, Result};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::broadcast::{FrameBroadcaster, StreamTick, CONTENT_TYPE};
use crate::pipeline::PipelineStats;

const MAX_REQUEST_BYTES: usize = 8192;
const CLIENT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

const INDEX_HTML: &str = "<!DOCTYPE html>
<html>
<head><title>camwatch</title></head>
<body>
<h1>Live camera feed</h1>
<img src=\"/video_feed\" alt=\"live feed\">
</body>
</html>
";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8000".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stop accepting connections. Open feeds end at their next tick.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    broadcaster: FrameBroadcaster,
    stats: Arc<PipelineStats>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, broadcaster: FrameBroadcaster, stats: Arc<PipelineStats>) -> Self {
        Self {
            cfg,
            broadcaster,
            stats,
        }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid api address '{}'", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("bind api listener on {}", configured_addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let server = Arc::new(self);
        let join = std::thread::Builder::new()
            .name("api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, server, shutdown_thread) {
                    log::error!("http api stopped: {:#}", err);
                }
            })?;

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    server: Arc<ApiServer>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let server = server.clone();
                let shutdown = shutdown.clone();
                let spawned = std::thread::Builder::new()
                    .name(format!("http-{}", peer))
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &server, &shutdown) {
                            log::warn!("http request from {} failed: {:#}", peer, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::warn!("could not spawn handler for {}: {}", peer, err);
                }
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

fn handle_connection(
    mut stream: TcpStream,
    server: &ApiServer,
    shutdown: &AtomicBool,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }
    match request.path.as_str() {
        "/" => write_response(
            &mut stream,
            200,
            "text/html; charset=utf-8",
            INDEX_HTML.as_bytes(),
        ),
        "/health" => {
            let stats = server.stats.snapshot();
            let running = server.broadcaster.is_running();
            let status = if running { "ok" } else { "stopped" };
            let body = serde_json::json!({
                "status": status,
                "running": running,
                "frames_processed": stats.frames_processed,
                "frames_failed": stats.frames_failed,
                "alerts_fired": stats.alerts_fired,
                "last_sequence": stats.last_sequence,
            });
            write_response(&mut stream, 200, "application/json", &serde_json::to_vec(&body)?)
        }
        "/video_feed" => {
            let peer = stream.peer_addr()?;
            log::info!("video feed client connected: {}", peer);
            match stream_feed(stream, &server.broadcaster, shutdown) {
                Ok(sent) => log::info!("video feed {} ended after {} frames", peer, sent),
                Err(err) => log::info!("video feed client {} disconnected: {:#}", peer, err),
            }
            Ok(())
        }
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

/// Push multipart parts until the pipeline stops, the server shuts down or a
/// write fails. Returns the number of parts sent.
fn stream_feed(
    mut stream: TcpStream,
    broadcaster: &FrameBroadcaster,
    shutdown: &AtomicBool,
) -> Result<u64> {
    stream.set_write_timeout(Some(CLIENT_WRITE_TIMEOUT))?;
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nCache-Control: no-store\r\nConnection: close\r\nAccess-Control-Allow-Origin: *\r\n\r\n",
        CONTENT_TYPE
    );
    stream.write_all(header.as_bytes())?;

    let mut frames = broadcaster.subscribe();
    let mut sent = 0u64;
    while !shutdown.load(Ordering::SeqCst) {
        match frames.poll_chunk() {
            StreamTick::Chunk(chunk) => {
                stream.write_all(&chunk)?;
                stream.flush()?;
                sent += 1;
            }
            StreamTick::Idle => continue,
            StreamTick::Closed => break,
        }
    }
    Ok(sent)
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
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nAccess-Control-Allow-Origin: *\r\nConnection: close\r\n\r\n",
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{LatestFrameSlot, RunFlag};

    fn server() -> (ApiHandle, RunFlag) {
        let running = RunFlag::new();
        let broadcaster = FrameBroadcaster::new(Arc::new(LatestFrameSlot::new()), running.clone())
            .with_poll_interval(Duration::from_millis(20));
        let cfg = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
        };
        let handle = ApiServer::new(cfg, broadcaster, Arc::new(PipelineStats::default()))
            .spawn()
            .unwrap();
        (handle, running)
    }

    fn request(addr: SocketAddr, raw: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(raw.as_bytes()).unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    #[test]
    fn health_reports_counters() {
        let (handle, _running) = server();
        let response = request(handle.addr, "GET /health HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("Access-Control-Allow-Origin: *"));
        let body = response.split("\r\n\r\n").nth(1).unwrap();
        let json: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["frames_processed"], 0);
        assert!(json["last_sequence"].is_null());
        handle.stop().unwrap();
    }

    #[test]
    fn index_embeds_the_feed() {
        let (handle, _running) = server();
        let response = request(handle.addr, "GET / HTTP/1.1\r\n\r\n");
        assert!(response.contains("text/html"));
        assert!(response.contains("src=\"/video_feed\""));
        handle.stop().unwrap();
    }

    #[test]
    fn unknown_path_and_wrong_method() {
        let (handle, _running) = server();
        let missing = request(handle.addr, "GET /nope HTTP/1.1\r\n\r\n");
        assert!(missing.starts_with("HTTP/1.1 404"));
        let post = request(handle.addr, "POST /video_feed HTTP/1.1\r\n\r\n");
        assert!(post.starts_with("HTTP/1.1 405"));
        handle.stop().unwrap();
    }

    #[test]
    fn idle_connection_does_not_hold_up_others() {
        let (handle, _running) = server();
        let idle = TcpStream::connect(handle.addr).unwrap();
        std::thread::sleep(Duration::from_millis(100));

        let mut stream = TcpStream::connect(handle.addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(1000)))
            .unwrap();
        let started = std::time::Instant::now();
        stream
            .write_all(b"GET /health HTTP/1.1\r\n\r\n")
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(started.elapsed() < Duration::from_millis(1000));

        drop(idle);
        handle.stop().unwrap();
    }

    #[test]
    fn stopped_pipeline_shows_in_health() {
        let (handle, running) = server();
        running.stop();
        let response = request(handle.addr, "GET /health HTTP/1.1\r\n\r\n");
        assert!(response.contains(r#""status":"stopped""#));
        handle.stop().unwrap();
    }
}
