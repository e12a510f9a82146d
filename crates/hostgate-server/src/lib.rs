//! HTTP front end for hostgate.
//!
//! Routes:
//! - `GET /health`
//! - `POST /v1/host/register`: streamed plain-text progress of one registration
//! - `POST /v1/host/unregister`: JSON result of a lock release
//!
//! Every request is handled on its own thread. Registration responses are
//! written straight to the connection with chunked framing, one chunk per
//! line, so that each line reaches the caller as soon as it is produced. The
//! status line is held back until the gateway commits; failures before that
//! point get their own status code.
//!
//! The [`TestServer`] helper starts a server on a random port for integration testing.

use hostgate_core::{ErrorKind, Gateway, ProgressSink};
use hostgate_runtime::LineSink;
use hostgate_schema::{RegistrationRequest, UnregisterRequest};
use std::io::{self, Read, Write};
use std::sync::Arc;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};
use tracing::{debug, error, info, warn};

/// Request bodies beyond this are cut off and fail to parse.
pub const MAX_BODY: u64 = 1 << 20;

const STREAM_HEAD: &str = "HTTP/1.1 200 OK\r\n\
    Content-Type: text/plain; charset=utf-8\r\n\
    X-Content-Type-Options: nosniff\r\n\
    Transfer-Encoding: chunked\r\n\
    Connection: close\r\n\
    \r\n";

/// HTTP status for a failure that happened before the response was committed.
pub fn status_for(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::Client => 400,
        ErrorKind::NotFound => 404,
        ErrorKind::Conflict => 409,
        ErrorKind::PreconditionFailed => 412,
        ErrorKind::Timeout => 504,
        ErrorKind::Store
        | ErrorKind::Execution
        | ErrorKind::Io
        | ErrorKind::Disconnected
        | ErrorKind::Internal => 500,
    }
}

/// One line as one chunk, newline included.
fn write_chunk<W: Write + ?Sized>(w: &mut W, line: &str) -> io::Result<()> {
    write!(w, "{:X}\r\n{line}\n\r\n", line.len() + 1)?;
    w.flush()
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "response already closed")
}

enum Phase {
    /// Nothing sent yet; lines are buffered.
    Pending { request: Request, lines: Vec<String> },
    Streaming(Box<dyn Write + Send>),
    Closed,
}

/// A plain-text response whose status is decided late.
pub struct StreamResponse {
    phase: Phase,
}

impl StreamResponse {
    pub fn new(request: Request) -> Self {
        Self {
            phase: Phase::Pending {
                request,
                lines: Vec::new(),
            },
        }
    }

    pub fn is_committed(&self) -> bool {
        !matches!(self.phase, Phase::Pending { .. })
    }

    /// Complete a successful response.
    pub fn finish(mut self) -> io::Result<()> {
        self.commit()?;
        match std::mem::replace(&mut self.phase, Phase::Closed) {
            Phase::Streaming(mut w) => {
                w.write_all(b"0\r\n\r\n")?;
                w.flush()
            }
            _ => Err(closed()),
        }
    }

    /// Complete a failed response. Before commit the buffered lines are sent
    /// with `status`; after it the status is already 200 and the stream is
    /// just terminated.
    pub fn fail(mut self, status: u16) -> io::Result<()> {
        match std::mem::replace(&mut self.phase, Phase::Closed) {
            Phase::Pending { request, lines } => {
                let mut body = lines.join("\n");
                body.push('\n');
                request.respond(
                    Response::from_string(body)
                        .with_status_code(StatusCode(status))
                        .with_header(text_plain())
                        .with_header(nosniff()),
                )
            }
            Phase::Streaming(mut w) => {
                w.write_all(b"0\r\n\r\n")?;
                w.flush()
            }
            Phase::Closed => Ok(()),
        }
    }
}

impl LineSink for StreamResponse {
    fn emit(&mut self, line: &str) -> io::Result<()> {
        match &mut self.phase {
            Phase::Pending { lines, .. } => {
                lines.push(line.to_owned());
                Ok(())
            }
            Phase::Streaming(w) => write_chunk(w, line),
            Phase::Closed => Err(closed()),
        }
    }
}

impl ProgressSink for StreamResponse {
    fn commit(&mut self) -> io::Result<()> {
        match std::mem::replace(&mut self.phase, Phase::Closed) {
            Phase::Pending { request, lines } => {
                let mut w = request.into_writer();
                w.write_all(STREAM_HEAD.as_bytes())?;
                for line in &lines {
                    write_chunk(&mut w, line)?;
                }
                w.flush()?;
                self.phase = Phase::Streaming(w);
                Ok(())
            }
            other => {
                self.phase = other;
                Ok(())
            }
        }
    }
}

fn text_plain() -> Header {
    Header::from_bytes("Content-Type", "text/plain; charset=utf-8").expect("valid header")
}

fn nosniff() -> Header {
    Header::from_bytes("X-Content-Type-Options", "nosniff").expect("valid header")
}

fn respond_text(req: Request, code: u16, msg: &str) {
    let _ = req.respond(
        Response::from_string(msg)
            .with_status_code(StatusCode(code))
            .with_header(text_plain()),
    );
}

fn respond_json(req: Request, code: u16, value: &serde_json::Value) {
    let header = Header::from_bytes("Content-Type", "application/json").expect("valid header");
    let _ = req.respond(
        Response::from_string(value.to_string())
            .with_status_code(StatusCode(code))
            .with_header(header),
    );
}

fn read_body(req: &mut Request) -> io::Result<Vec<u8>> {
    let mut body = Vec::new();
    req.as_reader().take(MAX_BODY).read_to_end(&mut body)?;
    Ok(body)
}

fn route_path(url: &str) -> &str {
    url.split_once('?').map_or(url, |(path, _)| path)
}

fn handle_register(gateway: &Gateway, mut req: Request) {
    let body = match read_body(&mut req) {
        Ok(body) => body,
        Err(e) => {
            respond_text(req, 400, &format!("read error: {e}"));
            return;
        }
    };
    let registration = match RegistrationRequest::from_json(&body) {
        Ok(r) => r,
        Err(e) => {
            respond_text(req, 400, &e.to_string());
            return;
        }
    };

    let mut stream = StreamResponse::new(req);
    let delivered = match gateway.register(&registration, &mut stream) {
        Ok(report) => {
            info!(
                "{} registered to group {}, log {}",
                registration.hostname,
                report.group,
                report.log.display()
            );
            stream.finish()
        }
        Err(failure) => {
            let status = if stream.is_committed() {
                200
            } else {
                status_for(failure.error.kind())
            };
            debug!("register {} answered {status}", registration.hostname);
            stream.fail(status)
        }
    };
    if let Err(e) = delivered {
        debug!("response for {} not delivered: {e}", registration.hostname);
    }
}

fn handle_unregister(gateway: &Gateway, mut req: Request) {
    let body = match read_body(&mut req) {
        Ok(body) => body,
        Err(e) => {
            respond_text(req, 400, &format!("read error: {e}"));
            return;
        }
    };
    let unregister = match UnregisterRequest::from_json(&body) {
        Ok(u) => u,
        Err(e) => {
            respond_text(req, 400, &e.to_string());
            return;
        }
    };

    match gateway.unregister(&unregister) {
        Ok(done) => {
            info!("unregistered {} (forced: {})", done.deleted, done.forced);
            respond_json(
                req,
                200,
                &serde_json::json!({ "ok": true, "deleted": done.deleted }),
            );
        }
        Err(e) => {
            let status = status_for(e.kind());
            if status >= 500 {
                error!("unregister {}: {e}", unregister.hostname);
            } else {
                warn!("unregister {} rejected: {e}", unregister.hostname);
            }
            respond_text(req, status, &e.to_string());
        }
    }
}

/// Handle a single HTTP request, dispatching to the appropriate route handler.
pub fn handle_request(gateway: &Gateway, req: Request) {
    let method = req.method().clone();
    let path = route_path(req.url()).to_owned();
    debug!("{method} {path}");

    match (path.as_str(), &method) {
        ("/health", Method::Get | Method::Head) => respond_text(req, 200, "ok"),
        ("/v1/host/register", Method::Post) => handle_register(gateway, req),
        ("/v1/host/unregister", Method::Post) => handle_unregister(gateway, req),
        ("/health" | "/v1/host/register" | "/v1/host/unregister", _) => {
            respond_text(req, 405, "method not allowed");
        }
        _ => respond_text(req, 404, "not found"),
    }
}

/// Accept requests until the server is unblocked, one thread per request.
pub fn serve(server: &Server, gateway: &Arc<Gateway>) {
    for request in server.incoming_requests() {
        let gateway = Arc::clone(gateway);
        let spawned = std::thread::Builder::new()
            .name("hostgate-request".to_owned())
            .spawn(move || handle_request(&gateway, request));
        if let Err(e) = spawned {
            error!("failed to spawn request thread: {e}");
        }
    }
}

/// A test helper that starts a hostgate server on a random port in a background thread.
///
/// The server listens on `127.0.0.1:{port}`. Dropping the `TestServer` stops
/// the accept loop (via `Server::unblock`).
pub struct TestServer {
    pub url: String,
    pub port: u16,
    server: Arc<Server>,
    _handle: std::thread::JoinHandle<()>,
}

impl TestServer {
    /// Start a test server for `gateway`. Binds to `127.0.0.1:0` (random port).
    pub fn start(gateway: Gateway) -> Self {
        let server =
            Arc::new(Server::http("127.0.0.1:0").expect("failed to bind test HTTP server"));
        let port = server.server_addr().to_ip().expect("not an IP addr").port();
        let url = format!("http://127.0.0.1:{port}");

        let gateway = Arc::new(gateway);
        let srv = Arc::clone(&server);
        let handle = std::thread::spawn(move || serve(&srv, &gateway));

        Self {
            url,
            port,
            server,
            _handle: handle,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.unblock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_per_error_kind() {
        assert_eq!(status_for(ErrorKind::Client), 400);
        assert_eq!(status_for(ErrorKind::NotFound), 404);
        assert_eq!(status_for(ErrorKind::Conflict), 409);
        assert_eq!(status_for(ErrorKind::PreconditionFailed), 412);
        assert_eq!(status_for(ErrorKind::Store), 500);
        assert_eq!(status_for(ErrorKind::Execution), 500);
        assert_eq!(status_for(ErrorKind::Io), 500);
        assert_eq!(status_for(ErrorKind::Timeout), 504);
    }

    #[test]
    fn chunk_carries_line_and_newline() {
        let mut out = Vec::new();
        write_chunk(&mut out, "[OUT] ok").unwrap();
        assert_eq!(out, b"9\r\n[OUT] ok\n\r\n");
    }

    #[test]
    fn chunk_size_is_hex_bytes() {
        let mut out = Vec::new();
        let line = "é".repeat(10);
        write_chunk(&mut out, &line).unwrap();
        assert!(out.starts_with(b"15\r\n"));
    }

    #[test]
    fn query_string_is_ignored_for_routing() {
        assert_eq!(route_path("/health?probe=1"), "/health");
        assert_eq!(route_path("/v1/host/register"), "/v1/host/register");
    }

    #[test]
    fn stream_head_ends_headers() {
        assert!(STREAM_HEAD.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(STREAM_HEAD.contains("Transfer-Encoding: chunked\r\n"));
        assert!(STREAM_HEAD.ends_with("\r\n\r\n"));
    }
}
