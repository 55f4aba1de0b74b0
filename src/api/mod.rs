//! HTTP control surface for a capture session.
//!
//! A small blocking HTTP/1.1 server on a background thread. Connections are
//! handled one at a time and every session access goes through the session
//! mutex, so ticks, reconfiguration and exports never interleave.
//!
//! Routes:
//! - `GET  /health`    liveness
//! - `POST /start`     configure (JSON capture parameters)
//! - `POST /stop`      end the run, keep the canvas
//! - `POST /reset`     discard the canvas
//! - `POST /stream`    one capture tick; body is `{"frame": "<data url>"}` or a
//!                     raw encoded JPEG/PNG frame
//! - `GET  /image`     preview PNG (size-clamped)
//! - `GET  /state`     session diagnostics
//! - `POST /save_png`  full-resolution PNG download
//! - `POST /save_pdf`  grayscale A4 PDF download

use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::borrow::Cow;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::export::{encode_pdf, encode_png, export_file_name, render_preview, PreviewBounds};
use crate::frame::decode_data_url;
use crate::session::{lock_session, CaptureParams, SharedSession, TickError, TickOutcome};

const MAX_HEADER_BYTES: usize = 8192;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_body_bytes: usize,
    pub preview: PreviewBounds,
    /// Defaults for capture fields a `/start` request leaves out.
    pub capture_defaults: CaptureParams,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".to_string(),
            max_body_bytes: 8 * 1024 * 1024,
            preview: PreviewBounds::default(),
            capture_defaults: CaptureParams::default(),
        }
    }
}

impl From<&crate::config::LinecamConfig> for ApiConfig {
    fn from(cfg: &crate::config::LinecamConfig) -> Self {
        Self {
            addr: cfg.api_addr.clone(),
            max_body_bytes: cfg.max_body_bytes,
            preview: cfg.preview,
            capture_defaults: cfg.capture.clone(),
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
    session: SharedSession,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, session: SharedSession) -> Self {
        Self { cfg, session }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg;
        let session = self.session;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, &cfg, &session, shutdown_thread) {
                log::error!("control api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: &ApiConfig,
    session: &SharedSession,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, cfg, session) {
                    log::warn!("control api request failed: {:#}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(10));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(
    mut stream: TcpStream,
    cfg: &ApiConfig,
    session: &SharedSession,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, &json!({"error": "forbidden"}))?;
        return Ok(());
    }

    let request = match read_request(&mut stream, cfg.max_body_bytes) {
        Ok(request) => request,
        Err(RequestError::TooLarge) => {
            write_json_response(&mut stream, 413, &json!({"error": "payload_too_large"}))?;
            return Ok(());
        }
        Err(RequestError::Malformed(err)) => {
            write_json_response(&mut stream, 400, &json!({"error": "bad_request"}))?;
            return Err(err);
        }
    };

    let expected_method = match request.path.as_str() {
        "/health" | "/image" | "/state" => "GET",
        "/start" | "/stop" | "/reset" | "/stream" | "/save_png" | "/save_pdf" => "POST",
        _ => {
            write_json_response(&mut stream, 404, &json!({"error": "not_found"}))?;
            return Ok(());
        }
    };
    if request.method != expected_method {
        write_json_response(&mut stream, 405, &json!({"error": "method_not_allowed"}))?;
        return Ok(());
    }

    match route(&request, cfg, session) {
        Ok(response) => write_response(
            &mut stream,
            response.status,
            response.content_type,
            &response.body,
            response.attachment.as_deref(),
        ),
        Err(err) => {
            write_json_response(&mut stream, 500, &json!({"error": "internal"}))?;
            Err(err)
        }
    }
}

struct Response {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
    attachment: Option<String>,
}

impl Response {
    fn json(status: u16, value: &Value) -> Result<Self> {
        Ok(Self {
            status,
            content_type: "application/json",
            body: serde_json::to_vec(value)?,
            attachment: None,
        })
    }

    fn bytes(content_type: &'static str, body: Vec<u8>, attachment: Option<String>) -> Self {
        Self {
            status: 200,
            content_type,
            body,
            attachment,
        }
    }
}

fn route(request: &HttpRequest, cfg: &ApiConfig, session: &SharedSession) -> Result<Response> {
    match request.path.as_str() {
        "/health" => Response::json(200, &json!({"status": "ok"})),
        "/start" => {
            let params = match merge_capture_params(&cfg.capture_defaults, &request.body) {
                Ok(params) => params,
                Err(err) => {
                    log::warn!("rejected start request: {:#}", err);
                    return Response::json(400, &json!({"error": "invalid_params"}));
                }
            };
            let mut session = lock_session(session)?;
            let accepted = session.configure(&params).to_params();
            Response::json(
                200,
                &json!({
                    "ok": 1,
                    "mode": accepted.mode,
                    "pos": accepted.pos,
                    "stripe": accepted.stripe,
                    "downscale": accepted.down,
                    "rotate": accepted.rotate,
                    "color": accepted.color,
                }),
            )
        }
        "/stop" => {
            lock_session(session)?.stop();
            Response::json(200, &json!({"ok": 1}))
        }
        "/reset" => {
            lock_session(session)?.reset();
            Response::json(200, &json!({"ok": 1}))
        }
        "/stream" => {
            let encoded = match stream_frame_bytes(request) {
                Ok(Some(encoded)) => encoded,
                Ok(None) => return Response::json(422, &json!({"error": "decode_failed"})),
                Err(err) => {
                    log::warn!("rejected stream request: {:#}", err);
                    return Response::json(400, &json!({"error": "invalid_payload"}));
                }
            };
            let outcome = lock_session(session)?.process_encoded(&encoded);
            stream_response(outcome)
        }
        "/state" => {
            let session = lock_session(session)?;
            let canvas = session.canvas();
            Response::json(
                200,
                &json!({
                    "state": session.state().as_str(),
                    "scan_len": canvas.scan_len(),
                    "orthogonal_len": canvas.orthogonal_len(),
                    "channels": canvas.channels(),
                }),
            )
        }
        "/image" => {
            // copy under the lock, encode outside it
            let snapshot = lock_session(session)?.snapshot();
            let preview = render_preview(snapshot, cfg.preview)?;
            Ok(Response::bytes("image/png", encode_png(&preview)?, None))
        }
        "/save_png" | "/save_pdf" => {
            let Some(snapshot) = lock_session(session)?.snapshot() else {
                return Response::json(400, &json!({"error": "empty"}));
            };
            if request.path == "/save_png" {
                let body = encode_png(&snapshot)?;
                Ok(Response::bytes("image/png", body, Some(export_file_name("png"))))
            } else {
                let body = encode_pdf(&snapshot)?;
                Ok(Response::bytes("application/pdf", body, Some(export_file_name("pdf"))))
            }
        }
        _ => Response::json(404, &json!({"error": "not_found"})),
    }
}

#[derive(Deserialize)]
struct StreamRequest {
    frame: String,
}

/// Encoded frame bytes of a `/stream` body.
///
/// JSON bodies carry the frame as a data URL; anything else is taken as the
/// encoded image itself. `Ok(None)` means the envelope was fine but its frame
/// payload could not be decoded.
fn stream_frame_bytes(request: &HttpRequest) -> Result<Option<Cow<'_, [u8]>>> {
    let is_json = request
        .content_type
        .as_deref()
        .map(|ct| ct.to_ascii_lowercase().starts_with("application/json"))
        .unwrap_or(false)
        || request.body.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'{');
    if !is_json {
        return Ok(Some(Cow::Borrowed(&request.body)));
    }
    let envelope: StreamRequest = serde_json::from_slice(&request.body)?;
    match decode_data_url(&envelope.frame) {
        Ok(bytes) => Ok(Some(Cow::Owned(bytes))),
        Err(err) => {
            log::warn!("capture tick dropped: {:#}", err);
            Ok(None)
        }
    }
}

fn stream_response(outcome: std::result::Result<TickOutcome, TickError>) -> Result<Response> {
    match outcome {
        Ok(outcome) => Response::json(
            200,
            &json!({"ok": 1, "running": 1, "pixels": outcome.appended_pixels}),
        ),
        Err(TickError::Dropped(_)) => Response::json(422, &json!({"error": "decode_failed"})),
        Err(TickError::CanvasReset(err)) => Response::json(
            500,
            &json!({"error": "canvas_reset", "detail": format!("{:#}", err)}),
        ),
    }
}

/// Overlay the request's JSON fields on the configured capture defaults.
fn merge_capture_params(defaults: &CaptureParams, body: &[u8]) -> Result<CaptureParams> {
    let mut merged = serde_json::to_value(defaults)?;
    if !body.iter().all(u8::is_ascii_whitespace) {
        let overrides: Value = serde_json::from_slice(body)?;
        let Value::Object(fields) = overrides else {
            return Err(anyhow!("start request body must be a JSON object"));
        };
        if let Value::Object(base) = &mut merged {
            base.extend(fields);
        }
    }
    Ok(serde_json::from_value(merged)?)
}

enum RequestError {
    TooLarge,
    Malformed(anyhow::Error),
}

impl From<anyhow::Error> for RequestError {
    fn from(err: anyhow::Error) -> Self {
        Self::Malformed(err)
    }
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        Self::Malformed(err.into())
    }
}

fn read_request(
    stream: &mut TcpStream,
    max_body_bytes: usize,
) -> std::result::Result<HttpRequest, RequestError> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut buf = [0u8; 8192];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(RequestError::TooLarge);
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of headers").into());
        }
        data.extend_from_slice(&buf[..n]);
    };

    let text = String::from_utf8_lossy(&data[..header_end]);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length '{}'", value))?,
        None => 0,
    };
    if content_length > max_body_bytes {
        return Err(RequestError::TooLarge);
    }

    let mut body = data[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!(
                "body truncated: expected {} bytes, got {}",
                content_length,
                body.len()
            )
            .into());
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        content_type: headers.remove("content-type"),
        body,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &Value) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, "application/json", &payload, None)
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
    attachment: Option<&str>,
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        422 => "HTTP/1.1 422 Unprocessable Entity",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let disposition = attachment
        .map(|name| format!("Content-Disposition: attachment; filename=\"{name}\"\r\n"))
        .unwrap_or_default();
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\n\
         Cache-Control: no-store, no-cache, must-revalidate, max-age=0\r\nPragma: no-cache\r\n\
         {disposition}Connection: close\r\n\r\n",
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
    content_type: Option<String>,
    body: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_params_merge_over_defaults() -> Result<()> {
        let defaults = CaptureParams {
            stripe: 7,
            ..CaptureParams::default()
        };
        let params = merge_capture_params(&defaults, br#"{"mode":"horizontal","color":0}"#)?;
        assert_eq!(params.mode, "horizontal");
        assert!(!params.color);
        assert_eq!(params.stripe, 7);

        let params = merge_capture_params(&defaults, b"  ")?;
        assert_eq!(params, defaults);
        Ok(())
    }

    fn stream_request(content_type: Option<&str>, body: &[u8]) -> HttpRequest {
        HttpRequest {
            method: "POST".to_string(),
            path: "/stream".to_string(),
            content_type: content_type.map(str::to_string),
            body: body.to_vec(),
        }
    }

    #[test]
    fn stream_body_accepts_data_url_envelope() -> Result<()> {
        let request = stream_request(
            Some("application/json; charset=utf-8"),
            br#"{"frame":"data:image/jpeg;base64,AAEC"}"#,
        );
        let bytes = stream_frame_bytes(&request)?.expect("decodable payload");
        assert_eq!(bytes.as_ref(), &[0u8, 1, 2]);

        // envelope recognised without a content type
        let request = stream_request(None, br#" {"frame":"AAEC"}"#);
        assert!(stream_frame_bytes(&request)?.is_some());
        Ok(())
    }

    #[test]
    fn stream_body_falls_back_to_raw_bytes() -> Result<()> {
        let request = stream_request(Some("image/jpeg"), &[0xFF, 0xD8, 0xFF]);
        let bytes = stream_frame_bytes(&request)?.expect("raw payload");
        assert_eq!(bytes.as_ref(), &[0xFF, 0xD8, 0xFF]);
        Ok(())
    }

    #[test]
    fn stream_body_rejects_bad_envelopes() -> Result<()> {
        let request = stream_request(Some("application/json"), br#"{"image":"AAEC"}"#);
        assert!(stream_frame_bytes(&request).is_err());
        let request = stream_request(Some("application/json"), b"{not json");
        assert!(stream_frame_bytes(&request).is_err());
        let request = stream_request(Some("application/json"), br#"{"frame":"data:,x"}"#);
        assert!(stream_frame_bytes(&request)?.is_none());
        Ok(())
    }

    #[test]
    fn stream_outcomes_map_to_status() -> Result<()> {
        let ok = stream_response(Ok(TickOutcome { appended_pixels: 30 }))?;
        assert_eq!(ok.status, 200);
        let body: Value = serde_json::from_slice(&ok.body)?;
        assert_eq!(body["pixels"], 30);

        let dropped = stream_response(Err(TickError::Dropped(anyhow!("bad jpeg"))))?;
        assert_eq!(dropped.status, 422);

        let reset = stream_response(Err(TickError::CanvasReset(anyhow!("buffer short"))))?;
        assert_eq!(reset.status, 500);
        let body: Value = serde_json::from_slice(&reset.body)?;
        assert_eq!(body["error"], "canvas_reset");
        assert_eq!(body["detail"], "buffer short");
        Ok(())
    }

    #[test]
    fn start_params_reject_non_objects() {
        let defaults = CaptureParams::default();
        assert!(merge_capture_params(&defaults, b"[1,2]").is_err());
        assert!(merge_capture_params(&defaults, b"{not json").is_err());
        assert!(merge_capture_params(&defaults, br#"{"stripe":"wide"}"#).is_err());
    }
}
