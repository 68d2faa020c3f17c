use std::io::Cursor;
use std::time::Instant;

use serde::Serialize;
use tiny_http::{Header, Method, Request, Response, StatusCode};
use tracing::{info, warn};

use crate::handlers;
use crate::state::AppState;

pub const HEATMAP_PREFIX: &str = "/static/heatmaps/";

// ---------------------------------------------------------------------------
// Replies
// ---------------------------------------------------------------------------

/// Status, content type and body of a response, kept apart from tiny_http so
/// handlers can be tested without a socket.
#[derive(Debug)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl Reply {
    pub fn text(status: u16, body: &str) -> Reply {
        Reply { status, content_type: "text/plain; charset=utf-8", body: body.as_bytes().to_vec() }
    }

    pub fn json<T: Serialize>(status: u16, value: &T) -> Reply {
        match serde_json::to_vec(value) {
            Ok(body) => Reply { status, content_type: "application/json", body },
            Err(e) => {
                warn!(error = %e, "could not serialize response body");
                Reply::text(500, "Internal Server Error")
            }
        }
    }

    /// `{"error": message}` with the given status.
    pub fn error(status: u16, message: &str) -> Reply {
        Reply::json(status, &ErrorBody { error: message })
    }

    pub fn jpeg(body: Vec<u8>) -> Reply {
        Reply { status: 200, content_type: "image/jpeg", body }
    }

    pub fn not_found() -> Reply {
        Reply::text(404, "404 Not Found")
    }

    pub fn method_not_allowed() -> Reply {
        Reply::text(405, "405 Method Not Allowed")
    }

    pub fn into_response(self) -> Response<Cursor<Vec<u8>>> {
        let len = self.body.len();
        let headers = Header::from_bytes(&b"Content-Type"[..], self.content_type.as_bytes())
            .ok()
            .into_iter()
            .collect();
        Response::new(StatusCode(self.status), headers, Cursor::new(self.body), Some(len), None)
    }
}

// ---------------------------------------------------------------------------
// Request dispatcher
// ---------------------------------------------------------------------------

/// Routes one request, sends the reply and logs the outcome.
pub fn dispatch(mut request: Request, state: &AppState) {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request_path(request.url()).to_owned();

    let reply = route(&mut request, state);

    let status = reply.status;
    if let Err(e) = request.respond(reply.into_response()) {
        warn!(%method, %path, error = %e, "failed to send response");
        return;
    }
    info!(
        %method,
        %path,
        status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
}

/// Picks the handler for a request by method and path (query string ignored).
pub fn route(request: &mut Request, state: &AppState) -> Reply {
    let method = request.method().clone();
    let path = request_path(request.url()).to_owned();

    match (&method, path.as_str()) {
        (Method::Get, "/") => handlers::home::handle(),
        (Method::Post, "/predict") => handlers::predict::handle(request, state),
        (_, "/predict") => Reply::method_not_allowed(),
        (Method::Get, p) if p.starts_with(HEATMAP_PREFIX) => {
            handlers::heatmaps::handle(&p[HEATMAP_PREFIX.len()..], &state.storage)
        }
        _ => Reply::not_found(),
    }
}

fn request_path(url: &str) -> &str {
    url.split_once('?').map_or(url, |(path, _)| path)
}
