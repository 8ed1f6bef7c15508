use std::io::{Cursor, Read};
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::serve::multipart;
use crate::serve::predictor::Predictor;

/// Uploads larger than this are refused with 413.
pub const MAX_BODY_BYTES: u64 = 10 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Replies
// ---------------------------------------------------------------------------

/// Status and JSON body of a response, kept apart from tiny_http so routing
/// can be exercised without a socket.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub body: String,
}

impl Reply {
    fn json<T: Serialize>(status: u16, value: &T) -> Reply {
        match serde_json::to_string(value) {
            Ok(body) => Reply { status, body },
            Err(e) => Reply::error(500, &e.to_string()),
        }
    }

    fn error(status: u16, message: &str) -> Reply {
        Reply { status, body: json!({ "error": message }).to_string() }
    }

    fn into_response(self) -> Response<Cursor<Vec<u8>>> {
        let bytes = self.body.into_bytes();
        let len = bytes.len();
        let headers = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
            .ok()
            .into_iter()
            .collect();
        Response::new(StatusCode(self.status), headers, Cursor::new(bytes), Some(len), None)
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Maps one request onto the predictor.
///
/// `POST /predict` takes either a multipart form with a file field or the raw
/// image bytes as the body.
pub fn route(
    method: &Method,
    path: &str,
    content_type: Option<&str>,
    body: &[u8],
    predictor: &Predictor,
) -> Reply {
    let path = path.split('?').next().unwrap_or(path);
    match (method, path) {
        (Method::Get, "/health") => Reply::json(200, &json!({ "status": "ok" })),
        (Method::Get, "/classes") => Reply::json(
            200,
            &json!({
                "classes": predictor.classes().names(),
                "tie_class": predictor.tie_class(),
            }),
        ),
        (Method::Post, "/predict") => predict(content_type, body, predictor),
        _ => Reply::error(404, "not found"),
    }
}

fn predict(content_type: Option<&str>, body: &[u8], predictor: &Predictor) -> Reply {
    let image = match content_type.and_then(multipart::extract_boundary) {
        Some(boundary) => match multipart::extract_file(body, &boundary) {
            Some(bytes) => bytes,
            None => return Reply::error(400, "multipart body has no file part"),
        },
        None => body.to_vec(),
    };
    if image.is_empty() {
        return Reply::error(400, "empty image");
    }

    match predictor.predict(&image) {
        Ok(prediction) => {
            debug!(verdict = %prediction.verdict, "prediction");
            Reply::json(200, &prediction)
        }
        Err(e @ Error::Image(_)) => Reply::error(400, &e.to_string()),
        Err(e) => {
            warn!(error = %e, "prediction failed");
            Reply::error(500, &e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

fn handle(mut request: Request, predictor: &Predictor) {
    let method = request.method().clone();
    let url = request.url().to_owned();
    let content_type = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Content-Type"))
        .map(|h| h.value.as_str().to_owned());

    let mut body = Vec::new();
    let read = request.as_reader().take(MAX_BODY_BYTES + 1).read_to_end(&mut body);
    let reply = match read {
        Err(e) => Reply::error(400, &format!("could not read request body: {}", e)),
        Ok(_) if body.len() as u64 > MAX_BODY_BYTES => Reply::error(413, "request body too large"),
        Ok(_) => route(&method, &url, content_type.as_deref(), &body, predictor),
    };

    debug!(%method, %url, status = reply.status, "request");
    if let Err(e) = request.respond(reply.into_response()) {
        warn!(error = %e, "failed to send response");
    }
}

/// Binds `addr` and answers requests until the process exits, one thread
/// per request.
pub fn serve(predictor: Predictor, addr: &str) -> Result<()> {
    let server = Server::http(addr).map_err(|e| Error::Server(format!("failed to bind {}: {}", addr, e)))?;
    info!("Serving on http://{}", addr);

    let predictor = Arc::new(predictor);
    for request in server.incoming_requests() {
        let predictor = Arc::clone(&predictor);
        std::thread::spawn(move || handle(request, &predictor));
    }
    Ok(())
}
