//! In-process API server stand-in for adapter tests.

use http::{Method, Request, Response, StatusCode};
use kube::Client;
use kube::client::Body;
use serde_json::Value;
use tower_test::mock::{self, Handle};

pub type ApiHandle = Handle<Request<Body>, Response<Body>>;

/// A request as seen by the API server.
#[derive(Debug)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub body: Value,
}

/// Client wired to a mock service; answer its requests through the handle.
pub fn client() -> (Client, ApiHandle) {
    let (service, handle) = mock::pair::<Request<Body>, Response<Body>>();
    (Client::new(service, "default"), handle)
}

/// Answer the next request with `status` and a JSON `body`.
pub async fn respond(handle: &mut ApiHandle, status: u16, body: Value) -> Recorded {
    let (request, send) = handle.next_request().await.expect("no request received");
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let bytes = request.into_body().collect_bytes().await.unwrap();
    let body_sent = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };

    let response = Response::builder()
        .status(StatusCode::from_u16(status).unwrap())
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    send.send_response(response);

    Recorded {
        method,
        path,
        body: body_sent,
    }
}

/// `metav1.Status` body the API server returns with errors.
pub fn status_error(code: u16, reason: &str) -> Value {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": reason,
        "reason": reason,
        "code": code,
    })
}
