//! Response serialization.
//!
//! # Design Decisions
//! - Framing headers (`Content-Length`, `Transfer-Encoding`, `Connection`)
//!   are always written by the encoder; application values are dropped
//! - 1xx, 204 and 304 responses carry neither a body nor `Content-Length`
//! - An answer to `HEAD` keeps its `Content-Length` but never its body

use bytes::{BufMut, Bytes, BytesMut};
use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use http::{HeaderValue, Response, StatusCode};

/// Serialize `response` as an HTTP/1.1 message.
///
/// `close` adds `Connection: close`, announcing that nothing follows.
pub fn encode_response(response: &Response<Bytes>, close: bool) -> Bytes {
    encode(response, close, true)
}

/// Serialize the answer to a `HEAD` request: the headers a `GET` would
/// get, without the body.
pub fn encode_head_response(response: &Response<Bytes>, close: bool) -> Bytes {
    encode(response, close, false)
}

fn encode(response: &Response<Bytes>, close: bool, send_body: bool) -> Bytes {
    let status = response.status();
    let body_allowed = !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED);
    let body: &[u8] = if body_allowed && send_body { response.body() } else { &[] };

    let mut out = BytesMut::with_capacity(128 + body.len());
    out.put_slice(b"HTTP/1.1 ");
    out.put_slice(status.as_str().as_bytes());
    out.put_u8(b' ');
    out.put_slice(status.canonical_reason().unwrap_or("").as_bytes());
    out.put_slice(b"\r\n");

    for (name, value) in response.headers() {
        if name == CONTENT_LENGTH || name == TRANSFER_ENCODING || name == CONNECTION {
            continue;
        }
        put_header(&mut out, name.as_str(), value.as_bytes());
    }
    if body_allowed {
        put_header(&mut out, "content-length", response.body().len().to_string().as_bytes());
    }
    if close && !status.is_informational() {
        put_header(&mut out, "connection", b"close");
    }
    out.put_slice(b"\r\n");
    out.put_slice(body);
    out.freeze()
}

fn put_header(out: &mut BytesMut, name: &str, value: &[u8]) {
    out.put_slice(name.as_bytes());
    out.put_slice(b": ");
    out.put_slice(value);
    out.put_slice(b"\r\n");
}

/// `400 Bad Request` sent when a request cannot be framed.
pub fn bad_request(reason: &str) -> Response<Bytes> {
    let mut response = Response::new(Bytes::from(format!("{reason}\n")));
    *response.status_mut() = StatusCode::BAD_REQUEST;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}
