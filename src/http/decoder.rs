//! Incremental HTTP/1.1 request decoder.
//!
//! # Responsibilities
//! - Accept request bytes in arbitrary pieces and emit whole requests
//! - Frame bodies by `Content-Length` or `Transfer-Encoding: chunked`
//! - Enforce head and body size limits
//! - Decide whether the connection persists after the request
//!
//! # Design Decisions
//! - The decoder owns partial state (head bytes, body, chunk lines), so the
//!   caller's buffer is always fully consumable and never has to hold a whole
//!   head
//! - `decode` returns as soon as one request completes; bytes after it are
//!   left for the next call so pipelined requests are released one by one
//! - Requests carrying both `Content-Length` and `Transfer-Encoding` are
//!   rejected

use bytes::{Bytes, BytesMut};
use http::header::{CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Uri, Version};

use crate::error::ParseError;

/// Size limits applied while decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderLimits {
    /// Request line plus headers, including the terminating blank line.
    pub max_head_bytes: usize,
    /// Decoded body size.
    pub max_body_bytes: usize,
}

impl Default for DecoderLimits {
    fn default() -> Self {
        Self {
            max_head_bytes: 8192,
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// A complete request and its keep-alive verdict.
#[derive(Debug)]
pub struct DecodedRequest {
    pub request: Request<Bytes>,
    /// The connection may carry another request after this one.
    pub persistent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Head,
    Body { remaining: usize },
    ChunkSize,
    ChunkData { remaining: usize },
    ChunkDataEnd,
    Trailers,
}

#[derive(Debug)]
struct PendingHead {
    parts: http::request::Parts,
    persistent: bool,
}

/// Streaming request decoder. One instance per connection.
#[derive(Debug)]
pub struct RequestDecoder {
    limits: DecoderLimits,
    state: State,
    head_buf: BytesMut,
    line_buf: BytesMut,
    body: BytesMut,
    pending: Option<PendingHead>,
}

impl RequestDecoder {
    pub fn new(limits: DecoderLimits) -> Self {
        Self {
            limits,
            state: State::Head,
            head_buf: BytesMut::new(),
            line_buf: BytesMut::new(),
            body: BytesMut::new(),
            pending: None,
        }
    }

    /// No request is partially decoded.
    pub fn is_between_messages(&self) -> bool {
        self.state == State::Head && self.head_buf.is_empty()
    }

    /// Consume bytes from `input`. Returns how many were consumed and the
    /// request they completed, if any.
    pub fn decode(&mut self, input: &[u8]) -> Result<(usize, Option<DecodedRequest>), ParseError> {
        let mut consumed = 0;
        loop {
            let rest = &input[consumed..];
            match self.state {
                State::Head => {
                    if self.head_buf.is_empty() {
                        // Stray line breaks between messages are ignored.
                        let skip = rest.iter().take_while(|b| matches!(b, b'\r' | b'\n')).count();
                        consumed += skip;
                    }
                    let rest = &input[consumed..];
                    if rest.is_empty() {
                        return Ok((consumed, None));
                    }
                    let previous = self.head_buf.len();
                    let search_from = previous.saturating_sub(3);
                    self.head_buf.extend_from_slice(rest);
                    match find(&self.head_buf[search_from..], b"\r\n\r\n") {
                        Some(pos) => {
                            let end = search_from + pos + 4;
                            if end > self.limits.max_head_bytes {
                                return Err(ParseError::HeadTooLarge {
                                    limit: self.limits.max_head_bytes,
                                });
                            }
                            consumed += end - previous;
                            self.head_buf.truncate(end);
                            let head = self.head_buf.split().freeze();
                            if let Some(done) = self.begin_message(&head)? {
                                return Ok((consumed, Some(done)));
                            }
                        }
                        None => {
                            consumed += rest.len();
                            if self.head_buf.len() > self.limits.max_head_bytes {
                                return Err(ParseError::HeadTooLarge {
                                    limit: self.limits.max_head_bytes,
                                });
                            }
                            return Ok((consumed, None));
                        }
                    }
                }
                State::Body { remaining } => {
                    let n = remaining.min(rest.len());
                    self.body.extend_from_slice(&rest[..n]);
                    consumed += n;
                    if n < remaining {
                        self.state = State::Body { remaining: remaining - n };
                        return Ok((consumed, None));
                    }
                    return Ok((consumed, self.finish_message()));
                }
                State::ChunkSize => {
                    let (used, line) = self.read_line(rest)?;
                    consumed += used;
                    let Some(line) = line else {
                        return Ok((consumed, None));
                    };
                    let size = parse_chunk_size(&line)?;
                    if size == 0 {
                        self.state = State::Trailers;
                    } else {
                        if self.body.len().saturating_add(size) > self.limits.max_body_bytes {
                            return Err(ParseError::BodyTooLarge {
                                limit: self.limits.max_body_bytes,
                            });
                        }
                        self.state = State::ChunkData { remaining: size };
                    }
                }
                State::ChunkData { remaining } => {
                    if rest.is_empty() {
                        return Ok((consumed, None));
                    }
                    let n = remaining.min(rest.len());
                    self.body.extend_from_slice(&rest[..n]);
                    consumed += n;
                    self.state = if n < remaining {
                        State::ChunkData { remaining: remaining - n }
                    } else {
                        State::ChunkDataEnd
                    };
                }
                State::ChunkDataEnd => {
                    let (used, line) = self.read_line(rest)?;
                    consumed += used;
                    match line {
                        None => return Ok((consumed, None)),
                        Some(line) if line.is_empty() => self.state = State::ChunkSize,
                        Some(_) => return Err(ParseError::InvalidChunk),
                    }
                }
                State::Trailers => {
                    let (used, line) = self.read_line(rest)?;
                    consumed += used;
                    match line {
                        None => return Ok((consumed, None)),
                        Some(line) if line.is_empty() => {
                            return Ok((consumed, self.finish_message()));
                        }
                        // Trailer fields are accepted and dropped.
                        Some(_) => {}
                    }
                }
            }
        }
    }

    /// Parse a complete head and pick the body framing. Returns the request
    /// straight away when it has no body.
    fn begin_message(&mut self, head: &[u8]) -> Result<Option<DecodedRequest>, ParseError> {
        let mut lines = head
            .split(|b| *b == b'\n')
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line));

        let request_line = lines.next().ok_or(ParseError::InvalidRequestLine)?;
        let (method, uri, version) = parse_request_line(request_line)?;

        let mut headers = HeaderMap::new();
        for line in lines.filter(|line| !line.is_empty()) {
            let colon = line
                .iter()
                .position(|b| *b == b':')
                .ok_or(ParseError::InvalidHeader)?;
            let name = HeaderName::from_bytes(&line[..colon]).map_err(|_| ParseError::InvalidHeader)?;
            let value = HeaderValue::from_bytes(line[colon + 1..].trim_ascii())
                .map_err(|_| ParseError::InvalidHeader)?;
            headers.append(name, value);
        }

        let persistent = is_persistent(version, &headers);
        let framing = body_framing(&headers, self.limits.max_body_bytes)?;

        let (mut parts, ()) = Request::new(()).into_parts();
        parts.method = method;
        parts.uri = uri;
        parts.version = version;
        parts.headers = headers;
        self.pending = Some(PendingHead { parts, persistent });
        self.body.clear();

        match framing {
            Framing::Chunked => {
                self.state = State::ChunkSize;
                Ok(None)
            }
            Framing::Length(0) => Ok(self.finish_message()),
            Framing::Length(n) => {
                self.state = State::Body { remaining: n };
                Ok(None)
            }
        }
    }

    fn finish_message(&mut self) -> Option<DecodedRequest> {
        self.state = State::Head;
        let head = self.pending.take()?;
        let body = self.body.split().freeze();
        Some(DecodedRequest {
            request: Request::from_parts(head.parts, body),
            persistent: head.persistent,
        })
    }

    /// Accumulate one CRLF-terminated line. Returns bytes consumed and the
    /// line without its terminator once complete.
    fn read_line(&mut self, input: &[u8]) -> Result<(usize, Option<Bytes>), ParseError> {
        match input.iter().position(|b| *b == b'\n') {
            Some(pos) => {
                self.line_buf.extend_from_slice(&input[..pos]);
                if self.line_buf.last() == Some(&b'\r') {
                    self.line_buf.truncate(self.line_buf.len() - 1);
                }
                Ok((pos + 1, Some(self.line_buf.split().freeze())))
            }
            None => {
                self.line_buf.extend_from_slice(input);
                if self.line_buf.len() > self.limits.max_head_bytes {
                    return Err(ParseError::InvalidChunk);
                }
                Ok((input.len(), None))
            }
        }
    }
}

enum Framing {
    Length(usize),
    Chunked,
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_request_line(line: &[u8]) -> Result<(Method, Uri, Version), ParseError> {
    let mut parts = line.split(|b| *b == b' ').filter(|p| !p.is_empty());
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ParseError::InvalidRequestLine);
    };

    let method = Method::from_bytes(method).map_err(|_| ParseError::InvalidRequestLine)?;
    let uri = Uri::try_from(target).map_err(|_| ParseError::InvalidRequestLine)?;
    let version = match version {
        b"HTTP/1.1" => Version::HTTP_11,
        b"HTTP/1.0" => Version::HTTP_10,
        v if v.starts_with(b"HTTP/") => return Err(ParseError::UnsupportedVersion),
        _ => return Err(ParseError::InvalidRequestLine),
    };
    Ok((method, uri, version))
}

fn body_framing(headers: &HeaderMap, max_body: usize) -> Result<Framing, ParseError> {
    let has_length = headers.contains_key(CONTENT_LENGTH);

    if headers.contains_key(TRANSFER_ENCODING) {
        if has_length {
            return Err(ParseError::InvalidHeader);
        }
        let last_coding = headers
            .get_all(TRANSFER_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .last();
        return match last_coding {
            Some(coding) if coding.eq_ignore_ascii_case("chunked") => Ok(Framing::Chunked),
            _ => Err(ParseError::InvalidHeader),
        };
    }

    let mut length: Option<usize> = None;
    for value in headers.get_all(CONTENT_LENGTH) {
        let text = value.to_str().map_err(|_| ParseError::InvalidContentLength)?;
        for item in text.split(',').map(str::trim) {
            if item.is_empty() || !item.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ParseError::InvalidContentLength);
            }
            let n: usize = item.parse().map_err(|_| ParseError::InvalidContentLength)?;
            match length {
                Some(existing) if existing != n => return Err(ParseError::InvalidContentLength),
                _ => length = Some(n),
            }
        }
    }

    let length = length.unwrap_or(0);
    if length > max_body {
        return Err(ParseError::BodyTooLarge { limit: max_body });
    }
    Ok(Framing::Length(length))
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, ParseError> {
    let size = line.split(|b| *b == b';').next().unwrap_or_default().trim_ascii();
    let text = std::str::from_utf8(size).map_err(|_| ParseError::InvalidChunk)?;
    if text.is_empty() {
        return Err(ParseError::InvalidChunk);
    }
    usize::from_str_radix(text, 16).map_err(|_| ParseError::InvalidChunk)
}

/// Whether `token` appears in a comma-separated `Connection` header.
pub(crate) fn has_connection_token(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

fn is_persistent(version: Version, headers: &HeaderMap) -> bool {
    if version == Version::HTTP_10 {
        has_connection_token(headers, "keep-alive")
    } else {
        !has_connection_token(headers, "close")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> RequestDecoder {
        RequestDecoder::new(DecoderLimits::default())
    }

    fn decode_all(decoder: &mut RequestDecoder, mut input: &[u8]) -> Vec<DecodedRequest> {
        let mut out = Vec::new();
        while !input.is_empty() {
            let (used, request) = decoder.decode(input).unwrap();
            input = &input[used..];
            match request {
                Some(r) => out.push(r),
                None => assert!(input.is_empty(), "decoder stalled with input left"),
            }
        }
        out
    }

    #[test]
    fn simple_get() {
        let mut d = decoder();
        let out = decode_all(&mut d, b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n");
        assert_eq!(out.len(), 1);
        let req = &out[0].request;
        assert_eq!(req.method(), Method::GET);
        assert_eq!(req.uri().path(), "/index.html");
        assert_eq!(req.headers()["host"], "example.com");
        assert!(req.body().is_empty());
        assert!(out[0].persistent);
        assert!(d.is_between_messages());
    }

    #[test]
    fn content_length_body_split_across_calls() {
        let mut d = decoder();
        let (used, done) = d.decode(b"POST /a HTTP/1.1\r\nContent-Length: 5\r\n\r\nhe").unwrap();
        assert_eq!(used, 41);
        assert!(done.is_none());
        let (used, done) = d.decode(b"lloGET").unwrap();
        assert_eq!(used, 3);
        assert_eq!(done.unwrap().request.body().as_ref(), b"hello");
    }

    #[test]
    fn chunked_body_with_trailers() {
        let mut d = decoder();
        let out = decode_all(
            &mut d,
            b"POST /c HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4;ext=1\r\nWiki\r\n5\r\npedia\r\n0\r\nX-Trailer: y\r\n\r\n",
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].request.body().as_ref(), b"Wikipedia");
    }

    #[test]
    fn pipelined_requests_released_one_at_a_time() {
        let mut d = decoder();
        let input = b"GET /1 HTTP/1.1\r\n\r\nGET /2 HTTP/1.1\r\n\r\n";
        let (used, first) = d.decode(input).unwrap();
        assert_eq!(first.unwrap().request.uri().path(), "/1");
        let (_, second) = d.decode(&input[used..]).unwrap();
        assert_eq!(second.unwrap().request.uri().path(), "/2");
    }

    #[test]
    fn keep_alive_rules() {
        let mut d = decoder();
        let out = decode_all(
            &mut d,
            b"GET / HTTP/1.0\r\n\r\nGET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\nGET / HTTP/1.1\r\nConnection: Close\r\n\r\n",
        );
        let verdicts: Vec<bool> = out.iter().map(|r| r.persistent).collect();
        assert_eq!(verdicts, vec![false, true, false]);
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(decoder().decode(b"GET\r\n\r\n").unwrap_err(), ParseError::InvalidRequestLine);
        assert_eq!(
            decoder().decode(b"GET / HTTP/2.0\r\n\r\n").unwrap_err(),
            ParseError::UnsupportedVersion
        );
        assert_eq!(
            decoder().decode(b"GET / HTTP/1.1\r\nBad Header\r\n\r\n").unwrap_err(),
            ParseError::InvalidHeader
        );
        assert_eq!(
            decoder()
                .decode(b"POST / HTTP/1.1\r\nContent-Length: 1\r\nContent-Length: 2\r\n\r\n")
                .unwrap_err(),
            ParseError::InvalidContentLength
        );
        assert_eq!(
            decoder()
                .decode(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n")
                .unwrap_err(),
            ParseError::InvalidChunk
        );
    }

    #[test]
    fn enforces_limits() {
        let limits = DecoderLimits {
            max_head_bytes: 32,
            max_body_bytes: 4,
        };
        let err = RequestDecoder::new(limits)
            .decode(b"GET /a-very-long-path-that-exceeds HTTP/1.1\r\n")
            .unwrap_err();
        assert_eq!(err, ParseError::HeadTooLarge { limit: 32 });

        let roomy_head = DecoderLimits {
            max_head_bytes: 64,
            ..limits
        };
        let err = RequestDecoder::new(roomy_head)
            .decode(b"POST / HTTP/1.1\r\nContent-Length: 9\r\n\r\n")
            .unwrap_err();
        assert_eq!(err, ParseError::BodyTooLarge { limit: 4 });
    }
}
