//! Incremental HTTP/1.1 request parser.
//!
//! Requests arrive in pieces across possibly many `read_once` calls, so
//! the parser holds owned state between calls rather than borrowing
//! directly from the connection's [`crate::buffer::Buffer`] the way
//! [`crate::parser::raw_request::RawRequest`] borrows within a single
//! already-framed line.

use std::collections::HashMap;

use crate::buffer::Buffer;
use crate::error::ParseError;

use super::method::Method;
use super::raw_request::RawRequest;
use super::version::Version;

/// Request targets that get rewritten to a concrete file under the
/// document root, mirroring the small set of bare routes the site
/// serves without a file extension.
const DEFAULT_HTML: &[&str] = &["/index", "/register", "/login", "/welcome", "/video", "/picture"];

/// A fully parsed, owned HTTP/1.1 request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// The request method.
    pub method: Method,
    /// The request target's path component, already rewritten per
    /// [`DEFAULT_HTML`] (e.g. `/` becomes `/index.html`).
    pub path: String,
    /// The raw query string, if any, without the leading `?`.
    pub query: String,
    /// The HTTP version on the request line.
    pub version: Version,
    /// Header names are lowercased for case-insensitive lookup; values
    /// are stored verbatim.
    pub headers: HashMap<String, String>,
    /// The request body, if any (only populated for methods that carry
    /// one, currently just `POST`).
    pub body: Vec<u8>,
    /// Whether the connection should remain open after this request,
    /// resolved from the `Connection` header against the version's
    /// default.
    pub keep_alive: bool,
}

impl Request {
    /// Percent- and `+`-decodes an `application/x-www-form-urlencoded`
    /// body into field/value pairs.
    ///
    /// Each `%` must be followed by exactly two hex digits consumed
    /// together; a parser that decodes one hex digit at a time and
    /// advances by one byte per digit will desynchronize on any escape
    /// and corrupt every field after the first.
    pub fn form_fields(&self) -> HashMap<String, String> {
        decode_form_body(&self.body)
    }

    /// Header lookup, case-insensitive on the name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

fn decode_form_body(body: &[u8]) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    for pair in body.split(|&b| b == b'&') {
        if pair.is_empty() {
            continue;
        }
        let mut parts = pair.splitn(2, |&b| b == b'=');
        let key = parts.next().unwrap_or(&[]);
        let value = parts.next().unwrap_or(&[]);
        fields.insert(decode_percent(key), decode_percent(value));
    }
    fields
}

fn decode_percent(input: &[u8]) -> String {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < input.len() => {
                let hi = (input[i + 1] as char).to_digit(16);
                let lo = (input[i + 2] as char).to_digit(16);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => {
                        out.push(((hi << 4) | lo) as u8);
                        i += 3;
                    }
                    _ => {
                        out.push(input[i]);
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn rewrite_path(raw: &str) -> String {
    if raw == "/" {
        return "/index.html".to_string();
    }
    if DEFAULT_HTML.contains(&raw) {
        return format!("{raw}.html");
    }
    raw.to_string()
}

/// Where [`RequestParser::parse`] left off, and the completed request
/// once all of it has arrived.
#[derive(Debug)]
pub enum ParseOutcome {
    /// Not enough bytes have arrived yet; call `parse` again after the
    /// next read.
    Incomplete,
    /// The request is fully framed and ready to route.
    Complete(Request),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    RequestLine,
    Headers,
    Body,
}

/// Drives one HTTP/1.1 request through `REQUEST_LINE` → `HEADERS` →
/// `BODY` against a connection's persistent read buffer.
#[derive(Debug)]
pub struct RequestParser {
    state: State,
    method: Option<Method>,
    path: String,
    query: String,
    version: Option<Version>,
    headers: HashMap<String, String>,
    content_length: usize,
    body: Vec<u8>,
    /// Cumulative bytes consumed across the request line and headers,
    /// checked against the configured ceiling to bound memory use from
    /// a client that never sends a terminating CRLF.
    header_bytes: usize,
    max_header_bytes: usize,
}

impl RequestParser {
    /// Creates a fresh parser. `max_header_bytes` bounds the combined
    /// size of the request line and headers before `ParseError::TooLarge`
    /// is raised.
    pub fn new(max_header_bytes: usize) -> Self {
        Self {
            state: State::RequestLine,
            method: None,
            path: String::new(),
            query: String::new(),
            version: None,
            headers: HashMap::new(),
            content_length: 0,
            body: Vec::new(),
            header_bytes: 0,
            max_header_bytes,
        }
    }

    /// Resets the parser to begin a new request, reusing the allocated
    /// `headers` map and `body` vector.
    pub fn reset(&mut self) {
        self.state = State::RequestLine;
        self.method = None;
        self.path.clear();
        self.query.clear();
        self.version = None;
        self.headers.clear();
        self.content_length = 0;
        self.body.clear();
        self.header_bytes = 0;
    }

    /// Advances parsing as far as the bytes currently readable in `buf`
    /// allow, consuming whatever it fully parses.
    pub fn parse(&mut self, buf: &mut Buffer) -> Result<ParseOutcome, ParseError> {
        loop {
            match self.state {
                State::RequestLine => {
                    let Some(line) = take_line(buf) else {
                        self.check_header_budget(buf)?;
                        return Ok(ParseOutcome::Incomplete);
                    };
                    self.header_bytes += line.len() + 2;
                    self.check_header_budget(buf)?;
                    self.parse_request_line(&line)?;
                    self.state = State::Headers;
                }
                State::Headers => {
                    let Some(line) = take_line(buf) else {
                        self.check_header_budget(buf)?;
                        return Ok(ParseOutcome::Incomplete);
                    };
                    self.header_bytes += line.len() + 2;
                    self.check_header_budget(buf)?;
                    if line.is_empty() {
                        self.content_length = self
                            .headers
                            .get("content-length")
                            .and_then(|v| v.parse().ok())
                            .unwrap_or(0);
                        self.state = if self.content_length > 0 {
                            State::Body
                        } else {
                            return Ok(ParseOutcome::Complete(self.finish()));
                        };
                    } else {
                        self.parse_header_line(&line)?;
                    }
                }
                State::Body => {
                    if buf.readable_bytes() < self.content_length {
                        return Ok(ParseOutcome::Incomplete);
                    }
                    self.body = buf.peek()[..self.content_length].to_vec();
                    buf.retrieve(self.content_length);
                    return Ok(ParseOutcome::Complete(self.finish()));
                }
            }
        }
    }

    fn check_header_budget(&self, buf: &Buffer) -> Result<(), ParseError> {
        if self.header_bytes + buf.readable_bytes() > self.max_header_bytes {
            return Err(ParseError::TooLarge);
        }
        Ok(())
    }

    fn parse_request_line(&mut self, line: &[u8]) -> Result<(), ParseError> {
        let mut cursor = RawRequest::new(line);
        let method = cursor.take_until(|b| b == b' ').ok_or(ParseError::Method)?;
        cursor.advance(1);
        let target = cursor.take_until(|b| b == b' ').ok_or(ParseError::Target)?;
        cursor.advance(1);
        let version = cursor.to_vec();

        let method_str = std::str::from_utf8(method).map_err(|_| ParseError::Method)?;
        self.method = Some(method_str.parse()?);

        let target_str = std::str::from_utf8(target).map_err(|_| ParseError::Target)?;
        if target_str.is_empty() {
            return Err(ParseError::Target);
        }
        match target_str.split_once('?') {
            Some((path, query)) => {
                self.path = rewrite_path(path);
                self.query = query.to_string();
            }
            None => {
                self.path = rewrite_path(target_str);
                self.query.clear();
            }
        }

        let version_str = std::str::from_utf8(&version).map_err(|_| ParseError::Version)?;
        self.version = Some(version_str.parse()?);

        Ok(())
    }

    fn parse_header_line(&mut self, line: &[u8]) -> Result<(), ParseError> {
        let mut cursor = RawRequest::new(line);
        let name = cursor.take_until(|b| b == b':').ok_or(ParseError::HeaderName)?;
        cursor.advance(1);
        while cursor.peek() == Some(b' ') || cursor.peek() == Some(b'\t') {
            cursor.advance(1);
        }
        let value = cursor.to_vec();

        let name = std::str::from_utf8(name)
            .map_err(|_| ParseError::HeaderName)?
            .to_ascii_lowercase();
        let value = std::str::from_utf8(&value)
            .map_err(|_| ParseError::HeaderValue)?
            .trim_end()
            .to_string();

        self.headers.insert(name, value);
        Ok(())
    }

    fn finish(&mut self) -> Request {
        let version = self.version.expect("version set before finish");
        let keep_alive = match self.headers.get("connection").map(|v| v.to_ascii_lowercase()) {
            Some(v) if v == "keep-alive" => true,
            Some(v) if v == "close" => false,
            _ => version.defaults_to_keep_alive(),
        };

        let request = Request {
            method: self.method.expect("method set before finish"),
            path: std::mem::take(&mut self.path),
            query: std::mem::take(&mut self.query),
            version,
            headers: std::mem::take(&mut self.headers),
            body: std::mem::take(&mut self.body),
            keep_alive,
        };
        self.reset();
        request
    }
}

/// Pulls one CRLF-terminated line out of `buf`'s readable region
/// without the terminator, leaving the buffer untouched if no
/// terminator has arrived yet.
fn take_line(buf: &mut Buffer) -> Option<Vec<u8>> {
    let readable = buf.peek();
    let end = readable.windows(2).position(|w| w == b"\r\n")?;
    let line = readable[..end].to_vec();
    buf.retrieve(end + 2);
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut RequestParser, data: &[u8]) -> ParseOutcome {
        let mut buf = Buffer::new(256);
        buf.append(data);
        parser.parse(&mut buf).unwrap()
    }

    #[test]
    fn parses_simple_get_with_no_body() {
        let mut parser = RequestParser::new(8192);
        let outcome = feed(
            &mut parser,
            b"GET / HTTP/1.1\r\nHost: example.com\r\nConnection: keep-alive\r\n\r\n",
        );
        let ParseOutcome::Complete(req) = outcome else { panic!("expected complete") };
        assert_eq!(Method::Get, req.method);
        assert_eq!("/index.html", req.path);
        assert_eq!(Version::H1_1, req.version);
        assert!(req.keep_alive);
    }

    #[test]
    fn bare_route_gets_html_suffix_appended() {
        let mut parser = RequestParser::new(8192);
        let ParseOutcome::Complete(req) = feed(&mut parser, b"GET /login HTTP/1.1\r\n\r\n") else {
            panic!("expected complete")
        };
        assert_eq!("/login.html", req.path);
    }

    #[test]
    fn incomplete_request_line_returns_incomplete() {
        let mut parser = RequestParser::new(8192);
        let mut buf = Buffer::new(64);
        buf.append(b"GET / HTTP/1.1\r\nHost: exa");
        let outcome = parser.parse(&mut buf).unwrap();
        assert!(matches!(outcome, ParseOutcome::Incomplete));
    }

    #[test]
    fn post_waits_for_full_body_before_completing() {
        let mut parser = RequestParser::new(8192);
        let mut buf = Buffer::new(128);
        buf.append(b"POST /login HTTP/1.1\r\nContent-Length: 20\r\n\r\nusername=bob&passwo");
        assert!(matches!(parser.parse(&mut buf).unwrap(), ParseOutcome::Incomplete));
        buf.append(b"rd=x");
        let ParseOutcome::Complete(req) = parser.parse(&mut buf).unwrap() else {
            panic!("expected complete")
        };
        assert_eq!(b"username=bob&password=x", req.body.as_slice());
    }

    #[test]
    fn form_fields_decodes_percent_and_plus_escapes() {
        let req = Request {
            method: Method::Post,
            path: "/login.html".into(),
            query: String::new(),
            version: Version::H1_1,
            headers: HashMap::new(),
            body: b"username=a%20b%2Bc&password=hello+world".to_vec(),
            keep_alive: true,
        };
        let fields = req.form_fields();
        assert_eq!("a b+c", fields["username"]);
        assert_eq!("hello world", fields["password"]);
    }

    #[test]
    fn connection_close_header_overrides_http11_default() {
        let mut parser = RequestParser::new(8192);
        let ParseOutcome::Complete(req) = feed(
            &mut parser,
            b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n",
        ) else {
            panic!("expected complete")
        };
        assert!(!req.keep_alive);
    }

    #[test]
    fn oversized_headers_are_rejected() {
        let mut parser = RequestParser::new(16);
        let mut buf = Buffer::new(64);
        buf.append(b"GET /a-path-longer-than-the-limit HTTP/1.1\r\n\r\n");
        assert!(matches!(parser.parse(&mut buf), Err(ParseError::TooLarge)));
    }
}
