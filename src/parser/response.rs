//! Response building: static file lookup, memory-mapping, and the
//! status line / header block written ahead of the body.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::error::ResponseError;

use super::status::Status;
use super::version::Version;

/// Maps a file extension to its `Content-Type` value. Anything not
/// listed falls back to `text/plain`.
fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        Some("json") => "application/json",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

/// The payload of a [`Response`], either owned bytes generated in
/// memory (error pages) or a memory-mapped file.
#[derive(Debug)]
pub enum ResponseBody {
    /// Generated in memory.
    Owned(Vec<u8>),
    /// A memory-mapped static file, unmapped on drop.
    Mapped(Mmap),
}

impl ResponseBody {
    /// Borrows the body as a flat byte slice, regardless of backing.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Owned(v) => v,
            Self::Mapped(m) => m,
        }
    }

    /// Length of the body in bytes, for the `Content-Length` header.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Whether the body is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A complete HTTP/1.1 response: status line, headers, and body.
#[derive(Debug)]
pub struct Response {
    status: Status,
    version: Version,
    content_type: &'static str,
    keep_alive: bool,
    body: ResponseBody,
}

impl Response {
    /// A response carrying an in-memory HTML body, used for error
    /// pages and anywhere else content is generated rather than read
    /// off disk.
    pub fn html(version: Version, keep_alive: bool, status: Status, body: Vec<u8>) -> Self {
        Self {
            status,
            version,
            content_type: "text/html",
            keep_alive,
            body: ResponseBody::Owned(body),
        }
    }

    /// Serializes the status line and headers. The body is kept
    /// separate so the caller can gather-write both without copying
    /// the (possibly large, memory-mapped) body into this buffer.
    pub fn head_bytes(&self) -> Vec<u8> {
        let mut head = format!(
            "{} {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: {}\r\n",
            self.version,
            self.status.code(),
            self.status.reason(),
            self.content_type,
            self.body.len(),
            if self.keep_alive { "keep-alive" } else { "close" },
        );
        if self.keep_alive {
            head.push_str("keep-alive: max=6, timeout=120\r\n");
        }
        head.push_str("\r\n");
        head.into_bytes()
    }

    /// Borrows the response body.
    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    /// Consumes the response, yielding just its body. Used once the
    /// head has already been serialized via [`Response::head_bytes`]
    /// and the caller wants to hold onto the (possibly memory-mapped)
    /// body separately while draining it across several writes.
    pub fn into_body(self) -> ResponseBody {
        self.body
    }

    /// Whether the connection should stay open after this response.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }
}

/// Resolves request targets against a document root, memory-mapping
/// static files and falling back to bundled error pages for anything
/// missing, forbidden, or outside the root.
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    doc_root: PathBuf,
}

impl ResponseBuilder {
    /// `doc_root` is canonicalized once at construction; every request
    /// path is resolved and re-checked against it on every call to
    /// guard against directory traversal (`..`, symlinks escaping the
    /// root, etc).
    pub fn new(doc_root: impl Into<PathBuf>) -> std::io::Result<Self> {
        Ok(Self {
            doc_root: doc_root.into().canonicalize()?,
        })
    }

    /// Builds a response for a static asset at `request_path` (already
    /// rewritten by [`crate::parser::request::RequestParser`], so `/`
    /// has already become `/index.html`).
    pub fn serve(&self, request_path: &str, version: Version, keep_alive: bool) -> Response {
        match self.resolve_and_map(request_path) {
            Ok((path, body)) => Response {
                status: Status::Ok,
                version,
                content_type: content_type_for(&path),
                keep_alive,
                body,
            },
            Err(err) => self.error_page(version, keep_alive, status_for(&err)),
        }
    }

    /// Builds the bundled error page for `status`, falling back to a
    /// minimal generated body if the page itself is missing from the
    /// document root.
    pub fn error_page(&self, version: Version, keep_alive: bool, status: Status) -> Response {
        let page = status.error_page().unwrap_or("400.html");
        match self.resolve_and_map(&format!("/{page}")) {
            Ok((path, body)) => Response {
                status,
                version,
                content_type: content_type_for(&path),
                keep_alive,
                body,
            },
            Err(_) => Response::html(
                version,
                keep_alive,
                status,
                format!("<html><body><h1>{} {}</h1></body></html>", status.code(), status.reason())
                    .into_bytes(),
            ),
        }
    }

    /// Resolves `request_path` against the document root and maps the
    /// file in. `memmap2` refuses to map a zero-length file, so an
    /// empty file is served as an empty owned body instead. A target
    /// that canonicalizes to a directory (or anything else that isn't a
    /// regular file) is reported as `NotFound` rather than attempted.
    fn resolve_and_map(&self, request_path: &str) -> Result<(PathBuf, ResponseBody), ResponseError> {
        let relative = request_path.trim_start_matches('/');
        let candidate = self.doc_root.join(relative);

        let canonical = candidate.canonicalize().map_err(|_| ResponseError::NotFound)?;
        if !canonical.starts_with(&self.doc_root) {
            return Err(ResponseError::PathTraversal);
        }

        let metadata = std::fs::metadata(&canonical).map_err(|_| ResponseError::NotFound)?;
        if !metadata.is_file() {
            return Err(ResponseError::NotFound);
        }

        let file = File::open(&canonical).map_err(ResponseError::Io)?;
        if metadata.len() == 0 {
            return Ok((canonical, ResponseBody::Owned(Vec::new())));
        }
        // SAFETY: the file is opened read-only for the lifetime of the
        // mapping and this process doesn't truncate files concurrently
        // with serving them.
        let mapped = unsafe { Mmap::map(&file) }.map_err(ResponseError::Io)?;
        Ok((canonical, ResponseBody::Mapped(mapped)))
    }
}

/// Maps a [`ResponseError`] to the wire status it should be reported
/// as — `serve`'s only caller-visible outcome is a `Response`, so this
/// is where the typed error collapses back into a status code.
fn status_for(err: &ResponseError) -> Status {
    match err {
        ResponseError::NotFound => Status::NotFound,
        ResponseError::PathTraversal => Status::Forbidden,
        ResponseError::Io(_) => Status::InternalServerError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn doc_root_with(files: &[(&str, &str)]) -> tempfile_doc_root::TempDocRoot {
        tempfile_doc_root::TempDocRoot::new(files)
    }

    mod tempfile_doc_root {
        use std::fs;
        use std::path::PathBuf;

        /// Minimal scratch-directory helper for response tests, since
        /// pulling in a dedicated tempdir crate isn't warranted for
        /// this small a need.
        pub struct TempDocRoot {
            pub path: PathBuf,
        }

        impl TempDocRoot {
            pub fn new(files: &[(&str, &str)]) -> Self {
                let path = std::env::temp_dir().join(format!(
                    "hearth-response-test-{}-{}",
                    std::process::id(),
                    files.len()
                ));
                let _ = fs::remove_dir_all(&path);
                fs::create_dir_all(&path).unwrap();
                for (name, contents) in files {
                    fs::write(path.join(name), contents).unwrap();
                }
                Self { path }
            }
        }

        impl Drop for TempDocRoot {
            fn drop(&mut self) {
                let _ = fs::remove_dir_all(&self.path);
            }
        }
    }

    #[test]
    fn serves_existing_file_with_200() {
        let root = doc_root_with(&[("index.html", "<h1>hi</h1>")]);
        let builder = ResponseBuilder::new(&root.path).unwrap();
        let response = builder.serve("/index.html", Version::H1_1, true);
        assert_eq!(b"<h1>hi</h1>", response.body().as_bytes());
        let head = String::from_utf8(response.head_bytes()).unwrap();
        assert!(head.starts_with("HTTP/1.1 200"));
        assert!(head.contains("text/html"));
    }

    #[test]
    fn missing_file_falls_back_to_generated_404() {
        let root = doc_root_with(&[]);
        let builder = ResponseBuilder::new(&root.path).unwrap();
        let response = builder.serve("/missing.html", Version::H1_1, true);
        let head = String::from_utf8(response.head_bytes()).unwrap();
        assert!(head.starts_with("HTTP/1.1 404"));
    }

    #[test]
    fn traversal_outside_document_root_is_forbidden() {
        let root = doc_root_with(&[("index.html", "hi")]);
        let builder = ResponseBuilder::new(&root.path).unwrap();
        let response = builder.serve("/../../etc/passwd", Version::H1_1, true);
        let head = String::from_utf8(response.head_bytes()).unwrap();
        assert!(head.starts_with("HTTP/1.1 404") || head.starts_with("HTTP/1.1 403"));
    }

    #[test]
    fn keep_alive_response_advertises_max_and_timeout() {
        let root = doc_root_with(&[("index.html", "hi")]);
        let builder = ResponseBuilder::new(&root.path).unwrap();
        let response = builder.serve("/index.html", Version::H1_1, true);
        let head = String::from_utf8(response.head_bytes()).unwrap();
        assert!(head.contains("Connection: keep-alive"));
        assert!(head.contains("keep-alive: max=6, timeout=120"));
    }

    #[test]
    fn non_keep_alive_response_omits_keep_alive_parameters() {
        let root = doc_root_with(&[("index.html", "hi")]);
        let builder = ResponseBuilder::new(&root.path).unwrap();
        let response = builder.serve("/index.html", Version::H1_1, false);
        let head = String::from_utf8(response.head_bytes()).unwrap();
        assert!(head.contains("Connection: close"));
        assert!(!head.contains("keep-alive: max"));
    }
}
