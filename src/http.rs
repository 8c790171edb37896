use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, Read, Write};
use tempfile::TempPath;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    GET,
    POST,
    DELETE,
    OTHER(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::DELETE => "DELETE",
            Method::OTHER(s) => s,
        }
    }
}

impl From<&str> for Method {
    fn from(s: &str) -> Self {
        match s {
            "GET" => Method::GET,
            "POST" => Method::POST,
            "DELETE" => Method::DELETE,
            _ => Method::OTHER(s.to_string()),
        }
    }
}

/// Inbound request handed to the bridge by the surrounding framework.
///
/// `meta` carries CGI-style metadata keys (`HTTP_HOST`, `QUERY_STRING`,
/// `SERVER_NAME`, ...). Only the keys actually present are exported to the
/// subprocess environment; the constructor seeds `REQUEST_METHOD` from the
/// method. The body is a stream read exactly once, while it is piped into
/// the subprocess stdin.
pub struct Request {
    pub method: Method,
    pub path: String,
    pub meta: HashMap<String, String>,
    pub body: Box<dyn Read>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let mut meta = HashMap::new();
        meta.insert("REQUEST_METHOD".to_string(), method.as_str().to_string());
        Request {
            method,
            path: path.into(),
            meta,
            body: Box::new(io::empty()),
        }
    }

    pub fn with_meta(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Box::new(Cursor::new(body.into()));
        self
    }

    pub fn with_body_reader(mut self, body: impl Read + 'static) -> Self {
        self.body = Box::new(body);
        self
    }
}

/// Header mapping preserving insertion order.
///
/// Names are matched case-sensitively, the way CGI programs emit them.
/// `insert` on an existing name replaces the value in place.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Headers::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let pos = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

enum BodyKind {
    Bytes(Cursor<Vec<u8>>),
    // Holding the TempPath deletes the sink when the body is dropped.
    Sink {
        reader: BufReader<File>,
        _path: TempPath,
    },
}

/// Response payload, readable once as a byte stream.
///
/// Either in-memory bytes or a lazy reader over the captured CGI output,
/// positioned at the start of the body. The sink-backed variant removes its
/// temporary file on drop, whether or not the stream was consumed.
pub struct Body {
    inner: BodyKind,
}

impl Body {
    pub fn bytes(data: Vec<u8>) -> Self {
        Body {
            inner: BodyKind::Bytes(Cursor::new(data)),
        }
    }

    pub(crate) fn from_sink(reader: BufReader<File>, path: TempPath) -> Self {
        Body {
            inner: BodyKind::Sink {
                reader,
                _path: path,
            },
        }
    }
}

impl Read for Body {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            BodyKind::Bytes(cursor) => cursor.read(buf),
            BodyKind::Sink { reader, .. } => reader.read(buf),
        }
    }
}

pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: Body,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Response {
            status,
            headers: Headers::new(),
            body: Body::bytes(Vec::new()),
        }
    }

    /// Reads the body to completion, consuming the response.
    pub fn body_bytes(self) -> io::Result<Vec<u8>> {
        let mut body = self.body;
        let mut buf = Vec::new();
        body.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Serializes the response as HTTP/1.1 wire bytes, streaming the body.
    pub fn write_to<W: Write>(mut self, out: &mut W) -> io::Result<()> {
        write!(
            out,
            "HTTP/1.1 {} {}\r\n",
            self.status,
            status_text(self.status)
        )?;
        for (name, value) in self.headers.iter() {
            write!(out, "{}: {}\r\n", name, value)?;
        }
        out.write_all(b"\r\n")?;
        io::copy(&mut self.body, out)?;
        Ok(())
    }
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

#[derive(Debug, PartialEq)]
enum ScanState {
    HeaderScan,
    Body,
}

/// Result of scanning the captured CGI output: final status, headers, and
/// the byte offset at which the body begins.
#[derive(Debug)]
pub(crate) struct CgiOutput {
    pub status: u16,
    pub headers: Headers,
    pub body_start: u64,
}

/// Scans CGI output headers line by line from offset zero.
///
/// Two-state scan: `HeaderScan` consumes lines until an empty one switches
/// to `Body` and records the offset past it. An `HTTP/...` line sets the
/// status from its second token; a `Status:` header, if present, wins over
/// that and is removed from the mapping. Lines whose status token does not
/// parse, or which lack the `": "` separator, are skipped. Output ending
/// inside the header block yields a zero-length body at end-of-output.
pub(crate) fn scan_cgi_output<R: BufRead>(reader: &mut R) -> io::Result<CgiOutput> {
    let mut status: u16 = 200;
    let mut headers = Headers::new();
    let mut offset: u64 = 0;
    let mut state = ScanState::HeaderScan;
    let mut line = Vec::new();

    while state == ScanState::HeaderScan {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            state = ScanState::Body;
            break;
        }
        offset += n as u64;

        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end();
        if text.is_empty() {
            state = ScanState::Body;
        } else if text.starts_with("HTTP/") {
            if let Some(token) = text.split_whitespace().nth(1) {
                if let Ok(code) = token.parse::<u16>() {
                    status = code;
                }
            }
        } else if let Some(pos) = text.find(": ") {
            headers.insert(&text[..pos], &text[pos + 2..]);
        }
    }

    if let Some(value) = headers.remove("Status") {
        if let Ok(code) = value
            .split_whitespace()
            .next()
            .unwrap_or("")
            .parse::<u16>()
        {
            status = code;
        }
    }

    Ok(CgiOutput {
        status,
        headers,
        body_start: offset,
    })
}
