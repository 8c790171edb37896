use crate::http::{Body, Response};
use std::io;
use thiserror::Error;

/// Fatal failures of a CGI invocation.
///
/// Non-zero exit codes are not errors at this level: they are recovered into
/// an error [`Response`] carrying the exit code and captured stderr.
#[derive(Debug, Error)]
pub enum CgiError {
    #[error("failed to spawn CGI executable {binary}: {source}")]
    Spawn { binary: String, source: io::Error },

    #[error("failed to stream request body to CGI stdin: {0}")]
    BodyCopy(#[source] io::Error),

    #[error("failed to capture CGI output: {0}")]
    Sink(#[source] io::Error),

    #[error("failed to wait for CGI executable: {0}")]
    Wait(#[source] io::Error),
}

/// Builds the response returned when the CGI executable exits non-zero.
pub fn failure_response(exit_code: i32, stderr: &str) -> Response {
    let mut message = format!("CGI binary terminated with rc={}.", exit_code);
    if !stderr.is_empty() {
        message.push(' ');
        message.push_str(stderr);
    }

    let mut res = Response::new(500);
    res.headers.insert("Content-Type", "text/plain");
    res.headers
        .insert("Content-Length", message.len().to_string());
    res.body = Body::bytes(message.into_bytes());
    res
}
