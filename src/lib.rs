//! Bridge for running CGI-style executables from within a web framework's
//! request/response cycle.
//!
//! A CGI program reads the request body on stdin and writes an optional
//! status line, `Name: value` header lines, a blank line, and the body on
//! stdout. [`cgi_wrap`] turns one such program into a plain function call:
//! it builds the CGI environment from the inbound request, pipes the body
//! into the subprocess, captures its stdout into a temporary file, and
//! parses that back into a [`Response`] whose body streams lazily from the
//! capture.
//!
//! ```no_run
//! use cgi_bridge::{cgi_wrap, CgiInvocation, Method, Request};
//!
//! let request = Request::new(Method::GET, "/example_cgi")
//!     .with_meta("QUERY_STRING", "val1=foo");
//! let invocation = CgiInvocation::new("/usr/lib/cgi-bin/example");
//! let response = cgi_wrap(request, &invocation, None)?;
//! assert_eq!(response.status, 200);
//! # Ok::<(), cgi_bridge::CgiError>(())
//! ```
//!
//! Each invocation is synchronous and owns its environment mapping, its
//! subprocess, and its capture file; the file is removed once the response
//! body has been consumed or dropped, on every path. A non-zero exit is
//! reported as a 500 response carrying the exit code and captured stderr,
//! while spawn and body-copy failures surface as [`CgiError`].

mod cgi;
mod error;
mod http;

pub use cgi::{cgi_wrap, CgiInvocation, CgiLogger, StdLogger, SERVER_SOFTWARE};
pub use error::CgiError;
pub use http::{Body, Headers, Method, Request, Response};
