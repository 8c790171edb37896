#![cfg(unix)]

use cgi_bridge::{cgi_wrap, CgiError, CgiInvocation, CgiLogger, Method, Request};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

struct Collector(Mutex<Vec<String>>);

impl Collector {
    fn new() -> Self {
        Collector(Mutex::new(Vec::new()))
    }

    fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl CgiLogger for Collector {
    fn error(&self, line: &str) {
        self.0.lock().unwrap().push(line.to_string());
    }
}

#[test]
fn status_line_sets_response_status() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "notfound.sh", "printf 'HTTP/1.1 404\\n\\nNotFound'");

    let request = Request::new(Method::GET, "/notfound");
    let invocation = CgiInvocation::new(script.to_str().unwrap());
    let response = cgi_wrap(request, &invocation, None).unwrap();

    assert_eq!(response.status, 404);
    assert!(response.headers.is_empty());
    assert_eq!(response.body_bytes().unwrap(), b"NotFound");
}

#[test]
fn status_header_sets_status_and_is_stripped() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "status.sh",
        "printf 'Status: 500 Err\\nX-Foo: bar\\n\\nBody text'",
    );

    let request = Request::new(Method::GET, "/status");
    let invocation = CgiInvocation::new(script.to_str().unwrap());
    let response = cgi_wrap(request, &invocation, None).unwrap();

    assert_eq!(response.status, 500);
    assert_eq!(response.headers.get("X-Foo"), Some("bar"));
    assert!(!response.headers.contains("Status"));
    assert_eq!(response.headers.len(), 1);
    assert_eq!(response.body_bytes().unwrap(), b"Body text");
}

#[test]
fn headers_come_back_in_emitted_order() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "headers.sh",
        "printf 'X-One: 1\\nX-Two: 2\\nX-Three: 3\\n\\n'",
    );

    let request = Request::new(Method::GET, "/headers");
    let invocation = CgiInvocation::new(script.to_str().unwrap());
    let response = cgi_wrap(request, &invocation, None).unwrap();

    let names: Vec<String> = response
        .headers
        .iter()
        .map(|(n, _)| n.to_string())
        .collect();
    assert_eq!(names, vec!["X-One", "X-Two", "X-Three"]);
}

#[test]
fn round_trip_env_args_and_body() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "echo.sh",
        concat!(
            "echo 'Content-Type: text/plain'\n",
            "echo ''\n",
            "echo \"query=$QUERY_STRING\"\n",
            "echo \"method=$REQUEST_METHOD\"\n",
            "echo \"script=$SCRIPT_FILENAME\"\n",
            "echo \"name=$SCRIPT_NAME\"\n",
            "echo \"args=$*\"\n",
            "cat",
        ),
    );

    let request = Request::new(Method::POST, "/example_cgi")
        .with_meta("QUERY_STRING", "val1=foo&val2=BAR")
        .with_body("val1=foofoofoo");
    let invocation = CgiInvocation::with_args(script.to_str().unwrap(), ["foo", "bar"]);
    let response = cgi_wrap(request, &invocation, None).unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.headers.get("Content-Type"), Some("text/plain"));
    let body = String::from_utf8(response.body_bytes().unwrap()).unwrap();
    assert!(body.contains("query=val1=foo&val2=BAR"));
    assert!(body.contains("method=POST"));
    assert!(body.contains(&format!("script={}", script.to_str().unwrap())));
    assert!(body.contains("name=/example_cgi"));
    assert!(body.contains("args=foo bar"));
    assert!(body.ends_with("val1=foofoofoo"));
}

#[test]
fn query_string_override_reaches_the_script() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "qs.sh",
        "printf '\\n'; printf '%s' \"$QUERY_STRING\"",
    );

    let request = Request::new(Method::GET, "/qs").with_meta("QUERY_STRING", "ignored=1");
    let invocation = CgiInvocation::new(script.to_str().unwrap()).query_string("forced=1");
    let response = cgi_wrap(request, &invocation, None).unwrap();

    assert_eq!(response.body_bytes().unwrap(), b"forced=1");
}

#[test]
fn env_override_reaches_the_script() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "envdump.sh",
        "printf '\\n'; printf '%s' \"$SERVER_NAME:$EXTRA_VAR\"",
    );

    let request = Request::new(Method::GET, "/env").with_meta("SERVER_NAME", "original");
    let invocation = CgiInvocation::new(script.to_str().unwrap())
        .env("SERVER_NAME", "overridden")
        .env("EXTRA_VAR", "added");
    let response = cgi_wrap(request, &invocation, None).unwrap();

    assert_eq!(response.body_bytes().unwrap(), b"overridden:added");
}

#[test]
fn working_directory_is_applied() {
    let dir = tempfile::tempdir().unwrap();
    let workdir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "pwd.sh", "printf '\\n'; pwd");

    let request = Request::new(Method::GET, "/pwd");
    let invocation = CgiInvocation::new(script.to_str().unwrap()).cwd(workdir.path());
    let response = cgi_wrap(request, &invocation, None).unwrap();

    let body = String::from_utf8(response.body_bytes().unwrap()).unwrap();
    let reported = PathBuf::from(body.trim());
    let reported = reported.canonicalize().unwrap_or(reported);
    assert_eq!(reported, workdir.path().canonicalize().unwrap());
}

#[test]
fn nonzero_exit_yields_error_response() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "fail.sh", "echo boom >&2\nexit 2");

    let request = Request::new(Method::GET, "/fail");
    let invocation = CgiInvocation::new(script.to_str().unwrap());
    let logger = Collector::new();
    let response = cgi_wrap(request, &invocation, Some(&logger)).unwrap();

    assert_eq!(response.status, 500);
    let body = String::from_utf8(response.body_bytes().unwrap()).unwrap();
    assert!(body.contains("rc=2"), "body was: {}", body);
    assert!(body.contains("boom"), "body was: {}", body);

    let lines = logger.lines();
    assert!(lines
        .iter()
        .any(|l| l.contains("terminated with rc=2")));
    assert!(lines.iter().any(|l| l == "CGI err: boom"));
}

#[test]
fn stderr_of_successful_script_is_logged() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "warn.sh", "echo 'just a warning' >&2\necho ''");

    let request = Request::new(Method::GET, "/warn");
    let invocation = CgiInvocation::new(script.to_str().unwrap());
    let logger = Collector::new();
    let response = cgi_wrap(request, &invocation, Some(&logger)).unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(logger.lines(), vec!["CGI err: just a warning".to_string()]);
}

#[test]
fn spawn_failure_propagates() {
    let request = Request::new(Method::GET, "/missing");
    let invocation = CgiInvocation::new("/no/such/cgi-binary");
    match cgi_wrap(request, &invocation, None) {
        Err(CgiError::Spawn { binary, .. }) => assert_eq!(binary, "/no/such/cgi-binary"),
        other => panic!("expected spawn error, got {:?}", other.map(|r| r.status)),
    }
}

#[test]
fn headers_only_output_gives_empty_body() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "headers_only.sh", "printf 'X-A: 1\\n'");

    let request = Request::new(Method::GET, "/headers_only");
    let invocation = CgiInvocation::new(script.to_str().unwrap());
    let response = cgi_wrap(request, &invocation, None).unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.headers.get("X-A"), Some("1"));
    assert!(response.body_bytes().unwrap().is_empty());
}
