use crate::error::{failure_response, CgiError};
use crate::http::{scan_cgi_output, Body, Request, Response};
use std::collections::HashMap;
use std::env;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use tempfile::{Builder, NamedTempFile};

/// Identifier exported to the CGI program via SERVER_SOFTWARE.
pub const SERVER_SOFTWARE: &str = "cgi-bridge/0.1.0";

/// Request metadata keys copied into the CGI environment when present.
/// Absent keys are omitted, never set to an empty placeholder.
const META_VARS: [&str; 8] = [
    "HTTP_HOST",
    "HTTP_USER_AGENT",
    "QUERY_STRING",
    "REMOTE_HOST",
    "REMOTE_USER",
    "SERVER_NAME",
    "SERVER_PORT",
    "REQUEST_METHOD",
];

/// Optional logger collaborator receiving one line per reportable event.
pub trait CgiLogger {
    fn error(&self, line: &str);
}

/// [`CgiLogger`] forwarding to the `log` crate.
pub struct StdLogger;

impl CgiLogger for StdLogger {
    fn error(&self, line: &str) {
        log::error!("{}", line);
    }
}

/// Describes one CGI call: the executable (with optional positional
/// arguments), environment overrides, an optional working directory, and an
/// optional query-string override.
///
/// The override map starts empty for every invocation; overrides are applied
/// after all computed defaults and always win, including for names outside
/// the recognized metadata set.
pub struct CgiInvocation {
    argv: Vec<String>,
    env: HashMap<String, String>,
    cwd: Option<PathBuf>,
    query_string: Option<String>,
}

impl CgiInvocation {
    pub fn new(binary: impl Into<String>) -> Self {
        CgiInvocation {
            argv: vec![binary.into()],
            env: HashMap::new(),
            cwd: None,
            query_string: None,
        }
    }

    pub fn with_args<I, S>(binary: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = vec![binary.into()];
        argv.extend(args.into_iter().map(Into::into));
        CgiInvocation {
            argv,
            env: HashMap::new(),
            cwd: None,
            query_string: None,
        }
    }

    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn query_string(mut self, query: impl Into<String>) -> Self {
        self.query_string = Some(query.into());
        self
    }

    pub fn binary(&self) -> &str {
        &self.argv[0]
    }

    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }
}

/// Builds the subprocess environment. The child environment is replaced
/// wholesale with this mapping, so PATH is carried over explicitly.
fn build_env(request: &Request, invocation: &CgiInvocation) -> HashMap<String, String> {
    let mut env_vars = HashMap::new();
    for name in META_VARS {
        if let Some(value) = request.meta.get(name) {
            env_vars.insert(name.to_string(), value.clone());
        }
    }
    if let Ok(path) = env::var("PATH") {
        env_vars.insert("PATH".to_string(), path);
    }
    env_vars.insert("SCRIPT_NAME".to_string(), request.path.clone());
    env_vars.insert("SCRIPT_URI".to_string(), request.path.clone());
    env_vars.insert(
        "SCRIPT_FILENAME".to_string(),
        invocation.binary().to_string(),
    );
    env_vars.insert("SERVER_SOFTWARE".to_string(), SERVER_SOFTWARE.to_string());
    if let Some(query) = &invocation.query_string {
        if !query.is_empty() {
            env_vars.insert("QUERY_STRING".to_string(), query.clone());
        }
    }
    for (name, value) in &invocation.env {
        env_vars.insert(name.clone(), value.clone());
    }
    env_vars
}

struct RunOutcome {
    exit_code: i32,
    stderr: String,
    sink: NamedTempFile,
}

/// Spawns the executable with stdout captured into a fresh sink file,
/// streams the request body into its stdin, and waits for exit.
///
/// Stderr is drained on a helper thread so the pipe cannot fill up and
/// stall the child while the body is still being written. On any error the
/// sink is removed by drop before the error propagates.
fn run_process(
    invocation: &CgiInvocation,
    env_vars: HashMap<String, String>,
    body: &mut dyn Read,
) -> Result<RunOutcome, CgiError> {
    let sink = Builder::new()
        .prefix("cgi-bridge-")
        .tempfile()
        .map_err(CgiError::Sink)?;
    let stdout = sink.as_file().try_clone().map_err(CgiError::Sink)?;

    let mut cmd = Command::new(invocation.binary());
    cmd.args(invocation.args())
        .env_clear()
        .envs(&env_vars)
        .stdin(Stdio::piped())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::piped());
    if let Some(dir) = &invocation.cwd {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|source| CgiError::Spawn {
        binary: invocation.binary().to_string(),
        source,
    })?;

    let mut child_stderr = child.stderr.take().expect("stderr was piped");
    let stderr_handle = thread::spawn(move || {
        let mut buf = Vec::new();
        child_stderr
            .read_to_end(&mut buf)
            .map(|_| String::from_utf8_lossy(&buf).into_owned())
    });

    {
        let mut stdin = child.stdin.take().expect("stdin was piped");
        if let Err(err) = io::copy(body, &mut stdin) {
            // Reap the child so it does not linger as a zombie.
            let _ = child.kill();
            let _ = child.wait();
            return Err(CgiError::BodyCopy(err));
        }
    }

    let status = child.wait().map_err(CgiError::Wait)?;
    let stderr = match stderr_handle.join() {
        Ok(Ok(text)) => text,
        _ => String::new(),
    };

    Ok(RunOutcome {
        // Signal termination carries no exit code; report it as -1.
        exit_code: status.code().unwrap_or(-1),
        stderr,
        sink,
    })
}

/// Removes the sink without surfacing expected failures: a file that is
/// already gone is ignored, anything else is logged and swallowed.
fn discard_sink(sink: NamedTempFile) {
    if let Err(err) = sink.close() {
        if err.kind() != io::ErrorKind::NotFound {
            log::warn!("failed to remove CGI output file: {}", err);
        }
    }
}

/// Runs a CGI executable against an inbound request and translates its
/// output into a [`Response`].
///
/// The request body is piped to the subprocess stdin and its stdout is
/// captured to a temporary file, then scanned for the optional status line,
/// headers, and body per the CGI convention. A zero exit yields a response
/// whose body streams lazily from the capture file (removed once the body
/// is consumed or dropped). A non-zero exit yields a 500 response carrying
/// the exit code and captured stderr. Spawn and body-copy failures are
/// returned as [`CgiError`].
pub fn cgi_wrap(
    mut request: Request,
    invocation: &CgiInvocation,
    logger: Option<&dyn CgiLogger>,
) -> Result<Response, CgiError> {
    let env_vars = build_env(&request, invocation);
    log::debug!("running CGI executable {}", invocation.binary());
    let outcome = run_process(invocation, env_vars, &mut request.body)?;

    if let Some(logger) = logger {
        if outcome.exit_code != 0 {
            logger.error(&format!(
                "CGI executable terminated with rc={}",
                outcome.exit_code
            ));
        }
        for line in outcome.stderr.lines() {
            logger.error(&format!("CGI err: {}", line));
        }
    }

    if outcome.exit_code != 0 {
        log::debug!(
            "{} exited with rc={}",
            invocation.binary(),
            outcome.exit_code
        );
        discard_sink(outcome.sink);
        return Ok(failure_response(outcome.exit_code, &outcome.stderr));
    }

    let (mut file, path) = outcome.sink.into_parts();
    // The child wrote through a dup of this handle, so rewind before scanning.
    file.seek(SeekFrom::Start(0)).map_err(CgiError::Sink)?;
    let mut reader = BufReader::new(file);
    let output = scan_cgi_output(&mut reader).map_err(CgiError::Sink)?;
    reader
        .seek(SeekFrom::Start(output.body_start))
        .map_err(CgiError::Sink)?;

    let mut response = Response::new(output.status);
    response.headers = output.headers;
    response.body = Body::from_sink(reader, path);
    Ok(response)
}
