//! Process-backed rendering host.
//!
//! [`PhantomHost`] writes a composed script into a private scratch directory,
//! runs the host executable on it and supervises the child. Both output
//! streams are drained line by line on their own threads and merged back in
//! the order the lines were read. The configured timeout is enforced by
//! killing the child, and the result is only reported as a success when the
//! host exited 0 *and* left a non-empty image behind.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::diagnostics::{parse_host_lines, RenderOutcome, Stream};
use crate::script::RenderScript;
use crate::{Error, HostConfig, RenderHost, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runs scripts with an out-of-process PhantomJS-compatible host
#[derive(Debug, Clone, Default)]
pub struct PhantomHost {
    config: HostConfig,
}

impl PhantomHost {
    pub fn new(config: HostConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    fn spawn(&self, script_path: &std::path::Path) -> Result<Child> {
        Command::new(&self.config.program)
            .args(&self.config.args)
            .arg(script_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::HostError(format!(
                    "Failed to launch {}: {}",
                    self.config.program.display(),
                    e
                ))
            })
    }

    fn wait(&self, child: &mut Child) -> Result<ExitStatus> {
        let started = Instant::now();
        let budget = Duration::from_millis(self.config.timeout_ms);
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {
                    if self.config.timeout_ms > 0 && started.elapsed() >= budget {
                        warn!(
                            "host {} exceeded {}ms, killing it",
                            self.config.program.display(),
                            self.config.timeout_ms
                        );
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(Error::Timeout(self.config.timeout_ms));
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    let _ = child.kill();
                    return Err(Error::HostError(format!("Failed to wait for host: {}", e)));
                }
            }
        }
    }
}

struct CapturedLine {
    seq: u64,
    stream: Stream,
    text: String,
}

// Read a child pipe to completion on its own thread so neither stream can
// fill up and stall the host. Lines are stamped from a counter shared by both
// pipes.
fn drain<R: Read + Send + 'static>(
    pipe: Option<R>,
    stream: Stream,
    seq: Arc<AtomicU64>,
) -> thread::JoinHandle<Vec<CapturedLine>> {
    thread::spawn(move || {
        let mut lines = Vec::new();
        let Some(pipe) = pipe else {
            return lines;
        };
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buf);
                    lines.push(CapturedLine {
                        seq: seq.fetch_add(1, Ordering::SeqCst),
                        stream,
                        text: text.trim_end_matches(|c| c == '\r' || c == '\n').to_string(),
                    });
                }
            }
        }
        lines
    })
}

impl RenderHost for PhantomHost {
    fn execute(&self, script: &RenderScript) -> Result<RenderOutcome> {
        let scratch = tempfile::Builder::new()
            .prefix("domshot-")
            .tempdir()
            .map_err(|e| Error::HostError(format!("Failed to create scratch dir: {}", e)))?;
        let script_path = scratch.path().join("render.js");
        std::fs::write(&script_path, script.as_str()).map_err(|e| Error::io(&script_path, e))?;

        debug!(
            "running {} on {} (sha256 {})",
            self.config.program.display(),
            script_path.display(),
            script.fingerprint()
        );

        let mut child = self.spawn(&script_path)?;
        let seq = Arc::new(AtomicU64::new(0));
        let stdout = drain(child.stdout.take(), Stream::Stdout, seq.clone());
        let stderr = drain(child.stderr.take(), Stream::Stderr, seq);
        let status = self.wait(&mut child)?;
        let mut lines = stdout.join().unwrap_or_default();
        lines.extend(stderr.join().unwrap_or_default());
        lines.sort_by_key(|l| l.seq);

        let diagnostics = parse_host_lines(
            lines.iter().map(|l| (l.stream, l.text.as_str())),
            &self.config.ignored_warnings,
        );
        let output = script.output_path();
        let produced = std::fs::metadata(output)
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false);
        let exit_code = status.code();

        let success = exit_code == Some(0)
            && produced
            && (!self.config.strict_output || diagnostics.is_empty());

        if !success {
            warn!(
                "render to {} failed (exit {:?}, image written: {}, {} diagnostics)",
                output.display(),
                exit_code,
                produced,
                diagnostics.len()
            );
        }

        Ok(RenderOutcome {
            success,
            exit_code,
            diagnostics,
            output: produced.then(|| output.to_path_buf()),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::script::{compose, RenderRequest};
    use crate::DiagnosticKind;

    // Fake host: pulls the render path out of the script and writes a stub image
    const WRITES_IMAGE: &str =
        r#"p=$(sed -n 's/.*page\.render("\([^"]*\)").*/\1/p' "$0"); printf PNGDATA > "$p""#;

    fn fake_host(body: &str, strict: bool) -> PhantomHost {
        PhantomHost::new(HostConfig {
            program: "sh".into(),
            args: vec!["-c".into(), body.into()],
            timeout_ms: 5000,
            strict_output: strict,
            ..Default::default()
        })
    }

    fn script_in(dir: &tempfile::TempDir) -> RenderScript {
        let req = RenderRequest::builder()
            .html("<p>hi</p>")
            .output_path(dir.path().join("shot.png"))
            .build()
            .unwrap();
        compose(&req)
    }

    #[test]
    fn missing_program_is_a_host_error() {
        let host = PhantomHost::new(HostConfig {
            program: "/nonexistent/domshot-host".into(),
            ..Default::default()
        });
        let dir = tempfile::tempdir().unwrap();
        let err = host.execute(&script_in(&dir)).unwrap_err();
        assert!(matches!(err, Error::HostError(_)), "got {err:?}");
    }

    #[test]
    fn image_written_and_exit_zero_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = fake_host(WRITES_IMAGE, true).execute(&script_in(&dir)).unwrap();
        assert!(outcome.success, "{}", outcome.summary());
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(outcome.output, Some(dir.path().join("shot.png")));
        assert_eq!(std::fs::read(dir.path().join("shot.png")).unwrap(), b"PNGDATA");
    }

    #[test]
    fn exit_zero_without_image_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = fake_host("exit 0", true).execute(&script_in(&dir)).unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.output.is_none());
    }

    #[test]
    fn nonzero_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let body = format!("{WRITES_IMAGE}; exit 3");
        let outcome = fake_host(&body, true).execute(&script_in(&dir)).unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, Some(3));
    }

    #[test]
    fn strict_output_fails_on_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let body = format!(
            "echo from-page; sleep 0.1; echo 'oops' >&2; echo '  at page.js:4' >&2; {WRITES_IMAGE}"
        );

        let strict = fake_host(&body, true).execute(&script_in(&dir)).unwrap();
        assert!(!strict.success);
        assert_eq!(strict.diagnostics.len(), 2);
        assert_eq!(strict.diagnostics[0].kind, DiagnosticKind::Console);
        assert_eq!(strict.diagnostics[1].trace.len(), 1);

        let lenient = fake_host(&body, false).execute(&script_in(&dir)).unwrap();
        assert!(lenient.success);
        assert_eq!(lenient.diagnostics.len(), 2);
    }

    fn messages(outcome: &RenderOutcome) -> Vec<&str> {
        outcome.diagnostics.iter().map(|d| d.message.as_str()).collect()
    }

    #[test]
    fn error_before_console_line_is_reported_first() {
        let dir = tempfile::tempdir().unwrap();
        let body = format!("echo 'TypeError: first' >&2; sleep 0.1; echo second-console; {WRITES_IMAGE}");
        let outcome = fake_host(&body, false).execute(&script_in(&dir)).unwrap();
        assert_eq!(messages(&outcome), ["TypeError: first", "second-console"]);
        assert_eq!(outcome.diagnostics[0].kind, DiagnosticKind::ScriptError);
    }

    #[test]
    fn page_errors_on_stdout_keep_their_position() {
        let dir = tempfile::tempdir().unwrap();
        let body = format!(
            "echo '[domshot:error] TypeError: first'; echo '[domshot:frame] page.js:2'; \
             echo second-console; {WRITES_IMAGE}"
        );
        let outcome = fake_host(&body, true).execute(&script_in(&dir)).unwrap();
        assert!(!outcome.success);
        assert_eq!(messages(&outcome), ["TypeError: first", "second-console"]);
        assert_eq!(outcome.diagnostics[0].kind, DiagnosticKind::ScriptError);
        assert_eq!(outcome.diagnostics[0].trace.len(), 1);
        assert_eq!(outcome.diagnostics[1].kind, DiagnosticKind::Console);
    }

    #[test]
    fn ignored_warnings_do_not_fail_strict_renders() {
        let dir = tempfile::tempdir().unwrap();
        let body = format!("echo 'Unable to load library icui18n' >&2; {WRITES_IMAGE}");
        let outcome = fake_host(&body, true).execute(&script_in(&dir)).unwrap();
        assert!(outcome.success, "{}", outcome.summary());
        assert!(outcome.diagnostics.is_empty());
    }

    #[test]
    fn slow_host_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = fake_host("sleep 5", true);
        host.config.timeout_ms = 200;
        let started = Instant::now();
        let err = host.execute(&script_in(&dir)).unwrap_err();
        assert!(matches!(err, Error::Timeout(200)), "got {err:?}");
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
