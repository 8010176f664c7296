//! Diagnostics reported by the rendering host.
//!
//! The composed script writes everything it reports to the host's stdout, so
//! console output and script errors keep their relative order. Console
//! messages are written verbatim. A script error is one [`ERROR_MARKER`] line
//! holding the message, followed by one [`FRAME_MARKER`] `<file>:<line>` line
//! per stack frame. Anything the host itself prints on stderr is reported as an
//! error, with `  at <file>:<line>` lines taken as its frames.
//!
//! [`parse_host_lines`] turns the captured lines back into [`Diagnostic`]s.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Warnings the host prints on some systems that carry no information about
/// the render itself.
pub const DEFAULT_IGNORED_WARNINGS: &[&str] = &["Unable to load library icui18n"];

/// Prefix of the line carrying an in-page error message
pub const ERROR_MARKER: &str = "[domshot:error] ";
/// Prefix of each stack frame line following an error
pub const FRAME_MARKER: &str = "[domshot:frame] ";

const FRAME_PREFIX: &str = "  at ";

/// Which host stream a line was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// A position in page script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Uncaught in-page script error (or host error output)
    ScriptError,
    /// In-page console output
    Console,
}

/// One message emitted while the host ran the script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    /// Innermost frame; only set for script errors that carried a trace
    pub location: Option<SourceLocation>,
    pub trace: Vec<SourceLocation>,
}

impl Diagnostic {
    pub fn console(message: impl Into<String>) -> Self {
        Self {
            kind: DiagnosticKind::Console,
            message: message.into(),
            location: None,
            trace: Vec::new(),
        }
    }

    pub fn script_error(message: impl Into<String>) -> Self {
        Self {
            kind: DiagnosticKind::ScriptError,
            message: message.into(),
            location: None,
            trace: Vec::new(),
        }
    }

    fn push_frame(&mut self, frame: SourceLocation) {
        if self.location.is_none() {
            self.location = Some(frame.clone());
        }
        self.trace.push(frame);
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DiagnosticKind::Console => write!(f, "console: {}", self.message)?,
            DiagnosticKind::ScriptError => write!(f, "error: {}", self.message)?,
        }
        for frame in &self.trace {
            write!(f, "\n  at {}", frame)?;
        }
        Ok(())
    }
}

/// Result of one host execution
#[derive(Debug, Clone, Default)]
pub struct RenderOutcome {
    pub success: bool,
    /// `None` when the host was killed or never exited on its own
    pub exit_code: Option<i32>,
    pub diagnostics: Vec<Diagnostic>,
    /// The produced image, when one was written
    pub output: Option<PathBuf>,
}

impl RenderOutcome {
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.kind == DiagnosticKind::ScriptError)
    }

    /// All diagnostics, one per line, for error reports.
    pub fn summary(&self) -> String {
        self.diagnostics
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn is_ignored(line: &str, ignored: &[String]) -> bool {
    ignored.iter().any(|w| !w.is_empty() && line.contains(w.as_str()))
}

// "file:line", where file may itself contain ':' (URLs, drive letters)
fn parse_frame(s: &str) -> Option<SourceLocation> {
    let (file, line) = s.trim().rsplit_once(':')?;
    let line = line.trim().parse::<u32>().ok()?;
    Some(SourceLocation {
        file: file.trim().to_string(),
        line,
    })
}

/// Turn host output lines, in the order they were produced, into diagnostics.
///
/// Lines containing any of the `ignored` substrings are dropped, as are blank
/// lines. Frame lines that do not follow an error are kept as diagnostics of
/// their own.
pub fn parse_host_lines<I, S>(lines: I, ignored: &[String]) -> Vec<Diagnostic>
where
    I: IntoIterator<Item = (Stream, S)>,
    S: AsRef<str>,
{
    let mut out = Vec::new();
    let mut current: Option<Diagnostic> = None;

    for (stream, line) in lines {
        let line = line.as_ref();
        if line.trim().is_empty() || is_ignored(line, ignored) {
            continue;
        }
        let frame = match stream {
            Stream::Stdout => line.strip_prefix(FRAME_MARKER),
            Stream::Stderr => line.strip_prefix(FRAME_PREFIX),
        };
        if let (Some(diag), Some(frame)) = (current.as_mut(), frame.and_then(parse_frame)) {
            diag.push_frame(frame);
            continue;
        }
        out.extend(current.take());
        match stream {
            Stream::Stdout => match line.strip_prefix(ERROR_MARKER) {
                Some(message) => current = Some(Diagnostic::script_error(message.trim_end())),
                None => out.push(Diagnostic::console(line)),
            },
            Stream::Stderr => current = Some(Diagnostic::script_error(line.trim_end())),
        }
    }
    out.extend(current);
    out
}

/// [`parse_host_lines`] for streams captured separately, stdout first.
pub fn parse_host_output(stdout: &str, stderr: &str, ignored: &[String]) -> Vec<Diagnostic> {
    let lines = stdout
        .lines()
        .map(|l| (Stream::Stdout, l))
        .chain(stderr.lines().map(|l| (Stream::Stderr, l)));
    parse_host_lines(lines, ignored)
}
