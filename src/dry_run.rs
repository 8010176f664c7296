//! Dry runs: execute a composed script without a browser.
//!
//! [`DryRunHost`] evaluates the script inside Boa against a small mock of the
//! host API (`require('webpage')`, `require('system')`, `console`, `phantom`).
//! Every page property assignment and host call is recorded, in order, into a
//! [`Transcript`]. The mock page has no DOM: the `page.evaluate` callback runs
//! in the same context, in-page `console.log` goes through `onConsoleMessage`
//! and anything it throws goes through `onError` with an empty trace.

use boa_engine::{Context, Source};
use serde::{Deserialize, Serialize};

use crate::diagnostics::{parse_host_lines, Diagnostic, RenderOutcome, Stream};
use crate::script::RenderScript;
use crate::{Error, RenderHost, Result};

const PRELUDE: &str = r#"
var __domshot = { calls: [] };
var __domshot_exit = { domshotExit: true };

function __domshot_record(call) {
    __domshot.calls.push(call);
}

function __domshot_join(args) {
    var parts = [];
    for (var i = 0; i < args.length; i++) {
        parts.push(String(args[i]));
    }
    return parts.join(' ');
}

var console = {
    log: function () {
        __domshot_record({ op: 'stdout', line: __domshot_join(arguments) });
    }
};
console.info = console.log;
console.warn = console.log;
console.error = console.log;

var phantom = {
    exit: function (code) {
        __domshot_record({ op: 'exit', code: code === undefined ? 0 : Number(code) });
        throw __domshot_exit;
    }
};

function __domshot_create_page() {
    var state = {};
    var page = {};

    function accessor(prop, describe) {
        Object.defineProperty(page, prop, {
            get: function () { return state[prop]; },
            set: function (value) {
                state[prop] = value;
                __domshot_record(describe(value));
            }
        });
    }

    accessor('onError', function () { return { op: 'on_error' }; });
    accessor('onConsoleMessage', function () { return { op: 'on_console' }; });
    accessor('viewportSize', function (v) {
        return { op: 'viewport', width: v.width, height: v.height };
    });
    accessor('content', function (v) { return { op: 'content', markup: String(v) }; });
    accessor('clipRect', function (v) {
        return { op: 'clip', top: v.top, left: v.left, width: v.width, height: v.height };
    });

    page.evaluate = function (fn) {
        __domshot_record({ op: 'evaluate' });
        var hostConsole = console;
        var pageConsole = {
            log: function () {
                var msg = __domshot_join(arguments);
                console = hostConsole;
                try {
                    if (state.onConsoleMessage) { state.onConsoleMessage(msg); }
                } finally {
                    console = pageConsole;
                }
            }
        };
        pageConsole.info = pageConsole.log;
        pageConsole.warn = pageConsole.log;
        pageConsole.error = pageConsole.log;

        console = pageConsole;
        try {
            return fn();
        } catch (e) {
            if (e === __domshot_exit) { throw e; }
            console = hostConsole;
            if (state.onError) { state.onError(String(e), []); }
        } finally {
            console = hostConsole;
        }
    };

    page.render = function (path) {
        __domshot_record({ op: 'render', path: String(path) });
        return {{RENDER_RESULT}};
    };

    return page;
}

function require(name) {
    if (name === 'webpage') {
        return { create: __domshot_create_page };
    }
    if (name === 'system') {
        return {
            stdout: { writeLine: function (l) { __domshot_record({ op: 'stdout', line: String(l) }); } },
            stderr: { writeLine: function (l) { __domshot_record({ op: 'stderr', line: String(l) }); } }
        };
    }
    throw new Error('module not available in dry run: ' + name);
}
"#;

/// One recorded interaction with the mock host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HostCall {
    OnError,
    OnConsole,
    Viewport { width: u32, height: u32 },
    Content { markup: String },
    Clip { top: i64, left: i64, width: u32, height: u32 },
    Evaluate,
    Render { path: String },
    Exit { code: i32 },
    Stdout { line: String },
    Stderr { line: String },
}

/// Ordered record of a dry run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub calls: Vec<HostCall>,
    pub exit_code: Option<i32>,
}

impl Transcript {
    fn new(calls: Vec<HostCall>) -> Self {
        let exit_code = calls.iter().rev().find_map(|c| match c {
            HostCall::Exit { code } => Some(*code),
            _ => None,
        });
        Self { calls, exit_code }
    }

    /// Index of the first call matching `pred`.
    pub fn position(&self, pred: impl Fn(&HostCall) -> bool) -> Option<usize> {
        self.calls.iter().position(pred)
    }

    /// Last markup assigned to `page.content`.
    pub fn content(&self) -> Option<&str> {
        self.calls.iter().rev().find_map(|c| match c {
            HostCall::Content { markup } => Some(markup.as_str()),
            _ => None,
        })
    }

    pub fn render_path(&self) -> Option<&str> {
        self.calls.iter().find_map(|c| match c {
            HostCall::Render { path } => Some(path.as_str()),
            _ => None,
        })
    }

    /// Host stream output in call order, parsed the same way as a real host's.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        let lines = self.calls.iter().filter_map(|call| match call {
            HostCall::Stdout { line } => Some((Stream::Stdout, line.as_str())),
            HostCall::Stderr { line } => Some((Stream::Stderr, line.as_str())),
            _ => None,
        });
        parse_host_lines(lines, &[])
    }
}

/// In-process host backed by Boa. Writes no files.
#[derive(Debug, Clone)]
pub struct DryRunHost {
    /// Value the mock `page.render` returns
    pub render_succeeds: bool,
    /// Treat any diagnostic as a failed render
    pub strict_output: bool,
}

impl Default for DryRunHost {
    fn default() -> Self {
        Self {
            render_succeeds: true,
            strict_output: true,
        }
    }
}

impl DryRunHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Execute `script` and return everything it did.
    ///
    /// Fails with [`Error::ScriptError`] if the script throws (or does not
    /// parse) before reaching `phantom.exit`.
    pub fn run(&self, script: &RenderScript) -> Result<Transcript> {
        let mut ctx = Context::default();
        let prelude = PRELUDE.replace(
            "{{RENDER_RESULT}}",
            if self.render_succeeds { "true" } else { "false" },
        );
        ctx.eval(Source::from_bytes(prelude.as_bytes()))
            .map_err(|e| Error::ScriptError(format!("Dry-run prelude failed: {}", e)))?;

        let result = ctx.eval(Source::from_bytes(script.as_str().as_bytes()));

        let recorded = ctx
            .eval(Source::from_bytes("JSON.stringify(__domshot.calls)".as_bytes()))
            .map_err(|e| Error::ScriptError(format!("Failed to read transcript: {}", e)))?;
        let json = recorded
            .as_string()
            .map(|s| s.to_std_string_escaped())
            .ok_or_else(|| Error::ScriptError("Transcript is not a string".into()))?;
        let transcript = Transcript::new(serde_json::from_str(&json)?);

        match result {
            Err(e) if transcript.exit_code.is_none() => {
                Err(Error::ScriptError(format!("Script thrown: {}", e)))
            }
            _ => Ok(transcript),
        }
    }
}

impl RenderHost for DryRunHost {
    fn execute(&self, script: &RenderScript) -> Result<RenderOutcome> {
        let transcript = self.run(script)?;
        let diagnostics = transcript.diagnostics();
        let success = transcript.exit_code == Some(0)
            && (!self.strict_output || diagnostics.is_empty());
        Ok(RenderOutcome {
            success,
            exit_code: transcript.exit_code,
            diagnostics,
            output: None,
        })
    }
}

/// Decode `body` as the contents of a double-quoted script string literal.
pub fn eval_string_literal(body: &str) -> Result<String> {
    let mut ctx = Context::default();
    let source = format!("\"{}\"", body);
    let value = ctx
        .eval(Source::from_bytes(source.as_bytes()))
        .map_err(|e| Error::ScriptError(format!("Literal does not parse: {}", e)))?;
    value
        .as_string()
        .map(|s| s.to_std_string_escaped())
        .ok_or_else(|| Error::ScriptError("Literal did not evaluate to a string".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escape::escape;
    use crate::script::{compose, RenderRequest};

    #[test]
    fn literal_decoding_reverses_escaping() {
        let text = "He said \"hi\"\nBye \\ done";
        assert_eq!(eval_string_literal(escape(text).as_str()).unwrap(), text);
    }

    #[test]
    fn unescaped_quote_breaks_the_literal() {
        assert!(eval_string_literal("a\"b").is_err());
    }

    #[test]
    fn transcript_records_exit_code() {
        let req = RenderRequest::builder().output_path("/tmp/x.png").build().unwrap();
        let t = DryRunHost::new().run(&compose(&req)).unwrap();
        assert_eq!(t.exit_code, Some(0));
        assert_eq!(t.render_path(), Some("/tmp/x.png"));
        assert_eq!(t.content(), Some("<html><head><style></style></head><body></body></html>"));
    }

    #[test]
    fn diagnostics_follow_call_order() {
        let t = Transcript::new(vec![
            HostCall::Stderr {
                line: "TypeError: first".into(),
            },
            HostCall::Stdout {
                line: "second-console".into(),
            },
            HostCall::Stdout {
                line: "[domshot:error] third".into(),
            },
            HostCall::Stdout {
                line: "[domshot:frame] page.js:7".into(),
            },
        ]);
        let d = t.diagnostics();
        let messages: Vec<&str> = d.iter().map(|x| x.message.as_str()).collect();
        assert_eq!(messages, ["TypeError: first", "second-console", "third"]);
        assert_eq!(d[2].trace.len(), 1);
    }

    #[test]
    fn multiline_page_error_stays_one_diagnostic() {
        let req = RenderRequest::builder()
            .inline_script("throw new Error('line one\\nline two');")
            .output_path("/tmp/x.png")
            .build()
            .unwrap();
        let d = DryRunHost::new().run(&compose(&req)).unwrap().diagnostics();
        assert_eq!(d.len(), 1);
        assert_eq!(d[0].message, "Error: line one line two");
    }

    #[test]
    fn failed_render_exits_one() {
        let req = RenderRequest::builder().output_path("/tmp/x.png").build().unwrap();
        let host = DryRunHost {
            render_succeeds: false,
            ..Default::default()
        };
        let outcome = host.execute(&compose(&req)).unwrap();
        assert_eq!(outcome.exit_code, Some(1));
        assert!(!outcome.success);
    }
}
