//! Render-script composition.
//!
//! [`compose`] turns a [`RenderRequest`] into the automation script executed by
//! the rendering host. The statements are always emitted in this order, and
//! the host relies on it:
//!
//! 1. page creation and diagnostic callbacks (`onError`, `onConsoleMessage`)
//! 2. viewport size
//! 3. page content (`<html><head><style>` CSS `</style></head>` body `</html>`)
//! 4. clip rectangle, anchored at the origin with the viewport's size
//! 5. `page.evaluate` of the foreword followed by the inline script
//! 6. render to the output path
//! 7. process exit
//!
//! Text payloads go through [`crate::escape`]; [`TrustedScript`] payloads are
//! pasted verbatim.

use std::fmt;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::escape::{escape_with, EscapeOptions};
use crate::{Error, Result, Viewport};

/// Markup used when the request carries no body content.
pub const EMPTY_BODY: &str = "<body></body>";

/// Script source that runs with full page privileges inside `page.evaluate`.
///
/// This content is never escaped. Callers must not build it from unsanitized
/// external input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustedScript(String);

impl TrustedScript {
    pub fn new(source: impl Into<String>) -> Self {
        TrustedScript(source.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for TrustedScript {
    fn from(s: &str) -> Self {
        TrustedScript::new(s)
    }
}

impl From<String> for TrustedScript {
    fn from(s: String) -> Self {
        TrustedScript(s)
    }
}

/// How the composed script decides its exit status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExitPolicy {
    /// Exit 0 only when `page.render` reports success, 1 otherwise
    #[default]
    VerifyRender,
    /// Always exit 0 after requesting the render
    Unconditional,
}

/// Options for [`compose_with`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComposeOptions {
    pub exit_policy: ExitPolicy,
    pub escape: EscapeOptions,
}

/// Everything one render needs. Immutable once built.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    html: Option<String>,
    css: String,
    foreword: Option<TrustedScript>,
    inline_script: Option<TrustedScript>,
    viewport: Viewport,
    output_path: PathBuf,
}

impl RenderRequest {
    pub fn builder() -> RenderRequestBuilder {
        RenderRequestBuilder::default()
    }

    pub fn html(&self) -> Option<&str> {
        self.html.as_deref()
    }

    pub fn css(&self) -> &str {
        &self.css
    }

    pub fn foreword(&self) -> Option<&TrustedScript> {
        self.foreword.as_ref()
    }

    pub fn inline_script(&self) -> Option<&TrustedScript> {
        self.inline_script.as_ref()
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }
}

/// Builder for [`RenderRequest`]
#[derive(Debug, Clone, Default)]
pub struct RenderRequestBuilder {
    html: Option<String>,
    css: String,
    foreword: Option<TrustedScript>,
    inline_script: Option<TrustedScript>,
    viewport: Viewport,
    output_path: Option<PathBuf>,
}

impl RenderRequestBuilder {
    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    pub fn css(mut self, css: impl Into<String>) -> Self {
        self.css = css.into();
        self
    }

    pub fn foreword(mut self, script: impl Into<TrustedScript>) -> Self {
        self.foreword = Some(script.into());
        self
    }

    pub fn inline_script(mut self, script: impl Into<TrustedScript>) -> Self {
        self.inline_script = Some(script.into());
        self
    }

    pub fn viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = Viewport { width, height };
        self
    }

    pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<RenderRequest> {
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(Error::ConfigError(format!(
                "viewport must be non-empty, got {}x{}",
                self.viewport.width, self.viewport.height
            )));
        }
        let output_path = match self.output_path {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => return Err(Error::ConfigError("output path must not be empty".into())),
        };
        // Embedded into the script as text, so it must survive the round trip
        if output_path.to_str().is_none() {
            return Err(Error::ConfigError(format!(
                "output path is not valid UTF-8: {}",
                output_path.display()
            )));
        }
        Ok(RenderRequest {
            html: self.html,
            css: self.css,
            foreword: self.foreword,
            inline_script: self.inline_script,
            viewport: self.viewport,
            output_path,
        })
    }
}

/// A composed automation script, ready to hand to a host exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderScript {
    source: String,
    output_path: PathBuf,
}

impl RenderScript {
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Path the script renders to.
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Hex SHA-256 of the script source.
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.source.as_bytes()))
    }

    pub fn into_string(self) -> String {
        self.source
    }
}

impl fmt::Display for RenderScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

// Fixed prologue: page creation plus both diagnostic callbacks, registered
// before anything can raise. Both callbacks write to stdout so errors stay in
// order with console output; the markers match `crate::diagnostics`.
const PAGE_PROLOGUE: &str = r#"var page = require('webpage').create();

// Forward in-page script errors: one marked message line, one line per frame
page.onError = function (msg, trace) {
    console.log('[domshot:error] ' + String(msg).split(/\r\n|\r|\n|\u2028|\u2029/).join(' '));
    (trace || []).forEach(function (item) {
        console.log('[domshot:frame] ' + item.file + ':' + item.line);
    });
};

// Forward in-page console output verbatim
page.onConsoleMessage = function (msg) {
    console.log(msg);
};
"#;

/// Compose with default options.
pub fn compose(request: &RenderRequest) -> RenderScript {
    compose_with(request, &ComposeOptions::default())
}

/// Compose the render script for `request`.
pub fn compose_with(request: &RenderRequest, options: &ComposeOptions) -> RenderScript {
    let Viewport { width, height } = request.viewport;
    let body = match request.html.as_deref() {
        Some(b) if !b.is_empty() => b,
        _ => EMPTY_BODY,
    };
    // Escaped as a whole so the wrapper's closing tags get the same treatment
    let content = escape_with(
        &format!("<html><head><style>{}</style></head>{}</html>", request.css, body),
        options.escape,
    );
    let output = escape_with(
        request.output_path.to_str().unwrap_or_default(),
        options.escape,
    );

    let mut s = String::with_capacity(PAGE_PROLOGUE.len() + content.as_str().len() + 512);
    s.push_str(PAGE_PROLOGUE);
    s.push_str(&format!(
        "\npage.viewportSize = {{ width: {width}, height: {height} }};\n"
    ));
    s.push_str(&format!("\npage.content = \"{content}\";\n"));
    s.push_str(&format!(
        "\npage.clipRect = {{ top: 0, left: 0, width: {width}, height: {height} }};\n"
    ));

    s.push_str("\npage.evaluate(function () {\n");
    for fragment in [&request.foreword, &request.inline_script].into_iter().flatten() {
        if !fragment.is_empty() {
            s.push_str(fragment.as_str());
            s.push('\n');
        }
    }
    s.push_str("});\n\n");

    s.push_str(&match options.exit_policy {
        ExitPolicy::VerifyRender => format!(
            "var rendered = page.render(\"{output}\");\nphantom.exit(rendered ? 0 : 1);\n"
        ),
        ExitPolicy::Unconditional => format!("page.render(\"{output}\");\nphantom.exit(0);\n"),
    });

    log::debug!(
        "composed render script ({} bytes) for {}x{} -> {}",
        s.len(),
        width,
        height,
        request.output_path.display()
    );

    RenderScript {
        source: s,
        output_path: request.output_path.clone(),
    }
}
