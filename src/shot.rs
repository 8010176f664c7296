//! Page assembly front end.
//!
//! [`DomShot`] collects stylesheets, scripts, a body fragment and global
//! variables, then composes and renders them through any [`RenderHost`].
//!
//! ```no_run
//! use domshot::{DomShot, PhantomHost};
//!
//! # fn main() -> domshot::Result<()> {
//! let mut shot = DomShot::new();
//! shot.set_clip(640, 480);
//! shot.load_css("body { background: #fff }");
//! shot.load_html("<body><h1>Hello</h1></body>");
//! shot.set_global("series", &[1, 2, 3])?;
//! shot.load_js("document.querySelector('h1').textContent += ' ' + series.length;");
//! let png = shot.render(&PhantomHost::default())?;
//! # let _ = png;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::Serialize;

use crate::script::{compose_with, ComposeOptions, RenderRequest, RenderScript, TrustedScript};
use crate::{Error, RenderHost, Result, Viewport};

const IMAGE_FILE: &str = "shot.png";

/// Accumulates page inputs for one or more renders
#[derive(Debug, Clone, Default)]
pub struct DomShot {
    css: String,
    js: String,
    body: String,
    viewport: Viewport,
    globals: Vec<(String, serde_json::Value)>,
    options: ComposeOptions,
}

impl DomShot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_clip(&mut self, width: u32, height: u32) {
        self.viewport = Viewport { width, height };
    }

    pub fn clip(&self) -> Viewport {
        self.viewport
    }

    pub fn set_options(&mut self, options: ComposeOptions) {
        self.options = options;
    }

    pub fn css(&self) -> &str {
        &self.css
    }

    pub fn js(&self) -> &str {
        &self.js
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Append a stylesheet.
    pub fn load_css(&mut self, css: &str) {
        self.css.push('\n');
        self.css.push_str(css);
    }

    /// Append a script, run in page context after the globals.
    pub fn load_js(&mut self, js: &str) {
        self.js.push('\n');
        self.js.push_str(js);
    }

    /// Replace the body markup.
    pub fn load_html(&mut self, html: &str) {
        self.body = html.to_string();
    }

    /// Load a `.css`, `.js` or `.html` file by extension.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        let kind = match ext.as_deref() {
            Some(k @ ("css" | "js" | "html")) => k,
            _ => {
                return Err(Error::ConfigError(format!(
                    "Unknown file type: {}",
                    path.display()
                )))
            }
        };
        let contents = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        debug!("loaded {} ({} bytes)", path.display(), contents.len());
        match kind {
            "css" => self.load_css(&contents),
            "js" => self.load_js(&contents),
            _ => self.load_html(&contents),
        }
        Ok(())
    }

    pub fn load_files<P: AsRef<Path>>(&mut self, paths: impl IntoIterator<Item = P>) -> Result<()> {
        for p in paths {
            self.load_file(p)?;
        }
        Ok(())
    }

    /// Declare a page global initialised from `value`'s JSON form.
    ///
    /// Globals are declared in insertion order before any loaded script runs;
    /// setting an existing name replaces its value in place.
    pub fn set_global<T: Serialize + ?Sized>(&mut self, name: &str, value: &T) -> Result<()> {
        if !is_identifier(name) {
            return Err(Error::ConfigError(format!(
                "Global name is not a valid identifier: {:?}",
                name
            )));
        }
        let value = serde_json::to_value(value)?;
        match self.globals.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => self.globals.push((name.to_string(), value)),
        }
        Ok(())
    }

    /// Variable declarations for every global.
    pub fn foreword(&self) -> Result<TrustedScript> {
        let mut out = String::new();
        for (name, value) in &self.globals {
            let json = serde_json::to_string(value)?;
            // JSON allows raw U+2028/U+2029, ES5 source does not
            let json = json.replace('\u{2028}', "\\u2028").replace('\u{2029}', "\\u2029");
            out.push_str(&format!("var {} = {};\n", name, json));
        }
        Ok(TrustedScript::new(out))
    }

    /// Build the request that renders to `output_path`.
    pub fn request(&self, output_path: impl Into<PathBuf>) -> Result<RenderRequest> {
        RenderRequest::builder()
            .viewport(self.viewport.width, self.viewport.height)
            .css(self.css.clone())
            .html(self.body.clone())
            .foreword(self.foreword()?)
            .inline_script(self.js.clone())
            .output_path(output_path)
            .build()
    }

    /// Compose the script that renders to `output_path`.
    pub fn script(&self, output_path: impl Into<PathBuf>) -> Result<RenderScript> {
        Ok(compose_with(&self.request(output_path)?, &self.options))
    }

    /// Render through `host` and return the image bytes.
    ///
    /// The image is captured into a private scratch directory that is removed
    /// before returning.
    pub fn render<H: RenderHost + ?Sized>(&self, host: &H) -> Result<Vec<u8>> {
        let scratch = tempfile::Builder::new()
            .prefix("domshot-out-")
            .tempdir()
            .map_err(|e| Error::RenderError(format!("Failed to create scratch dir: {}", e)))?;
        let image = scratch.path().join(IMAGE_FILE);
        let script = self.script(&image)?;

        let outcome = host.execute(&script)?;
        if !outcome.success {
            let summary = outcome.summary();
            warn!("render failed: {}", summary);
            return Err(Error::RenderError(if summary.is_empty() {
                format!("host exited with {:?} and produced no image", outcome.exit_code)
            } else {
                format!("host exited with {:?}:\n{}", outcome.exit_code, summary)
            }));
        }
        let produced = outcome
            .output
            .ok_or_else(|| Error::RenderError("host reported success but wrote no image".into()))?;
        std::fs::read(&produced).map_err(|e| Error::io(&produced, e))
    }

    /// Render through `host` and write the image to `path`.
    pub fn render_to_file<H: RenderHost + ?Sized>(&self, host: &H, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.render(host)?;
        std::fs::write(path, bytes).map_err(|e| Error::io(path, e))
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}
